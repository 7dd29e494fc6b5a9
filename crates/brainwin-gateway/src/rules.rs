//! Path allow-list and role rules evaluated by the request gate.

use brainwin::Role;

/// Paths reachable without a token. A trailing `/**` matches the prefix and
/// everything below it.
pub const PUBLIC_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/register",
    "/auth/logout",
    "/auth/send-verification-code",
    "/auth/verify-email-code",
    "/auth/forgot-password",
    "/auth/reset-password",
    "/payments/webhook",
    "/payments/success",
    "/v3/api-docs/**",
    "/swagger-ui/**",
    "/swagger-ui.html",
    "/actuator/health",
    "/health",
    // guarded by its own bearer token
    "/metrics",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRule {
    pub method: &'static str,
    pub pattern: &'static str,
    pub required: Role,
}

pub const ACCESS_RULES: &[AccessRule] = &[
    AccessRule {
        method: "DELETE",
        pattern: "/users/**",
        required: Role::Admin,
    },
    AccessRule {
        method: "POST",
        pattern: "/users",
        required: Role::Admin,
    },
];

/// Match `path` against a pattern that is either exact or ends in `/**`.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    match pattern.strip_suffix("/**") {
        Some(prefix) => {
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
        None => path == pattern,
    }
}

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path_matches(p, path))
}

/// The strictest role any rule demands for this request, if any.
pub fn required_role(method: &str, path: &str) -> Option<Role> {
    ACCESS_RULES
        .iter()
        .filter(|r| r.method.eq_ignore_ascii_case(method) && path_matches(r.pattern, path))
        .map(|r| r.required)
        .max_by_key(|role| matches!(role, Role::Admin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_patterns() {
        assert!(path_matches("/auth/login", "/auth/login"));
        assert!(path_matches("/auth/login", "/auth/login/"));
        assert!(!path_matches("/auth/login", "/auth/login/extra"));
        assert!(!path_matches("/auth/login", "/auth/log"));
    }

    #[test]
    fn wildcard_patterns() {
        assert!(path_matches("/swagger-ui/**", "/swagger-ui"));
        assert!(path_matches("/swagger-ui/**", "/swagger-ui/index.html"));
        assert!(path_matches("/users/**", "/users/123"));
        assert!(path_matches("/users/**", "/users/123/avatar"));
        assert!(!path_matches("/swagger-ui/**", "/swagger-uiX"));
    }

    #[test]
    fn public_list() {
        for p in [
            "/auth/login",
            "/auth/register",
            "/payments/webhook",
            "/payments/success",
            "/v3/api-docs/users",
            "/swagger-ui.html",
            "/health",
        ] {
            assert!(is_public(p), "{p} should be public");
        }
        for p in ["/users", "/users/me", "/payments/history", "/"] {
            assert!(!is_public(p), "{p} should be protected");
        }
    }

    #[test]
    fn admin_rules() {
        assert_eq!(required_role("DELETE", "/users/123"), Some(Role::Admin));
        assert_eq!(required_role("delete", "/users/123"), Some(Role::Admin));
        assert_eq!(required_role("POST", "/users"), Some(Role::Admin));
        assert_eq!(required_role("POST", "/users/me/upgrade-premium"), None);
        assert_eq!(required_role("GET", "/users/123"), None);
        assert_eq!(required_role("PUT", "/users/123"), None);
    }
}
