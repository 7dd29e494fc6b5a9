//! Request gate: public-path allow-list, token authentication and role rules.
//!
//! Runs as `from_fn` middleware in front of every route. The decision itself
//! is a pure function of the request line and credentials so it can be
//! exercised without a running server.

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::Method;
use actix_web::middleware::Next;
use actix_web::{web, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use brainwin::{Role, TokenCodec};
use std::future::{ready, Ready};

use crate::error::GatewayError;
use crate::metrics;
use crate::rules;

/// Cookie that carries the bearer token for browser clients.
pub const AUTH_COOKIE: &str = "jwt";

/// Caller identity attached to request extensions after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub email: String,
    /// Role claim as issued, `"USER"` when the token carried none.
    pub role: String,
}

impl AuthIdentity {
    pub fn is_admin(&self) -> bool {
        Role::is_admin_str(&self.role)
    }
}

impl FromRequest for AuthIdentity {
    type Error = GatewayError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(req.extensions().get::<AuthIdentity>().cloned().ok_or_else(|| {
            GatewayError::Unauthorized("missing or invalid authentication token".to_string())
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingToken,
    InvalidToken,
    AdminRequired,
}

impl Rejection {
    fn reason(&self) -> &'static str {
        match self {
            Rejection::MissingToken => "missing_token",
            Rejection::InvalidToken => "invalid_token",
            Rejection::AdminRequired => "admin_required",
        }
    }

    pub fn into_error(self) -> GatewayError {
        match self {
            Rejection::MissingToken => GatewayError::Unauthorized(
                "missing or invalid authentication token".to_string(),
            ),
            Rejection::InvalidToken => {
                GatewayError::Unauthorized("invalid or expired token".to_string())
            }
            Rejection::AdminRequired => {
                GatewayError::Forbidden("admin permission required".to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Bare `OPTIONS`, answered without authentication.
    Preflight,
    Public,
    Authenticated(AuthIdentity),
    Rejected(Rejection),
}

pub struct RequestGate {
    codec: TokenCodec,
}

impl RequestGate {
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }

    /// Decide what happens to a request. The cookie token wins over the
    /// `Authorization` header when both are present.
    pub fn evaluate(
        &self,
        method: &Method,
        path: &str,
        cookie_token: Option<&str>,
        authorization: Option<&str>,
    ) -> GateDecision {
        if method == Method::OPTIONS {
            return GateDecision::Preflight;
        }
        if rules::is_public(path) {
            return GateDecision::Public;
        }

        let token = cookie_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                authorization
                    .and_then(|h| h.strip_prefix("Bearer "))
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
            });
        let Some(token) = token else {
            return GateDecision::Rejected(Rejection::MissingToken);
        };

        let claims = match self.codec.verify(token) {
            Ok(c) => c,
            Err(_) => return GateDecision::Rejected(Rejection::InvalidToken),
        };
        let identity = AuthIdentity {
            email: claims.email,
            role: claims.role,
        };

        if let Some(Role::Admin) = rules::required_role(method.as_str(), path) {
            if !identity.is_admin() {
                return GateDecision::Rejected(Rejection::AdminRequired);
            }
        }
        GateDecision::Authenticated(identity)
    }
}

pub async fn request_gate<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let Some(gate) = req.app_data::<web::Data<RequestGate>>().cloned() else {
        tracing::error!("request gate is not configured");
        let resp = GatewayError::Internal("request gate missing".to_string()).error_response();
        return Ok(req.into_response(resp).map_into_right_body());
    };

    let cookie_token = req.cookie(AUTH_COOKIE).map(|c| c.value().to_string());
    let authorization = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match gate.evaluate(
        req.method(),
        req.path(),
        cookie_token.as_deref(),
        authorization.as_deref(),
    ) {
        GateDecision::Preflight => {
            Ok(req.into_response(HttpResponse::Ok().finish()).map_into_right_body())
        }
        GateDecision::Public => next.call(req).await.map(|r| r.map_into_left_body()),
        GateDecision::Authenticated(identity) => {
            req.extensions_mut().insert(identity);
            next.call(req).await.map(|r| r.map_into_left_body())
        }
        GateDecision::Rejected(rejection) => {
            metrics::GATE_REJECTIONS
                .with_label_values(&[rejection.reason()])
                .inc();
            tracing::debug!(
                method = %req.method(),
                path = %req.path(),
                reason = rejection.reason(),
                "request rejected by gate"
            );
            let resp = rejection.into_error().error_response();
            Ok(req.into_response(resp).map_into_right_body())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn codec() -> TokenCodec {
        TokenCodec::from_bytes(&[7u8; 32]).unwrap()
    }

    fn gate() -> RequestGate {
        RequestGate::new(codec())
    }

    fn token(role: &str) -> String {
        codec()
            .issue_at("ana@example.com", role, Utc::now().timestamp())
            .unwrap()
    }

    #[test]
    fn options_is_preflight() {
        assert_eq!(
            gate().evaluate(&Method::OPTIONS, "/users", None, None),
            GateDecision::Preflight
        );
    }

    #[test]
    fn public_paths_need_no_token() {
        assert_eq!(
            gate().evaluate(&Method::POST, "/auth/login", None, None),
            GateDecision::Public
        );
        assert_eq!(
            gate().evaluate(&Method::GET, "/swagger-ui/index.html", None, Some("Bearer junk")),
            GateDecision::Public
        );
    }

    #[test]
    fn missing_token() {
        assert_eq!(
            gate().evaluate(&Method::GET, "/users/me", None, None),
            GateDecision::Rejected(Rejection::MissingToken)
        );
        assert_eq!(
            gate().evaluate(&Method::GET, "/users/me", Some("  "), Some("Basic abc")),
            GateDecision::Rejected(Rejection::MissingToken)
        );
    }

    #[test]
    fn header_token_is_accepted() {
        let t = token("USER");
        match gate().evaluate(&Method::GET, "/users/me", None, Some(&format!("Bearer {t}"))) {
            GateDecision::Authenticated(id) => {
                assert_eq!(id.email, "ana@example.com");
                assert_eq!(id.role, "USER");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cookie_takes_precedence_over_header() {
        let t = token("ADMIN");
        let decision = gate().evaluate(
            &Method::DELETE,
            "/users/1",
            Some(&t),
            Some("Bearer not-a-token"),
        );
        assert!(matches!(decision, GateDecision::Authenticated(ref id) if id.is_admin()));
    }

    #[test]
    fn expired_token_is_invalid() {
        let t = codec()
            .issue_at(
                "ana@example.com",
                "USER",
                (Utc::now() - Duration::hours(7)).timestamp(),
            )
            .unwrap();
        assert_eq!(
            gate().evaluate(&Method::GET, "/users/me", Some(&t), None),
            GateDecision::Rejected(Rejection::InvalidToken)
        );
    }

    #[test]
    fn non_admin_cannot_delete_users() {
        let t = token("USER");
        assert_eq!(
            gate().evaluate(&Method::DELETE, "/users/123", Some(&t), None),
            GateDecision::Rejected(Rejection::AdminRequired)
        );
        assert_eq!(
            gate().evaluate(&Method::POST, "/users", Some(&t), None),
            GateDecision::Rejected(Rejection::AdminRequired)
        );
    }

    #[test]
    fn admin_role_is_case_insensitive() {
        let t = token("admin");
        assert!(matches!(
            gate().evaluate(&Method::DELETE, "/users/123", Some(&t), None),
            GateDecision::Authenticated(_)
        ));
    }

    #[test]
    fn rejection_statuses() {
        use actix_web::http::StatusCode;
        assert_eq!(
            Rejection::MissingToken.into_error().status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Rejection::InvalidToken.into_error().status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Rejection::AdminRequired.into_error().status_code(),
            StatusCode::FORBIDDEN
        );
    }
}
