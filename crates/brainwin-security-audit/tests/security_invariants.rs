//! Security invariant tests for the BrainWin accounts gateway.
//!
//! These scan the production sources of every workspace crate so that a
//! later change cannot quietly regress credential handling, webhook
//! verification or the at-most-once payment ledger.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// All .rs files from production crates (excluding tests and this crate).
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let crates_dir = root.join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        if path
            .to_str()
            .map(|s| s.contains("security-audit"))
            .unwrap_or(false)
        {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    files
}

/// Lines before the first `#[cfg(test)]` or `mod tests` in a file.
/// Heuristic: everything after the first test marker is dropped.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            break;
        }
        result.push(line);
    }

    result.join("\n")
}

fn source_named<'a>(files: &'a [(String, String)], suffix: &str) -> Vec<&'a (String, String)> {
    files
        .iter()
        .filter(|(path, _)| path.replace('\\', "/").ends_with(suffix))
        .collect()
}

#[test]
fn audit_sees_the_workspace() {
    let files = production_source_files();
    assert!(!source_named(&files, "brainwin-core/src/token.rs").is_empty());
    assert!(!source_named(&files, "brainwin-gateway/src/gate.rs").is_empty());
}

#[test]
fn no_hardcoded_provider_secrets() {
    let secret_re = Regex::new(
        r"(sk_(live|test)_[A-Za-z0-9]{16,}|whsec_[A-Za-z0-9]{16,}|SG\.[A-Za-z0-9_\-]{16,}\.[A-Za-z0-9_\-]{16,})",
    )
    .unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if let Some(mat) = secret_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count().max(1);
            panic!(
                "Potential hardcoded credential found at {}:{}. \
                 Provider keys must come from the environment.",
                path, line_num
            );
        }
    }
}

#[test]
fn webhook_signatures_compare_in_constant_time() {
    let files = production_source_files();
    let hmac_files = source_named(&files, "brainwin-core/src/hmac.rs");
    assert!(!hmac_files.is_empty(), "hmac.rs not found");

    for (path, content) in hmac_files {
        let prod_content = production_lines(content);
        let func_start = prod_content
            .find("fn verify_hmac")
            .unwrap_or_else(|| panic!("{path} has no verify_hmac"));
        let func_body = &prod_content[func_start..];
        let func_end = func_body[1..]
            .find("\nfn ")
            .or_else(|| func_body[1..].find("\npub fn "))
            .unwrap_or(func_body.len() - 1)
            + 1;
        let func_text = &func_body[..func_end];

        assert!(
            func_text.contains("verify_slice"),
            "verify_hmac at {} must compare through Mac::verify_slice.",
            path
        );
        assert!(
            !func_text.contains("return false") && !func_text.contains("=="),
            "verify_hmac at {} has an early return or a plain comparison.",
            path
        );
    }
}

#[test]
fn http_clients_disable_redirects() {
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        for mat in builder_re.find_iter(&prod_content) {
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];

            assert!(
                redirect_re.is_match(builder_chain),
                "reqwest::Client::builder() at {} does not set redirect(Policy::none()). \
                 Outbound clients carry bearer tokens and provider keys.",
                path
            );
        }
    }
}

#[test]
fn constant_time_uses_subtle_crate() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        if prod_content.contains("fn constant_time_eq") {
            assert!(
                prod_content.contains("subtle::") || prod_content.contains("use subtle"),
                "File {} defines constant_time_eq without the subtle crate.",
                path
            );
        }
    }
}

#[test]
fn account_record_is_never_serializable() {
    let files = production_source_files();
    let account_files = source_named(&files, "brainwin-core/src/account.rs");
    assert!(!account_files.is_empty(), "account.rs not found");
    let derive_re = Regex::new(r"#\[derive\(([^)]*)\)\]\s*pub struct Account \{").unwrap();

    for (path, content) in account_files {
        let caps = derive_re
            .captures(content)
            .unwrap_or_else(|| panic!("{path}: Account derive list not found"));
        assert!(
            !caps[1].contains("Serialize"),
            "Account at {} derives Serialize; the password hash could leak. Use AccountView.",
            path
        );
    }
}

#[test]
fn password_hash_never_reaches_a_response() {
    for (path, content) in &production_source_files() {
        if !content.contains("HttpResponse::") {
            continue;
        }
        for (i, line) in production_lines(content).lines().enumerate() {
            assert!(
                !(line.contains("password_hash") && line.contains("json")),
                "password hash referenced in a JSON response at {}:{}",
                path,
                i + 1
            );
        }
    }
}

#[test]
fn ledger_claims_rely_on_the_primary_key() {
    let files = production_source_files();
    let ledger_files = source_named(&files, "brainwin-core/src/idempotency.rs");
    assert!(!ledger_files.is_empty(), "idempotency.rs not found");

    for (path, content) in ledger_files {
        let prod_content = production_lines(content);
        assert!(
            prod_content.contains("session_id TEXT PRIMARY KEY"),
            "processed_payments at {} must key on session_id",
            path
        );
        assert!(
            prod_content.contains("INSERT INTO processed_payments"),
            "try_claim at {} must claim with a plain INSERT",
            path
        );
        assert!(
            !prod_content.contains("INSERT OR REPLACE") && !prod_content.contains("INSERT OR IGNORE"),
            "ledger at {} must not silently overwrite or ignore a duplicate claim",
            path
        );
    }
}

#[test]
fn gateway_ledger_is_persistent() {
    let files = production_source_files();

    for (path, content) in source_named(&files, "brainwin-gateway/src/main.rs") {
        let prod_content = production_lines(content);
        assert!(
            prod_content.contains("SqliteIdempotencyStore")
                && !prod_content.contains("InMemoryIdempotencyStore"),
            "Gateway at {} must keep its payment ledger in SQLite so settlements survive restarts.",
            path
        );
    }
}

#[test]
fn signing_secrets_are_mandatory() {
    let files = production_source_files();

    for (path, content) in source_named(&files, "brainwin-gateway/src/config.rs") {
        let prod_content = production_lines(content);
        for forbidden in [
            "token_codec: Option<",
            "stripe_webhook_secret: Option<",
        ] {
            assert!(
                !prod_content.contains(forbidden),
                "{} declares `{}`; signing secrets must be required at startup.",
                path,
                forbidden
            );
        }
    }
}

#[test]
fn error_responses_do_not_leak_internals() {
    let dangerous_patterns = [
        "database error:",
        "upstream failure:",
        "stack trace",
        "RUST_BACKTRACE",
    ];

    for (path, content) in &production_source_files() {
        if !content.contains("HttpResponse::") {
            continue;
        }

        let prod_content = production_lines(content);

        for pattern in &dangerous_patterns {
            for (i, line) in prod_content.lines().enumerate() {
                if line.contains(pattern) && line.contains("json") {
                    panic!(
                        "Sensitive error detail '{}' found in HTTP response at {}:{}. \
                         Internal details are logged server-side only.",
                        pattern,
                        path,
                        i + 1
                    );
                }
            }
        }
    }
}

#[test]
fn requests_do_not_spawn_background_work() {
    let spawn_re = Regex::new(r"\b(tokio|actix_rt|actix_web::rt)::spawn\b|\bspawn_local\(").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if let Some(mat) = spawn_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count().max(1);
            panic!(
                "Background task spawned at {}:{}. Outbound work such as email \
                 is awaited inside the request under a timeout.",
                path, line_num
            );
        }
    }
}
