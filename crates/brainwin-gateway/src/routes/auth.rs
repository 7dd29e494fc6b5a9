use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::{web, HttpResponse};
use brainwin::account::normalize_email;
use brainwin::password::{hash_password, verify_account_password};
use brainwin::token::TOKEN_TTL_SECS;
use brainwin::Account;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::AccountStore;
use crate::error::GatewayError;
use crate::gate::AUTH_COOKIE;
use crate::saga::NewAccount;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "invalid credentials";

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

fn auth_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(AUTH_COOKIE, token.to_string())
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(TOKEN_TTL_SECS))
        .secure(secure)
        .finish()
}

fn token_response(state: &AppState, token: String) -> HttpResponse {
    HttpResponse::Ok()
        .cookie(auth_cookie(&token, state.config.cookie_secure))
        .json(TokenResponse {
            token,
            kind: "Bearer",
        })
}

fn issue_login(state: &AppState, account: &Account) -> Result<HttpResponse, GatewayError> {
    let token = state.config.token_codec.issue(account)?;
    if let Err(e) = state.db.record_login(&account.id, Utc::now().date_naive()) {
        tracing::warn!(account_id = %account.id, error = %e, "failed to record login date");
    }
    Ok(token_response(state, token))
}

/// POST /auth/register
pub async fn register(
    body: web::Json<NewAccount>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let token = state.provisioning_saga().register(&body).await?;
    Ok(token_response(&state, token))
}

/// POST /auth/login
pub async fn login(
    body: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let email = normalize_email(&body.email);
    let found = state.db.find_account_by_email(&email)?;
    let verified = verify_account_password(
        &body.password,
        found.as_ref().map(|a| a.password_hash.as_str()),
    );
    let account = found
        .filter(|_| verified)
        .ok_or_else(|| GatewayError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;
    tracing::info!(account_id = %account.id, "login succeeded");
    issue_login(&state, &account)
}

/// POST /auth/logout
pub async fn logout(state: web::Data<AppState>) -> HttpResponse {
    let cleared = Cookie::build(AUTH_COOKIE, "")
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::ZERO)
        .secure(state.config.cookie_secure)
        .finish();
    HttpResponse::Ok()
        .cookie(cleared)
        .json(serde_json::json!({ "message": "logged out" }))
}

/// POST /auth/send-verification-code
pub async fn send_verification_code(
    body: web::Json<EmailRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    state
        .verification()
        .send_email_verification(&body.email)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "verification code sent" })))
}

/// POST /auth/verify-email-code
pub async fn verify_email_code(
    body: web::Json<CodeRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    state
        .verification()
        .verify_email_code(&body.email, &body.code)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "valid": true })))
}

/// POST /auth/forgot-password
pub async fn forgot_password(
    body: web::Json<EmailRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    state
        .verification()
        .send_password_reset(&body.email)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "password reset code sent" })))
}

/// POST /auth/reset-password
pub async fn reset_password(
    body: web::Json<ResetPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    // checked before redeeming so a bad request does not burn the code
    if body.new_password.trim().is_empty() {
        return Err(GatewayError::Validation(
            "new password is required".to_string(),
        ));
    }
    let account_id = state
        .verification()
        .redeem_password_reset(&body.email, &body.code)?;

    let hash = hash_password(&body.new_password)?;
    if !state.db.set_password_hash(&account_id, &hash)? {
        return Err(GatewayError::NotFound("account not found".to_string()));
    }
    let account = state
        .db
        .find_account(&account_id)?
        .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))?;
    tracing::info!(account_id = %account.id, "password reset");
    issue_login(&state, &account)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route(
                "/send-verification-code",
                web::post().to(send_verification_code),
            )
            .route("/verify-email-code", web::post().to(verify_email_code))
            .route("/forgot-password", web::post().to(forgot_password))
            .route("/reset-password", web::post().to(reset_password)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_cookie_attributes() {
        let c = auth_cookie("tok", true);
        assert_eq!(c.name(), "jwt");
        assert_eq!(c.value(), "tok");
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        assert_eq!(c.same_site(), Some(SameSite::Lax));
        assert_eq!(c.path(), Some("/"));
        assert_eq!(c.max_age(), Some(time::Duration::hours(6)));
    }

    #[test]
    fn token_response_shape() {
        let json = serde_json::to_value(TokenResponse {
            token: "abc".into(),
            kind: "Bearer",
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"token": "abc", "type": "Bearer"}));
    }
}
