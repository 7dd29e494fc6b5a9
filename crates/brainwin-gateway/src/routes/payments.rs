use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::gate::AuthIdentity;
use crate::ledger::{SettleOutcome, WebhookOutcome};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub product_id: String,
    /// Defaults to the caller's email.
    #[serde(default)]
    pub email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub session_id: Option<String>,
}

fn settle_body(session_id: &str, outcome: &SettleOutcome) -> serde_json::Value {
    match outcome {
        SettleOutcome::Applied {
            account_id,
            product_id,
        } => serde_json::json!({
            "status": "applied",
            "sessionId": session_id,
            "userId": account_id,
            "productId": product_id,
        }),
        SettleOutcome::AlreadyApplied => serde_json::json!({
            "status": "already_applied",
            "sessionId": session_id,
        }),
    }
}

/// POST /payments/create-checkout-session
pub async fn create_checkout_session(
    identity: AuthIdentity,
    body: web::Json<CheckoutBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let email = body.email.as_deref().unwrap_or(&identity.email);
    let created = state
        .payment_ledger()
        .create_checkout_session(&body.product_id, email, &body.success_url, &body.cancel_url)
        .await?;
    Ok(HttpResponse::Ok().json(created))
}

/// GET /payments/success?session_id=
pub async fn success(
    query: web::Query<SuccessQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let session_id = query
        .session_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| GatewayError::Validation("session_id is required".to_string()))?;
    let outcome = state.payment_ledger().settle(session_id).await?;
    Ok(HttpResponse::Ok().json(settle_body(session_id, &outcome)))
}

/// POST /payments/webhook - raw body, verified before parsing
pub async fn webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome = state
        .payment_ledger()
        .handle_webhook(&body, signature)
        .await?;
    let handled = match outcome {
        WebhookOutcome::Settled(_) => "settled",
        WebhookOutcome::Ignored(_) => "ignored",
    };
    Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true, "result": handled })))
}

/// GET /payments/history
pub async fn history(
    identity: AuthIdentity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let entries = state.payment_ledger().history(&identity.email)?;
    Ok(HttpResponse::Ok().json(entries))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/payments")
            .route(
                "/create-checkout-session",
                web::post().to(create_checkout_session),
            )
            .route("/success", web::get().to(success))
            .route("/webhook", web::post().to(webhook))
            .route("/history", web::get().to(history)),
    );
}
