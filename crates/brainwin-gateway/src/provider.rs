//! Payment-provider client (Stripe Checkout).

use async_trait::async_trait;
use brainwin::{BillingMode, Product};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::GatewayError;

pub const METADATA_ACCOUNT_ID: &str = "userId";
pub const METADATA_PRODUCT_ID: &str = "productId";

/// Template the provider expands into the real session id on redirect.
pub const SESSION_ID_TEMPLATE: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub product: &'a Product,
    pub customer_email: &'a str,
    pub account_id: &'a str,
    pub success_url: String,
    pub cancel_url: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

impl CheckoutSession {
    /// `false` only when the provider reports the session as unpaid.
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            None | Some("paid") | Some("no_payment_required")
        )
    }
}

/// Verified webhook event. Only the fields the ledger acts on are kept.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<WebhookData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookObject {
    pub id: String,
}

impl WebhookEvent {
    /// Id of the object the event is about, if present.
    pub fn object_id(self) -> Option<String> {
        self.data.map(|d| d.object.id).filter(|id| !id.is_empty())
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_session(
        &self,
        request: &CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, GatewayError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, GatewayError>;

    /// Authenticate a webhook delivery, then parse it. The payload is not
    /// parsed until the `t=..,v1=..` signature has been checked.
    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        header: &str,
        secret: &[u8],
    ) -> Result<WebhookEvent, GatewayError> {
        brainwin::hmac::verify_webhook_signature(payload, header, secret, Utc::now().timestamp())?;
        serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Validation(format!("malformed webhook event: {e}")))
    }
}

/// Append `session_id={CHECKOUT_SESSION_ID}` to a success URL.
pub fn success_url_with_session(success_url: &str) -> String {
    let sep = if success_url.contains('?') { '&' } else { '?' };
    format!("{success_url}{sep}session_id={SESSION_ID_TEMPLATE}")
}

/// Form fields for `POST /v1/checkout/sessions`.
pub fn checkout_form(request: &CheckoutRequest<'_>) -> Vec<(String, String)> {
    let p = request.product;
    let mut form = vec![
        (
            "mode".to_string(),
            match p.mode {
                BillingMode::OneTime => "payment",
                BillingMode::Subscription { .. } => "subscription",
            }
            .to_string(),
        ),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.to_string()),
        (
            "customer_email".to_string(),
            request.customer_email.to_string(),
        ),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            p.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            p.price_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            p.name.clone(),
        ),
        (
            format!("metadata[{METADATA_ACCOUNT_ID}]"),
            request.account_id.to_string(),
        ),
        (format!("metadata[{METADATA_PRODUCT_ID}]"), p.id.clone()),
    ];
    if let BillingMode::Subscription { interval } = p.mode {
        form.push((
            "line_items[0][price_data][recurring][interval]".to_string(),
            interval.to_string(),
        ));
    }
    form
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    timeout: Duration,
}

impl StripeClient {
    pub fn new(client: reqwest::Client, api_base: &str, secret_key: &str, timeout: Duration) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            timeout,
        }
    }

    async fn parse(resp: reqwest::Response) -> Result<CheckoutSession, GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_default();
            return Err(GatewayError::Upstream(format!(
                "payment provider returned {status}: {detail}"
            )));
        }
        resp.json::<CheckoutSession>()
            .await
            .map_err(|e| GatewayError::Upstream(format!("payment provider response parse failed: {e}")))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_session(
        &self,
        request: &CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .timeout(self.timeout)
            .form(&checkout_form(request))
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("payment provider unreachable: {e}")))?;
        Self::parse(resp).await
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, GatewayError> {
        let resp = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.api_base,
                urlencoding::encode(session_id)
            ))
            .bearer_auth(&self.secret_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("payment provider unreachable: {e}")))?;
        Self::parse(resp).await
    }
}
