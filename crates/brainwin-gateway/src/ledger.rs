//! Payment ledger: checkout creation, webhook intake and exactly-once
//! settlement of paid checkout sessions.

use brainwin::account::{is_valid_email, normalize_email, PREMIUM_UPGRADE_COST};
use brainwin::{Account, Catalog, IdempotencyStore, LedgerRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use crate::db::AccountStore;
use crate::error::GatewayError;
use crate::metrics;
use crate::provider::{
    success_url_with_session, CheckoutRequest, PaymentProvider, METADATA_ACCOUNT_ID,
    METADATA_PRODUCT_ID,
};

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutCreated {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied {
        account_id: String,
        product_id: String,
    },
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Settled(SettleOutcome),
    /// Verified event of a type the ledger does not act on.
    Ignored(String),
}

/// One applied session with its catalog details.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub session_id: String,
    pub product_id: String,
    pub product_name: Option<String>,
    pub price_in_cents: Option<i64>,
    pub currency: Option<String>,
    pub wins: i64,
    pub is_subscription: bool,
    pub processed_at: DateTime<Utc>,
}

pub struct PaymentLedger<'a> {
    pub accounts: &'a dyn AccountStore,
    pub store: &'a dyn IdempotencyStore,
    pub catalog: &'a Catalog,
    pub provider: &'a dyn PaymentProvider,
    pub webhook_secret: &'a [u8],
    pub timeout: Duration,
}

impl PaymentLedger<'_> {
    pub async fn create_checkout_session(
        &self,
        product_id: &str,
        email: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutCreated, GatewayError> {
        let product = self.catalog.get(product_id)?;
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(GatewayError::Validation("invalid email".to_string()));
        }
        if success_url.trim().is_empty() || cancel_url.trim().is_empty() {
            return Err(GatewayError::Validation(
                "successUrl and cancelUrl are required".to_string(),
            ));
        }
        let account = self
            .accounts
            .find_account_by_email(&email)?
            .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))?;

        let request = CheckoutRequest {
            product,
            customer_email: &account.email,
            account_id: &account.id,
            success_url: success_url_with_session(success_url),
            cancel_url,
        };
        let session = self
            .bounded(self.provider.create_session(&request))
            .await?;

        tracing::info!(
            session_id = %session.id,
            account_id = %account.id,
            product_id = %product.id,
            "checkout session created"
        );
        Ok(CheckoutCreated {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Verify and dispatch a provider webhook. Nothing is parsed before the
    /// signature has been checked.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, GatewayError> {
        let header = signature
            .ok_or_else(|| GatewayError::Signature("missing signature header".to_string()))?;
        let event = self
            .provider
            .verify_webhook_signature(payload, header, self.webhook_secret)?;

        if event.kind != CHECKOUT_COMPLETED {
            metrics::WEBHOOK_EVENTS.with_label_values(&["ignored"]).inc();
            tracing::info!(event_type = %event.kind, "webhook event acknowledged");
            return Ok(WebhookOutcome::Ignored(event.kind));
        }
        metrics::WEBHOOK_EVENTS
            .with_label_values(&[CHECKOUT_COMPLETED])
            .inc();

        let session_id = event
            .object_id()
            .ok_or_else(|| GatewayError::Validation("webhook event has no session id".to_string()))?;
        self.settle(&session_id).await.map(WebhookOutcome::Settled)
    }

    /// Apply the effect of a paid session at most once.
    pub async fn settle(&self, session_id: &str) -> Result<SettleOutcome, GatewayError> {
        let result = self.settle_inner(session_id).await;
        let label = match result {
            Ok(SettleOutcome::Applied { .. }) => "applied",
            Ok(SettleOutcome::AlreadyApplied) => "already_applied",
            Err(_) => "failed",
        };
        metrics::SETTLEMENTS.with_label_values(&[label]).inc();
        result
    }

    async fn settle_inner(&self, session_id: &str) -> Result<SettleOutcome, GatewayError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(GatewayError::Validation("session_id is required".to_string()));
        }
        if self.store.exists(session_id)? {
            tracing::info!(session_id, "session already applied");
            return Ok(SettleOutcome::AlreadyApplied);
        }

        let session = self
            .bounded(self.provider.retrieve_session(session_id))
            .await?;
        if !session.is_paid() {
            return Err(GatewayError::Validation(format!(
                "session {session_id} is not paid"
            )));
        }
        let metadata = |key: &str| {
            session
                .metadata
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| {
                    GatewayError::Validation(format!("session metadata is missing {key}"))
                })
        };
        let account_id = metadata(METADATA_ACCOUNT_ID)?;
        let product_id = metadata(METADATA_PRODUCT_ID)?;

        let account = self
            .accounts
            .find_account(&account_id)?
            .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))?;
        let product = self.catalog.get(&product_id)?;

        if !self
            .store
            .try_claim(LedgerRecord::new(session_id, &account.id, &product.id))?
        {
            tracing::info!(session_id, "lost settlement race, session already applied");
            return Ok(SettleOutcome::AlreadyApplied);
        }

        let applied = if product.is_subscription() {
            self.accounts.grant_premium(&account.id)
        } else {
            self.accounts.credit_wins(&account.id, product.wins_granted())
        };
        if let Err(e) = applied {
            self.store.release(session_id);
            tracing::error!(session_id, error = %e, "settlement not persisted, claim released");
            return Err(e);
        }

        tracing::info!(
            session_id,
            account_id = %account.id,
            product_id = %product.id,
            "session settled"
        );
        Ok(SettleOutcome::Applied {
            account_id: account.id,
            product_id: product.id.clone(),
        })
    }

    /// Spend wins on premium. Does not touch the payment ledger.
    pub fn upgrade_to_premium(&self, email: &str) -> Result<Account, GatewayError> {
        let email = normalize_email(email);
        let mut account = self
            .accounts
            .find_account_by_email(&email)?
            .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))?;

        account.upgrade_with_wins()?;
        if !self
            .accounts
            .spend_wins_for_premium(&account.id, PREMIUM_UPGRADE_COST)?
        {
            return Err(GatewayError::Conflict(
                "account changed during upgrade, retry".to_string(),
            ));
        }
        tracing::info!(account_id = %account.id, wins_left = account.wins, "premium upgraded with wins");
        Ok(account)
    }

    /// Applied sessions for the account, newest first.
    pub fn history(&self, email: &str) -> Result<Vec<HistoryEntry>, GatewayError> {
        let account = self
            .accounts
            .find_account_by_email(&normalize_email(email))?
            .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))?;

        let records = self.store.list_for_account(&account.id)?;
        Ok(records
            .into_iter()
            .map(|r| {
                let product = self.catalog.get(&r.product_id).ok();
                HistoryEntry {
                    product_name: product.map(|p| p.name.clone()),
                    price_in_cents: product.map(|p| p.price_cents),
                    currency: product.map(|p| p.currency.clone()),
                    wins: product.map(|p| p.wins_granted()).unwrap_or(0),
                    is_subscription: product.is_some_and(|p| p.is_subscription()),
                    session_id: r.session_id,
                    product_id: r.product_id,
                    processed_at: r.applied_at,
                }
            })
            .collect())
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| GatewayError::Upstream("payment provider timed out".to_string()))?
    }
}
