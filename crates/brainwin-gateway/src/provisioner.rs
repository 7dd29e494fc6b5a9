use async_trait::async_trait;
use std::time::Duration;

use crate::error::GatewayError;

const PROFILES_PATH: &str = "/perfis";

/// Creates the downstream profile that belongs to a new account.
#[async_trait]
pub trait ProfileProvisioner: Send + Sync {
    /// `bearer` is the full `Authorization` value (`Bearer <token>`).
    async fn create_profile(
        &self,
        bearer: &str,
        payload: &serde_json::Value,
    ) -> Result<(), GatewayError>;
}

/// Profile service reached over HTTP.
pub struct HttpProfileProvisioner {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpProfileProvisioner {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ProfileProvisioner for HttpProfileProvisioner {
    async fn create_profile(
        &self,
        bearer: &str,
        payload: &serde_json::Value,
    ) -> Result<(), GatewayError> {
        let url = format!("{}{}", self.base_url, PROFILES_PATH);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", bearer)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("profile service unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!(
                "profile service returned {status}"
            )));
        }
        tracing::debug!(url = %url, status = %status, "profile provisioned");
        Ok(())
    }
}
