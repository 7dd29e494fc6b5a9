use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::GatewayError;

/// Placeholder replaced by the new account id in every string of a template.
pub const ACCOUNT_ID_PLACEHOLDER: &str = "{{USER_ID}}";

const PROFILE_TEMPLATE_FILE: &str = "profile.json";
const PLAN_TEMPLATE_FILE: &str = "user_plan.json";

/// Source of the default documents written for a new account.
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// Payload for the downstream profile service.
    async fn profile_template(&self, account_id: &str) -> Result<Value, GatewayError>;
    /// Local plan document (`{"user_id": .., "topics": {..}}`).
    async fn plan_template(&self, account_id: &str) -> Result<Value, GatewayError>;
}

/// Reads `profile.json` and `user_plan.json` from a directory, or falls back
/// to built-in templates when no directory is configured.
pub struct FileTemplateLoader {
    dir: Option<PathBuf>,
}

impl FileTemplateLoader {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    async fn load(
        &self,
        file: &str,
        builtin: fn() -> Value,
        account_id: &str,
    ) -> Result<Value, GatewayError> {
        let mut doc = match self.dir {
            Some(ref dir) => {
                let path = dir.join(file);
                let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    GatewayError::Upstream(format!("cannot read template {}: {e}", path.display()))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    GatewayError::Upstream(format!("template {} is not JSON: {e}", path.display()))
                })?
            }
            None => builtin(),
        };
        substitute(&mut doc, account_id);
        Ok(doc)
    }
}

fn builtin_profile() -> Value {
    json!({
        "user_id": ACCOUNT_ID_PLACEHOLDER,
        "nivel": "iniciante",
        "preferencias": {},
        "historico": []
    })
}

fn builtin_plan() -> Value {
    json!({
        "user_id": ACCOUNT_ID_PLACEHOLDER,
        "topics": {}
    })
}

fn substitute(value: &mut Value, account_id: &str) {
    match value {
        Value::String(s) if s.contains(ACCOUNT_ID_PLACEHOLDER) => {
            *s = s.replace(ACCOUNT_ID_PLACEHOLDER, account_id);
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute(v, account_id)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute(v, account_id)),
        _ => {}
    }
}

#[async_trait]
impl TemplateLoader for FileTemplateLoader {
    async fn profile_template(&self, account_id: &str) -> Result<Value, GatewayError> {
        self.load(PROFILE_TEMPLATE_FILE, builtin_profile, account_id)
            .await
    }

    async fn plan_template(&self, account_id: &str) -> Result<Value, GatewayError> {
        self.load(PLAN_TEMPLATE_FILE, builtin_plan, account_id).await
    }
}
