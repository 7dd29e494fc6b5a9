//! Account provisioning saga.
//!
//! Registration spans the local account store, the downstream profile
//! service and the local plan copy. Each step is run in order; when one
//! fails, the compensations of the steps already completed run in reverse
//! so a failed registration leaves no account behind.

use brainwin::account::{is_valid_email, normalize_email, normalize_national_id};
use brainwin::password::hash_password;
use brainwin::{Account, Role, TokenCodec};
use chrono::NaiveDate;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::db::{AccountStore, PlanStore, UserPlan};
use crate::error::GatewayError;
use crate::metrics;
use crate::provisioner::ProfileProvisioner;
use crate::templates::TemplateLoader;

/// Registration payload shared by public sign-up and admin create.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Only honoured by admin create; public registration always gets USER.
    #[serde(default)]
    pub role: Option<String>,
}

/// Validate a registration, check uniqueness and build the account record
/// with a fresh id and hashed password.
pub fn prepare_account(
    accounts: &dyn AccountStore,
    new: &NewAccount,
    role: Role,
) -> Result<Account, GatewayError> {
    let email = normalize_email(&new.email);
    if !is_valid_email(&email) {
        return Err(GatewayError::Validation("invalid email".to_string()));
    }
    if new.password.trim().is_empty() {
        return Err(GatewayError::Validation("password is required".to_string()));
    }
    let national_id = new
        .national_id
        .as_deref()
        .map(normalize_national_id)
        .filter(|n| !n.is_empty());

    if accounts.email_exists(&email)? {
        return Err(GatewayError::Conflict("email already registered".to_string()));
    }
    if let Some(ref nid) = national_id {
        if accounts.national_id_exists(nid)? {
            return Err(GatewayError::Conflict(
                "national id already registered".to_string(),
            ));
        }
    }

    let mut account = Account::new(
        uuid::Uuid::new_v4().to_string(),
        &email,
        hash_password(&new.password)?,
    );
    account.role = role;
    account.first_name = new.first_name.clone();
    account.last_name = new.last_name.clone();
    account.national_id = national_id;
    account.phone = new.phone.clone();
    account.birth_date = new.birth_date;
    Ok(account)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    CreateAccount,
    MintToken,
    ProvisionProfile,
    CopyPlan,
}

impl SagaStep {
    pub const ORDER: [SagaStep; 4] = [
        SagaStep::CreateAccount,
        SagaStep::MintToken,
        SagaStep::ProvisionProfile,
        SagaStep::CopyPlan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::CreateAccount => "create_account",
            SagaStep::MintToken => "mint_token",
            SagaStep::ProvisionProfile => "provision_profile",
            SagaStep::CopyPlan => "copy_plan",
        }
    }
}

struct SagaRun {
    account: Account,
    token: Option<String>,
    completed: Vec<SagaStep>,
}

pub struct ProvisioningSaga<'a> {
    pub accounts: &'a dyn AccountStore,
    pub plans: &'a dyn PlanStore,
    pub codec: &'a TokenCodec,
    pub provisioner: &'a dyn ProfileProvisioner,
    pub templates: &'a dyn TemplateLoader,
    pub timeout: Duration,
}

impl ProvisioningSaga<'_> {
    /// Register a new USER account and return its bearer token.
    pub async fn register(&self, new: &NewAccount) -> Result<String, GatewayError> {
        let account = match prepare_account(self.accounts, new, Role::User) {
            Ok(a) => a,
            Err(e) => {
                metrics::REGISTRATIONS.with_label_values(&["rejected"]).inc();
                return Err(e);
            }
        };

        let mut run = SagaRun {
            account,
            token: None,
            completed: Vec::with_capacity(SagaStep::ORDER.len()),
        };

        for step in SagaStep::ORDER {
            if let Err(e) = self.execute(step, &mut run).await {
                tracing::warn!(
                    account_id = %run.account.id,
                    step = step.as_str(),
                    error = %e,
                    "registration step failed, compensating"
                );
                self.compensate(&run);
                metrics::REGISTRATIONS.with_label_values(&["failed"]).inc();
                return Err(e);
            }
            run.completed.push(step);
        }

        metrics::REGISTRATIONS.with_label_values(&["created"]).inc();
        tracing::info!(account_id = %run.account.id, email = %run.account.email, "account registered");
        run.token
            .ok_or_else(|| GatewayError::Internal("saga finished without a token".to_string()))
    }

    async fn execute(&self, step: SagaStep, run: &mut SagaRun) -> Result<(), GatewayError> {
        match step {
            SagaStep::CreateAccount => self.accounts.insert_account(&run.account),
            SagaStep::MintToken => {
                run.token = Some(self.codec.issue(&run.account)?);
                Ok(())
            }
            SagaStep::ProvisionProfile => {
                let token = run
                    .token
                    .as_deref()
                    .ok_or_else(|| GatewayError::Internal("token not minted".to_string()))?;
                let payload = self
                    .bounded("profile template", self.templates.profile_template(&run.account.id))
                    .await?;
                self.bounded(
                    "profile service",
                    self.provisioner
                        .create_profile(&format!("Bearer {token}"), &payload),
                )
                .await
            }
            SagaStep::CopyPlan => self.copy_plan(&run.account.id).await.map_err(as_upstream),
        }
    }

    async fn copy_plan(&self, account_id: &str) -> Result<(), GatewayError> {
        if self.plans.find_plan(account_id)?.is_some() {
            return Ok(());
        }
        let template = self
            .bounded("plan template", self.templates.plan_template(account_id))
            .await?;
        let topics = template
            .get("topics")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        self.plans.insert_plan(&UserPlan {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: account_id.to_string(),
            topics,
        })
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| GatewayError::Upstream(format!("{what} timed out")))?
    }

    fn compensate(&self, run: &SagaRun) {
        for step in run.completed.iter().rev() {
            match step {
                SagaStep::CreateAccount => {
                    if let Err(e) = self.accounts.delete_account(&run.account.id) {
                        tracing::error!(
                            account_id = %run.account.id,
                            error = %e,
                            "failed to roll back account"
                        );
                    }
                }
                // nothing persisted locally
                SagaStep::MintToken | SagaStep::ProvisionProfile | SagaStep::CopyPlan => continue,
            }
            metrics::SAGA_COMPENSATIONS
                .with_label_values(&[step.as_str()])
                .inc();
        }
    }
}

fn as_upstream(e: GatewayError) -> GatewayError {
    match e {
        GatewayError::Upstream(_) => e,
        other => GatewayError::Upstream(format!("plan copy failed: {other}")),
    }
}
