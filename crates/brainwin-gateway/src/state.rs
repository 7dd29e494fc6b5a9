use brainwin::{Catalog, IdempotencyStore};
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::db::Database;
use crate::email::{DisabledSender, EmailSender, SendGridSender};
use crate::error::GatewayError;
use crate::ledger::PaymentLedger;
use crate::provider::{PaymentProvider, StripeClient};
use crate::provisioner::{HttpProfileProvisioner, ProfileProvisioner};
use crate::saga::ProvisioningSaga;
use crate::templates::{FileTemplateLoader, TemplateLoader};
use crate::verification::VerificationService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub db: Arc<Database>,
    /// Applied payment sessions
    pub ledger_store: Arc<dyn IdempotencyStore>,
    pub catalog: Arc<Catalog>,
    pub provisioner: Arc<dyn ProfileProvisioner>,
    pub templates: Arc<dyn TemplateLoader>,
    pub payments: Arc<dyn PaymentProvider>,
    pub mailer: Arc<dyn EmailSender>,
}

impl AppState {
    /// Wire the production collaborators from configuration.
    pub fn new(
        config: GatewayConfig,
        db: Database,
        ledger_store: Arc<dyn IdempotencyStore>,
    ) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none()) // Prevent SSRF via redirects
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {e}")))?;

        let timeout = config.upstream_timeout;
        let provisioner = Arc::new(HttpProfileProvisioner::new(
            http_client.clone(),
            &config.profile_api_base,
            timeout,
        ));
        let payments = Arc::new(StripeClient::new(
            http_client.clone(),
            &config.stripe_api_base,
            &config.stripe_secret_key,
            timeout,
        ));
        let mailer: Arc<dyn EmailSender> = match config.sendgrid_api_key {
            Some(ref key) => Arc::new(SendGridSender::new(
                http_client,
                &config.sendgrid_api_base,
                key,
                &config.sendgrid_from_email,
                &config.sendgrid_from_name,
                timeout,
            )),
            None => Arc::new(DisabledSender),
        };
        let templates = Arc::new(FileTemplateLoader::new(config.template_dir.clone()));

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            ledger_store,
            catalog: Arc::new(Catalog::standard()),
            provisioner,
            templates,
            payments,
            mailer,
        })
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn ProfileProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentProvider>) -> Self {
        self.payments = payments;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn EmailSender>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn provisioning_saga(&self) -> ProvisioningSaga<'_> {
        ProvisioningSaga {
            accounts: self.db.as_ref(),
            plans: self.db.as_ref(),
            codec: &self.config.token_codec,
            provisioner: self.provisioner.as_ref(),
            templates: self.templates.as_ref(),
            timeout: self.config.upstream_timeout,
        }
    }

    pub fn payment_ledger(&self) -> PaymentLedger<'_> {
        PaymentLedger {
            accounts: self.db.as_ref(),
            store: self.ledger_store.as_ref(),
            catalog: &self.catalog,
            provider: self.payments.as_ref(),
            webhook_secret: &self.config.stripe_webhook_secret,
            timeout: self.config.upstream_timeout,
        }
    }

    pub fn verification(&self) -> VerificationService<'_> {
        VerificationService::new(
            &self.db,
            self.mailer.as_ref(),
            self.config.upstream_timeout,
        )
    }
}
