//! One-time creation of the first administrator.
//!
//! Public registration always produces USER accounts and admin create needs
//! an admin token, so the first admin comes from `BOOTSTRAP_ADMIN_EMAIL` /
//! `BOOTSTRAP_ADMIN_PASSWORD` at startup. Once any admin exists the
//! variables are ignored.

use brainwin::Role;

use crate::config::BootstrapAdmin;
use crate::db::AccountStore;
use crate::error::GatewayError;
use crate::saga::{prepare_account, NewAccount};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    NotConfigured,
    AdminExists,
    Created { account_id: String },
}

pub fn ensure_admin(
    accounts: &dyn AccountStore,
    admin: Option<&BootstrapAdmin>,
) -> Result<BootstrapOutcome, GatewayError> {
    let Some(admin) = admin else {
        return Ok(BootstrapOutcome::NotConfigured);
    };
    if accounts.admin_exists()? {
        tracing::warn!("an admin account already exists, ignoring BOOTSTRAP_ADMIN_* variables");
        return Ok(BootstrapOutcome::AdminExists);
    }

    let account = prepare_account(
        accounts,
        &NewAccount {
            email: admin.email.clone(),
            password: admin.password.clone(),
            ..Default::default()
        },
        Role::Admin,
    )?;
    accounts.insert_account(&account)?;
    tracing::info!(account_id = %account.id, email = %account.email, "bootstrap admin created");
    Ok(BootstrapOutcome::Created {
        account_id: account.id,
    })
}
