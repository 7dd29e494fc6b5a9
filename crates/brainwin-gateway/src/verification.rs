//! One-time email codes for address verification and password reset.

use brainwin::account::normalize_email;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::time::Duration as StdDuration;

use crate::db::{AccountStore, Database};
use crate::email::{deliver, EmailMessage, EmailSender};
use crate::error::GatewayError;

/// Codes expire fifteen minutes after issue.
pub const CODE_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    EmailVerification,
    PasswordReset,
}

impl CodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeKind::EmailVerification => "EMAIL_VERIFICATION",
            CodeKind::PasswordReset => "PASSWORD_RESET",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationCode {
    pub id: i64,
    pub email: String,
    pub code: String,
    pub kind: CodeKind,
    /// Set for password-reset codes.
    pub account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Six random decimal digits, never starting with zero.
pub fn generate_code() -> String {
    rand::rngs::OsRng.gen_range(100_000..1_000_000).to_string()
}

fn required_email(email: &str) -> Result<String, GatewayError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(GatewayError::Validation("email is required".to_string()));
    }
    Ok(email)
}

pub struct VerificationService<'a> {
    pub db: &'a Database,
    pub mailer: &'a dyn EmailSender,
    /// Upper bound on one email delivery.
    pub timeout: StdDuration,
}

impl<'a> VerificationService<'a> {
    pub fn new(db: &'a Database, mailer: &'a dyn EmailSender, timeout: StdDuration) -> Self {
        Self {
            db,
            mailer,
            timeout,
        }
    }

    fn issue(
        &self,
        email: String,
        kind: CodeKind,
        account_id: Option<String>,
    ) -> Result<VerificationCode, GatewayError> {
        let now = Utc::now();
        let code = VerificationCode {
            id: 0,
            email,
            code: generate_code(),
            kind,
            account_id,
            created_at: now,
            expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
            used: false,
        };
        self.db.replace_verification_code(&code)?;
        Ok(code)
    }

    /// Send a code proving ownership of an address that is not yet registered.
    pub async fn send_email_verification(&self, email: &str) -> Result<(), GatewayError> {
        let email = required_email(email)?;
        if self.db.email_exists(&email)? {
            return Err(GatewayError::Conflict("email already registered".to_string()));
        }
        let code = self.issue(email, CodeKind::EmailVerification, None)?;
        deliver(
            self.mailer,
            &EmailMessage::verification_code(&code.email, &code.code),
            self.timeout,
        )
        .await;
        tracing::info!(email = %code.email, "email verification code issued");
        Ok(())
    }

    pub fn verify_email_code(&self, email: &str, code: &str) -> Result<(), GatewayError> {
        self.redeem(email, code, CodeKind::EmailVerification)
            .map(|_| ())
    }

    /// Send a password-reset code to an existing account.
    pub async fn send_password_reset(&self, email: &str) -> Result<(), GatewayError> {
        let email = required_email(email)?;
        let account = self
            .db
            .find_account_by_email(&email)?
            .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))?;
        let code = self.issue(email, CodeKind::PasswordReset, Some(account.id))?;
        deliver(
            self.mailer,
            &EmailMessage::password_reset_code(&code.email, &code.code),
            self.timeout,
        )
        .await;
        tracing::info!(email = %code.email, "password reset code issued");
        Ok(())
    }

    /// Redeem a password-reset code and return the account id it was issued for.
    pub fn redeem_password_reset(&self, email: &str, code: &str) -> Result<String, GatewayError> {
        self.redeem(email, code, CodeKind::PasswordReset)?
            .account_id
            .ok_or_else(|| GatewayError::Validation("invalid code".to_string()))
    }

    fn redeem(
        &self,
        email: &str,
        code: &str,
        kind: CodeKind,
    ) -> Result<VerificationCode, GatewayError> {
        let email = required_email(email)?;
        if code.trim().is_empty() {
            return Err(GatewayError::Validation("code is required".to_string()));
        }
        let record = self
            .db
            .find_verification_code(&email, code.trim(), kind)?
            .ok_or_else(|| GatewayError::Validation("invalid code".to_string()))?;
        if record.used {
            return Err(GatewayError::Validation("code already used".to_string()));
        }
        if Utc::now() > record.expires_at {
            return Err(GatewayError::Validation("code expired".to_string()));
        }
        if !self.db.mark_code_used(record.id)? {
            return Err(GatewayError::Validation("code already used".to_string()));
        }
        Ok(record)
    }
}
