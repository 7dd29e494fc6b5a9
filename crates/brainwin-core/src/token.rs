use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::account::{Account, Role};
use crate::error::BrainwinError;

/// Bearer tokens are valid for six hours.
pub const TOKEN_TTL_SECS: i64 = 6 * 60 * 60;

/// HS256 keys shorter than 256 bits are refused at startup.
pub const MIN_SECRET_BYTES: usize = 32;

fn default_role() -> String {
    Role::User.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the account email.
    pub sub: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies compact HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenCodec {
    /// Build a codec from Base64-encoded secret material.
    ///
    /// Fails if the secret is absent, blank, not Base64, or shorter than
    /// [`MIN_SECRET_BYTES`] once decoded.
    pub fn from_base64(secret: Option<&str>) -> Result<Self, BrainwinError> {
        let secret = secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BrainwinError::Config("token secret is not set".to_string()))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| BrainwinError::Config(format!("token secret is not valid base64: {e}")))?;

        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(secret: &[u8]) -> Result<Self, BrainwinError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(BrainwinError::Config(format!(
                "token secret is {} bytes, at least {} required",
                secret.len(),
                MIN_SECRET_BYTES
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    pub fn issue(&self, account: &Account) -> Result<String, BrainwinError> {
        self.issue_at(
            &account.email,
            account.role.as_str(),
            chrono::Utc::now().timestamp(),
        )
    }

    /// Issue a token with an explicit issued-at instant (unix seconds).
    pub fn issue_at(
        &self,
        email: &str,
        role: &str,
        issued_at: i64,
    ) -> Result<String, BrainwinError> {
        let role = if role.trim().is_empty() {
            default_role()
        } else {
            role.to_string()
        };
        let claims = Claims {
            sub: email.to_string(),
            email: email.to_string(),
            role,
            iat: issued_at,
            exp: issued_at + TOKEN_TTL_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| BrainwinError::Config(format!("token signing failed: {e}")))
    }

    /// Verify signature, structure and expiry. No leeway on `exp`.
    pub fn verify(&self, token: &str) -> Result<Claims, BrainwinError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer token rejected");
                BrainwinError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn codec() -> TokenCodec {
        TokenCodec::from_bytes(SECRET).unwrap()
    }

    #[test]
    fn issued_token_verifies_with_email_and_role() {
        let mut account = Account::new("a1".into(), "ana@example.com", "h".into());
        account.role = Role::Admin;
        let token = codec().issue(&account).unwrap();
        let claims = codec().verify(&token).unwrap();
        assert_eq!(claims.sub, "ana@example.com");
        assert_eq!(claims.email, "ana@example.com");
        assert_eq!(claims.role, "ADMIN");
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn blank_role_defaults_to_user() {
        let now = chrono::Utc::now().timestamp();
        let token = codec().issue_at("a@b.co", "", now).unwrap();
        assert_eq!(codec().verify(&token).unwrap().role, "USER");
    }

    #[test]
    fn tampered_token_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let token = codec().issue_at("a@b.co", "USER", now).unwrap();
        let sig_start = token.rfind('.').unwrap() + 1;
        let first = token.as_bytes()[sig_start] as char;
        let mut tampered = token[..sig_start].to_string();
        tampered.push(if first == 'A' { 'B' } else { 'A' });
        tampered.push_str(&token[sig_start + 1..]);
        assert!(matches!(
            codec().verify(&tampered),
            Err(BrainwinError::InvalidToken)
        ));
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let other = TokenCodec::from_bytes(b"ffffffffffffffffffffffffffffffff").unwrap();
        let now = chrono::Utc::now().timestamp();
        let token = other.issue_at("a@b.co", "USER", now).unwrap();
        assert!(codec().verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let seven_hours_ago = chrono::Utc::now().timestamp() - 7 * 3600;
        let token = codec().issue_at("a@b.co", "USER", seven_hours_ago).unwrap();
        assert!(matches!(
            codec().verify(&token),
            Err(BrainwinError::InvalidToken)
        ));
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(codec().verify("not.a.jwt").is_err());
        assert!(codec().verify("").is_err());
    }

    #[test]
    fn secret_validation() {
        assert!(matches!(
            TokenCodec::from_base64(None),
            Err(BrainwinError::Config(_))
        ));
        assert!(TokenCodec::from_base64(Some("   ")).is_err());
        assert!(TokenCodec::from_base64(Some("***not base64***")).is_err());

        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 31]);
        assert!(TokenCodec::from_base64(Some(&short)).is_err());

        let ok = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert!(TokenCodec::from_base64(Some(&ok)).is_ok());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let out = format!("{:?}", codec());
        assert!(out.contains("REDACTED"));
        assert!(!out.contains("0123456789abcdef"));
    }
}
