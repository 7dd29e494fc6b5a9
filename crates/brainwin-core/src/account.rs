use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BrainwinError;

/// Wins credited to every freshly registered account.
pub const SIGNUP_BONUS_WINS: i64 = 5;

/// Wins debited by a wins-funded premium upgrade.
pub const PREMIUM_UPGRADE_COST: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    /// Case-insensitive admin check on a raw role string taken from claims.
    pub fn is_admin_str(role: &str) -> bool {
        role.eq_ignore_ascii_case(Role::Admin.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = BrainwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            other => Err(BrainwinError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// Stored account record.
///
/// Deliberately not `Serialize`: the password hash must never leave the
/// process. Use [`AccountView`] for anything outbound.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub wins: i64,
    pub streak: i64,
    pub xp: i64,
    pub premium: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub extended_time: bool,
    pub selected_practice: Option<String>,
    pub last_login_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A new account with signup defaults and the given credentials.
    pub fn new(id: String, email: &str, password_hash: String) -> Self {
        Self {
            id,
            email: normalize_email(email),
            password_hash,
            role: Role::User,
            wins: SIGNUP_BONUS_WINS,
            streak: 0,
            xp: 0,
            premium: false,
            first_name: None,
            last_name: None,
            national_id: None,
            phone: None,
            birth_date: None,
            extended_time: false,
            selected_practice: None,
            last_login_date: None,
            created_at: Utc::now(),
        }
    }

    /// Spend wins on premium access.
    pub fn upgrade_with_wins(&mut self) -> Result<(), BrainwinError> {
        if self.premium {
            return Err(BrainwinError::Validation(
                "account is already premium".to_string(),
            ));
        }
        if self.wins < PREMIUM_UPGRADE_COST {
            return Err(BrainwinError::Validation(format!(
                "insufficient wins: {} required, {} available",
                PREMIUM_UPGRADE_COST, self.wins
            )));
        }
        self.wins -= PREMIUM_UPGRADE_COST;
        self.premium = true;
        Ok(())
    }

    pub fn view(&self) -> AccountView {
        AccountView::from(self)
    }
}

/// Outbound representation of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub wins: i64,
    pub streak: i64,
    pub xp: i64,
    pub premium: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub extended_time: bool,
    pub selected_practice: Option<String>,
    pub last_login_date: Option<NaiveDate>,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id.clone(),
            email: a.email.clone(),
            role: a.role,
            wins: a.wins,
            streak: a.streak,
            xp: a.xp,
            premium: a.premium,
            first_name: a.first_name.clone(),
            last_name: a.last_name.clone(),
            national_id: a.national_id.clone(),
            phone: a.phone.clone(),
            birth_date: a.birth_date,
            extended_time: a.extended_time,
            selected_practice: a.selected_practice.clone(),
            last_login_date: a.last_login_date,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Keep only ASCII digits of a national id (CPF), so "123.456.789-09"
/// and "12345678909" collide.
pub fn normalize_national_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Syntactic `local@domain.tld` check.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(wins: i64, premium: bool) -> Account {
        let mut a = Account::new("id-1".into(), "Ana@Example.com", "hash".into());
        a.wins = wins;
        a.premium = premium;
        a
    }

    #[test]
    fn new_account_has_signup_defaults() {
        let a = Account::new("id".into(), "  Ana@Example.COM ", "h".into());
        assert_eq!(a.email, "ana@example.com");
        assert_eq!(a.wins, 5);
        assert_eq!(a.streak, 0);
        assert_eq!(a.xp, 0);
        assert_eq!(a.role, Role::User);
        assert!(!a.premium);
    }

    #[test]
    fn upgrade_with_150_wins_leaves_50() {
        let mut a = account(150, false);
        a.upgrade_with_wins().unwrap();
        assert_eq!(a.wins, 50);
        assert!(a.premium);
    }

    #[test]
    fn upgrade_with_99_wins_fails_and_reports_balance() {
        let mut a = account(99, false);
        let err = a.upgrade_with_wins().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("99"));
        assert_eq!(a.wins, 99);
        assert!(!a.premium);
    }

    #[test]
    fn upgrade_when_already_premium_fails() {
        let mut a = account(500, true);
        assert!(matches!(
            a.upgrade_with_wins(),
            Err(BrainwinError::Validation(_))
        ));
        assert_eq!(a.wins, 500);
    }

    #[test]
    fn view_never_carries_password_hash() {
        let a = account(0, false);
        let json = serde_json::to_string(&a.view()).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("password"));
    }

    #[test]
    fn national_id_keeps_digits_only() {
        assert_eq!(normalize_national_id("123.456.789-09"), "12345678909");
        assert_eq!(normalize_national_id(" 12345678909 "), "12345678909");
    }

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@sub.example.com"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a@b..com"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" User ".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert!(Role::is_admin_str("Admin"));
        assert!(!Role::is_admin_str("USER"));
    }
}
