use brainwin::{Account, Role};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::GatewayError;
use crate::verification::{CodeKind, VerificationCode};

/// Local copy of a user's study plan, seeded from a template at registration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserPlan {
    pub id: String,
    pub user_id: String,
    pub topics: serde_json::Value,
}

/// Column-level edits to one account. `None` leaves the stored value alone,
/// so balances moved by settlements are never overwritten with a stale read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub wins: Option<i64>,
    pub streak: Option<i64>,
    pub xp: Option<i64>,
    pub premium: Option<bool>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `Some(None)` clears the stored national id.
    pub national_id: Option<Option<String>>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub extended_time: Option<bool>,
    pub selected_practice: Option<String>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        let text = |v: &String| Value::Text(v.clone());
        let flag = |v: &bool| Value::Integer(*v as i64);
        let mut cols = Vec::new();
        let mut push = |name: &'static str, value: Option<Value>| {
            if let Some(value) = value {
                cols.push((name, value));
            }
        };
        push("email", self.email.as_ref().map(text));
        push("password_hash", self.password_hash.as_ref().map(text));
        push("role", self.role.map(|r| Value::Text(r.as_str().to_string())));
        push("wins", self.wins.map(Value::Integer));
        push("streak", self.streak.map(Value::Integer));
        push("xp", self.xp.map(Value::Integer));
        push("premium", self.premium.as_ref().map(flag));
        push("first_name", self.first_name.as_ref().map(text));
        push("last_name", self.last_name.as_ref().map(text));
        push(
            "national_id",
            self.national_id
                .as_ref()
                .map(|v| v.as_ref().map(text).unwrap_or(Value::Null)),
        );
        push("phone", self.phone.as_ref().map(text));
        push(
            "birth_date",
            self.birth_date.map(|d| Value::Text(d.to_string())),
        );
        push("extended_time", self.extended_time.as_ref().map(flag));
        push("selected_practice", self.selected_practice.as_ref().map(text));
        cols
    }
}

/// Account persistence used by the saga, the ledger and the user routes.
pub trait AccountStore: Send + Sync {
    fn insert_account(&self, account: &Account) -> Result<(), GatewayError>;
    fn find_account(&self, id: &str) -> Result<Option<Account>, GatewayError>;
    fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, GatewayError>;
    fn email_exists(&self, email: &str) -> Result<bool, GatewayError>;
    fn national_id_exists(&self, national_id: &str) -> Result<bool, GatewayError>;
    /// Write only the columns present in `changes`.
    fn update_account(&self, id: &str, changes: &AccountChanges) -> Result<(), GatewayError>;
    /// Returns `false` if no such account existed.
    fn delete_account(&self, id: &str) -> Result<bool, GatewayError>;
    /// All accounts ordered by email.
    fn list_accounts(&self) -> Result<Vec<Account>, GatewayError>;
    fn credit_wins(&self, id: &str, wins: i64) -> Result<(), GatewayError>;
    fn grant_premium(&self, id: &str) -> Result<(), GatewayError>;
    /// Debit `cost` wins and grant premium in one statement. Returns `false`
    /// if the account is already premium or cannot afford it.
    fn spend_wins_for_premium(&self, id: &str, cost: i64) -> Result<bool, GatewayError>;
    fn admin_exists(&self) -> Result<bool, GatewayError>;
}

pub trait PlanStore: Send + Sync {
    fn find_plan(&self, user_id: &str) -> Result<Option<UserPlan>, GatewayError>;
    fn insert_plan(&self, plan: &UserPlan) -> Result<(), GatewayError>;
}

/// SQLite database wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, role, wins, streak, xp, premium, \
     first_name, last_name, national_id, phone, birth_date, extended_time, \
     selected_practice, last_login_date, created_at";

impl Database {
    pub fn new(path: &str) -> Result<Self, GatewayError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, GatewayError> {
        self.conn
            .lock()
            .map_err(|_| GatewayError::Internal("database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<(), GatewayError> {
        let conn = self.lock()?;

        // Enable WAL mode for better concurrent read/write performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'USER',
                wins INTEGER NOT NULL DEFAULT 0 CHECK (wins >= 0),
                streak INTEGER NOT NULL DEFAULT 0 CHECK (streak >= 0),
                xp INTEGER NOT NULL DEFAULT 0 CHECK (xp >= 0),
                premium INTEGER NOT NULL DEFAULT 0,
                first_name TEXT,
                last_name TEXT,
                national_id TEXT UNIQUE,
                phone TEXT,
                birth_date TEXT,
                extended_time INTEGER NOT NULL DEFAULT 0,
                selected_practice TEXT,
                last_login_date TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS user_plans (
                id TEXT PRIMARY KEY,
                user_id TEXT UNIQUE NOT NULL,
                topics TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS verification_codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                code TEXT NOT NULL,
                kind TEXT NOT NULL,
                account_id TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                used INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_codes_email ON verification_codes(email)",
            [],
        )?;

        Ok(())
    }

    /// Delete every code for `email`, then store `code`.
    pub fn replace_verification_code(&self, code: &VerificationCode) -> Result<(), GatewayError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM verification_codes WHERE email = ?1",
            params![code.email],
        )?;
        tx.execute(
            r#"
            INSERT INTO verification_codes (email, code, kind, account_id, created_at, expires_at, used)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            "#,
            params![
                code.email,
                code.code,
                code.kind.as_str(),
                code.account_id,
                code.created_at.timestamp_millis(),
                code.expires_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn find_verification_code(
        &self,
        email: &str,
        code: &str,
        kind: CodeKind,
    ) -> Result<Option<VerificationCode>, GatewayError> {
        let conn = self.lock()?;
        conn.query_row(
            r#"
            SELECT id, email, code, kind, account_id, created_at, expires_at, used
            FROM verification_codes
            WHERE email = ?1 AND code = ?2 AND kind = ?3
            ORDER BY id DESC LIMIT 1
            "#,
            params![email, code, kind.as_str()],
            |row| {
                Ok(VerificationCode {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    code: row.get(2)?,
                    kind,
                    account_id: row.get(4)?,
                    created_at: millis_to_utc(row.get(5)?),
                    expires_at: millis_to_utc(row.get(6)?),
                    used: row.get::<_, i64>(7)? != 0,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Mark a code used. Returns `false` if it was already used, so two
    /// concurrent redemptions cannot both succeed.
    pub fn mark_code_used(&self, id: i64) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE verification_codes SET used = 1 WHERE id = ?1 AND used = 0",
            params![id],
        )?;
        Ok(changed == 1)
    }

    pub fn set_password_hash(&self, id: &str, hash: &str) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE accounts SET password_hash = ?2 WHERE id = ?1",
            params![id, hash],
        )?;
        Ok(changed == 1)
    }

    pub fn record_login(&self, id: &str, day: NaiveDate) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET last_login_date = ?2 WHERE id = ?1",
            params![id, day.to_string()],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn latest_code(&self, email: &str) -> Result<Option<String>, GatewayError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT code FROM verification_codes WHERE email = ?1 ORDER BY id DESC LIMIT 1",
            params![email],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn delete_plan(&self, user_id: &str) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM user_plans WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let role: String = row.get(3)?;
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        role: role.parse().unwrap_or(Role::User),
        wins: row.get(4)?,
        streak: row.get(5)?,
        xp: row.get(6)?,
        premium: row.get::<_, i64>(7)? != 0,
        first_name: row.get(8)?,
        last_name: row.get(9)?,
        national_id: row.get(10)?,
        phone: row.get(11)?,
        birth_date: parse_date(row.get(12)?),
        extended_time: row.get::<_, i64>(13)? != 0,
        selected_practice: row.get(14)?,
        last_login_date: parse_date(row.get(15)?),
        created_at: millis_to_utc(row.get(16)?),
    })
}

impl AccountStore for Database {
    fn insert_account(&self, a: &Account) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                a.id,
                a.email,
                a.password_hash,
                a.role.as_str(),
                a.wins,
                a.streak,
                a.xp,
                a.premium as i64,
                a.first_name,
                a.last_name,
                a.national_id,
                a.phone,
                a.birth_date.map(|d| d.to_string()),
                a.extended_time as i64,
                a.selected_practice,
                a.last_login_date.map(|d| d.to_string()),
                a.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn find_account(&self, id: &str) -> Result<Option<Account>, GatewayError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            params![id],
            row_to_account,
        )
        .optional()
        .map_err(Into::into)
    }

    fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, GatewayError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1"),
            params![email],
            row_to_account,
        )
        .optional()
        .map_err(Into::into)
    }

    fn email_exists(&self, email: &str) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn national_id_exists(&self, national_id: &str) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE national_id = ?1",
            params![national_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn update_account(&self, id: &str, changes: &AccountChanges) -> Result<(), GatewayError> {
        let cols = changes.columns();
        let conn = self.lock()?;
        let changed = if cols.is_empty() {
            conn.query_row(
                "SELECT COUNT(*) FROM accounts WHERE id = ?1",
                params![id],
                |row| row.get::<_, i64>(0),
            )? as usize
        } else {
            let assignments = cols
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{name} = ?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let values = std::iter::once(Value::Text(id.to_string()))
                .chain(cols.into_iter().map(|(_, v)| v));
            conn.execute(
                &format!("UPDATE accounts SET {assignments} WHERE id = ?1"),
                params_from_iter(values),
            )?
        };
        if changed == 0 {
            return Err(GatewayError::NotFound("account not found".to_string()));
        }
        Ok(())
    }

    fn delete_account(&self, id: &str) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn list_accounts(&self) -> Result<Vec<Account>, GatewayError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY email"))?;
        let accounts = stmt
            .query_map([], row_to_account)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn credit_wins(&self, id: &str, wins: i64) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE accounts SET wins = wins + ?2 WHERE id = ?1",
            params![id, wins],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound("account not found".to_string()));
        }
        Ok(())
    }

    fn grant_premium(&self, id: &str) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        let changed = conn.execute("UPDATE accounts SET premium = 1 WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(GatewayError::NotFound("account not found".to_string()));
        }
        Ok(())
    }

    fn spend_wins_for_premium(&self, id: &str, cost: i64) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE accounts SET wins = wins - ?2, premium = 1 \
             WHERE id = ?1 AND premium = 0 AND wins >= ?2",
            params![id, cost],
        )?;
        Ok(changed == 1)
    }

    fn admin_exists(&self) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE role = 'ADMIN'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl PlanStore for Database {
    fn find_plan(&self, user_id: &str) -> Result<Option<UserPlan>, GatewayError> {
        let conn = self.lock()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, user_id, topics FROM user_plans WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(id, user_id, topics)| {
            let topics = serde_json::from_str(&topics)
                .map_err(|e| GatewayError::Internal(format!("corrupt plan topics: {e}")))?;
            Ok(UserPlan {
                id,
                user_id,
                topics,
            })
        })
        .transpose()
    }

    fn insert_plan(&self, plan: &UserPlan) -> Result<(), GatewayError> {
        let topics = serde_json::to_string(&plan.topics)
            .map_err(|e| GatewayError::Internal(format!("plan serialization failed: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_plans (id, user_id, topics) VALUES (?1, ?2, ?3)",
            params![plan.id, plan.user_id, topics],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("t.db").to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn account(id: &str, email: &str) -> Account {
        Account::new(id.to_string(), email, "$argon2id$fake".to_string())
    }

    #[test]
    fn account_round_trips_through_sqlite() {
        let (_dir, db) = db();
        let mut a = account("a1", "ana@example.com");
        a.national_id = Some("12345678909".into());
        a.birth_date = NaiveDate::from_ymd_opt(2001, 4, 9);
        db.insert_account(&a).unwrap();

        let loaded = db.find_account("a1").unwrap().unwrap();
        assert_eq!(loaded.email, "ana@example.com");
        assert_eq!(loaded.wins, 5);
        assert_eq!(loaded.birth_date, a.birth_date);
        assert_eq!(
            db.find_account_by_email("ana@example.com")
                .unwrap()
                .unwrap()
                .id,
            "a1"
        );
        assert!(db.national_id_exists("12345678909").unwrap());
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let (_dir, db) = db();
        db.insert_account(&account("a1", "dup@example.com")).unwrap();
        let err = db
            .insert_account(&account("a2", "dup@example.com"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(ref m) if m.contains("email")));
    }

    #[test]
    fn duplicate_national_id_is_a_conflict() {
        let (_dir, db) = db();
        let mut a = account("a1", "a@example.com");
        a.national_id = Some("111".into());
        let mut b = account("a2", "b@example.com");
        b.national_id = Some("111".into());
        db.insert_account(&a).unwrap();
        let err = db.insert_account(&b).unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(ref m) if m.contains("national id")));
    }

    #[test]
    fn accounts_without_national_id_coexist() {
        let (_dir, db) = db();
        db.insert_account(&account("a1", "a@example.com")).unwrap();
        db.insert_account(&account("a2", "b@example.com")).unwrap();
        assert_eq!(db.list_accounts().unwrap().len(), 2);
    }

    #[test]
    fn premium_spend_is_conditional() {
        let (_dir, db) = db();
        db.insert_account(&account("a1", "a@example.com")).unwrap();
        // 5 signup wins only
        assert!(!db.spend_wins_for_premium("a1", 100).unwrap());
        db.credit_wins("a1", 145).unwrap();
        assert!(db.spend_wins_for_premium("a1", 100).unwrap());
        let a = db.find_account("a1").unwrap().unwrap();
        assert_eq!(a.wins, 50);
        assert!(a.premium);
        assert!(!db.spend_wins_for_premium("a1", 10).unwrap());
    }

    #[test]
    fn update_writes_only_changed_columns() {
        let (_dir, db) = db();
        db.insert_account(&account("a1", "a@example.com")).unwrap();
        let stale = db.find_account("a1").unwrap().unwrap();
        db.credit_wins("a1", 50).unwrap();
        db.grant_premium("a1").unwrap();

        db.update_account(
            &stale.id,
            &AccountChanges {
                first_name: Some("Ana".into()),
                national_id: Some(Some("123".into())),
                ..Default::default()
            },
        )
        .unwrap();
        let a = db.find_account("a1").unwrap().unwrap();
        assert_eq!(a.first_name.as_deref(), Some("Ana"));
        assert_eq!(a.wins, 55);
        assert!(a.premium);

        db.update_account(
            "a1",
            &AccountChanges {
                national_id: Some(None),
                wins: Some(7),
                ..Default::default()
            },
        )
        .unwrap();
        let a = db.find_account("a1").unwrap().unwrap();
        assert_eq!(a.national_id, None);
        assert_eq!(a.wins, 7);
        assert_eq!(a.first_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn update_of_missing_account_is_not_found() {
        let (_dir, db) = db();
        assert!(matches!(
            db.update_account("ghost", &AccountChanges::default()),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            db.update_account(
                "ghost",
                &AccountChanges {
                    xp: Some(1),
                    ..Default::default()
                }
            ),
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn list_is_sorted_by_email() {
        let (_dir, db) = db();
        db.insert_account(&account("1", "zed@example.com")).unwrap();
        db.insert_account(&account("2", "amy@example.com")).unwrap();
        let emails: Vec<String> = db
            .list_accounts()
            .unwrap()
            .into_iter()
            .map(|a| a.email)
            .collect();
        assert_eq!(emails, vec!["amy@example.com", "zed@example.com"]);
    }

    #[test]
    fn plan_is_unique_per_user() {
        let (_dir, db) = db();
        let plan = UserPlan {
            id: "p1".into(),
            user_id: "u1".into(),
            topics: serde_json::json!({"math": []}),
        };
        db.insert_plan(&plan).unwrap();
        assert_eq!(db.find_plan("u1").unwrap().unwrap(), plan);
        let again = UserPlan {
            id: "p2".into(),
            ..plan
        };
        assert!(matches!(
            db.insert_plan(&again),
            Err(GatewayError::Conflict(_))
        ));
    }
}
