use actix_web::{web, HttpResponse};
use brainwin::account::{is_valid_email, normalize_email, normalize_national_id};
use brainwin::password::hash_password;
use brainwin::{Account, AccountView, Role};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::{AccountChanges, AccountStore};
use crate::error::GatewayError;
use crate::gate::AuthIdentity;
use crate::saga::{prepare_account, NewAccount};
use crate::state::AppState;

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccount {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub extended_time: Option<bool>,
    pub selected_practice: Option<String>,
    pub xp: Option<i64>,
    pub streak: Option<i64>,
    // admin only
    pub role: Option<String>,
    pub wins: Option<i64>,
    pub premium: Option<bool>,
}

fn account_by_email(state: &AppState, email: &str) -> Result<Account, GatewayError> {
    state
        .db
        .find_account_by_email(email)?
        .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))
}

fn account_by_id(state: &AppState, id: &str) -> Result<Account, GatewayError> {
    state
        .db
        .find_account(id)?
        .ok_or_else(|| GatewayError::NotFound("account not found".to_string()))
}

fn non_negative(name: &str, value: i64) -> Result<i64, GatewayError> {
    if value < 0 {
        return Err(GatewayError::Validation(format!(
            "{name} must not be negative"
        )));
    }
    Ok(value)
}

/// Validate `update` against `account` on behalf of `caller` and return
/// the columns to write.
pub fn changes_for(
    accounts: &dyn AccountStore,
    caller: &AuthIdentity,
    account: &Account,
    update: UpdateAccount,
) -> Result<AccountChanges, GatewayError> {
    let is_admin = caller.is_admin();
    if !is_admin && caller.email != account.email {
        return Err(GatewayError::Forbidden(
            "cannot modify another account".to_string(),
        ));
    }
    if !is_admin && (update.role.is_some() || update.wins.is_some() || update.premium.is_some()) {
        return Err(GatewayError::Forbidden(
            "admin permission required".to_string(),
        ));
    }

    let mut changes = AccountChanges::default();
    if let Some(email) = update.email {
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(GatewayError::Validation("invalid email".to_string()));
        }
        if email != account.email {
            if accounts.email_exists(&email)? {
                return Err(GatewayError::Conflict("email already registered".to_string()));
            }
            changes.email = Some(email);
        }
    }
    if let Some(raw) = update.national_id {
        let nid = normalize_national_id(&raw);
        if nid.is_empty() {
            changes.national_id = Some(None);
        } else if account.national_id.as_deref() != Some(nid.as_str()) {
            if accounts.national_id_exists(&nid)? {
                return Err(GatewayError::Conflict(
                    "national id already registered".to_string(),
                ));
            }
            changes.national_id = Some(Some(nid));
        }
    }
    if let Some(password) = update.password.filter(|p| !p.trim().is_empty()) {
        changes.password_hash = Some(hash_password(&password)?);
    }
    changes.first_name = update.first_name;
    changes.last_name = update.last_name;
    changes.phone = update.phone;
    changes.birth_date = update.birth_date;
    changes.extended_time = update.extended_time;
    changes.selected_practice = update.selected_practice;
    changes.xp = update.xp.map(|v| non_negative("xp", v)).transpose()?;
    changes.streak = update.streak.map(|v| non_negative("streak", v)).transpose()?;
    changes.role = update.role.map(|r| r.parse::<Role>()).transpose()?;
    changes.wins = update.wins.map(|v| non_negative("wins", v)).transpose()?;
    changes.premium = update.premium;
    Ok(changes)
}

/// GET /users/me
pub async fn me(
    identity: AuthIdentity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let account = account_by_email(&state, &identity.email)?;
    Ok(HttpResponse::Ok().json(account.view()))
}

/// POST /users/me/upgrade-premium
pub async fn upgrade_premium(
    identity: AuthIdentity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let account = state
        .payment_ledger()
        .upgrade_to_premium(&identity.email)?;
    Ok(HttpResponse::Ok().json(account.view()))
}

/// GET /users
pub async fn list_users(
    _identity: AuthIdentity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let views: Vec<AccountView> = state
        .db
        .list_accounts()?
        .iter()
        .map(Account::view)
        .collect();
    Ok(HttpResponse::Ok().json(views))
}

/// POST /users - admin create, no downstream provisioning
pub async fn create_user(
    identity: AuthIdentity,
    body: web::Json<NewAccount>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let role = match body.role.as_deref() {
        Some(r) if !r.trim().is_empty() => r.parse::<Role>()?,
        _ => Role::User,
    };
    let account = prepare_account(state.db.as_ref(), &body, role)?;
    state.db.insert_account(&account)?;
    tracing::info!(
        account_id = %account.id,
        role = %account.role,
        created_by = %identity.email,
        "account created by admin"
    );
    Ok(HttpResponse::Created().json(account.view()))
}

/// GET /users/{id}
pub async fn get_user(
    _identity: AuthIdentity,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let account = account_by_id(&state, &path)?;
    Ok(HttpResponse::Ok().json(account.view()))
}

/// PUT /users/{id}
pub async fn update_user(
    identity: AuthIdentity,
    path: web::Path<String>,
    body: web::Json<UpdateAccount>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let account = account_by_id(&state, &path)?;
    let changes = changes_for(state.db.as_ref(), &identity, &account, body.into_inner())?;
    if !changes.is_empty() {
        state.db.update_account(&account.id, &changes)?;
    }
    tracing::info!(account_id = %account.id, updated_by = %identity.email, "account updated");
    let updated = account_by_id(&state, &account.id)?;
    Ok(HttpResponse::Ok().json(updated.view()))
}

/// DELETE /users/{id}
pub async fn delete_user(
    identity: AuthIdentity,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let id = path.into_inner();
    if !state.db.delete_account(&id)? {
        return Err(GatewayError::NotFound("account not found".to_string()));
    }
    state.db.delete_plan(&id)?;
    tracing::info!(account_id = %id, deleted_by = %identity.email, "account deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/users/me").route(web::get().to(me)))
        .service(
            web::resource("/users/me/upgrade-premium").route(web::post().to(upgrade_premium)),
        )
        .service(
            web::resource("/users")
                .route(web::get().to(list_users))
                .route(web::post().to(create_user)),
        )
        .service(
            web::resource("/users/{id}")
                .route(web::get().to(get_user))
                .route(web::put().to(update_user))
                .route(web::delete().to(delete_user)),
        );
}
