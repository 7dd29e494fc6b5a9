//! Core primitives for the BrainWin accounts gateway.
//!
//! This crate holds everything that does not depend on the HTTP layer:
//! the account model, bearer-token signing, password hashing, webhook
//! signature checks, the product catalog and the idempotency ledger that
//! guarantees each paid checkout session is applied at most once.

pub mod account;
pub mod catalog;
pub mod error;
pub mod hmac;
pub mod idempotency;
pub mod password;
pub mod security;
pub mod token;

pub use account::{Account, AccountView, Role};
pub use catalog::{BillingMode, Catalog, Product};
pub use error::BrainwinError;
pub use idempotency::{
    IdempotencyStore, InMemoryIdempotencyStore, LedgerRecord, SqliteIdempotencyStore,
};
pub use token::{Claims, TokenCodec};
