pub mod auth;
pub mod health;
pub mod payments;
pub mod users;
