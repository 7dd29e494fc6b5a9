pub mod bootstrap;
pub mod config;
pub mod cors;
pub mod db;
pub mod email;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod metrics;
pub mod provider;
pub mod provisioner;
pub mod routes;
pub mod rules;
pub mod saga;
pub mod state;
pub mod templates;
pub mod verification;

pub use config::GatewayConfig;
pub use db::Database;
pub use error::GatewayError;
pub use state::AppState;
