pub mod attachments;
pub mod auth;
pub mod categories;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod links;
pub mod models;
pub mod permissions;
pub mod register;
pub mod reports;
pub mod review;
pub mod schema;
pub mod settings;
pub mod state;
pub mod users;

pub use error::{RegisterError, Result};
pub use state::AppContext;

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default
/// level. Safe to call once per process.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("policyhub=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
