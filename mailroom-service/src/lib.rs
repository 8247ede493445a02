//! # mailroom-service
//!
//! Core security and coordination subsystem of the internal mailroom tracking
//! service: identity and sessions, role-based authorization, a serialized
//! write path over an embedded libsql database, the package lifecycle state
//! machine with its immutable event log, and the hardened request pipeline.
//!
//! HTML rendering, CSV parsing, QR rasterization, and process supervision
//! are external collaborators; this crate exposes the routes, contracts, and
//! state they build on.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mailroom_service::{config::Config, observability, routes, server::Server, state::AppState};
//!
//! #[tokio::main]
//! async fn main() -> mailroom_service::error::Result<()> {
//!     let config = Config::load()?;
//!     observability::init_tracing(&config)?;
//!
//!     let state = AppState::initialize(config).await?;
//!     let app = routes::router(state.clone());
//!
//!     Server::new(state).serve(app).await
//! }
//! ```

pub mod audit;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod packages;
pub mod policy;
pub mod routes;
pub mod server;
pub mod settings;
pub mod state;
pub mod store;

pub(crate) mod util;

/// Commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::{PackageStatus, Role, User};
    pub use crate::error::{Error, Result};
    pub use crate::policy::{AccessPolicy, Action, Decision};
    pub use crate::state::AppState;
}
