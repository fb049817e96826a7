pub mod config;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;

pub use error::{AppError, AppResult};
pub use state::AppState;
