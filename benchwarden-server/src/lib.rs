//! # Benchwarden Server
//!
//! Process wiring around [`benchwarden_core`]: admission of scan requests
//! and schedules over HTTP, status reads, health, and the pull metrics
//! endpoint rendered from the aggregator snapshot.

pub mod errors;
pub mod exposition;
pub mod handlers;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use routes::create_app;
pub use state::AppState;
