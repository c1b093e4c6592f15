//! Reconciliation machinery: configuration, the job runner seam, resource
//! storage, the two reconcilers, and the runtime that drives them.

pub mod backoff;
pub mod config;
pub mod events;
pub mod job;
pub mod reconciler;
pub mod runner;
pub mod runtime;
pub mod store;

pub use backoff::*;
pub use config::*;
pub use events::*;
pub use job::*;
pub use reconciler::*;
pub use runner::*;
pub use runtime::*;
pub use store::*;
