//! In-process controller runtime: work queues, worker pools, watch and
//! transition feeds, periodic resync.

mod controller;
mod event_bus;
mod supervisor;
mod work_queue;

pub use controller::*;
pub use event_bus::*;
pub use supervisor::*;
pub use work_queue::*;
