//! Resource and run types shared by the reconcilers, the store, and the
//! server surface.

pub mod ids;
pub mod profile;
pub mod scan;
pub mod schedule;

pub use ids::*;
pub use profile::*;
pub use scan::*;
pub use schedule::*;
