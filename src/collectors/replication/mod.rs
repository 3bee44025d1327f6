//! Replica-side scrapers.

mod heartbeat;
mod slave_status;

pub use heartbeat::Heartbeat;
pub use slave_status::SlaveStatus;
