pub mod graceful_shutdown;
pub mod periodic;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use periodic::PeriodicTask;
