pub mod backup;
pub mod context;
pub mod controller;
pub mod election;
pub mod events;
pub mod failure;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod restore;
pub mod status;

pub use backup::BackupSessionController;
pub use context::SessionContext;
pub use controller::Controller;
pub use election::{LeaderElector, Leadership, LeaseTiming};
pub use restore::RestoreSessionController;
pub use status::StatusUpdater;
