pub mod backend;
pub mod command;
pub mod host;
pub mod output;
pub mod restic;
pub mod retention;

// Trait-based abstractions for testability
pub mod executor;
pub mod restic_ops;

// Re-export commonly used types and traits (used by test crate)
pub use executor::{CommandExecutor, RealExecutor};
pub use restic_ops::{RealResticOps, ResticOperations};
