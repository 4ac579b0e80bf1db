//! Command implementations for the CLI.

mod synchronize;

pub use synchronize::{SynchronizeCommand, build_services};
