//! Protocol module - 64drive command set definitions.

pub mod command;
pub mod constants;
pub mod types;
pub mod version;

pub use command::{CommandError, CommandFrame};
pub use constants::*;
pub use types::{Bank, Cic};
pub use version::VersionInfo;
