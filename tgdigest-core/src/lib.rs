//! tgdigest Core - Data Types
//!
//! Pure data structures shared by every other crate: conversation windows,
//! stage specs, pipeline results, dead-letter records, errors and config.
//! This crate contains no I/O and no model calls.

pub mod config;
pub mod dead_letter;
pub mod error;
pub mod identity;
pub mod llm;
pub mod result;
pub mod stage;
pub mod window;

pub use config::*;
pub use dead_letter::*;
pub use error::*;
pub use identity::*;
pub use llm::*;
pub use result::*;
pub use stage::*;
pub use window::*;
