//! Models Module - Data Structures & Configuration
//!
//! Wire types, configuration and the application error.

pub mod config;
pub mod errors;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
