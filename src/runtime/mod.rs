//! # Runtime Module
//!
//! Process initialization and the error policy that maps failures to retry
//! decisions and exit codes.

pub mod error_policy;
pub mod initialization;

pub use error_policy::*;
pub use initialization::*;
