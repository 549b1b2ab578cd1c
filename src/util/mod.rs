//! Utility types shared by every layer.
//!
//! - [`Error`] / [`Result`] - fatal load errors
//! - [`Reports`] - recoverable diagnostics collected during a load
//! - [`Arena`] / [`Handle`] - generational storage for records and data

mod arena;
mod error;
mod report;

pub use arena::*;
pub use error::*;
pub use report::*;
