//! Common Infrastructure Module
//!
//! The root error taxonomy shared by processors and the job layer.

pub mod error;

pub use error::{Result, SupplierError};
