//! Common utilities module
//!
//! This module contains the error type shared by the pixel pipeline and the
//! acquisition layer.

pub mod error;

pub use error::{AcquisitionError, Result};
