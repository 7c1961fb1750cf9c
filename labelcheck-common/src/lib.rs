//! # Labelcheck Common Library
//!
//! Shared code for the labelcheck client crates including:
//! - Wire types for the remote analysis service (analyses, batches, progress)
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
