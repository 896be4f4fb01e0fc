//! # plexfm Common Library
//!
//! Shared code for the plexfm services:
//! - Error type used by configuration handling
//! - TOML configuration schema and file resolution
//! - Atomic configuration write-back (credential persistence)

pub mod config;
pub mod error;

pub use error::{Error, Result};
