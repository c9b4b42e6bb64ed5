//! # ruinmap common library
//!
//! Shared code for the ruinmap curation processes:
//! - Error type
//! - Configuration loading and root folder resolution
//! - Site-name normalization
//! - SQLite schema initialization

pub mod config;
pub mod db;
pub mod error;
pub mod names;

pub use error::{Error, Result};
