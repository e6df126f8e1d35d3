//! Tessera Common - Shared types and utilities
//!
//! This crate provides the identifiers, object metadata, error definitions
//! and configuration used by the placement engine and the rebuild status
//! aggregation.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, PlacementConfig, RebuildConfig};
pub use error::{Error, Result};
pub use types::*;
