//! Shared types, site catalog, config, and error definitions for sitewatch.

pub mod catalog;
pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use catalog::{Device, SiteCatalog};
pub use config::FeedConfig;
pub use error::Error;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
