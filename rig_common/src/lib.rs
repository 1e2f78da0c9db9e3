//! Rig Common Library
//!
//! Types shared by every rig crate: the [`record::Record`] message that flows
//! through links, the [`device::Device`] capability contract implemented by
//! hardware collaborators, and TOML configuration loading.
//!
//! # Module Structure
//!
//! - [`record`] - Label-keyed timestamped messages
//! - [`device`] - Device capability trait and error types
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Workspace-wide constants
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod device;
pub mod prelude;
pub mod record;
