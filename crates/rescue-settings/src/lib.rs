//! # rescue-settings
//!
//! Configuration management with layered sources for the Rapid Rescue
//! dispatcher.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RescueSettings::default()`]
//! 2. **Settings file**: `~/.rapid-rescue/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `RESCUE_*` and `JWT_SECRET_KEY` overrides
//!
//! The binary applies its CLI flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;
