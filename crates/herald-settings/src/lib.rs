//! # herald-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **User file**: `~/.herald/settings.json` (merged key by key over defaults)
//! 3. **Environment variables**: `HERALD_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    herald_home, load_settings, load_settings_from_path, merge_into, parse_flag, resolve_path,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = HeraldSettings::default();
        assert!(settings_path().ends_with(".herald/settings.json"));
    }
}
