//! # relay-settings
//!
//! Layered configuration for the tutor relay.
//!
//! Settings are resolved in priority order:
//! 1. **Environment defaults** from `RELAY_ENV` (`local`, `development`, `production`)
//! 2. **Settings file** given on the command line (deep-merged over defaults)
//! 3. **Environment variables** `RELAY_*` (highest priority)
//!
//! The resolved [`RelaySettings`] is passed explicitly to the server; several
//! instances with different settings can run in one process.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_with, resolve_environment, resolve_environment_with,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RelaySettings::default();
        let env = resolve_environment_with(|_| None).unwrap();
        assert_eq!(env, Environment::Local);
    }
}
