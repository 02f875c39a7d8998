//! # Key-value configuration management.

use std::str::FromStr;

use anyhow::{ensure, Context as _, Result};
use strum::EnumProperty;
use strum_macros::{AsRefStr, Display, EnumIter, EnumProperty, EnumString};

use crate::context::Context;

/// The available configuration keys.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    EnumProperty,
)]
#[strum(serialize_all = "snake_case")]
pub enum Config {
    /// Maximum number of UIDs classified by a single UID SEARCH.
    #[strum(props(default = "256"))]
    MaxUidsToConsider,

    /// Number of semi-monthly windows searched during the first sync of a folder.
    #[strum(props(default = "25"))]
    BackfillWindows,

    /// Select folders with EXAMINE instead of SELECT.
    #[strum(props(default = "1"))]
    ReadOnly,

    /// Skip messages flagged as `\Draft`.
    #[strum(props(default = "1"))]
    ExcludeDrafts,

    /// Seconds to wait in IDLE before re-issuing it.
    ///
    /// Servers drop IDLE after 30 minutes, RFC 2177 recommends
    /// re-issuing it at least every 29 minutes.
    #[strum(props(default = "1380"))]
    IdleTimeout,

    /// How many times a single call may re-enter a folder which got dirty
    /// while its queue was drained.
    #[strum(props(default = "3"))]
    MaxReentries,
}

impl Config {
    /// Returns the default value of the key, if any.
    pub fn default_value(self) -> Option<&'static str> {
        self.get_str("default")
    }
}

impl Context {
    /// Returns the value of a configuration key,
    /// the default value if it is not set.
    pub fn get_config(&self, key: Config) -> Option<String> {
        self.config_overrides()
            .read()
            .get(&key)
            .cloned()
            .or_else(|| key.default_value().map(|s| s.to_string()))
    }

    /// Returns the configured value parsed with [`FromStr`].
    ///
    /// Returns `Ok(None)` if the key is neither set nor has a default.
    pub fn get_config_parsed<T: FromStr>(&self, key: Config) -> Result<Option<T>>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get_config(key)
            .map(|s| {
                s.parse::<T>()
                    .with_context(|| format!("invalid value for {key}: {s:?}"))
            })
            .transpose()
    }

    /// Returns an integer config value, 0 if it is not set.
    pub fn get_config_int(&self, key: Config) -> Result<i32> {
        Ok(self.get_config_parsed(key)?.unwrap_or_default())
    }

    /// Returns a 32-bit unsigned config value, 0 if it is not set.
    pub fn get_config_u32(&self, key: Config) -> Result<u32> {
        Ok(self.get_config_parsed(key)?.unwrap_or_default())
    }

    /// Returns a boolean config value, false if it is not set.
    pub fn get_config_bool(&self, key: Config) -> Result<bool> {
        Ok(self.get_config_int(key)? != 0)
    }

    /// Sets a configuration key. `None` restores the default.
    ///
    /// All keys are numeric, non-numeric values are rejected.
    pub fn set_config(&self, key: Config, value: Option<&str>) -> Result<()> {
        let mut overrides = self.config_overrides().write();
        match value {
            Some(value) => {
                ensure!(
                    value.parse::<i64>().is_ok(),
                    "{key} must be numeric, got {value:?}"
                );
                overrides.insert(key, value.to_string());
            }
            None => {
                overrides.remove(&key);
            }
        }
        Ok(())
    }

    /// Sets a boolean configuration key.
    pub fn set_config_bool(&self, key: Config, value: bool) -> Result<()> {
        self.set_config(key, Some(if value { "1" } else { "0" }))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::test_utils::TestContext;

    #[test]
    fn test_to_string() {
        assert_eq!(Config::MaxUidsToConsider.to_string(), "max_uids_to_consider");
        assert_eq!(
            Config::from_str("idle_timeout").unwrap(),
            Config::IdleTimeout
        );
    }

    #[test]
    fn test_default_prop() {
        assert_eq!(Config::MaxUidsToConsider.default_value(), Some("256"));
        assert_eq!(Config::BackfillWindows.default_value(), Some("25"));
        assert!(Config::iter().all(|key| key.default_value().is_some()));
    }

    #[test]
    fn test_set_and_reset() -> Result<()> {
        let t = TestContext::new();
        assert_eq!(t.get_config_u32(Config::MaxUidsToConsider)?, 256);

        t.set_config(Config::MaxUidsToConsider, Some("16"))?;
        assert_eq!(t.get_config_u32(Config::MaxUidsToConsider)?, 16);

        t.set_config(Config::MaxUidsToConsider, None)?;
        assert_eq!(t.get_config_u32(Config::MaxUidsToConsider)?, 256);
        Ok(())
    }

    #[test]
    fn test_bool() -> Result<()> {
        let t = TestContext::new();
        assert!(t.get_config_bool(Config::ReadOnly)?);
        t.set_config_bool(Config::ReadOnly, false)?;
        assert!(!t.get_config_bool(Config::ReadOnly)?);
        Ok(())
    }

    #[test]
    fn test_reject_non_numeric() {
        let t = TestContext::new();
        assert!(t.set_config(Config::IdleTimeout, Some("soon")).is_err());
        assert_eq!(t.get_config(Config::IdleTimeout).as_deref(), Some("1380"));
    }
}
