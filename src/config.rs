//! Runtime configuration.
//!
//! Memory region sizes and the log level can be overridden through environment
//! variables:
//!
//! | Variable             | Meaning                                | Default   |
//! |----------------------|----------------------------------------|-----------|
//! | `SLANG_LOG`          | `debug`, `info`, `warn` or `error`     | `info`    |
//! | `SLANG_GLOBALS_SIZE` | global region size, in slots           | 200       |
//! | `SLANG_FRAMES_SIZE`  | call-frame region size, in slots       | 5000      |
//! | `SLANG_STACK_SIZE`   | data stack region size, in slots       | 300       |
//! | `SLANG_HEAP_LIMIT`   | maximum heap size, in slots            | 1048576   |
//!
//! Every size must be between 1 and [`MAX_REGION`] slots.

use crate::utils::log::Level;
use slang_derive::Error;

/// Largest size accepted for any single memory region, in slots.
pub const MAX_REGION: usize = 1 << 24;

/// Sizes of the memory regions, in slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub globals: usize,
    pub frames: usize,
    pub stack: usize,
    pub initial_heap: usize,
    pub max_heap: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            globals: 200,
            frames: 5000,
            stack: 300,
            initial_heap: 6000,
            max_heap: 1 << 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub limits: Limits,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            log_level: Level::Info,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(value) = lookup("SLANG_LOG") {
            config.log_level = value.parse().map_err(|_| ConfigError::Invalid {
                var: "SLANG_LOG",
                value: value.clone(),
                reason: "expected debug, info, warn or error",
            })?;
        }

        let limits = &mut config.limits;
        for (var, slot) in [
            ("SLANG_GLOBALS_SIZE", &mut limits.globals),
            ("SLANG_FRAMES_SIZE", &mut limits.frames),
            ("SLANG_STACK_SIZE", &mut limits.stack),
            ("SLANG_HEAP_LIMIT", &mut limits.max_heap),
        ] {
            if let Some(value) = lookup(var) {
                *slot = parse_size(var, &value)?;
            }
        }

        if limits.frames < 3 {
            return Err(ConfigError::Invalid {
                var: "SLANG_FRAMES_SIZE",
                value: limits.frames.to_string(),
                reason: "must hold at least one call frame (3 slots)",
            });
        }
        limits.initial_heap = limits.initial_heap.min(limits.max_heap);
        limits.validate()?;

        Ok(config)
    }
}

impl Limits {
    /// Checks that the regions fit a single address space.
    pub fn validate(&self) -> Result<(), ConfigError> {
        [self.globals, self.frames, self.stack, self.max_heap]
            .into_iter()
            .try_fold(1usize, |end, size| end.checked_add(size))
            .filter(|end| i64::try_from(*end).is_ok())
            .map(|_| ())
            .ok_or_else(|| ConfigError::Invalid {
                var: "SLANG_HEAP_LIMIT",
                value: self.max_heap.to_string(),
                reason: "memory regions do not fit the address space",
            })
    }
}

fn parse_size(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero",
        }),
        Ok(size) if size > MAX_REGION => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "exceeds the largest region size",
        }),
        Ok(size) => Ok(size),
        Err(_) => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a positive integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.limits.globals, 200);
        assert_eq!(config.limits.frames, 5000);
        assert_eq!(config.limits.stack, 300);
        assert_eq!(config.limits.initial_heap, 6000);
    }

    #[test]
    fn overrides_from_variables() {
        let config = config(&[
            ("SLANG_LOG", "debug"),
            ("SLANG_STACK_SIZE", "16"),
            ("SLANG_HEAP_LIMIT", "100"),
        ])
        .unwrap();
        assert_eq!(config.log_level, Level::Debug);
        assert_eq!(config.limits.stack, 16);
        assert_eq!(config.limits.max_heap, 100);
        assert_eq!(config.limits.initial_heap, 100);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            config(&[("SLANG_STACK_SIZE", "lots")]),
            Err(ConfigError::Invalid {
                var: "SLANG_STACK_SIZE",
                ..
            })
        ));
        assert!(config(&[("SLANG_GLOBALS_SIZE", "0")]).is_err());
        assert!(config(&[("SLANG_FRAMES_SIZE", "2")]).is_err());
        assert!(config(&[("SLANG_LOG", "loud")]).is_err());
    }

    #[test]
    fn rejects_oversized_regions() {
        let huge = usize::MAX.to_string();
        for var in [
            "SLANG_GLOBALS_SIZE",
            "SLANG_FRAMES_SIZE",
            "SLANG_STACK_SIZE",
            "SLANG_HEAP_LIMIT",
        ] {
            assert!(
                matches!(
                    config(&[(var, huge.as_str())]),
                    Err(ConfigError::Invalid { var: v, .. }) if v == var
                ),
                "{var}"
            );
        }

        let over = (MAX_REGION + 1).to_string();
        assert!(config(&[("SLANG_HEAP_LIMIT", over.as_str())]).is_err());
        let max = MAX_REGION.to_string();
        assert_eq!(
            config(&[("SLANG_HEAP_LIMIT", max.as_str())]).unwrap().limits.max_heap,
            MAX_REGION
        );
    }

    #[test]
    fn limits_must_fit_address_space() {
        assert!(Limits::default().validate().is_ok());
        let limits = Limits {
            max_heap: usize::MAX,
            ..Limits::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(ConfigError::Invalid {
                var: "SLANG_HEAP_LIMIT",
                ..
            })
        ));
    }
}
