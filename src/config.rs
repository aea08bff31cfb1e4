// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport configuration: a comma-separated `key=value` list.
//
//     transport=shm,name=telemetry,buffers=8,buffer_size=65536,sync=lockfree

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown key `{0}`")]
    UnknownKey(String),

    #[error("malformed entry `{0}`, expected key=value")]
    Malformed(String),

    #[error("key `{0}` given more than once")]
    Duplicate(String),

    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: &'static str, value: String },

    #[error("unsupported {key} `{value}`")]
    Unsupported { key: &'static str, value: String },
}

/// Producer-side placement discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDiscipline {
    /// Single writer thread, no synchronization.
    Synchronized,
    /// Any number of writer threads serialised by a mutex.
    Exclusive,
    /// Any number of writer threads claiming spans by compare-and-swap.
    LockFree,
}

impl SyncDiscipline {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDiscipline::Synchronized => "synchronized",
            SyncDiscipline::Exclusive => "exclusive",
            SyncDiscipline::LockFree => "lockfree",
        }
    }
}

impl fmt::Display for SyncDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDiscipline {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synchronized" => Ok(SyncDiscipline::Synchronized),
            "exclusive" => Ok(SyncDiscipline::Exclusive),
            "lockfree" => Ok(SyncDiscipline::LockFree),
            other => Err(ConfigError::Unsupported {
                key: "sync",
                value: other.to_string(),
            }),
        }
    }
}

/// What the drain loop does with a buffer older than the next expected
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Drop the buffer with a warning.
    Skip,
    /// Report `SequenceError::Stale`.
    Error,
}

impl FromStr for StalePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(StalePolicy::Skip),
            "error" => Ok(StalePolicy::Error),
            other => Err(ConfigError::Unsupported {
                key: "stale",
                value: other.to_string(),
            }),
        }
    }
}

/// Platform tag of the running build, e.g. `linux-x86_64`.
pub fn default_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub name: String,
    pub buffers: usize,
    pub buffer_size: usize,
    pub sync: SyncDiscipline,
    pub platform: String,
    pub version: u32,
    pub retries: u32,
    pub timeout_ms: u64,
    pub max_skip: u64,
    pub stale: StalePolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: "evring".to_string(),
            buffers: 5,
            buffer_size: 4096,
            sync: SyncDiscipline::LockFree,
            platform: default_platform(),
            version: 1,
            retries: 128,
            timeout_ms: 100,
            max_skip: 64,
            stale: StalePolicy::Skip,
        }
    }
}

impl TransportConfig {
    /// Size of the shared segment this configuration lays out.
    pub fn segment_len(&self) -> usize {
        crate::ring::segment_len(self.buffers, self.buffer_size)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "transport" => {
                if value != "shm" {
                    return Err(ConfigError::Unsupported {
                        key: "transport",
                        value: value.to_string(),
                    });
                }
            }
            "name" => {
                if value.is_empty() || value.contains('/') {
                    return Err(invalid("name", value));
                }
                self.name = value.to_string();
            }
            "buffers" => {
                self.buffers = parse_num("buffers", value)?;
                if self.buffers == 0 {
                    return Err(invalid("buffers", value));
                }
            }
            "buffer_size" => {
                self.buffer_size = parse_num("buffer_size", value)?;
                // u32 offsets near the top of the range are cursor sentinels.
                if self.buffer_size == 0 || self.buffer_size > (u32::MAX / 2) as usize {
                    return Err(invalid("buffer_size", value));
                }
            }
            "sync" => self.sync = value.parse()?,
            "platform" => {
                if value.is_empty() {
                    return Err(invalid("platform", value));
                }
                self.platform = value.to_string();
            }
            "version" => self.version = parse_num("version", value)?,
            "retries" => {
                self.retries = parse_num("retries", value)?;
                if self.retries == 0 {
                    return Err(invalid("retries", value));
                }
            }
            "timeout_ms" => self.timeout_ms = parse_num("timeout_ms", value)?,
            "max_skip" => self.max_skip = parse_num("max_skip", value)?,
            "stale" => self.stale = value.parse()?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

fn parse_num<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

impl FromStr for TransportConfig {
    type Err = ConfigError;

    /// An empty string yields the defaults.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cfg = TransportConfig::default();
        let s = s.trim();
        if s.is_empty() {
            return Ok(cfg);
        }

        let mut seen = HashSet::new();
        for entry in s.split(',') {
            let entry = entry.trim();
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::Malformed(entry.to_string()))?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                return Err(ConfigError::Malformed(entry.to_string()));
            }
            if !seen.insert(key.to_string()) {
                return Err(ConfigError::Duplicate(key.to_string()));
            }
            cfg.set(key, value)?;
        }
        Ok(cfg)
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transport=shm,name={},buffers={},buffer_size={},sync={},platform={},version={},\
             retries={},timeout_ms={},max_skip={},stale={}",
            self.name,
            self.buffers,
            self.buffer_size,
            self.sync,
            self.platform,
            self.version,
            self.retries,
            self.timeout_ms,
            self.max_skip,
            match self.stale {
                StalePolicy::Skip => "skip",
                StalePolicy::Error => "error",
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_default() {
        assert_eq!("".parse::<TransportConfig>().unwrap(), TransportConfig::default());
        assert_eq!("  ".parse::<TransportConfig>().unwrap(), TransportConfig::default());
    }

    #[test]
    fn display_parses_back() {
        let cfg: TransportConfig = "name=x,buffers=3,sync=exclusive,stale=error".parse().unwrap();
        let again: TransportConfig = cfg.to_string().parse().unwrap();
        assert_eq!(cfg, again);
    }

    #[test]
    fn whitespace_around_entries_is_ignored() {
        let cfg: TransportConfig = " name = t , buffers = 2 ".parse().unwrap();
        assert_eq!(cfg.name, "t");
        assert_eq!(cfg.buffers, 2);
    }
}
