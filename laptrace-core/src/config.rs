// Copyright 2025 Laptrace (https://github.com/laptrace)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration
//!
//! TOML-backed settings for the cache endpoint and the per-OS,
//! per-program storage roots:
//!
//! ```toml
//! [cache]
//! host = "10.12.0.5"
//! port = 6379
//!
//! [cache.databases]
//! endurance = 0
//! sprint = 1
//!
//! [storage.roots.linux]
//! endurance = "/mnt/telemetry/endurance"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LaptraceError, Result};
use crate::types::Program;

/// Default cache connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Cache store endpoint and program-to-database mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Program name to cache database index.
    #[serde(default)]
    pub databases: HashMap<String, u32>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            databases: HashMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_database(mut self, program: impl Into<String>, index: u32) -> Self {
        self.databases.insert(program.into(), index);
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn db_index(&self, program: &Program) -> Result<u32> {
        self.databases.get(program.as_str()).copied().ok_or_else(|| {
            LaptraceError::Configuration(format!(
                "no cache database mapped for program '{program}'"
            ))
        })
    }
}

/// Storage roots, keyed by OS name then program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub roots: HashMap<String, HashMap<String, PathBuf>>,
    /// Directory under a run holding the computed data types.
    #[serde(default = "default_computed_dir")]
    pub computed_dir: String,
}

fn default_computed_dir() -> String {
    "computed_data".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            roots: HashMap::new(),
            computed_dir: default_computed_dir(),
        }
    }
}

impl StorageSettings {
    pub fn with_root(
        mut self,
        os: impl Into<String>,
        program: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        self.roots
            .entry(os.into())
            .or_default()
            .insert(program.into(), root.into());
        self
    }

    /// Root for the current OS and the given program. The root must be
    /// a present directory, otherwise the share is considered
    /// unmounted.
    pub fn resolve_root(&self, program: &Program) -> Result<PathBuf> {
        let os = std::env::consts::OS;
        let per_os = self.roots.get(os).ok_or_else(|| {
            LaptraceError::Configuration(format!("no storage roots configured for os '{os}'"))
        })?;
        let root = per_os.get(program.as_str()).ok_or_else(|| {
            LaptraceError::Configuration(format!(
                "no storage root configured for program '{program}' on os '{os}'"
            ))
        })?;
        if !root.is_dir() {
            return Err(LaptraceError::Configuration(format!(
                "storage root '{}' for program '{program}' is not mounted",
                root.display()
            )));
        }
        Ok(root.clone())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| LaptraceError::Configuration(format!("invalid configuration: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LaptraceError::Configuration(format!(
                "cannot read configuration '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.addr(), "127.0.0.1:6379");
        assert_eq!(config.storage.computed_dir, "computed_data");
    }

    #[test]
    fn test_parse_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [cache]
            host = "10.12.0.5"

            [cache.databases]
            endurance = 2

            [storage.roots.linux]
            endurance = "/mnt/telemetry/endurance"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.addr(), "10.12.0.5:6379");
        assert_eq!(config.cache.db_index(&Program::new("endurance")).unwrap(), 2);
        assert!(config.cache.db_index(&Program::new("sprint")).is_err());
    }

    #[test]
    fn test_resolve_root_requires_mounted_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageSettings::default()
            .with_root(std::env::consts::OS, "endurance", dir.path())
            .with_root(std::env::consts::OS, "sprint", dir.path().join("absent"));

        let endurance = storage.resolve_root(&Program::new("endurance")).unwrap();
        assert_eq!(endurance, dir.path());

        assert!(matches!(
            storage.resolve_root(&Program::new("sprint")),
            Err(LaptraceError::Configuration(_))
        ));
        assert!(matches!(
            storage.resolve_root(&Program::new("rally")),
            Err(LaptraceError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("cache = 3"),
            Err(LaptraceError::Configuration(_))
        ));
    }
}
