// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration of the OS abstraction layer.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

const MIB: usize = 1024 * 1024;

/// Initial committed size of the program memory arena.
pub const DEFAULT_PROGRAM_MEMORY_SIZE: usize = 8 * MIB;

/// Per-thread scratch buffer size.
pub const DEFAULT_TEMPORARY_STORAGE_SIZE: usize = 2 * MIB;

/// Address space reserved up front so the arena can grow in place.
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_ADDRESS_SPACE_RESERVE: usize = 64 * 1024 * MIB;
/// Address space reserved up front so the arena can grow in place.
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_ADDRESS_SPACE_RESERVE: usize = 512 * MIB;

/// Preferred virtual base address of the arena.
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_PREFERRED_BASE: Option<usize> = Some(0x0000_0100_0000_0000);
/// Preferred virtual base address of the arena.
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_PREFERRED_BASE: Option<usize> = None;

/// How the platform C runtime is bound at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeLibraryPolicy {
    /// Startup fails if the runtime or one of its symbols is missing.
    Required,
    /// Bind whatever is available, fall back to Rust implementations otherwise.
    #[default]
    Optional,
    /// Never load the runtime.
    Disabled,
}

/// Startup configuration of the OS layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsConfig {
    /// Bytes committed in the program memory arena at startup.
    pub program_memory_size: usize,
    /// Bytes of address space reserved for the arena; bounds its growth.
    pub address_space_reserve: usize,
    /// Address hint for the arena. The OS may place it elsewhere.
    pub preferred_base: Option<usize>,
    /// Capacity of each thread's temporary storage.
    pub temporary_storage_size: usize,
    /// Binding policy for the C runtime capability table.
    pub runtime_library: RuntimeLibraryPolicy,
    /// Overrides the platform C runtime path, e.g. a musl libc.
    pub runtime_library_path: Option<String>,
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            program_memory_size: DEFAULT_PROGRAM_MEMORY_SIZE,
            address_space_reserve: DEFAULT_ADDRESS_SPACE_RESERVE,
            preferred_base: DEFAULT_PREFERRED_BASE,
            temporary_storage_size: DEFAULT_TEMPORARY_STORAGE_SIZE,
            runtime_library: RuntimeLibraryPolicy::default(),
            runtime_library_path: None,
        }
    }
}

impl OsConfig {
    /// Load configuration from a JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the values for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program_memory_size == 0 {
            return Err(ConfigError::Invalid {
                field: "program_memory_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.temporary_storage_size == 0 {
            return Err(ConfigError::Invalid {
                field: "temporary_storage_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.address_space_reserve < self.program_memory_size {
            return Err(ConfigError::Invalid {
                field: "address_space_reserve",
                reason: format!(
                    "{:#x} cannot hold the initial program memory of {:#x}",
                    self.address_space_reserve, self.program_memory_size
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        OsConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = OsConfig::from_json(r#"{ "program_memory_size": 1048576 }"#)
            .expect("partial config should parse");
        assert_eq!(config.program_memory_size, MIB);
        assert_eq!(config.temporary_storage_size, DEFAULT_TEMPORARY_STORAGE_SIZE);
        assert_eq!(config.runtime_library, RuntimeLibraryPolicy::Optional);
    }

    #[test]
    fn policy_uses_snake_case() {
        let config = OsConfig::from_json(r#"{ "runtime_library": "disabled" }"#)
            .expect("policy should parse");
        assert_eq!(config.runtime_library, RuntimeLibraryPolicy::Disabled);
    }

    #[test]
    fn runtime_library_path_defaults_to_platform() {
        assert_eq!(OsConfig::default().runtime_library_path, None);
        let config = OsConfig::from_json(r#"{ "runtime_library_path": "libc.musl-x86_64.so.1" }"#)
            .expect("path should parse");
        assert_eq!(
            config.runtime_library_path.as_deref(),
            Some("libc.musl-x86_64.so.1")
        );
    }

    #[test]
    fn reservation_smaller_than_program_memory_is_rejected() {
        let json = r#"{ "program_memory_size": 4096, "address_space_reserve": 1024 }"#;
        match OsConfig::from_json(json) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "address_space_reserve"),
            other => panic!("expected invalid reservation, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            OsConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn file_round_trip_preserves_values() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("osal.json");

        let config = OsConfig {
            program_memory_size: 16 * MIB,
            preferred_base: None,
            runtime_library: RuntimeLibraryPolicy::Required,
            ..OsConfig::default()
        };
        config.to_file(&path).expect("write config");

        let loaded = OsConfig::from_file(&path).expect("read config");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = OsConfig::from_file("/definitely/not/here/osal.json").unwrap_err();
        assert!(err.to_string().contains("osal.json"));
    }
}
