//! Configuration for the texture-sample code generator

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, UspError};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub codegen: CodegenConfig,
    pub limits: LimitsConfig,
    pub debug: DebugConfig,
}

/// Hardware target selection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TargetConfig {
    pub core: CoreKind,
}

/// SGX core revision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CoreKind {
    Sgx530,
    Sgx540,
    #[default]
    Sgx543,
    Sgx544,
    Sgx545,
    Sgx554,
}

impl CoreKind {
    /// Cores with the vector (Vec34) USSE
    pub fn is_vec34(self) -> bool {
        matches!(self, Self::Sgx543 | Self::Sgx544 | Self::Sgx554)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sgx530 => "sgx530",
            Self::Sgx540 => "sgx540",
            Self::Sgx543 => "sgx543",
            Self::Sgx544 => "sgx544",
            Self::Sgx545 => "sgx545",
            Self::Sgx554 => "sgx554",
        }
    }
}

/// Code generation switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Let fetches write straight into the destination when possible
    pub direct_sampling: bool,
    /// Merge channel conversions into shared unpack instructions
    pub merge_unpack: bool,
    /// Use the fixed hardware swizzle unit where the core has one
    pub hw_swizzle: bool,
    /// Let the TAG convert to F16/F32 during the fetch
    pub tag_conversion: bool,
    /// Texture state words are in memory rather than secondary attributes
    pub tex_state_in_memory: bool,
}

/// Resource limits applied on top of the core's own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Primary attributes reserved for shader results
    pub reserved_pa_regs: u32,
    /// Lower the iterator slot cap below the hardware's
    pub max_iterators: Option<u32>,
    /// Temporary registers available to one sample
    pub max_sample_temps: u32,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub dump_instructions: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            direct_sampling: true,
            merge_unpack: true,
            hw_swizzle: true,
            tag_conversion: true,
            tex_state_in_memory: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            reserved_pa_regs: 0,
            max_iterators: None,
            max_sample_temps: 32,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            dump_instructions: false,
        }
    }
}

impl Config {
    /// Load configuration from the default path, or the defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| UspError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| UspError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("uspgen")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.target.core, CoreKind::Sgx543);
        assert!(config.codegen.direct_sampling);
        assert!(config.codegen.merge_unpack);
        assert!(!config.codegen.tex_state_in_memory);
        assert_eq!(config.limits.max_iterators, None);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.target.core, config.target.core);
        assert_eq!(parsed.limits.max_sample_temps, config.limits.max_sample_temps);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_toml(
            r#"
            [target]
            core = "sgx530"

            [codegen]
            hw_swizzle = false
            "#,
        )
        .unwrap();
        assert_eq!(config.target.core, CoreKind::Sgx530);
        assert!(!config.codegen.hw_swizzle);
        assert!(config.codegen.tag_conversion);
    }

    #[test]
    fn test_bad_config() {
        let err = Config::from_toml("[target]\ncore = 12").unwrap_err();
        assert!(matches!(err, UspError::Config(_)));
    }
}
