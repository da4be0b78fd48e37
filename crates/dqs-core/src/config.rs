//! Runtime configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DqsError, Result};

/// Files consulted by [`RuntimeConfig::load`], first hit wins.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["/etc/dqs/dqs.toml", "/usr/lib/dqs/dqs.toml"];

/// Kernel node and device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path of the STARS control node.
    #[serde(default = "default_node")]
    pub node: String,

    /// Logical device id.
    #[serde(default)]
    pub device_id: u32,

    /// Task scheduler id (0 selects the P-class notify layout).
    #[serde(default)]
    pub ts_id: u32,
}

/// Function-call blob sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncCallConfig {
    /// Bytes reserved after the program for error read-back.
    #[serde(default = "default_dfx_size")]
    pub dfx_size: u64,

    /// Required alignment of the program start.
    #[serde(default = "default_instr_align")]
    pub instr_align: u64,
}

/// Completion-queue geometry accepted for ADSPC tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdspcLimits {
    /// Required CQE size in bytes.
    #[serde(default = "default_cqe_size")]
    pub cqe_size: u32,

    /// Required CQ depth.
    #[serde(default = "default_cq_depth")]
    pub cq_depth: u32,
}

/// Condition-copy limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCopyLimits {
    /// Largest copy in bytes.
    #[serde(default = "default_condition_copy_max")]
    pub max_bytes: u64,
}

/// Log filter used when `RUST_LOG` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive.
    #[serde(default = "default_filter")]
    pub filter: String,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Device section.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Function-call section.
    #[serde(default)]
    pub func_call: FuncCallConfig,
    /// ADSPC section.
    #[serde(default)]
    pub adspc: AdspcLimits,
    /// Condition-copy section.
    #[serde(default)]
    pub condition_copy: ConditionCopyLimits,
    /// Logging section.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_node() -> String {
    "/dev/stars_dqs".to_string()
}

fn default_dfx_size() -> u64 {
    64
}

fn default_instr_align() -> u64 {
    256
}

fn default_cqe_size() -> u32 {
    32
}

fn default_cq_depth() -> u32 {
    8
}

fn default_condition_copy_max() -> u64 {
    1 << 20
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            node: default_node(),
            device_id: 0,
            ts_id: 0,
        }
    }
}

impl Default for FuncCallConfig {
    fn default() -> Self {
        Self {
            dfx_size: default_dfx_size(),
            instr_align: default_instr_align(),
        }
    }
}

impl Default for AdspcLimits {
    fn default() -> Self {
        Self {
            cqe_size: default_cqe_size(),
            cq_depth: default_cq_depth(),
        }
    }
}

impl Default for ConditionCopyLimits {
    fn default() -> Self {
        Self {
            max_bytes: default_condition_copy_max(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DqsError::invalid(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DqsError::invalid(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from the first existing file in [`CONFIG_SEARCH_PATHS`], or defaults.
    pub fn load() -> Result<Self> {
        match find_config_file(CONFIG_SEARCH_PATHS) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading runtime config");
                Self::from_path(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject settings the launch path cannot honour.
    pub fn validate(&self) -> Result<()> {
        let align = self.func_call.instr_align;
        if align < 4 || !align.is_power_of_two() {
            return Err(DqsError::invalid(format!(
                "func_call.instr_align must be a power of two >= 4, got {align}"
            )));
        }
        if self.func_call.dfx_size < 16 {
            return Err(DqsError::invalid(format!(
                "func_call.dfx_size must be at least 16, got {}",
                self.func_call.dfx_size
            )));
        }
        if self.adspc.cq_depth == 0 || self.adspc.cqe_size == 0 {
            return Err(DqsError::invalid("adspc limits must be non-zero"));
        }
        Ok(())
    }
}

fn find_config_file(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.device.node, "/dev/stars_dqs");
        assert_eq!(config.func_call.instr_align, 256);
        assert_eq!(config.adspc.cqe_size, 32);
        assert_eq!(config.adspc.cq_depth, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [device]
            ts_id = 1
            device_id = 2

            [condition_copy]
            max_bytes = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.device.ts_id, 1);
        assert_eq!(config.device.device_id, 2);
        assert_eq!(config.device.node, "/dev/stars_dqs");
        assert_eq!(config.condition_copy.max_bytes, 4096);
        assert_eq!(config.func_call.dfx_size, 64);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(RuntimeConfig::from_toml_str("").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_rejects_bad_alignment() {
        let err = RuntimeConfig::from_toml_str("[func_call]\ninstr_align = 100\n").unwrap_err();
        assert!(err.to_string().contains("instr_align"));
    }

    #[test]
    fn test_rejects_small_dfx() {
        assert!(RuntimeConfig::from_toml_str("[func_call]\ndfx_size = 8\n").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(RuntimeConfig::from_toml_str("device = 3").is_err());
    }

    #[test]
    fn test_from_path_roundtrip() {
        let dir = std::env::temp_dir().join(format!("dqs-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dqs.toml");
        let mut config = RuntimeConfig::default();
        config.adspc.cq_depth = 16;
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
        assert_eq!(RuntimeConfig::from_path(&path).unwrap(), config);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_find_config_file_skips_missing() {
        assert!(find_config_file(&["/nonexistent/dqs.toml"]).is_none());
    }
}
