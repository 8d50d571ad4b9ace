// config.rs — Ledger configuration.
//
// LedgerConfig determines where Provenant keeps its state (provenance
// records, the signing key, agent baselines) and how the engines behave.
// `for_project()` lays everything out under a `.provenant/` directory in the
// project root; `.provenant/provenant.toml` overrides any subset of it.
//
// ```toml
// [storage]
// backend = "jsonl"
//
// [policy]
// preset = "STRICT_ENTERPRISE"
//
// [risk]
// exfiltration_window = 8
//
// [logging]
// level = "debug"
// json = true
// ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use pv_chain::RetryPolicy;
use pv_policy::{Policy, PolicyPreset};
use pv_risk::RiskConfig;

use crate::error::CoreError;

/// Directory under the project root holding all ledger state.
pub const LEDGER_DIR: &str = ".provenant";

/// Config file name inside `LEDGER_DIR`.
pub const CONFIG_FILE: &str = "provenant.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-process only; records vanish with the process.
    Memory,
    /// One JSON-Lines file per session.
    #[default]
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub records_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Jsonl,
            records_dir: PathBuf::from(LEDGER_DIR).join("records"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Sign every record with the machine-local Ed25519 key.
    pub enabled: bool,
    /// PKCS#8 key file, created on first use.
    pub key_path: PathBuf,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_path: PathBuf::from(LEDGER_DIR).join("signing.key"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Built-in preset name, used when `file` is unset.
    pub preset: PolicyPreset,
    /// YAML policy file; takes precedence over `preset`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            preset: PolicyPreset::Balanced,
            file: None,
        }
    }
}

impl PolicyConfig {
    /// Load the configured policy.
    pub fn resolve(&self) -> Result<Policy, CoreError> {
        match &self.file {
            Some(path) => Ok(Policy::load(path)?),
            None => Ok(self.preset.policy()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for Provenant crates; `RUST_LOG` still applies on top.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub storage: StorageConfig,
    pub signing: SigningConfig,
    pub retry: RetryPolicy,
    pub policy: PolicyConfig,
    pub risk: RiskConfig,
    /// Stored agent baselines; computed from the chain when absent.
    pub baselines_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            signing: SigningConfig::default(),
            retry: RetryPolicy::default(),
            policy: PolicyConfig::default(),
            risk: RiskConfig::default(),
            baselines_dir: Some(PathBuf::from(LEDGER_DIR).join("baselines")),
            logging: LoggingConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Create a config with the standard `.provenant/` layout for a project.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self::default().rooted_at(project_root)
    }

    /// Parse a TOML config file. Relative paths stay relative.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// `.provenant/provenant.toml` if present, otherwise the defaults; paths
    /// resolved against the project root either way.
    pub fn load_for_project(project_root: impl AsRef<Path>) -> Result<Self, CoreError> {
        let root = project_root.as_ref();
        let file = root.join(LEDGER_DIR).join(CONFIG_FILE);
        if file.exists() {
            Ok(Self::load(&file)?.rooted_at(root))
        } else {
            Ok(Self::for_project(root))
        }
    }

    /// Resolve relative paths against `root`.
    pub fn rooted_at(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        resolve(&mut self.storage.records_dir);
        resolve(&mut self.signing.key_path);
        if let Some(dir) = self.baselines_dir.as_mut() {
            resolve(dir);
        }
        if let Some(file) = self.policy.file.as_mut() {
            resolve(file);
        }
        self
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_project_uses_ledger_dir() {
        let config = LedgerConfig::for_project("/work/app");
        assert_eq!(config.storage.records_dir, PathBuf::from("/work/app/.provenant/records"));
        assert_eq!(config.signing.key_path, PathBuf::from("/work/app/.provenant/signing.key"));
        assert_eq!(
            config.baselines_dir,
            Some(PathBuf::from("/work/app/.provenant/baselines"))
        );
        assert_eq!(config.storage.backend, StorageBackend::Jsonl);
        assert_eq!(config.policy.preset, PolicyPreset::Balanced);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
[policy]
preset = "STRICT_ENTERPRISE"

[risk]
exfiltration_window = 8

[risk.weights]
data_exfiltration = 80.0

[retry]
max_attempts = 5

[logging]
json = true
"#;
        let config: LedgerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.policy.preset, PolicyPreset::StrictEnterprise);
        assert_eq!(config.risk.exfiltration_window, 8);
        assert_eq!(config.risk.weights.data_exfiltration, 80.0);
        assert_eq!(config.risk.weights.privilege_escalation, 45.0);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert!(config.signing.enabled);
    }

    #[test]
    fn load_for_project_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(LEDGER_DIR)).unwrap();
        std::fs::write(
            dir.path().join(LEDGER_DIR).join(CONFIG_FILE),
            "[storage]\nrecords_dir = \"audit/records\"\n\n[policy]\nfile = \"policy.yaml\"\n",
        )
        .unwrap();
        let config = LedgerConfig::load_for_project(dir.path()).unwrap();
        assert_eq!(config.storage.records_dir, dir.path().join("audit/records"));
        assert_eq!(config.policy.file, Some(dir.path().join("policy.yaml")));
        assert_eq!(config.signing.key_path, dir.path().join(".provenant/signing.key"));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::load_for_project(dir.path()).unwrap();
        assert_eq!(config, LedgerConfig::for_project(dir.path()));
    }

    #[test]
    fn policy_file_takes_precedence_over_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, "name: custom\nrules: []\n").unwrap();
        let config = PolicyConfig {
            preset: PolicyPreset::DevSandbox,
            file: Some(path),
        };
        assert_eq!(config.resolve().unwrap().name, "custom");
        assert_eq!(
            PolicyConfig::default().resolve().unwrap().name,
            "BALANCED"
        );
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[storage\nbackend = ").unwrap();
        assert!(matches!(LedgerConfig::load(&path), Err(CoreError::ConfigParse(_))));
    }
}
