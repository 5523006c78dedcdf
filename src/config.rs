use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::Limits;
use crate::skill::archive::ArchiveLimits;
use crate::skill::installer::{DEFAULT_INSTALL_TIMEOUT, DEFAULT_MAX_ARCHIVE_BYTES, InstallOptions};
use crate::skill::resolver::{DEFAULT_REGISTRY_BASE, DEFAULT_VCS_BASE, ResolverConfig};
use crate::trust::{ScriptPolicy, secs};

const CONFIG_FILE: &str = "steward.yaml";

/// Main steward configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub registry: RegistryConfig,
    pub vcs: VcsConfig,
    pub install: InstallConfig,
    pub shell: ShellConfig,
    pub audit: AuditConfig,
    pub script: ScriptPolicy,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub agents: PathBuf,
    pub skills: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VcsConfig {
    /// Source-control host serving `<owner>/<repo>/archive/<ref>.zip`
    pub archive_base: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallConfig {
    #[serde(with = "secs")]
    pub timeout: Duration,
    pub max_archive_bytes: u64,
    pub max_entries: usize,
    pub max_unpacked_bytes: u64,
}

/// Limits for `!{cmd}` expansion in templates
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShellConfig {
    #[serde(with = "secs")]
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Upper bound on one append before it is abandoned with a warning
    #[serde(with = "secs")]
    pub append_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let steward_dir = Config::steward_dir();
        Self {
            agents: steward_dir.join("agents"),
            skills: steward_dir.join("skills"),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_BASE.to_string(),
        }
    }
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            archive_base: DEFAULT_VCS_BASE.to_string(),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        let limits = ArchiveLimits::default();
        Self {
            timeout: DEFAULT_INSTALL_TIMEOUT,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_entries: limits.max_entries,
            max_unpacked_bytes: limits.max_unpacked_bytes,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            timeout: limits.timeout,
            max_output_bytes: limits.max_output,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            append_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        if let Ok(env_path) = std::env::var("STEWARD_CONFIG") {
            let path = PathBuf::from(env_path);
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from STEWARD_CONFIG: {}", e);
                    }
                }
            }
        }

        if let Ok(steward_dir) = std::env::var("STEWARD_DIR") {
            let path = PathBuf::from(steward_dir).join(CONFIG_FILE);
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from STEWARD_DIR: {}", e);
                    }
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("steward").join(CONFIG_FILE);
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", path.display(), e);
                    }
                }
            }
        }

        // Try ./steward.yaml (for development)
        let local_config = PathBuf::from(CONFIG_FILE);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load local config: {}", e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Where a config file would be read from, first match in the chain
    pub fn source_path(config_path: Option<&PathBuf>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(path.clone());
        }
        let candidates = [
            std::env::var("STEWARD_CONFIG").ok().map(PathBuf::from),
            std::env::var("STEWARD_DIR").ok().map(|d| PathBuf::from(d).join(CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("steward").join(CONFIG_FILE)),
            Some(PathBuf::from(CONFIG_FILE)),
        ];
        candidates.into_iter().flatten().find(|p| p.exists())
    }

    /// Get the steward directory (agents and skills live here by default)
    pub fn steward_dir() -> PathBuf {
        std::env::var("STEWARD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("steward"))
    }

    /// Agents root: `STEWARD_AGENTS_DIR`, `$STEWARD_DIR/agents`, then the config
    pub fn agents_dir(&self) -> PathBuf {
        Self::root_override("STEWARD_AGENTS_DIR", "agents").unwrap_or_else(|| Self::expand_path(&self.paths.agents))
    }

    /// Skills root: `STEWARD_SKILLS_DIR`, `$STEWARD_DIR/skills`, then the config
    pub fn skills_dir(&self) -> PathBuf {
        Self::root_override("STEWARD_SKILLS_DIR", "skills").unwrap_or_else(|| Self::expand_path(&self.paths.skills))
    }

    fn root_override(var: &str, sub: &str) -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(var) {
            return Some(Self::expand_path(Path::new(&dir)));
        }
        std::env::var("STEWARD_DIR")
            .ok()
            .map(|dir| Self::expand_path(&PathBuf::from(dir).join(sub)))
    }

    /// Identity recorded as `created_by`
    pub fn creator() -> String {
        std::env::var("STEWARD_USER")
            .or_else(|_| std::env::var("USER"))
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            registry_base: self.registry.base_url.clone(),
            vcs_base: self.vcs.archive_base.clone(),
        }
    }

    pub fn shell_limits(&self) -> Limits {
        Limits {
            timeout: self.shell.timeout,
            max_output: self.shell.max_output_bytes,
        }
    }

    /// Install defaults before per-invocation flags are applied
    pub fn install_options(&self) -> InstallOptions {
        InstallOptions {
            timeout: self.install.timeout,
            max_archive_bytes: self.install.max_archive_bytes,
            limits: ArchiveLimits {
                max_entries: self.install.max_entries,
                max_unpacked_bytes: self.install.max_unpacked_bytes,
            },
            ..Default::default()
        }
    }

    /// Expand a path that may contain ~ or env vars
    pub fn expand_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let expanded = shellexpand::full(&path_str).unwrap_or_else(|_| path_str.clone());
        PathBuf::from(expanded.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.script.allow_scripts);
        assert_eq!(config.registry.base_url, DEFAULT_REGISTRY_BASE);
        assert_eq!(config.audit.append_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
paths:
  agents: /srv/agents
registry:
  base_url: https://skills.internal/registry
shell:
  timeout: 3
script:
  allow_scripts: true
  allowed_interpreters: [python3]
log_level: debug
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.paths.agents, PathBuf::from("/srv/agents"));
        assert_eq!(config.shell.timeout, Duration::from_secs(3));
        assert_eq!(config.shell.max_output_bytes, Limits::default().max_output);
        assert!(config.script.allow_scripts);
        assert!(!config.script.allows_interpreter("bash"));
        assert_eq!(config.log_level.to_filter(), log::LevelFilter::Debug);
        assert_eq!(config.resolver().registry_base, "https://skills.internal/registry");
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("custom.yaml");
        fs::write(&path, "install:\n  timeout: 7\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.install_options().timeout, Duration::from_secs(7));
        assert!(Config::load(Some(&temp.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_expand_path_no_expansion() {
        let path = PathBuf::from("/usr/local/bin");
        let expanded = Config::expand_path(&path);
        assert_eq!(expanded, PathBuf::from("/usr/local/bin"));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = Config::expand_path(&path);
        assert!(!expanded.to_string_lossy().contains('~'));
        assert!(expanded.to_string_lossy().contains("test"));
    }

    #[test]
    fn test_expand_path_with_env_var() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::set_var("STEWARD_TEST_EXPAND_VAR", "/custom/path");
        }
        let path = PathBuf::from("$STEWARD_TEST_EXPAND_VAR/subdir");
        let expanded = Config::expand_path(&path);
        assert_eq!(expanded, PathBuf::from("/custom/path/subdir"));
        unsafe {
            std::env::remove_var("STEWARD_TEST_EXPAND_VAR");
        }
    }
}
