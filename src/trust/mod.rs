//! Trust policy for skills
//!
//! Two pure lookups: [`classify`] maps provenance to a [`TrustLevel`] and
//! [`decide`] maps a level plus a [`Capability`] to a [`Decision`]. Neither
//! performs anything; callers enforce the result through [`enforce`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gate::Approval;

/// Where a skill came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TrustSource {
    /// Written by hand in the skills root
    LocalAuthored,
    /// Imported from a local directory or archive
    LocalInstalled,
    /// First-party registry
    Registry,
    /// Public source-control archive
    Vcs,
    /// Arbitrary download URL
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Untrusted,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    RunScripts,
    Network,
    FilesystemWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Allow,
    AllowWithConfirmation,
    DenyUnlessOptIn,
}

impl TrustSource {
    pub const ALL: [TrustSource; 5] = [
        TrustSource::LocalAuthored,
        TrustSource::LocalInstalled,
        TrustSource::Registry,
        TrustSource::Vcs,
        TrustSource::Url,
    ];
}

impl TrustLevel {
    pub const ALL: [TrustLevel; 4] = [TrustLevel::High, TrustLevel::Medium, TrustLevel::Low, TrustLevel::Untrusted];
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::RunScripts, Capability::Network, Capability::FilesystemWrite];
}

impl fmt::Display for TrustSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrustSource::LocalAuthored => "local-authored",
            TrustSource::LocalInstalled => "local-installed",
            TrustSource::Registry => "registry",
            TrustSource::Vcs => "vcs",
            TrustSource::Url => "url",
        };
        f.write_str(s)
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrustLevel::High => "high",
            TrustLevel::Medium => "medium",
            TrustLevel::Low => "low",
            TrustLevel::Untrusted => "untrusted",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::RunScripts => "run-scripts",
            Capability::Network => "network",
            Capability::FilesystemWrite => "filesystem-write",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Allow => "allow",
            Decision::AllowWithConfirmation => "allow-with-confirmation",
            Decision::DenyUnlessOptIn => "deny-unless-opt-in",
        };
        f.write_str(s)
    }
}

pub fn classify(source: TrustSource) -> TrustLevel {
    match source {
        TrustSource::LocalAuthored => TrustLevel::High,
        TrustSource::LocalInstalled | TrustSource::Registry => TrustLevel::Medium,
        TrustSource::Vcs => TrustLevel::Low,
        TrustSource::Url => TrustLevel::Untrusted,
    }
}

pub fn decide(level: TrustLevel, capability: Capability) -> Decision {
    use Capability::*;
    use Decision::*;
    use TrustLevel::*;

    match (capability, level) {
        (RunScripts, High) => Allow,
        (RunScripts, Medium) => AllowWithConfirmation,
        (RunScripts, Low | Untrusted) => DenyUnlessOptIn,

        (Network, High) => Allow,
        (Network, Medium | Low) => AllowWithConfirmation,
        (Network, Untrusted) => DenyUnlessOptIn,

        (FilesystemWrite, High | Medium) => Allow,
        (FilesystemWrite, Low) => AllowWithConfirmation,
        (FilesystemWrite, Untrusted) => DenyUnlessOptIn,
    }
}

/// Apply a decision: confirm through the approval gate or require opt-in
pub fn enforce(decision: Decision, subject: &str, capability: Capability, approval: &Approval, opted_in: bool) -> Result<()> {
    match decision {
        Decision::Allow => Ok(()),
        Decision::AllowWithConfirmation => approval.check(&capability.to_string(), subject),
        Decision::DenyUnlessOptIn if opted_in => {
            log::info!("{} for {} allowed by explicit opt-in", capability, subject);
            approval.check(&capability.to_string(), subject)
        }
        Decision::DenyUnlessOptIn => Err(Error::denied(
            format!("{}: {}", capability, subject),
            "denied by trust policy; requires explicit opt-in",
        )),
    }
}

/// Limits and opt-ins governing skill script execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptPolicy {
    /// Scripts never run unless this is set
    pub allow_scripts: bool,
    /// Interpreter basenames a script may use
    pub allowed_interpreters: Vec<String>,
    #[serde(with = "secs")]
    pub timeout: Duration,
    pub max_output_bytes: usize,
    /// Exported to the script as `STEWARD_ALLOW_NETWORK`
    pub allow_network: bool,
    /// Exported to the script as `STEWARD_ALLOW_FS_WRITE`
    pub allow_fs_write: bool,
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self {
            allow_scripts: false,
            allowed_interpreters: ["bash", "sh", "python3", "node"].iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
            allow_network: false,
            allow_fs_write: false,
        }
    }
}

impl ScriptPolicy {
    pub fn allows_interpreter(&self, interpreter: &str) -> bool {
        self.allowed_interpreters.iter().any(|i| i == interpreter)
    }
}

/// Durations as whole seconds in config files
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
