//! Loads a node's identity and role assignment from a TOML configuration
//! file, the way the reference's `configurations` module loaded per-role
//! UDP socket addresses — generalized here to the group/role shape this
//! crate actually needs.
use serde::Deserialize;

use config::{Config, File};

/// One node's local configuration: which consensus group it belongs to,
/// how large that group is, which roles it runs, and how long a `propose`
/// call should wait before giving up.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub group_id: i128,
    pub cluster_size: usize,

    #[serde(default)]
    pub proposer: bool,
    #[serde(default)]
    pub acceptor: bool,
    #[serde(default)]
    pub learner: bool,

    #[serde(default = "default_propose_timeout_secs")]
    pub propose_timeout_secs: u64,
}

fn default_propose_timeout_secs() -> u64 {
    5
}

impl NodeConfig {
    /// Reads `file_name` (extension-less, as the `config` crate expects,
    /// e.g. `"Config"` for `Config.toml`) and deserializes it into a
    /// [`NodeConfig`].
    pub fn load(file_name: &str) -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(File::with_name(file_name))
            .build()?
            .try_deserialize()
    }

    pub fn propose_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.propose_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_propose_timeout_is_five_seconds_when_unset() {
        let cfg = NodeConfig {
            group_id: 1,
            cluster_size: 3,
            proposer: true,
            acceptor: false,
            learner: false,
            propose_timeout_secs: default_propose_timeout_secs(),
        };
        assert_eq!(cfg.propose_timeout(), std::time::Duration::from_secs(5));
    }
}
