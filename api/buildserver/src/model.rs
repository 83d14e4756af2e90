//! The HomestakerOS configuration the build server accepts.  Unknown fields anywhere in the
//! document are rejected, so a typo in a submitted form fails before anything is built.

use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::BTreeMap;

use crate::server::error::{self, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addons: Option<Addons>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<Consensus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<Execution>,
    pub localization: Localization,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mounts: Option<BTreeMap<String, Mount>>,
    pub ssh: Ssh,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpn: Option<Vpn>,
}

impl Config {
    /// Checks the fields a bootable host can't do without.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.localization.hostname.trim().is_empty(),
            error::EmptyHostnameSnafu
        );
        // The hostname names a directory in the build workspace.
        let hostname = &self.localization.hostname;
        ensure!(
            hostname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-'),
            error::InvalidHostnameSnafu { hostname }
        );
        ensure!(
            !self.ssh.authorized_keys.is_empty(),
            error::NoAuthorizedKeysSnafu
        );
        ensure!(
            self.ssh
                .authorized_keys
                .iter()
                .all(|key| !key.trim().is_empty()),
            error::EmptyAuthorizedKeySnafu
        );
        Ok(())
    }

    pub fn hostname(&self) -> &str {
        &self.localization.hostname
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Addons {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mev_boost: Option<MevBoost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssv_node: Option<SsvNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MevBoost {
    pub enable: bool,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SsvNode {
    pub data_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_password_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Consensus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighthouse: Option<Lighthouse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nimbus: Option<ConsensusClient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prysm: Option<Prysm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teku: Option<ConsensusClient>,
}

/// Settings shared by every consensus client without a slasher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConsensusClient {
    pub data_dir: String,
    pub enable: bool,
    pub endpoint: String,
    pub exec_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Lighthouse {
    pub data_dir: String,
    pub enable: bool,
    pub endpoint: String,
    pub exec_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slasher: Option<LighthouseSlasher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LighthouseSlasher {
    pub enable: bool,
    pub history_length: i32,
    pub max_database_size: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Prysm {
    pub data_dir: String,
    pub enable: bool,
    pub endpoint: String,
    pub exec_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slasher: Option<PrysmSlasher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrysmSlasher {
    pub enable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Execution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub besu: Option<ExecutionClient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erigon: Option<ExecutionClient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geth: Option<ExecutionClient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nethermind: Option<ExecutionClient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ExecutionClient {
    pub data_dir: String,
    pub enable: bool,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Localization {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// A systemd mount unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Mount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub what: String,
    #[serde(rename = "where")]
    pub mount_point: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wanted_by: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wants: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_by: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binds_to: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_of: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_limit_interval_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_limit_burst: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Ssh {
    pub authorized_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vpn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wireguard: Option<Wireguard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Wireguard {
    pub config_file: String,
    pub enable: bool,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::error::Error;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "localization": { "hostname": "ponkila-1", "timezone": null },
            "ssh": { "authorizedKeys": ["ssh-ed25519 AAAA"], "privateKeyFile": null },
            "mounts": {
                "my-mount": {
                    "description": "A storage device",
                    "enable": true,
                    "type": "btrfs",
                    "what": "/dev/disk/by-label/homestaker",
                    "where": "/var/mnt/my-mount"
                }
            },
            "addons": { "mev-boost": { "enable": false, "endpoint": "http://127.0.0.1:18550" } }
        })
    }

    #[test]
    fn parses_and_drops_nulls() {
        let config: Config = serde_json::from_value(minimal()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.hostname(), "ponkila-1");
        let mount = &config.mounts.as_ref().unwrap()["my-mount"];
        assert_eq!(mount.mount_type, "btrfs");
        assert_eq!(mount.mount_point, "/var/mnt/my-mount");

        let reserialized = serde_json::to_value(&config).unwrap();
        assert!(reserialized["localization"].get("timezone").is_none());
        assert_eq!(reserialized["mounts"]["my-mount"]["where"], json!("/var/mnt/my-mount"));
        assert_eq!(reserialized["addons"]["mev-boost"]["enable"], json!(false));
    }

    #[test]
    fn unknown_fields_rejected() {
        let mut doc = minimal();
        doc["ssh"]["authorisedKeys"] = json!([]);
        assert!(serde_json::from_value::<Config>(doc).is_err());

        let mut doc = minimal();
        doc["telemetry"] = json!({ "enable": true });
        assert!(serde_json::from_value::<Config>(doc).is_err());
    }

    #[test]
    fn validation() {
        let mut doc = minimal();
        doc["localization"]["hostname"] = json!("  ");
        let config: Config = serde_json::from_value(doc).unwrap();
        assert!(matches!(config.validate(), Err(Error::EmptyHostname)));

        let mut doc = minimal();
        doc["localization"]["hostname"] = json!("../etc");
        let config: Config = serde_json::from_value(doc).unwrap();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidHostname { .. })
        ));

        let mut doc = minimal();
        doc["ssh"]["authorizedKeys"] = json!([]);
        let config: Config = serde_json::from_value(doc).unwrap();
        assert!(matches!(config.validate(), Err(Error::NoAuthorizedKeys)));

        let mut doc = minimal();
        doc["ssh"]["authorizedKeys"] = json!(["ssh-ed25519 AAAA", ""]);
        let config: Config = serde_json::from_value(doc).unwrap();
        assert!(matches!(config.validate(), Err(Error::EmptyAuthorizedKey)));
    }
}
