//! Reads the documents a HomestakerOS flake publishes: the options schema, the list of hosts, each
//! host's configuration and its build results.
//!
//! Every public fetch degrades to an empty or absent value on failure; the `try_` variants return
//! the underlying error.

use formschema::{Schema, UnknownTypes};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::{ensure, ResultExt};

use crate::error::{self, Result};

/// Raw file host for flakes kept on GitHub.
pub const GITHUB_RAW_BASE: &str = "https://raw.githubusercontent.com";
const GITHUB_BRANCH: &str = "main";

const SCHEMA_PATH: &str = "nixosModules/homestakeros/options.json";
const CONFIGURATIONS_DIR: &str = "nixosConfigurations";
const HOSTNAMES_FILE: &str = "hostnames.json";
const HOST_CONFIG_FILE: &str = "default.json";
const RESULT_DIR: &str = "result";
const SSV_KEY_FILE: &str = "ssv_operator_key.pub";

pub const INITRD: &str = "initrd.zst";
pub const KERNEL: &str = "bzImage";
pub const KEXEC_SCRIPT: &str = "kexec-boot";

/// A flake reachable over HTTP, addressed by its base URL.
#[derive(Debug, Clone)]
pub struct FlakeRepository {
    base: String,
    client: Client,
    unknown_types: UnknownTypes,
}

impl FlakeRepository {
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self::with_client(base, Client::new())
    }

    pub fn with_client<S: Into<String>>(base: S, client: Client) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            unknown_types: UnknownTypes::Reject,
        }
    }

    /// A flake kept in the `main` branch of a GitHub repository.
    pub fn from_github(owner: &str, repo: &str) -> Self {
        Self::new(format!(
            "{}/{}/{}/{}",
            GITHUB_RAW_BASE, owner, repo, GITHUB_BRANCH
        ))
    }

    /// Drop schema leaves of unknown type instead of refusing the whole schema.
    pub fn lenient(mut self) -> Self {
        self.unknown_types = UnknownTypes::Skip;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn host_url(&self, host: &str, file: &str) -> String {
        self.url(&format!("{}/{}/{}", CONFIGURATIONS_DIR, host, file))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context(error::RequestSnafu { url })?;
        ensure!(
            response.status().is_success(),
            error::ResponseStatusSnafu {
                url,
                status: response.status().as_u16(),
            }
        );
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get(url)
            .await?
            .json()
            .await
            .context(error::ResponseBodySnafu { url })
    }

    pub async fn try_fetch_schema(&self) -> Result<Schema> {
        let url = self.url(SCHEMA_PATH);
        let document: Value = self.get_json(&url).await?;
        Schema::from_value_with(&document, self.unknown_types).context(error::LoadSchemaSnafu { url })
    }

    /// The options schema, or None when it can't be fetched or understood.
    pub async fn fetch_schema(&self) -> Option<Schema> {
        self.try_fetch_schema()
            .await
            .map_err(|e| warn!("Could not load schema from '{}': {}", self.base, e))
            .ok()
    }

    pub async fn try_fetch_hostnames(&self) -> Result<Vec<String>> {
        let url = self.url(&format!("{}/{}", CONFIGURATIONS_DIR, HOSTNAMES_FILE));
        self.get_json(&url).await
    }

    pub async fn fetch_hostnames(&self) -> Vec<String> {
        self.try_fetch_hostnames()
            .await
            .map_err(|e| warn!("Could not load hostnames from '{}': {}", self.base, e))
            .unwrap_or_default()
    }

    pub async fn try_fetch_host_config(&self, host: &str) -> Result<Value> {
        self.get_json(&self.host_url(host, HOST_CONFIG_FILE)).await
    }

    pub async fn fetch_host_config(&self, host: &str) -> Option<Value> {
        self.try_fetch_host_config(host)
            .await
            .map_err(|e| debug!("No configuration for '{}': {}", host, e))
            .ok()
    }

    /// Configuration documents of every listed host that has one, in hostname order.
    pub async fn fetch_nodes(&self) -> Vec<Value> {
        let hostnames = self.fetch_hostnames().await;
        join_all(hostnames.iter().map(|host| self.fetch_host_config(host)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Whether a build result file exists for the host.  Only a 200 counts.
    pub async fn probe_artifact(&self, host: &str, file: &str) -> bool {
        let url = self.host_url(host, &format!("{}/{}", RESULT_DIR, file));
        match self.client.head(&url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("HEAD '{}' failed: {}", url, e);
                false
            }
        }
    }

    pub async fn probe_artifacts(&self, host: &str) -> ArtifactPresence {
        let (initrd, kernel, kexec) = tokio::join!(
            self.probe_artifact(host, INITRD),
            self.probe_artifact(host, KERNEL),
            self.probe_artifact(host, KEXEC_SCRIPT),
        );
        ArtifactPresence {
            initrd,
            kernel,
            kexec,
        }
    }

    pub async fn fetch_ssv_key(&self, host: &str) -> Option<String> {
        let url = self.host_url(host, SSV_KEY_FILE);
        let response = self
            .get(&url)
            .await
            .map_err(|e| debug!("No SSV operator key for '{}': {}", host, e))
            .ok()?;
        response.text().await.ok()
    }
}

/// Which boot files a host's last build produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPresence {
    pub initrd: bool,
    pub kernel: bool,
    pub kexec: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn github_base() {
        let flake = FlakeRepository::from_github("ponkila", "HomestakerOS");
        assert_eq!(
            flake.base(),
            "https://raw.githubusercontent.com/ponkila/HomestakerOS/main"
        );
    }

    #[test]
    fn trailing_slash_trimmed() {
        let flake = FlakeRepository::new("http://localhost:8080/");
        assert_eq!(
            flake.host_url("ponkila-1", HOST_CONFIG_FILE),
            "http://localhost:8080/nixosConfigurations/ponkila-1/default.json"
        );
    }
}
