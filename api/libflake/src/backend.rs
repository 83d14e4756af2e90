//! Client for the build backend.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::fmt;

use crate::error::{self, Result};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8081";

/// Key under which the backend URL is kept in the page fragment.
const FRAGMENT_KEY: &str = "backendUrl";
const FRAGMENT_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'&')
    .add(b'#')
    .add(b'%')
    .add(b'+');

const LIVENESS_PATH: &str = "api";
const CONFIGURATION_PATH: &str = "nixosConfig";
const STATUS_OK: &str = "ok";

/// Where the build backend lives.  User-configurable; kept in the URL fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl(String);

impl BackendUrl {
    pub fn new<S: AsRef<str>>(url: S) -> Self {
        Self(url.as_ref().trim_end_matches('/').to_string())
    }

    /// Reads `backendUrl=<url>` from a fragment such as `#backendUrl=http%3A%2F%2Fhost%3A8081`,
    /// falling back to the default when it's absent or empty.
    pub fn from_fragment(fragment: &str) -> Self {
        fragment
            .trim_start_matches('#')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == FRAGMENT_KEY)
            .map(|(_, value)| {
                percent_decode_str(&value.replace('+', " "))
                    .decode_utf8_lossy()
                    .into_owned()
            })
            .filter(|url| !url.is_empty())
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn to_fragment(&self) -> String {
        format!(
            "{}={}",
            FRAGMENT_KEY,
            utf8_percent_encode(&self.0, FRAGMENT_ENCODE)
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl Default for BackendUrl {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL)
    }
}

impl fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One downloadable build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub file: String,
    pub download_url: String,
    pub sha256: String,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    status: Option<String>,
    artifacts: Option<Vec<Artifact>>,
}

#[derive(Debug, Clone)]
pub struct Backend {
    url: BackendUrl,
    client: Client,
}

impl Backend {
    pub fn new(url: BackendUrl) -> Self {
        Self::with_client(url, Client::new())
    }

    pub fn with_client(url: BackendUrl, client: Client) -> Self {
        Self { url, client }
    }

    pub fn url(&self) -> &BackendUrl {
        &self.url
    }

    /// Any 2xx from the liveness endpoint means builds are possible; anything else means the
    /// front end runs in demo mode.
    pub async fn is_available(&self) -> bool {
        let url = self.url.join(LIVENESS_PATH);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                info!("Backend at '{}' unavailable: {}", self.url, e);
                false
            }
        }
    }

    /// Sends a configuration document to be built and returns its artifacts, with download URLs
    /// made absolute.
    pub async fn submit_configuration(&self, document: &Value) -> Result<Vec<Artifact>> {
        let url = self.url.join(CONFIGURATION_PATH);
        let response = self
            .client
            .post(&url)
            .json(document)
            .send()
            .await
            .context(error::RequestSnafu { url: url.as_str() })?;
        let status = response.status();
        ensure!(
            status.is_success(),
            error::ResponseStatusSnafu {
                url: url.as_str(),
                status: status.as_u16(),
            }
        );

        let body: BuildResponse = response
            .json()
            .await
            .context(error::ResponseBodySnafu { url: url.as_str() })?;
        ensure!(
            body.status.as_deref() == Some(STATUS_OK),
            error::NoArtifactsSnafu
        );
        let artifacts = body.artifacts.context(error::NoArtifactsSnafu)?;
        debug!("Build at '{}' produced {} artifacts", url, artifacts.len());

        Ok(artifacts
            .into_iter()
            .map(|artifact| Artifact {
                download_url: format!("{}{}", self.url, artifact.download_url),
                ..artifact
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fragment_default() {
        assert_eq!(BackendUrl::from_fragment(""), BackendUrl::default());
        assert_eq!(BackendUrl::from_fragment("#other=1"), BackendUrl::default());
        assert_eq!(BackendUrl::from_fragment("#backendUrl="), BackendUrl::default());
        assert_eq!(BackendUrl::default().as_str(), "http://localhost:8081");
    }

    #[test]
    fn fragment_plain_and_encoded() {
        assert_eq!(
            BackendUrl::from_fragment("#backendUrl=http://10.0.0.5:8081").as_str(),
            "http://10.0.0.5:8081"
        );
        assert_eq!(
            BackendUrl::from_fragment("foo=bar&backendUrl=http%3A%2F%2Fbuild.local%2F").as_str(),
            "http://build.local"
        );
    }

    #[test]
    fn fragment_survives_rendering() {
        let url = BackendUrl::new("http://build.local:8081/prefix?a=b&c=d");
        assert_eq!(BackendUrl::from_fragment(&url.to_fragment()), url);
    }
}
