use snafu::Snafu;

/// Potential errors from talking to a flake repository or a build backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to request '{}': {}", url, source))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("HTTP error! Status: {}", status))]
    ResponseStatus { url: String, status: u16 },

    #[snafu(display("Failed to read response body from '{}': {}", url, source))]
    ResponseBody { url: String, source: reqwest::Error },

    #[snafu(display("Invalid schema at '{}': {}", url, source))]
    LoadSchema {
        url: String,
        source: formschema::Error,
    },

    #[snafu(display("Unable to build configuration from form: {}", source))]
    Reconstruct { source: formschema::Error },

    #[snafu(display("Error: No artifacts links found."))]
    NoArtifacts,

    #[snafu(display("No host at index {}, {} hosts loaded", index, len))]
    NoSuchHost { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
