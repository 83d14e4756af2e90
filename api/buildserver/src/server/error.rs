use snafu::Snafu;
use std::io;
use std::path::PathBuf;

// We want server (router/handler) and controller errors together so it's easy to define response
// error codes for all the high-level types of errors that could happen during a request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // Set-up errors
    #[snafu(display("Unable to bind to {}: {}", addr, source))]
    BindAddress { addr: String, source: io::Error },

    #[snafu(display("Unable to start server: {}", source))]
    ServerStart { source: io::Error },

    #[snafu(display("Unable to create build workspace: {}", source))]
    CreateWorkspace { source: io::Error },

    #[snafu(display("Failed to read schema from '{}': {}", path.display(), source))]
    ReadSchema { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to load schema from '{}': {}", path.display(), source))]
    LoadSchema {
        path: PathBuf,
        source: formschema::Error,
    },

    #[snafu(display("Empty command line given for a build tool"))]
    EmptyTool,

    // Request errors
    #[snafu(display("Failed to parse JSON: {}", source))]
    ParseConfig { source: serde_json::Error },

    #[snafu(display("The 'localization.hostname' must not be empty"))]
    EmptyHostname,

    #[snafu(display(
        "The 'localization.hostname' may only contain letters, digits and '-', got '{}'",
        hostname
    ))]
    InvalidHostname { hostname: String },

    #[snafu(display("The 'ssh.authorizedKeys' must contain at least one key"))]
    NoAuthorizedKeys,

    #[snafu(display("The 'ssh.authorizedKeys' must not contain an empty key"))]
    EmptyAuthorizedKey,

    #[snafu(display("Unable to build configuration from form: {}", source))]
    Reconstruct { source: formschema::Error },

    #[snafu(display("No options schema loaded; form submissions are disabled"))]
    NoSchema,

    #[snafu(display("No artifact '{}' in build '{}'", file, build_id))]
    ArtifactNotFound { build_id: String, file: String },

    // Build errors
    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    CreateDir { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    WriteFile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    ReadFile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to list build output '{}': {}", path.display(), source))]
    ListOutput { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to list hosts in '{}': {}", path.display(), source))]
    ListHosts { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to serialize configuration: {}", source))]
    SerializeConfig { source: serde_json::Error },

    #[snafu(display("Failed to serialize host list: {}", source))]
    SerializeHostnames { source: serde_json::Error },

    #[snafu(display("Failed to create archive '{}': {}", path.display(), source))]
    CreateArchive { path: PathBuf, source: io::Error },

    #[snafu(display("Publishing task failed: {}", source))]
    PublishTask { source: tokio::task::JoinError },

    #[snafu(display("Failed to start '{}': {}", program, source))]
    CommandStart { program: String, source: io::Error },

    #[snafu(display("Unable to open stdin of '{}'", program))]
    CommandStdin { program: String },

    #[snafu(display("Failed to send input to '{}': {}", program, source))]
    CommandInput { program: String, source: io::Error },

    #[snafu(display("Failed to wait for '{}': {}", program, source))]
    CommandWait { program: String, source: io::Error },

    #[snafu(display("'{}' failed: {}", program, stderr))]
    CommandFailure { program: String, stderr: String },

    // Response errors
    #[snafu(display("Unable to serialize response: {}", source))]
    ResponseSerialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;
