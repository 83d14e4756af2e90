//! The controller module runs one build: it turns a validated configuration into a Nix flake in a
//! fresh workspace, builds it with the external tools, and collects the artifacts.

use serde::Serialize;
use sha2::{Digest, Sha256};
use snafu::{ensure, OptionExt, ResultExt};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use super::error::{self, Error, Result};
use crate::model::Config;
use crate::workspace::{Build, Workspace};

/// Files of the nix build output that are published.
pub const ARTIFACT_WHITELIST: &[&str] = &["bzImage", "initrd.zst", "kexec-boot"];

/// The flake a build was made from, published next to the boot files.
pub const FLAKE_ARCHIVE: &str = "nixConfig.tar";
const ARCHIVE_ROOT: &str = "nixConfig";

const FLAKE_NIX: &str = include_str!("../static/flake.nix");
const CONFIGURATIONS_DIR: &str = "nixosConfigurations";
const HOSTNAMES_FILE: &str = "hostnames.json";
const MODULE_DIR: &str = "nixosModules/homestakeros";
const SCHEMA_FILE: &str = "options.json";

/// An external program plus any leading arguments, e.g. `nix` or `sh fake-nix.sh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    program: String,
    args: Vec<String>,
}

impl Tool {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl FromStr for Tool {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace().map(str::to_string);
        let program = words.next().context(error::EmptyToolSnafu)?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

/// The programs a build shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTools {
    pub json2nix: Tool,
    pub nix: Tool,
}

impl Default for BuildTools {
    fn default() -> Self {
        Self {
            json2nix: Tool::new("json2nix"),
            nix: Tool::new("nix"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub file: String,
    pub download_url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutput {
    pub status: &'static str,
    pub build_id: String,
    pub artifacts: Vec<Artifact>,
}

/// Validates the configuration and builds a kexec tree for it.  The build's working directory is
/// removed on return; its output directory is kept only if the build succeeded.
///
/// `options` is the options schema document to ship in the flake, if the server has one.
pub(crate) async fn build(
    workspace: &Workspace,
    tools: &BuildTools,
    options: Option<&str>,
    config: &Config,
) -> Result<BuildOutput> {
    config.validate()?;
    let hostname = config.hostname();
    let document = serde_json::to_string(config).context(error::SerializeConfigSnafu)?;
    trace!("Building configuration: {}", document);

    let mut build = workspace.new_build(hostname)?;
    info!("Starting build {} for '{}'", build.uuid, hostname);

    let expression = run_json2nix(&tools.json2nix, &document).await?;
    write_host_config(&build, config, &expression)?;
    write_flake(&build, options)?;

    run_nix_build(&tools.nix, &build, hostname).await?;
    let artifacts = publish_outputs(&build).await?;
    build.keep_output();
    info!(
        "Build {} finished with {} artifacts",
        build.uuid,
        artifacts.len()
    );

    Ok(BuildOutput {
        status: "ok",
        build_id: build.uuid.clone(),
        artifacts,
    })
}

/// Feeds the JSON document to json2nix and returns the Nix expression it prints.
pub(crate) async fn run_json2nix(tool: &Tool, document: &str) -> Result<String> {
    let program = tool.program();
    let mut child = tool
        .command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context(error::CommandStartSnafu { program })?;
    let mut stdin = child
        .stdin
        .take()
        .context(error::CommandStdinSnafu { program })?;

    // Write and read concurrently so a chatty child can't fill its stdout pipe and stall us.
    let write = async move {
        let result = stdin.write_all(document.as_bytes()).await;
        drop(stdin);
        result
    };
    let (written, output) = tokio::join!(write, child.wait_with_output());
    written.context(error::CommandInputSnafu { program })?;
    let output = output.context(error::CommandWaitSnafu { program })?;
    ensure!(
        output.status.success(),
        error::CommandFailureSnafu {
            program,
            stderr: String::from_utf8_lossy(&output.stderr).trim(),
        }
    );
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Writes `default.json` and `default.nix` into the host's directory of the flake.
pub(crate) fn write_host_config(build: &Build, config: &Config, expression: &str) -> Result<()> {
    let json_path = build.hostname_dir.join("default.json");
    let pretty = serde_json::to_string_pretty(config).context(error::SerializeConfigSnafu)?;
    fs::write(&json_path, pretty).context(error::WriteFileSnafu { path: &json_path })?;

    let nix_path = build.hostname_dir.join("default.nix");
    fs::write(&nix_path, host_module(expression))
        .context(error::WriteFileSnafu { path: &nix_path })
}

/// Completes the flake around the host's module: `flake.nix`, the list of hosts it defines and,
/// when given, the options schema.
pub(crate) fn write_flake(build: &Build, options: Option<&str>) -> Result<()> {
    write_file(&build.nix_config_dir.join("flake.nix"), FLAKE_NIX)?;

    let configurations = build.nix_config_dir.join(CONFIGURATIONS_DIR);
    let hostnames = list_hostnames(&configurations)?;
    let hostnames =
        serde_json::to_string_pretty(&hostnames).context(error::SerializeHostnamesSnafu)?;
    write_file(&configurations.join(HOSTNAMES_FILE), &hostnames)?;

    if let Some(options) = options {
        let module_dir = build.nix_config_dir.join(MODULE_DIR);
        fs::create_dir_all(&module_dir).context(error::CreateDirSnafu { path: &module_dir })?;
        write_file(&module_dir.join(SCHEMA_FILE), options)?;
    }
    Ok(())
}

/// Names of the host directories under `nixosConfigurations`, sorted.
fn list_hostnames(configurations: &Path) -> Result<Vec<String>> {
    let entries =
        fs::read_dir(configurations).context(error::ListHostsSnafu { path: configurations })?;
    let mut hostnames = Vec::new();
    for entry in entries {
        let entry = entry.context(error::ListHostsSnafu { path: configurations })?;
        if entry.path().is_dir() {
            hostnames.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    hostnames.sort();
    Ok(hostnames)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).context(error::WriteFileSnafu { path })
}

pub(crate) fn host_module(expression: &str) -> String {
    format!(
        "{{ pkgs, lib, config, ... }}: {{ homestakeros = {}; }}",
        expression.trim()
    )
}

async fn run_nix_build(tool: &Tool, build: &Build, hostname: &str) -> Result<()> {
    let program = tool.program();
    let target = format!(
        "path:{}#nixosConfigurations.{}.config.system.build.kexecTree",
        build.nix_config_dir.display(),
        hostname
    );
    debug!("Running {} build {}", program, target);
    let output = tool
        .command()
        .arg("build")
        .arg(&target)
        .arg("--out-link")
        .arg(&build.out_link)
        .arg("--extra-experimental-features")
        .arg("nix-command")
        .stdin(Stdio::null())
        .output()
        .await
        .context(error::CommandStartSnafu { program })?;
    debug!(
        "{} stdout: {}",
        program,
        String::from_utf8_lossy(&output.stdout)
    );
    debug!(
        "{} stderr: {}",
        program,
        String::from_utf8_lossy(&output.stderr)
    );
    ensure!(
        output.status.success(),
        error::CommandFailureSnafu {
            program,
            stderr: String::from_utf8_lossy(&output.stderr).trim(),
        }
    );
    Ok(())
}

/// Packs the flake and collects the boot files into the build's output directory, on the blocking
/// pool.
async fn publish_outputs(build: &Build) -> Result<Vec<Artifact>> {
    let nix_config_dir = build.nix_config_dir.clone();
    let out_link = build.out_link.clone();
    let output_dir = build.output_dir.clone();
    let build_id = build.uuid.clone();

    tokio::task::spawn_blocking(move || -> Result<Vec<Artifact>> {
        let mut artifacts =
            process_artifacts(&out_link, &output_dir, &build_id, ARTIFACT_WHITELIST)?;
        artifacts.push(pack_flake(&nix_config_dir, &output_dir, &build_id)?);
        artifacts.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(artifacts)
    })
    .await
    .context(error::PublishTaskSnafu)?
}

/// Writes the flake directory into `output_dir` as a tar archive rooted at `nixConfig/`.
pub(crate) fn pack_flake(
    nix_config_dir: &Path,
    output_dir: &Path,
    build_id: &str,
) -> Result<Artifact> {
    let path = output_dir.join(FLAKE_ARCHIVE);
    let file = File::create(&path).context(error::CreateArchiveSnafu { path: &path })?;
    let mut archive = tar::Builder::new(file);
    archive
        .append_dir_all(ARCHIVE_ROOT, nix_config_dir)
        .context(error::CreateArchiveSnafu { path: &path })?;
    archive
        .into_inner()
        .context(error::CreateArchiveSnafu { path: &path })?;

    let sha256 = compute_sha256(&path).context(error::ReadFileSnafu { path: &path })?;
    Ok(Artifact {
        file: FLAKE_ARCHIVE.to_string(),
        download_url: download_url(build_id, FLAKE_ARCHIVE),
        sha256,
    })
}

fn is_published(file: &str) -> bool {
    file == FLAKE_ARCHIVE || ARTIFACT_WHITELIST.contains(&file)
}

/// Copies the whitelisted files of the build output into `output_dir` and hashes them.  Files that
/// can't be copied or hashed are logged and left out; the result is sorted by file name.
pub(crate) fn process_artifacts(
    out_link: &Path,
    output_dir: &Path,
    build_id: &str,
    whitelist: &[&str],
) -> Result<Vec<Artifact>> {
    let entries = fs::read_dir(out_link).context(error::ListOutputSnafu { path: out_link })?;
    let mut artifacts = Vec::new();
    for entry in entries {
        let path = entry.context(error::ListOutputSnafu { path: out_link })?.path();
        let file = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        if !path.is_file() {
            continue;
        }
        if !whitelist.contains(&file.as_str()) {
            debug!("Skipping '{}', not a published artifact", file);
            continue;
        }
        match copy_artifact(&path, &output_dir.join(&file)) {
            Ok(sha256) => artifacts.push(Artifact {
                download_url: download_url(build_id, &file),
                file,
                sha256,
            }),
            Err(e) => warn!("Skipping artifact '{}': {}", path.display(), e),
        }
    }
    artifacts.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(artifacts)
}

fn copy_artifact(source: &Path, dest: &Path) -> io::Result<String> {
    // Build outputs are symlinks into the store.
    let real_path = fs::canonicalize(source)?;
    fs::copy(real_path, dest)?;
    compute_sha256(dest)
}

/// Hex SHA-256 of a file's contents.
pub fn compute_sha256<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn download_url(build_id: &str, file: &str) -> String {
    format!("/builds/{}/{}", build_id, file)
}

/// Reads a published artifact.  Only build ids that look like ours and whitelisted names are
/// looked up, so the request can't name anything else in the workspace.
pub(crate) async fn read_artifact(
    workspace: &Workspace,
    build_id: &str,
    file: &str,
) -> Result<Vec<u8>> {
    let not_found = || error::ArtifactNotFoundSnafu { build_id, file };
    ensure!(Uuid::parse_str(build_id).is_ok(), not_found());
    ensure!(is_published(file), not_found());

    let path: PathBuf = workspace.builds_dir().join(build_id).join(file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => not_found().fail(),
        Err(e) => Err(e).context(error::ReadFileSnafu { path }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn sha256_of_known_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello");
        fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            compute_sha256(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn only_whitelisted_artifacts_are_published() {
        let store = tempfile::tempdir().unwrap();
        let out_link = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();

        for name in ["bzImage", "initrd.zst", "kexec-boot", "nix-support", "secrets.json"] {
            let real = store.path().join(name);
            fs::write(&real, name.as_bytes()).unwrap();
            symlink(&real, out_link.path().join(name)).unwrap();
        }

        let artifacts = process_artifacts(
            out_link.path(),
            output_dir.path(),
            "3f6c",
            ARTIFACT_WHITELIST,
        )
        .unwrap();
        let files: Vec<_> = artifacts.iter().map(|a| a.file.as_str()).collect();
        assert_eq!(files, vec!["bzImage", "initrd.zst", "kexec-boot"]);
        assert_eq!(artifacts[0].download_url, "/builds/3f6c/bzImage");
        assert_eq!(
            artifacts[0].sha256,
            compute_sha256(store.path().join("bzImage")).unwrap()
        );

        // Copies are real files, not links back into the store.
        let copied = output_dir.path().join("bzImage");
        assert!(!fs::symlink_metadata(&copied).unwrap().file_type().is_symlink());
        assert!(!output_dir.path().join("secrets.json").exists());
    }

    #[test]
    fn missing_output_is_an_error() {
        let output_dir = tempfile::tempdir().unwrap();
        let missing = output_dir.path().join("kexecTree");
        assert!(matches!(
            process_artifacts(&missing, output_dir.path(), "3f6c", ARTIFACT_WHITELIST),
            Err(Error::ListOutput { .. })
        ));
    }

    #[test]
    fn host_module_wraps_expression() {
        assert_eq!(
            host_module("{ localization = { hostname = \"ponkila-1\"; }; }\n"),
            "{ pkgs, lib, config, ... }: { homestakeros = { localization = { hostname = \"ponkila-1\"; }; }; }"
        );
    }

    #[test]
    fn flake_is_completed_and_packed() {
        let workspace = Workspace::new().unwrap();
        let build = workspace.new_build("ponkila-1").unwrap();
        fs::write(build.hostname_dir.join("default.nix"), "{ }").unwrap();
        write_flake(&build, Some("{\"localization\":{}}")).unwrap();

        let hostnames = fs::read_to_string(
            build
                .nix_config_dir
                .join("nixosConfigurations/hostnames.json"),
        )
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Vec<String>>(&hostnames).unwrap(),
            vec!["ponkila-1"]
        );
        assert_eq!(
            fs::read_to_string(
                build
                    .nix_config_dir
                    .join("nixosModules/homestakeros/options.json")
            )
            .unwrap(),
            "{\"localization\":{}}"
        );

        let artifact = pack_flake(&build.nix_config_dir, &build.output_dir, &build.uuid).unwrap();
        let archive_path = build.output_dir.join(FLAKE_ARCHIVE);
        assert_eq!(artifact.file, "nixConfig.tar");
        assert_eq!(
            artifact.download_url,
            format!("/builds/{}/nixConfig.tar", build.uuid)
        );
        assert_eq!(artifact.sha256, compute_sha256(&archive_path).unwrap());

        let mut archive = tar::Archive::new(File::open(&archive_path).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        for expected in [
            "nixConfig/flake.nix",
            "nixConfig/nixosConfigurations/hostnames.json",
            "nixConfig/nixosConfigurations/ponkila-1/default.nix",
            "nixConfig/nixosModules/homestakeros/options.json",
        ] {
            assert!(names.iter().any(|name| name == expected), "{}", expected);
        }
    }

    #[test]
    fn flake_without_schema() {
        let workspace = Workspace::new().unwrap();
        let build = workspace.new_build("ponkila-1").unwrap();
        write_flake(&build, None).unwrap();
        assert!(build.nix_config_dir.join("flake.nix").is_file());
        assert!(!build.nix_config_dir.join("nixosModules").exists());
    }

    #[test]
    fn tool_command_lines() {
        let tool: Tool = "sh /tmp/fake-nix.sh".parse().unwrap();
        assert_eq!(tool.program(), "sh");
        assert_eq!(tool.args, vec!["/tmp/fake-nix.sh"]);
        assert!("   ".parse::<Tool>().is_err());
        assert_eq!(BuildTools::default().nix, Tool::new("nix"));
    }

    #[actix_rt::test]
    async fn json2nix_output_and_failure() {
        let cat = Tool::new("cat");
        assert_eq!(run_json2nix(&cat, "{\"a\":1}").await.unwrap(), "{\"a\":1}");

        let failing = Tool {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "cat >/dev/null; echo broken >&2; exit 1".to_string(),
            ],
        };
        match run_json2nix(&failing, "{}").await {
            Err(Error::CommandFailure { program, stderr }) => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let missing = Tool::new("/nonexistent/json2nix");
        assert!(matches!(
            run_json2nix(&missing, "{}").await,
            Err(Error::CommandStart { .. })
        ));
    }

    #[actix_rt::test]
    async fn artifact_lookup_is_confined() {
        let workspace = Workspace::new().unwrap();
        let id = Uuid::new_v4().to_string();
        fs::create_dir_all(workspace.builds_dir().join(&id)).unwrap();
        fs::write(workspace.builds_dir().join(&id).join("bzImage"), b"kernel").unwrap();

        assert_eq!(read_artifact(&workspace, &id, "bzImage").await.unwrap(), b"kernel");
        fs::write(workspace.builds_dir().join(&id).join(FLAKE_ARCHIVE), b"flake").unwrap();
        assert_eq!(read_artifact(&workspace, &id, FLAKE_ARCHIVE).await.unwrap(), b"flake");
        for (build_id, file) in [
            (id.as_str(), "initrd.zst"),
            (id.as_str(), "../../etc/passwd"),
            ("..", "bzImage"),
        ] {
            assert!(matches!(
                read_artifact(&workspace, build_id, file).await,
                Err(Error::ArtifactNotFound { .. })
            ));
        }
    }
}
