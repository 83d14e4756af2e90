//! Build directories.  The server owns one temporary base directory; every build gets its own
//! working directory inside it, plus an output directory under `builds/` that outlives a
//! successful build so its artifacts can be downloaded.

use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

use crate::server::error::{self, Result};

pub const BUILDS_DIR: &str = "builds";
const WORK_DIR_PREFIX: &str = "build_work_";

#[derive(Debug)]
pub struct Workspace {
    base: TempDir,
}

impl Workspace {
    /// Creates a workspace in the system temporary directory.
    pub fn new() -> Result<Self> {
        let base = TempDir::new().context(error::CreateWorkspaceSnafu)?;
        Self::with_base(base)
    }

    /// Creates a workspace inside `parent`.
    pub fn new_in<P: AsRef<Path>>(parent: P) -> Result<Self> {
        let base = TempDir::new_in(parent).context(error::CreateWorkspaceSnafu)?;
        Self::with_base(base)
    }

    fn with_base(base: TempDir) -> Result<Self> {
        create_dir(&base.path().join(BUILDS_DIR))?;
        Ok(Self { base })
    }

    pub fn path(&self) -> &Path {
        self.base.path()
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.base.path().join(BUILDS_DIR)
    }

    /// Creates the directories for a new build of `hostname`.
    pub fn new_build(&self, hostname: &str) -> Result<Build> {
        let uuid = Uuid::new_v4().to_string();
        let working_dir = self
            .base
            .path()
            .join(format!("{}{}", WORK_DIR_PREFIX, uuid));
        let nix_config_dir = working_dir.join("nixConfig");
        let hostname_dir = nix_config_dir.join("nixosConfigurations").join(hostname);
        let out_link = working_dir.join("kexecTree");
        let output_dir = self.builds_dir().join(&uuid);

        // Build is constructed first so a failure below still cleans up the working directory.
        let build = Build {
            uuid,
            working_dir,
            nix_config_dir,
            hostname_dir,
            out_link,
            output_dir,
            keep_output: false,
        };
        create_dir(&build.hostname_dir)?;
        create_dir(&build.output_dir)?;
        debug!("Created build workspace '{}'", build.working_dir.display());
        Ok(build)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).context(error::CreateDirSnafu { path })
}

/// One build's directories.  The working directory is removed when the build is dropped, and so
/// is the output directory unless `keep_output` was called.
#[derive(Debug)]
pub struct Build {
    pub uuid: String,
    pub working_dir: PathBuf,
    pub nix_config_dir: PathBuf,
    pub hostname_dir: PathBuf,
    pub out_link: PathBuf,
    pub output_dir: PathBuf,
    keep_output: bool,
}

impl Build {
    /// Marks the build as published, so its output directory survives the build.
    pub fn keep_output(&mut self) {
        self.keep_output = true;
    }
}

fn remove_dir(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("Failed to remove directory '{}': {}", path.display(), e);
        }
    }
}

impl Drop for Build {
    fn drop(&mut self) {
        remove_dir(&self.working_dir);
        if !self.keep_output {
            remove_dir(&self.output_dir);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_layout() {
        let workspace = Workspace::new().unwrap();
        assert!(workspace.builds_dir().is_dir());

        let build = workspace.new_build("ponkila-1").unwrap();
        assert!(build.hostname_dir.is_dir());
        assert!(build
            .hostname_dir
            .ends_with("nixConfig/nixosConfigurations/ponkila-1"));
        assert!(build.output_dir.is_dir());
        assert_eq!(build.output_dir, workspace.builds_dir().join(&build.uuid));
        assert!(build
            .working_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("build_work_"));
        assert!(!build.out_link.exists());
    }

    #[test]
    fn kept_build_keeps_its_output() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = Workspace::new_in(parent.path()).unwrap();
        let mut build = workspace.new_build("ponkila-1").unwrap();
        fs::write(build.output_dir.join("bzImage"), b"kernel").unwrap();
        let (working_dir, output_dir) = (build.working_dir.clone(), build.output_dir.clone());

        build.keep_output();
        drop(build);
        assert!(!working_dir.exists());
        assert!(output_dir.join("bzImage").is_file());
    }

    #[test]
    fn abandoned_build_leaves_nothing() {
        let workspace = Workspace::new().unwrap();
        let build = workspace.new_build("ponkila-1").unwrap();
        fs::write(build.output_dir.join("nixConfig.tar"), b"partial").unwrap();
        let (working_dir, output_dir) = (build.working_dir.clone(), build.output_dir.clone());

        drop(build);
        assert!(!working_dir.exists());
        assert!(!output_dir.exists());
        assert_eq!(fs::read_dir(workspace.builds_dir()).unwrap().count(), 0);
    }

    #[test]
    fn builds_are_distinct() {
        let workspace = Workspace::new().unwrap();
        let a = workspace.new_build("ponkila-1").unwrap();
        let b = workspace.new_build("ponkila-1").unwrap();
        assert_ne!(a.uuid, b.uuid);
        assert_ne!(a.working_dir, b.working_dir);
    }
}
