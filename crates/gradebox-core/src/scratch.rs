//! The scratch directory shared between the runner and sandbox containers.
//!
//! Builders write artifacts into it and runners read exactly one artifact
//! from it. Mutating operations take `&mut self`, so a live execution holds
//! the directory exclusively from `isolate` until the run finishes.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::executor::VolumeMount;

const ARTIFACT_SUFFIX: &str = ".test";

/// A compiled test binary found in the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    pub test: String,
    /// Private copy outside the scratch directory.
    pub path: PathBuf,
    /// Lowercase hex sha256 of the binary.
    pub hash: String,
}

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    volume: String,
    owner: Option<(u32, u32)>,
}

impl ScratchDir {
    /// `path` is where this process sees the directory; `volume` is what the
    /// container runtime mounts (a named volume or host path).
    pub fn new(path: impl Into<PathBuf>, volume: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            volume: volume.into(),
            owner: None,
        }
    }

    /// Hand isolated artifacts to this uid/gid.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some((uid, gid));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mount(&self, mount_path: &str, read_only: bool) -> VolumeMount {
        VolumeMount {
            source: self.volume.clone(),
            mount_path: mount_path.to_string(),
            read_only,
        }
    }

    /// Remove everything inside the directory, keeping the directory itself.
    pub fn clear(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.path)?;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Make `artifact` the only file in the directory, read/execute only.
    pub fn isolate(&mut self, artifact: &Path) -> io::Result<PathBuf> {
        self.clear()?;
        let name = artifact.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "artifact has no file name")
        })?;
        let dest = self.path.join(name);
        fs::copy(artifact, &dest)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(0o500))?;
            if let Some((uid, gid)) = self.owner {
                // Needs privileges the runner may lack; the sandbox can still read it.
                if let Err(e) = std::os::unix::fs::chown(&dest, Some(uid), Some(gid)) {
                    warn!(
                        path = %dest.display(),
                        uid,
                        gid,
                        error = %e,
                        "Failed to hand artifact to sandbox user"
                    );
                }
            }
        }

        Ok(dest)
    }

    /// Hash every `<test>.test` file and copy it into `dest`, sorted by test.
    pub fn collect_artifacts(&self, dest: &Path) -> io::Result<Vec<BuiltArtifact>> {
        fs::create_dir_all(dest)?;
        let mut artifacts = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(test) = name.strip_suffix(ARTIFACT_SUFFIX) else {
                continue;
            };
            if test.is_empty() {
                continue;
            }

            let hash = hash_file(&entry.path())?;
            let path = dest.join(name);
            fs::copy(entry.path(), &path)?;

            artifacts.push(BuiltArtifact {
                test: test.to_string(),
                path,
                hash,
            });
        }

        artifacts.sort_by(|a, b| a.test.cmp(&b.test));
        Ok(artifacts)
    }
}

/// Lowercase hex sha256 of a file's contents.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
