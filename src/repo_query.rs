use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{FilterError, Result};

/// Contract the untangler requires from an external repository query tool
/// (spec.md §6) — historically `svnlook cat` / `svnlook tree --full-paths`,
/// but the core must not assume the transport.
pub trait RepoQuery {
    fn cat(&self, repo: &Path, revision: i64, path: &str) -> Result<Vec<u8>>;
    fn tree(&self, repo: &Path, revision: i64, path: &str) -> Result<Vec<String>>;
}

/// Dispatches to the `svnlook` binary as a child process, capturing its
/// stdout/stderr via temporary files so the parent's memory is bounded by
/// disk rather than by however large the queried tree happens to be
/// (spec.md §5).
#[derive(Debug, Clone)]
pub struct SvnlookQuery {
    svnlook_binary: String,
}

impl Default for SvnlookQuery {
    fn default() -> Self {
        Self {
            svnlook_binary: "svnlook".to_string(),
        }
    }
}

impl SvnlookQuery {
    pub fn new() -> Self {
        Self::default()
    }

    fn run(&self, args: &[&std::ffi::OsStr]) -> Result<Vec<u8>> {
        let mut stdout_temp = tempfile::tempfile()?;
        let mut stderr_temp = tempfile::tempfile()?;

        let status = Command::new(&self.svnlook_binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout_temp.try_clone()?)
            .stderr(stderr_temp.try_clone()?)
            .status()?;

        if !status.success() {
            let mut stderr = String::new();
            stderr_temp.seek(SeekFrom::Start(0))?;
            stderr_temp.read_to_string(&mut stderr)?;
            return Err(FilterError::RepoQueryError { status, stderr });
        }

        let mut out = Vec::new();
        stdout_temp.seek(SeekFrom::Start(0))?;
        stdout_temp.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl RepoQuery for SvnlookQuery {
    fn cat(&self, repo: &Path, revision: i64, path: &str) -> Result<Vec<u8>> {
        log::debug!("svnlook cat -r {revision} {} {path}", repo.display());
        self.run(&[
            "cat".as_ref(),
            "-r".as_ref(),
            revision.to_string().as_ref(),
            repo.as_os_str(),
            path.as_ref(),
        ])
    }

    fn tree(&self, repo: &Path, revision: i64, path: &str) -> Result<Vec<String>> {
        log::debug!("svnlook tree --full-paths -r {revision} {} {path}", repo.display());
        let out = self.run(&[
            "tree".as_ref(),
            "--full-paths".as_ref(),
            "-r".as_ref(),
            revision.to_string().as_ref(),
            repo.as_os_str(),
            path.as_ref(),
        ])?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

/// An in-memory stand-in for tests and the `scan` dry run, where no live
/// repository needs to be consulted.
#[derive(Debug, Clone, Default)]
pub struct FakeRepoQuery {
    pub files: std::collections::HashMap<(i64, String), Vec<u8>>,
    pub trees: std::collections::HashMap<(i64, String), Vec<String>>,
}

impl RepoQuery for FakeRepoQuery {
    fn cat(&self, _repo: &Path, revision: i64, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(&(revision, path.to_string()))
            .cloned()
            .ok_or_else(|| FilterError::ConfigError(format!("no fake content for {path}@{revision}")))
    }

    fn tree(&self, _repo: &Path, revision: i64, path: &str) -> Result<Vec<String>> {
        self.trees
            .get(&(revision, path.to_string()))
            .cloned()
            .ok_or_else(|| FilterError::ConfigError(format!("no fake tree for {path}@{revision}")))
    }
}
