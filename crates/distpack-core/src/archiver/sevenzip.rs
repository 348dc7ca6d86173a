//! External `7z` command-line backend.

use super::{Archiver, CompressRequest, ExtractRequest};
use crate::error::{DistError, IoResultExt};
use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, instrument};
use wait_timeout::ChildExt;

/// Executable names tried, in order, by [`SevenZip::locate`].
const CANDIDATES: &[&str] = &["7z", "7zz", "7za"];

/// Longest stderr excerpt carried in an error message.
const STDERR_EXCERPT: u64 = 2048;

/// Drives an installed 7-Zip executable.
#[derive(Debug, Clone)]
pub struct SevenZip {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl SevenZip {
    /// Find a 7-Zip executable on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Archiver`] if none of `7z`, `7zz`, or `7za` is
    /// installed.
    pub fn locate() -> Result<Self, DistError> {
        CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::with_program)
            .ok_or_else(|| DistError::Archiver("no 7-Zip executable found on PATH".to_string()))
    }

    /// Use a specific executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill the tool if a single invocation runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Executable this backend runs.
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[instrument(skip(self, args), fields(program = %self.program.display()))]
    fn run(&self, args: &[OsString]) -> Result<(), DistError> {
        debug!(?args, "Running archiver");

        let mut log = tempfile::tempfile().io_context(|| "creating archiver log")?;
        let log_clone = log.try_clone().io_context(|| "cloning archiver log handle")?;

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_clone))
            .spawn()
            .io_context(|| format!("spawning {}", self.program.display()))?;

        let status = match self.timeout {
            Some(limit) => {
                if let Some(status) = child
                    .wait_timeout(limit)
                    .io_context(|| format!("waiting for {}", self.program.display()))?
                {
                    status
                } else {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DistError::Archiver(format!(
                        "{} did not finish within {limit:?}",
                        self.program.display()
                    )));
                }
            }
            None => child
                .wait()
                .io_context(|| format!("waiting for {}", self.program.display()))?,
        };

        if status.success() {
            return Ok(());
        }

        let mut stderr = String::new();
        if log.seek(SeekFrom::Start(0)).is_ok() {
            let _ = log.take(STDERR_EXCERPT).read_to_string(&mut stderr);
        }
        Err(DistError::Archiver(format!(
            "{} exited with {status}: {}",
            self.program.display(),
            stderr.trim()
        )))
    }
}

/// `a <params> [-r] [-x!pattern]... <archive> <sources>...`
fn compress_args(request: &CompressRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["a".into()];
    args.extend(request.params.split_whitespace().map(OsString::from));
    if request.recurse {
        args.push("-r".into());
    }
    for pattern in request.exclude {
        args.push(format!("-x!{pattern}").into());
    }
    args.push(request.archive.into());
    args.extend(request.sources.iter().map(OsString::from));
    args
}

/// `x <params> <archive> -o<dest> -aos`
fn extract_args(request: &ExtractRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["x".into()];
    args.extend(request.params.split_whitespace().map(OsString::from));
    args.push(request.archive.into());
    let mut out = OsString::from("-o");
    out.push(request.dest);
    args.push(out);
    args.push("-aos".into());
    args
}

impl Archiver for SevenZip {
    fn compress(&self, request: &CompressRequest<'_>) -> Result<(), DistError> {
        self.run(&compress_args(request))
    }

    fn extract(&self, request: &ExtractRequest<'_>) -> Result<(), DistError> {
        std::fs::create_dir_all(request.dest)
            .io_context(|| format!("creating {}", request.dest.display()))?;
        self.run(&extract_args(request))
    }

    fn archive_extension(&self) -> &'static str {
        "7z"
    }
}
