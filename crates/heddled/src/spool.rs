//! On-disk layout for job state and captured streams.
//!
//! Every non-blocking job owns a directory `<spool>/<job_id>/` holding
//! three files: `status` (the latest status record as one JSON object plus
//! newline, replaced atomically), `stdout`, and `stderr`. Stream files are
//! written once: a non-empty payload gains a single trailing newline; an
//! empty payload produces an empty file.
//!
//! The store never deletes job directories; retention is a separate
//! concern outside the agent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Tracing target for spool operations.
const SPOOL_TARGET: &str = "heddled::spool";

/// Temporary name used for atomic status replacement.
const STATUS_TEMP_NAME: &str = ".status.tmp";

/// Lifecycle state recorded in a job's `status` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The action task has been set up and may be executing.
    Running,
    /// The action task has finished and all streams are final.
    Completed,
}

/// The record persisted to a job's `status` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusRecord {
    module: String,
    action: String,
    status: JobStatus,
    duration: String,
    input: String,
}

impl StatusRecord {
    /// Creates the initial record for a job that is being set up.
    #[must_use]
    pub fn running(
        module: impl Into<String>,
        action: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            status: JobStatus::Running,
            duration: String::from("0 s"),
            input: input.into(),
        }
    }

    /// Marks the record completed with the given wall time in whole
    /// seconds.
    #[must_use]
    pub fn completed(mut self, duration_secs: u64) -> Self {
        self.status = JobStatus::Completed;
        self.duration = format!("{duration_secs} s");
        self
    }

    /// Returns the recorded lifecycle state.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    /// Returns the recorded duration text.
    #[must_use]
    pub fn duration(&self) -> &str {
        self.duration.as_str()
    }

    /// Returns the recorded input text.
    #[must_use]
    pub fn input(&self) -> &str {
        self.input.as_str()
    }
}

/// Errors raised by spool operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// The spool root could not be created.
    #[error("failed to create spool root '{path}': {source}")]
    CreateRoot {
        /// Configured root.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A job directory already exists for the drawn id.
    #[error("job directory '{path}' already exists")]
    Collision {
        /// Colliding directory.
        path: PathBuf,
    },

    /// A job directory could not be created.
    #[error("failed to create job directory '{path}': {source}")]
    CreateJob {
        /// Target directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A spool file could not be written.
    #[error("failed to write spool file '{path}': {source}")]
    Write {
        /// Target file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The status record could not be serialised.
    #[error("failed to serialise status record: {source}")]
    Serialize {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Handle to the spool root directory.
#[derive(Debug, Clone)]
pub struct SpoolStore {
    root: PathBuf,
}

impl SpoolStore {
    /// Opens the spool root, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::CreateRoot`] when the directory cannot be
    /// created; the caller treats this as fatal at startup.
    pub fn open(root: &Path) -> Result<Self, SpoolError> {
        fs::create_dir_all(root).map_err(|source| SpoolError::CreateRoot {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the spool root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory for a new job.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Collision`] when a directory for the id
    /// already exists (the caller draws a fresh id), or
    /// [`SpoolError::CreateJob`] on any other failure.
    pub fn prepare_job(&self, job_id: &str) -> Result<PathBuf, SpoolError> {
        let path = self.root.join(job_id);
        match fs::create_dir(&path) {
            Ok(()) => {
                debug!(
                    target: SPOOL_TARGET,
                    job_id,
                    path = %path.display(),
                    "created job directory"
                );
                Ok(path)
            }
            Err(source) if source.kind() == io::ErrorKind::AlreadyExists => {
                Err(SpoolError::Collision { path })
            }
            Err(source) => Err(SpoolError::CreateJob { path, source }),
        }
    }

    /// Replaces the job's `status` file atomically with the given record.
    ///
    /// The record is written as a single JSON object followed by a newline
    /// to a temporary file in the same directory, then renamed over
    /// `status`.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Serialize`] or [`SpoolError::Write`].
    pub fn write_status(&self, job_dir: &Path, record: &StatusRecord) -> Result<(), SpoolError> {
        let mut contents =
            serde_json::to_vec(record).map_err(|source| SpoolError::Serialize { source })?;
        contents.push(b'\n');

        let temp_path = job_dir.join(STATUS_TEMP_NAME);
        let final_path = job_dir.join("status");
        fs::write(&temp_path, &contents).map_err(|source| SpoolError::Write {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &final_path).map_err(|source| SpoolError::Write {
            path: final_path,
            source,
        })
    }

    /// Writes one stream file.
    ///
    /// A non-empty payload gains a single trailing newline; an empty
    /// payload produces an empty file.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Write`].
    pub fn write_stream(&self, job_dir: &Path, name: &str, bytes: &[u8]) -> Result<(), SpoolError> {
        let path = job_dir.join(name);
        let contents = if bytes.is_empty() {
            Vec::new()
        } else {
            let mut contents = Vec::with_capacity(bytes.len() + 1);
            contents.extend_from_slice(bytes);
            contents.push(b'\n');
            contents
        };
        fs::write(&path, contents).map_err(|source| SpoolError::Write { path, source })
    }

    /// Writes both stream files.
    ///
    /// # Errors
    ///
    /// Returns the first [`SpoolError::Write`] encountered.
    pub fn write_streams(
        &self,
        job_dir: &Path,
        stdout: &[u8],
        stderr: &[u8],
    ) -> Result<(), SpoolError> {
        self.write_stream(job_dir, "stdout", stdout)?;
        self.write_stream(job_dir, "stderr", stderr)
    }
}
