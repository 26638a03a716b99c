//! JSON report of a launcher run.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use crate::scheduler::SchedulerResult;

impl SchedulerResult {
    /// Write the result as pretty JSON, creating parent directories as needed.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ReportError::Io(parent.to_path_buf(), e))?;
        }

        let file = File::create(path).map_err(|e| ReportError::Io(path.to_path_buf(), e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| ReportError::Write(path.to_path_buf(), e.to_string()))
    }

    pub fn read_json(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ReportError::Io(path.to_path_buf(), e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ReportError::Parse(path.to_path_buf(), e.to_string()))
    }
}

/// Errors from reading or writing reports.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error on {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse report {0}: {1}")]
    Parse(PathBuf, String),
    #[error("failed to write report {0}: {1}")]
    Write(PathBuf, String),
}
