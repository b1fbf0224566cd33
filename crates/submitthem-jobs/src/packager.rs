//! Staging payloads for remote execution and reading back their outcome.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the remote side recorded after running a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RemoteOutcome {
    Success { value: Value },
    Error { message: String },
}

/// Turns payloads into files a job can execute, and results back into values.
pub trait Packager: Send + Sync {
    /// Shell command each job runs. It finds its payload through
    /// `SUBMITTHEM_FOLDER` and the scheduler's job id variables.
    fn command(&self, folder: &Utf8Path) -> String;

    /// Write `payload` to `path`.
    fn stage(&self, payload: &Value, path: &Utf8Path) -> Result<(), PackagingError>;

    /// Read the outcome at `path`; `None` if it was not written (yet).
    fn load(&self, path: &Utf8Path) -> Result<Option<RemoteOutcome>, PackagingError>;
}

/// Payloads and results as JSON files.
#[derive(Debug, Clone)]
pub struct JsonPackager {
    entrypoint: String,
}

impl JsonPackager {
    /// `entrypoint` is the program that executes a staged payload.
    pub fn new(entrypoint: impl Into<String>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
        }
    }
}

impl Default for JsonPackager {
    fn default() -> Self {
        Self::new("submitthem-worker")
    }
}

impl Packager for JsonPackager {
    fn command(&self, folder: &Utf8Path) -> String {
        format!("{} {}", self.entrypoint, folder)
    }

    fn stage(&self, payload: &Value, path: &Utf8Path) -> Result<(), PackagingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(payload)?)?;
        Ok(())
    }

    fn load(&self, path: &Utf8Path) -> Result<Option<RemoteOutcome>, PackagingError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_stage_and_load() {
        let temp = TempDir::new().unwrap();
        let folder = Utf8Path::from_path(temp.path()).unwrap();
        let packager = JsonPackager::default();

        let payload_path = folder.join("nested").join("1_submitted.json");
        packager.stage(&json!({"x": 3}), &payload_path).unwrap();
        let staged: Value =
            serde_json::from_str(&fs::read_to_string(&payload_path).unwrap()).unwrap();
        assert_eq!(staged["x"], 3);

        let result_path = folder.join("1_result.json");
        assert_eq!(packager.load(&result_path).unwrap(), None);

        fs::write(&result_path, r#"{"status": "success", "value": [1, 2]}"#).unwrap();
        assert_eq!(
            packager.load(&result_path).unwrap(),
            Some(RemoteOutcome::Success { value: json!([1, 2]) })
        );

        fs::write(&result_path, r#"{"status": "error", "message": "boom"}"#).unwrap();
        assert_eq!(
            packager.load(&result_path).unwrap(),
            Some(RemoteOutcome::Error {
                message: "boom".into()
            })
        );
    }

    #[test]
    fn test_corrupt_result() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("r.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonPackager::default().load(&path),
            Err(PackagingError::Json(_))
        ));
    }

    #[test]
    fn test_command() {
        let packager = JsonPackager::new("worker --verbose");
        assert_eq!(packager.command(Utf8Path::new("/jobs")), "worker --verbose /jobs");
    }
}
