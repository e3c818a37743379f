//! Error types shared by every ecctl subsystem.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// ecctl result type.
pub type Result<T> = std::result::Result<T, Error>;

/// ecctl errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("{}", describe_remote(.status, .body))]
    Remote { status: u16, body: String },

    #[error("deployment template not found: {template_id}")]
    TemplateNotFound { template_id: String },

    #[error("unknown topology element: {name}")]
    UnknownTopologyElement { name: String },

    #[error("invalid topology element JSON: {message}")]
    InvalidTopologyJson { message: String },

    #[error("incompatible stack version \"{version}\": {reason}")]
    IncompatibleVersion { version: String, reason: String },

    #[error("skip data migration requires a non-empty cluster filter and move only set to true")]
    InvalidSkipDataMigration,

    #[error("allocator down can only be overridden when a single allocator is vacated")]
    AmbiguousAllocatorDown,

    #[error("{item}: failed dispatching move: {cause}")]
    MoveDispatchFailed { item: String, cause: String },

    #[error("{item}: move plan failed at step \"{step_id}\" with status {status}")]
    MovePlanFailed { item: String, step_id: String, status: String },

    #[error("{item}: timed out tracking the move plan")]
    MoveTrackTimeout { item: String },

    #[error("resource {resource_id}: no plan found")]
    NoPlan { resource_id: String },

    #[error("resource {resource_id}: plan failed at step \"{step_id}\" with status {status}")]
    PlanFailed { resource_id: String, step_id: String, status: String },

    #[error("resource {resource_id}: tracking timed out after {retries} retries")]
    TrackTimeout { resource_id: String, retries: u32 },

    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    #[error("failed writing configuration to {}: {message}", .path.display())]
    ConfigWriteFailed { path: PathBuf, message: String },

    #[error("interrupted")]
    Interrupted,

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Multi(#[from] MultiError),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// True for network or TLS failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// True for failures worth retrying: transport errors and 5xx answers.
    pub fn is_retryable(&self) -> bool {
        self.is_transport() || matches!(self, Error::Remote { status, .. } if *status >= 500)
    }

    /// Process exit code to surface for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::transport(err.to_string())
    }
}

#[derive(Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    errors: Vec<RemoteErrorEntry>,
}

#[derive(Deserialize)]
struct RemoteErrorEntry {
    code: Option<String>,
    message: Option<String>,
}

/// Render a non-2xx response, surfacing the API's structured error codes when present.
fn describe_remote(status: &u16, body: &str) -> String {
    let entries = serde_json::from_str::<RemoteErrorBody>(body)
        .map(|parsed| parsed.errors)
        .unwrap_or_default();
    if entries.is_empty() {
        return format!("remote API returned {}: {}", status, body.trim());
    }

    let rendered: Vec<String> = entries
        .iter()
        .map(|e| match (&e.code, &e.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "unknown error".to_string(),
        })
        .collect();
    format!("remote API returned {}: {}", status, rendered.join("; "))
}

/// Ordered collection of leaf errors produced by an aggregated operation.
#[derive(Debug, Default)]
pub struct MultiError {
    prefix: String,
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, error: Error) {
        // Nested aggregates are flattened so the leaf count stays exact.
        match error {
            Error::Multi(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// `Ok(())` when no leaf was recorded, the aggregate otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Multi(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 { "error" } else { "errors" };
        write!(f, "{}: {} {} occurred:", self.prefix, self.errors.len(), noun)?;
        for err in &self.errors {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
