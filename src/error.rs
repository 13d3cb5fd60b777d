use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong between pasting a link and having a file on disk.
///
/// `Remote` means the service answered with an error envelope; `Transport`
/// means no usable answer arrived at all.
#[derive(Debug, Error)]
pub enum DebridError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote service error: {}", remote_detail(.code, .message))]
    Remote {
        code: Option<String>,
        message: Option<String>,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("failed to submit magnet: {0}")]
    Submission(#[source] Box<DebridError>),

    #[error("magnet still downloading after {attempts} checks; it may finish later on your account")]
    PollTimeout { attempts: u32 },

    #[error("remote service failed to process the magnet")]
    Processing,

    #[error("magnet did not become ready (status: {status})")]
    Incomplete { status: String },

    #[error("download timed out after {}s", .0.as_secs())]
    AcquisitionTimeout(Duration),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download finished but {} does not exist", .0.display())]
    Verification(PathBuf),

    #[error("failed to build archive {}: {reason}", .path.display())]
    Pack { path: PathBuf, reason: String },

    #[error("cancelled")]
    Cancelled,
}

fn remote_detail<'a>(code: &'a Option<String>, message: &'a Option<String>) -> &'a str {
    message
        .as_deref()
        .or(code.as_deref())
        .unwrap_or("no detail given")
}

impl DebridError {
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DebridError::Write {
            path: path.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DebridError::PollTimeout { .. } | DebridError::AcquisitionTimeout(_)
        )
    }
}

pub type DebridResult<T> = Result<T, DebridError>;
