use std::path::PathBuf;
use std::time::Duration;

use prism_exec::ExecError;

use crate::config::BackendId;

/// Everything that can go wrong while one backend answers one prompt.
///
/// Variants carry rendered strings rather than source errors so a result can
/// be cloned into an outcome and rendered later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Missing credential, invalid mode, or an executable that is not installed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("process exited with code {code}: {stderr}")]
    Process { code: i32, stderr: String },

    #[error("failed to start process: {0}")]
    Spawn(String),

    #[error("request failed: {0}")]
    Transport(String),

    /// Response arrived but carried no usable text.
    #[error("no response from backend ({0})")]
    NoResponse(String),

    /// The task running the adapter died (panic or cancellation).
    #[error("backend task aborted: {0}")]
    Aborted(String),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, BackendError::Config(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Config(_) => "config",
            BackendError::Timeout(_) => "timeout",
            BackendError::Http { .. } => "http",
            BackendError::Process { .. } => "process",
            BackendError::Spawn(_) => "spawn",
            BackendError::Transport(_) => "transport",
            BackendError::NoResponse(_) => "no_response",
            BackendError::Aborted(_) => "aborted",
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(timeout)
        } else if err.is_decode() {
            BackendError::NoResponse(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

impl From<ExecError> for BackendError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::NotFound(program) => BackendError::Config(format!(
                "`{}` was not found on PATH; install it or switch the backend to API mode",
                program
            )),
            ExecError::Empty | ExecError::Syntax(_) | ExecError::UnsafeToken(_) => {
                BackendError::Config(format!("invalid CLI command: {}", err))
            }
            ExecError::Timeout { timeout, .. } => BackendError::Timeout(timeout),
            ExecError::NonZeroExit { code, stderr, .. } => BackendError::Process { code, stderr },
            ExecError::Spawn { .. } | ExecError::Io { .. } => BackendError::Spawn(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no backends requested")]
    NoBackends,

    #[error("at most {max} distinct backends can be queried at once (got {requested})")]
    TooManyBackends { max: usize, requested: usize },

    #[error("compare needs at least {min} backends (got {requested})")]
    TooFewBackends { min: usize, requested: usize },

    #[error("backend `{0}` is not configured")]
    UnknownBackend(BackendId),
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("cannot read bundle root {}: {source}", .path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bundle root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// Failures of the combined bundle-then-query operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("bundling task failed: {0}")]
    BundleTask(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_errors_map_onto_taxonomy() {
        let missing: BackendError = ExecError::NotFound("gemini".to_string()).into();
        assert!(missing.is_config());
        assert!(missing.to_string().contains("gemini"));

        let timeout: BackendError = ExecError::Timeout {
            program: "gemini".to_string(),
            timeout: Duration::from_secs(2),
        }
        .into();
        assert!(timeout.is_timeout());

        let exit: BackendError = ExecError::NonZeroExit {
            program: "gemini".to_string(),
            code: 41,
            stderr: "quota exceeded".to_string(),
        }
        .into();
        assert_eq!(
            exit,
            BackendError::Process {
                code: 41,
                stderr: "quota exceeded".to_string()
            }
        );
        assert_eq!(exit.to_string(), "process exited with code 41: quota exceeded");
    }
}
