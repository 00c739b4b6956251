use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use prism_exec::{CliTool, ExecError, GeminiCli};

use super::{Availability, Backend, Completion};
use crate::config::BackendDescriptor;
use crate::error::BackendError;

/// Runs a locally installed CLI tool once per prompt.
pub struct CliBackend {
    tool: Arc<dyn CliTool>,
    default_model: String,
}

impl CliBackend {
    pub fn new(tool: Arc<dyn CliTool>, default_model: impl Into<String>) -> Self {
        Self {
            tool,
            default_model: default_model.into(),
        }
    }

    /// Gemini CLI from a configured command string such as `npx @google/gemini-cli`.
    pub fn gemini(command: &str, descriptor: &BackendDescriptor) -> Result<Self, ExecError> {
        let tool = GeminiCli::from_command_line(command)?;
        Ok(Self::new(Arc::new(tool), descriptor.default_model.clone()))
    }
}

#[async_trait]
impl Backend for CliBackend {
    async fn execute(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Completion, BackendError> {
        let model = super::pick_model(model, &self.default_model);
        debug!(tool = self.tool.name(), model = %model, prompt_bytes = prompt.len(), "running cli tool");

        let stdout = self.tool.run(prompt, Some(model), timeout).await?;
        if stdout.trim().is_empty() {
            return Err(BackendError::NoResponse(format!(
                "{} produced no output",
                self.tool.name()
            )));
        }
        Ok(Completion {
            text: stdout,
            model: model.to_string(),
        })
    }

    async fn probe(&self) -> Availability {
        if self.tool.is_installed() {
            Availability::ready("CLI installed")
        } else {
            Availability::unavailable("CLI not found")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wraps `sh -c` so tests can script stdout, stderr and exit codes.
    struct ShellTool {
        command: Vec<String>,
        script: String,
    }

    impl ShellTool {
        fn new(program: &str, script: &str) -> Self {
            Self {
                command: vec![program.to_string()],
                script: script.to_string(),
            }
        }
    }

    #[async_trait]
    impl CliTool for ShellTool {
        fn name(&self) -> &str {
            "shell"
        }

        fn command(&self) -> &[String] {
            &self.command
        }

        fn build_args(&self, _prompt: &str, _model: Option<&str>) -> Vec<String> {
            vec!["-c".to_string(), self.script.clone()]
        }
    }

    fn backend(program: &str, script: &str) -> CliBackend {
        CliBackend::new(Arc::new(ShellTool::new(program, script)), "test-model")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_becomes_the_reply() {
        let completion = backend("sh", "printf '  the answer \\n'")
            .execute("q", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(completion.text, "the answer");
        assert_eq!(completion.model, "test-model");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_process_error() {
        let err = backend("sh", "echo 'quota exceeded' >&2; exit 41")
            .execute("q", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            BackendError::Process { code, stderr } => {
                assert_eq!(code, 41);
                assert!(stderr.contains("quota exceeded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn blank_output_is_no_response() {
        let err = backend("sh", "true")
            .execute("q", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoResponse(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_is_killed_at_the_deadline() {
        let started = std::time::Instant::now();
        let err = backend("sh", "sleep 5")
            .execute("q", None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_output_does_not_outrun_the_deadline() {
        let started = std::time::Instant::now();
        let err = backend("sh", "sleep 3 & echo early")
            .execute("q", None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn missing_executable_is_a_configuration_error() {
        let backend = backend("prism-relay-test-no-such-tool", "true");
        let err = backend
            .execute("q", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(backend.probe().await, Availability::unavailable("CLI not found"));
    }
}
