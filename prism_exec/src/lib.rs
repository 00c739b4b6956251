pub mod command_exec;
pub mod gemini;

pub use command_exec::{find_on_path, parse_command_line, run_captured, CapturedOutput};
pub use gemini::GeminiCli;

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command is empty")]
    Empty,
    #[error("invalid command syntax: {0}")]
    Syntax(String),
    #[error("unsafe token in command: {0}")]
    UnsafeToken(String),
    #[error("`{0}` was not found on PATH")]
    NotFound(String),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` timed out after {}s", .timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },
    #[error("`{program}` exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("I/O error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A locally installed LLM command-line tool that answers one prompt per run.
#[async_trait]
pub trait CliTool: Send + Sync {
    fn name(&self) -> &str;

    /// Program plus any fixed leading arguments.
    fn command(&self) -> &[String];

    /// Per-invocation arguments carrying the prompt and model.
    fn build_args(&self, prompt: &str, model: Option<&str>) -> Vec<String>;

    /// Strips tool chatter from stdout, leaving only the answer.
    fn clean_output(&self, stdout: &str) -> String {
        stdout.trim().to_string()
    }

    fn is_installed(&self) -> bool {
        self.command()
            .first()
            .map(|program| find_on_path(program).is_some())
            .unwrap_or(false)
    }

    async fn run(
        &self,
        prompt: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        let program = self.command().first().ok_or(ExecError::Empty)?;
        if find_on_path(program).is_none() {
            return Err(ExecError::NotFound(program.clone()));
        }

        let mut argv = self.command().to_vec();
        argv.extend(self.build_args(prompt, model));
        let output = run_captured(&argv, timeout).await?;
        let chatter = output.stderr.trim();
        if !chatter.is_empty() {
            tracing::debug!(tool = self.name(), stderr = %chatter, "tool wrote to stderr");
        }
        Ok(self.clean_output(&output.stdout))
    }
}
