use crate::command_exec::parse_command_line;
use crate::{CliTool, ExecError};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_GEMINI_COMMAND: &str = "gemini";

/// The Gemini CLI, invoked non-interactively with `-p <prompt>`.
#[derive(Debug, Clone)]
pub struct GeminiCli {
    command: Vec<String>,
}

impl Default for GeminiCli {
    fn default() -> Self {
        Self {
            command: vec![DEFAULT_GEMINI_COMMAND.to_string()],
        }
    }
}

impl GeminiCli {
    /// Builds the tool from a configured command line such as `npx @google/gemini-cli`.
    pub fn from_command_line(raw: &str) -> Result<Self, ExecError> {
        Ok(Self {
            command: parse_command_line(raw)?,
        })
    }
}

fn banner_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^Loaded cached credentials\.?$",
            r"^Data collection is disabled\.?$",
            r"^Using (?:cached|bundled) .*credentials.*$",
            r"^\[(?:dotenv|STARTUP|DEBUG)[^\]]*\].*$",
            r"^\(node:\d+\) .*Warning.*$",
            r"^\(Use `?node --trace-.*$",
            r"^YOLO mode is enabled\..*$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Removes known startup banner lines the CLI prints ahead of the answer.
pub fn strip_banner_lines(stdout: &str) -> String {
    let patterns = banner_patterns();
    stdout
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !patterns.iter().any(|re| re.is_match(trimmed))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[async_trait]
impl CliTool for GeminiCli {
    fn name(&self) -> &str {
        "gemini"
    }

    fn command(&self) -> &[String] {
        &self.command
    }

    fn build_args(&self, prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
            args.push("-m".to_string());
            args.push(model.to_string());
        }
        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }

    fn clean_output(&self, stdout: &str) -> String {
        strip_banner_lines(stdout)
    }
}
