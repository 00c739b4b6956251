use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use crate::ExecError;

const FORBIDDEN_EXACT_TOKENS: &[&str] = &[";", "&&", "||", "|", ">", "<", ">>", "<<"];
const FORBIDDEN_SUBSTRINGS: &[&str] = &["`", "$(", "${", ";", "&&", "||", "|", ">", "<"];
const MAX_STDERR_IN_ERROR: usize = 2000;

/// Captured streams of a process that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Splits a configured command line (e.g. `npx @google/gemini-cli`) into argv.
///
/// The result is executed directly, never through a shell, so shell
/// composition tokens are rejected outright.
pub fn parse_command_line(raw: &str) -> Result<Vec<String>, ExecError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExecError::Empty);
    }

    let argv = shell_words::split(trimmed).map_err(|e| ExecError::Syntax(e.to_string()))?;
    if argv.is_empty() {
        return Err(ExecError::Empty);
    }

    for token in &argv {
        if FORBIDDEN_EXACT_TOKENS.contains(&token.as_str())
            || FORBIDDEN_SUBSTRINGS.iter().any(|bad| token.contains(bad))
        {
            return Err(ExecError::UnsafeToken(token.clone()));
        }
    }

    Ok(argv)
}

/// Looks up an executable the way a shell would, without spawning it.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in executable_names(program) {
            let full = dir.join(&name);
            if is_executable(&full) {
                return Some(full);
            }
        }
    }
    None
}

fn executable_names(program: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![
            program.to_string(),
            format!("{}.exe", program),
            format!("{}.cmd", program),
        ]
    } else {
        vec![program.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Runs `argv` to completion, capturing both streams.
///
/// The child is killed once `timeout` elapses. A non-zero exit status is an
/// error carrying the exit code and (bounded) stderr.
pub async fn run_captured(argv: &[String], timeout: Duration) -> Result<CapturedOutput, ExecError> {
    let (program, args) = argv.split_first().ok_or(ExecError::Empty)?;

    let mut cmd = TokioCommand::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ExecError::NotFound(program.clone())
        } else {
            ExecError::Spawn {
                program: program.clone(),
                source,
            }
        }
    })?;
    debug!(program = %program, args = args.len(), "spawned process");

    let stdout = child.stdout.take().ok_or_else(|| ExecError::Io {
        program: program.clone(),
        source: std::io::Error::other("stdout was not captured"),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| ExecError::Io {
        program: program.clone(),
        source: std::io::Error::other("stderr was not captured"),
    })?;

    // Drain both pipes concurrently so a chatty child cannot block on a full buffer.
    let mut stdout_handle = tokio::spawn(read_lossy(stdout));
    let mut stderr_handle = tokio::spawn(read_lossy(stderr));

    // The deadline covers the pipes too: a forked helper can hold them open after exit.
    let finished = tokio::time::timeout(timeout, async {
        let status = child.wait().await;
        let stdout = (&mut stdout_handle).await.unwrap_or_default();
        let stderr = (&mut stderr_handle).await.unwrap_or_default();
        (status, stdout, stderr)
    })
    .await;

    let (status, stdout, stderr) = match finished {
        Ok((status, stdout, stderr)) => {
            let status = status.map_err(|source| ExecError::Io {
                program: program.clone(),
                source,
            })?;
            (status, stdout, stderr)
        }
        Err(_) => {
            warn!(program = %program, timeout_ms = timeout.as_millis() as u64, "killing timed out process");
            // The child may have exited already, leaving only a helper on the pipes.
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(err) = child.kill().await {
                    warn!(program = %program, error = %err, "failed to kill process");
                }
            }
            stdout_handle.abort();
            stderr_handle.abort();
            return Err(ExecError::Timeout {
                program: program.clone(),
                timeout,
            });
        }
    };

    if !status.success() {
        return Err(ExecError::NonZeroExit {
            program: program.clone(),
            code: status.code().unwrap_or(-1),
            stderr: truncate(stderr.trim(), MAX_STDERR_IN_ERROR),
        });
    }

    Ok(CapturedOutput { stdout, stderr })
}

async fn read_lossy<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
