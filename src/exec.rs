use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::context::Ctx;
use crate::error::{Error, Result};

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CallResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CallResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run a command, capturing stdout/stderr.
///
/// Output is logged line by line at debug level. When a timeout is in
/// effect (per-call override, else the context default) and the child has
/// not exited in time, it is killed and `Error::Timeout` is returned.
/// A non-zero exit is not an error here; use [`call_throws`] for that.
pub async fn call(ctx: &Ctx, command: &[&str], timeout: Option<u64>) -> Result<CallResult> {
    debug!("Running command: {}", command.join(" "));

    let mut cmd = Command::new(command[0]);
    cmd.args(&command[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    let seconds = timeout.or(ctx.timeout);

    let output = match seconds {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await {
                Ok(out) => out?,
                // dropping the future kills the child (kill_on_drop)
                Err(_) => {
                    info!("Command timed out after {}s: {}", secs, command.join(" "));
                    return Err(Error::Timeout {
                        command: command.join(" "),
                        seconds: secs,
                    });
                }
            }
        }
        None => child.wait_with_output().await?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let code = output.status.code().unwrap_or(-1);

    for line in stdout.lines() {
        debug!("{}: stdout {}", command[0], line);
    }
    for line in stderr.lines() {
        debug!("{}: stderr {}", command[0], line);
    }
    if code != 0 {
        debug!("Non-zero exit code {} from {}", code, command.join(" "));
    }

    Ok(CallResult {
        stdout,
        stderr,
        code,
    })
}

/// Like [`call`], but a non-zero exit becomes `Error::Subprocess` with the
/// captured output attached for diagnostics.
pub async fn call_throws(ctx: &Ctx, command: &[&str], timeout: Option<u64>) -> Result<CallResult> {
    let res = call(ctx, command, timeout).await?;
    if !res.success() {
        return Err(Error::Subprocess {
            command: command.join(" "),
            code: res.code,
            stdout: res.stdout,
            stderr: res.stderr,
        });
    }
    Ok(res)
}

/// Run a command with inherited stdio, for interactive use (shell,
/// one-off container runs). Returns the exit code.
pub async fn call_timeout(ctx: &Ctx, command: &[&str], timeout: Option<u64>) -> Result<i32> {
    debug!("Running command (timeout={:?}): {}", timeout, command.join(" "));

    let mut cmd = Command::new(command[0]);
    cmd.args(&command[1..]).kill_on_drop(true);
    let mut child = cmd.spawn()?;
    let seconds = timeout.or(ctx.timeout);

    let status = match seconds {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    return Err(Error::Timeout {
                        command: command.join(" "),
                        seconds: secs,
                    })
                }
            }
        }
        None => child.wait().await?,
    };
    Ok(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_ctx() -> Ctx {
        Ctx::with_runtime(PathBuf::from("/usr/bin/podman"))
    }

    #[tokio::test]
    async fn test_call_captures_output() {
        let ctx = test_ctx();
        let res = call(&ctx, &["echo", "hello"], None).await.unwrap();
        assert!(res.success());
        assert_eq!(res.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_call_nonzero_is_not_error() {
        let ctx = test_ctx();
        let res = call(&ctx, &["false"], None).await.unwrap();
        assert!(!res.success());
    }

    #[tokio::test]
    async fn test_call_throws_on_failure() {
        let ctx = test_ctx();
        let err = call_throws(&ctx, &["false"], None).await.unwrap_err();
        assert!(matches!(err, Error::Subprocess { .. }));
    }

    #[tokio::test]
    async fn test_call_timeout_kills_child() {
        let ctx = test_ctx();
        let err = call(&ctx, &["sleep", "30"], Some(1)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { seconds: 1, .. }));
    }

    #[tokio::test]
    async fn test_call_timeout_returns_exit_code() {
        let ctx = test_ctx();
        assert_eq!(call_timeout(&ctx, &["true"], None).await.unwrap(), 0);
        assert_eq!(call_timeout(&ctx, &["false"], None).await.unwrap(), 1);
    }
}
