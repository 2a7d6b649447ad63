use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::ExecutorConfig;
use crate::result::ExecutionResult;

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    code: String,
    timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Result<Self, String> {
        let code = code.into();
        if code.is_empty() {
            return Err("code must not be empty".to_owned());
        }
        Ok(Self {
            code,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Runs untrusted snippets, one fresh child process per call. The process
/// boundary is the only isolation; the code itself is never inspected.
#[derive(Debug, Clone)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Single execution attempt. Every outcome lands in one of the three
    /// `ExecutionResult` arms; nothing panics or escapes as a raw error.
    pub async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        match self.spawn_and_capture(request.code(), timeout).await {
            Ok(Some((stdout, stderr))) => ExecutionResult::Completed { stdout, stderr },
            Ok(None) => ExecutionResult::TimedOut,
            Err(err) => ExecutionResult::LaunchFailed {
                cause: format!("{err:#}"),
            },
        }
    }

    /// `Ok(Some(_))` is a completed run, `Ok(None)` a timeout. The child is
    /// reaped before this returns, on every path.
    async fn spawn_and_capture(
        &self,
        code: &str,
        timeout: Duration,
    ) -> anyhow::Result<Option<(String, String)>> {
        let mut command = Command::new(&self.config.interpreter);
        command
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group so the timeout kill also reaches anything the
        // interpreter itself spawned.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().with_context(|| {
            format!("failed to spawn interpreter {}", self.config.interpreter)
        })?;

        // Pipe handles come out so `child` stays available for the kill path.
        let mut child_stdout = child.stdout.take().context("child stdout missing")?;
        let mut child_stderr = child.stderr.take().context("child stderr missing")?;

        let drain = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let (read_out, read_err) = tokio::join!(
                child_stdout.read_to_end(&mut stdout),
                child_stderr.read_to_end(&mut stderr),
            );
            read_out.context("failed to read child stdout")?;
            read_err.context("failed to read child stderr")?;
            Ok::<_, anyhow::Error>((stdout, stderr))
        };

        let captured = match tokio::time::timeout(timeout, drain).await {
            Ok(captured) => captured,
            Err(_) => {
                // Deadline expired. Partial output is discarded so the
                // timeout outcome stays unambiguous.
                kill_and_reap(&mut child).await;
                return Ok(None);
            }
        };
        let (stdout, stderr) = match captured {
            Ok(buffers) => buffers,
            Err(err) => {
                kill_and_reap(&mut child).await;
                return Err(err);
            }
        };

        child.wait().await.context("failed to wait for child")?;
        Ok(Some((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        )))
    }
}

/// Best-effort group kill, then a guaranteed reap of the direct child so no
/// process outlives its request.
async fn kill_and_reap(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh_executor(default_timeout: Duration) -> Executor {
        Executor::new(ExecutorConfig {
            interpreter: "/bin/sh".to_owned(),
            default_timeout,
        })
    }

    async fn run_sh(code: &str) -> ExecutionResult {
        sh_executor(Duration::from_secs(10))
            .run(&ExecutionRequest::new(code).unwrap())
            .await
    }

    #[tokio::test]
    async fn captures_stdout() {
        match run_sh("echo hello").await {
            ExecutionResult::Completed { stdout, stderr } => {
                assert_eq!(stdout, "hello\n");
                assert!(stderr.is_empty());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        match run_sh("printf ok; printf bad 1>&2").await {
            ExecutionResult::Completed { stdout, stderr } => {
                assert_eq!(stdout, "ok");
                assert_eq!(stderr, "bad");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_still_completed() {
        match run_sh("echo out; exit 3").await {
            ExecutionResult::Completed { stdout, .. } => assert_eq!(stdout, "out\n"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn empty_code_rejected() {
        assert!(ExecutionRequest::new("").is_err());
    }

    #[tokio::test]
    async fn unspawnable_interpreter_is_launch_failure() {
        let executor = Executor::new(ExecutorConfig {
            interpreter: "/nonexistent/interpreter".to_owned(),
            default_timeout: Duration::from_secs(5),
        });
        let request = ExecutionRequest::new("echo hi").unwrap();
        match executor.run(&request).await {
            ExecutionResult::LaunchFailed { cause } => assert!(!cause.is_empty()),
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_discards_partial_output_and_returns_promptly() {
        let started = Instant::now();
        let request = ExecutionRequest::new("echo early; sleep 5").unwrap();
        let result = sh_executor(Duration::from_secs(1)).run(&request).await;
        assert_eq!(result, ExecutionResult::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn per_request_timeout_overrides_default() {
        let request = ExecutionRequest::new("sleep 5")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let result = sh_executor(Duration::from_secs(30)).run(&request).await;
        assert_eq!(result, ExecutionResult::TimedOut);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_leaves_no_child_behind() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let code = format!("echo $$ > {}; sleep 30", pid_file.display());
        let result = sh_executor(Duration::from_secs(1))
            .run(&ExecutionRequest::new(code).unwrap())
            .await;
        assert_eq!(result, ExecutionResult::TimedOut);

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // The child was reaped before run returned, so signal 0 must fail.
        assert!(
            kill(Pid::from_raw(pid), None::<Signal>).is_err(),
            "child pid {pid} survived the timeout kill"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_runs_do_not_cross_contaminate() {
        let executor = sh_executor(Duration::from_secs(10));
        let mut handles = Vec::new();
        for i in 0..12 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                let request = ExecutionRequest::new(format!("echo snippet-{i}")).unwrap();
                (i, executor.run(&request).await)
            }));
        }
        for handle in handles {
            let (i, result) = handle.await.unwrap();
            match result {
                ExecutionResult::Completed { stdout, stderr } => {
                    assert_eq!(stdout, format!("snippet-{i}\n"));
                    assert!(stderr.is_empty());
                }
                other => panic!("run {i} failed: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn deterministic_code_is_idempotent() {
        let executor = sh_executor(Duration::from_secs(10));
        let request = ExecutionRequest::new("printf deterministic").unwrap();
        let first = executor.run(&request).await;
        let second = executor.run(&request).await;
        assert_eq!(first, second);
        assert!(matches!(first, ExecutionResult::Completed { .. }));
    }
}
