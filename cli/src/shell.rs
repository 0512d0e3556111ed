use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use taskq_core::executor::TaskRunner;
use taskq_core::Task;

use crate::plan::COMMAND_KEY;

pub const DEPENDENCY_RESULTS_ENV: &str = "TASKQ_DEPENDENCY_RESULTS";
pub const TASK_ID_ENV: &str = "TASKQ_TASK_ID";

/// Runs each task's `command` metadata through `sh -c`.
///
/// Trimmed stdout becomes the task result. A non-zero exit fails the task with
/// the trimmed stderr, or the exit status when stderr is empty.
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, task: &Task) -> Result<Value, String> {
        let command = task
            .metadata()
            .get(COMMAND_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("task {} has no command", task.id()))?;

        let dependency_results =
            serde_json::to_string(task.dependency_results()).map_err(|e| e.to_string())?;

        tracing::debug!(task_id = %task.id(), command = %command, "spawning shell command");

        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .env(DEPENDENCY_RESULTS_ENV, dependency_results)
            .env(TASK_ID_ENV, task.id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("spawn failed: {e}"))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(Value::String(stdout.trim_end().to_string()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(format!("command exited with {}", output.status))
        } else {
            Err(stderr.to_string())
        }
    }
}
