use std::sync::Arc;

use serde::Serialize;
use taskq_core::config::AppConfig;
use taskq_core::{QueueEvent, QueueHandle, TaskRecord, WorkflowDriver, WorkflowSummary};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::plan::PlanFile;
use crate::shell::ShellRunner;

#[derive(Serialize)]
struct RunReport<'a> {
    summary: &'a WorkflowSummary,
    tasks: Vec<TaskRecord>,
}

#[tracing::instrument(name = "cli.run", skip(args, cfg), fields(plan = %args.plan.display()))]
pub async fn run_cmd(args: RunArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let plan = PlanFile::load(&args.plan)?;

    let mut executor_cfg = cfg.executor.clone();
    if let Some(max_parallel) = args.max_parallel {
        executor_cfg.max_parallel = max_parallel;
    }
    if args.cancel_blocked {
        executor_cfg.cancel_blocked = true;
    }
    if args.json || args.no_progress || !atty::is(atty::Stream::Stderr) {
        executor_cfg.progress_bar = false;
    }

    let handle = QueueHandle::from_config(&cfg.queue);
    spawn_event_logger(&handle);
    handle
        .add_tasks(plan.into_tasks(cfg.queue.default_max_retries))
        .await?;

    let driver = WorkflowDriver::from_config(Arc::new(ShellRunner::new()), &executor_cfg);
    let summary = driver.run(&handle).await?;

    if args.json {
        let report = RunReport {
            summary: &summary,
            tasks: handle.records().await,
        };
        let out = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
        println!("{out}");
    } else {
        print_summary(&summary);
    }

    Ok(if summary.is_success() { 0 } else { 1 })
}

fn spawn_event_logger(handle: &QueueHandle) {
    let mut event_rx = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            let task_id = event.task_id().unwrap_or("-");
            let at = event.timestamp().format("%H:%M:%S%.3f");
            match &event {
                QueueEvent::StatusChanged { from, to, .. } => {
                    tracing::debug!("[{}] Task {} {} -> {}", at, task_id, from, to);
                }
                QueueEvent::TaskRetried {
                    attempt,
                    max_retries,
                    ..
                } => {
                    tracing::info!("[{}] Task {} retry {}/{}", at, task_id, attempt, max_retries);
                }
                QueueEvent::DependencyResolved { dependency_id, .. } => {
                    tracing::trace!("[{}] Task {} received {}", at, task_id, dependency_id);
                }
                _ => {}
            }
        }
    });
}

fn print_summary(summary: &WorkflowSummary) {
    println!(
        "{}/{} completed, {} failed, {} cancelled, {} retries ({}ms)",
        summary.completed,
        summary.total,
        summary.failed,
        summary.cancelled,
        summary.retries,
        summary.duration_ms
    );
    for (task_id, result) in &summary.results {
        match result.as_str() {
            Some(s) => println!("  ok      {task_id}: {s}"),
            None => println!("  ok      {task_id}: {result}"),
        }
    }
    for (task_id, error) in &summary.errors {
        println!("  failed  {task_id}: {error}");
    }
    if !summary.stalled.is_empty() {
        println!("  stalled {}", summary.stalled.join(", "));
    }
}
