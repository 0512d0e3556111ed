use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Terminal progress for a workflow run.
///
/// One overall bar counts settled tasks; each running task gets a spinner
/// until it reports back. A disabled monitor is a no-op.
pub struct ProgressMonitor {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: HashMap<String, ProgressBar>,
    enabled: bool,
}

impl ProgressMonitor {
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                multi: MultiProgress::new(),
                overall: ProgressBar::hidden(),
                task_bars: HashMap::new(),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_tasks as u64));

        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        overall.set_style(style);
        overall.set_message("Starting...");

        Self {
            multi,
            overall,
            task_bars: HashMap::new(),
            enabled: true,
        }
    }

    /// Show a spinner for a task that just started running.
    pub fn start_task(&mut self, task_id: &str, attempt: u32) {
        if !self.enabled {
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        let style = ProgressStyle::default_spinner()
            .template("  {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        if attempt > 0 {
            bar.set_message(format!("⏳ {} (retry {})", task_id, attempt));
        } else {
            bar.set_message(format!("⏳ {}", task_id));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Some(previous) = self.task_bars.insert(task_id.to_string(), bar) {
            previous.finish_and_clear();
        }
    }

    /// Close a task's spinner. `settled` advances the overall bar; a failure
    /// that will be retried leaves it where it is.
    pub fn finish_task(&mut self, task_id: &str, success: bool, duration_ms: u64, settled: bool) {
        if !self.enabled {
            return;
        }

        if let Some(bar) = self.task_bars.remove(task_id) {
            let icon = match (success, settled) {
                (true, _) => "✅",
                (false, true) => "❌",
                (false, false) => "🔁",
            };
            bar.finish_with_message(format!("{} {} ({}ms)", icon, task_id, duration_ms));
        }

        if settled {
            self.overall.inc(1);
        }
    }

    /// Count tasks that settled without running, e.g. cancelled ones.
    pub fn skip_tasks(&self, count: usize) {
        if self.enabled && count > 0 {
            self.overall.inc(count as u64);
        }
    }

    pub fn set_message(&self, msg: &str) {
        if self.enabled {
            self.overall.set_message(msg.to_string());
        }
    }

    pub fn finish(&self, success: bool) {
        if !self.enabled {
            return;
        }

        let msg = if success {
            "✅ All tasks completed"
        } else {
            "❌ Workflow finished with failures"
        };

        self.overall.finish_with_message(msg.to_string());
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        for (_, bar) in self.task_bars.drain() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_monitor_disabled() {
        let mut monitor = ProgressMonitor::new(3, false);

        monitor.start_task("task1", 0);
        monitor.finish_task("task1", true, 100, true);
        monitor.skip_tasks(2);
        monitor.set_message("test");
        monitor.finish(true);
        assert!(monitor.task_bars.is_empty());
    }

    #[test]
    fn test_progress_monitor_enabled() {
        let mut monitor = ProgressMonitor::new(3, true);

        monitor.start_task("task1", 0);
        monitor.start_task("task2", 0);
        monitor.finish_task("task1", true, 100, true);
        monitor.finish_task("task2", false, 200, false);
        monitor.start_task("task2", 1);
        assert_eq!(monitor.task_bars.len(), 1);

        monitor.finish_task("task2", false, 200, true);
        monitor.skip_tasks(1);
        assert_eq!(monitor.overall.position(), 3);
        monitor.finish(false);
    }
}
