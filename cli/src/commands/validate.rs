use taskq_core::config::AppConfig;
use taskq_core::TaskQueue;

use crate::cli::ValidateArgs;
use crate::error::CliError;
use crate::plan::PlanFile;

pub fn validate_cmd(args: ValidateArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let plan = PlanFile::load(&args.plan)?;
    let mut queue = TaskQueue::from_config(&cfg.queue);
    for task in plan.into_tasks(cfg.queue.default_max_retries) {
        queue.add_task(task)?;
    }

    let stages = queue.validate()?;
    println!("{}: {} tasks in {} stages", args.plan.display(), queue.len(), stages.len());
    for (i, stage) in stages.iter().enumerate() {
        println!("  stage {}: {}", i + 1, stage.join(", "));
    }
    Ok(0)
}
