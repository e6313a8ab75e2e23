//! Built-in tasks.
//!
//! All three work in one-second units and reach a cancellation checkpoint
//! after every unit, so a cancellation request takes effect within a second.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{Task, TaskContext, TaskError};
use crate::error::{Error, Result};

/// Length of one unit of simulated work.
pub const WORK_UNIT: Duration = Duration::from_secs(1);

fn units(n: u64) -> Duration {
    WORK_UNIT.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX))
}

fn require_positive(task: &str, duration: u64) -> Result<()> {
    if duration == 0 {
        return Err(Error::Validation(format!("{task}: duration must be > 0")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// long_task
// ---------------------------------------------------------------------------

/// Runs for `duration` seconds, reporting progress after every second.
pub struct LongTask;

#[derive(Debug, Deserialize)]
pub struct LongTaskArgs {
    pub duration: u64,
    #[serde(default)]
    pub payload: Value,
}

#[async_trait]
impl Task for LongTask {
    type Args = LongTaskArgs;

    fn name(&self) -> &'static str {
        "long_task"
    }

    fn validate(&self, args: &LongTaskArgs) -> Result<()> {
        require_positive(self.name(), args.duration)
    }

    fn expected_duration(&self, args: &LongTaskArgs) -> Duration {
        units(args.duration)
    }

    fn fingerprint_material(&self, args: &LongTaskArgs) -> (Value, u64) {
        let payload = match &args.payload {
            Value::Null => json!({}),
            other => other.clone(),
        };
        (payload, args.duration)
    }

    async fn run(
        &self,
        args: LongTaskArgs,
        ctx: &TaskContext,
    ) -> std::result::Result<Value, TaskError> {
        for unit in 1..=args.duration {
            tokio::time::sleep(WORK_UNIT).await;
            ctx.report_progress(unit, args.duration).await?;
            ctx.checkpoint().await?;
        }
        Ok(json!(format!("done:{}", self.name())))
    }
}

// ---------------------------------------------------------------------------
// task_a / task_b
// ---------------------------------------------------------------------------

/// Per-user processing tasks. Identical apart from their name and result tag.
#[derive(Debug, Clone, Copy)]
pub enum UserTask {
    A,
    B,
}

fn default_user_task_duration() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
pub struct UserTaskArgs {
    pub user_id: i64,
    #[serde(default = "default_user_task_duration")]
    pub duration: u64,
}

#[async_trait]
impl Task for UserTask {
    type Args = UserTaskArgs;

    fn name(&self) -> &'static str {
        match self {
            UserTask::A => "task_a",
            UserTask::B => "task_b",
        }
    }

    fn validate(&self, args: &UserTaskArgs) -> Result<()> {
        require_positive(self.name(), args.duration)
    }

    fn expected_duration(&self, args: &UserTaskArgs) -> Duration {
        units(args.duration)
    }

    /// Only the user matters: two requests for the same user are the same work.
    fn fingerprint_material(&self, args: &UserTaskArgs) -> (Value, u64) {
        (json!({ "user_id": args.user_id }), 0)
    }

    async fn run(
        &self,
        args: UserTaskArgs,
        ctx: &TaskContext,
    ) -> std::result::Result<Value, TaskError> {
        debug!(task = self.name(), user_id = args.user_id, "processing user");
        ctx.report_progress(0, args.duration).await?;
        for unit in 1..=args.duration {
            tokio::time::sleep(WORK_UNIT).await;
            ctx.report_progress(unit, args.duration).await?;
            ctx.checkpoint().await?;
        }
        Ok(json!({
            "type": self.name(),
            "user_id": args.user_id,
            "completed": true,
        }))
    }
}
