use std::time::Duration as StdDuration;

use actix_web::rt;
use chrono::{Duration, Local, NaiveDateTime};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use sqlx::MySqlPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::model::actor::Actor;
use crate::service::{self, overtime::OvertimeBatch};

/// Work handed to the background worker. Each variant carries everything
/// needed to run it, except the sweep mark the worker keeps itself.
#[derive(Debug, Clone)]
pub enum Task {
    GenerateOvertime { batch: OvertimeBatch, actor: Actor },
    /// Yesterday plus every sheet modified since the last successful sweep.
    OvertimeSweep,
    LeaveCycle,
}

#[derive(Clone)]
pub struct TaskQueue {
    sender: UnboundedSender<(Uuid, Task)>,
}

impl TaskQueue {
    pub fn enqueue(&self, task: Task) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        self.sender
            .unbounded_send((id, task))
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(id)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Spawns the worker on the actix runtime and returns its queue.
pub fn start(pool: MySqlPool, config: &Config) -> TaskQueue {
    let (sender, receiver) = mpsc::unbounded();
    let lookback = i64::from(config.compensatory_lookback_days);
    rt::spawn(worker(pool, receiver, lookback));
    TaskQueue { sender }
}

async fn worker(pool: MySqlPool, mut receiver: UnboundedReceiver<(Uuid, Task)>, lookback: i64) {
    let mut swept_until = now();
    while let Some((id, task)) = receiver.next().await {
        log::debug!("task {id} picked up: {task:?}");
        if let Err(e) = run(&pool, &task, lookback, &mut swept_until).await {
            error!(task_id = %id, error = %e, "Background task failed");
        }
    }
    info!("Task queue closed, worker exiting");
}

/// `swept_until` only moves once a sweep has fully succeeded.
async fn run(
    pool: &MySqlPool,
    task: &Task,
    lookback: i64,
    swept_until: &mut NaiveDateTime,
) -> AppResult<()> {
    match task {
        Task::GenerateOvertime { batch, actor } => {
            service::overtime::generate_overtime(pool, batch, *actor, now()).await?;
        }
        Task::OvertimeSweep => {
            let at = now();
            let yesterday = at.date() - Duration::days(1);
            let daily = OvertimeBatch {
                start: yesterday,
                end: yesterday,
                period: None,
                fix_ids: None,
                fix_missing: false,
            };
            service::overtime::generate_overtime(pool, &daily, Actor::System, at).await?;

            let touched = service::overtime::modified_since(pool, *swept_until).await?;
            let mut failed = 0;
            if !touched.is_empty() {
                let fix = OvertimeBatch {
                    fix_ids: Some(touched),
                    ..daily
                };
                let report =
                    service::overtime::generate_overtime(pool, &fix, Actor::System, at).await?;
                failed = report.failed.len();
            }
            // failed sheets are picked up again by the next sweep
            if failed == 0 {
                *swept_until = at;
            }
        }
        Task::LeaveCycle => {
            service::leave::run_cycle(pool, lookback, now()).await?;
        }
    }
    Ok(())
}

/// Periodic producers for the overtime sweep and the leave cycle.
pub fn schedule(queue: TaskQueue, config: &Config) {
    let overtime_every = StdDuration::from_secs(config.overtime_sweep_interval_secs.max(1));
    let leave_every = StdDuration::from_secs(config.leave_sweep_interval_secs.max(1));

    let overtime_queue = queue.clone();
    rt::spawn(async move {
        let mut ticker = rt::time::interval(overtime_every);
        loop {
            ticker.tick().await;
            if let Err(e) = overtime_queue.enqueue(Task::OvertimeSweep) {
                error!(error = %e, "Could not enqueue overtime sweep");
                break;
            }
        }
    });

    rt::spawn(async move {
        let mut ticker = rt::time::interval(leave_every);
        loop {
            ticker.tick().await;
            if let Err(e) = queue.enqueue(Task::LeaveCycle) {
                error!(error = %e, "Could not enqueue leave cycle");
                break;
            }
        }
    });
}
