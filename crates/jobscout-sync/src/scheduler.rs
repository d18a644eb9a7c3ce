//! Cron-driven repeated runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::pipeline::{Pipeline, RunOptions};

const STATS_WINDOW_DAYS: i64 = 7;

/// Run the pipeline once, logging store totals before and after.
/// Overlapping triggers are skipped while a run is still in flight.
pub async fn scheduled_run(pipeline: &Pipeline, options: &RunOptions, running: &Mutex<()>) {
    let Ok(_guard) = running.try_lock() else {
        warn!("previous run still in progress; skipping this trigger");
        return;
    };

    let before = match pipeline.store().recent_stats(STATS_WINDOW_DAYS).await {
        Ok(stats) => {
            info!(
                total = stats.total_jobs,
                processed = stats.processed_jobs,
                runs = stats.runs_in_window,
                "store before run"
            );
            Some(stats.total_jobs)
        }
        Err(err) => {
            warn!(error = %err, "could not read store stats");
            None
        }
    };

    match pipeline.run_once(options).await {
        Ok(summary) => info!(
            run_id = %summary.run_id,
            analyzed = summary.analyzed,
            matches = summary.matches,
            "scheduled run complete"
        ),
        Err(err) => error!(error = %format!("{err:#}"), "scheduled run failed"),
    }

    if let Ok(after) = pipeline.store().recent_stats(STATS_WINDOW_DAYS).await {
        info!(
            total = after.total_jobs,
            added = before.map(|b| after.total_jobs - b),
            "store after run"
        );
    }
}

/// Accept standard five-field crontab syntax by prepending a zero seconds
/// field; six- and seven-field expressions pass through.
fn with_seconds_field(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

pub async fn build_scheduler(pipeline: Arc<Pipeline>, options: RunOptions) -> Result<JobScheduler> {
    let cron = with_seconds_field(&pipeline.config().schedule_cron);
    let running = Arc::new(Mutex::new(()));

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = pipeline.clone();
        let running = running.clone();
        Box::pin(async move {
            scheduled_run(&pipeline, &options, &running).await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

/// Start the scheduler and block until Ctrl-C.
pub async fn run_scheduled(pipeline: Arc<Pipeline>, options: RunOptions) -> Result<()> {
    let cron = pipeline.config().schedule_cron.clone();
    let mut sched = build_scheduler(pipeline, options).await?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %cron, "scheduler running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
