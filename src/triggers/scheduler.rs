//! Cron-driven scenario runs.
//!
//! Expressions use the `cron` crate's format, seconds first:
//! `0 0 * * * *` fires at the top of every hour.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tracing::{info, warn};

use crate::config::ScheduleConfig;
use crate::error::PipelineError;
use crate::pipeline::processor::SelectionPipeline;
use crate::pipeline::types::ScenarioKind;

pub fn parse_schedule(expression: &str) -> Result<Schedule, PipelineError> {
    Schedule::from_str(expression).map_err(|e| PipelineError::Schedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Configured schedules, validated. Fails on the first bad expression.
pub fn configured(
    config: &ScheduleConfig,
) -> Result<Vec<(ScenarioKind, Schedule)>, PipelineError> {
    [
        (ScenarioKind::Timeline, &config.timeline),
        (ScenarioKind::Trend, &config.trend),
        (ScenarioKind::Keyword, &config.search),
    ]
    .into_iter()
    .filter_map(|(scenario, expr)| expr.as_deref().map(|e| (scenario, e)))
    .map(|(scenario, expr)| parse_schedule(expr).map(|s| (scenario, s)))
    .collect()
}

/// Run `scenario` every time `schedule` fires. Runs never overlap within
/// one ticker; a slow run delays the next fire.
pub fn spawn_scenario_ticker(
    pipeline: Arc<SelectionPipeline>,
    scenario: ScenarioKind,
    schedule: Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!(scenario = %scenario, "Schedule has no upcoming fire time, stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            let report = pipeline.run(scenario).await;
            info!(
                scenario = %scenario,
                run_id = %report.run_id,
                republished = report.republished,
                "Scheduled run finished"
            );
        }
    })
}

/// Validate every configured schedule, then spawn one ticker per schedule.
pub fn spawn_schedulers(
    pipeline: Arc<SelectionPipeline>,
    config: &ScheduleConfig,
) -> Result<Vec<tokio::task::JoinHandle<()>>, PipelineError> {
    let schedules = configured(config)?;
    Ok(schedules
        .into_iter()
        .map(|(scenario, schedule)| {
            info!(scenario = %scenario, "Scheduling scenario");
            spawn_scenario_ticker(Arc::clone(&pipeline), scenario, schedule)
        })
        .collect())
}
