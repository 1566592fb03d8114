//! `run`: start the runtime and block until a termination signal.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use crate::application::EventRuntime;
use crate::cli::output::{base_table, output, CommandOutput};
use crate::domain::models::{Config, EventEnvelope, Topic};
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::services::{handler_fn, HandlerError, HandlerRegistry, ShutdownReport};

/// Trigger events that get an audit-log handler in `run`.
pub const AUDITED_EVENT_TYPES: [&str; 3] =
    ["user_registered", "course_completed", "assignment_submitted"];

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Topics to consume, overriding `consumer.topics` (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub topics: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ShutdownOutput {
    pub clean: bool,
    pub elapsed_ms: u64,
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub timed_out: Vec<String>,
}

impl From<ShutdownReport> for ShutdownOutput {
    fn from(report: ShutdownReport) -> Self {
        Self {
            clean: report.is_clean(),
            elapsed_ms: u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            completed: report.completed,
            failed: report.failed,
            timed_out: report.timed_out,
        }
    }
}

impl CommandOutput for ShutdownOutput {
    fn to_human(&self) -> String {
        let mut table = base_table(&["Handler", "Outcome"]);
        for name in &self.completed {
            table.add_row(vec![name.as_str(), "completed"]);
        }
        for (name, error) in &self.failed {
            table.add_row(vec![name.clone(), format!("failed: {error}")]);
        }
        for name in &self.timed_out {
            table.add_row(vec![name.as_str(), "timed out"]);
        }
        format!(
            "Shutdown {} in {} ms\n{table}",
            if self.clean { "completed" } else { "finished with errors" },
            self.elapsed_ms
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: RunArgs, config: Config, json: bool) -> Result<()> {
    let log_config = LogConfig::try_from(&config.logging)?;
    let _logger = LoggerImpl::init(&log_config)?;

    let runtime = EventRuntime::builder(config)
        .build()
        .context("Failed to build event runtime")?;
    register_audit_handlers(&runtime.registry()).await;

    runtime
        .initialize()
        .await
        .context("Failed to initialize event runtime")?;

    if args.topics.is_empty() {
        runtime.start().await?;
    } else {
        let topics = args.topics.into_iter().map(Topic::from).collect();
        runtime.start_with_topics(topics).await?;
    }

    info!("Waiting for SIGINT or SIGTERM");
    let report = runtime.run_until_signal().await?;
    output(&ShutdownOutput::from(report), json);
    Ok(())
}

/// Log every trigger event the group consumes.
pub async fn register_audit_handlers(registry: &HandlerRegistry) {
    for event_type in AUDITED_EVENT_TYPES {
        let handler = handler_fn("audit_log", |event: EventEnvelope| async move {
            info!(
                event_id = %event.event_id(),
                event_type = event.event_type(),
                user_id = event.payload().user_id().unwrap_or("-"),
                "Event received"
            );
            Ok::<(), HandlerError>(())
        });
        registry.register(event_type, handler).await;
    }
}
