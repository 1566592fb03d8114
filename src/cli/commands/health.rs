//! `health`: one round of every probe.

use anyhow::{Context, Result};
use comfy_table::Cell;
use serde::Serialize;

use crate::application::EventRuntime;
use crate::cli::output::{base_table, output, status_cell, CommandOutput};
use crate::domain::models::{Config, HealthReport, HealthStatus};

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct HealthOutput(pub HealthReport);

impl CommandOutput for HealthOutput {
    fn to_human(&self) -> String {
        let report = &self.0;
        let mut table = base_table(&["Service", "Status", "Response (ms)", "Details"]);
        for result in report.services.values() {
            let mut details: Vec<String> = result
                .details
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            if let Some(ref error) = result.error {
                details.insert(0, error.clone());
            }
            table.add_row(vec![
                Cell::new(result.service.as_str()),
                status_cell(result.status),
                Cell::new(result.response_time_ms),
                Cell::new(details.join("\n")),
            ]);
        }

        format!(
            "Overall: {} (HTTP {})\nChecked at {}\n{table}",
            report.status,
            report.status.http_status(),
            report.timestamp.to_rfc3339()
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_default()
    }
}

pub async fn execute(config: Config, json: bool) -> Result<()> {
    let runtime = EventRuntime::builder(config)
        .build()
        .context("Failed to build event runtime")?;
    let report = runtime.health().check_now().await;
    let status = report.status;

    output(&HealthOutput(report), json);

    if status == HealthStatus::Unhealthy {
        anyhow::bail!("Overall health is unhealthy");
    }
    Ok(())
}
