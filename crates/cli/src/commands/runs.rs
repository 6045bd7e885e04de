//! Pipeline run history

use anyhow::{bail, Result};
use colored::Colorize;
use forecast_lib::artifacts::ArtifactStore;
use forecast_lib::orchestrator::MetricOutcome;
use forecast_lib::RunRecord;
use tabled::Tabled;

use crate::output::{
    color_status, format_duration, format_time, print_info, print_rows, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Run ID")]
    run_id: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Metrics")]
    metrics: String,
    #[tabled(rename = "Exit")]
    exit_code: i32,
}

impl From<&RunRecord> for RunRow {
    fn from(r: &RunRecord) -> Self {
        Self {
            run_id: r.run_id.clone(),
            command: r.command.as_str().to_string(),
            started: format_time(r.started_at),
            duration: format_duration(r.finished_at - r.started_at),
            status: color_status(r.status.as_str()),
            metrics: format!("{}/{}", r.succeeded(), r.metrics.len()),
            exit_code: r.exit_code(),
        }
    }
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Failed At")]
    failed_stage: String,
    #[tabled(rename = "Error")]
    error_kind: String,
    #[tabled(rename = "Model")]
    model_version: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&MetricOutcome> for OutcomeRow {
    fn from(o: &MetricOutcome) -> Self {
        Self {
            metric: o.metric.clone(),
            state: color_status(o.state.as_str()),
            failed_stage: o.failed_stage.map(|s| s.as_str().to_string()).unwrap_or_default(),
            error_kind: o.error_kind.map(|k| k.as_str().to_string()).unwrap_or_default(),
            model_version: o.model_version.clone().unwrap_or_default(),
            reason: o.reason.clone().unwrap_or_default(),
        }
    }
}

/// List recent runs, or the per-metric outcomes of one run
pub async fn list_runs(
    store: &ArtifactStore,
    limit: usize,
    run_id: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let records = store.list_run_records().await?;

    if let Some(run_id) = run_id {
        let selected: Vec<&RunRecord> = records.iter().filter(|r| r.run_id == run_id).collect();
        if selected.is_empty() {
            bail!("no run record for run id {}", run_id);
        }
        match format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&selected)?;
                println!("{}", json);
            }
            OutputFormat::Table => {
                for record in selected {
                    println!(
                        "{} {} ({})",
                        "Run".bold(),
                        record.run_id.cyan(),
                        record.command.as_str()
                    );
                    let rows: Vec<OutcomeRow> =
                        record.metrics.iter().map(OutcomeRow::from).collect();
                    print_rows(&rows, &record.metrics, format);
                }
            }
        }
        return Ok(());
    }

    let records: Vec<RunRecord> = records.into_iter().take(limit).collect();
    if records.is_empty() && matches!(format, OutputFormat::Table) {
        print_warning("No pipeline runs recorded yet.");
        print_info("Run `forecast-pipeline run` to start one.");
        return Ok(());
    }

    let rows: Vec<RunRow> = records.iter().map(RunRow::from).collect();
    print_rows(&rows, &records, format);
    Ok(())
}
