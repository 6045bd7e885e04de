//! Forecast readiness per metric

use anyhow::Result;
use chrono::Utc;
use forecast_lib::artifacts::ArtifactStore;
use forecast_lib::{load_overviews, MetricOverview};
use tabled::Tabled;

use crate::output::{
    color_status, format_optional, format_time, print_info, print_rows, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Order")]
    order: String,
    #[tabled(rename = "Forecast Generated")]
    generated: String,
    #[tabled(rename = "Peak Upper")]
    peak_upper: String,
}

impl From<&MetricOverview> for StatusRow {
    fn from(overview: &MetricOverview) -> Self {
        Self {
            metric: overview.metric.clone(),
            status: color_status(overview.status.as_str()),
            model: overview
                .model
                .as_ref()
                .map(|m| m.version.clone())
                .unwrap_or_else(|| "-".to_string()),
            order: overview
                .model
                .as_ref()
                .map(|m| m.order.to_string())
                .unwrap_or_else(|| "-".to_string()),
            generated: overview
                .forecast
                .as_ref()
                .map(|f| format_time(f.generated_at))
                .unwrap_or_else(|| "-".to_string()),
            peak_upper: format_optional(overview.peak_upper()),
        }
    }
}

/// Show readiness for the given metrics, or every metric in the store
pub async fn show_status(
    store: &ArtifactStore,
    metrics: Vec<String>,
    stale_after_secs: i64,
    format: OutputFormat,
) -> Result<()> {
    let metrics = if metrics.is_empty() {
        store.list_metrics().await?
    } else {
        metrics
    };

    if metrics.is_empty() {
        print_warning(&format!(
            "No forecasts found under {}.",
            store.root().display()
        ));
        print_info("Run `forecast-pipeline run` to ingest history, train models and forecast.");
        return Ok(());
    }

    let overviews = load_overviews(store, &metrics, Utc::now().timestamp(), stale_after_secs).await;
    let rows: Vec<StatusRow> = overviews.iter().map(StatusRow::from).collect();
    print_rows(&rows, &overviews, format);

    if matches!(format, OutputFormat::Table) {
        for overview in &overviews {
            if let Some(guidance) = &overview.guidance {
                print_warning(guidance);
            }
        }
    }
    Ok(())
}
