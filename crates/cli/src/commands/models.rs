//! Model version listing

use anyhow::Result;
use forecast_lib::artifacts::{ArtifactStore, ModelListing};
use tabled::Tabled;

use crate::output::{format_time, format_value, print_info, print_rows, print_warning, OutputFormat};

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Order")]
    order: String,
    #[tabled(rename = "AIC")]
    aic: String,
    #[tabled(rename = "BIC")]
    bic: String,
    #[tabled(rename = "Obs")]
    observations: usize,
    #[tabled(rename = "Trained")]
    trained: String,
    #[tabled(rename = "Latest")]
    latest: String,
}

impl From<&ModelListing> for ModelRow {
    fn from(m: &ModelListing) -> Self {
        Self {
            metric: m.metric.clone(),
            version: m.version.clone(),
            order: m.order.to_string(),
            aic: format_value(m.aic),
            bic: format_value(m.bic),
            observations: m.observations,
            trained: format_time(m.trained_at),
            latest: if m.latest { "*".to_string() } else { String::new() },
        }
    }
}

/// List persisted model versions
pub async fn list_models(
    store: &ArtifactStore,
    metric: Option<String>,
    latest_only: bool,
    format: OutputFormat,
) -> Result<()> {
    let models: Vec<ModelListing> = store
        .list_models()
        .await?
        .into_iter()
        .filter(|m| metric.as_ref().map_or(true, |want| &m.metric == want))
        .filter(|m| !latest_only || m.latest)
        .collect();

    if models.is_empty() && matches!(format, OutputFormat::Table) {
        print_warning("No trained models found.");
        print_info("Run `forecast-pipeline train` after ingesting, or `forecast-pipeline run`.");
        return Ok(());
    }

    let rows: Vec<ModelRow> = models.iter().map(ModelRow::from).collect();
    print_rows(&rows, &models, format);
    Ok(())
}
