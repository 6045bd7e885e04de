//! Forecast display

use anyhow::Result;
use colored::Colorize;
use forecast_lib::artifacts::ArtifactStore;
use tabled::Tabled;

use crate::output::{format_time, format_value, print_info, print_rows, print_warning, OutputFormat};

#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Step")]
    step: usize,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Forecast")]
    forecast: String,
    #[tabled(rename = "Lower")]
    lower: String,
    #[tabled(rename = "Upper")]
    upper: String,
}

/// Show the latest forecast for one metric
pub async fn show_forecast(
    store: &ArtifactStore,
    metric: &str,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let Some(forecast) = store.load_forecast(metric).await? else {
        print_warning(&format!("No forecast for {} yet.", metric));
        print_info(&format!(
            "Run `forecast-pipeline run --metric {}` to produce one.",
            metric
        ));
        return Ok(());
    };

    let shown = limit.unwrap_or(forecast.points.len()).min(forecast.points.len());
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&forecast)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{} {}", "Forecast".bold(), forecast.metric.cyan());
            println!("{}", "=".repeat(50));
            println!("Model:        {}", forecast.model_version);
            println!("Generated:    {}", format_time(forecast.generated_at));
            println!(
                "Interval:     {:.0}% over {} steps",
                forecast.confidence_level * 100.0,
                forecast.horizon
            );
            println!();

            let rows: Vec<ForecastRow> = forecast
                .points
                .iter()
                .take(shown)
                .enumerate()
                .map(|(idx, p)| ForecastRow {
                    step: idx + 1,
                    time: format_time(p.timestamp),
                    forecast: format_value(p.point),
                    lower: format_value(p.lower),
                    upper: format_value(p.upper),
                })
                .collect();
            print_rows(&rows, &forecast, format);
        }
    }
    Ok(())
}
