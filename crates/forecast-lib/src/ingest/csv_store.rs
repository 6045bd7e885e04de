//! Wide CSV export used as an offline store

use super::{async_trait, StoreError, TimeSeriesStore};
use crate::models::MetricPoint;
use chrono::{DateTime, NaiveDateTime};
use std::path::PathBuf;

/// Reads a `timestamp,<metric>,<metric>...` file on every query
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TimeSeriesStore for CsvStore {
    async fn query(
        &self,
        metric: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<MetricPoint>, StoreError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::Unreachable(format!("{}: {}", self.path.display(), e)))?;

        let mut points = parse_wide_csv(&contents, metric)?;
        points.retain(|p| p.timestamp >= start && p.timestamp < end);
        Ok(points)
    }

    fn name(&self) -> &str {
        "csv"
    }
}

fn parse_wide_csv(contents: &str, metric: &str) -> Result<Vec<MetricPoint>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| StoreError::Malformed(e.to_string()))?
        .clone();
    let time_idx = headers
        .iter()
        .position(|h| h == "timestamp" || h == "_time" || h == "time")
        .ok_or_else(|| StoreError::Malformed("no timestamp column".to_string()))?;
    let value_idx = headers
        .iter()
        .position(|h| h == metric)
        .ok_or_else(|| StoreError::UnknownMetric(metric.to_string()))?;

    let mut points = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| StoreError::Malformed(e.to_string()))?;
        let raw_value = record.get(value_idx).unwrap_or("");
        if raw_value.is_empty() {
            continue;
        }
        let raw_time = record.get(time_idx).unwrap_or("");
        let timestamp = parse_timestamp(raw_time).ok_or_else(|| {
            StoreError::Malformed(format!("row {}: bad timestamp {:?}", row + 2, raw_time))
        })?;
        let value = raw_value.parse::<f64>().map_err(|_| {
            StoreError::Malformed(format!("row {}: bad value {:?}", row + 2, raw_value))
        })?;
        points.push(MetricPoint::new(timestamp, value));
    }
    Ok(points)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[+zz:zz]` (naive is UTC) and epoch seconds
fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXPORT: &str = "\
timestamp,cpu_usage_percent,memory_usage_percent
2024-01-01 00:05:00+00:00,12.0,40.5
2024-01-01 00:00:00+00:00,11.0,
2024-01-01T00:10:00Z,13.5,41.0
";

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(parse_timestamp("1704067200"), Some(1_704_067_200));
        assert_eq!(parse_timestamp("2024-01-01T00:00:00Z"), Some(1_704_067_200));
        assert_eq!(parse_timestamp("2024-01-01 01:00:00+01:00"), Some(1_704_067_200));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00"), Some(1_704_067_200));
        assert_eq!(parse_timestamp("soon"), None);
    }

    #[test]
    fn test_empty_cells_are_missing() {
        let memory = parse_wide_csv(EXPORT, "memory_usage_percent").unwrap();
        assert_eq!(memory.len(), 2);
        let cpu = parse_wide_csv(EXPORT, "cpu_usage_percent").unwrap();
        assert_eq!(cpu.len(), 3);
    }

    #[test]
    fn test_unknown_column() {
        assert!(matches!(
            parse_wide_csv(EXPORT, "disk_io"),
            Err(StoreError::UnknownMetric(_))
        ));
    }

    #[tokio::test]
    async fn test_query_reads_file_and_filters_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXPORT.as_bytes()).unwrap();

        let store = CsvStore::new(file.path().to_path_buf());
        let points = store
            .query("cpu_usage_percent", 1_704_067_200, 1_704_067_800)
            .await
            .unwrap();
        assert_eq!(
            points,
            vec![
                MetricPoint::new(1_704_067_500, 12.0),
                MetricPoint::new(1_704_067_200, 11.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_unreachable() {
        let store = CsvStore::new(PathBuf::from("/nonexistent/system_metrics.csv"));
        let err = store.query("cpu_usage_percent", 0, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Unreachable(_)));
    }
}
