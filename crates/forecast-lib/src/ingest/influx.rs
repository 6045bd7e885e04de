//! InfluxDB v2 store using Flux queries over HTTP

use super::{async_trait, StoreError, TimeSeriesStore};
use crate::config::InfluxSeries;
use crate::error::{PipelineError, Result};
use crate::models::{format_timestamp, MetricPoint};
use chrono::DateTime;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Reads metric history from an InfluxDB v2 bucket
pub struct InfluxStore {
    client: Client,
    query_url: Url,
    bucket: String,
    token: String,
    series: BTreeMap<String, InfluxSeries>,
}

impl InfluxStore {
    pub fn new(
        base_url: &str,
        org: &str,
        bucket: &str,
        token: String,
        series: BTreeMap<String, InfluxSeries>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to create HTTP client: {}", e)))?;

        let mut query_url = Url::parse(base_url)
            .and_then(|u| u.join("api/v2/query"))
            .map_err(|e| PipelineError::Config(format!("invalid InfluxDB URL {}: {}", base_url, e)))?;
        query_url.query_pairs_mut().append_pair("org", org);

        Ok(Self {
            client,
            query_url,
            bucket: bucket.to_string(),
            token,
            series,
        })
    }

    /// Flux query selecting one measurement/field over `[start, end)`
    fn flux_query(&self, series: &InfluxSeries, start: i64, end: i64) -> String {
        format!(
            r#"from(bucket: "{bucket}")
  |> range(start: {start}, stop: {stop})
  |> filter(fn: (r) => r._measurement == "{measurement}" and r._field == "{field}")
  |> keep(columns: ["_time", "_value"])
  |> sort(columns: ["_time"])"#,
            bucket = self.bucket,
            start = format_timestamp(start),
            stop = format_timestamp(end),
            measurement = series.measurement,
            field = series.field,
        )
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxStore {
    async fn query(
        &self,
        metric: &str,
        start: i64,
        end: i64,
    ) -> std::result::Result<Vec<MetricPoint>, StoreError> {
        let series = self
            .series
            .get(metric)
            .ok_or_else(|| StoreError::UnknownMetric(metric.to_string()))?;

        let response = self
            .client
            .post(self.query_url.clone())
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(self.flux_query(series, start, end))
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_flux_csv(&body)
    }

    fn name(&self) -> &str {
        "influxdb"
    }
}

/// Parse the CSV body of a Flux query response.
///
/// The response may hold several tables, each introduced by its own header
/// row and separated by blank lines; annotation rows start with `#`.
fn parse_flux_csv(body: &str) -> std::result::Result<Vec<MetricPoint>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut columns: Option<(usize, usize)> = None;
    let mut points = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| StoreError::Malformed(e.to_string()))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.get(0).map(|f| f.starts_with('#')).unwrap_or(false) {
            continue;
        }

        let time_idx = record.iter().position(|f| f == "_time");
        let value_idx = record.iter().position(|f| f == "_value");
        if let (Some(t), Some(v)) = (time_idx, value_idx) {
            columns = Some((t, v));
            continue;
        }

        let (t, v) = columns
            .ok_or_else(|| StoreError::Malformed("data row before header row".to_string()))?;
        let time = record
            .get(t)
            .ok_or_else(|| StoreError::Malformed("missing _time column".to_string()))?;
        let value = record
            .get(v)
            .ok_or_else(|| StoreError::Malformed("missing _value column".to_string()))?;

        let timestamp = DateTime::parse_from_rfc3339(time)
            .map_err(|e| StoreError::Malformed(format!("bad _time {}: {}", time, e)))?
            .timestamp();
        let value = value.trim().parse::<f64>().unwrap_or(f64::NAN);
        points.push(MetricPoint::new(timestamp, value));
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_series() -> BTreeMap<String, InfluxSeries> {
        let mut series = BTreeMap::new();
        series.insert(
            "cpu_usage_percent".to_string(),
            InfluxSeries {
                measurement: "cpu".to_string(),
                field: "usage_active".to_string(),
            },
        );
        series
    }

    #[test]
    fn test_parse_multi_table_response() {
        let body = "\
,result,table,_time,_value\r
,_result,0,2024-01-01T00:00:00Z,12.5\r
,_result,0,2024-01-01T00:05:00Z,13.0\r
\r
,result,table,_time,_value\r
,_result,1,2024-01-01T00:10:00Z,14.25\r
";
        let points = parse_flux_csv(body).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, 1_704_067_200);
        assert_eq!(points[2].value, 14.25);
    }

    #[test]
    fn test_parse_skips_annotations() {
        let body = "\
#datatype,string,long,dateTime:RFC3339,double\n\
#group,false,false,false,false\n\
,result,table,_time,_value\n\
,_result,0,2024-01-01T00:00:00Z,1.5\n";
        let points = parse_flux_csv(body).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        let body = ",result,table,_time,_value\n,_result,0,yesterday,1.0\n";
        assert!(matches!(
            parse_flux_csv(body),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn test_flux_query_mentions_series() {
        let store = InfluxStore::new(
            "http://localhost:8086",
            "org",
            "system_metrics",
            "token".to_string(),
            cpu_series(),
        )
        .unwrap();
        let query = store.flux_query(&cpu_series()["cpu_usage_percent"], 0, 300);
        assert!(query.contains(r#"from(bucket: "system_metrics")"#));
        assert!(query.contains(r#"r._measurement == "cpu""#));
        assert!(query.contains("stop: 1970-01-01T00:05:00Z"));
    }

    #[tokio::test]
    async fn test_query_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/query")
            .match_query(mockito::Matcher::UrlEncoded("org".into(), "acme".into()))
            .match_header("authorization", "Token secret")
            .with_status(200)
            .with_header("content-type", "text/csv")
            .with_body(",result,table,_time,_value\n,_result,0,2024-01-01T00:00:00Z,42.0\n")
            .create_async()
            .await;

        let store = InfluxStore::new(
            &server.url(),
            "acme",
            "system_metrics",
            "secret".to_string(),
            cpu_series(),
        )
        .unwrap();
        let points = store.query("cpu_usage_percent", 0, 1).await.unwrap();

        mock.assert_async().await;
        assert_eq!(points, vec![MetricPoint::new(1_704_067_200, 42.0)]);
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/query")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let store = InfluxStore::new(
            &server.url(),
            "acme",
            "system_metrics",
            String::new(),
            cpu_series(),
        )
        .unwrap();
        let err = store.query("cpu_usage_percent", 0, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_unknown_metric() {
        let store = InfluxStore::new(
            "http://localhost:8086",
            "org",
            "bucket",
            String::new(),
            BTreeMap::new(),
        )
        .unwrap();
        let err = store.query("disk", 0, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownMetric(_)));
    }
}
