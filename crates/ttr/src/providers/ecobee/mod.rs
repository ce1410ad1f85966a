//! Ecobee cloud provider.
//!
//! Speaks the ecobee REST API with the smartRead scope: `/thermostat` for
//! enumeration and snapshots, `/thermostatSummary` for revision-based change
//! detection, `/runtimeReport` for 5-minute interval rows. Temperatures come
//! off the wire as tenths of °F and are converted to Celsius here, before
//! they cross the provider port. Transport-level retries (5xx, 429 with
//! `Retry-After`, connection errors) go through the shared retry engine; a
//! 401 triggers exactly one token refresh and a single retry inside that
//! wrapper.

mod auth;

pub use auth::EcobeeAuth;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use ttr_core::error::{DecodeSnafu, EncodeSnafu, ProviderError};
use ttr_core::model::{
    AuthManager, Provider, ProviderInfo, RuntimeRow, Snapshot, Summary, ThermostatRef,
};
use ttr_core::retry::{retry_http, HttpLike, RetryError, RetryPolicy};
use ttr_core::temperature;

pub const DEFAULT_API_URL: &str = "https://api.ecobee.com/1";
pub const DEFAULT_TOKEN_URL: &str = "https://api.ecobee.com/token";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const RUNTIME_DATE_FORMAT: &str = "%Y-%m-%d";
const RUNTIME_COLUMNS: &str = "zoneHeatTemp,zoneCoolTemp,zoneAveTemp,outdoorTemp,\
outdoorHumidity,compHeat1,compHeat2,compCool1,compCool2,fan,hvacMode,zoneClimateRef";

pub struct EcobeeProvider {
    auth: Arc<EcobeeAuth>,
    http: reqwest::Client,
    api_url: String,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl EcobeeProvider {
    pub fn new(
        client_id: String,
        refresh_token: String,
        api_url: String,
        token_url: String,
        shutdown: CancellationToken,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;

        Ok(Self {
            auth: Arc::new(EcobeeAuth::new(
                client_id,
                refresh_token,
                token_url,
                http.clone(),
            )),
            http,
            api_url,
            retry: RetryPolicy::default(),
            shutdown,
        })
    }

    /// One authenticated GET. A 401 forces a token refresh and one retry;
    /// the transport-level retry wrapper around this sees the refreshed call.
    async fn request_with_auth(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<ApiResponse, ProviderError> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(url)
            .query(params)
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;

        if response.status().as_u16() != 401 {
            return Ok(ApiResponse(response));
        }

        self.auth.refresh().await?;
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(url)
            .query(params)
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;

        Ok(ApiResponse(response))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        mut params: Vec<(String, String)>,
        what: &'static str,
    ) -> Result<T, ProviderError> {
        if !params.iter().any(|(key, _)| key == "json") {
            let selection = SelectionRequest {
                selection: Selection::default_selection(),
            };
            params.push((
                "json".to_string(),
                serde_json::to_string(&selection).context(EncodeSnafu { what: "selection" })?,
            ));
        }

        let url = format!("{}{}", self.api_url, endpoint);
        let response = retry_http(&self.retry, &self.shutdown, || {
            let url = url.clone();
            let params = params.clone();
            async move { self.request_with_auth(&url, &params).await }
        })
        .await
        .map_err(flatten_retry_error)?;

        let status = response.0.status().as_u16();
        if !(200..300).contains(&status) {
            let message = response.0.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, message });
        }

        let body = response
            .0
            .bytes()
            .await
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;
        serde_json::from_slice(&body).context(DecodeSnafu { what })
    }
}

#[async_trait]
impl Provider for EcobeeProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ecobee".to_string(),
            version: "1.0.0".to_string(),
            description: "Ecobee thermostat provider with smartRead scope".to_string(),
        }
    }

    async fn list_thermostats(&self) -> Result<Vec<ThermostatRef>, ProviderError> {
        let response: ThermostatListResponse = self
            .get_json("/thermostat", Vec::new(), "thermostats")
            .await?;

        Ok(response
            .thermostat_list
            .into_iter()
            .map(|entry| ThermostatRef {
                id: entry.identifier,
                name: entry.name,
                provider: "ecobee".to_string(),
                household_id: entry.house_id.filter(|id| !id.is_empty()),
            })
            .collect())
    }

    async fn get_summary(&self, tr: &ThermostatRef) -> Result<Summary, ProviderError> {
        let selection = Selection::summary(&tr.id);
        let params = vec![(
            "selection".to_string(),
            serde_json::to_string(&selection).context(EncodeSnafu { what: "selection" })?,
        )];

        let response: SummaryResponse = self
            .get_json("/thermostatSummary", params, "summary")
            .await?;

        response
            .status_list
            .into_iter()
            .find(|status| status.thermostat_identifier == tr.id)
            .map(|status| Summary {
                thermostat_ref: tr.clone(),
                revision: status.thermostat_revision,
                last_update: Utc::now(),
            })
            .ok_or_else(|| ProviderError::ThermostatNotFound {
                id: tr.id.clone(),
                what: "summary",
            })
    }

    async fn get_snapshot(
        &self,
        tr: &ThermostatRef,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Snapshot, ProviderError> {
        let selection = Selection::snapshot(&tr.id);
        let params = vec![(
            "selection".to_string(),
            serde_json::to_string(&selection).context(EncodeSnafu { what: "selection" })?,
        )];

        let response: ThermostatListResponse =
            self.get_json("/thermostat", params, "snapshot").await?;

        response
            .thermostat_list
            .into_iter()
            .find(|entry| entry.identifier == tr.id)
            .map(|entry| Snapshot {
                thermostat_ref: tr.clone(),
                collected_at: Utc::now(),
                program: entry.program,
                events_active: entry.events,
            })
            .ok_or_else(|| ProviderError::ThermostatNotFound {
                id: tr.id.clone(),
                what: "snapshot",
            })
    }

    async fn get_runtime(
        &self,
        tr: &ThermostatRef,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RuntimeRow>, ProviderError> {
        let selection = Selection::thermostats(&tr.id);
        let params = vec![
            (
                "startDate".to_string(),
                from.format(RUNTIME_DATE_FORMAT).to_string(),
            ),
            (
                "endDate".to_string(),
                to.format(RUNTIME_DATE_FORMAT).to_string(),
            ),
            ("columns".to_string(), RUNTIME_COLUMNS.to_string()),
            (
                "selection".to_string(),
                serde_json::to_string(&selection).context(EncodeSnafu { what: "selection" })?,
            ),
        ];

        let response: RuntimeReportResponse = self
            .get_json("/runtimeReport", params, "runtime report")
            .await?;

        let mut rows = Vec::new();
        for report in &response.report_list {
            if report.thermostat_identifier == tr.id {
                rows.extend(parse_report_rows(tr, report));
            }
        }
        Ok(rows)
    }

    fn auth(&self) -> Arc<dyn AuthManager> {
        self.auth.clone()
    }
}

/// Newtype so the shared retry engine can read status and `Retry-After`.
struct ApiResponse(reqwest::Response);

impl HttpLike for ApiResponse {
    fn status(&self) -> u16 {
        self.0.status().as_u16()
    }

    fn retry_after(&self) -> Option<Duration> {
        let value = self.0.headers().get("retry-after")?.to_str().ok()?;
        parse_retry_after(value)
    }
}

/// `Retry-After` is either delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = DateTime::parse_from_rfc2822(value).ok()?;
    (when.with_timezone(&Utc) - Utc::now()).to_std().ok()
}

fn flatten_retry_error(err: RetryError<ProviderError>) -> ProviderError {
    match err {
        RetryError::NotRetriable { source } | RetryError::MaxRetriesExceeded { source } => source,
        RetryError::MaxRetriesStatus { status } => ProviderError::Http {
            status,
            message: "max retries exceeded".to_string(),
        },
        RetryError::Cancelled { .. } => ProviderError::Cancelled,
    }
}

/// Ecobee selection object, serialized into the request query.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Selection {
    selection_type: String,
    selection_match: String,
    #[serde(skip_serializing_if = "is_false")]
    include_runtime: bool,
    #[serde(skip_serializing_if = "is_false")]
    include_settings: bool,
    #[serde(skip_serializing_if = "is_false")]
    include_events: bool,
    #[serde(skip_serializing_if = "is_false")]
    include_program: bool,
    #[serde(skip_serializing_if = "is_false")]
    include_equipment_status: bool,
    #[serde(skip_serializing_if = "is_false")]
    include_alerts: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Serialize)]
struct SelectionRequest {
    selection: Selection,
}

impl Selection {
    /// Everything registered to the account, with the commonly used includes.
    fn default_selection() -> Self {
        Self {
            selection_type: "registered".to_string(),
            selection_match: String::new(),
            include_runtime: true,
            include_settings: true,
            include_events: true,
            include_program: true,
            include_equipment_status: true,
            ..Default::default()
        }
    }

    /// A single thermostat, no includes.
    fn thermostats(thermostat_id: &str) -> Self {
        Self {
            selection_type: "thermostats".to_string(),
            selection_match: thermostat_id.to_string(),
            ..Default::default()
        }
    }

    fn summary(thermostat_id: &str) -> Self {
        Self {
            include_alerts: true,
            ..Self::thermostats(thermostat_id)
        }
    }

    fn snapshot(thermostat_id: &str) -> Self {
        Self {
            include_runtime: true,
            include_settings: true,
            include_events: true,
            include_program: true,
            include_equipment_status: true,
            ..Self::thermostats(thermostat_id)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThermostatListResponse {
    #[serde(default, rename = "thermostatList")]
    thermostat_list: Vec<ThermostatEntry>,
}

#[derive(Debug, Deserialize)]
struct ThermostatEntry {
    identifier: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "houseId")]
    house_id: Option<String>,
    #[serde(default)]
    program: Option<serde_json::Value>,
    #[serde(default)]
    events: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default, rename = "statusList")]
    status_list: Vec<SummaryStatus>,
}

#[derive(Debug, Deserialize)]
struct SummaryStatus {
    #[serde(rename = "thermostatIdentifier")]
    thermostat_identifier: String,
    #[serde(default, rename = "thermostatRevision")]
    thermostat_revision: String,
}

#[derive(Debug, Deserialize)]
struct RuntimeReportResponse {
    #[serde(default, rename = "reportList")]
    report_list: Vec<RuntimeReport>,
}

#[derive(Debug, Deserialize)]
struct RuntimeReport {
    #[serde(rename = "thermostatIdentifier")]
    thermostat_identifier: String,
    #[serde(default)]
    columns: String,
    #[serde(default)]
    data: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(default)]
    date: String,
    #[serde(default)]
    data: Vec<String>,
}

/// Turn one runtime report into provider-neutral rows, converting every
/// temperature from tenths of °F to Celsius.
fn parse_report_rows(tr: &ThermostatRef, report: &RuntimeReport) -> Vec<RuntimeRow> {
    let columns = parse_columns(&report.columns);
    let mut rows = Vec::with_capacity(report.data.len());

    for report_row in &report.data {
        let Ok(date) = NaiveDate::parse_from_str(&report_row.date, RUNTIME_DATE_FORMAT) else {
            continue;
        };
        let Some(event_time) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };

        let mut row = RuntimeRow {
            thermostat_ref: tr.clone(),
            event_time: event_time.and_utc(),
            mode: String::new(),
            climate: String::new(),
            set_heat_c: None,
            set_cool_c: None,
            avg_temp_c: None,
            outdoor_temp_c: None,
            outdoor_humidity: None,
            equipment: None,
            sensors: None,
        };

        for (column, value) in columns.iter().zip(&report_row.data) {
            match column.as_str() {
                "zoneHeatTemp" => {
                    row.set_heat_c = temperature::to_celsius(parse_float(value), temperature::ECOBEE);
                }
                "zoneCoolTemp" => {
                    row.set_cool_c = temperature::to_celsius(parse_float(value), temperature::ECOBEE);
                }
                "zoneAveTemp" => {
                    row.avg_temp_c = temperature::to_celsius(parse_float(value), temperature::ECOBEE);
                }
                "outdoorTemp" => {
                    row.outdoor_temp_c =
                        temperature::to_celsius(parse_float(value), temperature::ECOBEE);
                }
                "outdoorHumidity" => {
                    row.outdoor_humidity = value.parse().ok();
                }
                "hvacMode" => {
                    row.mode = value.clone();
                }
                "zoneClimateRef" => {
                    row.climate = value.clone();
                }
                "compHeat1" | "compHeat2" | "compCool1" | "compCool2" | "fan" => {
                    let active = value == "1" || value == "true";
                    row.equipment
                        .get_or_insert_with(BTreeMap::new)
                        .insert(column.clone(), active);
                }
                _ => {}
            }
        }

        rows.push(row);
    }

    rows
}

fn parse_columns(columns: &str) -> Vec<String> {
    if columns.is_empty() {
        return Vec::new();
    }
    columns.split(',').map(|c| c.trim().to_string()).collect()
}

fn parse_float(value: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    value.parse().ok()
}
