//! Elasticsearch sink.
//!
//! Documents go out through the bulk API as `index` actions keyed by their
//! deterministic IDs, so a re-delivered batch overwrites rather than
//! duplicates. Indices shard daily as `<prefix>-<type>-YYYY.MM.DD`, with the
//! date taken from the document's own event/collection time — never from the
//! wall clock — so retried writes always land in the same index.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use snafu::ResultExt;

use ttr_core::error::{BulkDecodeSnafu, SerializeSnafu, SinkError};
use ttr_core::model::{Doc, Sink, SinkInfo, WriteResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INDEX_PREFIX: &str = "ttr";

pub struct ElasticsearchSink {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    index_prefix: String,
    create_templates: bool,
}

impl ElasticsearchSink {
    pub fn new(
        url: String,
        api_key: Option<String>,
        index_prefix: String,
        create_templates: bool,
    ) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| SinkError::Unreachable {
                message: err.to_string(),
            })?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            index_prefix,
            create_templates,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("ApiKey {key}")),
            None => request,
        }
    }

    async fn put_template(
        &self,
        name: &str,
        body: serde_json::Value,
    ) -> Result<(), SinkError> {
        let url = format!("{}/_index_template/{name}", self.url);
        let response = self
            .authorize(self.http.put(&url).json(&body))
            .send()
            .await
            .map_err(|err| SinkError::Unreachable {
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(SinkError::TemplateCreate {
                name: name.to_string(),
                status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    fn info(&self) -> SinkInfo {
        SinkInfo {
            name: "elasticsearch".to_string(),
            version: "1.0.0".to_string(),
            description: "Elasticsearch sink with bulk upserts and daily indices".to_string(),
        }
    }

    async fn open(&self) -> Result<(), SinkError> {
        if !self.create_templates {
            return Ok(());
        }

        for (name, body) in index_templates(&self.index_prefix) {
            self.put_template(name, body).await?;
        }
        Ok(())
    }

    async fn write(&self, docs: &[Doc]) -> Result<WriteResult, SinkError> {
        if docs.is_empty() {
            return Ok(WriteResult::default());
        }

        let body = build_bulk_body(docs, &self.index_prefix)?;
        let response = self
            .authorize(
                self.http
                    .post(format!("{}/_bulk", self.url))
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .send()
            .await
            .map_err(|err| SinkError::Unreachable {
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::BadStatus { status, message });
        }

        let bytes = response.bytes().await.map_err(|err| SinkError::Unreachable {
            message: err.to_string(),
        })?;
        let bulk: BulkResponse =
            serde_json::from_slice(&bytes).context(BulkDecodeSnafu)?;

        Ok(summarize_bulk_response(&bulk))
    }

    async fn close(&self) -> Result<(), SinkError> {
        // Plain HTTP; nothing to tear down.
        Ok(())
    }
}

/// Daily index for a document, derived from the document itself.
fn index_name(prefix: &str, doc: &Doc) -> String {
    format!(
        "{prefix}-{}-{}",
        doc.body.type_tag(),
        doc.body.partition_time().format("%Y.%m.%d")
    )
}

/// NDJSON bulk payload: alternating `index` action and document lines.
fn build_bulk_body(docs: &[Doc], prefix: &str) -> Result<String, SinkError> {
    let mut body = String::new();

    for doc in docs {
        let action = serde_json::json!({
            "index": {
                "_index": index_name(prefix, doc),
                "_id": doc.id,
            }
        });
        body.push_str(&serde_json::to_string(&action).context(SerializeSnafu {
            what: "bulk action",
        })?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.body).context(SerializeSnafu {
            what: "document",
        })?);
        body.push('\n');
    }

    Ok(body)
}

#[derive(Debug, Default, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Default, Deserialize)]
struct BulkItem {
    #[serde(default)]
    index: BulkItemStatus,
}

#[derive(Debug, Default, Deserialize)]
struct BulkItemStatus {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default, rename = "_id")]
    id: String,
}

fn summarize_bulk_response(bulk: &BulkResponse) -> WriteResult {
    let mut result = WriteResult::default();

    for item in &bulk.items {
        if (200..300).contains(&item.index.status) {
            result.success_count += 1;
        } else {
            result.error_count += 1;
            if let Some(error) = &item.index.error {
                result.errors.push(format!("ID {}: {error}", item.index.id));
            }
        }
    }

    result
}

/// Index templates for the three canonical document types.
fn index_templates(prefix: &str) -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "runtime_5m",
            serde_json::json!({
                "index_patterns": [format!("{prefix}-runtime_5m-*")],
                "template": {
                    "mappings": {
                        "properties": {
                            "type": {"type": "keyword"},
                            "thermostat_id": {"type": "keyword"},
                            "thermostat_name": {"type": "keyword"},
                            "household_id": {"type": "keyword"},
                            "event_time": {"type": "date"},
                            "mode": {"type": "keyword"},
                            "climate": {"type": "keyword"},
                            "set_heat_c": {"type": "float"},
                            "set_cool_c": {"type": "float"},
                            "avg_temp_c": {"type": "float"},
                            "outdoor_temp_c": {"type": "float"},
                            "outdoor_humidity_pct": {"type": "integer"},
                            "equip": {"type": "object"},
                            "sensors": {"type": "object"},
                            "provider": {"type": "object"}
                        }
                    }
                }
            }),
        ),
        (
            "transition",
            serde_json::json!({
                "index_patterns": [format!("{prefix}-transition-*")],
                "template": {
                    "mappings": {
                        "properties": {
                            "type": {"type": "keyword"},
                            "event_time": {"type": "date"},
                            "thermostat_id": {"type": "keyword"},
                            "thermostat_name": {"type": "keyword"},
                            "prev": {"type": "object"},
                            "next": {"type": "object"},
                            "event": {"type": "object"},
                            "provider": {"type": "object"}
                        }
                    }
                }
            }),
        ),
        (
            "device_snapshot",
            serde_json::json!({
                "index_patterns": [format!("{prefix}-device_snapshot-*")],
                "template": {
                    "mappings": {
                        "properties": {
                            "type": {"type": "keyword"},
                            "collected_at": {"type": "date"},
                            "thermostat_id": {"type": "keyword"},
                            "thermostat_name": {"type": "keyword"},
                            "program": {"type": "object"},
                            "events_active": {"type": "object"},
                            "provider": {"type": "object"}
                        }
                    }
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttr_core::model::{DeviceSnapshot, Document, Runtime5m};

    fn runtime_doc() -> Doc {
        Doc {
            id: "th1:2026-01-05T12:05:00Z:runtime_5m:abcd1234abcd1234".to_string(),
            body: Document::Runtime5m(Runtime5m {
                doc_type: "runtime_5m".to_string(),
                thermostat_id: "th1".to_string(),
                thermostat_name: "Hallway".to_string(),
                household_id: None,
                event_time: "2026-01-05T12:05:00Z".parse().unwrap(),
                mode: "heat".to_string(),
                climate: "Home".to_string(),
                set_heat_c: Some(20.0),
                set_cool_c: None,
                avg_temp_c: None,
                outdoor_temp_c: None,
                outdoor_humidity: None,
                equipment: None,
                sensors: None,
                provider: None,
            }),
        }
    }

    fn snapshot_doc() -> Doc {
        Doc {
            id: "th1:2026-02-10T08:00:00Z".to_string(),
            body: Document::DeviceSnapshot(DeviceSnapshot {
                doc_type: "device_snapshot".to_string(),
                collected_at: "2026-02-10T08:00:00Z".parse().unwrap(),
                thermostat_id: "th1".to_string(),
                thermostat_name: "Hallway".to_string(),
                program: None,
                events_active: None,
                provider: None,
            }),
        }
    }

    #[test]
    fn index_name_shards_by_the_document_timestamp() {
        assert_eq!(
            index_name("ttr", &runtime_doc()),
            "ttr-runtime_5m-2026.01.05"
        );
        assert_eq!(
            index_name("ttr", &snapshot_doc()),
            "ttr-device_snapshot-2026.02.10"
        );
    }

    #[test]
    fn bulk_body_alternates_action_and_document_lines() {
        let body = build_bulk_body(&[runtime_doc(), snapshot_doc()], "ttr").unwrap();
        let lines: Vec<&str> = body.trim_end().split('\n').collect();
        assert_eq!(lines.len(), 4);

        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "ttr-runtime_5m-2026.01.05");
        assert_eq!(
            action["index"]["_id"],
            "th1:2026-01-05T12:05:00Z:runtime_5m:abcd1234abcd1234"
        );

        let doc: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["type"], "runtime_5m");
        assert_eq!(doc["mode"], "heat");

        let snapshot_action: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(
            snapshot_action["index"]["_index"],
            "ttr-device_snapshot-2026.02.10"
        );
    }

    #[test]
    fn bulk_response_summary_counts_successes_and_errors() {
        let bulk: BulkResponse = serde_json::from_value(serde_json::json!({
            "errors": true,
            "items": [
                {"index": {"status": 201, "_id": "a"}},
                {"index": {"status": 200, "_id": "b"}},
                {"index": {"status": 429, "_id": "c", "error": {"type": "es_rejected"}}}
            ]
        }))
        .unwrap();

        let result = summarize_bulk_response(&bulk);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("ID c"));
        assert!(result.errors[0].contains("es_rejected"));
    }

    #[test]
    fn templates_cover_all_three_document_types() {
        let templates = index_templates("ttr");
        let names: Vec<&str> = templates.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["runtime_5m", "transition", "device_snapshot"]);

        for (_, body) in &templates {
            assert!(body["index_patterns"][0].as_str().unwrap().starts_with("ttr-"));
            assert!(body["template"]["mappings"]["properties"].is_object());
        }
    }
}
