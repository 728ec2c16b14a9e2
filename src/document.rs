//! Translation of collection snapshots into bulk index requests
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, trace, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::collection::Collection;
use crate::config::ReporterConfig;
use crate::error::{ReporterError, Result};
use crate::metric::{MetricKind, classify};

/// A document as sent to the store
pub type Document = Map<String, Value>;

/// Target of a single index operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexTarget {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub kind: MetricKind,
}

/// Action header preceding each document in a bulk body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkAction {
    pub index: IndexTarget,
}

/// One action/document pair of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkEntry {
    pub action: BulkAction,
    pub document: Document,
}

impl BulkEntry {
    pub fn kind(&self) -> MetricKind {
        self.action.index.kind
    }

    pub fn index(&self) -> &str {
        &self.action.index.index
    }

    /// The document's `name` field
    pub fn name(&self) -> Option<&str> {
        self.document.get("name").and_then(Value::as_str)
    }
}

/// Index a cycle writes to: `<index>-<now formatted with index_date_format>`
pub fn index_name(config: &ReporterConfig, now: DateTime<Utc>) -> String {
    let mut name = format!("{}-", config.index);
    if write!(name, "{}", now.format(&config.index_date_format)).is_err() {
        warn!(
            "index_date_format {:?} cannot be rendered, writing to {}",
            config.index_date_format, config.index
        );
        return config.index.clone();
    }
    name
}

/// Translate the given collections into bulk entries.
///
/// `now` is captured once by the caller; every entry shares the index name
/// and timestamp derived from it. Entries follow collection order, then each
/// snapshot's own key order.
pub fn translate(
    collections: &[Arc<dyn Collection>],
    config: &ReporterConfig,
    now: DateTime<Utc>,
) -> Vec<BulkEntry> {
    let index = index_name(config, now);
    let timestamp = Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true));
    let mut entries = Vec::new();

    for collection in collections {
        let mut snapshot = collection.snapshot();
        let prefix = match collection.name() {
            Some(name) => {
                snapshot = match snapshot {
                    Value::Object(mut nested) => nested.shift_remove(name).unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                format!("{}.", name)
            }
            None => String::new(),
        };

        let Value::Object(metrics) = snapshot else {
            debug!(
                "Skipping collection {:?}: snapshot is not an object",
                collection.name().unwrap_or("<anonymous>")
            );
            continue;
        };

        for (name, raw) in metrics {
            let metric = classify(&raw);
            let kind = metric.kind();

            let mut document = config.additional_fields.clone();
            document.extend(metric.into_fields());
            document.insert("name".to_string(), Value::String(format!("{}{}", prefix, name)));
            document.insert(config.timestamp_field.clone(), timestamp.clone());

            trace!("Translated {}{} as {}", prefix, name, kind);
            entries.push(BulkEntry {
                action: BulkAction {
                    index: IndexTarget {
                        index: index.clone(),
                        kind,
                    },
                },
                document,
            });
        }
    }

    entries
}

/// Render entries as a newline-delimited bulk body
pub fn to_ndjson(entries: &[BulkEntry]) -> Result<String> {
    let mut body = String::new();
    for entry in entries {
        body.push_str(&serde_json::to_string(&entry.action).map_err(ReporterError::from)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&entry.document).map_err(ReporterError::from)?);
        body.push('\n');
    }
    Ok(body)
}
