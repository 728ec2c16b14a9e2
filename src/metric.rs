//! Structural classification of raw metric values
//!
//! Snapshots coming out of a metrics collection carry no type tags, only the
//! JSON shape each metric kind serialises to. [`classify`] recognises those
//! shapes and lifts them into the closed [`Metric`] sum type.
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt;

/// Unit label stamped on timer durations
pub const DURATION_UNITS: &str = "milliseconds";

/// Unit label stamped on timer rates
pub const RATE_UNITS: &str = "calls/second";

/// Unit label stamped on meter rates
pub const METER_UNITS: &str = "events/second";

/// Document type of a classified metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Meter,
    Histogram,
    Timer,
    Gauge,
}

impl MetricKind {
    /// Lowercase name used as the bulk `_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Meter => "meter",
            MetricKind::Histogram => "histogram",
            MetricKind::Timer => "timer",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distribution statistics of a histogram (or of a timer's durations)
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramFields {
    pub count: Number,
    pub max: Number,
    pub mean: Number,
    pub min: Number,
    pub p50: Number,
    pub p75: Number,
    pub p95: Number,
    pub p99: Number,
    pub p999: Number,
    pub stddev: Number,
}

impl Default for HistogramFields {
    fn default() -> Self {
        Self {
            count: zero(),
            max: zero(),
            mean: zero(),
            min: zero(),
            p50: zero(),
            p75: zero(),
            p95: zero(),
            p99: zero(),
            p999: zero(),
            stddev: zero(),
        }
    }
}

impl HistogramFields {
    fn from_raw(raw: &Map<String, Value>) -> Self {
        Self {
            count: number_or_zero(raw, "count"),
            max: number_or_zero(raw, "max"),
            mean: number_or_zero(raw, "mean"),
            min: number_or_zero(raw, "min"),
            p50: number_or_zero(raw, "median"),
            p75: number_or_zero(raw, "p75"),
            p95: number_or_zero(raw, "p95"),
            p99: number_or_zero(raw, "p99"),
            p999: number_or_zero(raw, "p999"),
            stddev: number_or_zero(raw, "stddev"),
        }
    }

    fn write_into(self, fields: &mut Map<String, Value>) {
        fields.insert("count".into(), Value::Number(self.count));
        fields.insert("max".into(), Value::Number(self.max));
        fields.insert("mean".into(), Value::Number(self.mean));
        fields.insert("min".into(), Value::Number(self.min));
        fields.insert("p50".into(), Value::Number(self.p50));
        fields.insert("p75".into(), Value::Number(self.p75));
        fields.insert("p95".into(), Value::Number(self.p95));
        fields.insert("p99".into(), Value::Number(self.p99));
        fields.insert("p999".into(), Value::Number(self.p999));
        fields.insert("stddev".into(), Value::Number(self.stddev));
    }
}

/// Event count and moving rates of a meter (or of a timer's calls)
#[derive(Debug, Clone, PartialEq)]
pub struct MeterFields {
    pub count: Number,
    pub m1_rate: Number,
    pub m5_rate: Number,
    pub m15_rate: Number,
    pub mean_rate: Number,
}

impl Default for MeterFields {
    fn default() -> Self {
        Self {
            count: zero(),
            m1_rate: zero(),
            m5_rate: zero(),
            m15_rate: zero(),
            mean_rate: zero(),
        }
    }
}

impl MeterFields {
    fn from_raw(raw: &Map<String, Value>) -> Self {
        Self {
            count: number_or_zero(raw, "count"),
            m1_rate: number_or_zero(raw, "1MinuteRate"),
            m5_rate: number_or_zero(raw, "5MinuteRate"),
            m15_rate: number_or_zero(raw, "15MinuteRate"),
            mean_rate: number_or_zero(raw, "mean"),
        }
    }

    fn write_into(self, fields: &mut Map<String, Value>) {
        fields.insert("count".into(), Value::Number(self.count));
        fields.insert("m1_rate".into(), Value::Number(self.m1_rate));
        fields.insert("m5_rate".into(), Value::Number(self.m5_rate));
        fields.insert("m15_rate".into(), Value::Number(self.m15_rate));
        fields.insert("mean_rate".into(), Value::Number(self.mean_rate));
    }
}

/// A raw metric value lifted into its kind
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Counter { count: Number },
    Timer {
        histogram: HistogramFields,
        meter: MeterFields,
    },
    Meter(MeterFields),
    Histogram(HistogramFields),
    /// Anything unrecognised; fields are carried over as-is
    Gauge(Map<String, Value>),
}

impl Metric {
    /// The document type of this metric
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter { .. } => MetricKind::Counter,
            Metric::Timer { .. } => MetricKind::Timer,
            Metric::Meter(_) => MetricKind::Meter,
            Metric::Histogram(_) => MetricKind::Histogram,
            Metric::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Flatten into the type-specific document fields
    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            Metric::Counter { count } => {
                fields.insert("count".into(), Value::Number(count));
            }
            Metric::Timer { histogram, meter } => {
                // meter count lands last and wins over the histogram count
                histogram.write_into(&mut fields);
                meter.write_into(&mut fields);
                fields.insert("duration_units".into(), DURATION_UNITS.into());
                fields.insert("rate_units".into(), RATE_UNITS.into());
            }
            Metric::Meter(meter) => {
                meter.write_into(&mut fields);
                fields.insert("units".into(), METER_UNITS.into());
            }
            Metric::Histogram(histogram) => histogram.write_into(&mut fields),
            Metric::Gauge(values) => fields = values,
        }
        fields
    }
}

/// Classify a raw metric value by its shape.
///
/// Precedence is timer, meter, histogram, counter, gauge. A timer serialises
/// both a histogram and a meter, so it has to be recognised before either.
/// Never fails: unknown shapes become gauges, and non-object values are
/// wrapped as a gauge with a single `value` field.
pub fn classify(raw: &Value) -> Metric {
    match raw {
        Value::Object(obj) => {
            if let (Some(Value::Object(histogram)), Some(Value::Object(meter))) =
                (obj.get("histogram"), obj.get("meter"))
            {
                Metric::Timer {
                    histogram: HistogramFields::from_raw(histogram),
                    meter: MeterFields::from_raw(meter),
                }
            } else if obj.contains_key("1MinuteRate") {
                Metric::Meter(MeterFields::from_raw(obj))
            } else if obj.contains_key("p999") {
                Metric::Histogram(HistogramFields::from_raw(obj))
            } else {
                Metric::Gauge(obj.clone())
            }
        }
        Value::Number(count) => Metric::Counter {
            count: count.clone(),
        },
        other => {
            let mut values = Map::new();
            values.insert("value".into(), other.clone());
            Metric::Gauge(values)
        }
    }
}

fn zero() -> Number {
    Number::from(0)
}

fn number_or_zero(raw: &Map<String, Value>, key: &str) -> Number {
    match raw.get(key) {
        Some(Value::Number(n)) => n.clone(),
        _ => zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn untouched_histogram() -> Value {
        json!({
            "min": null, "max": null, "sum": null, "variance": null,
            "mean": null, "stddev": null, "count": 0, "median": null,
            "p75": null, "p95": null, "p99": null, "p999": null
        })
    }

    #[test]
    fn test_scalar_is_counter() {
        let metric = classify(&json!(7));
        assert_eq!(metric.kind(), MetricKind::Counter);
        assert_eq!(Value::Object(metric.into_fields()), json!({ "count": 7 }));
    }

    #[test]
    fn test_float_counter_keeps_representation() {
        let fields = classify(&json!(2.5)).into_fields();
        assert_eq!(fields["count"], json!(2.5));
    }

    #[test]
    fn test_meter_fields() {
        let raw = json!({
            "mean": 1.5, "count": 3, "currentRate": 0.9,
            "1MinuteRate": 0.2, "5MinuteRate": 0.1, "15MinuteRate": 0.05
        });
        let metric = classify(&raw);
        assert_eq!(metric.kind(), MetricKind::Meter);
        assert_eq!(
            Value::Object(metric.into_fields()),
            json!({
                "count": 3, "m1_rate": 0.2, "m5_rate": 0.1, "m15_rate": 0.05,
                "mean_rate": 1.5, "units": "events/second"
            })
        );
    }

    #[test]
    fn test_untouched_meter_defaults_to_zero() {
        let raw = json!({
            "mean": null, "count": 0, "currentRate": null,
            "1MinuteRate": null, "5MinuteRate": null, "15MinuteRate": null
        });
        assert_eq!(
            Value::Object(classify(&raw).into_fields()),
            json!({
                "count": 0, "m1_rate": 0, "m5_rate": 0, "m15_rate": 0,
                "mean_rate": 0, "units": "events/second"
            })
        );
    }

    #[test]
    fn test_untouched_histogram_defaults_to_zero() {
        let metric = classify(&untouched_histogram());
        assert_eq!(metric.kind(), MetricKind::Histogram);
        assert_eq!(
            Value::Object(metric.into_fields()),
            json!({
                "count": 0, "max": 0, "mean": 0, "min": 0, "p50": 0,
                "p75": 0, "p95": 0, "p99": 0, "p999": 0, "stddev": 0
            })
        );
    }

    #[test]
    fn test_histogram_maps_median_to_p50() {
        let raw = json!({
            "min": 1, "max": 5, "sum": 9, "variance": 4, "mean": 3,
            "stddev": 2, "count": 3, "median": 3, "p75": 5, "p95": 5,
            "p99": 5, "p999": 5
        });
        let fields = classify(&raw).into_fields();
        assert_eq!(fields["p50"], json!(3));
        assert_eq!(fields["stddev"], json!(2));
        assert!(!fields.contains_key("median"));
        assert!(!fields.contains_key("sum"));
    }

    #[test]
    fn test_timer_carries_both_sub_structures() {
        let raw = json!({
            "meter": {
                "mean": 2, "count": 2, "currentRate": 2,
                "1MinuteRate": 0, "5MinuteRate": 0, "15MinuteRate": 0
            },
            "histogram": {
                "min": 3, "max": 5, "sum": 8, "variance": 2, "mean": 4,
                "stddev": 1.41, "count": 2, "median": 4, "p75": 5, "p95": 5,
                "p99": 5, "p999": 5
            }
        });
        let metric = classify(&raw);
        assert_eq!(metric.kind(), MetricKind::Timer);
        let fields = metric.into_fields();
        assert_eq!(fields["count"], json!(2));
        assert_eq!(fields["max"], json!(5));
        assert_eq!(fields["p999"], json!(5));
        assert_eq!(fields["mean_rate"], json!(2));
        assert_eq!(fields["duration_units"], json!("milliseconds"));
        assert_eq!(fields["rate_units"], json!("calls/second"));
        assert!(!fields.contains_key("units"));
    }

    #[test]
    fn test_timer_wins_over_meter_and_histogram_markers() {
        let raw = json!({
            "meter": { "1MinuteRate": 1 },
            "histogram": { "p999": 1 },
            "1MinuteRate": 1,
            "p999": 1
        });
        assert_eq!(classify(&raw).kind(), MetricKind::Timer);
    }

    #[test]
    fn test_meter_wins_over_histogram_marker() {
        let raw = json!({ "1MinuteRate": 1, "p999": 1 });
        assert_eq!(classify(&raw).kind(), MetricKind::Meter);
    }

    #[test]
    fn test_half_timer_is_not_a_timer() {
        let raw = json!({ "meter": { "count": 1 }, "histogram": 4 });
        assert_eq!(classify(&raw).kind(), MetricKind::Gauge);
    }

    #[test]
    fn test_gauge_copies_object_verbatim() {
        let raw = json!({ "random": 42, "label": "x" });
        let metric = classify(&raw);
        assert_eq!(metric.kind(), MetricKind::Gauge);
        assert_eq!(Value::Object(metric.into_fields()), raw);
    }

    #[test]
    fn test_non_object_gauge_is_wrapped() {
        let metric = classify(&json!("up"));
        assert_eq!(metric.kind(), MetricKind::Gauge);
        assert_eq!(Value::Object(metric.into_fields()), json!({ "value": "up" }));
    }

    #[test]
    fn test_kind_renders_lowercase() {
        assert_eq!(MetricKind::Histogram.to_string(), "histogram");
        assert_eq!(serde_json::to_value(MetricKind::Timer).unwrap(), json!("timer"));
    }
}
