use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use time::OffsetDateTime;

use crate::error::Error;

const NAME_LABEL: &str = "__name__";
const JOB_LABEL: &str = "job";
const DEFAULT_LOG_NAME: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Metric,
    Log,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Metric => "metric",
            EventKind::Log => "log",
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metric" => Ok(EventKind::Metric),
            "log" => Ok(EventKind::Log),
            other => Err(Error::Config(format!("unknown event kind: {other}"))),
        }
    }
}

/// Label set attached to a point record, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stream name a log line is tailed and stored under.
    pub fn stream_name(&self) -> &str {
        self.get(JOB_LABEL)
            .or_else(|| self.get(NAME_LABEL))
            .unwrap_or(DEFAULT_LOG_NAME)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Labels {
    fn from(arr: [(&str, &str); N]) -> Self {
        Self(
            arr.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Prometheus exposition style: `{job="gps", unit="deg"}`.
impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (key, value)) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}=\"")?;
            for ch in value.chars() {
                match ch {
                    '"' => f.write_str("\\\"")?,
                    '\\' => f.write_str("\\\\")?,
                    '\n' => f.write_str("\\n")?,
                    other => write!(f, "{other}")?,
                }
            }
            f.write_str("\"")?;
        }
        f.write_str("}")
    }
}

/// Point record: one metric sample or one log line.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    /// Unset means "now", filled in by the batch writer.
    pub timestamp: Option<OffsetDateTime>,
    pub name: String,
    pub value: Option<f64>,
    pub text: Option<String>,
    /// Serialized label set.
    pub labels: Option<String>,
    pub kind: EventKind,
}

impl MetricEvent {
    pub fn metric(
        name: impl Into<String>,
        labels: Option<&Labels>,
        timestamp: Option<OffsetDateTime>,
        value: f64,
    ) -> Self {
        Self {
            timestamp,
            name: name.into(),
            value: Some(value),
            text: None,
            labels: serialize_labels(labels),
            kind: EventKind::Metric,
        }
    }

    pub fn log(labels: &Labels, timestamp: Option<OffsetDateTime>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            name: labels.stream_name().to_string(),
            value: None,
            text: Some(text.into()),
            labels: serialize_labels(Some(labels)),
            kind: EventKind::Log,
        }
    }
}

fn serialize_labels(labels: Option<&Labels>) -> Option<String> {
    labels.filter(|l| !l.is_empty()).map(Labels::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_serialize_sorted_and_escaped() {
        let labels = Labels::new()
            .with("unit", "V")
            .with("job", "hydra \"aux\"");
        assert_eq!(labels.to_string(), r#"{job="hydra \"aux\"", unit="V"}"#);
        assert_eq!(Labels::new().to_string(), "{}");
    }

    #[test]
    fn log_stream_name_prefers_job() {
        assert_eq!(Labels::from([("job", "gps")]).stream_name(), "gps");
        assert_eq!(Labels::from([("__name__", "cam")]).stream_name(), "cam");
        assert_eq!(Labels::new().stream_name(), "log");
    }

    #[test]
    fn constructors_fill_kind() {
        let m = MetricEvent::metric("soc", None, None, 77.0);
        assert_eq!(m.kind, EventKind::Metric);
        assert_eq!(m.value, Some(77.0));
        assert!(m.labels.is_none());

        let l = MetricEvent::log(&Labels::from([("job", "ms4525")]), None, "calibrated");
        assert_eq!(l.kind, EventKind::Log);
        assert_eq!(l.name, "ms4525");
        assert_eq!(l.text.as_deref(), Some("calibrated"));
        assert_eq!(l.labels.as_deref(), Some(r#"{job="ms4525"}"#));
        assert_eq!("log".parse::<EventKind>().unwrap(), EventKind::Log);
    }
}
