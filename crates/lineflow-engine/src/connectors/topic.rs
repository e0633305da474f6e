//! Per-record output topic selection.

use lineflow_types::Record;

use crate::config::SinkConfig;

/// Picks the output topic for each record.
///
/// With a topic field configured, a record that is a JSON object holding a
/// non-empty string under that field goes to that topic. Everything else
/// goes to the default topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRouter {
    default_topic: String,
    field: Option<String>,
}

impl TopicRouter {
    #[must_use]
    pub fn new(default_topic: impl Into<String>, field: Option<String>) -> Self {
        Self {
            default_topic: default_topic.into(),
            field,
        }
    }

    #[must_use]
    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    #[must_use]
    pub fn route(&self, record: &Record) -> String {
        self.field
            .as_deref()
            .and_then(|field| extract_topic(record.as_str(), field))
            .unwrap_or_else(|| self.default_topic.clone())
    }
}

impl From<&SinkConfig> for TopicRouter {
    fn from(config: &SinkConfig) -> Self {
        Self::new(config.topic.clone(), config.topic_field.clone())
    }
}

fn extract_topic(line: &str, field: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    value
        .get(field)?
        .as_str()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(s: &str) -> Record {
        Record::new(s).unwrap()
    }

    #[test]
    fn no_field_always_default() {
        let router = TopicRouter::new("out", None);
        assert_eq!(router.route(&record(r#"{"topic":"x"}"#)), "out");
    }

    #[test]
    fn string_field_overrides_topic() {
        let router = TopicRouter::new("out", Some("kind".into()));
        assert_eq!(router.route(&record(r#"{"kind":"errors","n":1}"#)), "errors");
    }

    #[test]
    fn falls_back_for_non_objects_and_bad_values() {
        let router = TopicRouter::new("out", Some("kind".into()));
        for line in [
            "plain text",
            "[1,2]",
            r#"{"kind":3}"#,
            r#"{"kind":""}"#,
            r#"{"other":"x"}"#,
            "{not json",
        ] {
            assert_eq!(router.route(&record(line)), "out", "line: {line}");
        }
    }
}
