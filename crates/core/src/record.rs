use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rule that matched a streamed record, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRule {
    pub id: String,
    pub tag: String,
}

/// A stream record after the consuming side has decoded it.
///
/// Known columns are typed; every other payload field is kept verbatim in
/// `extra` so nothing the provider sent is lost on the way to the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub matching_rules: Vec<MatchingRule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Document-level sentiment returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub score: f64,
    pub magnitude: f64,
    pub language: String,
}

/// A normalized record plus optional sentiment columns.
///
/// The sentiment columns are all absent when analysis was skipped, in which
/// case the serialized form is identical to the wrapped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: NormalizedRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_magnitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl EnrichedRecord {
    /// Wrap a record without any sentiment columns.
    pub fn unenriched(record: NormalizedRecord) -> Self {
        Self {
            record,
            sentiment_score: None,
            sentiment_magnitude: None,
            language: None,
        }
    }

    pub fn with_sentiment(record: NormalizedRecord, sentiment: Sentiment) -> Self {
        Self {
            record,
            sentiment_score: Some(sentiment.score),
            sentiment_magnitude: Some(sentiment.magnitude),
            language: Some(sentiment.language),
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.sentiment_score.is_some()
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> NormalizedRecord {
        NormalizedRecord {
            id: "1".into(),
            text: "hello".into(),
            created_at: None,
            matching_rules: vec![MatchingRule {
                id: "9".into(),
                tag: "X".into(),
            }],
            extra: Map::new(),
        }
    }

    #[test]
    fn unenriched_serializes_like_the_plain_record() {
        let plain = serde_json::to_value(record()).unwrap();
        let wrapped = serde_json::to_value(EnrichedRecord::unenriched(record())).unwrap();
        assert_eq!(plain, wrapped);
    }

    #[test]
    fn enriched_adds_sentiment_columns() {
        let enriched = EnrichedRecord::with_sentiment(
            record(),
            Sentiment {
                score: 0.4,
                magnitude: 1.2,
                language: "en".into(),
            },
        );
        assert!(enriched.is_enriched());

        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["sentiment_score"], json!(0.4));
        assert_eq!(value["sentiment_magnitude"], json!(1.2));
        assert_eq!(value["language"], json!("en"));
        assert_eq!(value["matching_rules"][0]["tag"], json!("X"));
    }

    #[test]
    fn extra_fields_are_flattened() {
        let mut rec = record();
        rec.extra.insert("lang_hint".into(), json!("es"));
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["lang_hint"], json!("es"));
        assert!(value.get("extra").is_none());
    }
}
