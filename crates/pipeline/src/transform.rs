//! Decode bus payloads into [`NormalizedRecord`]s.
//!
//! A stream payload looks like
//! `{"data": {"id", "text", ...}, "matching_rules": [{"id", "tag"}]}`; the
//! normalized record is `data` with `matching_rules` merged in at top level.

use serde_json::{Map, Value};
use tracing::warn;

use trendwire_bus::BusMessage;
use trendwire_core::NormalizedRecord;

use crate::error::RecordError;

/// Parse one payload. Pure: the same bytes always give the same result.
pub fn parse(payload: &[u8]) -> Result<NormalizedRecord, RecordError> {
    let json: Value = serde_json::from_slice(payload)
        .map_err(|e| RecordError::Malformed(format!("invalid JSON: {e}")))?;

    let Value::Object(mut envelope) = json else {
        return Err(RecordError::Malformed("payload is not a JSON object".into()));
    };

    let mut data = match envelope.remove("data") {
        Some(Value::Object(data)) => data,
        Some(_) => return Err(RecordError::Malformed("`data` is not an object".into())),
        None => return Err(RecordError::Malformed("missing `data`".into())),
    };
    let matching_rules = match envelope.remove("matching_rules") {
        Some(rules @ Value::Array(_)) => rules,
        Some(_) => return Err(RecordError::Malformed("`matching_rules` is not an array".into())),
        None => return Err(RecordError::Malformed("missing `matching_rules`".into())),
    };

    normalize_id(&mut data)?;
    if !matches!(data.get("text"), Some(Value::String(_))) {
        return Err(RecordError::Malformed("`data.text` missing or not a string".into()));
    }

    // Top-level rules win over any same-named field inside `data`.
    data.insert("matching_rules".into(), matching_rules);

    let record: NormalizedRecord = serde_json::from_value(Value::Object(data))
        .map_err(|e| RecordError::Malformed(e.to_string()))?;

    // The table stores ids as integers; anything else would be refused there.
    if let Some(rule) = record.matching_rules.iter().find(|r| !is_decimal_id(&r.id)) {
        return Err(RecordError::Malformed(format!(
            "matching rule id {:?} is not a decimal integer",
            rule.id
        )));
    }
    Ok(record)
}

// Ids arrive as decimal strings; accept bare integers too.
fn normalize_id(data: &mut Map<String, Value>) -> Result<(), RecordError> {
    match data.get("id") {
        Some(Value::String(id)) if is_decimal_id(id) => Ok(()),
        Some(Value::String(id)) => Err(RecordError::Malformed(format!(
            "`data.id` {id:?} is not a decimal integer"
        ))),
        Some(Value::Number(n)) if n.as_i64().is_some_and(|id| id >= 0) => {
            let id = n.to_string();
            data.insert("id".into(), Value::String(id));
            Ok(())
        }
        Some(_) => Err(RecordError::Malformed("`data.id` is not a string".into())),
        None => Err(RecordError::Malformed("missing `data.id`".into())),
    }
}

// Unsigned decimal that fits the warehouse's INT64 column.
fn is_decimal_id(id: &str) -> bool {
    id.bytes().all(|b| b.is_ascii_digit()) && id.parse::<i64>().is_ok()
}

/// A delivery whose payload parsed cleanly.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub record: NormalizedRecord,
}

/// A delivery whose payload could not be parsed.
#[derive(Debug)]
pub struct RejectedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub error: RecordError,
}

/// Parse a pulled batch, separating successes from failures.
///
/// Bad messages never block good ones.
pub fn parse_batch(messages: Vec<BusMessage>) -> (Vec<ParsedMessage>, Vec<RejectedMessage>) {
    let mut parsed = Vec::with_capacity(messages.len());
    let mut rejected = Vec::new();

    for msg in messages {
        match parse(&msg.payload) {
            Ok(record) => parsed.push(ParsedMessage {
                ack_id: msg.ack_id,
                message_id: msg.message_id,
                record,
            }),
            Err(error) => {
                warn!(message_id = %msg.message_id, error = %error, "dropping malformed message");
                rejected.push(RejectedMessage {
                    ack_id: msg.ack_id,
                    message_id: msg.message_id,
                    error,
                });
            }
        }
    }

    (parsed, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use trendwire_core::MatchingRule;

    fn message(id: &str, payload: &str) -> BusMessage {
        BusMessage {
            ack_id: format!("ack-{id}"),
            message_id: id.into(),
            payload: payload.as_bytes().to_vec(),
            publish_time: Utc::now(),
            delivery_attempt: 1,
        }
    }

    #[test]
    fn merges_data_with_matching_rules() {
        let record = parse(
            br#"{"data":{"id":"1","text":"hello"},"matching_rules":[{"id":"9","tag":"X"}]}"#,
        )
        .unwrap();

        assert_eq!(record.id, "1");
        assert_eq!(record.text, "hello");
        assert_eq!(
            record.matching_rules,
            vec![MatchingRule {
                id: "9".into(),
                tag: "X".into()
            }]
        );
        assert!(record.created_at.is_none());
        assert!(record.extra.is_empty());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"id": "1", "text": "hello", "matching_rules": [{"id": "9", "tag": "X"}]})
        );
    }

    #[test]
    fn keeps_created_at_and_unknown_fields() {
        let record = parse(
            br#"{
                "data": {
                    "id": "2",
                    "text": "t",
                    "created_at": "2024-05-01T10:00:00.000Z",
                    "edit_history_tweet_ids": ["2"]
                },
                "matching_rules": []
            }"#,
        )
        .unwrap();

        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(record.extra["edit_history_tweet_ids"], json!(["2"]));
    }

    #[test]
    fn numeric_ids_become_strings() {
        let record = parse(br#"{"data":{"id":42,"text":"t"},"matching_rules":[]}"#).unwrap();
        assert_eq!(record.id, "42");
    }

    #[test]
    fn top_level_rules_override_data_field() {
        let record = parse(
            br#"{
                "data": { "id": "1", "text": "t", "matching_rules": "stale" },
                "matching_rules": [{ "id": "3", "tag": "Z" }]
            }"#,
        )
        .unwrap();
        assert_eq!(record.matching_rules[0].tag, "Z");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let cases: &[&[u8]] = &[
            b"",
            b"not json",
            b"[1,2]",
            br#"{"matching_rules":[]}"#,
            br#"{"data":{"id":"1","text":"t"}}"#,
            br#"{"data":"x","matching_rules":[]}"#,
            br#"{"data":{"id":"1","text":"t"},"matching_rules":{}}"#,
            br#"{"data":{"text":"t"},"matching_rules":[]}"#,
            br#"{"data":{"id":"1"},"matching_rules":[]}"#,
            br#"{"data":{"id":"1","text":"t","created_at":"yesterday"},"matching_rules":[]}"#,
        ];
        for case in cases {
            let err = parse(case).unwrap_err();
            assert!(
                matches!(err, RecordError::Malformed(_)),
                "{}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn non_numeric_ids_are_rejected() {
        let cases: &[&[u8]] = &[
            br#"{"data":{"id":"abc","text":"t"},"matching_rules":[]}"#,
            br#"{"data":{"id":"","text":"t"},"matching_rules":[]}"#,
            br#"{"data":{"id":"-4","text":"t"},"matching_rules":[]}"#,
            br#"{"data":{"id":"99999999999999999999","text":"t"},"matching_rules":[]}"#,
            br#"{"data":{"id":"1","text":"t"},"matching_rules":[{"id":"r1","tag":"X"}]}"#,
        ];
        for case in cases {
            let err = parse(case).unwrap_err();
            assert!(err.to_string().contains("decimal integer"), "{err}");
        }
    }

    #[test]
    fn parse_is_deterministic() {
        let payload = br#"{"data":{"id":"1","text":"a"},"matching_rules":[]}"#;
        assert_eq!(parse(payload).unwrap(), parse(payload).unwrap());
    }

    #[test]
    fn batch_separates_good_from_bad() {
        let (parsed, rejected) = parse_batch(vec![
            message("1", r#"{"data":{"id":"1","text":"a"},"matching_rules":[]}"#),
            message("2", "{oops"),
            message("3", r#"{"data":{"id":"3","text":"c"},"matching_rules":[]}"#),
        ]);

        let ids: Vec<_> = parsed.iter().map(|p| p.record.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(parsed[0].ack_id, "ack-1");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].message_id, "2");
        assert_eq!(rejected[0].ack_id, "ack-2");
    }
}
