//! Write-payload validation against a model's wire schemas.

use crate::error::ApiError;
use crate::registrar::WireSchema;
use serde_json::{Map, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Parse `body` as a JSON object and check every key against the payload schema.
    ///
    /// Keys the full-record schema knows but the payload schema does not are read-only; anything
    /// else unknown is not on the model. All offending keys are reported together.
    pub fn payload(
        record: &WireSchema,
        payload: &WireSchema,
        body: &[u8],
        has_query: bool,
    ) -> Result<Map<String, Value>, ApiError> {
        let parsed = if body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        };
        let Some(map) = parsed else {
            return Err(ApiError::validation(if has_query {
                "Update parameters should be passed as JSON in the request body."
            } else {
                "No update parameters found. Did you pass valid JSON in the request body?"
            }));
        };

        let errors: Vec<String> = map
            .keys()
            .filter(|key| !payload.has_field(key))
            .map(|key| {
                if record.has_field(key) {
                    format!("Attribute `{}` is read-only.", key)
                } else {
                    format!("Attribute `{}` not found on model.", key)
                }
            })
            .collect();
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::WireField;

    fn schemas() -> (WireSchema, WireSchema) {
        let record = WireSchema::new(
            "tag",
            vec![
                ("id".into(), WireField::Integer),
                ("label".into(), WireField::String),
                ("slug".into(), WireField::String),
            ],
        );
        let payload = WireSchema::new("tag-payload", vec![("label".into(), WireField::String)]);
        (record, payload)
    }

    #[test]
    fn accepts_writable_fields() {
        let (record, payload) = schemas();
        let map = RequestValidator::payload(&record, &payload, br#"{"label": "a"}"#, false).unwrap();
        assert_eq!(map["label"], "a");
    }

    #[test]
    fn missing_body_message_depends_on_query_args() {
        let (record, payload) = schemas();
        let err = RequestValidator::payload(&record, &payload, b"", false).unwrap_err();
        assert!(err.to_string().starts_with("No update parameters found"));
        let err = RequestValidator::payload(&record, &payload, b"[1]", true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Update parameters should be passed as JSON in the request body."
        );
    }

    #[test]
    fn reports_read_only_and_unknown_keys_together() {
        let (record, payload) = schemas();
        let err = RequestValidator::payload(&record, &payload, br#"{"id": 3, "slug": "x", "colour": 1}"#, false)
            .unwrap_err();
        match err {
            ApiError::Validation(messages) => assert_eq!(
                messages,
                [
                    "Attribute `colour` not found on model.",
                    "Attribute `id` is read-only.",
                    "Attribute `slug` is read-only."
                ]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }
}
