//! Request-shape parsing: the only place input errors originate.
//!
//! ```json
//! { "summary": "...", "slides_text": "...", "slides_struct": [..], "speech_text": "...",
//!   "use_llm": true, "use_mastra": false, "llm_provider": "openai",
//!   "persona_model": "...", "merge_model": "...", "persona_timeout_ms": 10000,
//!   "merge_timeout_ms": 8000, "detail": "normal", "slides_text_limit": 8000,
//!   "evidence_max": 3 }
//! ```
//!
//! Content fields must be well-typed; option fields that are ill-typed are
//! ignored (see [`RuntimeOptions::with_overrides`]).

use serde_json::{Map, Value};

use crate::error::InputError;
use crate::options::RuntimeOptions;
use crate::types::{EvaluationInput, SlideRecord};

/// Parse a request body into the evaluation input and its effective options.
pub fn parse_request(
    body: &Value,
    defaults: &RuntimeOptions,
) -> Result<(EvaluationInput, RuntimeOptions), InputError> {
    let map = body.as_object().ok_or(InputError::NotAnObject)?;

    let input = EvaluationInput {
        summary: text_field(map, "summary")?.unwrap_or_default(),
        slides_text: text_field(map, "slides_text")?.unwrap_or_default(),
        slides_struct: slides_field(map)?,
        speech_text: text_field(map, "speech_text")?,
    };
    if !input.has_slide_content() {
        return Err(InputError::EmptySlides);
    }

    Ok((input, defaults.clone().with_overrides(map)))
}

fn text_field(map: &Map<String, Value>, field: &'static str) -> Result<Option<String>, InputError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(InputError::InvalidField {
            field,
            reason: format!("expected a string, got {}", kind(other)),
        }),
    }
}

fn slides_field(map: &Map<String, Value>) -> Result<Vec<SlideRecord>, InputError> {
    match map.get("slides_struct") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value @ Value::Array(_)) => {
            serde_json::from_value(value.clone()).map_err(|e| InputError::InvalidField {
                field: "slides_struct",
                reason: e.to_string(),
            })
        }
        Some(other) => Err(InputError::InvalidField {
            field: "slides_struct",
            reason: format!("expected an array, got {}", kind(other)),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Detail;
    use serde_json::json;

    #[test]
    fn parses_content_and_overrides() {
        let body = json!({
            "summary": "pitch",
            "slides_text": "Slide 1: Hello",
            "slides_struct": [{"index": 1, "title": "Hello", "wordCount": 1}],
            "speech_text": "hi all",
            "use_llm": false,
            "detail": "low"
        });
        let (input, opts) = parse_request(&body, &RuntimeOptions::default()).unwrap();
        assert_eq!(input.slides_struct.len(), 1);
        assert_eq!(input.slides_struct[0].word_count, 1);
        assert_eq!(input.speech(), Some("hi all"));
        assert!(!opts.use_llm);
        assert_eq!(opts.detail, Detail::Low);
    }

    #[test]
    fn text_only_input_is_enough() {
        let body = json!({ "slides_text": "Slide 1: Hello" });
        assert!(parse_request(&body, &RuntimeOptions::default()).is_ok());
    }

    #[test]
    fn empty_slides_rejected() {
        let body = json!({ "summary": "only a summary", "slides_text": "   ", "slides_struct": [] });
        assert_eq!(
            parse_request(&body, &RuntimeOptions::default()).unwrap_err(),
            InputError::EmptySlides
        );
    }

    #[test]
    fn non_object_rejected() {
        assert_eq!(
            parse_request(&json!([1, 2]), &RuntimeOptions::default()).unwrap_err(),
            InputError::NotAnObject
        );
    }

    #[test]
    fn wrong_content_types_rejected() {
        let err = parse_request(&json!({ "slides_text": 5 }), &RuntimeOptions::default())
            .unwrap_err();
        assert!(matches!(err, InputError::InvalidField { field: "slides_text", .. }));

        let err = parse_request(
            &json!({ "slides_struct": [{"title": "no index"}] }),
            &RuntimeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, InputError::InvalidField { field: "slides_struct", .. }));
    }
}
