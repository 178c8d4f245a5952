//! Turning the service's reply into complete records.
//!
//! Parsing is all-or-nothing per batch: if any image of the batch cannot be
//! matched to a well-formed entry, the whole batch is rejected and nothing
//! from it is merged.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{Result, SheetscanError};
use crate::models::{Classification, ExtractedFields, ExtractionRecord, ExtractionTarget};

const ENVELOPE_KEYS: &[&str] = &["images", "results", "records", "regions"];
const FIELD_KEYS: &[&str] = &[
    "classification",
    "location",
    "section_callouts",
    "element_type",
    "text_verbatim",
    "summary",
];

/// Parse a raw reply into one record per target, in target order.
pub fn parse_batch_response(
    raw: &str,
    targets: &[&ExtractionTarget],
) -> Result<Vec<ExtractionRecord>> {
    let value = parse_json_payload(raw)?;
    let entries = into_entries(value, targets)?;
    let matched = match_entries(&entries, targets)?;

    targets
        .iter()
        .zip(matched)
        .map(|(target, entry)| {
            let fields = extract_fields(entry).map_err(|e| match e {
                SheetscanError::MalformedResponse(message) => {
                    SheetscanError::MalformedResponse(format!("{}: {message}", target.relative_path))
                }
                other => other,
            })?;
            Ok(ExtractionRecord::from_target(target, fields))
        })
        .collect()
}

/// Parse JSON out of model output, tolerating markdown fences and stray prose.
pub fn parse_json_payload(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let stripped = strip_code_fences(trimmed);

    for text in [stripped, trimmed] {
        if text.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return Ok(value);
        }
        if let Some(value) = embedded_json(text) {
            return Ok(value);
        }
    }

    let preview: String = trimmed.chars().take(100).collect();
    Err(SheetscanError::MalformedResponse(format!(
        "Reply is not JSON: {preview}"
    )))
}

/// The first object, or array of objects, that parses from some `{`/`[`
/// in `text`. Trailing prose after the value is ignored.
fn embedded_json(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .find_map(|(start, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) if is_record_shaped(&value) => Some(value),
                _ => None,
            }
        })
}

// bracketed prose such as `[1]` can parse but is never a reply
fn is_record_shaped(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().all(Value::is_object),
        _ => false,
    }
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string ("json") on the opening fence line
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.find(['{', '[']).map(|start| &rest[start..]).unwrap_or(""),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn into_entries(value: Value, targets: &[&ExtractionTarget]) -> Result<Vec<Value>> {
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut object) => {
            for key in ENVELOPE_KEYS {
                if let Some(Value::Array(entries)) = object.remove(*key) {
                    return Ok(entries);
                }
            }

            // keyed by label: {"page_001/region_1.png": {...}, ...}
            let keys: Vec<(&ExtractionTarget, &str)> = targets
                .iter()
                .filter_map(|t| {
                    entry_key(t, targets, |k| object.get(k).is_some_and(Value::is_object))
                        .map(|key| (*t, key))
                })
                .collect();
            if !targets.is_empty() && keys.len() == targets.len() {
                return Ok(keys
                    .into_iter()
                    .filter_map(|(t, key)| {
                        object.remove(key).map(|mut entry| {
                            if let Value::Object(fields) = &mut entry {
                                fields
                                    .entry("image_id")
                                    .or_insert_with(|| Value::String(t.relative_path.clone()));
                            }
                            entry
                        })
                    })
                    .collect());
            }

            // a lone record for a single-image batch
            if targets.len() == 1
                && (object.contains_key("image_id")
                    || FIELD_KEYS.iter().any(|key| object.contains_key(*key)))
            {
                return Ok(vec![Value::Object(object)]);
            }

            Err(SheetscanError::MalformedResponse(
                "Reply object has no recognizable list of image results".to_string(),
            ))
        }
        other => Err(SheetscanError::MalformedResponse(format!(
            "Expected a JSON object or array, got {}",
            json_type(&other)
        ))),
    }
}

fn match_entries<'a>(
    entries: &'a [Value],
    targets: &[&ExtractionTarget],
) -> Result<Vec<&'a Map<String, Value>>> {
    let objects = entries
        .iter()
        .map(|entry| {
            entry.as_object().ok_or_else(|| {
                SheetscanError::MalformedResponse(format!(
                    "Expected an object per image, got {}",
                    json_type(entry)
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut by_id: HashMap<String, &Map<String, Value>> = HashMap::new();
    for object in objects.iter().copied() {
        if let Some(id) = object.get("image_id").and_then(Value::as_str) {
            if by_id.insert(id.trim().to_string(), object).is_some() {
                tracing::warn!(image_id = %id, "Duplicate result for image, keeping the last one");
            }
        }
    }

    if by_id.is_empty() {
        if objects.len() == targets.len() {
            return Ok(objects);
        }
        return Err(SheetscanError::MalformedResponse(format!(
            "Got {} unlabelled results for {} images",
            objects.len(),
            targets.len()
        )));
    }

    targets
        .iter()
        .map(|target| {
            entry_key(target, targets, |k| by_id.contains_key(k))
                .and_then(|key| by_id.get(key).copied())
                .ok_or_else(|| {
                    SheetscanError::MalformedResponse(format!(
                        "No result for image {}",
                        target.relative_path
                    ))
                })
        })
        .collect()
}

/// The key a target's entry is filed under: its batch label (the relative
/// path), or its bare file name when no other image in the batch shares it.
fn entry_key<'t>(
    target: &'t ExtractionTarget,
    batch: &[&ExtractionTarget],
    has: impl Fn(&str) -> bool,
) -> Option<&'t str> {
    if has(&target.relative_path) {
        return Some(&target.relative_path);
    }
    let unique = batch.iter().filter(|t| t.image_id == target.image_id).count() == 1;
    (unique && has(&target.image_id)).then_some(target.image_id.as_str())
}

/// Apply field defaults: classification falls back to `Unknown`, callouts to
/// an empty list, every other field to an empty string.
pub fn extract_fields(entry: &Map<String, Value>) -> Result<ExtractedFields> {
    let classification = match entry.get("classification") {
        Some(Value::String(label)) => {
            let parsed = Classification::from_label(label);
            if parsed == Classification::Unknown && !label.trim().is_empty() {
                tracing::debug!(label = %label, "Unrecognized classification, using Unknown");
            }
            parsed
        }
        _ => Classification::Unknown,
    };

    Ok(ExtractedFields {
        classification,
        location: string_field(entry, "location")?,
        section_callouts: callouts_field(entry)?,
        element_type: string_field(entry, "element_type")?,
        text_verbatim: string_field(entry, "text_verbatim")?,
        summary: string_field(entry, "summary")?,
    })
}

fn string_field(entry: &Map<String, Value>, key: &str) -> Result<String> {
    match entry.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Array(lines)) if lines.iter().all(Value::is_string) => Ok(lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n")),
        Some(other) => Err(SheetscanError::MalformedResponse(format!(
            "field '{key}' is {}, expected a string",
            json_type(other)
        ))),
    }
}

fn callouts_field(entry: &Map<String, Value>) -> Result<Vec<String>> {
    match entry.get("section_callouts") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(SheetscanError::MalformedResponse(format!(
                    "section_callouts contains {}",
                    json_type(other)
                ))),
            })
            .collect(),
        Some(other) => Err(SheetscanError::MalformedResponse(format!(
            "field 'section_callouts' is {}, expected an array",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
