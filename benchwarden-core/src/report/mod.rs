//! Report parsing: raw worker output to [`ResultSummary`].
//!
//! The accepted envelope is the kube-bench JSON document:
//!
//! ```json
//! { "Controls": [ { "id": "1", "text": "...", "tests": [
//!     { "section": "1.1", "results": [
//!         { "test_number": "1.1.1", "test_desc": "...", "status": "PASS" } ] } ] } ] }
//! ```
//!
//! Older workers stream one control object per line instead of a single
//! document; that shape is accepted too. Individual results that cannot be
//! read count as failures under a synthetic identifier rather than failing
//! the whole report.
//!
//! A document cut off mid-write keeps every control and result that was
//! written completely. The missing tail counts as one unreadable failure.

mod summary;

pub use summary::ResultSummary;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use summary::Tally;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("report output is empty")]
    Empty,

    #[error("report output is not JSON: {0}")]
    NotJson(String),

    #[error("report output is not a JSON object")]
    NotAnObject,

    #[error("report envelope has no `Controls` field")]
    MissingControls,

    #[error("report `Controls` field is not an array")]
    ControlsNotArray,
}

#[derive(Debug, Deserialize)]
struct ReportEnvelope {
    #[serde(rename = "Controls")]
    controls: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawControl {
    id: Option<String>,
    #[serde(default)]
    tests: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    results: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    test_number: Option<String>,
    status: Option<String>,
}

/// How a single check result is scored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Outcome {
    Pass,
    Fail,
    Skip,
    NotApplicable,
}

impl Outcome {
    fn from_status(status: &str) -> Option<Self> {
        match status.trim().to_ascii_uppercase().as_str() {
            "PASS" => Some(Outcome::Pass),
            "FAIL" => Some(Outcome::Fail),
            // WARN marks a manual check the worker could not decide.
            "WARN" | "SKIP" => Some(Outcome::Skip),
            "INFO" | "NA" => Some(Outcome::NotApplicable),
            _ => None,
        }
    }
}

/// Parses raw worker output.
///
/// Only a structurally invalid envelope is an error.
pub fn parse(raw: &[u8]) -> Result<ResultSummary, ParseError> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(document) => parse_document(document),
        Err(err) => recover_truncated_document(trimmed)
            .or_else(|| parse_control_stream(trimmed))
            .ok_or_else(|| ParseError::NotJson(err.to_string())),
    }
}

fn parse_document(document: Value) -> Result<ResultSummary, ParseError> {
    // A bare control object is what the line-oriented format looks like
    // when it happens to contain a single control.
    if looks_like_control(&document) {
        let mut tally = Tally::default();
        score_control(&mut tally, 0, &document);
        return Ok(tally.finish());
    }
    if !document.is_object() {
        return Err(ParseError::NotAnObject);
    }

    let envelope: ReportEnvelope = serde_json::from_value(document)
        .map_err(|err| ParseError::NotJson(err.to_string()))?;
    let controls = match envelope.controls {
        None | Some(Value::Null) => return Err(ParseError::MissingControls),
        Some(Value::Array(controls)) => controls,
        Some(_) => return Err(ParseError::ControlsNotArray),
    };

    let mut tally = Tally::default();
    for (position, control) in controls.iter().enumerate() {
        score_control(&mut tally, position, control);
    }
    Ok(tally.finish())
}

/// Line-delimited controls. Returns `None` when no line is a control, which
/// callers treat as "not a report at all".
fn parse_control_stream(text: &str) -> Option<ResultSummary> {
    let mut tally = Tally::default();
    let mut recognised = false;
    let mut position = 0usize;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(value) if looks_like_control(&value) => {
                recognised = true;
                score_control(&mut tally, position, &value);
            }
            // A cut-off trailing line still represents checks we lost.
            _ => tally.fail(unreadable_id(&position.to_string(), 0)),
        }
        position += 1;
    }

    recognised.then(|| tally.finish())
}

/// Where a possibly truncated JSON array stopped.
enum ArrayEnd<'a> {
    /// The closing bracket was read; holds the text after it.
    Closed(&'a str),
    /// The text ran out or broke; holds the unfinished element.
    Cut(&'a str),
}

/// Salvages a kube-bench document whose text stops before the end.
///
/// Returns `None` unless the `Controls` array was at least opened.
fn recover_truncated_document(text: &str) -> Option<ResultSummary> {
    if !text.starts_with('{') {
        return None;
    }
    let body = array_after_key(text, "Controls")?;
    let (controls, end) = complete_elements(body);

    let mut tally = Tally::default();
    for (position, control) in controls.iter().enumerate() {
        score_control(&mut tally, position, control);
    }
    if let ArrayEnd::Cut(tail) = end {
        salvage_control(&mut tally, controls.len(), tail);
    }
    Some(tally.finish())
}

/// Scores the complete results inside an unfinished control, then one
/// failure for whatever followed the cut.
fn salvage_control(tally: &mut Tally, position: usize, partial: &str) {
    let label = partial_control_id(partial).unwrap_or_else(|| position.to_string());

    let mut index = 0usize;
    let mut rest = partial;
    while let Some(body) = array_after_key(rest, "results") {
        let (results, end) = complete_elements(body);
        for result in results {
            score_result(tally, &label, index, result);
            index += 1;
        }
        match end {
            ArrayEnd::Closed(after) => rest = after,
            ArrayEnd::Cut(_) => break,
        }
    }
    tally.fail(unreadable_id(&label, index));
}

fn partial_control_id(partial: &str) -> Option<String> {
    let needle = "\"id\"";
    let at = partial.find(needle)?;
    let value = partial[at + needle.len()..].trim_start().strip_prefix(':')?;
    serde_json::Deserializer::from_str(value)
        .into_iter::<String>()
        .next()?
        .ok()
}

/// Text just inside the `[` of the first `"key": [` in `text`.
fn array_after_key<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("\"{key}\"");
    let mut from = 0usize;
    while let Some(found) = text[from..].find(&needle) {
        from += found + needle.len();
        let body = text[from..]
            .trim_start()
            .strip_prefix(':')
            .map(str::trim_start)
            .and_then(|value| value.strip_prefix('['));
        if body.is_some() {
            return body;
        }
    }
    None
}

/// Reads array elements until the closing bracket or the first element
/// that does not parse.
fn complete_elements(body: &str) -> (Vec<Value>, ArrayEnd<'_>) {
    let mut elements = Vec::new();
    let mut rest = body.trim_start();
    if let Some(after) = rest.strip_prefix(']') {
        return (elements, ArrayEnd::Closed(after));
    }

    loop {
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                elements.push(value);
                rest = rest[stream.byte_offset()..].trim_start();
            }
            _ => return (elements, ArrayEnd::Cut(rest)),
        }

        if let Some(after) = rest.strip_prefix(',') {
            rest = after.trim_start();
        } else if let Some(after) = rest.strip_prefix(']') {
            return (elements, ArrayEnd::Closed(after));
        } else {
            return (elements, ArrayEnd::Cut(rest));
        }
    }
}

fn looks_like_control(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key("tests") && !obj.contains_key("Controls"))
}

fn score_control(tally: &mut Tally, position: usize, control: &Value) {
    let Ok(raw) = serde_json::from_value::<RawControl>(control.clone()) else {
        tally.fail(unreadable_id(&position.to_string(), 0));
        return;
    };
    let label = raw.id.unwrap_or_else(|| position.to_string());

    let mut index = 0usize;
    for group in raw.tests.unwrap_or_default() {
        let results = serde_json::from_value::<RawGroup>(group)
            .ok()
            .and_then(|g| g.results);
        let Some(results) = results else {
            tally.fail(unreadable_id(&label, index));
            index += 1;
            continue;
        };

        for result in results {
            score_result(tally, &label, index, result);
            index += 1;
        }
    }
}

fn score_result(tally: &mut Tally, label: &str, index: usize, result: Value) {
    let parsed = serde_json::from_value::<RawResult>(result).ok();
    let readable = parsed.and_then(|r| {
        let outcome = Outcome::from_status(r.status.as_deref()?)?;
        Some((r.test_number?, outcome))
    });

    match readable {
        Some((_, Outcome::Pass)) => tally.pass(),
        Some((id, Outcome::Fail)) => tally.fail(id),
        Some((_, Outcome::Skip)) => tally.skip(),
        Some((_, Outcome::NotApplicable)) => tally.not_applicable(),
        None => tally.fail(unreadable_id(label, index)),
    }
}

fn unreadable_id(control: &str, index: usize) -> String {
    format!("unreadable:{control}:{index}")
}
