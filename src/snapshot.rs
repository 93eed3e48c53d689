use serde_json::Value;
use std::fmt;

/// Server-reported progress of an analytics job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    InProgress,
    Complete,
    Failed,
    /// Anything else. `None` when the field was absent or not a string.
    Unknown(Option<String>),
}

impl GenerationResult {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("IN_PROGRESS") => GenerationResult::InProgress,
            Some("COMPLETE") => GenerationResult::Complete,
            Some("FAILED") => GenerationResult::Failed,
            Some(other) => GenerationResult::Unknown(Some(other.to_string())),
            None => GenerationResult::Unknown(None),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, GenerationResult::Unknown(None))
    }
}

impl fmt::Display for GenerationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationResult::InProgress => f.write_str("IN_PROGRESS"),
            GenerationResult::Complete => f.write_str("COMPLETE"),
            GenerationResult::Failed => f.write_str("FAILED"),
            GenerationResult::Unknown(Some(raw)) => f.write_str(raw),
            GenerationResult::Unknown(None) => f.write_str("<missing>"),
        }
    }
}

/// One status query's worth of job state. The body the server sent is kept
/// verbatim in `payload`; the other fields are read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    generation_result: GenerationResult,
    generation_message: Option<String>,
    payload: Value,
}

impl JobSnapshot {
    pub fn from_body(payload: Value) -> Self {
        let generation_result = GenerationResult::from_value(payload.get("generation_result"));
        let generation_message = payload
            .get("generation_message")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            generation_result,
            generation_message,
            payload,
        }
    }

    pub fn generation_result(&self) -> &GenerationResult {
        &self.generation_result
    }

    pub fn generation_message(&self) -> Option<&str> {
        self.generation_message.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// Read the job identifier out of a submission response. Numeric and string
/// ids are both accepted.
pub fn analytics_id(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
