//! Execution trace returned by the analysis model.
//!
//! The trace is a claimed walk through the source, not a real execution: each
//! step names a line, explains it, and optionally carries a simulated
//! snapshot of variable values.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Simulated program state at a step, as free-form JSON.
pub type VariableState = Map<String, Value>;

/// Step as it arrives on the wire.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawStep {
    pub line_number: usize,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_state_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub important_change: Option<bool>,
}

/// Analysis response as it arrives on the wire.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RawTrace {
    pub summary: String,
    pub steps: Vec<RawStep>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionStep {
    /// 1-based line in the analysed source
    pub line_number: usize,
    pub explanation: String,
    pub variable_state: Option<VariableState>,
    /// Why `variable_state` is missing when the model sent something unparseable
    pub variable_state_error: Option<String>,
    pub important_change: Option<bool>,
}

impl ExecutionStep {
    pub fn is_important(&self) -> bool {
        self.important_change.unwrap_or(false)
    }
}

impl From<RawStep> for ExecutionStep {
    fn from(raw: RawStep) -> Self {
        let (variable_state, variable_state_error) =
            match raw.variable_state_json.as_deref().map(parse_variable_state) {
                None => (None, None),
                Some(Ok(state)) => (state, None),
                Some(Err(e)) => {
                    warn!(
                        "Ignoring malformed variable state on line {}: {e}",
                        raw.line_number
                    );
                    (None, Some(e))
                }
            };

        ExecutionStep {
            line_number: raw.line_number,
            explanation: raw.explanation,
            variable_state,
            variable_state_error,
            important_change: raw.important_change,
        }
    }
}

/// Parses a `variableStateJson` string into a variable map.
///
/// Blank strings and `null` mean "no state". Anything that is valid JSON but
/// not an object is rejected so that the display only ever deals with named
/// variables.
pub fn parse_variable_state(json: &str) -> Result<Option<VariableState>, String> {
    if json.trim().is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(Value::Null) => Ok(None),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceData {
    pub steps: Vec<ExecutionStep>,
    pub summary: String,
}

impl TraceData {
    /// Builds a trace from one analysis response. Fails on an empty trace,
    /// since there would be no step for the cursor to point at.
    pub fn from_raw(raw: RawTrace) -> Result<TraceData> {
        if raw.steps.is_empty() {
            bail!("Analysis returned no execution steps");
        }

        Ok(TraceData {
            steps: raw.steps.into_iter().map(ExecutionStep::from).collect(),
            summary: raw.summary,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&ExecutionStep> {
        self.steps.get(index)
    }

    pub fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    /// Index of the first step on `line`, used for click-to-seek.
    pub fn first_step_on_line(&self, line: usize) -> Option<usize> {
        self.steps.iter().position(|step| step.line_number == line)
    }
}
