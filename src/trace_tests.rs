//! Unit tests for the trace module

#[cfg(test)]
mod tests {
    use crate::trace::{parse_variable_state, ExecutionStep, RawStep, RawTrace, TraceData};
    use serde_json::json;

    fn raw_step(line_number: usize, explanation: &str, state: Option<&str>) -> RawStep {
        RawStep {
            line_number,
            explanation: explanation.to_string(),
            variable_state_json: state.map(str::to_string),
            important_change: None,
        }
    }

    #[test]
    fn test_raw_trace_deserializes_wire_format() {
        let json = r#"{
            "summary": "demo",
            "steps": [
                {"lineNumber": 3, "explanation": "init", "variableStateJson": "{\"x\": 1}", "importantChange": true},
                {"lineNumber": 5, "explanation": "loop"}
            ]
        }"#;

        let raw: RawTrace = serde_json::from_str(json).unwrap();
        assert_eq!(raw.summary, "demo");
        assert_eq!(raw.steps.len(), 2);
        assert_eq!(raw.steps[0].important_change, Some(true));
        assert_eq!(raw.steps[1].variable_state_json, None);
    }

    #[test]
    fn test_missing_required_step_fields_are_rejected() {
        let missing_line = r#"{"summary": "s", "steps": [{"explanation": "x"}]}"#;
        let missing_explanation = r#"{"summary": "s", "steps": [{"lineNumber": 1}]}"#;
        let missing_summary = r#"{"steps": []}"#;

        assert!(serde_json::from_str::<RawTrace>(missing_line).is_err());
        assert!(serde_json::from_str::<RawTrace>(missing_explanation).is_err());
        assert!(serde_json::from_str::<RawTrace>(missing_summary).is_err());
    }

    #[test]
    fn test_variable_state_is_parsed() {
        let step = ExecutionStep::from(raw_step(
            2,
            "assign",
            Some(r#"{"count": 3, "names": ["a", "b"], "cfg": {"debug": false}, "none": null}"#),
        ));

        let state = step.variable_state.expect("state should parse");
        assert_eq!(state["count"], json!(3));
        assert_eq!(state["names"], json!(["a", "b"]));
        assert_eq!(state["cfg"], json!({"debug": false}));
        assert_eq!(state["none"], json!(null));
        assert!(step.variable_state_error.is_none());
    }

    #[test]
    fn test_malformed_variable_state_is_isolated_to_its_step() {
        let raw = RawTrace {
            summary: "s".to_string(),
            steps: vec![
                raw_step(1, "ok", Some(r#"{"a": 1}"#)),
                raw_step(2, "broken", Some("{not json")),
                raw_step(3, "ok again", None),
            ],
        };

        let trace = TraceData::from_raw(raw).unwrap();
        assert_eq!(trace.len(), 3);
        assert!(trace.steps[0].variable_state.is_some());
        assert!(trace.steps[1].variable_state.is_none());
        assert!(trace.steps[1].variable_state_error.is_some());
        assert_eq!(trace.steps[1].explanation, "broken");
        assert!(trace.steps[2].variable_state.is_none());
        assert!(trace.steps[2].variable_state_error.is_none());
    }

    #[test]
    fn test_non_object_variable_state_is_an_error() {
        assert!(parse_variable_state("[1, 2]").is_err());
        assert!(parse_variable_state("42").is_err());
    }

    #[test]
    fn test_blank_or_null_variable_state_means_none() {
        assert_eq!(parse_variable_state("  "), Ok(None));
        assert_eq!(parse_variable_state("null"), Ok(None));
    }

    #[test]
    fn test_empty_trace_is_rejected() {
        let raw = RawTrace {
            summary: "nothing".to_string(),
            steps: vec![],
        };
        assert!(TraceData::from_raw(raw).is_err());
    }

    #[test]
    fn test_first_step_on_line() {
        let raw = RawTrace {
            summary: "s".to_string(),
            steps: vec![
                raw_step(3, "a", None),
                raw_step(5, "b", None),
                raw_step(3, "c", None),
            ],
        };
        let trace = TraceData::from_raw(raw).unwrap();

        assert_eq!(trace.first_step_on_line(3), Some(0));
        assert_eq!(trace.first_step_on_line(5), Some(1));
        assert_eq!(trace.first_step_on_line(9), None);
        assert_eq!(trace.last_index(), 2);
    }

    #[test]
    fn test_important_defaults_to_false() {
        let step = ExecutionStep::from(raw_step(1, "x", None));
        assert!(!step.is_important());
    }
}
