//! Checklist extraction from the provider's single-shot answer.

use serde::Deserialize;

use crate::domain::StepDraft;

const DEFAULT_REJECTION: &str = "This PDF does not appear to be a valid assignment.";

/// A validated checklist ready to be numbered and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChecklist {
    pub title: String,
    pub steps: Vec<StepDraft>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChecklistError {
    /// The model decided the document is not an assignment.
    #[error("{0}")]
    NotAnAssignment(String),

    /// The answer is not the JSON shape we asked for.
    #[error("Could not understand result: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct RawAnswer {
    valid: bool,
    reason: Option<String>,
    title: Option<String>,
    steps: Option<Vec<StepDraft>>,
}

/// Parse the model's answer, tolerating a surrounding markdown code fence.
pub fn parse_checklist(answer: &str) -> Result<ParsedChecklist, ChecklistError> {
    let json = strip_fence(answer);
    let raw: RawAnswer =
        serde_json::from_str(json).map_err(|e| ChecklistError::Malformed(e.to_string()))?;

    if !raw.valid {
        let reason = raw
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
        return Err(ChecklistError::NotAnAssignment(reason));
    }

    let title = raw
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ChecklistError::Malformed("missing title".into()))?;

    let steps = raw
        .steps
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ChecklistError::Malformed("missing steps".into()))?;

    Ok(ParsedChecklist { title, steps })
}

fn strip_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_valid_answer() {
        let answer = r#"```json
{
  "valid": true,
  "title": "Lab Report 3",
  "steps": [
    {"title": "Read the handout", "description": "Skim the procedure."},
    {"title": "Write methods", "description": "Describe the setup."}
  ]
}
```"#;

        let parsed = parse_checklist(answer).unwrap();
        assert_eq!(parsed.title, "Lab Report 3");
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[1].title, "Write methods");
    }

    #[test]
    fn invalid_document_carries_reason() {
        let err = parse_checklist(r#"{"valid": false, "reason": "This is a receipt."}"#).unwrap_err();
        assert_eq!(err, ChecklistError::NotAnAssignment("This is a receipt.".into()));

        let err = parse_checklist(r#"{"valid": false}"#).unwrap_err();
        assert_eq!(err, ChecklistError::NotAnAssignment(DEFAULT_REJECTION.into()));
    }

    #[test]
    fn garbage_and_missing_fields_are_malformed() {
        assert!(matches!(
            parse_checklist("Sure! Here is your checklist:"),
            Err(ChecklistError::Malformed(_))
        ));
        assert!(matches!(
            parse_checklist(r#"{"valid": true, "steps": []}"#),
            Err(ChecklistError::Malformed(_))
        ));
        assert!(matches!(
            parse_checklist(r#"{"valid": true, "title": "Essay", "steps": []}"#),
            Err(ChecklistError::Malformed(_))
        ));
    }
}
