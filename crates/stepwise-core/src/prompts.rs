//! Prompt text sent to the inference provider.

use std::fmt::Write;

use crate::domain::{Assignment, ChecklistStep};

const CHECKLIST_INSTRUCTIONS: &str = r#"You are an expert academic advisor. First, determine if this PDF is a valid school or university assignment. Then, if valid, create a step-by-step checklist for completing it.

A valid assignment is a document that asks a student to complete academic work: essays, problem sets, lab reports, research papers, projects, presentations, reading responses and similar. Invalid documents include receipts, invoices, resumes, random articles, blank pages, memos, personal documents, or anything that is clearly not an assignment given to a student.

Return your response as JSON with this exact structure:

If the PDF is NOT a valid assignment:
{
  "valid": false,
  "reason": "Brief explanation of why this is not a valid assignment"
}

If the PDF IS a valid assignment:
{
  "valid": true,
  "title": "A short descriptive title for the assignment",
  "steps": [
    {
      "title": "Short step title",
      "description": "1-2 sentence explanation of what to do for this step"
    }
  ]
}

Guidelines for steps (only if valid):
- Create 5-15 ordered, actionable steps
- Order them logically (research, outline, draft, revise)
- Each step should be concrete and specific to this assignment
- Keep titles short (under 10 words)
- Keep descriptions to 1-2 sentences max
- Return ONLY valid JSON, no other text"#;

/// Instruction that accompanies an uploaded document.
pub fn checklist_instructions() -> &'static str {
    CHECKLIST_INSTRUCTIONS
}

/// System context for tutoring on `current`.
pub fn step_tutor_system(
    assignment: &Assignment,
    steps: &[ChecklistStep],
    current: &ChecklistStep,
) -> String {
    let mut prompt = String::from(
        "You are a helpful academic assistant. The student is working on an assignment and needs help with a specific step.\n\n",
    );

    let _ = write!(
        prompt,
        "ASSIGNMENT TITLE: {}\n\nASSIGNMENT TEXT:\n{}\n\nFULL CHECKLIST:\n{}\n\nCURRENT STEP (Step {}): {}\n{}\n\n",
        assignment.title,
        assignment.original_text,
        render_checklist(steps),
        current.step_number,
        current.title,
        current.description,
    );

    prompt.push_str(
        "Help the student with this specific step. Be concise, practical, and encouraging. \
         Give actionable advice specific to their assignment. If they ask about other steps, \
         you can help but gently guide them back to the current step.",
    );
    prompt
}

fn render_checklist(steps: &[ChecklistStep]) -> String {
    steps
        .iter()
        .map(|s| {
            let mark = if s.completed { 'x' } else { ' ' };
            format!("{}. [{mark}] {}", s.step_number, s.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::StepDraft;

    #[test]
    fn tutor_context_renders_checklist_and_current_step() {
        let assignment = Assignment::new(Uuid::new_v4(), "Essay".into(), "Write 500 words".into());
        let mut steps = ChecklistStep::numbered(
            assignment.id,
            vec![
                StepDraft {
                    title: "Pick a topic".into(),
                    description: "Choose something narrow.".into(),
                },
                StepDraft {
                    title: "Outline".into(),
                    description: "List three arguments.".into(),
                },
            ],
        );
        steps[0].completed = true;

        let prompt = step_tutor_system(&assignment, &steps, &steps[1]);

        assert!(prompt.contains("ASSIGNMENT TITLE: Essay"));
        assert!(prompt.contains("Write 500 words"));
        assert!(prompt.contains("1. [x] Pick a topic\n2. [ ] Outline"));
        assert!(prompt.contains("CURRENT STEP (Step 2): Outline\nList three arguments."));
    }

    #[test]
    fn instructions_ask_for_json_only() {
        assert!(checklist_instructions().ends_with("Return ONLY valid JSON, no other text"));
    }
}
