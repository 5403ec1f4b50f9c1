//! Domain entities - the core business objects.

mod admission;
mod assignment;
mod chat;

pub use admission::{AdmissionEvent, Decision, RateLimitKey, WindowPolicy};
pub use assignment::{Assignment, ChecklistStep, StepDraft};
pub use chat::{ChatMessage, ChatRole, ChatTranscript, extend_transcript};
