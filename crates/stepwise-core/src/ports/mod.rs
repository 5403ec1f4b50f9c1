//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod auth;
mod clock;
mod incident;
mod inference;
mod repository;
mod window_store;

pub use auth::{AuthError, TokenClaims, TokenService};
pub use clock::{Clock, SystemClock};
pub use incident::{Incident, IncidentReporter, LogIncidents};
pub use inference::{
    FragmentStream, InferenceError, InferenceProvider, InferenceRequest, PromptContent,
    PromptMessage,
};
pub use repository::{AssignmentRepository, BaseRepository, StepRepository};
pub use window_store::{WindowStore, WindowStoreError};
