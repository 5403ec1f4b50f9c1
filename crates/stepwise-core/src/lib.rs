//! # Stepwise Core
//!
//! The domain layer of Stepwise: a rate-limited streaming proxy in front of a
//! text-generation provider. This crate holds the admission policy, the stream
//! relay and the request gate that ties them together, plus the ports that
//! infrastructure must implement. It has zero infrastructure dependencies.

pub mod checklist;
pub mod domain;
pub mod error;
pub mod gate;
pub mod ports;
pub mod prompts;
pub mod rate_limit;
pub mod relay;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::DomainError;
pub use gate::{CompletionHook, GateError, GateResult, RequestGate, StreamOutcome};
pub use rate_limit::SlidingWindowLimiter;
pub use relay::{RelayConfig, RelayStream, StreamError, StreamRelay};
