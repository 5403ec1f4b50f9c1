//! Rate limiting - sliding-window admission and wait-time formatting.

mod limiter;
mod wait;

pub use limiter::SlidingWindowLimiter;
pub use wait::{describe_wait, retry_after_secs};
