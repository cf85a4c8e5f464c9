//! Fixed-window rate limiting.

mod decision;
mod limiter;
mod request;
mod window;

pub use decision::{AdmissionMode, Decision, FailurePolicy};
pub use limiter::RateLimiter;
pub use request::{RateLimitKey, RateLimitRequest, KEY_DELIMITER, KEY_PREFIX};
pub use window::{Window, WindowUnit};
