//! Upload engine
//!
//! - Sequential chunk uploads with per-chunk retries
//! - Atomic persistence (SQLite) for resume
//! - Token bucket bandwidth cap

mod persistence;
mod rate_limiter;
mod upload_task;

pub use persistence::*;
pub use rate_limiter::*;
pub use upload_task::*;
