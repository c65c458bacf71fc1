pub mod inflight;
pub mod retry;
pub mod validation;

pub use inflight::Inflight;
pub use retry::{retry_on_retryable, retry_with_backoff};
pub use validation::{validate_input, InputKind, ValidationOutcome};
