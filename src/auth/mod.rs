pub mod flow;
pub mod service;
pub mod session;

pub use flow::{AuthFlow, AuthView};
pub use service::{AuthService, SignUpOutcome};
pub use session::{AuthEvent, AuthSession, AuthState, SessionUser};
