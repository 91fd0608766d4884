// Agora common library - main library exports

pub mod clock;
pub mod retry;
pub mod types;

// Flattened re-exports
pub use self::clock::{Clock, SystemClock};
pub use self::retry::{RetryConfig, RetryRunner};
pub use self::types::*;
