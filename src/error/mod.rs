//! Unified error handling for the update agent.
//!
//! - [`ErrorCategory`]: high-level classification for handling decisions
//! - [`OtaError`]: the single error type returned by store, downloader,
//!   applier and session operations
//! - [`OtaResult`]: result alias used across the crate
//!
//! | Category | Description | Retryable |
//! |----------|-------------|-----------|
//! | Network | Control channel, HTTP transport | Yes |
//! | Server | Backend status errors | Yes |
//! | Storage | Store and staging I/O | No |
//! | Verification | Size or hash mismatch | No |
//! | Package | Malformed update package | No |
//! | State | Command rejected by session state | No |
//! | Configuration | Invalid config | No |

mod category;
mod ota_error;

pub use category::ErrorCategory;
pub use ota_error::{classify_io_error, OtaError};
pub(crate) use ota_error::is_disk_space_error;

/// Result alias used throughout the crate.
pub type OtaResult<T> = Result<T, OtaError>;
