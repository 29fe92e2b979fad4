//! OTA update agent for fleet-managed devices.
//!
//! Listens for update announcements on a control channel, keeps a durable
//! store of known updates, downloads archives with resume and hash checks,
//! and applies them by staging the payload and resetting the device.
//!
//! The library is driven through [`session::UpdateSession`]; the collaborators
//! it talks to sit behind the traits in [`traits`].

pub mod adapters;
pub mod apply;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod logger;
pub mod models;
pub mod session;
pub mod store;
pub mod traits;

pub use error::{OtaError, OtaResult};
pub use session::{SessionState, UpdateEvent, UpdateSession};
