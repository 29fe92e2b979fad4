//! Trait abstractions for the agent's external collaborators.
//!
//! Each collaborator sits behind a trait so the session, downloader and
//! applier can be driven by production adapters or by test doubles.
//!
//! # Traits
//!
//! - [`ControlChannel`] - publish/subscribe connection to the fleet backend
//! - [`HttpClient`] - streaming HTTP GET for archive downloads
//! - [`Platform`] - network status, device identity, shutdown and reset hooks

pub mod control_channel;
pub mod http;
pub mod platform;

pub use control_channel::{ChannelError, ChannelEvent, ControlChannel};
pub use http::{ByteStream, Headers, HttpClient, HttpError, StreamResponse};
pub use platform::Platform;
