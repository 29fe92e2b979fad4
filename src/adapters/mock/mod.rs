//! Mock implementations for testing.
//!
//! This module provides mock implementations of all collaborator traits,
//! enabling tests of the session, downloader and applier without a broker,
//! a download server or real device hooks.
//!
//! # Available Mocks
//!
//! - [`MockHttpClient`] - Streaming HTTP client with canned responses
//! - [`MockControlChannel`] - Control channel with scripted outcomes and message injection
//! - [`MockPlatform`] - Device platform with switchable network and counted hooks

pub mod control_channel;
pub mod http;
pub mod platform;

pub use control_channel::MockControlChannel;
pub use http::{MockHttpClient, MockResponse, RecordedRequest};
pub use platform::MockPlatform;
