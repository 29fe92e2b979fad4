//! Concrete implementations of trait abstractions.
//!
//! Production adapters for the traits defined in `crate::traits`.
//!
//! # Adapters
//!
//! - [`ReqwestHttpClient`] - archive downloads using reqwest
//! - [`WsControlChannel`] - broker connection using tokio-tungstenite
//! - [`LinuxPlatform`] - sysfs network status, machine id, shutdown and reboot commands
//!
//! # Mock Implementations
//!
//! The [`mock`] submodule provides test doubles for all adapters:
//! - [`mock::MockHttpClient`] - Scripted responses with `Range` support
//! - [`mock::MockControlChannel`] - Scripted connect/subscribe, message injection
//! - [`mock::MockPlatform`] - Switchable network, counted hooks

pub mod linux_platform;
pub mod mock;
pub mod reqwest_http;
pub mod ws_channel;

pub use linux_platform::LinuxPlatform;
pub use mock::{MockControlChannel, MockHttpClient, MockPlatform};
pub use reqwest_http::ReqwestHttpClient;
pub use ws_channel::WsControlChannel;
