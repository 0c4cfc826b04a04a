//! HTTP client and transport adapter for the glucolog cloud API.

mod client;
mod error;
mod transport;
mod types;

pub use client::ConnectClient;
pub use error::{ConnectError, Result};
pub use transport::{AccessTokenProvider, ConnectTransport, StaticTokenProvider};
pub use types::*;
