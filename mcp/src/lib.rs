//! Minimal client for a remote tool server speaking JSON-RPC over server-sent events.
//!
//! The server's event stream announces a POST endpoint; requests go to that
//! endpoint and their responses come back as `message` events on the stream.

pub mod client;
pub mod jsonrpc;

pub use client::{InputSchema, McpClient, RemoteTool};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("event stream failed: {0}")]
    Stream(String),

    #[error("event stream closed before a response arrived")]
    Closed,

    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("response had neither result nor error")]
    MissingResult,

    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
