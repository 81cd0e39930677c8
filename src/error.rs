use std::io;

use thiserror::Error;

/// Errors surfaced by the client engine.
///
/// Every failed submission resolves its completion with one of these; the
/// two programming errors of the engine (double transport assignment,
/// unknown fd in the event loop) panic instead of returning.
#[derive(Debug, Error)]
pub enum Error {
    /// Address resolution produced no usable address.
    #[error("address resolution failed for {0}")]
    AddressResolution(String),
    /// `socket()` failed for every resolved candidate.
    #[error("socket creation failed: {0}")]
    SocketCreation(io::Error),
    /// Non-blocking connect failed, or the peer hung up while connecting.
    #[error("could not connect: {0}")]
    Connect(String),
    /// `send()` failed with something other than would-block.
    #[error("could not send request: {0}")]
    Send(io::Error),
    /// `recv()` failed with something other than would-block.
    #[error("could not receive response: {0}")]
    Recv(io::Error),
    /// The remote closed the connection with no response bytes pending.
    #[error("remote closed connection")]
    PeerClosed,
    /// The per-request timer fired before the response completed.
    #[error("request timed out")]
    Timeout,
    /// The bounded per-host pending queue rejected the submission.
    #[error("pending queue is full")]
    QueueFull,
    /// The client shut down before the submission completed.
    #[error("request canceled")]
    Canceled,
    /// The request target could not be split into host and path.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Configuration validation failed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// I/O error outside the send/recv/connect paths.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
