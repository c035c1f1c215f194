//! Wire protocol: the message codec and the protocol versions this crate
//! knows how to speak.

pub mod message;

pub use message::{decode, encode, ErrorObject, Message, RequestId};

/// Protocol revisions supported out of the box, newest first. A deployment
/// can narrow or extend this list through [`crate::config::ServerConfig`].
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26"];

/// Newest protocol revision this crate speaks
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];
