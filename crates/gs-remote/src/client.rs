//! Core RemoteClient trait

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;

/// Request parameters. Ordered so that requests are reproducible in logs and tests.
pub type Params = BTreeMap<String, String>;

/// HTTP verbs the goal API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    /// Partial update; sent as PATCH on the wire.
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PATCH"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// Pluggable transport for authenticated server calls
///
/// Paths are relative to the server base URL and may contain the
/// `{username}` placeholder, which the implementation fills in from the
/// current session.
///
/// Implementations must report a 401 as [`RemoteError::Unauthorized`]
/// and are responsible for any sign-out side effect that goes with it.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Issue one request and return the parsed JSON body.
    ///
    /// An empty body is returned as `Value::Null`.
    async fn request(&self, path: &str, method: Method, params: Params)
        -> Result<Value, RemoteError>;
}
