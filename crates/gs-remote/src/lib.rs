//! # gs-remote
//!
//! The network boundary of goalsync.
//!
//! Everything above this crate talks to the server through the
//! [`RemoteClient`] trait, so tests and alternative transports can stand in
//! for HTTP. The production implementation is [`HttpRemoteClient`].
//!
//! ## Key components
//!
//! - [`RemoteClient`] — `request(path, method, params) -> JSON`
//! - [`HttpRemoteClient`] — reqwest-backed client; signs the session out on 401
//! - [`Session`] — the signed-in user's credentials plus sign-in/out events
//! - [`GoalApi`] — typed helpers for the goal and datapoint endpoints
//! - [`RemoteError`] — distinguishes unauthorized from every other failure

pub mod api;
pub mod client;
pub mod error;
pub mod http;
pub mod session;

pub use api::GoalApi;
pub use client::{Method, Params, RemoteClient};
pub use error::RemoteError;
pub use http::HttpRemoteClient;
pub use session::{Credentials, Session, SessionEvent};
