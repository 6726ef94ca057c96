#![deny(missing_debug_implementations)]

//! # httpcore
//!
//! A low-level HTTP client engine: a connection-pooling core that multiplexes
//! request/response cycles over a bounded set of persistent HTTP/1.1 and
//! HTTP/2 connections, optionally through a forward or tunneling proxy.
//!
//! ## "Low-level"
//!
//! This crate does not parse URLs beyond a bare [`Origin`](origin::Origin)
//! triple, does not decode response bodies, and does not implement retry or
//! redirect policy. It hands back exactly what came off the wire, wrapped in
//! a [`Response`](response::Response) whose body is tied to pool accounting.
//! Callers wanting a friendlier API are expected to build one on top.
//!
//! ## Async and blocking
//!
//! The [`pool::ConnectionPool`] is `async`, built on `tokio`. A synchronous
//! façade is available as [`blocking::BlockingPool`] for callers who don't
//! want to manage a runtime themselves; it drives the same state machines on
//! a dedicated background runtime.
//!
//! # Optional Features
//!
//! - `http1`: Enables HTTP/1.1 support.
//! - `http2`: Enables HTTP/2 support (via the `h2` crate).
//! - `full`: Enables both of the above plus `tracing` instrumentation.

#[macro_use]
mod macros;

pub mod blocking;
pub mod body;
mod connection;
pub mod error;
pub mod net;
pub mod origin;
pub mod pool;
mod proxy;
pub mod request;
pub mod response;
mod sync;
pub mod trace;

pub use crate::blocking::BlockingPool;
pub use crate::body::Body;
pub use crate::connection::ConnectionInfo;
pub use crate::error::{Error, Result};
pub use crate::origin::{Origin, Scheme};
pub use crate::pool::{ConnectionPool, PoolConfig};
pub use crate::proxy::{ProxyConfig, ProxyMode};
pub use crate::request::{Extensions, Request, Timeouts};
pub use crate::response::Response;
