//! HTTP SQL gateway backend for ferry's chunked storage.
//!
//! The chunk table lives behind a gateway that executes SQL statements
//! received over HTTP. [`HttpGatewayClient`] speaks the JSON protocol
//! described in [`protocol`]; [`GatewayStore`] runs the chunk codec on top of
//! any [`GatewayClient`].
//!
//! Unlike the direct database backend there is no transaction around a
//! write session: rows become visible as they are inserted.

pub mod client;
pub mod error;
pub mod protocol;
pub mod store;

#[cfg(test)]
mod testing;

pub use client::{GatewayClient, GatewayConfig, HttpGatewayClient};
pub use error::{GatewayError, GatewayResult};
pub use protocol::{Column, QueryResult, SqlParam};
pub use store::GatewayStore;
