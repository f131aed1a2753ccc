//! HTTP edge gateway.
//!
//! Authenticates, rate-limits and forwards requests to the users, orders,
//! payments and notifications services. Two calling conventions coexist: the
//! bearer-token v2 API and the header-based v1 API kept for older clients.

pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod pipeline;
pub mod proxy;
pub mod routes;
pub mod server;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::{run, Gateway};
