//! Gateway: the process host for the relay.
//!
//! Starts channel connectors, runs one pipeline task per inbound message, and serves a
//! health endpoint plus the Telegram webhook on a single port.

mod server;

pub use server::{run_gateway, run_gateway_with, shutdown_signal, GatewayState};
