//! Air Guardian CLI - simulated pilots for the coordination server.
//!
//! - send_traffic: flies a scripted scenario over WebSocket and prints
//!   every advisory and instruction the server sends back

pub mod sim;
