//! Integration test entry point for bitmsg-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod handshake;
mod objects;
mod relay;
