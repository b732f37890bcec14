//! Lichess bot API transport.

mod client;
mod ndjson;
mod wire;

pub use client::{LichessClient, LICHESS_URL};
