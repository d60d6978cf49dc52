//! Chunked upload reassembly service and the resilience primitives around it.
//!
//! Clients split large files into indexed chunks and post them one at a time;
//! the [`reassembler`] collects them in the [`registry`] and writes the file
//! out once every index has arrived, while the [`reaper`] discards uploads
//! that were abandoned. [`retry`], [`breaker`] and [`batcher`] are the
//! in-process helpers the uploading [`client`] and the status endpoint use.

pub mod batcher;
pub mod breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod reaper;
pub mod reassembler;
pub mod registry;
pub mod retry;
pub mod server;
pub mod state;
pub mod utils;
