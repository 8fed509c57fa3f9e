//! Media metadata and download proxy backed by an external extraction engine.
//!
//! The service invokes the engine as a black box: given a source URL and a
//! format selector, it materializes a media file in a per-session scratch
//! directory, which is then streamed to the client and removed on every
//! termination path. A periodic sweeper reclaims anything a crashed or
//! interrupted session left behind.

pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod format;
pub mod server;
pub mod workspace;
