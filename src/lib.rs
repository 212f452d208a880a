//! # mapkv
//!
//! A networked key-value store persisted in a memory-mapped file:
//! - Unique keys, hashed index living inside the mapping
//! - One cross-process lock serializing every storage operation
//! - Length-prefixed binary wire protocol over TCP
//! - Multi-threaded async server with per-operation stats
//! - Blocking client
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   frames    ┌─────────────────────────────────────────┐
//! │    Client    │ ──────────► │ Server (accept loop, worker threads)    │
//! │  (blocking)  │ ◄────────── │   Session per connection                │
//! └──────────────┘             └──────────────┬──────────────────────────┘
//!                                             │ dispatch      ┌─────────┐
//!                                             ├─────────────► │  Stats  │
//!                                             ▼               └─────────┘
//!                              ┌─────────────────────────────┐
//!                              │ Storage                     │
//!                              │  Mutex + named process lock │
//!                              │  HashIndex in mmap segment  │
//!                              └─────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod storage;
pub mod stats;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{MapKvError, Result};
pub use config::Config;
pub use client::Client;
pub use network::Server;
pub use protocol::{ErrorCode, Operation, Request, Response};
pub use stats::Stats;
pub use storage::{Storage, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mapkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
