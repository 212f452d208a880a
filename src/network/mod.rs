//! Network Module
//!
//! TCP server side of the wire protocol.
//!
//! ## Architecture
//! - One accept loop on a multi-threaded tokio runtime
//! - One [`Session`] task per connection, steps strictly sequential
//! - Sessions of different connections run in parallel across workers
//! - Every request dispatched straight to the shared [`Store`](crate::storage::Store)

mod server;
mod session;

pub use server::Server;
pub use session::Session;
