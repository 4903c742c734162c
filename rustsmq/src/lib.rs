//! rustsmq - simple message queue server
//!
//! Serves the queue engine from `rustsmq-queue` over a small JSON protocol.
//! Each request is a `POST /` naming its operation in the `x-rsmq-target`
//! header, for example `RSMQ.SendMessage`.

pub mod config;
pub mod handlers;
pub mod router;

pub use config::Config;
pub use router::{create_router, AppState};
