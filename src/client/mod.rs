//! Client Session
//!
//! Discovery through the directory, then a line-oriented session with the
//! primary that reconnects and re-authenticates on failover.

mod config;
mod discovery;
mod errors;
mod session;

pub use config::ClientConfig;
pub use discovery::{discover, rediscover};
pub use errors::{ClientError, ClientResult};
pub use session::{ClientSession, NOTIFICATION_PREFIX};
