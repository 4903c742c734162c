//! Queue storage backends

mod ephemeral;
mod redis;
mod traits;


pub use self::redis::{RedisPoolConfig, RedisStorage, DEFAULT_NAMESPACE};
pub use ephemeral::EphemeralStorage;
pub use traits::{Arrivals, Claim, QueuePage, QueueStorage, SentMessage, StorageError};
