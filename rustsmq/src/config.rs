//! Configuration management

use rustsmq_queue::{
    ClientConfig, EphemeralStorage, QueueClient, QueueStorage, RedisPoolConfig, RedisStorage,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: ClientConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[serde(rename = "memory")]
    Memory,

    #[serde(rename = "redis")]
    Redis {
        #[serde(default = "default_redis_url")]
        url: String,

        #[serde(default = "default_namespace")]
        namespace: String,

        /// Publish sends on `<namespace>:rt:<queue>` and wake long polls from it
        #[serde(default)]
        realtime: bool,

        #[serde(default)]
        pool: RedisPoolConfig,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

fn default_port() -> u16 {
    6380
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_namespace() -> String {
    rustsmq_queue::storage::DEFAULT_NAMESPACE.to_string()
}

impl Config {
    /// Load configuration from a file and `RUSTSMQ__*` environment variables
    ///
    /// Without an explicit path, `rustsmq.toml` in the working directory is
    /// read if it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("rustsmq").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("RUSTSMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// Connect the configured storage backend and wrap it in a client
    pub async fn build_client(&self) -> anyhow::Result<QueueClient> {
        let storage: Arc<dyn QueueStorage> = match &self.storage {
            StorageConfig::Memory => {
                info!("Using in-memory storage");
                Arc::new(EphemeralStorage::new())
            }
            StorageConfig::Redis {
                url,
                namespace,
                realtime,
                pool,
            } => {
                info!(namespace = %namespace, realtime, "Using Redis storage");
                let storage = RedisStorage::connect(url, namespace.clone(), *pool)
                    .await?
                    .with_realtime(*realtime);
                Arc::new(storage)
            }
        };
        Ok(QueueClient::with_config(storage, self.queue.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 6380);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.queue.max_wait_secs, 20);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("rustsmq-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
port = 7000

[storage]
type = "redis"
url = "redis://cache:6379"
realtime = true

[storage.pool]
max_size = 8

[queue]
max_wait_secs = 5

[queue.limits]
max_max_size = 4096
"#
        )
        .unwrap();
        drop(file);

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        match config.storage {
            StorageConfig::Redis {
                url,
                namespace,
                realtime,
                pool,
            } => {
                assert_eq!(url, "redis://cache:6379");
                assert_eq!(namespace, "rsmq");
                assert!(realtime);
                assert_eq!(pool.max_size, 8);
                assert_eq!(pool.min_idle, 5);
            }
            StorageConfig::Memory => panic!("expected redis storage"),
        }
        assert_eq!(config.queue.max_wait_secs, 5);
        assert_eq!(config.queue.poll_interval_ms, 100);
        assert_eq!(config.queue.limits.max_max_size, 4096);
        assert_eq!(config.queue.limits.min_max_size, 1024);
    }

    #[tokio::test]
    async fn test_memory_client() {
        let client = Config::default().build_client().await.unwrap();
        assert!(client.list_queues().await.unwrap().is_empty());
    }
}
