use std::{env, net::SocketAddr, str::FromStr};

use crate::models::SandboxLimits;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: SocketAddr,
    pub queue_backend: QueueBackendKind,
    pub redis_url: String,
    pub queue_key_prefix: String,
    pub workers_per_language: usize,
    pub queue_capacity: usize,
    pub default_limits: SandboxLimits,
    /// How long a dequeued job stays leased to a worker before the reaper
    /// makes it visible again.
    pub lease_ms: u64,
    /// Deliveries allowed before an infrastructure failure becomes permanent.
    pub max_deliveries: u32,
    pub result_ttl_secs: u64,
    pub python_bin: String,
    pub node_bin: String,
    pub cxx_bin: String,
    pub log_level: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080))),
            queue_backend: env_parse("QUEUE_BACKEND", QueueBackendKind::Memory),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            queue_key_prefix: env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "coderunner".to_string()),
            workers_per_language: env_parse("WORKERS_PER_LANGUAGE", 2usize),
            queue_capacity: env_parse("QUEUE_CAPACITY", 1024usize),
            default_limits: SandboxLimits {
                wall_clock_ms: env_parse("DEFAULT_TIMEOUT_MS", 4000u64),
                compile_wall_clock_ms: env_parse("DEFAULT_COMPILE_TIMEOUT_MS", 10_000u64),
                memory_bytes: env_parse("DEFAULT_MEMORY_BYTES", 512u64 << 20),
                max_output_bytes: env_parse("DEFAULT_MAX_OUTPUT_BYTES", 64 * 1024usize),
                allow_network: false,
            },
            lease_ms: env_parse("JOB_LEASE_MS", 30_000u64),
            max_deliveries: env_parse("MAX_DELIVERIES", 3u32),
            result_ttl_secs: env_parse("RESULT_TTL_SECS", 600u64),
            python_bin: env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),
            node_bin: env::var("NODE_BIN").unwrap_or_else(|_| "node".to_string()),
            cxx_bin: env::var("CXX_BIN").unwrap_or_else(|_| "g++".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueBackendKind {
    Redis,
    #[default]
    Memory,
}

impl FromStr for QueueBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("unsupported queue backend: {s}")),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::QueueBackendKind;

    #[test]
    fn parses_backend_kinds() {
        assert_eq!("redis".parse(), Ok(QueueBackendKind::Redis));
        assert_eq!("MEMORY".parse(), Ok(QueueBackendKind::Memory));
        assert!("rabbitmq".parse::<QueueBackendKind>().is_err());
    }
}
