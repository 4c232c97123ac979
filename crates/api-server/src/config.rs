//! Server configuration read from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use billing_engine::checkout::{PRODUCTION_URL, SANDBOX_URL};
use billing_engine::{EnforcerConfig, EngineConfig, OutboxConfig};
use serde::Serialize;
use tracing::warn;

/// Which device executor backs the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    /// In-process devices, for local development
    Memory,
    /// RouterOS REST API
    Rest,
}

impl FromStr for DeviceMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rest" | "routeros" => Ok(Self::Rest),
            other => Err(format!("unknown device mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub device_mode: DeviceMode,
    pub device_timeout: Duration,
    pub max_parallel_owners: usize,
    pub fallback_profile: String,
    pub scheduler_enabled: bool,
    /// Local hour of day at which the isolation run starts
    pub schedule_hour: u32,
    pub restore_max_attempts: u32,
    pub gateway_sandbox_url: String,
    pub gateway_production_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".netbill-data"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            device_mode: DeviceMode::Rest,
            device_timeout: Duration::from_secs(10),
            max_parallel_owners: 4,
            fallback_profile: "default".to_string(),
            scheduler_enabled: true,
            schedule_hour: 1,
            restore_max_attempts: 8,
            gateway_sandbox_url: SANDBOX_URL.to_string(),
            gateway_production_url: PRODUCTION_URL.to_string(),
        }
    }
}

fn env_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

fn env_parse<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|err| {
            warn!("Ignoring invalid {}={:?}: {}", name, raw, err);
            default
        }),
        None => default,
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let timeout_ms = env_parse(
            "NETBILL_DEVICE_TIMEOUT_MS",
            lookup("NETBILL_DEVICE_TIMEOUT_MS"),
            defaults.device_timeout.as_millis() as u64,
        );
        let schedule_hour = env_parse(
            "NETBILL_SCHEDULE_HOUR",
            lookup("NETBILL_SCHEDULE_HOUR"),
            defaults.schedule_hour,
        );

        Self {
            data_dir: lookup("NETBILL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            bind_addr: env_parse("NETBILL_BIND_ADDR", lookup("NETBILL_BIND_ADDR"), defaults.bind_addr),
            device_mode: env_parse(
                "NETBILL_DEVICE_MODE",
                lookup("NETBILL_DEVICE_MODE"),
                defaults.device_mode,
            ),
            device_timeout: Duration::from_millis(timeout_ms.max(1)),
            max_parallel_owners: env_parse(
                "NETBILL_MAX_PARALLEL_OWNERS",
                lookup("NETBILL_MAX_PARALLEL_OWNERS"),
                defaults.max_parallel_owners,
            )
            .max(1),
            fallback_profile: lookup("NETBILL_FALLBACK_PROFILE")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.fallback_profile),
            scheduler_enabled: env_flag(lookup("NETBILL_SCHEDULER_ENABLED"), defaults.scheduler_enabled),
            schedule_hour: if schedule_hour > 23 {
                warn!("NETBILL_SCHEDULE_HOUR must be 0-23, using {}", defaults.schedule_hour);
                defaults.schedule_hour
            } else {
                schedule_hour
            },
            restore_max_attempts: env_parse(
                "NETBILL_RESTORE_MAX_ATTEMPTS",
                lookup("NETBILL_RESTORE_MAX_ATTEMPTS"),
                defaults.restore_max_attempts,
            )
            .max(1),
            gateway_sandbox_url: lookup("NETBILL_GATEWAY_SANDBOX_URL").unwrap_or(defaults.gateway_sandbox_url),
            gateway_production_url: lookup("NETBILL_GATEWAY_PRODUCTION_URL")
                .unwrap_or(defaults.gateway_production_url),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            enforcer: EnforcerConfig {
                max_parallel_owners: self.max_parallel_owners,
            },
            outbox: OutboxConfig {
                max_attempts: self.restore_max_attempts,
                ..OutboxConfig::default()
            },
            fallback_profile: self.fallback_profile.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.device_mode, DeviceMode::Rest);
        assert_eq!(config.max_parallel_owners, 4);
        assert!(config.scheduler_enabled);
        assert_eq!(config.gateway_sandbox_url, SANDBOX_URL);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("NETBILL_DATA_DIR", "/var/lib/netbill"),
            ("NETBILL_DEVICE_MODE", "memory"),
            ("NETBILL_DEVICE_TIMEOUT_MS", "2500"),
            ("NETBILL_SCHEDULER_ENABLED", "off"),
            ("NETBILL_FALLBACK_PROFILE", "plan-1mbps"),
            ("NETBILL_BIND_ADDR", "127.0.0.1:9000"),
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/netbill"));
        assert_eq!(config.device_mode, DeviceMode::Memory);
        assert_eq!(config.device_timeout, Duration::from_millis(2500));
        assert!(!config.scheduler_enabled);
        assert_eq!(config.fallback_profile, "plan-1mbps");
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.engine_config().fallback_profile, "plan-1mbps");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("NETBILL_MAX_PARALLEL_OWNERS", "many"),
            ("NETBILL_SCHEDULE_HOUR", "25"),
            ("NETBILL_SCHEDULER_ENABLED", "maybe"),
            ("NETBILL_DEVICE_MODE", "telnet"),
        ]);
        assert_eq!(config.max_parallel_owners, 4);
        assert_eq!(config.schedule_hour, 1);
        assert!(config.scheduler_enabled);
        assert_eq!(config.device_mode, DeviceMode::Rest);
    }
}
