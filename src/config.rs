use crate::types::ObjectKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Settings of one expiration sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Keys reclaimed per sweep at most.
    pub loop_limit: usize,
    pub interval_ms: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        CheckerConfig {
            loop_limit: 10,
            interval_ms: 100,
        }
    }
}

impl CheckerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub databases: u8,
    pub requirepass: Option<String>,
    /// 0 means unlimited.
    pub max_connections: usize,
    pub loglevel: String,
    pub tenant_id: String,
    pub txn_retry: usize,
    // Expiration sweepers
    pub string_checker: CheckerConfig,
    pub hash_checker: CheckerConfig,
    pub list_checker: CheckerConfig,
    pub set_checker: CheckerConfig,
    pub zset_checker: CheckerConfig,
    // GC and leadership, in seconds
    pub gc_enabled: bool,
    pub gc_interval: u64,
    pub gc_lifetime: u64,
    pub gc_concurrency: usize,
    pub leader_check_interval: u64,
    pub leader_lease_duration: u64,
    // Async deletion
    pub async_delete_threshold: u64,
    pub async_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 5379,
            databases: 16,
            requirepass: None,
            max_connections: 0,
            loglevel: "info".to_string(),
            tenant_id: String::new(),
            txn_retry: 5,
            string_checker: CheckerConfig::default(),
            hash_checker: CheckerConfig::default(),
            list_checker: CheckerConfig::default(),
            set_checker: CheckerConfig::default(),
            zset_checker: CheckerConfig::default(),
            gc_enabled: true,
            gc_interval: 600,
            gc_lifetime: 600,
            gc_concurrency: 2,
            leader_check_interval: 30,
            leader_lease_duration: 60,
            async_delete_threshold: 1024,
            async_queue_capacity: 10240,
        }
    }
}

const SCALAR_PARAMS: &[&str] = &[
    "bind",
    "port",
    "databases",
    "requirepass",
    "max-connections",
    "loglevel",
    "tenant-id",
    "txn-retry",
    "gc-enabled",
    "gc-interval",
    "gc-lifetime",
    "gc-concurrency",
    "leader-check-interval",
    "leader-lease-duration",
    "async-delete-threshold",
    "async-queue-capacity",
];

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value '{value}' for '{key}'"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(format!("invalid value '{value}' for '{key}'")),
    }
}

fn yes_no(b: bool) -> String {
    if b { "yes" } else { "no" }.to_string()
}

/// Split `list-checker-loop` into the kind and the checker field.
fn checker_param(key: &str) -> Option<(ObjectKind, &str)> {
    let (kind, field) = key.split_once("-checker-")?;
    let kind = ObjectKind::ALL.into_iter().find(|k| k.type_name() == kind)?;
    matches!(field, "loop" | "interval").then_some((kind, field))
}

impl Config {
    /// Parse `--name value` pairs on top of the defaults.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let mut config = Config::default();
        let mut i = 0;
        while i < args.len() {
            let Some(name) = args[i].strip_prefix("--") else {
                return Err(format!("unexpected argument '{}'", args[i]));
            };
            let value = args
                .get(i + 1)
                .ok_or_else(|| format!("missing value for '--{name}'"))?;
            config.set(name, value)?;
            i += 2;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.databases == 0 {
            return Err("databases must be between 1 and 255".into());
        }
        if self.gc_interval == 0 || self.leader_check_interval == 0 {
            return Err("gc-interval and leader-check-interval must be positive".into());
        }
        if self.async_queue_capacity == 0 {
            return Err("async-queue-capacity must be positive".into());
        }
        for kind in ObjectKind::ALL {
            if self.checker(kind).interval_ms == 0 {
                return Err(format!("{}-checker-interval must be positive", kind.type_name()));
            }
        }
        Ok(())
    }

    pub fn checker(&self, kind: ObjectKind) -> &CheckerConfig {
        match kind {
            ObjectKind::String => &self.string_checker,
            ObjectKind::Hash => &self.hash_checker,
            ObjectKind::List => &self.list_checker,
            ObjectKind::Set => &self.set_checker,
            ObjectKind::ZSet => &self.zset_checker,
        }
    }

    fn checker_mut(&mut self, kind: ObjectKind) -> &mut CheckerConfig {
        match kind {
            ObjectKind::String => &mut self.string_checker,
            ObjectKind::Hash => &mut self.hash_checker,
            ObjectKind::List => &mut self.list_checker,
            ObjectKind::Set => &mut self.set_checker,
            ObjectKind::ZSet => &mut self.zset_checker,
        }
    }

    /// Every name accepted by [`Config::get`].
    pub fn parameter_names() -> Vec<String> {
        let mut names: Vec<String> = SCALAR_PARAMS.iter().map(|s| s.to_string()).collect();
        for kind in ObjectKind::ALL {
            names.push(format!("{}-checker-loop", kind.type_name()));
            names.push(format!("{}-checker-interval", kind.type_name()));
        }
        names
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let key = key.to_ascii_lowercase();
        if let Some((kind, field)) = checker_param(&key) {
            let checker = self.checker(kind);
            return Some(match field {
                "loop" => checker.loop_limit.to_string(),
                _ => checker.interval_ms.to_string(),
            });
        }
        match key.as_str() {
            "bind" => Some(self.bind.clone()),
            "port" => Some(self.port.to_string()),
            "databases" => Some(self.databases.to_string()),
            "requirepass" => self.requirepass.clone().or(Some(String::new())),
            "max-connections" => Some(self.max_connections.to_string()),
            "loglevel" => Some(self.loglevel.clone()),
            "tenant-id" => Some(self.tenant_id.clone()),
            "txn-retry" => Some(self.txn_retry.to_string()),
            "gc-enabled" => Some(yes_no(self.gc_enabled)),
            "gc-interval" => Some(self.gc_interval.to_string()),
            "gc-lifetime" => Some(self.gc_lifetime.to_string()),
            "gc-concurrency" => Some(self.gc_concurrency.to_string()),
            "leader-check-interval" => Some(self.leader_check_interval.to_string()),
            "leader-lease-duration" => Some(self.leader_lease_duration.to_string()),
            "async-delete-threshold" => Some(self.async_delete_threshold.to_string()),
            "async-queue-capacity" => Some(self.async_queue_capacity.to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let key = key.to_ascii_lowercase();
        if let Some((kind, field)) = checker_param(&key) {
            let checker = self.checker_mut(kind);
            match field {
                "loop" => checker.loop_limit = parse_num(&key, value)?,
                _ => checker.interval_ms = parse_num(&key, value)?,
            }
            return Ok(());
        }
        match key.as_str() {
            "bind" => self.bind = value.to_string(),
            "port" => self.port = parse_num(&key, value)?,
            "databases" => self.databases = parse_num(&key, value)?,
            "requirepass" => {
                self.requirepass = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "max-connections" => self.max_connections = parse_num(&key, value)?,
            "loglevel" => self.loglevel = value.to_string(),
            "tenant-id" => self.tenant_id = value.to_string(),
            "txn-retry" => self.txn_retry = parse_num(&key, value)?,
            "gc-enabled" => self.gc_enabled = parse_bool(&key, value)?,
            "gc-interval" => self.gc_interval = parse_num(&key, value)?,
            "gc-lifetime" => self.gc_lifetime = parse_num(&key, value)?,
            "gc-concurrency" => self.gc_concurrency = parse_num(&key, value)?,
            "leader-check-interval" => self.leader_check_interval = parse_num(&key, value)?,
            "leader-lease-duration" => self.leader_lease_duration = parse_num(&key, value)?,
            "async-delete-threshold" => self.async_delete_threshold = parse_num(&key, value)?,
            "async-queue-capacity" => self.async_queue_capacity = parse_num(&key, value)?,
            _ => return Err(format!("unknown option '{key}'")),
        }
        Ok(())
    }
}

pub type SharedConfig = Arc<RwLock<Config>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&[]).unwrap();
        assert_eq!(config.port, 5379);
        assert_eq!(config.databases, 16);
        assert_eq!(config.checker(ObjectKind::ZSet).loop_limit, 10);
        assert_eq!(config.get("gc-enabled").as_deref(), Some("yes"));
        assert_eq!(config.get("requirepass").as_deref(), Some(""));
    }

    #[test]
    fn test_from_args() {
        let config = Config::from_args(&args(
            "--port 7000 --requirepass pw --list-checker-loop 50 --hash-checker-interval 250 --gc-enabled no",
        ))
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.requirepass.as_deref(), Some("pw"));
        assert_eq!(config.list_checker.loop_limit, 50);
        assert_eq!(config.hash_checker.interval(), Duration::from_millis(250));
        assert!(!config.gc_enabled);
        assert_eq!(config.get("LIST-CHECKER-LOOP").as_deref(), Some("50"));
    }

    #[test]
    fn test_rejects_bad_args() {
        assert!(Config::from_args(&args("--port")).is_err());
        assert!(Config::from_args(&args("--port abc")).is_err());
        assert!(Config::from_args(&args("--nope 1")).is_err());
        assert!(Config::from_args(&args("port 1")).is_err());
        assert!(Config::from_args(&args("--databases 0")).is_err());
        assert!(Config::from_args(&args("--databases 256")).is_err());
        assert!(Config::from_args(&args("--databases 255")).is_ok());
        assert!(Config::from_args(&args("--string-checker-interval 0")).is_err());
        assert!(Config::from_args(&args("--blob-checker-loop 1")).is_err());
    }

    #[test]
    fn test_every_parameter_readable() {
        let config = Config::default();
        for name in Config::parameter_names() {
            assert!(config.get(&name).is_some(), "{name}");
        }
    }
}
