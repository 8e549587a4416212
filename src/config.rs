//! Configuration management

use crate::cache::CacheConfig;
use crate::collaborators::BotType;
use crate::gate::{GateConfig, LockPolicy};
use crate::performance::TrackerConfig;
use crate::rate_limit::{RateLimitConfig, DEFAULT_EXEMPT_PATHS};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Attach a request trace layer
    pub log_requests: bool,
    /// Emit logs as JSON instead of ANSI text
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            log_requests: true,
            log_json: false,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// CRM and bot-engine endpoints
#[derive(Debug, Clone, Default)]
pub struct CollaboratorConfig {
    pub crm_base_url: Option<String>,
    pub crm_api_key: Option<String>,
    pub engine_urls: HashMap<BotType, String>,
    /// Per-request timeout for collaborator calls
    pub timeout: Duration,
}

/// Service configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Redis URL for the shared primary cache (optional)
    pub redis_url: Option<String>,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub gate: GateConfig,
    pub tracker: TrackerConfig,
    pub collaborators: CollaboratorConfig,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn flag_or(name: &str, default: bool) -> bool {
    var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn secs_or(name: &str, default: u64) -> Duration {
    Duration::from_secs(parse_or(name, default))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let redis_url = var("REDIS_URL");

        let server = ServerConfig {
            bind_addr: var("LEADBOT_BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("LEADBOT_PORT", 8080),
            log_requests: flag_or("LEADBOT_LOG_REQUESTS", true),
            log_json: flag_or("LEADBOT_LOG_JSON", false),
        };

        let cache = CacheConfig {
            fallback_max_entries: parse_or("LEADBOT_FALLBACK_MAX_ENTRIES", 100_000),
            fallback_sweep_threshold: parse_or("LEADBOT_FALLBACK_SWEEP_THRESHOLD", 10_000),
            fallback_sweep_interval: secs_or("LEADBOT_FALLBACK_SWEEP_INTERVAL_SECS", 60),
            ..Default::default()
        };

        let exempt_paths = var("LEADBOT_RATE_LIMIT_EXEMPT")
            .map(|v| {
                v.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect());

        let rate_limit = RateLimitConfig {
            requests_per_minute: parse_or("LEADBOT_RATE_LIMIT_RPM", 60),
            exempt_paths,
            trust_proxy: flag_or("LEADBOT_TRUST_PROXY", true),
        };

        let default_bot = match var("LEADBOT_DEFAULT_BOT") {
            Some(raw) => raw
                .parse::<BotType>()
                .map_err(anyhow::Error::msg)
                .context("LEADBOT_DEFAULT_BOT")?,
            None => BotType::Lead,
        };

        let gate = GateConfig {
            webhook_rpm: parse_or("LEADBOT_WEBHOOK_RPM", 300),
            dedup_ttl: secs_or("LEADBOT_DEDUP_TTL_SECS", 300),
            lock: LockPolicy {
                ttl: secs_or("LEADBOT_LOCK_TTL_SECS", 30),
                attempts: parse_or("LEADBOT_LOCK_POLL_ATTEMPTS", 10),
                interval: Duration::from_millis(parse_or("LEADBOT_LOCK_POLL_INTERVAL_MS", 1_000)),
            },
            assignment_ttl: secs_or("LEADBOT_ASSIGNMENT_TTL_SECS", 604_800),
            default_bot,
            tag_delay: secs_or("LEADBOT_TAG_DELAY_SECS", 30),
        };

        let tracker = TrackerConfig {
            window: secs_or("LEADBOT_METRICS_WINDOW_SECS", 86_400),
            max_events: parse_or("LEADBOT_METRICS_MAX_EVENTS", 10_000),
            ai_latency_target: Duration::from_millis(parse_or(
                "LEADBOT_AI_LATENCY_TARGET_MS",
                2_000,
            )),
            cost_per_ai_call_usd: parse_or("LEADBOT_COST_PER_AI_CALL", 0.003),
            persist_interval: secs_or("LEADBOT_METRICS_PERSIST_SECS", 60),
            ..Default::default()
        };

        let mut engine_urls = HashMap::new();
        for bot in BotType::all() {
            let name = format!("LEADBOT_ENGINE_URL_{}", bot.as_str().to_ascii_uppercase());
            if let Some(url) = var(&name) {
                engine_urls.insert(*bot, url);
            }
        }

        let collaborators = CollaboratorConfig {
            crm_base_url: var("LEADBOT_CRM_BASE_URL"),
            crm_api_key: var("LEADBOT_CRM_API_KEY"),
            engine_urls,
            timeout: secs_or("LEADBOT_COLLABORATOR_TIMEOUT_SECS", 20),
        };

        Ok(Self {
            redis_url,
            server,
            cache,
            rate_limit,
            gate,
            tracker,
            collaborators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment is process-global; keep every env-mutating assertion in
    // one test.
    #[test]
    fn test_from_env() {
        let keys = [
            "LEADBOT_PORT",
            "LEADBOT_WEBHOOK_RPM",
            "LEADBOT_RATE_LIMIT_EXEMPT",
            "LEADBOT_DEFAULT_BOT",
            "LEADBOT_ENGINE_URL_SELLER",
            "LEADBOT_LOCK_POLL_INTERVAL_MS",
        ];
        for key in keys {
            std::env::remove_var(key);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.gate.webhook_rpm, 300);
        assert_eq!(config.gate.default_bot, BotType::Lead);
        assert_eq!(config.gate.lock.interval, Duration::from_secs(1));
        assert!(config.rate_limit.is_exempt("/health"));

        std::env::set_var("LEADBOT_PORT", "9090");
        std::env::set_var("LEADBOT_WEBHOOK_RPM", "not-a-number");
        std::env::set_var("LEADBOT_RATE_LIMIT_EXEMPT", "/healthz, /status");
        std::env::set_var("LEADBOT_DEFAULT_BOT", "Seller");
        std::env::set_var("LEADBOT_ENGINE_URL_SELLER", "http://seller:9000/respond");
        std::env::set_var("LEADBOT_LOCK_POLL_INTERVAL_MS", "250");

        let config = Config::from_env().unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.gate.webhook_rpm, 300);
        assert_eq!(config.rate_limit.exempt_paths, vec!["/healthz", "/status"]);
        assert_eq!(config.gate.default_bot, BotType::Seller);
        assert_eq!(config.gate.lock.interval, Duration::from_millis(250));
        assert_eq!(
            config.collaborators.engine_urls.get(&BotType::Seller).map(String::as_str),
            Some("http://seller:9000/respond")
        );

        std::env::set_var("LEADBOT_DEFAULT_BOT", "landlord");
        assert!(Config::from_env().is_err());

        for key in keys {
            std::env::remove_var(key);
        }
    }
}
