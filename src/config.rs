use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

/// How the price is located inside a competitor response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceFormat {
    /// JSON body, price found at an RFC 6901 pointer (e.g. `/data/price`)
    Json { pointer: String },
    /// HTML body, price is the text of the first element carrying `class`
    HtmlClass { class: String },
    /// Whole body is the price text (`$1.23`)
    PlainText,
}

/// A single competitor price source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub format: PriceFormat,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceConfig>,
}

/// Pricing engine constants
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Minimum price per 1M GP (USD) before margin
    pub cost_floor: Decimal,
    /// Minimum profit margin on top of the cost floor (0.05 = 5%)
    pub profit_margin: Decimal,
    /// Fraction of the competitor median we charge (0.85 = 15% below)
    pub discount_rate: Decimal,
    /// Percent move that triggers a change notification (2 = 2%)
    pub change_threshold: Decimal,
    pub cache_ttl_secs: u64,
    pub sample_timeout_secs: u64,
    pub override_ttl_secs: u64,
    pub update_interval_secs: u64,
    /// Whether an operator override may undercut the floor price
    pub allow_override_below_floor: bool,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub pricing: PricingConfig,
    pub sources: Vec<SourceConfig>,
    pub discord_webhook_url: Option<String>,
    pub log_level: String,
    pub http_port: Option<u16>,
    pub environment: String,
}

impl DatabaseConfig {
    /// Create database config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(5);

        let acquire_timeout_secs = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        let idle_timeout_secs = env::var("DATABASE_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(600); // 10 minutes

        let max_lifetime_secs = env::var("DATABASE_MAX_LIFETIME_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1800); // 30 minutes

        let test_before_acquire = env::var("DATABASE_TEST_BEFORE_ACQUIRE")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(true);

        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }

        if acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
            test_before_acquire,
        })
    }

    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/cloutscape".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal, String> {
    match env::var(key) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map_err(|e| format!("Invalid {}: {} ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

impl PricingConfig {
    /// Create pricing config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let config = Self {
            cost_floor: env_decimal("COST_FLOOR", defaults.cost_floor)?,
            profit_margin: env_decimal("PROFIT_MARGIN", defaults.profit_margin)?,
            discount_rate: env_decimal("DISCOUNT_RATE", defaults.discount_rate)?,
            change_threshold: env_decimal("PRICE_CHANGE_THRESHOLD", defaults.change_threshold)?,
            cache_ttl_secs: env_secs("PRICE_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            sample_timeout_secs: env_secs("SAMPLE_TIMEOUT_SECS", defaults.sample_timeout_secs),
            override_ttl_secs: env_secs("PRICE_OVERRIDE_TTL_SECS", defaults.override_ttl_secs),
            update_interval_secs: env_secs("PRICE_UPDATE_INTERVAL_SECS", defaults.update_interval_secs),
            allow_override_below_floor: env::var("ALLOW_OVERRIDE_BELOW_FLOOR")
                .ok()
                .and_then(|s| s.parse::<bool>().ok())
                .unwrap_or(defaults.allow_override_below_floor),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the constants describe a sane pricing policy
    pub fn validate(&self) -> Result<(), String> {
        if self.cost_floor <= Decimal::ZERO {
            return Err("COST_FLOOR must be greater than 0".to_string());
        }
        if self.profit_margin < Decimal::ZERO {
            return Err("PROFIT_MARGIN must not be negative".to_string());
        }
        if self.discount_rate <= Decimal::ZERO || self.discount_rate > Decimal::ONE {
            return Err("DISCOUNT_RATE must be in (0, 1]".to_string());
        }
        if self.change_threshold < Decimal::ZERO {
            return Err("PRICE_CHANGE_THRESHOLD must not be negative".to_string());
        }
        for (key, value) in [
            ("PRICE_CACHE_TTL_SECS", self.cache_ttl_secs),
            ("SAMPLE_TIMEOUT_SECS", self.sample_timeout_secs),
            ("PRICE_OVERRIDE_TTL_SECS", self.override_ttl_secs),
            ("PRICE_UPDATE_INTERVAL_SECS", self.update_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("{} must be greater than 0", key));
            }
        }
        Ok(())
    }

    /// Lowest price we may ever charge: `cost_floor * (1 + profit_margin)`
    pub fn floor_price(&self) -> Decimal {
        self.cost_floor * (Decimal::ONE + self.profit_margin)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs)
    }

    pub fn override_ttl(&self) -> Duration {
        Duration::from_secs(self.override_ttl_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cost_floor: Decimal::new(20, 2),     // $0.20 per 1M GP
            profit_margin: Decimal::new(5, 2),   // 5%
            discount_rate: Decimal::new(85, 2),  // 15% below median
            change_threshold: Decimal::new(2, 0), // 2%
            cache_ttl_secs: 3600,
            sample_timeout_secs: 30,
            override_ttl_secs: 3600,
            update_interval_secs: 900, // 15 minutes
            allow_override_below_floor: false,
        }
    }
}

/// Competitors tracked when no sources file is configured
pub fn default_sources() -> Vec<SourceConfig> {
    let html = |name: &str, url: &str, class: &str, enabled: bool| SourceConfig {
        name: name.to_string(),
        url: url.to_string(),
        enabled,
        format: PriceFormat::HtmlClass {
            class: class.to_string(),
        },
    };

    vec![
        html("PlayerAuctions", "https://www.playerauctions.com/osrs-gold/", "price-value", true),
        // Requires login
        html("Sythe", "https://www.sythe.org/forums/old-school-runescape-gold/", "price", false),
        html("OSRS Exchange", "https://osrs.exchange/", "gold-price", true),
        html("Eldorado", "https://www.eldorado.gg/old-school-runescape/gold", "price-amount", true),
        html("RPGStash", "https://www.rpgstash.com/runescape-2007-gold.html", "product-price", true),
    ]
}

/// Parse a TOML document with a `[[sources]]` array
pub fn parse_sources(contents: &str) -> Result<Vec<SourceConfig>, String> {
    let file: SourcesFile =
        toml::from_str(contents).map_err(|e| format!("Invalid sources file: {}", e))?;

    let mut seen = std::collections::HashSet::new();
    for source in &file.sources {
        if source.name.trim().is_empty() {
            return Err("Source name must not be empty".to_string());
        }
        if !seen.insert(source.name.as_str()) {
            return Err(format!("Duplicate source name: {}", source.name));
        }
    }

    Ok(file.sources)
}

/// Load sources from `PRICE_SOURCES_FILE`, falling back to the built-in list
pub fn load_sources() -> Result<Vec<SourceConfig>, String> {
    match env::var("PRICE_SOURCES_FILE") {
        Ok(path) => {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| format!("Cannot read PRICE_SOURCES_FILE {}: {}", path, e))?;
            parse_sources(&contents)
        }
        Err(_) => Ok(default_sources()),
    }
}

impl AppConfig {
    /// Create application config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let database = DatabaseConfig::from_env()?;
        let pricing = PricingConfig::from_env()?;
        let sources = load_sources()?;

        let discord_webhook_url = env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let log_level = env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        let http_port = env::var("HTTP_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok());

        let environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string());

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL: {}. Must be one of: {:?}",
                log_level, valid_log_levels
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&environment.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT: {}. Must be one of: {:?}",
                environment, valid_environments
            ));
        }

        Ok(Self {
            database,
            pricing,
            sources,
            discord_webhook_url,
            log_level: log_level.to_lowercase(),
            http_port,
            environment: environment.to_lowercase(),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Sources that will actually be sampled
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            pricing: PricingConfig::default(),
            sources: default_sources(),
            discord_webhook_url: None,
            log_level: "info".to_string(),
            http_port: None,
            environment: "development".to_string(),
        }
    }
}
