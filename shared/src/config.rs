//! Configuration management for the query Lambda.

use regex::Regex;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use crate::{Error, Result};

const DEFAULT_RISK_TABLE: &str = "athena_catalog.athena_schema.gold_country_risk_serving";
const DEFAULT_HOTSPOT_TABLE: &str = "athena_catalog.athena_schema.gold_ssd_county_hotspots";
const DEFAULT_RESOURCE_TABLE: &str = "athena_catalog.athena_schema.gold_ssd_county_resources";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_ROW_LIMIT: usize = 20;
const MAX_ROW_LIMIT: usize = 200;
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const MIN_TIMEOUT_SECS: u64 = 8;
const MAX_TIMEOUT_SECS: u64 = 60;
/// Databricks accepts statement wait timeouts between 5 and 50 seconds.
const MIN_STATEMENT_WAIT_SECS: u64 = 5;
const MAX_STATEMENT_WAIT_SECS: u64 = 50;
/// Head start the server-side cancel gets over the HTTP timeout.
const STATEMENT_WAIT_MARGIN_SECS: u64 = 3;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Warehouse connection, absent when not configured
    pub warehouse: Option<WarehouseConfig>,
    /// Generative service, absent when no API key is set
    pub generative: Option<GenerativeConfig>,
    /// Tables the SQL templates read from
    pub tables: Tables,
    /// Row limit applied to every template
    pub row_limit: usize,
    /// Whether to ask the generative service to classify questions
    pub intent_assist_enabled: bool,
    /// Per-call timeout for outbound HTTP
    pub outbound_timeout: Duration,
}

/// Databricks SQL warehouse settings.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Workspace base URL, without trailing slash
    pub host: String,
    /// SQL warehouse id
    pub warehouse_id: String,
    /// Bearer token given directly
    pub token: Option<String>,
    /// Secrets Manager ARN holding the token
    pub token_secret_arn: Option<String>,
    /// Server-side wait before the statement is cancelled; always shorter
    /// than the outbound HTTP timeout
    pub statement_wait: Duration,
}

/// Generative text service settings.
#[derive(Debug, Clone)]
pub struct GenerativeConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
}

/// Fully qualified table identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct Tables {
    pub risk: String,
    pub regional_hotspots: String,
    pub regional_resources: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            risk: DEFAULT_RISK_TABLE.to_string(),
            regional_hotspots: DEFAULT_HOTSPOT_TABLE.to_string(),
            regional_resources: DEFAULT_RESOURCE_TABLE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Blank values count as unset. Absent services are not errors; malformed
    /// values are.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let timeout_secs = match get("OUTBOUND_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    Error::Config(format!("OUTBOUND_TIMEOUT_SECS is not a number: {}", raw))
                })?;
                if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) {
                    return Err(Error::Config(format!(
                        "OUTBOUND_TIMEOUT_SECS must be between {} and {}",
                        MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
                    )));
                }
                secs
            }
            None => DEFAULT_TIMEOUT_SECS,
        };
        let outbound_timeout = Duration::from_secs(timeout_secs);

        let warehouse = match (get("DATABRICKS_HOST"), get("DATABRICKS_WAREHOUSE_ID")) {
            (Some(host), Some(warehouse_id)) => Some(WarehouseConfig {
                host: normalize_host(&host),
                warehouse_id,
                token: get("DATABRICKS_TOKEN"),
                token_secret_arn: get("DATABRICKS_TOKEN_SECRET_ARN"),
                statement_wait: statement_wait(outbound_timeout),
            }),
            _ => None,
        };

        let generative = get("GEMINI_API_KEY").map(|api_key| GenerativeConfig {
            api_key,
            model: get("GENERATIVE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: get("GENERATIVE_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        });

        let defaults = Tables::default();
        let tables = Tables {
            risk: table_name(get("RISK_TABLE"), defaults.risk)?,
            regional_hotspots: table_name(get("REGIONAL_HOTSPOT_TABLE"), defaults.regional_hotspots)?,
            regional_resources: table_name(
                get("REGIONAL_RESOURCE_TABLE"),
                defaults.regional_resources,
            )?,
        };

        let row_limit = match get("QUERY_ROW_LIMIT") {
            Some(raw) => {
                let limit: usize = raw
                    .parse()
                    .map_err(|_| Error::Config(format!("QUERY_ROW_LIMIT is not a number: {}", raw)))?;
                if limit == 0 || limit > MAX_ROW_LIMIT {
                    return Err(Error::Config(format!(
                        "QUERY_ROW_LIMIT must be between 1 and {}",
                        MAX_ROW_LIMIT
                    )));
                }
                limit
            }
            None => DEFAULT_ROW_LIMIT,
        };

        let intent_assist_enabled = get("INTENT_ASSIST_ENABLED")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Ok(Self {
            warehouse,
            generative,
            tables,
            row_limit,
            intent_assist_enabled,
            outbound_timeout,
        })
    }
}

/// Statement wait for a given HTTP timeout, kept inside the range the
/// warehouse accepts.
pub fn statement_wait(outbound_timeout: Duration) -> Duration {
    let secs = outbound_timeout
        .as_secs()
        .saturating_sub(STATEMENT_WAIT_MARGIN_SECS)
        .clamp(MIN_STATEMENT_WAIT_SECS, MAX_STATEMENT_WAIT_SECS);
    Duration::from_secs(secs)
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+){0,2}$").expect("valid table pattern")
    })
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn table_name(value: Option<String>, default: String) -> Result<String> {
    let name = value.unwrap_or(default);
    if table_pattern().is_match(&name) {
        Ok(name)
    } else {
        Err(Error::Config(format!("Invalid table identifier: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_leave_services_unconfigured() {
        let config = load(&[]).unwrap();
        assert!(config.warehouse.is_none());
        assert!(config.generative.is_none());
        assert_eq!(config.tables, Tables::default());
        assert_eq!(config.row_limit, 20);
        assert!(!config.intent_assist_enabled);
        assert_eq!(config.outbound_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_blank_key_means_no_generative_service() {
        let config = load(&[("GEMINI_API_KEY", "   ")]).unwrap();
        assert!(config.generative.is_none());
    }

    #[test]
    fn test_full_configuration() {
        let config = load(&[
            ("DATABRICKS_HOST", "adb-123.azuredatabricks.net/"),
            ("DATABRICKS_WAREHOUSE_ID", "wh-1"),
            ("DATABRICKS_TOKEN", "dapi-token"),
            ("GEMINI_API_KEY", "key"),
            ("GENERATIVE_MODEL", "gemini-1.5-pro"),
            ("INTENT_ASSIST_ENABLED", "TRUE"),
            ("QUERY_ROW_LIMIT", "50"),
            ("RISK_TABLE", "main.gold.risk"),
        ])
        .unwrap();

        let warehouse = config.warehouse.unwrap();
        assert_eq!(warehouse.host, "https://adb-123.azuredatabricks.net");
        assert_eq!(warehouse.token.as_deref(), Some("dapi-token"));
        let generative = config.generative.unwrap();
        assert_eq!(generative.model, "gemini-1.5-pro");
        assert_eq!(generative.api_base, DEFAULT_API_BASE);
        assert!(config.intent_assist_enabled);
        assert_eq!(config.row_limit, 50);
        assert_eq!(config.tables.risk, "main.gold.risk");
    }

    #[test]
    fn test_rejects_injected_table_name() {
        let err = load(&[("RISK_TABLE", "risk; DROP TABLE x")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_statement_wait_stays_below_http_timeout() {
        for secs in MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS {
            let outbound = Duration::from_secs(secs);
            let wait = statement_wait(outbound);
            assert!(wait < outbound, "wait {:?} for timeout {:?}", wait, outbound);
            assert!((5..=50).contains(&wait.as_secs()));
        }

        let config = load(&[
            ("DATABRICKS_HOST", "adb-1.net"),
            ("DATABRICKS_WAREHOUSE_ID", "wh"),
        ])
        .unwrap();
        assert_eq!(config.warehouse.unwrap().statement_wait, Duration::from_secs(17));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        assert!(load(&[("OUTBOUND_TIMEOUT_SECS", "3")]).is_err());
        assert!(load(&[("OUTBOUND_TIMEOUT_SECS", "120")]).is_err());
        assert!(load(&[("OUTBOUND_TIMEOUT_SECS", "soon")]).is_err());
        let config = load(&[("OUTBOUND_TIMEOUT_SECS", "30")]).unwrap();
        assert_eq!(config.outbound_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_out_of_range_limit() {
        assert!(load(&[("QUERY_ROW_LIMIT", "0")]).is_err());
        assert!(load(&[("QUERY_ROW_LIMIT", "many")]).is_err());
    }
}
