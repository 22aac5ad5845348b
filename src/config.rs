use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the reservation backend, without a trailing slash.
    pub api_url: String,
    /// Bearer token sent with every backend request.
    pub api_token: Option<String>,
    pub http_timeout: Duration,
    pub journal_path: PathBuf,
    /// Prometheus exporter port; `None` leaves metrics disabled.
    pub metrics_port: Option<u16>,
    pub currency: String,
    /// Journal appends before the sweeper compacts it.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let api_url = lookup("FRONTDESK_API_URL")
            .unwrap_or_else(|| "http://localhost:8000/api".into())
            .trim_end_matches('/')
            .to_string();

        Self {
            api_url,
            api_token: lookup("FRONTDESK_API_TOKEN").filter(|t| !t.is_empty()),
            http_timeout: Duration::from_secs(parsed(&lookup, "FRONTDESK_HTTP_TIMEOUT_SECS").unwrap_or(10)),
            journal_path: lookup("FRONTDESK_JOURNAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/reconciliation.journal")),
            metrics_port: parsed(&lookup, "FRONTDESK_METRICS_PORT"),
            currency: lookup("FRONTDESK_CURRENCY")
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "USD".into()),
            compact_threshold: parsed(&lookup, "FRONTDESK_COMPACT_THRESHOLD").unwrap_or(1000),
            sweep_interval: Duration::from_secs(
                parsed(&lookup, "FRONTDESK_SWEEP_INTERVAL_SECS")
                    .filter(|s: &u64| *s > 0)
                    .unwrap_or(60),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.api_url, "http://localhost:8000/api");
        assert_eq!(c.api_token, None);
        assert_eq!(c.http_timeout, Duration::from_secs(10));
        assert_eq!(c.journal_path, PathBuf::from("./data/reconciliation.journal"));
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.currency, "USD");
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("FRONTDESK_API_URL", "https://hotel.example/api/"),
            ("FRONTDESK_API_TOKEN", "secret"),
            ("FRONTDESK_HTTP_TIMEOUT_SECS", "3"),
            ("FRONTDESK_METRICS_PORT", "9100"),
            ("FRONTDESK_CURRENCY", "eur"),
            ("FRONTDESK_COMPACT_THRESHOLD", "50"),
        ]);
        assert_eq!(c.api_url, "https://hotel.example/api");
        assert_eq!(c.api_token.as_deref(), Some("secret"));
        assert_eq!(c.http_timeout, Duration::from_secs(3));
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.currency, "EUR");
        assert_eq!(c.compact_threshold, 50);
    }

    #[test]
    fn garbage_falls_back() {
        let c = config(&[
            ("FRONTDESK_METRICS_PORT", "not-a-port"),
            ("FRONTDESK_COMPACT_THRESHOLD", "-1"),
            ("FRONTDESK_SWEEP_INTERVAL_SECS", "0"),
            ("FRONTDESK_API_TOKEN", ""),
        ]);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.sweep_interval, Duration::from_secs(60));
        assert_eq!(c.api_token, None);
    }
}
