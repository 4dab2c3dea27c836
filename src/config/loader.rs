//! Configuration loading from disk and environment.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::{DiscoveryMode, NurseConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },

    #[error("malformed extra check {0:?}, expected name:url")]
    ExtraCheck(String),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load the optional TOML file, apply environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<NurseConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => NurseConfig::default(),
    };

    let config = apply_env(config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment variables on `config`. `lookup` returns the value of
/// a variable if set.
pub fn apply_env<F>(mut config: NurseConfig, lookup: F) -> Result<NurseConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(&lookup);

    // server
    env.string("NETNURSE_HTTP_BIND", &mut config.server.http_bind_address);
    env.string("NETNURSE_HTTPS_BIND", &mut config.server.https_bind_address);
    env.flag("NETNURSE_USE_TLS", &mut config.server.use_tls);
    env.path("NETNURSE_CERT_FILE", &mut config.server.cert_path);
    env.path("NETNURSE_CERT_KEY", &mut config.server.key_path);
    if let Some(delay) = env.duration("NETNURSE_SHUTDOWN_DURATION")? {
        config.server.shutdown_delay_secs = delay.as_secs();
    }

    // checks
    if let Some(interval) = env.duration("NETNURSE_CHECK_INTERVAL")? {
        config.checks.interval_ms = millis(interval);
    }
    if let Some(timeout) = env.duration("NETNURSE_REQUEST_TIMEOUT")? {
        config.checks.request_timeout_ms = millis(timeout);
    }
    env.string("KUBERNETES_SERVICE_HOST", &mut config.checks.api_server_host);
    env.parse("KUBERNETES_SERVICE_PORT", &mut config.checks.api_server_port)?;
    env.string("NETNURSE_API_SERVER_DNS_NAME", &mut config.checks.api_server_dns_name);
    env.string("NETNURSE_INGRESS_URL", &mut config.checks.ingress_url);
    env.string("NETNURSE_SERVICE_URL", &mut config.checks.service_url);
    env.disabled("NETNURSE_CHECK_API_SERVER_DIRECT", &mut config.checks.skip_api_server_direct);
    env.disabled("NETNURSE_CHECK_API_SERVER_DNS", &mut config.checks.skip_api_server_dns);
    env.disabled("NETNURSE_CHECK_ME_INGRESS", &mut config.checks.skip_me_ingress);
    env.disabled("NETNURSE_CHECK_ME_SERVICE", &mut config.checks.skip_me_service);
    env.disabled("NETNURSE_CHECK_NEIGHBOURHOOD", &mut config.checks.skip_neighbourhood);
    if let Some(raw) = lookup("NETNURSE_EXTRA_CHECKS") {
        config.checks.extra_checks.extend(parse_extra_checks(&raw)?);
    }
    env.parse("NETNURSE_MAX_CONCURRENT_PROBES", &mut config.checks.max_concurrent_probes)?;

    // neighbourhood
    env.string("NETNURSE_NAMESPACE", &mut config.neighbourhood.namespace);
    env.string("NETNURSE_NEIGHBOUR_FILTER", &mut config.neighbourhood.label_selector);
    env.parse("NETNURSE_NEIGHBOUR_LIMIT", &mut config.neighbourhood.neighbour_limit)?;
    env.flag("NETNURSE_ALLOW_UNSCHEDULABLE", &mut config.neighbourhood.allow_unschedulable);
    if let Some(ttl) = env.duration("NETNURSE_INCOMING_TTL")? {
        config.neighbourhood.incoming_ttl_secs = ttl.as_secs();
    }
    env.string("NETNURSE_POD_NAME", &mut config.neighbourhood.pod_name);
    if config.neighbourhood.pod_name.is_empty() {
        env.string("HOSTNAME", &mut config.neighbourhood.pod_name);
    }

    // tls
    env.path("NETNURSE_EXTRA_CA", &mut config.tls.extra_ca_path);
    env.flag("NETNURSE_INSECURE", &mut config.tls.insecure);

    // discovery
    if let Some(mode) = lookup("NETNURSE_DISCOVERY") {
        config.discovery.mode = match mode.as_str() {
            "kubernetes" => DiscoveryMode::Kubernetes,
            "static" => DiscoveryMode::Static,
            other => {
                return Err(ConfigError::Env {
                    var: "NETNURSE_DISCOVERY",
                    message: format!("unknown mode {other:?}"),
                })
            }
        };
    }

    // observability
    env.string("NETNURSE_LOG_LEVEL", &mut config.observability.log_level);
    if let Some(buckets) = lookup("NETNURSE_HISTOGRAM_BUCKETS") {
        config.observability.histogram_buckets = parse_buckets(&buckets)?;
    }

    Ok(config)
}

/// Parse `name:url|name:url`. Empty segments are ignored.
pub fn parse_extra_checks(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut checks = BTreeMap::new();
    for entry in raw.split('|').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::ExtraCheck(entry.to_string()))?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::ExtraCheck(entry.to_string()));
        }
        checks.insert(name.to_string(), url.to_string());
    }
    Ok(checks)
}

/// Parse `500ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        "h" => Some(Duration::from_secs(amount * 3600)),
        _ => None,
    }
}

fn parse_buckets(value: &str) -> Result<Vec<f64>, ConfigError> {
    value
        .split(',')
        .map(|b| {
            b.trim().parse::<f64>().map_err(|e| ConfigError::Env {
                var: "NETNURSE_HISTOGRAM_BUCKETS",
                message: format!("{b:?}: {e}"),
            })
        })
        .collect()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, var: &str, target: &mut String) {
        if let Some(value) = (self.0)(var) {
            *target = value;
        }
    }

    fn path(&self, var: &str, target: &mut Option<PathBuf>) {
        if let Some(value) = (self.0)(var).filter(|v| !v.is_empty()) {
            *target = Some(PathBuf::from(value));
        }
    }

    /// Set when the variable equals `true`.
    fn flag(&self, var: &str, target: &mut bool) {
        if let Some(value) = (self.0)(var) {
            *target = value == "true";
        }
    }

    /// `NETNURSE_CHECK_*=false` turns the corresponding skip flag on.
    fn disabled(&self, var: &str, skip: &mut bool) {
        if let Some(value) = (self.0)(var) {
            *skip = value == "false";
        }
    }

    fn parse<T>(&self, var: &'static str, target: &mut T) -> Result<(), ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = (self.0)(var) {
            *target = value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
                var,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn duration(&self, var: &'static str) -> Result<Option<Duration>, ConfigError> {
        match (self.0)(var) {
            None => Ok(None),
            Some(value) => parse_duration(&value)
                .map(Some)
                .ok_or_else(|| ConfigError::Env {
                    var,
                    message: format!("{value:?} is not a duration"),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_parse_extra_checks() {
        let checks = parse_extra_checks("google:https://google.com|local:http://10.0.0.1:8080/x").unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks["google"], "https://google.com");
        assert_eq!(checks["local"], "http://10.0.0.1:8080/x");

        assert!(parse_extra_checks("").unwrap().is_empty());
        assert!(matches!(parse_extra_checks("no-url"), Err(ConfigError::ExtraCheck(_))));
        assert!(matches!(parse_extra_checks(":http://x"), Err(ConfigError::ExtraCheck(_))));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("5 days"), None);
        assert_eq!(parse_duration("s"), None);
    }

    #[test]
    fn test_env_overrides() {
        let config = apply_env(
            NurseConfig::default(),
            env(&[
                ("KUBERNETES_SERVICE_HOST", "10.96.0.1"),
                ("KUBERNETES_SERVICE_PORT", "6443"),
                ("NETNURSE_CHECK_INTERVAL", "10s"),
                ("NETNURSE_CHECK_ME_INGRESS", "false"),
                ("NETNURSE_CHECK_ME_SERVICE", "true"),
                ("NETNURSE_NEIGHBOUR_LIMIT", "3"),
                ("NETNURSE_EXTRA_CHECKS", "dns:https://1.1.1.1"),
                ("NETNURSE_DISCOVERY", "static"),
                ("NETNURSE_HISTOGRAM_BUCKETS", "0.1,1,10"),
                ("HOSTNAME", "nurse-abc"),
            ]),
        )
        .unwrap();

        assert_eq!(config.checks.api_server_host, "10.96.0.1");
        assert_eq!(config.checks.api_server_port, 6443);
        assert_eq!(config.checks.interval_ms, 10_000);
        assert!(config.checks.skip_me_ingress);
        assert!(!config.checks.skip_me_service);
        assert_eq!(config.neighbourhood.neighbour_limit, 3);
        assert_eq!(config.checks.extra_checks["dns"], "https://1.1.1.1");
        assert_eq!(config.discovery.mode, DiscoveryMode::Static);
        assert_eq!(config.observability.histogram_buckets, vec![0.1, 1.0, 10.0]);
        assert_eq!(config.neighbourhood.pod_name, "nurse-abc");
    }

    #[test]
    fn test_pod_name_wins_over_hostname() {
        let config = apply_env(
            NurseConfig::default(),
            env(&[("NETNURSE_POD_NAME", "nurse-1"), ("HOSTNAME", "other")]),
        )
        .unwrap();
        assert_eq!(config.neighbourhood.pod_name, "nurse-1");
    }

    #[test]
    fn test_bad_env_values() {
        let err = apply_env(NurseConfig::default(), env(&[("NETNURSE_NEIGHBOUR_LIMIT", "ten")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "NETNURSE_NEIGHBOUR_LIMIT", .. }));

        let err = apply_env(NurseConfig::default(), env(&[("NETNURSE_CHECK_INTERVAL", "soon")])).unwrap_err();
        assert!(err.to_string().contains("NETNURSE_CHECK_INTERVAL"));
    }

    #[test]
    fn test_toml_file() {
        let dir = std::env::temp_dir().join(format!("netnurse-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("netnurse.toml");
        fs::write(
            &path,
            r#"
[checks]
interval_ms = 2000
skip_neighbourhood = true

[checks.extra_checks]
example = "https://example.com"

[discovery]
mode = "static"
candidates = [{ pod_name = "a", pod_ip = "10.0.0.1", node_name = "n1" }]
"#,
        )
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let config: NurseConfig = toml::from_str(&content).unwrap();
        assert_eq!(config.checks.interval_ms, 2000);
        assert!(config.checks.skip_neighbourhood);
        assert_eq!(config.checks.extra_checks.len(), 1);
        assert_eq!(config.discovery.candidates.len(), 1);
        assert_eq!(config.server.http_bind_address, "0.0.0.0:8080");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/netnurse.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
