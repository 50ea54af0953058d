//! Runtime configuration, read once from `BILLBOARD_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::{MAX_ALERT_DAYS, MAX_SLOTS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings that shape ledger behaviour, separate from the listener setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Days before expiry at which a booking turns "Expiring Soon".
    pub alert_days: u32,
    /// Keep state in the data directory; off means a volatile memory store.
    pub persist: bool,
    /// Flush after every mutating command.
    pub auto_save: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alert_days: 7,
            persist: true,
            auto_save: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Slot capacity override; `None` keeps whatever the store says.
    pub slots: Option<u32>,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset or empty variables take their
    /// default; set but malformed ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let port = parse_or(&get, "BILLBOARD_PORT", 5433)?;
        let max_connections: usize = parse_or(&get, "BILLBOARD_MAX_CONNECTIONS", 8)?;
        if max_connections == 0 {
            return Err(invalid("BILLBOARD_MAX_CONNECTIONS", "0", "must be at least 1"));
        }
        let metrics_port = parse_opt(&get, "BILLBOARD_METRICS_PORT")?;

        let slots: Option<u32> = parse_opt(&get, "BILLBOARD_SLOTS")?;
        if let Some(n) = slots
            && (n == 0 || n > MAX_SLOTS)
        {
            return Err(invalid(
                "BILLBOARD_SLOTS",
                &n.to_string(),
                format!("must be within 1..={MAX_SLOTS}"),
            ));
        }

        let alert_days: u32 = parse_or(&get, "BILLBOARD_ALERT_DAYS", 7)?;
        if alert_days > MAX_ALERT_DAYS {
            return Err(invalid(
                "BILLBOARD_ALERT_DAYS",
                &alert_days.to_string(),
                format!("must be within 0..={MAX_ALERT_DAYS}"),
            ));
        }

        let tls_cert = get("BILLBOARD_TLS_CERT");
        let tls_key = get("BILLBOARD_TLS_KEY");

        Ok(Self {
            port,
            bind: get("BILLBOARD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("BILLBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: get("BILLBOARD_PASSWORD").unwrap_or_else(|| "billboard".into()),
            max_connections,
            metrics_port,
            tls_cert,
            tls_key,
            slots,
            settings: Settings {
                alert_days,
                persist: parse_bool_or(&get, "BILLBOARD_PERSIST", true)?,
                auto_save: parse_bool_or(&get, "BILLBOARD_AUTO_SAVE", true)?,
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match get(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    Ok(parse_opt(get, var)?.unwrap_or(default))
}

fn parse_bool_or(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = get(var) else { return Ok(default) };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, &raw, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.addr(), "0.0.0.0:5433");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.password, "billboard");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.slots, None);
        assert_eq!(cfg.settings, Settings::default());
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("BILLBOARD_PORT", "6000"),
            ("BILLBOARD_SLOTS", "80"),
            ("BILLBOARD_ALERT_DAYS", "0"),
            ("BILLBOARD_PERSIST", "off"),
            ("BILLBOARD_AUTO_SAVE", "False"),
            ("BILLBOARD_METRICS_PORT", "9000"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.slots, Some(80));
        assert_eq!(cfg.metrics_port, Some(9000));
        assert_eq!(
            cfg.settings,
            Settings {
                alert_days: 0,
                persist: false,
                auto_save: false,
            }
        );
    }

    #[test]
    fn empty_value_means_default() {
        let cfg = config(&[("BILLBOARD_PORT", "  ")]).unwrap();
        assert_eq!(cfg.port, 5433);
    }

    #[test]
    fn malformed_values_are_errors() {
        for (var, value) in [
            ("BILLBOARD_PORT", "http"),
            ("BILLBOARD_ALERT_DAYS", "366"),
            ("BILLBOARD_ALERT_DAYS", "-1"),
            ("BILLBOARD_SLOTS", "0"),
            ("BILLBOARD_MAX_CONNECTIONS", "0"),
            ("BILLBOARD_PERSIST", "maybe"),
        ] {
            let err = config(&[(var, value)]).unwrap_err();
            let ConfigError::Invalid { var: got, .. } = err;
            assert_eq!(got, var);
        }
    }
}
