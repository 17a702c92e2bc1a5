//! Operator configuration
//!
//! Command-line flags with environment fallbacks, parsed once at startup into
//! an [`OperatorConfig`].

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use regex::Regex;

use crate::error::{Error, Result};

const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(300);
const DEFAULT_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Namespace the operator runs in; holds the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    pub namespace: String,

    /// Cluster domain suffix appended to in-cluster service hostnames
    #[arg(long, env = "KUBERNETES_INTERNAL_DOMAIN", default_value = "")]
    pub cluster_domain: String,

    /// Resync period for every topology object, e.g. 30s, 10m, 1h30m
    #[arg(long, env = "SYNC_PERIOD")]
    pub sync_period: Option<String>,

    /// Serve the admission webhooks
    #[arg(long, env = "ENABLE_WEBHOOKS", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_webhooks: bool,

    /// Directory holding tls.crt and tls.key for the webhook server
    #[arg(long, env = "WEBHOOK_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
    pub webhook_cert_dir: PathBuf,

    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 9443)]
    pub webhook_port: u16,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Concurrent reconciles per controller
    #[arg(long, env = "WORKERS", default_value_t = 4)]
    pub workers: u16,

    /// Only the lease holder mutates the broker
    #[arg(long, env = "LEADER_ELECTION", default_value_t = true, action = clap::ArgAction::Set)]
    pub leader_election: bool,

    /// Log as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub namespace: String,
    pub cluster_domain: String,
    pub sync_period: Duration,
    pub enable_webhooks: bool,
    pub webhook_cert_dir: PathBuf,
    pub webhook_port: u16,
    pub metrics_port: u16,
    pub workers: u16,
    pub leader_election: bool,
    pub log_json: bool,
}

impl TryFrom<Args> for OperatorConfig {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self> {
        if args.namespace.trim().is_empty() {
            return Err(Error::ConfigError(
                "OPERATOR_NAMESPACE must not be empty".to_string(),
            ));
        }
        let sync_period = match args.sync_period.as_deref() {
            None | Some("") => DEFAULT_SYNC_PERIOD,
            Some(raw) => parse_go_duration(raw)?,
        };
        if args.workers == 0 {
            return Err(Error::ConfigError("--workers must be at least 1".to_string()));
        }

        Ok(Self {
            namespace: args.namespace,
            cluster_domain: sanitize_domain(&args.cluster_domain),
            sync_period,
            enable_webhooks: args.enable_webhooks,
            webhook_cert_dir: args.webhook_cert_dir,
            webhook_port: args.webhook_port,
            metrics_port: args.metrics_port,
            workers: args.workers,
            leader_election: args.leader_election,
            log_json: args.log_json,
        })
    }
}

const DOMAIN_PATTERN: &str = r"^\.?[a-z]([-a-z0-9]*[a-z0-9])?(\.[a-z]([-a-z0-9]*[a-z0-9])?)*$";

/// Normalise a cluster domain to `.cluster.local` form.
///
/// Invalid values are dropped with a warning and yield no suffix at all.
pub fn sanitize_domain(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let valid = Regex::new(DOMAIN_PATTERN).is_ok_and(|pattern| pattern.is_match(raw));
    if !valid {
        tracing::warn!(
            "Ignoring invalid KUBERNETES_INTERNAL_DOMAIN '{}', using no domain suffix",
            raw
        );
        return String::new();
    }
    if raw.starts_with('.') {
        raw.to_string()
    } else {
        format!(".{raw}")
    }
}

/// Parse durations such as `90s`, `10m` or `1h30m`.
pub fn parse_go_duration(raw: &str) -> Result<Duration> {
    let invalid = || Error::ConfigError(format!("invalid duration '{raw}'"));
    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = raw.trim().chars().peekable();
    let mut parsed_any = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let unit = match (c, chars.peek()) {
            ('m', Some(&'s')) => {
                chars.next();
                "ms"
            }
            ('h', _) => "h",
            ('m', _) => "m",
            ('s', _) => "s",
            _ => return Err(invalid()),
        };
        let value: f64 = number.parse().map_err(|_| invalid())?;
        number.clear();
        let seconds = match unit {
            "h" => value * 3600.0,
            "m" => value * 60.0,
            "s" => value,
            _ => value / 1000.0,
        };
        total += Duration::from_secs_f64(seconds);
        parsed_any = true;
    }

    if !number.is_empty() || !parsed_any {
        return Err(invalid());
    }
    Ok(total)
}
