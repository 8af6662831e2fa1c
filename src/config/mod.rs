// src/config/mod.rs
//
// CLI flags for the proxy daemon: --port, --backends, --weights,
// --cookie-domain, --soft-sticky, --hard-sticky.
use crate::state::Backend;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;

#[derive(Parser, Debug)]
#[command(name = "exproxyment", about = "Version-aware reverse HTTP proxy")]
pub struct CliArgs {
    #[arg(long, default_value_t = 7000)]
    pub port: u16,

    /// Comma-separated host:port,host:port
    #[arg(long, default_value = "")]
    pub backends: String,

    /// Comma-separated version:weight,version:weight
    #[arg(long, default_value = "")]
    pub weights: String,

    #[arg(long)]
    pub cookie_domain: Option<String>,

    #[arg(long, default_value_t = true)]
    pub soft_sticky: bool,

    #[arg(long, default_value_t = false)]
    pub hard_sticky: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backends: Vec<Backend>,
    pub weights: HashMap<String, u64>,
    pub cookie_domain: Option<String>,
    pub soft_sticky: bool,
    pub hard_sticky: bool,
}

impl Config {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let backends = parse_backends(&args.backends)
            .context("failed to parse --backends")?;
        let weights = parse_weights(&args.weights)
            .context("failed to parse --weights")?;

        let config = Self {
            port: args.port,
            backends,
            weights,
            cookie_domain: args.cookie_domain,
            soft_sticky: args.soft_sticky,
            hard_sticky: args.hard_sticky,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.soft_sticky && self.hard_sticky {
            bail!("can't be both soft_sticky and hard_sticky");
        }
        Ok(())
    }
}

fn parse_backends(raw: &str) -> Result<Vec<Backend>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    raw.split(',')
        .map(|entry| {
            let (host, port) = entry
                .split_once(':')
                .with_context(|| format!("backend entry missing ':': {entry}"))?;
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid port in backend entry: {entry}"))?;
            Ok(Backend::new(host, port))
        })
        .collect()
}

fn parse_weights(raw: &str) -> Result<HashMap<String, u64>> {
    if raw.is_empty() {
        return Ok(HashMap::new());
    }

    raw.split(',')
        .map(|entry| {
            let (version, weight) = entry
                .split_once(':')
                .with_context(|| format!("weight entry missing ':': {entry}"))?;
            let weight: u64 = weight
                .parse()
                .with_context(|| format!("invalid weight in entry: {entry}"))?;
            Ok((version.to_string(), weight))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sticky_modes_is_a_validation_error() {
        let config = Config {
            port: 7000,
            backends: vec![],
            weights: HashMap::new(),
            cookie_domain: None,
            soft_sticky: true,
            hard_sticky: true,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_backend_list() {
        let backends = parse_backends("h1:9001,h2:9002").unwrap();
        assert_eq!(backends, vec![Backend::new("h1", 9001), Backend::new("h2", 9002)]);
    }

    #[test]
    fn parses_weight_list() {
        let weights = parse_weights("1:1,2:9").unwrap();
        assert_eq!(weights.get("1"), Some(&1));
        assert_eq!(weights.get("2"), Some(&9));
    }

    #[test]
    fn empty_backends_and_weights_are_fine() {
        assert_eq!(parse_backends("").unwrap(), Vec::new());
        assert_eq!(parse_weights("").unwrap(), HashMap::new());
    }
}
