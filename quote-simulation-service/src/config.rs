use anyhow::{Context, bail};
use quote_flow::{FlowConfig, QueryConfig, SimulatorConfig};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SIMULATION_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationProfile {
    /// Production-like error rates, latency and backoff.
    Realistic,
    /// No injected failures, no waits, fixed seed.
    Deterministic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub port: u16,
    pub log_format: LogFormat,
    pub profile: SimulationProfile,
    pub seed: Option<u64>,
    /// Simulations idle for longer than this are dropped.
    pub simulation_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            log_format: LogFormat::Json,
            profile: SimulationProfile::Realistic,
            seed: None,
            simulation_ttl: DEFAULT_SIMULATION_TTL,
        }
    }
}

impl ServiceConfig {
    pub fn deterministic() -> Self {
        Self {
            profile: SimulationProfile::Deterministic,
            ..Self::default()
        }
    }

    /// Reads `PORT`, `LOG_FORMAT`, `SIMULATION_PROFILE`, `SIMULATION_SEED` and
    /// `SIMULATION_TTL_SECS`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got '{raw}'"))?,
            None => DEFAULT_PORT,
        };

        // anything but "pretty" logs JSON
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        let profile = match lookup("SIMULATION_PROFILE").as_deref() {
            None | Some("realistic") => SimulationProfile::Realistic,
            Some("deterministic") => SimulationProfile::Deterministic,
            Some(other) => bail!(
                "SIMULATION_PROFILE must be 'realistic' or 'deterministic', got '{other}'"
            ),
        };

        let seed = lookup("SIMULATION_SEED")
            .map(|raw| {
                raw.parse::<u64>()
                    .with_context(|| format!("SIMULATION_SEED must be an integer, got '{raw}'"))
            })
            .transpose()?;

        let simulation_ttl = match lookup("SIMULATION_TTL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("SIMULATION_TTL_SECS must be seconds, got '{raw}'"))?,
            None => DEFAULT_SIMULATION_TTL,
        };

        Ok(Self {
            port,
            log_format,
            profile,
            seed,
            simulation_ttl,
        })
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        let config = match self.profile {
            SimulationProfile::Realistic => SimulatorConfig::default(),
            SimulationProfile::Deterministic => SimulatorConfig::deterministic(),
        };
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }

    pub fn query_config(&self) -> QueryConfig {
        match self.profile {
            SimulationProfile::Realistic => QueryConfig::default(),
            SimulationProfile::Deterministic => QueryConfig::immediate(),
        }
    }

    pub fn flow_config(&self) -> FlowConfig {
        match self.profile {
            SimulationProfile::Realistic => FlowConfig::default(),
            SimulationProfile::Deterministic => FlowConfig::immediate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_deterministic_profile_with_seed() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "pretty"),
            ("SIMULATION_PROFILE", "deterministic"),
            ("SIMULATION_SEED", "7"),
            ("SIMULATION_TTL_SECS", "90"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.simulation_ttl, Duration::from_secs(90));
        assert_eq!(config.log_format, LogFormat::Pretty);
        let simulator = config.simulator_config();
        assert_eq!(simulator.seed, Some(7));
        assert_eq!(simulator.error_rates, quote_flow::ErrorRates::none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ServiceConfig::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("SIMULATION_PROFILE", "chaos")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("SIMULATION_SEED", "-1")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("SIMULATION_TTL_SECS", "soon")])).is_err());
    }
}
