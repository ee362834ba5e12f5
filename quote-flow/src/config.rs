use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::{BackoffPolicy, duration_ms};
use crate::catalog::REFERENCE_VEHICLE_VALUE;

/// Independent failure probabilities, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRates {
    pub server_error: f64,
    pub rate_limit: f64,
    pub network_error: f64,
    pub timeout_error: f64,
    pub invalid_plate: f64,
}

impl ErrorRates {
    pub const fn none() -> Self {
        Self {
            server_error: 0.0,
            rate_limit: 0.0,
            network_error: 0.0,
            timeout_error: 0.0,
            invalid_plate: 0.0,
        }
    }
}

impl Default for ErrorRates {
    fn default() -> Self {
        Self {
            server_error: 0.02,
            rate_limit: 0.01,
            network_error: 0.05,
            timeout_error: 0.03,
            invalid_plate: 0.02,
        }
    }
}

/// Inclusive delay range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn zero() -> Self {
        Self::new(0, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyProfile {
    pub car_lookup: LatencyRange,
    /// Extra wait before serving the generic record for an unknown plate.
    pub fallback_extra: LatencyRange,
    pub insurance_offers: LatencyRange,
    pub offer_details: LatencyRange,
}

impl LatencyProfile {
    pub const fn instant() -> Self {
        Self {
            car_lookup: LatencyRange::zero(),
            fallback_extra: LatencyRange::zero(),
            insurance_offers: LatencyRange::zero(),
            offer_details: LatencyRange::zero(),
        }
    }
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            car_lookup: LatencyRange::new(800, 1500),
            fallback_extra: LatencyRange::new(300, 300),
            insurance_offers: LatencyRange::new(1500, 2500),
            offer_details: LatencyRange::new(300, 700),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub error_rates: ErrorRates,
    pub latency: LatencyProfile,
    /// Vehicle value priced at factor 1.0.
    pub reference_value: f64,
    /// Pins offer selection/order and failure draws when set.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    /// No failures, no latency, fixed seed.
    pub fn deterministic() -> Self {
        Self {
            error_rates: ErrorRates::none(),
            latency: LatencyProfile::instant(),
            reference_value: REFERENCE_VEHICLE_VALUE,
            seed: Some(42),
        }
    }

    pub fn with_error_rates(mut self, error_rates: ErrorRates) -> Self {
        self.error_rates = error_rates;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            error_rates: ErrorRates::default(),
            latency: LatencyProfile::default(),
            reference_value: REFERENCE_VEHICLE_VALUE,
            seed: None,
        }
    }
}

/// Cache and retry behaviour of one query namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Age after which cached data is refetched on the next read.
    #[serde(rename = "stale_time_ms", with = "duration_ms")]
    pub stale_time: Duration,
    /// Idle time after which an entry is evicted.
    #[serde(rename = "gc_time_ms", with = "duration_ms")]
    pub gc_time: Duration,
    pub retry: BackoffPolicy,
}

impl QueryOptions {
    pub const fn new(stale_time: Duration, gc_time: Duration, retry: BackoffPolicy) -> Self {
        Self {
            stale_time,
            gc_time,
            retry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub car_details: QueryOptions,
    pub insurance_offers: QueryOptions,
    pub offer_details: QueryOptions,
}

impl QueryConfig {
    /// Same retry budgets and cache windows, without backoff waits.
    pub fn immediate() -> Self {
        let defaults = Self::default();
        Self {
            car_details: QueryOptions {
                retry: BackoffPolicy::immediate(defaults.car_details.retry.max_retries),
                ..defaults.car_details
            },
            insurance_offers: QueryOptions {
                retry: BackoffPolicy::immediate(defaults.insurance_offers.retry.max_retries),
                ..defaults.insurance_offers
            },
            offer_details: QueryOptions {
                retry: BackoffPolicy::immediate(defaults.offer_details.retry.max_retries),
                ..defaults.offer_details
            },
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        const SECOND: Duration = Duration::from_secs(1);
        const MINUTE: Duration = Duration::from_secs(60);
        Self {
            car_details: QueryOptions::new(
                MINUTE * 5,
                MINUTE * 10,
                BackoffPolicy::new(3, SECOND, SECOND * 30),
            ),
            insurance_offers: QueryOptions::new(
                MINUTE * 2,
                MINUTE * 5,
                BackoffPolicy::new(2, SECOND, SECOND * 10),
            ),
            offer_details: QueryOptions::new(
                MINUTE * 10,
                MINUTE * 15,
                BackoffPolicy::new(2, SECOND, SECOND * 10),
            ),
        }
    }
}

/// One entry of the rotating loading indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingMessage {
    pub text: String,
    /// 0 to 100
    pub progress: u8,
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,
}

impl LoadingMessage {
    pub fn new(text: impl Into<String>, progress: u8, delay: Duration) -> Self {
        Self {
            text: text.into(),
            progress,
            delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Three attempts in total, `min(1000 * 2^(n-1), 5000)` ms between them.
    pub navigation: BackoffPolicy,
    #[serde(rename = "session_max_age_ms", with = "duration_ms")]
    pub session_max_age: Duration,
    pub results_path: String,
    pub loading_messages: Vec<LoadingMessage>,
}

impl FlowConfig {
    pub fn immediate() -> Self {
        Self {
            navigation: BackoffPolicy::immediate(2),
            loading_messages: Vec::new(),
            ..Self::default()
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        let step = Duration::from_millis(1200);
        Self {
            navigation: BackoffPolicy::new(2, Duration::from_millis(1000), Duration::from_millis(5000)),
            session_max_age: Duration::from_secs(30 * 60),
            results_path: "/cotacao".to_string(),
            loading_messages: vec![
                LoadingMessage::new("Consultando seguradoras parceiras...", 20, Duration::ZERO),
                LoadingMessage::new("Comparando coberturas...", 45, step),
                LoadingMessage::new("Calculando o melhor preço para você...", 70, step),
                LoadingMessage::new("Finalizando sua cotação...", 90, step),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_config_from_json() {
        let json = r#"{
            "car_details": {
                "stale_time_ms": 1000,
                "gc_time_ms": 2000,
                "retry": { "max_retries": 1, "base_delay_ms": 10, "max_delay_ms": 20 }
            }
        }"#;
        let config: QueryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.car_details.stale_time, Duration::from_secs(1));
        assert_eq!(config.car_details.retry.max_retries, 1);
        assert_eq!(config.insurance_offers, QueryConfig::default().insurance_offers);
    }

    #[test]
    fn test_navigation_policy_matches_documented_schedule() {
        let policy = FlowConfig::default().navigation;
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(5000));
    }

    #[test]
    fn test_simulator_config_partial_json() {
        let config: SimulatorConfig =
            serde_json::from_str(r#"{ "error_rates": { "network_error": 1.0 }, "seed": 7 }"#)
                .unwrap();
        assert_eq!(config.error_rates.network_error, 1.0);
        assert_eq!(config.error_rates.server_error, ErrorRates::default().server_error);
        assert_eq!(config.seed, Some(7));
    }
}
