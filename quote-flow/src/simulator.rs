//! In-memory stand-in for the remote vehicle lookup and insurance quoting API.
//!
//! Every call sleeps for a randomized latency and may fail with one of the
//! injected [`SimulationErrorKind`]s according to the configured
//! [`ErrorRates`]. Offer generation is intentionally non-deterministic: two
//! identical requests can return different subsets in different orders. Set
//! [`SimulatorConfig::seed`] to pin the sequence.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog;
use crate::config::{ErrorRates, LatencyRange, SimulatorConfig};
use crate::error::{SimulationError, SimulationErrorKind};
use crate::models::{CarDetails, InsuranceOffer};
use crate::validation::{PlateFormat, sanitize_license_plate};

const MIN_ADJUSTMENT: f64 = 0.5;
const MAX_ADJUSTMENT: f64 = 3.0;
const DEDUCTIBLE_SCALE: f64 = 0.8;

/// Remote API seam used by the query layer.
#[async_trait]
pub trait InsuranceApi: Send + Sync {
    async fn get_car_details_by_plate(&self, plate: &str) -> Result<CarDetails, SimulationError>;

    async fn get_insurance_offers(
        &self,
        car_details: &CarDetails,
    ) -> Result<Vec<InsuranceOffer>, SimulationError>;

    async fn get_offer_details(&self, offer_id: &str) -> Result<InsuranceOffer, SimulationError>;
}

pub struct MockInsuranceApi {
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
}

impl MockInsuranceApi {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }

    async fn simulate_latency(&self, range: LatencyRange) {
        let millis = if range.max_ms <= range.min_ms {
            range.min_ms
        } else {
            self.with_rng(|rng| rng.random_range(range.min_ms..=range.max_ms))
        };
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn roll(&self, probability: f64) -> bool {
        probability > 0.0 && self.with_rng(|rng| rng.random::<f64>()) < probability
    }

    /// Draw each injected failure in order; the first hit wins.
    fn inject_failure(
        &self,
        operation: &str,
        candidates: &[(SimulationErrorKind, f64)],
    ) -> Result<(), SimulationError> {
        for (kind, probability) in candidates {
            if self.roll(*probability) {
                warn!(operation = operation, kind = %kind, "Injecting simulated failure");
                return Err(SimulationError::new(*kind, injected_message(*kind, operation)));
            }
        }
        Ok(())
    }

    fn adjustment_factor(&self, estimated_value: f64) -> f64 {
        if self.config.reference_value <= 0.0 || !estimated_value.is_finite() {
            return 1.0;
        }
        (estimated_value / self.config.reference_value).clamp(MIN_ADJUSTMENT, MAX_ADJUSTMENT)
    }
}

impl Default for MockInsuranceApi {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

fn injected_message(kind: SimulationErrorKind, operation: &str) -> String {
    match kind {
        SimulationErrorKind::ServerError => format!("{operation}: internal server error (500)"),
        SimulationErrorKind::RateLimit => format!("{operation}: too many requests (429)"),
        SimulationErrorKind::NetworkError => format!("{operation}: connection reset"),
        SimulationErrorKind::TimeoutError => format!("{operation}: request timed out"),
        SimulationErrorKind::InvalidPlate => format!("{operation}: plate rejected by registry"),
        SimulationErrorKind::ValidationError => format!("{operation}: invalid request"),
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[async_trait]
impl InsuranceApi for MockInsuranceApi {
    async fn get_car_details_by_plate(&self, plate: &str) -> Result<CarDetails, SimulationError> {
        if plate.trim().is_empty() {
            return Err(SimulationError::validation("license plate is required")
                .with_user_message("Informe a placa do veículo."));
        }

        self.simulate_latency(self.config.latency.car_lookup).await;

        let ErrorRates {
            server_error,
            rate_limit,
            network_error,
            timeout_error,
            invalid_plate,
        } = self.config.error_rates;
        self.inject_failure(
            "car_lookup",
            &[
                (SimulationErrorKind::ServerError, server_error),
                (SimulationErrorKind::RateLimit, rate_limit),
                (SimulationErrorKind::NetworkError, network_error),
                (SimulationErrorKind::TimeoutError, timeout_error),
            ],
        )?;

        let normalized = sanitize_license_plate(plate);
        if PlateFormat::detect(&normalized).is_none() {
            return Err(
                SimulationError::validation(format!("invalid plate format: {normalized}"))
                    .with_user_message("Formato de placa inválido. Use ABC-1234 ou ABC1D23."),
            );
        }

        self.inject_failure(
            "car_lookup",
            &[(SimulationErrorKind::InvalidPlate, invalid_plate)],
        )?;

        if let Some(details) = catalog::find_vehicle(&normalized) {
            info!(plate = %normalized, make = %details.make, model = %details.model, "Vehicle found");
            return Ok(details);
        }

        debug!(plate = %normalized, "Unknown plate, serving generic vehicle record");
        self.simulate_latency(self.config.latency.fallback_extra).await;
        Ok(catalog::fallback_vehicle())
    }

    async fn get_insurance_offers(
        &self,
        car_details: &CarDetails,
    ) -> Result<Vec<InsuranceOffer>, SimulationError> {
        if car_details.make.trim().is_empty() || car_details.model.trim().is_empty() {
            return Err(SimulationError::validation("vehicle make and model are required")
                .with_user_message("Dados do veículo incompletos."));
        }

        self.simulate_latency(self.config.latency.insurance_offers).await;

        let rates = self.config.error_rates;
        self.inject_failure(
            "insurance_offers",
            &[
                (SimulationErrorKind::ServerError, rates.server_error),
                (SimulationErrorKind::NetworkError, rates.network_error),
                (SimulationErrorKind::TimeoutError, rates.timeout_error),
            ],
        )?;

        let factor = self.adjustment_factor(car_details.estimated_value);
        let mut offers: Vec<InsuranceOffer> = catalog::base_offers()
            .into_iter()
            .map(|mut offer| {
                offer.monthly_premium = round_cents(offer.monthly_premium * factor);
                offer.deductible = (offer.deductible * factor * DEDUCTIBLE_SCALE).round();
                offer
            })
            .collect();

        let count = self.with_rng(|rng| {
            offers.shuffle(rng);
            rng.random_range(3..=4usize)
        });
        offers.truncate(count);

        info!(
            make = %car_details.make,
            model = %car_details.model,
            factor = factor,
            offers = offers.len(),
            "Generated insurance offers"
        );
        Ok(offers)
    }

    async fn get_offer_details(&self, offer_id: &str) -> Result<InsuranceOffer, SimulationError> {
        if offer_id.trim().is_empty() {
            return Err(SimulationError::validation("offer id is required"));
        }

        self.simulate_latency(self.config.latency.offer_details).await;

        let rates = self.config.error_rates;
        self.inject_failure(
            "offer_details",
            &[
                (SimulationErrorKind::ServerError, rates.server_error),
                (SimulationErrorKind::NetworkError, rates.network_error),
            ],
        )?;

        catalog::find_offer(offer_id).ok_or_else(|| {
            SimulationError::validation(format!("offer not found: {offer_id}"))
                .with_user_message("Oferta não encontrada.")
        })
    }
}
