use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quote_flow::host::{RecordingHistory, RecordingMetadata, RecordingNavigator};
use quote_flow::{
    FlowController, InMemorySessionStorage, InsuranceApi, MockInsuranceApi, QueryClient,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ServiceConfig;

/// One browser tab's worth of quote flow, with the recorded host side effects.
pub struct Simulation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub controller: FlowController,
    pub navigator: Arc<RecordingNavigator>,
    pub history: Arc<RecordingHistory>,
    pub metadata: Arc<RecordingMetadata>,
    /// Unix epoch milliseconds of the last lookup by id.
    last_active: AtomicI64,
}

impl Simulation {
    fn touch(&self) {
        self.last_active
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let idle = now.timestamp_millis() - self.last_active.load(Ordering::Relaxed);
        Duration::from_millis(idle.max(0) as u64)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub api: Arc<dyn InsuranceApi>,
    /// Offer detail cache shared by all simulations.
    pub offers: QueryClient,
    pub simulations: Arc<DashMap<Uuid, Arc<Simulation>>>,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        let api: Arc<dyn InsuranceApi> = Arc::new(MockInsuranceApi::new(config.simulator_config()));
        Self::with_api(config, api)
    }

    pub fn with_api(config: ServiceConfig, api: Arc<dyn InsuranceApi>) -> Self {
        Self {
            offers: QueryClient::new(config.query_config()),
            config: Arc::new(config),
            api,
            simulations: Arc::new(DashMap::new()),
        }
    }

    /// Sweeps idle simulations before registering the new one.
    pub fn create_simulation(&self) -> Arc<Simulation> {
        self.evict_idle();

        let id = Uuid::new_v4();
        let navigator = Arc::new(RecordingNavigator::new());
        let history = Arc::new(RecordingHistory::new());
        let metadata = Arc::new(RecordingMetadata::new());

        let controller = FlowController::builder(self.api.clone())
            .query_client(QueryClient::new(self.config.query_config()))
            .config(self.config.flow_config())
            .navigator(navigator.clone())
            .history(history.clone())
            .metadata(metadata.clone())
            .storage(Arc::new(InMemorySessionStorage::new()))
            .build();

        let created_at = Utc::now();
        let simulation = Arc::new(Simulation {
            id,
            created_at,
            controller,
            navigator,
            history,
            metadata,
            last_active: AtomicI64::new(created_at.timestamp_millis()),
        });
        self.simulations.insert(id, simulation.clone());
        info!(simulation_id = %id, active = self.simulations.len(), "Simulation created");
        simulation
    }

    pub fn simulation(&self, id: &Uuid) -> Option<Arc<Simulation>> {
        let simulation = self.simulations.get(id).map(|entry| entry.value().clone())?;
        simulation.touch();
        Some(simulation)
    }

    pub fn remove_simulation(&self, id: &Uuid) -> bool {
        let removed = self.simulations.remove(id).is_some();
        if removed {
            info!(simulation_id = %id, "Simulation removed");
        }
        removed
    }

    /// Drop simulations idle for longer than the configured ttl.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.config.simulation_ttl;
        let now = Utc::now();
        let before = self.simulations.len();
        self.simulations.retain(|id, simulation| {
            let keep = simulation.idle_for(now) <= ttl;
            if !keep {
                debug!(simulation_id = %id, "Evicting idle simulation");
            }
            keep
        });
        let evicted = before.saturating_sub(self.simulations.len());
        if evicted > 0 {
            info!(evicted = evicted, "Idle simulations evicted");
        }
        evicted
    }
}
