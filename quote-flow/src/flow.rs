//! The quote flow state machine.
//!
//! `INITIAL_FORM -> CAR_DETAILS_CONFIRMATION -> LOADING -> (results page)`.
//! Errors never become a step of their own: they are kept as an overlay
//! ([`ErrorDisplay`]) while the flow stays in the step that failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backoff::{RetryAttempt, retry_with_backoff};
use crate::config::{FlowConfig, LoadingMessage};
use crate::error::{FlowError, QueryError, Result, SimulationError};
use crate::host::{
    CompletionHandler, HistoryAdapter, HistoryEntry, MetadataSink, NavigateError, Navigator,
    RecordingHistory, RecordingMetadata, RecordingNavigator, lock,
};
use crate::models::{CarDetails, FormData, InsuranceOffer, QuoteResult};
use crate::mutation::{MutationState, MutationStatus};
use crate::navigation::create_results_url;
use crate::query::{CacheStats, QueryClient, QueryKey, QueryNamespace};
use crate::recovery::ErrorDisplay;
use crate::scheduler::{Schedule, ScheduleHandle};
use crate::session::{NavigationSession, is_navigation_session_valid, set_navigation_session};
use crate::simulator::InsuranceApi;
use crate::storage::{InMemorySessionStorage, SessionStorage};
use crate::validation::{normalize_form_data, validate_form_data};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStep {
    #[default]
    InitialForm,
    CarDetailsConfirmation,
    Loading,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialForm => "INITIAL_FORM",
            Self::CarDetailsConfirmation => "CAR_DETAILS_CONFIRMATION",
            Self::Loading => "LOADING",
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub current_step: FlowStep,
    pub form_data: Option<FormData>,
    pub navigation_attempts: u32,
}

/// Everything a view needs to render the flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSnapshot {
    pub state: FlowState,
    pub quote_status: MutationStatus,
    pub quote: Option<QuoteResult>,
    pub quote_failure_count: u32,
    pub error: Option<ErrorDisplay>,
    pub loading: Option<LoadingMessage>,
    pub results_url: Option<String>,
}

struct FlowInner {
    state: FlowState,
    quote: MutationState<QuoteResult>,
    error: Option<ErrorDisplay>,
    /// Consecutive domain failures shown on the current overlay.
    failures: u32,
    results_url: Option<String>,
    /// Bumped by every transition that makes in-flight responses irrelevant.
    epoch: u64,
}

impl FlowInner {
    fn new() -> Self {
        Self {
            state: FlowState::default(),
            quote: MutationState::idle(),
            error: None,
            failures: 0,
            results_url: None,
            epoch: 0,
        }
    }

    fn require_step(&self, expected: FlowStep, action: &'static str) -> Result<()> {
        if self.state.current_step == expected {
            Ok(())
        } else {
            Err(FlowError::InvalidTransition {
                from: self.state.current_step,
                action,
            })
        }
    }

    fn enter(&mut self, step: FlowStep) {
        debug!(from = %self.state.current_step, to = %step, "Flow transition");
        self.state.current_step = step;
        self.epoch += 1;
        self.error = None;
        self.failures = 0;
    }

    fn record_domain_error(&mut self, error: &SimulationError) {
        self.failures += 1;
        self.error = Some(ErrorDisplay::for_simulation_error(error, self.failures));
    }
}

pub struct FlowController {
    api: Arc<dyn InsuranceApi>,
    queries: QueryClient,
    config: FlowConfig,
    history: Arc<dyn HistoryAdapter>,
    navigator: Arc<dyn Navigator>,
    metadata: Arc<dyn MetadataSink>,
    storage: Arc<dyn SessionStorage>,
    completion: Option<Arc<dyn CompletionHandler>>,
    inner: Mutex<FlowInner>,
    loading: Arc<Mutex<Option<LoadingMessage>>>,
    loading_schedule: Mutex<Option<ScheduleHandle>>,
}

impl FlowController {
    pub fn builder(api: Arc<dyn InsuranceApi>) -> FlowControllerBuilder {
        FlowControllerBuilder::new(api)
    }

    fn inner(&self) -> MutexGuard<'_, FlowInner> {
        lock(&self.inner)
    }

    pub fn state(&self) -> FlowState {
        self.inner().state.clone()
    }

    pub fn current_step(&self) -> FlowStep {
        self.inner().state.current_step
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let inner = self.inner();
        FlowSnapshot {
            state: inner.state.clone(),
            quote_status: inner.quote.status,
            quote: inner.quote.data.clone(),
            quote_failure_count: inner.quote.failure_count,
            error: inner.error.clone(),
            loading: lock(&self.loading).clone(),
            results_url: inner.results_url.clone(),
        }
    }

    pub fn error_display(&self) -> Option<ErrorDisplay> {
        self.inner().error.clone()
    }

    pub fn loading_message(&self) -> Option<LoadingMessage> {
        lock(&self.loading).clone()
    }

    pub fn query_client(&self) -> &QueryClient {
        &self.queries
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.queries.stats()
    }

    /// INITIAL_FORM -> CAR_DETAILS_CONFIRMATION. Stores the normalized form and
    /// enables the vehicle lookup for its plate.
    pub fn submit(&self, form_data: &FormData) -> Result<FlowState> {
        let validation = validate_form_data(form_data);
        let mut inner = self.inner();
        inner.require_step(FlowStep::InitialForm, "submit")?;
        if !validation.is_valid {
            debug!(errors = validation.errors.len(), "Form rejected");
            return Err(FlowError::Validation(validation.errors));
        }

        let normalized = normalize_form_data(form_data);
        info!(plate = %normalized.license_plate, "Form submitted");
        inner.state.form_data = Some(normalized.clone());
        inner.enter(FlowStep::CarDetailsConfirmation);
        self.history.push_state(HistoryEntry::new(
            FlowStep::CarDetailsConfirmation,
            Some(normalized),
        ));
        Ok(inner.state.clone())
    }

    /// Vehicle lookup for the submitted plate, served through the query cache.
    /// Enabled only while confirming car details with a plate present.
    pub async fn car_details(&self) -> Result<CarDetails> {
        let (plate, epoch) = {
            let inner = self.inner();
            let plate = inner
                .state
                .form_data
                .as_ref()
                .map(|form| form.license_plate.clone())
                .filter(|plate| !plate.is_empty());
            match plate {
                Some(plate) if inner.state.current_step == FlowStep::CarDetailsConfirmation => {
                    (plate, inner.epoch)
                }
                _ => {
                    return Err(QueryError::Disabled(format!(
                        "{} lookup needs a submitted plate",
                        QueryNamespace::CarDetails.as_str()
                    ))
                    .into());
                }
            }
        };

        let api = &self.api;
        let plate_ref = plate.as_str();
        let result = self
            .queries
            .fetch_query(QueryKey::car_details(&plate), move || {
                api.get_car_details_by_plate(plate_ref)
            })
            .await;

        let mut inner = self.inner();
        if inner.epoch != epoch {
            debug!(plate = %plate, "Discarding superseded vehicle lookup");
            return Err(FlowError::Superseded);
        }
        match result {
            Ok(car) => {
                inner.error = None;
                inner.failures = 0;
                drop(inner);
                self.publish_metadata(&car);
                Ok(car)
            }
            Err(e) => {
                if let Some(error) = e.simulation_error() {
                    inner.record_domain_error(error);
                }
                Err(e.into())
            }
        }
    }

    /// CAR_DETAILS_CONFIRMATION -> LOADING, then runs the quote mutation.
    pub async fn confirm(&self) -> Result<QuoteResult> {
        let (form_data, epoch) = {
            let mut inner = self.inner();
            inner.require_step(FlowStep::CarDetailsConfirmation, "confirm")?;
            let form_data = inner.state.form_data.clone().ok_or(FlowError::MissingFormData)?;
            if self.cached_car_details(&form_data).is_none() {
                return Err(FlowError::MissingCarDetails);
            }
            inner.enter(FlowStep::Loading);
            inner.state.navigation_attempts = 0;
            inner.quote.start();
            (form_data, inner.epoch)
        };
        self.history
            .push_state(HistoryEntry::new(FlowStep::Loading, Some(form_data.clone())));
        self.start_loading_messages();
        self.run_quote(form_data, epoch).await
    }

    /// Re-run a failed quote while staying in LOADING.
    pub async fn retry_quote(&self) -> Result<QuoteResult> {
        let (form_data, epoch) = {
            let mut inner = self.inner();
            inner.require_step(FlowStep::Loading, "retry_quote")?;
            let retry_allowed = inner.quote.is_error()
                && inner.error.as_ref().is_some_and(|display| display.can_retry);
            if !retry_allowed {
                return Err(FlowError::InvalidTransition {
                    from: inner.state.current_step,
                    action: "retry_quote",
                });
            }
            let form_data = inner.state.form_data.clone().ok_or(FlowError::MissingFormData)?;
            inner.quote.start();
            (form_data, inner.epoch)
        };
        info!("Retrying quote");
        self.run_quote(form_data, epoch).await
    }

    async fn run_quote(&self, form_data: FormData, epoch: u64) -> Result<QuoteResult> {
        let car = self
            .cached_car_details(&form_data)
            .ok_or(FlowError::MissingCarDetails)?;
        let policy = self.queries.options(QueryNamespace::InsuranceOffers).retry;
        let api = &self.api;
        let car_ref = &car;

        let result = retry_with_backoff(
            &policy,
            SimulationError::is_retryable,
            |retry: RetryAttempt, error: &SimulationError| {
                warn!(
                    kind = %error.kind,
                    attempt = retry.attempt,
                    max_attempts = retry.max_attempts,
                    "Quote attempt failed"
                );
                let mut inner = self.inner();
                if inner.epoch == epoch {
                    inner.quote.record_failure();
                }
            },
            move |_| api.get_insurance_offers(car_ref),
        )
        .await;

        let quote = {
            let mut inner = self.inner();
            if inner.epoch != epoch || inner.state.current_step != FlowStep::Loading {
                debug!("Discarding superseded quote response");
                return Err(FlowError::Superseded);
            }
            match result {
                Ok(offers) => {
                    self.queries
                        .set_query_data(QueryKey::insurance_offers(&car), &offers)?;
                    let quote = QuoteResult {
                        form_data,
                        car_details: car,
                        offers,
                    };
                    info!(offers = quote.offers.len(), "Quote generated");
                    inner.quote.succeed(quote.clone());
                    inner.error = None;
                    inner.failures = 0;
                    quote
                }
                Err(error) => {
                    warn!(kind = %error.kind, "Quote generation failed");
                    inner.quote.record_failure();
                    inner.quote.fail(error.clone());
                    inner.record_domain_error(&error);
                    return Err(error.into());
                }
            }
        };
        self.warm_offer_details(&quote.offers).await;
        Ok(quote)
    }

    /// Prefetch the detail view of every offer in a fresh quote.
    async fn warm_offer_details(&self, offers: &[InsuranceOffer]) {
        let mut tasks = JoinSet::new();
        for offer in offers {
            let queries = self.queries.clone();
            let api = self.api.clone();
            let offer_id = offer.id.clone();
            tasks.spawn(async move {
                queries
                    .prefetch(QueryKey::offer_details(&offer_id), || {
                        api.get_offer_details(&offer_id)
                    })
                    .await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Offer prefetch task failed");
            }
        }
        debug!(offers = offers.len(), "Offer details prefetched");
    }

    /// CAR_DETAILS_CONFIRMATION -> INITIAL_FORM. The form is kept for re-display.
    pub fn edit(&self) -> Result<FlowState> {
        let mut inner = self.inner();
        inner.require_step(FlowStep::CarDetailsConfirmation, "edit")?;
        inner.enter(FlowStep::InitialForm);
        self.queries.invalidate_all();
        self.history.push_state(HistoryEntry::new(
            FlowStep::InitialForm,
            inner.state.form_data.clone(),
        ));
        Ok(inner.state.clone())
    }

    /// Hands the finished quote to the results page. Navigation is retried on
    /// its own budget; running out of it resets the quote and reports
    /// [`FlowError::NavigationFailed`].
    pub async fn loading_complete(&self) -> Result<String> {
        let (quote, epoch) = {
            let inner = self.inner();
            inner.require_step(FlowStep::Loading, "loading_complete")?;
            let quote = inner.quote.data.clone().ok_or(FlowError::MissingQuote)?;
            (quote, inner.epoch)
        };

        if let Some(completion) = &self.completion {
            completion.on_complete(&quote);
        }

        let url = create_results_url(
            &self.config.results_path,
            &quote.form_data,
            Some(&quote.car_details),
        );
        let session = NavigationSession::new(self.config.results_path.clone())
            .with_form_data(quote.form_data.clone())
            .with_car_details(quote.car_details.clone());
        set_navigation_session(self.storage.as_ref(), &session).await?;

        let policy = self.config.navigation;
        let navigator = &self.navigator;
        let target = url.as_str();
        let mut attempts = 0;

        let result = retry_with_backoff(
            &policy,
            |_: &NavigateError| true,
            |retry: RetryAttempt, error: &NavigateError| {
                warn!(
                    attempt = retry.attempt,
                    max_attempts = retry.max_attempts,
                    delay_ms = retry.delay.as_millis() as u64,
                    error = %error,
                    "Navigation attempt failed"
                );
            },
            |attempt| {
                attempts = attempt;
                let mut inner = self.inner();
                if inner.epoch == epoch {
                    inner.state.navigation_attempts = attempt;
                }
                navigator.navigate(target)
            },
        )
        .await;

        let mut inner = self.inner();
        if inner.epoch != epoch {
            debug!("Discarding superseded navigation result");
            return Err(FlowError::Superseded);
        }
        match result {
            Ok(()) => {
                info!(url = %url, attempts = attempts, "Navigated to results");
                inner.state.navigation_attempts = 0;
                inner.results_url = Some(url.clone());
                drop(inner);
                self.stop_loading_messages();
                Ok(url)
            }
            Err(error) => {
                warn!(attempts = attempts, error = %error, "Navigation failed");
                inner.quote.reset();
                inner.error = Some(ErrorDisplay::navigation_failed(
                    attempts,
                    policy.max_attempts(),
                ));
                drop(inner);
                self.stop_loading_messages();
                Err(FlowError::NavigationFailed {
                    attempts,
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Back/forward navigation. A saved entry is restored exactly; without one,
    /// any step past the form is abandoned and the caches are invalidated.
    pub fn handle_pop_state(&self, entry: Option<HistoryEntry>) -> FlowState {
        let state = {
            let mut inner = self.inner();
            match entry {
                Some(entry) => {
                    info!(step = %entry.step, "Restoring flow from history");
                    inner.enter(entry.step);
                    inner.state.form_data = entry.form_data;
                    inner.state.navigation_attempts = 0;
                    if entry.step != FlowStep::Loading {
                        inner.quote.reset();
                    }
                }
                None if inner.state.current_step != FlowStep::InitialForm => {
                    warn!(step = %inner.state.current_step, "History entry missing, resetting flow");
                    inner.enter(FlowStep::InitialForm);
                    inner.state = FlowState::default();
                    inner.quote.reset();
                    self.queries.invalidate_all();
                }
                None => {}
            }
            inner.state.clone()
        };
        if state.current_step != FlowStep::Loading {
            self.stop_loading_messages();
        }
        state
    }

    /// Returns whether anything was reset.
    pub fn handle_visibility_regained(&self) -> bool {
        let mut inner = self.inner();
        if inner.state.current_step != FlowStep::Loading || inner.state.navigation_attempts == 0 {
            return false;
        }
        info!(
            attempts = inner.state.navigation_attempts,
            "Tab regained focus mid-navigation, resetting quote"
        );
        inner.quote.reset();
        inner.state.navigation_attempts = 0;
        inner.error = None;
        inner.failures = 0;
        inner.epoch += 1;
        drop(inner);
        self.stop_loading_messages();
        true
    }

    /// Whether a navigation session younger than the configured max age is stored.
    pub async fn has_valid_navigation_session(&self) -> Result<bool> {
        is_navigation_session_valid(self.storage.as_ref(), Some(self.config.session_max_age)).await
    }

    /// Back to an empty form with every cache and mutation cleared.
    pub fn reset(&self) -> FlowState {
        let state = {
            let mut inner = self.inner();
            inner.enter(FlowStep::InitialForm);
            inner.state = FlowState::default();
            inner.quote.reset();
            inner.results_url = None;
            inner.state.clone()
        };
        self.queries.clear();
        self.stop_loading_messages();
        self.history
            .replace_state(HistoryEntry::new(FlowStep::InitialForm, None));
        info!("Flow reset");
        state
    }

    pub async fn offer_details(&self, offer_id: &str) -> Result<InsuranceOffer> {
        let offer_id = offer_id.trim();
        if offer_id.is_empty() {
            return Err(QueryError::Disabled(format!(
                "{} lookup needs an offer id",
                QueryNamespace::OfferDetails.as_str()
            ))
            .into());
        }
        let api = &self.api;
        let offer = self
            .queries
            .fetch_query(QueryKey::offer_details(offer_id), move || {
                api.get_offer_details(offer_id)
            })
            .await?;
        Ok(offer)
    }

    fn cached_car_details(&self, form_data: &FormData) -> Option<CarDetails> {
        self.queries
            .get_cached_value(&QueryKey::car_details(&form_data.license_plate))
    }

    fn publish_metadata(&self, car: &CarDetails) {
        let title = format!("Seguro {} {} {} | Cotação", car.make, car.model, car.year);
        let description = format!(
            "Compare ofertas de seguro para {} {} {} avaliado em R$ {:.0}.",
            car.make, car.model, car.year, car.estimated_value
        );
        self.metadata.update_metadata(&title, &description);
    }

    fn start_loading_messages(&self) {
        let messages = &self.config.loading_messages;
        if messages.is_empty() {
            return;
        }
        let schedule = messages.iter().fold(Schedule::new(), |schedule, message| {
            let slot = self.loading.clone();
            let message = message.clone();
            schedule.then(message.delay, move || {
                *lock(&slot) = Some(message.clone());
            })
        });
        // replacing the previous handle cancels it
        *lock(&self.loading_schedule) = Some(schedule.start());
    }

    fn stop_loading_messages(&self) {
        if let Some(mut handle) = lock(&self.loading_schedule).take() {
            handle.cancel();
        }
        *lock(&self.loading) = None;
    }
}

pub struct FlowControllerBuilder {
    api: Arc<dyn InsuranceApi>,
    queries: Option<QueryClient>,
    config: FlowConfig,
    history: Option<Arc<dyn HistoryAdapter>>,
    navigator: Option<Arc<dyn Navigator>>,
    metadata: Option<Arc<dyn MetadataSink>>,
    storage: Option<Arc<dyn SessionStorage>>,
    completion: Option<Arc<dyn CompletionHandler>>,
}

impl FlowControllerBuilder {
    pub fn new(api: Arc<dyn InsuranceApi>) -> Self {
        Self {
            api,
            queries: None,
            config: FlowConfig::default(),
            history: None,
            navigator: None,
            metadata: None,
            storage: None,
            completion: None,
        }
    }

    pub fn query_client(mut self, queries: QueryClient) -> Self {
        self.queries = Some(queries);
        self
    }

    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryAdapter>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataSink>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn on_complete(mut self, completion: Arc<dyn CompletionHandler>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn build(self) -> FlowController {
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(RecordingHistory::new()));
        history.replace_state(HistoryEntry::new(FlowStep::InitialForm, None));

        FlowController {
            api: self.api,
            queries: self.queries.unwrap_or_default(),
            config: self.config,
            history,
            navigator: self
                .navigator
                .unwrap_or_else(|| Arc::new(RecordingNavigator::new())),
            metadata: self
                .metadata
                .unwrap_or_else(|| Arc::new(RecordingMetadata::new())),
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(InMemorySessionStorage::new())),
            completion: self.completion,
            inner: Mutex::new(FlowInner::new()),
            loading: Arc::new(Mutex::new(None)),
            loading_schedule: Mutex::new(None),
        }
    }
}
