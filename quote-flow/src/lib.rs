pub mod backoff;
pub mod catalog;
pub mod config;
pub mod error;
pub mod flow;
pub mod host;
pub mod models;
pub mod mutation;
pub mod navigation;
pub mod query;
pub mod recovery;
pub mod scheduler;
pub mod session;
pub mod simulator;
pub mod storage;
pub mod validation;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, RetryAttempt, retry_with_backoff};
pub use config::{ErrorRates, FlowConfig, LatencyProfile, QueryConfig, QueryOptions, SimulatorConfig};
pub use error::{FlowError, QueryError, Result, SimulationError, SimulationErrorKind};
pub use flow::{FlowController, FlowControllerBuilder, FlowSnapshot, FlowState, FlowStep};
pub use host::{
    CompletionHandler, HistoryAdapter, HistoryEntry, MetadataSink, NavigateError, Navigator,
};
pub use models::{CarDetails, CoverageDetails, FormData, InsuranceOffer, QuoteResult};
pub use navigation::{SearchParams, create_results_url, validate_results_params};
pub use query::{CacheStats, QueryClient, QueryKey, QueryNamespace};
pub use recovery::{ErrorDisplay, RecoveryAction};
pub use simulator::{InsuranceApi, MockInsuranceApi};
pub use storage::{InMemorySessionStorage, SessionStorage};
