pub mod config;
pub mod error;
pub mod service;
pub mod state;
pub mod telemetry;

pub use config::{LogFormat, ServiceConfig, SimulationProfile};
pub use service::{build_router, create_app};
pub use state::{AppState, Simulation};
