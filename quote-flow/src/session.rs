//! Short-lived navigation markers kept in session storage between the quote
//! flow and the results page.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{CarDetails, FormData};
use crate::storage::SessionStorage;

pub const NAVIGATION_SESSION_KEY: &str = "navigation-session";
/// Marker read by the results page; cleared together with the navigation session.
pub const RESULTS_LOADED_KEY: &str = "cotacao-loaded";
pub const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSession {
    pub page: String,
    /// Unix epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<FormData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_details: Option<CarDetails>,
}

impl NavigationSession {
    pub fn new(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            timestamp: Utc::now().timestamp_millis(),
            form_data: None,
            car_details: None,
        }
    }

    pub fn with_form_data(mut self, form_data: FormData) -> Self {
        self.form_data = Some(form_data);
        self
    }

    pub fn with_car_details(mut self, car_details: CarDetails) -> Self {
        self.car_details = Some(car_details);
        self
    }

    pub fn age_at(&self, now_millis: i64) -> Duration {
        Duration::from_millis(now_millis.saturating_sub(self.timestamp).max(0) as u64)
    }
}

pub async fn set_navigation_session(
    storage: &dyn SessionStorage,
    session: &NavigationSession,
) -> Result<()> {
    let payload = serde_json::to_string(session)?;
    storage.set_item(NAVIGATION_SESSION_KEY, payload).await?;
    storage
        .set_item(RESULTS_LOADED_KEY, session.timestamp.to_string())
        .await?;
    debug!(page = %session.page, "Navigation session stored");
    Ok(())
}

/// Returns `None` when nothing is stored or the stored blob is unreadable.
pub async fn get_navigation_session(
    storage: &dyn SessionStorage,
) -> Result<Option<NavigationSession>> {
    let Some(raw) = storage.get_item(NAVIGATION_SESSION_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable navigation session");
            Ok(None)
        }
    }
}

pub async fn clear_navigation_session(storage: &dyn SessionStorage) -> Result<()> {
    storage.remove_item(NAVIGATION_SESSION_KEY).await?;
    storage.remove_item(RESULTS_LOADED_KEY).await?;
    Ok(())
}

/// `max_age` defaults to thirty minutes.
pub async fn is_navigation_session_valid(
    storage: &dyn SessionStorage,
    max_age: Option<Duration>,
) -> Result<bool> {
    let max_age = max_age.unwrap_or(DEFAULT_SESSION_MAX_AGE);
    Ok(get_navigation_session(storage)
        .await?
        .is_some_and(|session| session.age_at(Utc::now().timestamp_millis()) <= max_age))
}
