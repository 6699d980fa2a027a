// Core domain models for the watch orchestration: invocation events, tick
// lifecycle states, check outcomes and notification messages.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Invocation Events
// ============================================================================

/// One dispatched invocation, created by the scheduler on each cadence tick.
/// The attempt number is stamped by the dispatch layer before each try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationEvent {
    pub id: Uuid,
    pub dispatched_at: DateTime<Utc>,
    pub attempt: u32,
    pub payload: serde_json::Value,
}

impl InvocationEvent {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispatched_at: Utc::now(),
            attempt: 1,
            payload,
        }
    }

    /// Age of the event relative to its dispatch timestamp. Clamped at zero
    /// so a clock skew never yields a negative age.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.dispatched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, max_event_age: Duration) -> bool {
        self.age() > max_event_age
    }
}

// ============================================================================
// Tick lifecycle
// ============================================================================

/// State machine for one scheduled tick:
/// `Scheduled -> Dispatched -> {Succeeded | RetryPending -> Dispatched | Expired | Exhausted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickState {
    Scheduled,
    Dispatched,
    RetryPending,
    Succeeded,
    Expired,
    Exhausted,
}

impl TickState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TickState::Succeeded | TickState::Expired | TickState::Exhausted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TickState::Scheduled => "scheduled",
            TickState::Dispatched => "dispatched",
            TickState::RetryPending => "retry_pending",
            TickState::Succeeded => "succeeded",
            TickState::Expired => "expired",
            TickState::Exhausted => "exhausted",
        }
    }
}

/// Outcome classification carried on a finished tick report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Match,
    NoMatch,
    Error,
}

/// Summary of one tick after the dispatch loop finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub event_id: Uuid,
    /// Delivery attempts actually made; zero when the event expired before
    /// the first attempt.
    pub attempts: u32,
    pub state: TickState,
    pub outcome: Option<OutcomeKind>,
    pub last_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// Check outcomes
// ============================================================================

/// Result of one compute function invocation
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// Check criteria satisfied; a notification was published
    Match(MatchReport),
    /// Criteria not satisfied; nothing published
    NoMatch,
    /// Unrecoverable within this attempt; the dispatch layer may retry
    Error(String),
}

impl CheckOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            CheckOutcome::Match(_) => OutcomeKind::Match,
            CheckOutcome::NoMatch => OutcomeKind::NoMatch,
            CheckOutcome::Error(_) => OutcomeKind::Error,
        }
    }
}

/// Details of a positive check: which units appeared and which disappeared
/// since the previous recorded run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub property: String,
    pub new_listings: Vec<Listing>,
    pub removed_units: Vec<String>,
}

impl MatchReport {
    /// Render the notification body. Uses CRLF line endings since the
    /// downstream subscriber may hand the body to an email transport.
    pub fn render_body(&self) -> String {
        let new_units = if self.new_listings.is_empty() {
            "none".to_string()
        } else {
            self.new_listings
                .iter()
                .map(|l| {
                    format!(
                        "{} ({}): available {}\r\n{}",
                        l.unit, l.floorplan, l.available_text, l.url
                    )
                })
                .collect::<Vec<_>>()
                .join("\r\n\r\n")
        };

        let removed_units = if self.removed_units.is_empty() {
            "none".to_string()
        } else {
            self.removed_units.join("\r\n")
        };

        format!(
            "NEW:\r\n----\r\n{}\r\n\r\nREMOVED:\r\n--------\r\n{}",
            new_units, removed_units
        )
    }

    pub fn subject(&self) -> String {
        format!("Change in available units at {}", self.property)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Message published to the notification channel and fanned out to every
/// registered subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Listings & criteria
// ============================================================================

/// One available unit as reported by the listing source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub unit: String,
    pub floorplan: String,
    pub beds: f64,
    pub baths: f64,
    pub sq_ft: u32,
    pub available_text: String,
    pub url: String,
}

/// Typed check thresholds, parsed and validated once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct CheckCriteria {
    pub min_bedrooms: u32,
    pub min_bathrooms: f64,
    pub min_square_feet: u32,
    pub target_move_in: NaiveDate,
}

impl CheckCriteria {
    pub fn matches(&self, listing: &Listing) -> bool {
        listing.beds >= f64::from(self.min_bedrooms)
            && listing.baths >= self.min_bathrooms
            && listing.sq_ft >= self.min_square_feet
            && self.available_in_time(listing)
    }

    /// Availability text is either "now", a MM/DD/YYYY date, or freeform.
    /// Only a parseable date later than the target move-in disqualifies.
    fn available_in_time(&self, listing: &Listing) -> bool {
        match NaiveDate::parse_from_str(&listing.available_text, "%m/%d/%Y") {
            Ok(available) => available <= self.target_move_in,
            Err(_) => true,
        }
    }
}

// ============================================================================
// Artifact records
// ============================================================================

/// Persisted state carried across invocations: the unit numbers seen on the
/// previous run, keyed by property. Read and written only by the compute
/// function.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub units: BTreeMap<String, Vec<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ArtifactRecord {
    pub fn units_for(&self, property: &str) -> Vec<String> {
        self.units.get(property).cloned().unwrap_or_default()
    }

    pub fn set_units(&mut self, property: &str, mut units: Vec<String>) {
        units.sort();
        self.units.insert(property.to_string(), units);
        self.updated_at = Some(Utc::now());
    }
}
