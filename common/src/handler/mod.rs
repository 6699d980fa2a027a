// Compute function: one stateless check per invocation. Reads the listing
// source, filters by the configured criteria, diffs against the previous
// run's artifact record, and reports the outcome through the notification
// channel.

pub mod source;

pub use source::HttpListingSource;

use crate::errors::CheckError;
use crate::models::{
    ArtifactRecord, CheckCriteria, CheckOutcome, InvocationEvent, Listing, MatchReport,
    NotificationMessage,
};
use crate::notify::NotificationChannel;
use crate::role::{Capability, ExecutionRole};
use crate::store::ArtifactStore;
use crate::telemetry;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// The unit of work the scheduler dispatches to
#[async_trait]
pub trait CheckHandler: Send + Sync {
    async fn invoke(&self, event: &InvocationEvent) -> CheckOutcome;
}

/// Domain boundary: whatever produces the current set of listings. The
/// production implementation talks to a property site; tests supply fixtures.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn current_listings(&self) -> Result<Vec<Listing>, CheckError>;
}

/// The compute function, bound at construction time to its execution role,
/// its collaborators and its static configuration.
pub struct ComputeFunction {
    role: ExecutionRole,
    source: Arc<dyn ListingSource>,
    channel: Arc<dyn NotificationChannel>,
    store: Option<Arc<dyn ArtifactStore>>,
    criteria: CheckCriteria,
    property: String,
    state_key: String,
    /// Last permitted attempt number (retry attempts + 1). Error outcomes on
    /// earlier attempts stay silent so a successful retry produces no noise.
    max_attempts: u32,
}

impl ComputeFunction {
    pub fn new(
        role: ExecutionRole,
        source: Arc<dyn ListingSource>,
        channel: Arc<dyn NotificationChannel>,
        criteria: CheckCriteria,
        property: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            role,
            source,
            channel,
            store: None,
            criteria,
            property: property.into(),
            state_key: "last_checked_units".to_string(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = state_key.into();
        self
    }

    /// Run the check itself: fetch, filter, diff, persist. Returns the match
    /// details when the unit set changed, None otherwise. At most one store
    /// read and one store write happen here.
    async fn run_check(&self) -> Result<Option<MatchReport>, CheckError> {
        let listings = self.source.current_listings().await?;
        let matching: Vec<Listing> = listings
            .into_iter()
            .filter(|l| self.criteria.matches(l))
            .collect();

        let current_units: BTreeSet<String> =
            matching.iter().map(|l| l.unit.clone()).collect();

        let (previous_units, loaded) = match &self.store {
            Some(store) => {
                self.role.authorize(Capability::StorageReadWrite)?;
                let loaded = store.load(&self.state_key).await?;
                let previous: BTreeSet<String> = loaded
                    .as_ref()
                    .map(|v| v.value.units_for(&self.property).into_iter().collect())
                    .unwrap_or_default();
                (previous, loaded)
            }
            None => (BTreeSet::new(), None),
        };

        let new_units: BTreeSet<&String> = current_units.difference(&previous_units).collect();
        let removed_units: Vec<String> = previous_units
            .difference(&current_units)
            .cloned()
            .collect();

        if let Some(store) = &self.store {
            let (mut record, expected) = match loaded {
                Some(v) => (v.value, Some(v.revision)),
                None => (ArtifactRecord::default(), None),
            };
            record.set_units(&self.property, current_units.iter().cloned().collect());
            // Conditional on the revision read above; a concurrent overlapping
            // invocation loses with a Conflict and the tick is retried whole.
            store.save(&self.state_key, &record, expected).await?;
        }

        if new_units.is_empty() && removed_units.is_empty() {
            return Ok(None);
        }

        let new_listings = matching
            .into_iter()
            .filter(|l| new_units.contains(&l.unit))
            .collect();

        Ok(Some(MatchReport {
            property: self.property.clone(),
            new_listings,
            removed_units,
        }))
    }

    async fn publish_match(&self, report: &MatchReport) -> Result<(), CheckError> {
        self.role.authorize(Capability::NotifyPublish)?;
        let message = NotificationMessage::new(report.subject(), report.render_body());
        self.channel.publish(message).await?;
        Ok(())
    }

    /// Best-effort failure report on the final permitted attempt. A publish
    /// failure here is logged, not propagated: the attempt already failed.
    async fn publish_failure(&self, cause: &CheckError) {
        if self.role.authorize(Capability::NotifyPublish).is_err() {
            warn!(cause = %cause, "Check failed and role cannot publish a failure report");
            return;
        }
        let message = NotificationMessage::new(
            format!("Apartment check failed for {}", self.property),
            format!("The scheduled check exhausted its attempts.\r\n\r\nCause: {}", cause),
        );
        if let Err(e) = self.channel.publish(message).await {
            warn!(error = %e, "Failed to publish failure report");
        }
    }
}

#[async_trait]
impl CheckHandler for ComputeFunction {
    #[instrument(skip(self, event), fields(event_id = %event.id, attempt = event.attempt, property = %self.property))]
    async fn invoke(&self, event: &InvocationEvent) -> CheckOutcome {
        // Basic execution logging is itself a granted capability; a role
        // without it cannot run at all (fail closed).
        if let Err(e) = self.role.authorize(Capability::Logging) {
            return CheckOutcome::Error(e.to_string());
        }
        info!("Running listing check");

        let started = Instant::now();
        let outcome = match self.run_check().await {
            Ok(Some(report)) => match self.publish_match(&report).await {
                Ok(()) => {
                    info!(
                        new_count = report.new_listings.len(),
                        removed_count = report.removed_units.len(),
                        "Listing change detected and published"
                    );
                    CheckOutcome::Match(report)
                }
                // The one permitted publish already happened (and failed);
                // no second attempt within this invocation.
                Err(e) => CheckOutcome::Error(e.to_string()),
            },
            Ok(None) => CheckOutcome::NoMatch,
            Err(e) => {
                if event.attempt >= self.max_attempts {
                    self.publish_failure(&e).await;
                }
                CheckOutcome::Error(e.to_string())
            }
        };

        telemetry::record_check_duration(started.elapsed().as_secs_f64());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TopicChannel;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use tokio::sync::Mutex;

    struct FixtureSource {
        listings: Mutex<Vec<Vec<Listing>>>,
    }

    impl FixtureSource {
        fn new(batches: Vec<Vec<Listing>>) -> Arc<Self> {
            Arc::new(Self {
                listings: Mutex::new(batches),
            })
        }
    }

    #[async_trait]
    impl ListingSource for FixtureSource {
        async fn current_listings(&self) -> Result<Vec<Listing>, CheckError> {
            let mut batches = self.listings.lock().await;
            if batches.is_empty() {
                return Err(CheckError::SourceUnavailable("no fixture left".to_string()));
            }
            Ok(batches.remove(0))
        }
    }

    fn listing(unit: &str) -> Listing {
        Listing {
            unit: unit.to_string(),
            floorplan: "B2".to_string(),
            beds: 2.0,
            baths: 2.0,
            sq_ft: 950,
            available_text: "now".to_string(),
            url: format!("https://example.com/units/{}", unit),
        }
    }

    fn criteria() -> CheckCriteria {
        CheckCriteria {
            min_bedrooms: 2,
            min_bathrooms: 1.5,
            min_square_feet: 0,
            target_move_in: NaiveDate::from_ymd_opt(2024, 8, 10).unwrap(),
        }
    }

    fn full_role() -> ExecutionRole {
        ExecutionRole::new(
            "watch_role",
            [
                Capability::Logging,
                Capability::NotifyPublish,
                Capability::StorageReadWrite,
            ],
        )
    }

    #[tokio::test]
    async fn test_new_unit_produces_match_and_single_publish() {
        let channel = Arc::new(TopicChannel::new("t"));
        let store = Arc::new(MemoryStore::new());
        let source = FixtureSource::new(vec![vec![listing("1203")]]);
        let function = ComputeFunction::new(
            full_role(),
            source,
            channel.clone(),
            criteria(),
            "elle_west_ave",
            2,
        )
        .with_store(store);

        let event = InvocationEvent::new(serde_json::json!({}));
        let outcome = function.invoke(&event).await;

        assert!(matches!(outcome, CheckOutcome::Match(_)));
        let accepted = channel.accepted_messages().await;
        assert_eq!(accepted.len(), 1);
        assert!(accepted[0].body.contains("1203"));
    }

    #[tokio::test]
    async fn test_unchanged_units_are_no_match() {
        let channel = Arc::new(TopicChannel::new("t"));
        let store = Arc::new(MemoryStore::new());
        let source =
            FixtureSource::new(vec![vec![listing("1203")], vec![listing("1203")]]);
        let function = ComputeFunction::new(
            full_role(),
            source,
            channel.clone(),
            criteria(),
            "elle_west_ave",
            2,
        )
        .with_store(store);

        let event = InvocationEvent::new(serde_json::json!({}));
        assert!(matches!(
            function.invoke(&event).await,
            CheckOutcome::Match(_)
        ));
        assert!(matches!(
            function.invoke(&event).await,
            CheckOutcome::NoMatch
        ));
        assert_eq!(channel.accepted_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_removed_unit_is_reported() {
        let channel = Arc::new(TopicChannel::new("t"));
        let store = Arc::new(MemoryStore::new());
        let source = FixtureSource::new(vec![
            vec![listing("1203"), listing("0815")],
            vec![listing("1203")],
        ]);
        let function = ComputeFunction::new(
            full_role(),
            source,
            channel.clone(),
            criteria(),
            "elle_west_ave",
            2,
        )
        .with_store(store);

        let event = InvocationEvent::new(serde_json::json!({}));
        function.invoke(&event).await;
        let outcome = function.invoke(&event).await;

        match outcome {
            CheckOutcome::Match(report) => {
                assert!(report.new_listings.is_empty());
                assert_eq!(report.removed_units, vec!["0815".to_string()]);
            }
            other => panic!("expected Match, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_storage_call_without_capability_fails_closed() {
        let channel = Arc::new(TopicChannel::new("t"));
        let store = Arc::new(MemoryStore::new());
        let role = ExecutionRole::new(
            "watch_role_minimal",
            [Capability::Logging, Capability::NotifyPublish],
        );
        let source = FixtureSource::new(vec![vec![listing("1203")]]);
        let function = ComputeFunction::new(
            role,
            source,
            channel.clone(),
            criteria(),
            "elle_west_ave",
            1,
        )
        .with_store(store.clone());

        let event = InvocationEvent::new(serde_json::json!({}));
        let outcome = function.invoke(&event).await;

        match outcome {
            CheckOutcome::Error(cause) => assert!(cause.contains("storage_read_write")),
            other => panic!("expected Error, got {:?}", other.kind()),
        }
        // Nothing was written behind the denied capability
        assert!(store.load("last_checked_units").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_without_store_every_listed_unit_is_new() {
        let channel = Arc::new(TopicChannel::new("t"));
        let source =
            FixtureSource::new(vec![vec![listing("1203")], vec![listing("1203")]]);
        let role = ExecutionRole::new(
            "watch_role_minimal",
            [Capability::Logging, Capability::NotifyPublish],
        );
        let function =
            ComputeFunction::new(role, source, channel.clone(), criteria(), "elle_west_ave", 2);

        let event = InvocationEvent::new(serde_json::json!({}));
        assert!(matches!(
            function.invoke(&event).await,
            CheckOutcome::Match(_)
        ));
        // No record of the previous run, so the same unit matches again
        assert!(matches!(
            function.invoke(&event).await,
            CheckOutcome::Match(_)
        ));
        assert_eq!(channel.accepted_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_source_error_on_non_final_attempt_stays_silent() {
        let channel = Arc::new(TopicChannel::new("t"));
        let source = FixtureSource::new(vec![]); // always errors
        let function = ComputeFunction::new(
            full_role(),
            source,
            channel.clone(),
            criteria(),
            "elle_west_ave",
            2,
        );

        let mut event = InvocationEvent::new(serde_json::json!({}));
        event.attempt = 1;
        assert!(matches!(
            function.invoke(&event).await,
            CheckOutcome::Error(_)
        ));
        assert!(channel.accepted_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_source_error_on_final_attempt_publishes_failure_report() {
        let channel = Arc::new(TopicChannel::new("t"));
        let source = FixtureSource::new(vec![]);
        let function = ComputeFunction::new(
            full_role(),
            source,
            channel.clone(),
            criteria(),
            "elle_west_ave",
            2,
        );

        let mut event = InvocationEvent::new(serde_json::json!({}));
        event.attempt = 2;
        assert!(matches!(
            function.invoke(&event).await,
            CheckOutcome::Error(_)
        ));

        let accepted = channel.accepted_messages().await;
        assert_eq!(accepted.len(), 1);
        assert!(accepted[0].subject.contains("failed"));
    }

    #[tokio::test]
    async fn test_role_without_logging_cannot_run() {
        let channel = Arc::new(TopicChannel::new("t"));
        let source = FixtureSource::new(vec![vec![listing("1203")]]);
        let role = ExecutionRole::new("no_logging", [Capability::NotifyPublish]);
        let function =
            ComputeFunction::new(role, source, channel, criteria(), "elle_west_ave", 1);

        let event = InvocationEvent::new(serde_json::json!({}));
        match function.invoke(&event).await {
            CheckOutcome::Error(cause) => assert!(cause.contains("logging")),
            other => panic!("expected Error, got {:?}", other.kind()),
        }
    }
}
