// Scheduler engine: fires one invocation event per cadence interval and
// drives each event through the retry/expiry dispatch loop.

use crate::errors::DispatchError;
use crate::handler::CheckHandler;
use crate::models::{CheckOutcome, InvocationEvent, OutcomeKind, TickReport, TickState};
use crate::retry::RetryStrategy;
use crate::scheduler::ScheduleRule;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Scheduler lifecycle operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the tick loop until a shutdown signal arrives
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop the scheduler gracefully
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Dispatch layer for a single tick: owns the retry budget, the staleness
/// check and the invocation timeout. Ticks share one dispatcher through an
/// Arc so overlapping executions are possible by design.
pub struct Dispatcher {
    rule: ScheduleRule,
    invocation_timeout: Duration,
    handler: Arc<dyn CheckHandler>,
    backoff: Box<dyn RetryStrategy>,
}

impl Dispatcher {
    pub fn new(
        rule: ScheduleRule,
        invocation_timeout: Duration,
        handler: Arc<dyn CheckHandler>,
        backoff: Box<dyn RetryStrategy>,
    ) -> Self {
        Self {
            rule,
            invocation_timeout,
            handler,
            backoff,
        }
    }

    pub fn rule(&self) -> &ScheduleRule {
        &self.rule
    }

    /// Create one event and run it through the dispatch loop
    pub async fn run_tick(&self) -> TickReport {
        let event = InvocationEvent::new(serde_json::json!({ "trigger": "scheduled" }));
        self.dispatch(event).await
    }

    /// Deliver an event to the handler with at most `retry_attempts + 1`
    /// tries. Every try is preceded by a staleness check: an event past its
    /// max age is dropped as Expired, which is terminal and distinct from
    /// retry exhaustion.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn dispatch(&self, mut event: InvocationEvent) -> TickReport {
        let max_attempts = self.rule.max_attempts();
        let mut attempts = 0u32;
        let mut state = TickState::Scheduled;
        let mut outcome_kind: Option<OutcomeKind> = None;
        let mut last_error: Option<String> = None;

        loop {
            if event.is_expired(self.rule.max_event_age) {
                let expired = DispatchError::EventExpired {
                    age_seconds: (Utc::now() - event.dispatched_at).num_seconds(),
                    max_age_seconds: self.rule.max_event_age.as_secs(),
                };
                warn!(attempts, error = %expired, "Dropping stale event");
                last_error = Some(expired.to_string());
                state = TickState::Expired;
                break;
            }

            attempts += 1;
            event.attempt = attempts;
            state = TickState::Dispatched;
            telemetry::record_attempt();
            debug!(attempt = attempts, max_attempts, "Dispatching invocation");

            match timeout(self.invocation_timeout, self.handler.invoke(&event)).await {
                Ok(outcome) => {
                    outcome_kind = Some(outcome.kind());
                    match outcome {
                        CheckOutcome::Match(_) | CheckOutcome::NoMatch => {
                            state = TickState::Succeeded;
                            break;
                        }
                        CheckOutcome::Error(cause) => {
                            let failed = DispatchError::HandlerFailed(cause);
                            warn!(attempt = attempts, error = %failed, "Invocation attempt failed");
                            last_error = Some(failed.to_string());
                        }
                    }
                }
                Err(_) => {
                    // The invocation was cancelled at the timeout boundary;
                    // the handler never returned an outcome.
                    let timed_out = DispatchError::Timeout(self.invocation_timeout.as_secs());
                    warn!(attempt = attempts, error = %timed_out, "Invocation attempt timed out");
                    last_error = Some(timed_out.to_string());
                }
            }

            if attempts >= max_attempts {
                error!(
                    attempts,
                    error = %DispatchError::RetriesExhausted(attempts),
                    "Tick failed"
                );
                state = TickState::Exhausted;
                break;
            }

            state = TickState::RetryPending;
            let delay = self.backoff.delay_before(attempts);
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "Waiting before retry");
                sleep(delay).await;
            }
        }

        telemetry::record_tick(state);
        TickReport {
            event_id: event.id,
            attempts,
            state,
            outcome: outcome_kind,
            last_error,
            finished_at: Utc::now(),
        }
    }
}

/// Fixed-rate scheduler wrapping a dispatcher. Ticks are spawned as
/// independent tasks and are not serialized against each other.
pub struct SchedulerEngine {
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl SchedulerEngine {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);
        Self {
            dispatcher,
            shutdown_tx,
        }
    }

    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let cadence = self.dispatcher.rule().cadence;
        info!(cadence_seconds = cadence.as_secs(), "Starting scheduler engine");

        let mut ticker = interval(cadence);
        // One new event per interval even when a slow invocation overruns
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        let report = dispatcher.run_tick().await;
                        match report.state {
                            TickState::Succeeded => {
                                info!(
                                    event_id = %report.event_id,
                                    attempts = report.attempts,
                                    outcome = ?report.outcome,
                                    "Tick completed"
                                );
                            }
                            state => {
                                warn!(
                                    event_id = %report.event_id,
                                    attempts = report.attempts,
                                    state = state.as_str(),
                                    last_error = report.last_error.as_deref(),
                                    "Tick did not succeed"
                                );
                            }
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping scheduler engine");
        let _ = self.shutdown_tx.send(());
        // Give in-flight ticks a moment to log their reports
        sleep(Duration::from_millis(200)).await;
        Ok(())
    }
}
