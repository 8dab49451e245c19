//! Periodic reconciliation loop: fetches the current ticket set, runs each
//! ticket through the classifier and the reconciliation store, and forwards
//! the resulting signals to the relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use beacon_core::{
    classify, format_ticket_line, CategoryMap, ReconcileStore, Signal, TicketSource,
    TransitionAction,
};

use crate::relay::RelayHandle;

/// Delay before the first cycle, so a freshly started daemon settles before
/// hitting the ticketing backend.
const START_DELAY: Duration = Duration::from_secs(10);

/// How long `stop` waits for an in-flight cycle before force-cancelling.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Poller<S: TicketSource> {
    source: Arc<S>,
    relay: RelayHandle,
    store: Arc<Mutex<ReconcileStore>>,
    category_map: CategoryMap,
    query: String,
    interval: Duration,
    start_delay: Duration,
    cancel: CancellationToken,
}

impl<S: TicketSource + 'static> Poller<S> {
    pub fn new(
        source: Arc<S>,
        relay: RelayHandle,
        category_map: CategoryMap,
        query: String,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            relay,
            store: Arc::new(Mutex::new(ReconcileStore::new())),
            category_map,
            query,
            interval,
            start_delay: START_DELAY,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the fixed start delay. For tests.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Control handle for stop/reset, detached from the running task.
    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            cancel: self.cancel.clone(),
            store: Arc::clone(&self.store),
        }
    }

    /// Run the polling loop: one cycle after the start delay, then one per
    /// period, until cancelled. Cycles are sequential; a slow fetch delays
    /// the next cycle instead of overlapping it.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            query = %self.query,
            "poller starting"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.start_delay) => {}
            _ = self.cancel.cancelled() => return,
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the first cycle runs now.
        ticker.tick().await;

        loop {
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = %e, "poll cycle failed, will retry next period");
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        tracing::info!("poller stopped");
    }

    /// One poll cycle. A transport failure propagates without touching the
    /// store, so the first-cycle flag survives until a fetch succeeds.
    pub(crate) async fn poll_once(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let tickets = {
            let source = Arc::clone(&self.source);
            let query = self.query.clone();
            tokio::task::spawn_blocking(move || source.search(&query)).await??
        };

        // The whole read-decide-mutate pass runs under one store lock.
        let mut emits = Vec::new();
        {
            let mut store = self.store.lock().await;
            let first_cycle = store.is_first_cycle();

            for ticket in &tickets {
                let classification = classify(ticket, &self.category_map);
                let status = ticket.status.as_deref().unwrap_or("");
                match store.reconcile(&ticket.id, classification.phase, status) {
                    TransitionAction::EmitActive => {
                        tracing::info!(
                            ticket = %ticket.id,
                            ticket_type = %ticket.type_name,
                            "new active ticket: {}",
                            format_ticket_line(ticket)
                        );
                        emits.push(Signal::for_active(classification.category));
                    }
                    TransitionAction::EmitResolved => {
                        tracing::info!(
                            ticket = %ticket.id,
                            ticket_type = %ticket.type_name,
                            status = %status,
                            "ticket resolved"
                        );
                        emits.push(Signal::for_resolved(classification.category));
                    }
                    TransitionAction::UpdateSilent => {
                        tracing::debug!(ticket = %ticket.id, status = %status, "status drift, no signal");
                    }
                    TransitionAction::None => {}
                }
            }

            store.complete_first_cycle();
            if first_cycle {
                tracing::info!(
                    fetched = tickets.len(),
                    tracked = store.active_count(),
                    "catch-up cycle complete, monitoring for new transitions"
                );
            }
        }

        for signal in emits {
            self.relay.broadcast(signal).await;
        }

        Ok(())
    }
}

/// Stop/reset surface for a running poller.
#[derive(Clone)]
pub struct PollerHandle {
    cancel: CancellationToken,
    store: Arc<Mutex<ReconcileStore>>,
}

impl PollerHandle {
    /// Cancel future cycles. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel, then wait for the in-flight cycle up to a bounded timeout
    /// before force-aborting the task.
    pub async fn stop(&self, mut task: JoinHandle<()>) {
        self.cancel.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            tracing::warn!("poller did not stop in time, aborting");
            task.abort();
        }
    }

    /// Clear both reconciliation maps. Does not touch the first-cycle flag.
    pub async fn reset(&self) {
        let mut store = self.store.lock().await;
        store.reset();
        tracing::info!("reconciliation store cleared");
    }

    #[cfg(test)]
    pub(crate) async fn is_first_cycle(&self) -> bool {
        self.store.lock().await.is_first_cycle()
    }

    #[cfg(test)]
    pub(crate) async fn active_count(&self) -> usize {
        self.store.lock().await.active_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::SocketAddr;

    use beacon_core::Ticket;

    use crate::relay::RelayServer;

    #[derive(Debug, thiserror::Error)]
    #[error("fake transport error")]
    struct FakeError;

    /// Scripted source: each `search` call pops the next cycle's result.
    /// Exhausted scripts return an empty, successful fetch.
    struct FakeSource {
        cycles: std::sync::Mutex<VecDeque<Result<Vec<Ticket>, FakeError>>>,
    }

    impl FakeSource {
        fn new(cycles: Vec<Result<Vec<Ticket>, FakeError>>) -> Arc<Self> {
            Arc::new(Self {
                cycles: std::sync::Mutex::new(cycles.into()),
            })
        }
    }

    impl TicketSource for FakeSource {
        type Error = FakeError;

        fn search(&self, _query: &str) -> Result<Vec<Ticket>, FakeError> {
            self.cycles
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn ticket(id: &str, type_id: &str, status: &str) -> Ticket {
        Ticket {
            id: id.into(),
            type_id: type_id.into(),
            type_name: String::new(),
            status: Some(status.into()),
            priority_id: None,
            priority_name: None,
            summary: String::new(),
            author: None,
        }
    }

    fn test_relay() -> RelayHandle {
        // A handle without a serving socket: broadcast still updates durable
        // state and feeds local subscribers.
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        RelayServer::new(addr, CancellationToken::new()).handle()
    }

    fn poller(source: Arc<FakeSource>, relay: RelayHandle) -> Poller<FakeSource> {
        Poller::new(
            source,
            relay,
            CategoryMap::default(),
            "issuetype = 11206".into(),
            Duration::from_secs(60),
        )
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Signal>) -> Vec<Signal> {
        let mut signals = Vec::new();
        while let Ok(s) = rx.try_recv() {
            signals.push(s);
        }
        signals
    }

    #[tokio::test]
    async fn first_cycle_records_backlog_without_signaling() {
        let source = FakeSource::new(vec![Ok(vec![
            ticket("T-1", "11206", "Created"),
            ticket("T-2", "13802", "Assigned"),
        ])]);
        let relay = test_relay();
        let mut rx = relay.subscribe();
        let poller = poller(source, relay);
        let handle = poller.handle();

        poller.poll_once().await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert!(!handle.is_first_cycle().await);
        assert_eq!(handle.active_count().await, 2);
    }

    #[tokio::test]
    async fn post_catchup_active_ticket_signals_once() {
        let source = FakeSource::new(vec![
            Ok(vec![]),
            Ok(vec![ticket("T-2", "13802", "Assigned")]),
            Ok(vec![ticket("T-2", "13802", "Assigned")]),
        ]);
        let relay = test_relay();
        let mut rx = relay.subscribe();
        let poller = poller(source, relay);

        // Cycle 1: empty but successful fetch clears the first-cycle flag.
        poller.poll_once().await.unwrap();
        // Cycle 2: T-2 appears, alert signal fires exactly once.
        poller.poll_once().await.unwrap();
        assert_eq!(drain(&mut rx), vec![Signal::YellowBlink]);
        // Cycle 3: unchanged, silence.
        poller.poll_once().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn backlog_resolution_emits_green_for_category() {
        let source = FakeSource::new(vec![
            Ok(vec![
                ticket("T-1", "11206", "Created"),
                ticket("T-3", "99999", "In Progress"),
            ]),
            Ok(vec![
                ticket("T-1", "11206", "Resolved"),
                ticket("T-3", "99999", "Closed"),
            ]),
        ]);
        let relay = test_relay();
        let mut rx = relay.subscribe();
        let poller = poller(source, relay);

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![Signal::GreenBlinkIncident, Signal::GreenBlink]
        );
    }

    #[tokio::test]
    async fn transport_error_skips_cycle_and_preserves_first_cycle() {
        let source = FakeSource::new(vec![
            Err(FakeError),
            Ok(vec![ticket("T-1", "11206", "Created")]),
        ]);
        let relay = test_relay();
        let mut rx = relay.subscribe();
        let poller = poller(source, relay);
        let handle = poller.handle();

        assert!(poller.poll_once().await.is_err());
        assert!(handle.is_first_cycle().await, "failed fetch must not end the catch-up pass");

        // The next successful cycle is still the catch-up pass: no signal.
        poller.poll_once().await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(handle.active_count().await, 1);
    }

    #[tokio::test]
    async fn unclassified_and_other_statuses_are_ignored() {
        let source = FakeSource::new(vec![
            Ok(vec![]),
            Ok(vec![ticket("T-9", "11206", "Triaging")]),
        ]);
        let relay = test_relay();
        let mut rx = relay.subscribe();
        let poller = poller(source, relay);
        let handle = poller.handle();

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(handle.active_count().await, 0);
    }

    #[tokio::test]
    async fn emitted_signals_update_relay_durable_state_only_for_queue() {
        // Poller emissions are all transient: durable state stays empty.
        let source = FakeSource::new(vec![
            Ok(vec![]),
            Ok(vec![ticket("T-1", "11206", "Created")]),
        ]);
        let relay = test_relay();
        let poller = poller(source, relay.clone());

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();

        assert_eq!(relay.queue_state().await, None);
    }

    #[tokio::test]
    async fn reset_forgets_tracked_tickets() {
        let source = FakeSource::new(vec![
            Ok(vec![]),
            Ok(vec![ticket("T-1", "11206", "Created")]),
            Ok(vec![ticket("T-1", "11206", "Created")]),
        ]);
        let relay = test_relay();
        let mut rx = relay.subscribe();
        let poller = poller(source, relay);
        let handle = poller.handle();

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();
        assert_eq!(drain(&mut rx), vec![Signal::RedBlink]);

        handle.reset().await;

        // Same ticket re-signals after the store was cleared.
        poller.poll_once().await.unwrap();
        assert_eq!(drain(&mut rx), vec![Signal::RedBlink]);
    }

    #[tokio::test]
    async fn run_loop_stops_on_cancel() {
        let source = FakeSource::new(vec![]);
        let relay = test_relay();
        let poller =
            poller(source, relay).with_start_delay(Duration::from_millis(5));
        let handle = poller.handle();

        let task = tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(2), handle.stop(task)).await;
        assert!(stopped.is_ok(), "stop should complete within its bound");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let source = FakeSource::new(vec![]);
        let relay = test_relay();
        let poller = poller(source, relay).with_start_delay(Duration::from_millis(5));
        let handle = poller.handle();

        handle.cancel();
        handle.cancel();

        // A cancelled poller exits before its first cycle.
        let task = tokio::spawn(poller.run());
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("cancelled poller should exit promptly")
            .unwrap();
    }
}
