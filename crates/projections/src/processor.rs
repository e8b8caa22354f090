//! Projection processor for feeding events to projections.

use event_store::{EventEnvelope, EventId, EventStore};
use futures_util::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use crate::Result;
use crate::projection::Projection;

/// Processes events from an event store and delivers them to projections.
///
/// The processor supports:
/// - Catch-up: replays all events from the store to bring projections up to date
/// - Live tailing: subscribes to the store and delivers committed events as they arrive
/// - Single event delivery: delivers one event to all projections
/// - Rebuild: resets all projections and replays from scratch
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    /// Creates a new processor with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
        }
    }

    /// Registers a projection with this processor.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Runs catch-up processing: streams all events from the store and delivers
    /// them to each projection that hasn't already seen them.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<()> {
        let seen = self.catch_up_collecting().await?;
        tracing::info!(events_processed = seen.len(), "catch-up complete");
        Ok(())
    }

    /// Delivers a single event to all registered projections.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Resets all projections and replays all events from the store.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        self.run_catch_up().await
    }

    /// Tails the store's live event feed until `shutdown` flips to true.
    ///
    /// Subscribes before the initial catch-up so no event committed in
    /// between is missed. Events the catch-up pass already delivered can
    /// arrive again on the channel; those are recognized by event id and
    /// skipped. A lagged subscriber falls back to another catch-up pass.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run_live(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut rx = self.store.subscribe();
        let mut replayed = self.catch_up_collecting().await?;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        if replayed.remove(&event.event_id) {
                            continue;
                        }
                        // The channel delivers in commit order, so a genuinely
                        // new event means the replay overlap is behind us.
                        replayed.clear();
                        self.process_event(&event).await?;
                        metrics::counter!("projections_events_processed")
                            .increment(self.projections.len() as u64);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "subscriber lagged, replaying from store");
                        replayed = self.catch_up_collecting().await?;
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("event store subscription closed");
                        return Ok(());
                    }
                },
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("live projection feed shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Catch-up pass that remembers which event ids it delivered, so the
    /// live loop can discard channel duplicates from the overlap window.
    async fn catch_up_collecting(&self) -> Result<std::collections::HashSet<EventId>> {
        let mut stream = self.store.stream_all_events().await?;
        let mut event_index: u64 = 0;
        let mut seen = std::collections::HashSet::new();

        while let Some(result) = stream.next().await {
            let event = result?;
            event_index += 1;
            seen.insert(event.event_id);

            for projection in &self.projections {
                let pos = projection.position().await;
                if pos.events_processed < event_index {
                    projection.handle(&event).await?;
                    metrics::counter!("projections_events_processed").increment(1);
                }
            }
        }

        Ok(seen)
    }
}
