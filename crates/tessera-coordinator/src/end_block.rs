//! Once-per-block sweeps

use std::time::Instant;

use tracing::{debug, error};

use tessera_core::KvStore;

use crate::coordinator::Coordinator;
use crate::events::Event;

impl<S: KvStore> Coordinator<S> {
    /// Run the end-of-block pass and return the events it produced
    ///
    /// Order: queued round transitions, group expiry, then signing
    /// aggregation, signing expiry and retries. A failing step is logged and
    /// the remaining steps still run.
    pub fn end_block(&mut self) -> Vec<Event> {
        let started = Instant::now();
        let height = self.block.height;

        if let Err(e) = self.process_pending_groups() {
            error!(height, error = %e, "group processing failed");
        }
        if let Err(e) = self.handle_expired_groups() {
            error!(height, error = %e, "group expiry sweep failed");
        }
        if let Err(e) = self.handle_signing_end_block() {
            error!(height, error = %e, "signing sweep failed");
        }
        self.report_group_gauges();

        let events = self.take_events();
        self.dispatch_callbacks(&events);
        self.metrics
            .observe("tss_end_block_seconds", started.elapsed().as_secs_f64());
        debug!(height, events = events.len(), "end block");
        events
    }
}
