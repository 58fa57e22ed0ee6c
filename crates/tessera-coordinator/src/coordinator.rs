//! The coordinator handle
//!
//! One `Coordinator` wraps the module store for a chain. Validators feed it
//! messages in transaction order and call [`Coordinator::end_block`] once per
//! block; every state change is a pure function of the store, the block
//! context and the messages, so all validators agree.

use std::sync::Arc;

use tracing::debug;

use tessera_core::{metrics, CacheStore, KvStore, MetricsSink};

use crate::callbacks::{CallbackRouter, TssCallback};
use crate::error::Result;
use crate::events::Event;
use crate::params::Params;
use crate::types::{BlockContext, GroupStatus};

pub struct Coordinator<S: KvStore> {
    pub(crate) store: S,
    pub(crate) params: Params,
    pub(crate) block: BlockContext,
    pub(crate) events: Vec<Event>,
    pub(crate) callbacks: CallbackRouter,
    pub(crate) metrics: Arc<dyn MetricsSink>,
}

impl<S: KvStore> Coordinator<S> {
    pub fn new(store: S, params: Params, block: BlockContext) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            store,
            params,
            block,
            events: Vec::new(),
            callbacks: CallbackRouter::new(),
            metrics: metrics::noop(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Route callbacks for groups owned by `module`
    pub fn add_callback(&mut self, module: impl Into<String>, callback: Arc<dyn TssCallback>) {
        self.callbacks.add_route(module, callback);
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn set_params(&mut self, params: Params) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn block(&self) -> &BlockContext {
        &self.block
    }

    /// Enter a new block; messages delivered afterwards see this context
    pub fn begin_block(&mut self, block: BlockContext) {
        debug!(height = block.height, "begin block");
        self.block = block;
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub(crate) fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Run `f` against a write buffer over this store
    ///
    /// On `Ok` the buffered writes and events are applied here; on `Err` (or
    /// a panic unwinding through) both are dropped and this store is untouched.
    pub(crate) fn with_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Coordinator<CacheStore<&mut S>>) -> Result<T>,
    {
        let mut tx = Coordinator {
            store: CacheStore::new(&mut self.store),
            params: self.params.clone(),
            block: self.block.clone(),
            events: Vec::new(),
            callbacks: self.callbacks.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let value = f(&mut tx)?;
        let Coordinator { store, events, .. } = tx;
        store.commit();
        self.events.extend(events);
        Ok(value)
    }

    /// Notify owning modules about committed outcomes
    pub(crate) fn dispatch_callbacks(&self, events: &[Event]) {
        for event in events {
            let Some(module) = self.owner_of(event) else {
                continue;
            };
            let Some(callback) = self.callbacks.route(&module) else {
                continue;
            };
            match event {
                Event::Round3Complete { group_id, .. } => callback.on_group_creation_completed(*group_id),
                Event::Round3Failed { group_id, .. } => callback.on_group_creation_failed(*group_id),
                Event::GroupExpired { group_id } => callback.on_group_creation_expired(*group_id),
                Event::SigningSuccess {
                    signing_id,
                    signature,
                    ..
                } => callback.on_signing_completed(*signing_id, signature),
                Event::SigningFailed {
                    signing_id, reason, ..
                } => callback.on_signing_failed(*signing_id, reason),
                Event::SigningTimeout {
                    signing_id,
                    idle_members,
                    ..
                } => callback.on_signing_timeout(*signing_id, idle_members),
                _ => {}
            }
        }
    }

    fn owner_of(&self, event: &Event) -> Option<String> {
        let group_id = match event.group_id() {
            Some(group_id) => group_id,
            None => self.get_signing(event.signing_id()?).ok()?.group_id,
        };
        self.get_group(group_id).ok().map(|g| g.module_owner)
    }

    /// Number of groups in each status, for gauges
    pub(crate) fn report_group_gauges(&self) {
        let mut active = 0u64;
        let mut in_dkg = 0u64;
        for group in self.get_groups() {
            match group.status {
                GroupStatus::Active => active += 1,
                s if s.in_dkg() => in_dkg += 1,
                _ => {}
            }
        }
        self.metrics.gauge("tss_groups_active", active as f64);
        self.metrics.gauge("tss_groups_in_dkg", in_dkg as f64);
    }
}
