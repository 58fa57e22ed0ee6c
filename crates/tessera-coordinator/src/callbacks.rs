//! Hooks for the module that owns a group
//!
//! Callbacks run after the surrounding transaction has committed, so a
//! rolled-back retry never notifies anyone.

use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_core::{GroupId, Signature, SigningId};

use crate::types::Address;

pub trait TssCallback: Send + Sync {
    fn on_group_creation_completed(&self, _group_id: GroupId) {}

    fn on_group_creation_failed(&self, _group_id: GroupId) {}

    fn on_group_creation_expired(&self, _group_id: GroupId) {}

    fn on_signing_completed(&self, _signing_id: SigningId, _signature: &Signature) {}

    fn on_signing_failed(&self, _signing_id: SigningId, _reason: &str) {}

    /// `idle_members` never submitted a share before the deadline
    fn on_signing_timeout(&self, _signing_id: SigningId, _idle_members: &[Address]) {}
}

/// Callbacks keyed by module tag
#[derive(Clone, Default)]
pub struct CallbackRouter {
    routes: BTreeMap<String, Arc<dyn TssCallback>>,
}

impl CallbackRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, module: impl Into<String>, callback: Arc<dyn TssCallback>) {
        self.routes.insert(module.into(), callback);
    }

    pub fn route(&self, module: &str) -> Option<&Arc<dyn TssCallback>> {
        self.routes.get(module)
    }
}

impl std::fmt::Debug for CallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRouter")
            .field("modules", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Records every call; handy for tests and the devnet
#[derive(Debug, Default)]
pub struct RecordingCallback {
    calls: std::sync::Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl TssCallback for RecordingCallback {
    fn on_group_creation_completed(&self, group_id: GroupId) {
        self.record(format!("group_completed:{}", group_id));
    }

    fn on_group_creation_failed(&self, group_id: GroupId) {
        self.record(format!("group_failed:{}", group_id));
    }

    fn on_group_creation_expired(&self, group_id: GroupId) {
        self.record(format!("group_expired:{}", group_id));
    }

    fn on_signing_completed(&self, signing_id: SigningId, _signature: &Signature) {
        self.record(format!("signing_completed:{}", signing_id));
    }

    fn on_signing_failed(&self, signing_id: SigningId, _reason: &str) {
        self.record(format!("signing_failed:{}", signing_id));
    }

    fn on_signing_timeout(&self, signing_id: SigningId, idle_members: &[Address]) {
        self.record(format!("signing_timeout:{}:{}", signing_id, idle_members.len()));
    }
}
