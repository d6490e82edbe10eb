//! Process-wide registry of concurrency gates.
//!
//! The registry always holds the default gate and lazily mints named
//! ("external semaphore") gates on first reference. Entries are never
//! evicted. Lookups and first-time creation go through the concurrent map's
//! entry API, so two racing first references to the same id observe one gate.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::{ConcurrencyGate, GateSnapshot, SharedGate, MAX_GATE_CAPACITY};
use crate::error::GateError;

/// Id of the gate used when a call names none
pub const DEFAULT_GATE_ID: &str = "default";

/// Registry of the default gate plus all named gates
#[derive(Debug)]
pub struct GateRegistry {
    default_gate: SharedGate,
    named: DashMap<String, SharedGate>,
    /// Capacity given to named gates that are referenced before registration
    fallback_capacity: usize,
}

impl GateRegistry {
    /// Create a registry whose default gate has `default_capacity` permits.
    ///
    /// Named gates referenced without prior registration get
    /// `fallback_capacity` permits.
    pub fn new(default_capacity: usize, fallback_capacity: usize) -> Result<Self, GateError> {
        if fallback_capacity == 0 || fallback_capacity > MAX_GATE_CAPACITY {
            return Err(GateError::invalid_capacity("<fallback>", fallback_capacity));
        }
        let default_gate = Arc::new(ConcurrencyGate::new(DEFAULT_GATE_ID, default_capacity)?);

        info!(default_capacity, fallback_capacity, "Gate registry initialized");

        Ok(Self { default_gate, named: DashMap::new(), fallback_capacity })
    }

    pub fn default_gate(&self) -> SharedGate {
        self.default_gate.clone()
    }

    /// Resolve the gate a call should acquire from.
    ///
    /// `None` and `"default"` map to the default gate. An unknown id is
    /// created with the fallback capacity; a known id returns the existing
    /// gate untouched.
    pub fn resolve(&self, requested: Option<&str>) -> Result<SharedGate, GateError> {
        let id = match requested {
            None => return Ok(self.default_gate()),
            Some(id) if id == DEFAULT_GATE_ID => return Ok(self.default_gate()),
            Some("") => return Err(GateError::EmptyId),
            Some(id) => id,
        };

        if let Some(existing) = self.named.get(id) {
            return Ok(existing.value().clone());
        }

        match self.named.entry(id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let gate = Arc::new(ConcurrencyGate::new(id, self.fallback_capacity)?);
                debug!(gate = id, capacity = self.fallback_capacity, "Created gate on first reference");
                Ok(entry.insert(gate).value().clone())
            }
        }
    }

    /// Register a named gate with an explicit capacity.
    ///
    /// Registering an id that already exists with the same capacity returns
    /// the existing gate. A different capacity is refused: a live gate's
    /// capacity never changes.
    pub fn register(&self, id: &str, capacity: usize) -> Result<SharedGate, GateError> {
        if id.is_empty() {
            return Err(GateError::EmptyId);
        }

        if id == DEFAULT_GATE_ID {
            return check_capacity(self.default_gate(), capacity);
        }

        match self.named.entry(id.to_string()) {
            Entry::Occupied(entry) => check_capacity(entry.get().clone(), capacity),
            Entry::Vacant(entry) => {
                let gate = Arc::new(ConcurrencyGate::new(id, capacity)?);
                info!(gate = id, capacity, "Registered gate");
                Ok(entry.insert(gate).value().clone())
            }
        }
    }

    /// Number of gates, including the default one
    pub fn gate_count(&self) -> usize {
        self.named.len() + 1
    }

    /// Capacity and held permits of every gate, keyed by id
    pub fn snapshot(&self) -> BTreeMap<String, GateSnapshot> {
        let mut gates: BTreeMap<String, GateSnapshot> = self
            .named
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        gates.insert(DEFAULT_GATE_ID.to_string(), self.default_gate.snapshot());
        gates
    }
}

fn check_capacity(gate: SharedGate, requested: usize) -> Result<SharedGate, GateError> {
    if gate.capacity() == requested {
        return Ok(gate);
    }

    warn!(
        gate = gate.id(),
        registered = gate.capacity(),
        requested,
        "Refusing to change capacity of a registered gate"
    );
    Err(GateError::CapacityConflict {
        id: gate.id().to_string(),
        registered: gate.capacity(),
        requested,
    })
}
