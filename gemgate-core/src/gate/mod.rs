//! Concurrency gates for backend admission control.
//!
//! A gate bounds the number of simultaneous in-flight backend calls. Every
//! call holds one permit between acquiring it and finishing; callers beyond
//! the capacity are suspended (not spinning) until a permit is returned.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │           Batches / individual calls (any count)         │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ resolve(gate_id?)
//!                    ┌────────▼────────┐
//!                    │  GateRegistry   │ ← "default" + named gates
//!                    └────────┬────────┘
//!                             │ acquire()
//!                    ┌────────▼────────┐
//!                    │ ConcurrencyGate │ ← Semaphore(capacity)
//!                    └────────┬────────┘
//!                             │ ≤ capacity in flight
//!                    ┌────────▼────────┐
//!                    │     Backend     │
//!                    └─────────────────┘
//! ```
//!
//! Permits are RAII guards: dropping a [`GatePermit`] releases it, so every
//! exit path of a call (success, failure, timeout, panic) gives the permit
//! back.

mod registry;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::GateError;

pub use registry::{GateRegistry, DEFAULT_GATE_ID};

/// Largest capacity a gate accepts
pub const MAX_GATE_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// A counting-permit gate with a fixed capacity
#[derive(Debug)]
pub struct ConcurrencyGate {
    id: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    /// Create a gate. Capacity must be in `1..=MAX_GATE_CAPACITY`.
    pub fn new(id: impl Into<String>, capacity: usize) -> Result<Self, GateError> {
        let id = id.into();
        if capacity == 0 || capacity > MAX_GATE_CAPACITY {
            return Err(GateError::invalid_capacity(id, capacity));
        }

        Ok(Self { id, capacity, semaphore: Arc::new(Semaphore::new(capacity)) })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held by in-flight calls
    pub fn held(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Permits available right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait until a permit is free and take it
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed { id: self.id.clone() })?;

        Ok(GatePermit { gate_id: self.id.clone(), _permit: permit })
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(GatePermit { gate_id: self.id.clone(), _permit: permit })
    }

    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot { capacity: self.capacity, held: self.held() }
    }
}

/// One unit of gate capacity. Released on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate_id: String,
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// The gate this permit belongs to
    pub fn gate_id(&self) -> &str {
        &self.gate_id
    }

    /// Give the permit back explicitly
    pub fn release(self) {
        drop(self);
    }
}

/// Point-in-time view of one gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub capacity: usize,
    pub held: usize,
}

/// Shared handle to a gate
pub type SharedGate = Arc<ConcurrencyGate>;
