//! Concurrency gate in front of the store engine.
//!
//! All store access funnels through here: reads share a lock, writes are
//! exclusive. A failed write restores the engine to its pre-operation
//! state before the lock is released, so later readers never observe a
//! half-applied operation. Destruction swaps the engine out under the
//! write lock; every operation after that fails with `StoreDestroyed`.

use crate::engine::StoreEngine;
use crate::error::{Result, StoreError};
use crate::types::OperationKind;
use parking_lot::RwLock;

enum GateState {
    Active(StoreEngine),
    Destroyed,
}

pub(crate) struct AccessGate {
    state: RwLock<GateState>,
}

impl AccessGate {
    pub(crate) fn new(engine: StoreEngine) -> Self {
        Self {
            state: RwLock::new(GateState::Active(engine)),
        }
    }

    /// Run a read-only operation under the shared lock.
    pub(crate) fn read<T>(&self, op: impl FnOnce(&StoreEngine) -> Result<T>) -> Result<T> {
        let guard = self.state.read();
        let GateState::Active(engine) = &*guard else {
            return Err(StoreError::StoreDestroyed);
        };
        tracing::trace!(kind = ?OperationKind::Read, "store access");
        op(engine)
    }

    /// Run a mutating operation under the exclusive lock.
    pub(crate) fn write<T>(&self, op: impl FnOnce(&mut StoreEngine) -> Result<T>) -> Result<T> {
        self.write_with_commit(op, |_| {})
    }

    /// Run a mutating operation and, once it has committed, invoke
    /// `on_commit` while the exclusive lock is still held.
    ///
    /// Change publication goes through `on_commit`: because it runs
    /// inside the lock, the publication order of concurrent writers is
    /// exactly their commit order.
    pub(crate) fn write_with_commit<T>(
        &self,
        op: impl FnOnce(&mut StoreEngine) -> Result<T>,
        on_commit: impl FnOnce(&T),
    ) -> Result<T> {
        let mut guard = self.state.write();
        let GateState::Active(engine) = &mut *guard else {
            return Err(StoreError::StoreDestroyed);
        };
        tracing::trace!(kind = ?OperationKind::Write, "store access");

        let checkpoint = engine.checkpoint();
        let value = match op(engine).and_then(|value| {
            engine.save_if_dirty()?;
            Ok(value)
        }) {
            Ok(value) => value,
            Err(err) => {
                engine.restore(checkpoint);
                return Err(err);
            }
        };
        on_commit(&value);
        Ok(value)
    }

    /// Wipe all rows, leaving the store usable. A destroyed store stays
    /// destroyed; resetting it is a successful no-op.
    pub(crate) fn reset(&self) -> Result<()> {
        let mut guard = self.state.write();
        match &mut *guard {
            GateState::Active(engine) => {
                let checkpoint = engine.checkpoint();
                engine.wipe().inspect_err(|_| engine.restore(checkpoint))
            }
            GateState::Destroyed => Ok(()),
        }
    }

    /// Tear the store down and delete its backing files. Idempotent.
    pub(crate) fn destroy(&self) -> Result<()> {
        let mut guard = self.state.write();
        match std::mem::replace(&mut *guard, GateState::Destroyed) {
            GateState::Active(mut engine) => engine.remove_backing_files(),
            GateState::Destroyed => Ok(()),
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        matches!(&*self.state.read(), GateState::Destroyed)
    }
}
