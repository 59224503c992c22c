use serde_derive::Serialize;
use std::sync::{PoisonError, RwLock};

use crate::error::SourceError;
use crate::meter_reading::{MeterReading, SourceStatus};
use crate::register_encoder::RegisterTable;

/// What diagnostics consumers get to see.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub reading: MeterReading,
    pub status: SourceStatus,
}

#[derive(Debug, Default)]
struct Published {
    snapshot: Snapshot,
    registers: RegisterTable,
}

/// The single point of coupling between the acquisition cycle (only writer)
/// and the Modbus service. Every write swaps the whole value under one lock,
/// so readers never observe a half-updated table.
#[derive(Debug, Default)]
pub struct BridgeState {
    inner: RwLock<Published>,
}

impl BridgeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a freshly accepted reading and re-encodes the registers.
    pub fn publish_reading(&self, reading: MeterReading, http_code: Option<u16>, now_ms: u64) {
        let next = Published {
            snapshot: Snapshot {
                reading,
                status: SourceStatus::succeeded(http_code, now_ms),
            },
            registers: RegisterTable::encode(&reading),
        };
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Marks the source offline. The stored reading and its registers stay
    /// untouched so the master keeps seeing the last valid values.
    pub fn record_failure(&self, error: &SourceError, http_code: Option<u16>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let status = guard.snapshot.status.failed(error, http_code);
        guard.snapshot.status = status;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    pub fn status(&self) -> SourceStatus {
        self.snapshot().status
    }

    pub fn registers(&self) -> RegisterTable {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .registers
            .clone()
    }

    /// Runs `f` against the status and register table under one read lock.
    pub fn with_registers<T>(&self, f: impl FnOnce(&SourceStatus, &RegisterTable) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard.snapshot.status, &guard.registers)
    }
}
