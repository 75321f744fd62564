// Copyright (c) 2025 BorealDB Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Opaque handle allocation and validation.
//!
//! Guest runtimes never see raw pointers. Every core-owned object is
//! identified by a `{id, magic}` pair: `id` indexes a slot, `magic` is a
//! random value regenerated on every allocation of that slot. A freed or
//! reused slot therefore rejects stale duplicates of the old handle.
//!
//! Validation is the sole safety boundary against cross-language
//! use-after-free, so it precedes every dispatched operation.

use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, RwLock};
use tracing::trace;

/// The three object kinds exposed through the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Database,
    Connection,
    Statement,
}

impl HandleKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandleKind::Database => "database",
            HandleKind::Connection => "connection",
            HandleKind::Statement => "statement",
        }
    }
}

/// An opaque identifier for a core-owned object.
///
/// Valid iff the slot at `id` is occupied, its stored magic equals `magic`,
/// and the table's kind equals `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub id: u64,
    pub magic: u64,
    pub kind: HandleKind,
}

struct Slot<T> {
    magic: u64,
    value: Option<Arc<Mutex<T>>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

/// Allocates, validates, and frees handles for one object kind.
///
/// The lock guards only slot bookkeeping. Session objects live behind their
/// own `Mutex` inside the slot, so validation never blocks on an in-flight
/// operation against another handle.
pub struct HandleTable<T> {
    kind: HandleKind,
    inner: RwLock<Slots<T>>,
}

impl<T> HandleTable<T> {
    pub fn new(kind: HandleKind) -> Self {
        HandleTable {
            kind,
            inner: RwLock::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Allocate a slot for `value`, reusing a freed slot when one exists.
    ///
    /// The magic is freshly generated on every allocation, so a recycled id
    /// never validates against a stale handle.
    pub fn allocate(&self, value: T) -> Handle {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let magic = rand::random::<u64>();
        let id = match inner.free.pop() {
            Some(index) => {
                inner.slots[index] = Slot {
                    magic,
                    value: Some(Arc::new(Mutex::new(value))),
                };
                index
            }
            None => {
                inner.slots.push(Slot {
                    magic,
                    value: Some(Arc::new(Mutex::new(value))),
                });
                inner.slots.len() - 1
            }
        };
        let handle = Handle {
            id: id as u64,
            magic,
            kind: self.kind,
        };
        trace!(target: "handle_table", kind = self.kind.name(), id = handle.id, "handle allocated");
        handle
    }

    /// Resolve a handle to its session object.
    ///
    /// Fails on kind mismatch, out-of-range id, freed slot, or magic
    /// mismatch. Returns a clone of the slot's `Arc` so the caller can lock
    /// the session after the table lock is released.
    pub fn validate(&self, handle: Handle) -> Result<Arc<Mutex<T>>> {
        if handle.kind != self.kind {
            return Err(Error::invalid_argument().message(format!(
                "expected a {} handle, got a {} handle",
                self.kind.name(),
                handle.kind.name()
            )));
        }
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let slot = inner.slots.get(handle.id as usize).ok_or_else(|| {
            Error::not_found().message(format!("{} handle {} does not exist", self.kind.name(), handle.id))
        })?;
        match slot.value.as_ref() {
            Some(value) if slot.magic == handle.magic => Ok(Arc::clone(value)),
            _ => Err(Error::invalid_state()
                .message(format!("{} handle {} is stale or released", self.kind.name(), handle.id))),
        }
    }

    /// Mark the slot free and invalidate its magic.
    ///
    /// Returns the removed session object so the caller can release owned
    /// native resources outside the table lock. Does not free session data
    /// itself. A second free of the same handle fails validation.
    pub fn free(&self, handle: Handle) -> Result<Arc<Mutex<T>>> {
        if handle.kind != self.kind {
            return Err(Error::invalid_argument().message(format!(
                "expected a {} handle, got a {} handle",
                self.kind.name(),
                handle.kind.name()
            )));
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let index = handle.id as usize;
        let slot = inner.slots.get_mut(index).ok_or_else(|| {
            Error::not_found().message(format!("{} handle {} does not exist", self.kind.name(), handle.id))
        })?;
        if slot.magic != handle.magic {
            return Err(Error::invalid_state()
                .message(format!("{} handle {} is stale or released", self.kind.name(), handle.id)));
        }
        let value = slot.value.take().ok_or_else(|| {
            Error::invalid_state()
                .message(format!("{} handle {} was already released", self.kind.name(), handle.id))
        })?;
        slot.magic = 0;
        inner.free.push(index);
        trace!(target: "handle_table", kind = self.kind.name(), id = handle.id, "handle freed");
        Ok(value)
    }
}
