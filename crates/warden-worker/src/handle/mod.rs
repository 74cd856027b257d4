//! Capability handles for sandbox-resident objects.
//!
//! A [`SandboxObject`] is the single owning reference to one live object. It
//! moves from live to destroyed at most once, either through an explicit
//! release or because the call protocol consumed it. Destroying a handle
//! drops both the object and the resolved call that created it. The declared
//! type stays readable; reading the value fails.
//!
//! Handles live in a [`HandleTable`] keyed by [`HandleId`]. Destroying through
//! the table also drops the entry, so later lookups report the handle as
//! destroyed. The table lock only guards the map; each handle carries its own
//! lock, so work on one object never blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use warden_core::{HandleId, ObjectId, OutputSlot, RemoteException};

use crate::object::Object;
use crate::resolved::ResolvedCall;
use crate::sync::lock;

const HANDLE_TARGET: &str = "warden_worker::handle";

enum HandleState {
    Live {
        object: Object,
        origin: Option<Arc<ResolvedCall>>,
    },
    Destroyed,
}

/// The owning reference to one sandbox-resident object.
pub struct SandboxObject {
    id: HandleId,
    declared_type: String,
    state: Mutex<HandleState>,
}

impl SandboxObject {
    /// Wraps an object, or returns `None` for a null object.
    #[must_use]
    pub fn create(
        id: HandleId,
        origin: Option<Arc<ResolvedCall>>,
        declared_type: impl Into<String>,
        object: Option<Object>,
    ) -> Option<Arc<Self>> {
        object.map(|live| {
            Arc::new(Self {
                id,
                declared_type: declared_type.into(),
                state: Mutex::new(HandleState::Live {
                    object: live,
                    origin,
                }),
            })
        })
    }

    /// Table key of this handle.
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// Type promised by the call that created the handle.
    #[must_use]
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// Runtime type of the live object, empty once destroyed.
    #[must_use]
    pub fn actual_type(&self) -> String {
        match &*lock(&self.state) {
            HandleState::Live { object, .. } => object.type_name().to_owned(),
            HandleState::Destroyed => String::new(),
        }
    }

    /// Identity of the live object.
    #[must_use]
    pub fn object_id(&self) -> Option<ObjectId> {
        match &*lock(&self.state) {
            HandleState::Live { object, .. } => Some(object.id()),
            HandleState::Destroyed => None,
        }
    }

    /// Resolved call that produced the handle, while the handle is live.
    #[must_use]
    pub fn origin(&self) -> Option<Arc<ResolvedCall>> {
        match &*lock(&self.state) {
            HandleState::Live { origin, .. } => origin.clone(),
            HandleState::Destroyed => None,
        }
    }

    /// Runs `f` against the live object.
    ///
    /// # Errors
    ///
    /// Returns a handle-destroyed exception once the handle is released, or
    /// whatever `f` returns.
    pub fn with_value<R>(
        &self,
        f: impl FnOnce(&mut Object) -> Result<R, RemoteException>,
    ) -> Result<R, RemoteException> {
        match &mut *lock(&self.state) {
            HandleState::Live { object, .. } => f(object),
            HandleState::Destroyed => Err(RemoteException::handle_destroyed()),
        }
    }

    /// Releases the object and its creator. Later calls do nothing.
    pub fn destroy(&self) {
        let released = std::mem::replace(&mut *lock(&self.state), HandleState::Destroyed);
        if matches!(released, HandleState::Live { .. }) {
            debug!(target: HANDLE_TARGET, handle = %self.id, "handle destroyed");
        }
    }

    /// Whether the handle has been released.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        matches!(*lock(&self.state), HandleState::Destroyed)
    }

    /// Describes the handle as a call output.
    #[must_use]
    pub fn output_slot(&self) -> Option<OutputSlot> {
        let state = lock(&self.state);
        let HandleState::Live { object, .. } = &*state else {
            return None;
        };
        Some(OutputSlot {
            handle: self.id,
            object: object.id(),
            declared_type: self.declared_type.clone(),
            actual_type: object.type_name().to_owned(),
        })
    }
}

impl std::fmt::Debug for SandboxObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxObject")
            .field("id", &self.id)
            .field("declared_type", &self.declared_type)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

/// All handles owned by one worker.
#[derive(Debug)]
pub struct HandleTable {
    next: AtomicU64,
    handles: Mutex<HashMap<HandleId, Arc<SandboxObject>>>,
}

impl HandleTable {
    /// Creates an empty table. Handle ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new handle for `object`, or returns `None` for a null
    /// object.
    pub fn insert(
        &self,
        origin: Option<Arc<ResolvedCall>>,
        declared_type: impl Into<String>,
        object: Option<Object>,
    ) -> Option<Arc<SandboxObject>> {
        let object = object?;
        let id = HandleId::new(self.next.fetch_add(1, Ordering::Relaxed));
        let handle = SandboxObject::create(id, origin, declared_type, Some(object))?;
        lock(&self.handles).insert(id, Arc::clone(&handle));
        debug!(
            target: HANDLE_TARGET,
            handle = %id,
            declared_type = handle.declared_type(),
            "handle created"
        );
        Some(handle)
    }

    /// Looks up a handle.
    ///
    /// # Errors
    ///
    /// Returns a handle-destroyed exception for unknown ids, which covers
    /// handles already swept by a collection.
    pub fn get(&self, id: HandleId) -> Result<Arc<SandboxObject>, RemoteException> {
        lock(&self.handles)
            .get(&id)
            .cloned()
            .ok_or_else(RemoteException::handle_destroyed)
    }

    /// Destroys a handle and drops it from the table. Unknown ids are
    /// ignored.
    pub fn destroy(&self, id: HandleId) {
        let removed = lock(&self.handles).remove(&id);
        if let Some(handle) = removed {
            handle.destroy();
        }
    }

    /// Removes handles destroyed without going through the table, returning
    /// how many were removed.
    pub fn sweep(&self) -> usize {
        let mut handles = lock(&self.handles);
        let before = handles.len();
        handles.retain(|_, handle| !handle.is_destroyed());
        before.saturating_sub(handles.len())
    }

    /// Number of handles in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
