//! Outcome of a single call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::exception::RemoteException;
use crate::param::{HandleId, ObjectId};

/// Output index reserved for the return value.
pub const RETURN_VALUE: i32 = -1;

/// A value produced by a call, left inside the worker behind a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlot {
    /// Worker-side handle holding the value.
    pub handle: HandleId,
    /// Identity of the object behind the handle.
    pub object: ObjectId,
    /// Type declared by the resolved call for this position.
    pub declared_type: String,
    /// Runtime type of the produced object.
    pub actual_type: String,
}

/// Either a failure or the set of produced outputs, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallResult {
    /// The callee failed.
    Failed {
        /// Decoded failure.
        exception: RemoteException,
    },
    /// The callee completed.
    Completed {
        /// Output slots keyed by parameter position, with
        /// [`RETURN_VALUE`] for the return value. A requested output that
        /// produced nothing maps to `None`.
        outputs: BTreeMap<i32, Option<OutputSlot>>,
    },
}

impl CallResult {
    /// A failed result.
    #[must_use]
    pub const fn failed(exception: RemoteException) -> Self {
        Self::Failed { exception }
    }

    /// A completed result.
    #[must_use]
    pub const fn completed(outputs: BTreeMap<i32, Option<OutputSlot>>) -> Self {
        Self::Completed { outputs }
    }

    /// True when the callee failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns the failure without raising it.
    #[must_use]
    pub const fn throwable(&self) -> Option<&RemoteException> {
        match self {
            Self::Failed { exception } => Some(exception),
            Self::Completed { .. } => None,
        }
    }

    /// Returns the output at `index`.
    ///
    /// # Errors
    ///
    /// Returns the callee's exception when the call failed.
    pub fn output(&self, index: i32) -> Result<Option<&OutputSlot>, RemoteException> {
        match self {
            Self::Failed { exception } => Err(exception.clone()),
            Self::Completed { outputs } => Ok(outputs.get(&index).and_then(Option::as_ref)),
        }
    }

    /// Iterates over every populated output.
    pub fn outputs(&self) -> impl Iterator<Item = (i32, &OutputSlot)> {
        let slots = match self {
            Self::Completed { outputs } => Some(outputs),
            Self::Failed { .. } => None,
        };
        slots
            .into_iter()
            .flat_map(|map| map.iter())
            .filter_map(|(index, slot)| slot.as_ref().map(|found| (*index, found)))
    }

    /// Converts into a standard result.
    ///
    /// # Errors
    ///
    /// Returns the callee's exception when the call failed.
    pub fn into_result(self) -> Result<BTreeMap<i32, Option<OutputSlot>>, RemoteException> {
        match self {
            Self::Failed { exception } => Err(exception),
            Self::Completed { outputs } => Ok(outputs),
        }
    }
}

#[cfg(test)]
mod tests;
