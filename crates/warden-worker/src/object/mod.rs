//! Sandbox-resident values.
//!
//! Every value a call touches lives in an [`Object`]: an identity plus either
//! the still-encoded payload it arrived as, or a materialised Rust value.
//! Payloads are only decoded when code asks for a concrete type, so values
//! that merely pass through a worker keep their exact encoded bytes.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use warden_core::{CodecError, ObjectId, ParceledPayload, RemoteException, WireValue};

/// A value that can live inside the worker.
///
/// Implemented for every [`WireValue`]; application types opt in by
/// implementing [`WireValue`] with their component name as `TYPE_NAME`.
pub trait SandboxValue: Any + Send {
    /// Runtime type name.
    fn type_name(&self) -> &'static str;

    /// Encodes the value for marshaling out of the worker.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when serialisation fails.
    fn encode(&self) -> Result<ParceledPayload, CodecError>;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Owned upcast for downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: WireValue + Send + 'static> SandboxValue for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn encode(&self) -> Result<ParceledPayload, CodecError> {
        ParceledPayload::encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

enum Contents {
    Encoded(ParceledPayload),
    Live(Box<dyn SandboxValue>),
}

/// A value with a stable identity inside one worker.
pub struct Object {
    id: ObjectId,
    contents: Contents,
}

impl Object {
    pub(crate) fn live(id: ObjectId, value: Box<dyn SandboxValue>) -> Self {
        Self {
            id,
            contents: Contents::Live(value),
        }
    }

    pub(crate) const fn encoded(id: ObjectId, payload: ParceledPayload) -> Self {
        Self {
            id,
            contents: Contents::Encoded(payload),
        }
    }

    /// Identity assigned when the object entered the worker.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// Runtime type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match &self.contents {
            Contents::Encoded(payload) => payload.type_name(),
            Contents::Live(value) => value.type_name(),
        }
    }

    /// Encodes the object, reusing the original bytes when it was never
    /// decoded.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when a live value fails to serialise.
    pub fn encode(&self) -> Result<ParceledPayload, CodecError> {
        match &self.contents {
            Contents::Encoded(payload) => Ok(payload.clone()),
            Contents::Live(value) => value.encode(),
        }
    }

    /// Borrows the object as `T`, decoding the payload on first access.
    ///
    /// # Errors
    ///
    /// Returns an illegal-argument exception when the object holds another
    /// type or its payload does not decode.
    pub fn get<T: WireValue + Send + 'static>(&mut self) -> Result<&T, RemoteException> {
        self.materialise::<T>()?;
        let Contents::Live(value) = &self.contents else {
            return Err(type_mismatch::<T>(self.type_name()));
        };
        let found = value.type_name();
        value
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| type_mismatch::<T>(found))
    }

    /// Mutably borrows the object as `T`, decoding the payload on first
    /// access.
    ///
    /// # Errors
    ///
    /// As for [`Object::get`].
    pub fn get_mut<T: WireValue + Send + 'static>(&mut self) -> Result<&mut T, RemoteException> {
        self.materialise::<T>()?;
        let Contents::Live(value) = &mut self.contents else {
            return Err(type_mismatch::<T>(""));
        };
        let found = value.type_name();
        value
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| type_mismatch::<T>(found))
    }

    /// Consumes the object as `T`.
    ///
    /// # Errors
    ///
    /// As for [`Object::get`].
    pub fn into_value<T: WireValue + Send + 'static>(mut self) -> Result<T, RemoteException> {
        self.materialise::<T>()?;
        let found = self.type_name().to_owned();
        match self.contents {
            Contents::Live(value) => value
                .into_any()
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| type_mismatch::<T>(&found)),
            Contents::Encoded(_) => Err(type_mismatch::<T>(&found)),
        }
    }

    fn materialise<T: WireValue + Send + 'static>(&mut self) -> Result<(), RemoteException> {
        if let Contents::Encoded(payload) = &self.contents {
            let value: T = payload
                .decode()
                .map_err(|error| RemoteException::illegal_argument(error.to_string()))?;
            self.contents = Contents::Live(Box::new(value));
        }
        Ok(())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("type_name", &self.type_name())
            .field(
                "encoded",
                &matches!(self.contents, Contents::Encoded(_)),
            )
            .finish()
    }
}

fn type_mismatch<T: WireValue>(found: &str) -> RemoteException {
    RemoteException::illegal_argument(format!(
        "expected {}, found {found}",
        T::TYPE_NAME
    ))
}

/// Allocates object identities for one worker.
#[derive(Debug)]
pub struct ObjectIds {
    next: AtomicU64,
}

impl ObjectIds {
    /// Creates an allocator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh identity.
    #[must_use]
    pub fn allocate(&self) -> ObjectId {
        ObjectId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a Rust value in a new object.
    #[must_use]
    pub fn wrap<T: SandboxValue>(&self, value: T) -> Object {
        Object::live(self.allocate(), Box::new(value))
    }

    /// Wraps an encoded payload in a new object without decoding it.
    #[must_use]
    pub fn wrap_encoded(&self, payload: ParceledPayload) -> Object {
        Object::encoded(self.allocate(), payload)
    }
}

impl Default for ObjectIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
