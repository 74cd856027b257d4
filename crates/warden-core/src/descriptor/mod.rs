//! Call descriptors: what a resolved call invokes.
//!
//! A descriptor names a component, an optional method, and the ordered
//! parameter type names. The canonical string form doubles as the key used by
//! logs, manifests, and event subscriptions:
//!
//! | Kind        | Form                          |
//! |-------------|-------------------------------|
//! | instance    | `pkg/Class#method(A, B)`      |
//! | static      | `pkg/Class::method(A, B)`     |
//! | constructor | `new pkg/Class(A, B)`         |
//!
//! Parameter types are either a registered [`WireValue`] type name or a
//! component name for sandbox-resident objects passed by handle. Anything else
//! cannot cross the boundary and is rejected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{WIRE_TYPE_NAMES, WireValue};
use crate::component::{ComponentName, NameError};

const CONSTRUCTOR_PREFIX: &str = "new ";
const STATIC_SEPARATOR: &str = "::";
const INSTANCE_SEPARATOR: char = '#';

/// Errors raised when building or parsing descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The descriptor text does not follow any canonical form.
    #[error("malformed call descriptor '{input}': {reason}")]
    Malformed {
        /// Offending input.
        input: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The method name is not a valid identifier.
    #[error("invalid method name '{method}'")]
    InvalidMethod {
        /// Offending method name.
        method: String,
    },

    /// A parameter type cannot be marshaled.
    #[error("type '{type_name}' cannot cross the sandbox boundary")]
    UnsupportedType {
        /// Offending type name.
        type_name: String,
    },

    /// The component part is not a valid name.
    #[error(transparent)]
    Component(#[from] NameError),
}

/// Shape of the invocation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    /// Method invoked on a receiver object.
    Instance,
    /// Method invoked without a receiver.
    Static,
    /// Object construction.
    Constructor,
}

/// Immutable description of a call target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallDescriptor {
    kind: CallKind,
    component: ComponentName,
    method: Option<String>,
    param_types: Vec<String>,
}

impl CallDescriptor {
    /// Describes an instance method.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the method or a type name is invalid.
    pub fn instance<I, S>(
        component: ComponentName,
        method: &str,
        param_types: I,
    ) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::checked(CallKind::Instance, component, Some(method), param_types)
    }

    /// Describes a static method.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the method or a type name is invalid.
    pub fn static_method<I, S>(
        component: ComponentName,
        method: &str,
        param_types: I,
    ) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::checked(CallKind::Static, component, Some(method), param_types)
    }

    /// Describes a constructor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::UnsupportedType`] for invalid type names.
    pub fn constructor<I, S>(component: ComponentName, param_types: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::checked(CallKind::Constructor, component, None, param_types)
    }

    fn checked<I, S>(
        kind: CallKind,
        component: ComponentName,
        method: Option<&str>,
        types: I,
    ) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(name) = method {
            validate_method(name)?;
        }
        let param_types = types
            .into_iter()
            .map(Into::into)
            .map(|type_name| validate_type(&type_name).map(|()| type_name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind,
            component,
            method: method.map(str::to_owned),
            param_types,
        })
    }

    /// Returns the call shape.
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        self.kind
    }

    /// Returns the component the call targets.
    #[must_use]
    pub const fn component(&self) -> &ComponentName {
        &self.component
    }

    /// Returns the method name, absent for constructors.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Returns the declared parameter types, excluding any receiver.
    #[must_use]
    pub fn param_types(&self) -> &[String] {
        &self.param_types
    }

    /// Number of arguments a call must supply, including the receiver of an
    /// instance method.
    #[must_use]
    pub fn arity(&self) -> usize {
        match self.kind {
            CallKind::Instance => self.param_types.len().saturating_add(1),
            CallKind::Static | CallKind::Constructor => self.param_types.len(),
        }
    }

    /// Returns the receiver type for instance methods.
    #[must_use]
    pub fn receiver_type(&self) -> Option<String> {
        matches!(self.kind, CallKind::Instance).then(|| self.component.to_string())
    }

    /// Returns the same target with a different parameter list.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::UnsupportedType`] for invalid type names.
    pub fn with_param_types<I, S>(&self, param_types: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::checked(
            self.kind,
            self.component.clone(),
            self.method.as_deref(),
            param_types,
        )
    }
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self.param_types.join(", ");
        match (self.kind, self.method.as_deref()) {
            (CallKind::Instance, Some(method)) => {
                write!(f, "{}{INSTANCE_SEPARATOR}{method}({params})", self.component)
            }
            (CallKind::Static, Some(method)) => {
                write!(f, "{}{STATIC_SEPARATOR}{method}({params})", self.component)
            }
            _ => write!(f, "{CONSTRUCTOR_PREFIX}{}({params})", self.component),
        }
    }
}

impl FromStr for CallDescriptor {
    type Err = DescriptorError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let malformed = |reason| DescriptorError::Malformed {
            input: input.to_owned(),
            reason,
        };
        let trimmed = input.trim();
        let (explicit_constructor, body) = match trimmed.strip_prefix(CONSTRUCTOR_PREFIX) {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };
        let (head, rest) = body
            .split_once('(')
            .ok_or_else(|| malformed("missing parameter list"))?;
        let inner = rest
            .strip_suffix(')')
            .ok_or_else(|| malformed("unterminated parameter list"))?;
        if inner.contains(['(', ')']) {
            return Err(malformed("nested parentheses"));
        }
        let params: Vec<String> = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(|part| part.trim().to_owned()).collect()
        };

        if explicit_constructor {
            return Self::constructor(head.trim().parse()?, params);
        }
        if let Some((component, method)) = head.split_once(STATIC_SEPARATOR) {
            return Self::static_method(component.trim().parse()?, method.trim(), params);
        }
        if let Some((component, method)) = head.split_once(INSTANCE_SEPARATOR) {
            return Self::instance(component.trim().parse()?, method.trim(), params);
        }
        Self::constructor(head.trim().parse()?, params)
    }
}

impl TryFrom<String> for CallDescriptor {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CallDescriptor> for String {
    fn from(value: CallDescriptor) -> Self {
        value.to_string()
    }
}

/// Typed construction of descriptors.
///
/// Value parameters are added by Rust type, so only types implementing
/// [`WireValue`] can appear in the parameter list.
///
/// ```
/// use warden_core::{CallKind, ComponentName, DescriptorBuilder};
///
/// let component = ComponentName::new("com.example.hr", "Pulse").expect("name");
/// let descriptor = DescriptorBuilder::new(CallKind::Static, component)
///     .method("average")
///     .param::<Vec<f64>>()
///     .param::<i32>()
///     .build()
///     .expect("descriptor");
/// assert_eq!(
///     descriptor.to_string(),
///     "com.example.hr/Pulse::average(double[], int)"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    kind: CallKind,
    component: ComponentName,
    method: Option<String>,
    param_types: Vec<String>,
}

impl DescriptorBuilder {
    /// Starts a descriptor for `component`.
    #[must_use]
    pub const fn new(kind: CallKind, component: ComponentName) -> Self {
        Self {
            kind,
            component,
            method: None,
            param_types: Vec::new(),
        }
    }

    /// Sets the method name.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.method = Some(name.into());
        self
    }

    /// Appends a by-value parameter of type `T`.
    #[must_use]
    pub fn param<T: WireValue>(mut self) -> Self {
        self.param_types.push(T::TYPE_NAME.to_owned());
        self
    }

    /// Appends a sandbox-resident object parameter.
    #[must_use]
    pub fn object_param(mut self, type_name: &ComponentName) -> Self {
        self.param_types.push(type_name.to_string());
        self
    }

    /// Finishes the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Malformed`] when a method is missing for a
    /// method call or present on a constructor.
    pub fn build(self) -> Result<CallDescriptor, DescriptorError> {
        let Self {
            kind,
            component,
            method,
            param_types,
        } = self;
        match (kind, method) {
            (CallKind::Constructor, None) => CallDescriptor::constructor(component, param_types),
            (CallKind::Constructor, Some(_)) => Err(DescriptorError::Malformed {
                input: component.to_string(),
                reason: "constructors take no method name",
            }),
            (CallKind::Instance | CallKind::Static, None) => Err(DescriptorError::Malformed {
                input: component.to_string(),
                reason: "method name required",
            }),
            (CallKind::Instance | CallKind::Static, Some(name)) => {
                CallDescriptor::checked(kind, component, Some(&name), param_types)
            }
        }
    }
}

fn validate_method(method: &str) -> Result<(), DescriptorError> {
    let mut chars = method.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        Ok(())
    } else {
        Err(DescriptorError::InvalidMethod {
            method: method.to_owned(),
        })
    }
}

/// Accepts registered wire types and component names, each optionally
/// followed by `[]` suffixes for object arrays.
fn validate_type(type_name: &str) -> Result<(), DescriptorError> {
    if WIRE_TYPE_NAMES.contains(&type_name) {
        return Ok(());
    }
    let mut base = type_name;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
    }
    if base.parse::<ComponentName>().is_ok() {
        Ok(())
    } else {
        Err(DescriptorError::UnsupportedType {
            type_name: type_name.to_owned(),
        })
    }
}

/// Returns true when `type_name` names a by-value wire type.
#[must_use]
pub fn is_value_type(type_name: &str) -> bool {
    WIRE_TYPE_NAMES.contains(&type_name)
}
