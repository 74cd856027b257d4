//! Qualified `package/name` identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters that carry meaning in descriptor and taint string forms.
const RESERVED: &[char] = &['/', '#', ':', '(', ')', ','];

/// A two-part name: the owning package and a symbol inside it.
///
/// Taint labels use the symbol as a tag (`com.example.camera/frames`), call
/// targets use it as a class name (`com.example.camera/FrameFilter`), and
/// event channels use it as the channel name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentName {
    package: String,
    name: String,
}

/// Errors raised while building or parsing a [`ComponentName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// The flattened form did not contain a `/` separator.
    #[error("component name '{input}' must have the form package/name")]
    MissingSeparator {
        /// Text that failed to parse.
        input: String,
    },

    /// One of the two parts was empty or contained a reserved character.
    #[error("invalid {part} '{value}' in component name")]
    InvalidPart {
        /// Which half of the name was rejected.
        part: &'static str,
        /// Offending value.
        value: String,
    },
}

impl ComponentName {
    /// Builds a name from its two parts.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::InvalidPart`] when either part is empty or
    /// contains whitespace or a reserved delimiter.
    pub fn new(
        package_part: impl Into<String>,
        name_part: impl Into<String>,
    ) -> Result<Self, NameError> {
        let package = package_part.into();
        let name = name_part.into();
        validate_part("package", &package)?;
        validate_part("name", &name)?;
        Ok(Self { package, name })
    }

    /// Returns the owning package.
    #[must_use]
    pub const fn package(&self) -> &str {
        self.package.as_str()
    }

    /// Returns the symbol inside the package.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }
}

fn validate_part(part: &'static str, value: &str) -> Result<(), NameError> {
    let bad = value.is_empty()
        || value
            .chars()
            .any(|ch| ch.is_whitespace() || RESERVED.contains(&ch));
    if bad {
        return Err(NameError::InvalidPart {
            part,
            value: value.to_owned(),
        });
    }
    Ok(())
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.name)
    }
}

impl FromStr for ComponentName {
    type Err = NameError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (package, name) = input
            .split_once('/')
            .ok_or_else(|| NameError::MissingSeparator {
                input: input.to_owned(),
            })?;
        Self::new(package, name)
    }
}

impl TryFrom<String> for ComponentName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ComponentName> for String {
    fn from(value: ComponentName) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests;
