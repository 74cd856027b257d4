//! Provenance labels attached to values and execution contexts.
//!
//! A [`TaintSet`] maps taint sources to a non-negative amount. Sets are
//! immutable once built; every change goes through a [`TaintSetBuilder`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::component::{ComponentName, NameError};

const TAINT_TARGET: &str = "warden_core::taint";

/// Amount recorded when a label is added without an explicit weight.
pub const UNKNOWN_TAINT: f32 = f32::INFINITY;

/// Amount reported for labels that are not present in a set.
pub const NOT_TAINTED: f32 = f32::NEG_INFINITY;

const AMOUNT_SEPARATOR: char = ':';

/// Immutable mapping from taint source to amount.
///
/// Merging two sets adds amounts per label. Iteration order is the label
/// order, so equal sets always render identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TaintSet {
    amounts: BTreeMap<ComponentName, f32>,
}

impl TaintSet {
    /// Returns the set with no labels.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            amounts: BTreeMap::new(),
        }
    }

    /// Returns a set holding one label at [`UNKNOWN_TAINT`].
    #[must_use]
    pub fn singleton(label: ComponentName) -> Self {
        Self::singleton_with(label, UNKNOWN_TAINT)
    }

    /// Returns a set holding one label at the given amount.
    #[must_use]
    pub fn singleton_with(label: ComponentName, amount: f32) -> Self {
        TaintSetBuilder::new().add_taint(label, amount).build()
    }

    /// Parses `amount:package/tag` entries, skipping malformed ones.
    ///
    /// Entries without an amount are recorded at [`UNKNOWN_TAINT`].
    pub fn from_strings<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = TaintSetBuilder::new();
        for entry in entries {
            match parse_entry(entry.as_ref()) {
                Ok((label, amount)) => builder = builder.add_taint(label, amount),
                Err(error) => warn!(
                    target: TAINT_TARGET,
                    entry = entry.as_ref(),
                    %error,
                    "skipping malformed taint entry"
                ),
            }
        }
        builder.build()
    }

    /// Renders every label as `amount:package/tag`.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.amounts
            .iter()
            .map(|(label, amount)| format!("{amount}{AMOUNT_SEPARATOR}{label}"))
            .collect()
    }

    /// Returns true when no label is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Number of distinct labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    /// Reports whether the label is present at any amount.
    #[must_use]
    pub fn is_tainted_with(&self, label: &ComponentName) -> bool {
        self.amounts.contains_key(label)
    }

    /// Amount recorded for `label`, or [`NOT_TAINTED`] when absent.
    #[must_use]
    pub fn amount(&self, label: &ComponentName) -> f32 {
        self.amount_or(label, NOT_TAINTED)
    }

    /// Amount recorded for `label`, or `fallback` when absent.
    #[must_use]
    pub fn amount_or(&self, label: &ComponentName, fallback: f32) -> f32 {
        self.amounts.get(label).copied().unwrap_or(fallback)
    }

    /// True when every label in `self` also appears in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.amounts
            .keys()
            .all(|label| other.amounts.contains_key(label))
    }

    /// Iterates over labels and amounts in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&ComponentName, f32)> {
        self.amounts.iter().map(|(label, amount)| (label, *amount))
    }

    /// Iterates over the labels only.
    pub fn labels(&self) -> impl Iterator<Item = &ComponentName> {
        self.amounts.keys()
    }

    /// Returns the additive union of two sets.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        self.to_builder().union_with(other).build()
    }

    /// Starts a builder seeded with this set.
    #[must_use]
    pub fn to_builder(&self) -> TaintSetBuilder {
        TaintSetBuilder {
            amounts: self.amounts.clone(),
        }
    }
}

impl fmt::Display for TaintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaintSet{")?;
        for (position, (label, amount)) in self.amounts.iter().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{label}")?;
            if amount.is_finite() {
                write!(f, "={amount}")?;
            }
        }
        f.write_str("}")
    }
}

impl TryFrom<Vec<String>> for TaintSet {
    type Error = NameError;

    fn try_from(entries: Vec<String>) -> Result<Self, Self::Error> {
        let mut builder = TaintSetBuilder::new();
        for entry in &entries {
            let (label, amount) = parse_entry(entry)?;
            builder = builder.add_taint(label, amount);
        }
        Ok(builder.build())
    }
}

impl From<TaintSet> for Vec<String> {
    fn from(value: TaintSet) -> Self {
        value.to_strings()
    }
}

fn parse_entry(entry: &str) -> Result<(ComponentName, f32), NameError> {
    match entry.split_once(AMOUNT_SEPARATOR) {
        None => Ok((entry.parse()?, UNKNOWN_TAINT)),
        Some((raw_amount, label)) => {
            let amount = raw_amount
                .trim()
                .parse::<f32>()
                .map_err(|_| NameError::InvalidPart {
                    part: "amount",
                    value: raw_amount.to_owned(),
                })?;
            Ok((label.parse()?, amount))
        }
    }
}

/// Accumulates labels for a new [`TaintSet`].
///
/// ```
/// use warden_core::{ComponentName, TaintSetBuilder};
///
/// let label = ComponentName::new("com.example.hr", "pulse").expect("name");
/// let taint = TaintSetBuilder::new()
///     .add_taint(label.clone(), 1.0)
///     .add_taint(label.clone(), 2.0)
///     .build();
/// assert_eq!(taint.amount(&label), 3.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TaintSetBuilder {
    amounts: BTreeMap<ComponentName, f32>,
}

impl TaintSetBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` to the label, clamping the total at zero.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "taint amounts accumulate additively per label"
    )]
    pub fn add_taint(mut self, label: ComponentName, amount: f32) -> Self {
        let entry = self.amounts.entry(label).or_insert(0.0);
        *entry = (*entry + amount).max(0.0);
        self
    }

    /// Adds the label at [`UNKNOWN_TAINT`].
    #[must_use]
    pub fn add_label(self, label: ComponentName) -> Self {
        self.add_taint(label, UNKNOWN_TAINT)
    }

    /// Drops the label entirely.
    #[must_use]
    pub fn remove_taint(mut self, label: &ComponentName) -> Self {
        self.amounts.remove(label);
        self
    }

    /// Adds every label of `other` to this builder.
    #[must_use]
    pub fn union_with(self, other: &TaintSet) -> Self {
        other
            .iter()
            .fold(self, |builder, (label, amount)| {
                builder.add_taint(label.clone(), amount)
            })
    }

    /// Freezes the accumulated labels.
    #[must_use]
    pub fn build(self) -> TaintSet {
        TaintSet {
            amounts: self.amounts,
        }
    }
}
