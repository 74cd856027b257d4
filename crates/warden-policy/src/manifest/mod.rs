//! Package manifests: declared taint sources and event channels.
//!
//! Manifests are YAML documents, one per package:
//!
//! ```yaml
//! package: com.example.hr
//! sources:
//!   - tag: pulse
//!     label: Heart rate
//!     policy:
//!       - log: { sink: NETWORK }
//!       - allow: { sink: NETWORK, value: "https://a.example/" }
//!       - deny: { sink: TOAST, message: "{source} stays off screen" }
//!       - drop: { sink: SMARTLOCK }
//! channels:
//!   - name: updates
//!     exported: subscribe
//! ```
//!
//! Loading is strict. Unknown rule kinds, unknown sinks, duplicate tags and
//! misplaced fields abort the whole manifest so a malformed policy never
//! degrades to "allow everything".

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use warden_core::ComponentName;

use crate::error::PolicyParseError;
use crate::rule::{DEFAULT_AUDIT_MESSAGE, DEFAULT_DENY_MESSAGE, Filter, Policy, Rule, RuleAction};
use crate::sink::SinkRegistry;

/// A declared origin of taint and its rule chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    name: ComponentName,
    label: String,
    policy: Policy,
}

impl Source {
    /// Builds a source.
    #[must_use]
    pub fn new(name: ComponentName, label: impl Into<String>, policy: Policy) -> Self {
        Self {
            name,
            label: label.into(),
            policy,
        }
    }

    /// Returns the qualified source name.
    #[must_use]
    pub const fn name(&self) -> &ComponentName {
        &self.name
    }

    /// Returns the human-readable label.
    #[must_use]
    pub const fn label(&self) -> &str {
        self.label.as_str()
    }

    /// Returns the rule chain.
    #[must_use]
    pub const fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// Which cross-package operations a channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelExport {
    /// Only the owning package may use the channel.
    #[default]
    None,
    /// Other packages may subscribe.
    Subscribe,
    /// Other packages may fire.
    Fire,
    /// Other packages may subscribe and fire.
    Both,
}

impl ChannelExport {
    /// True when foreign packages may subscribe or unsubscribe.
    #[must_use]
    pub const fn allows_subscribe(self) -> bool {
        matches!(self, Self::Subscribe | Self::Both)
    }

    /// True when foreign packages may fire events.
    #[must_use]
    pub const fn allows_fire(self) -> bool {
        matches!(self, Self::Fire | Self::Both)
    }
}

impl fmt::Display for ChannelExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Subscribe => "subscribe",
            Self::Fire => "fire",
            Self::Both => "both",
        })
    }
}

/// A declared event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDecl {
    name: ComponentName,
    exported: ChannelExport,
}

impl ChannelDecl {
    /// Builds a channel declaration.
    #[must_use]
    pub const fn new(name: ComponentName, exported: ChannelExport) -> Self {
        Self { name, exported }
    }

    /// Returns the qualified channel name.
    #[must_use]
    pub const fn name(&self) -> &ComponentName {
        &self.name
    }

    /// Returns the export mode.
    #[must_use]
    pub const fn exported(&self) -> ChannelExport {
        self.exported
    }
}

/// Everything one package declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    package: String,
    sources: BTreeMap<String, Source>,
    channels: BTreeMap<String, ChannelDecl>,
}

impl PackageManifest {
    /// Starts an empty manifest for `package`.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            sources: BTreeMap::new(),
            channels: BTreeMap::new(),
        }
    }

    /// Adds a source.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyParseError::DuplicateSource`] when the tag is taken and
    /// [`PolicyParseError::ForeignEntry`] when the source belongs to another
    /// package.
    pub fn with_source(mut self, source: Source) -> Result<Self, PolicyParseError> {
        self.check_owner(source.name())?;
        let tag = source.name().name().to_owned();
        if self.sources.contains_key(&tag) {
            return Err(PolicyParseError::DuplicateSource {
                package: self.package,
                tag,
            });
        }
        self.sources.insert(tag, source);
        Ok(self)
    }

    /// Adds a channel.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyParseError::DuplicateChannel`] when the name is taken
    /// and [`PolicyParseError::ForeignEntry`] when the channel belongs to
    /// another package.
    pub fn with_channel(mut self, channel: ChannelDecl) -> Result<Self, PolicyParseError> {
        self.check_owner(channel.name())?;
        let name = channel.name().name().to_owned();
        if self.channels.contains_key(&name) {
            return Err(PolicyParseError::DuplicateChannel {
                package: self.package,
                name,
            });
        }
        self.channels.insert(name, channel);
        Ok(self)
    }

    fn check_owner(&self, name: &ComponentName) -> Result<(), PolicyParseError> {
        if name.package() == self.package {
            Ok(())
        } else {
            Err(PolicyParseError::ForeignEntry {
                package: self.package.clone(),
                entry: name.to_string(),
            })
        }
    }

    /// Parses and validates a YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyParseError`] describing the first problem found.
    pub fn from_yaml(text: &str, sinks: &SinkRegistry) -> Result<Self, PolicyParseError> {
        let raw: RawManifest =
            serde_saphyr::from_str(text).map_err(|error| PolicyParseError::Yaml {
                message: error.to_string(),
            })?;
        raw.build(sinks)
    }

    /// Returns the package name.
    #[must_use]
    pub const fn package(&self) -> &str {
        self.package.as_str()
    }

    /// Looks up a source by tag.
    #[must_use]
    pub fn source(&self, tag: &str) -> Option<&Source> {
        self.sources.get(tag)
    }

    /// Iterates over the sources in tag order.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    /// Looks up a channel by name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&ChannelDecl> {
        self.channels.get(name)
    }

    /// Iterates over the channels in name order.
    pub fn channels(&self) -> impl Iterator<Item = &ChannelDecl> {
        self.channels.values()
    }
}

// ---------------------------------------------------------------------------
// YAML shape
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    package: String,
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    channels: Vec<RawChannel>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    tag: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    policy: Vec<BTreeMap<String, Option<RawRule>>>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(default)]
    sink: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChannel {
    name: String,
    #[serde(default)]
    exported: ChannelExport,
}

impl RawManifest {
    fn build(self, sinks: &SinkRegistry) -> Result<PackageManifest, PolicyParseError> {
        let mut manifest = PackageManifest::new(self.package.clone());
        for raw_source in self.sources {
            let name = ComponentName::new(self.package.as_str(), raw_source.tag.as_str())?;
            let rules = raw_source
                .policy
                .into_iter()
                .map(|entry| build_rule(&name, entry, sinks))
                .collect::<Result<Vec<_>, _>>()?;
            let label = raw_source.label.unwrap_or_else(|| raw_source.tag.clone());
            manifest = manifest.with_source(Source::new(name, label, Policy::new(rules)))?;
        }
        for raw_channel in self.channels {
            let name = ComponentName::new(self.package.as_str(), raw_channel.name.as_str())?;
            manifest = manifest.with_channel(ChannelDecl::new(name, raw_channel.exported))?;
        }
        Ok(manifest)
    }
}

fn build_rule(
    source: &ComponentName,
    entry: BTreeMap<String, Option<RawRule>>,
    sinks: &SinkRegistry,
) -> Result<Rule, PolicyParseError> {
    let mut entries = entry.into_iter();
    let (Some((kind, body)), None) = (entries.next(), entries.next()) else {
        return Err(PolicyParseError::MalformedRule {
            source_name: source.to_string(),
        });
    };
    let raw = body.unwrap_or_default();
    let filter = build_filter(source, raw.sink, raw.value, sinks)?;
    let action = match (kind.as_str(), raw.message) {
        ("allow", None) => RuleAction::Allow,
        ("drop", None) => RuleAction::Drop,
        ("deny", message) => RuleAction::Deny {
            message: message.unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_owned()),
        },
        ("log", message) => RuleAction::Log {
            message: message.unwrap_or_else(|| DEFAULT_AUDIT_MESSAGE.to_owned()),
        },
        ("allow" | "drop", Some(_)) => {
            return Err(PolicyParseError::UnexpectedMessage {
                source_name: source.to_string(),
                rule: kind,
            });
        }
        _ => {
            return Err(PolicyParseError::UnknownRule {
                source_name: source.to_string(),
                rule: kind,
            });
        }
    };
    Ok(Rule::new(action, filter))
}

fn build_filter(
    source: &ComponentName,
    sink: Option<String>,
    value: Option<String>,
    sinks: &SinkRegistry,
) -> Result<Filter, PolicyParseError> {
    let Some(sink_name) = sink else {
        return match value {
            None => Ok(Filter::Always),
            Some(_) => Err(PolicyParseError::MissingSink {
                source_name: source.to_string(),
            }),
        };
    };
    let Some(kind) = sinks.kind(&sink_name) else {
        return Err(PolicyParseError::UnknownSink {
            source_name: source.to_string(),
            sink: sink_name,
        });
    };
    match value {
        Some(_) if !kind.accepts_filter_value() => Err(PolicyParseError::UnexpectedValue {
            source_name: source.to_string(),
            sink: sink_name,
        }),
        Some(literal) => Ok(Filter::sink_value(sink_name, literal)),
        None => Ok(Filter::sink(sink_name)),
    }
}

#[cfg(test)]
mod tests;
