//! Filters, rules and rule chains.

use std::fmt;

use tracing::{debug, warn};
use warden_core::ComponentName;

use crate::sink::{SinkRequest, names};

const RULE_TARGET: &str = "warden_policy::rule";
const AUDIT_TARGET: &str = "warden_policy::audit";

/// Message used by `deny` rules that do not configure one.
pub const DEFAULT_DENY_MESSAGE: &str = "Data from {source} may not be sent to {sink}.";

/// Message used by `log` rules that do not configure one.
pub const DEFAULT_AUDIT_MESSAGE: &str = "Data from {source} is being sent to {sink}.";

/// Predicate deciding whether a rule applies to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Applies to every request.
    Always,
    /// Applies to no request.
    Never,
    /// Applies only to requests for one sink, optionally carrying a literal
    /// value that rules compare against the request.
    Scoped {
        /// Sink the rule is scoped to.
        sink: String,
        /// Literal match value, such as a URL for network sinks.
        value: Option<String>,
    },
}

impl Filter {
    /// A filter scoped to `sink`.
    #[must_use]
    pub fn sink(sink: impl Into<String>) -> Self {
        Self::Scoped {
            sink: sink.into(),
            value: None,
        }
    }

    /// A filter scoped to `sink` carrying a literal match value.
    #[must_use]
    pub fn sink_value(sink: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Scoped {
            sink: sink.into(),
            value: Some(value.into()),
        }
    }

    /// True when the rule owning this filter should process `request`.
    #[must_use]
    pub fn should_accept(&self, request: &SinkRequest) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Scoped { sink, .. } => sink == request.sink(),
        }
    }

    /// Returns the literal match value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Scoped { value, .. } => value.as_deref(),
            Self::Always | Self::Never => None,
        }
    }

    /// Compares the literal match value verbatim against the request URL.
    ///
    /// Filters without a value match every request.
    #[must_use]
    pub fn matches_value(&self, request: &SinkRequest) -> bool {
        self.value()
            .is_none_or(|expected| request.url() == Some(expected))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("true"),
            Self::Never => f.write_str("false"),
            Self::Scoped { sink, value: None } => write!(f, "sink={sink}"),
            Self::Scoped {
                sink,
                value: Some(value),
            } => write!(f, "sink={sink}, value={value}"),
        }
    }
}

/// What a rule does once its filter matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Accepts and stops. On a network request with a filter value, a URL
    /// mismatch records an error instead.
    Allow,
    /// Records an error and stops.
    Deny {
        /// Message template with `{source}` and `{sink}` placeholders.
        message: String,
    },
    /// Writes an audit note and continues.
    Log {
        /// Message template with `{source}` and `{sink}` placeholders.
        message: String,
    },
    /// Rejects silently and stops.
    Drop,
}

impl RuleAction {
    /// Name used in manifests.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny { .. } => "deny",
            Self::Log { .. } => "log",
            Self::Drop => "drop",
        }
    }
}

/// Whether evaluation of a chain goes on after a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next rule.
    Continue,
    /// Stop the chain.
    Stop,
}

/// One step of a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    action: RuleAction,
    filter: Filter,
}

impl Rule {
    /// Builds a rule.
    #[must_use]
    pub const fn new(action: RuleAction, filter: Filter) -> Self {
        Self { action, filter }
    }

    /// An `allow` rule.
    #[must_use]
    pub const fn allow(filter: Filter) -> Self {
        Self::new(RuleAction::Allow, filter)
    }

    /// A `deny` rule with a message template.
    #[must_use]
    pub fn deny(filter: Filter, message: impl Into<String>) -> Self {
        Self::new(
            RuleAction::Deny {
                message: message.into(),
            },
            filter,
        )
    }

    /// A `log` rule with a message template.
    #[must_use]
    pub fn log(filter: Filter, message: impl Into<String>) -> Self {
        Self::new(
            RuleAction::Log {
                message: message.into(),
            },
            filter,
        )
    }

    /// A `drop` rule.
    #[must_use]
    pub const fn drop(filter: Filter) -> Self {
        Self::new(RuleAction::Drop, filter)
    }

    /// Returns the action.
    #[must_use]
    pub const fn action(&self) -> &RuleAction {
        &self.action
    }

    /// Returns the filter.
    #[must_use]
    pub const fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Runs the rule for `source` against `request`.
    pub fn process(&self, source: &ComponentName, request: &mut SinkRequest) -> Flow {
        if !self.filter.should_accept(request) {
            debug!(target: RULE_TARGET, rule = %self, %request, "filter not matched");
            return Flow::Continue;
        }
        debug!(target: RULE_TARGET, rule = %self, %request, "filter matched");

        match &self.action {
            RuleAction::Allow => {
                let checks_url = request.sink() == names::NETWORK && self.filter.value().is_some();
                if checks_url && !self.filter.matches_value(request) {
                    let value = self.filter.value().unwrap_or_default();
                    debug!(target: RULE_TARGET, %source, url = ?request.url(), "blocking network request");
                    request.add_error_message(source, format!("Request to URL {value} blocked."));
                }
                Flow::Stop
            }
            RuleAction::Deny { message } => {
                let text = render(message, source, request.sink());
                request.add_error_message(source, text);
                Flow::Stop
            }
            RuleAction::Log { message } => {
                let text = render(message, source, request.sink());
                warn!(target: AUDIT_TARGET, %source, sink = request.sink(), "{text}");
                request.add_audit_note(source, text);
                Flow::Continue
            }
            RuleAction::Drop => {
                request.reject();
                Flow::Stop
            }
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.action.name(), self.filter)
    }
}

fn render(template: &str, source: &ComponentName, sink: &str) -> String {
    template
        .replace("{source}", &source.to_string())
        .replace("{sink}", sink)
}

/// Ordered rule chain of one source.
///
/// A chain that finishes without a stopping rule leaves the request as it
/// was, so the effective default is to allow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    rules: Vec<Rule>,
}

impl Policy {
    /// Builds a chain from rules in evaluation order.
    #[must_use]
    pub const fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Returns the rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Runs the chain for `source` until a rule stops it.
    pub fn evaluate(&self, source: &ComponentName, request: &mut SinkRequest) {
        for rule in &self.rules {
            if rule.process(source, request) == Flow::Stop {
                return;
            }
        }
        debug!(
            target: RULE_TARGET,
            %source,
            %request,
            "no rule stopped the chain; allowing by default"
        );
    }
}
