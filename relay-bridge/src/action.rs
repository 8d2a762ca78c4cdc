//! Mapping of statsite key kinds to collector actions.

use std::collections::HashMap;
use std::fmt;

use relay_config::{Config, TimerAction};

/// Keys containing this marker are histogram bins, regardless of their kind.
const HISTOGRAM_BIN_MARKER: &str = "histogram.bin";

/// The kind that histogram bins are reclassified to.
const HISTOGRAM_KIND: &str = "histogram";

/// The action the collector applies to a reported value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Action {
    /// Aggregates the value with other values reported in the same interval.
    Gauge,
    /// Replaces any value reported before in the same interval.
    GaugeAbsolute,
    /// Adds the value to a counter.
    Increment,
}

impl Action {
    /// Returns the verb of this action on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::GaugeAbsolute => "gauge_absolute",
            Self::Increment => "increment",
        }
    }

    /// Returns `true` if values reported with this action are fed back into statsite.
    ///
    /// Statsite resets gauges after every flush, so the current value has to be re-submitted to
    /// keep it alive for the next interval.
    pub fn is_feedback(&self) -> bool {
        matches!(self, Self::Gauge)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TimerAction> for Action {
    fn from(value: TimerAction) -> Self {
        match value {
            TimerAction::Gauge => Self::Gauge,
            TimerAction::GaugeAbsolute => Self::GaugeAbsolute,
        }
    }
}

/// Raised if a statsite key does not start with a kind.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("metric key {0:?} has no kind prefix")]
pub struct ParseKeyError(String);

/// A statsite key split into the collector key and its action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedKey<'a> {
    /// The key without the kind prefix.
    pub key: &'a str,
    /// The action for the kind, or `None` if the kind is not forwarded.
    pub action: Option<Action>,
}

/// Immutable lookup of actions by statsite kind.
#[derive(Clone, Debug)]
pub struct ActionTable {
    actions: HashMap<&'static str, Action>,
}

impl ActionTable {
    /// Creates the table, reporting `timers` with the given action.
    pub fn new(timers: TimerAction) -> Self {
        let actions = HashMap::from([
            ("timers", Action::from(timers)),
            ("sets", Action::GaugeAbsolute),
            ("gauges", Action::Gauge),
            ("counts", Action::Increment),
            (HISTOGRAM_KIND, Action::Increment),
        ]);

        Self { actions }
    }

    /// Creates the table from the `keys` section of the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.timer_action())
    }

    /// Returns the action for a kind.
    pub fn get(&self, kind: &str) -> Option<Action> {
        self.actions.get(kind).copied()
    }

    /// Splits a statsite key into its kind and the remaining key and looks up the action.
    ///
    /// The kind is everything before the first `.`. Keys containing `histogram.bin` are always
    /// treated as histograms. The returned key never contains the kind.
    pub fn resolve<'a>(&self, prefixed_key: &'a str) -> Result<ResolvedKey<'a>, ParseKeyError> {
        let (mut kind, key) = prefixed_key
            .split_once('.')
            .ok_or_else(|| ParseKeyError(prefixed_key.to_owned()))?;

        if key.contains(HISTOGRAM_BIN_MARKER) {
            kind = HISTOGRAM_KIND;
        }

        Ok(ResolvedKey {
            key,
            action: self.get(kind),
        })
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new(TimerAction::default())
    }
}
