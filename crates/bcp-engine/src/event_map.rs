//! Declarative translation of host events into outbound commands.

use std::collections::{BTreeMap, BTreeSet};

use bcp_config::{ALL_PLAYER_VARIABLES, EventMapping};
use bcp_wire::{Command, Params, names};

/// Host events that map onto outbound commands.
///
/// Parameter templates may reference player variables as `%name%` and event
/// fields as `%name`. Player variables are substituted first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMap {
    mappings: BTreeMap<String, EventMapping>,
}

impl EventMap {
    /// Builds a map from configured mappings.
    #[must_use]
    pub fn new(mappings: BTreeMap<String, EventMapping>) -> Self {
        Self { mappings }
    }

    /// Adds or replaces the mapping for `event`.
    pub fn insert(&mut self, event: impl Into<String>, mapping: EventMapping) {
        self.mappings.insert(event.into(), mapping);
    }

    /// Number of mapped events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether no event is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Renders the command for `event`, or `None` when it is not mapped.
    #[must_use]
    pub fn render(&self, event: &str, fields: &Params, player: &Params) -> Option<Command> {
        let mapping = self.mappings.get(event)?;
        let params = mapping
            .params()
            .iter()
            .map(|(key, template)| (key.as_str(), substitute(template, fields, player)));
        Some(Command::with_params(mapping.command(), params))
    }
}

fn substitute(template: &str, fields: &Params, player: &Params) -> String {
    if !template.contains('%') {
        return template.to_owned();
    }
    let mut rendered = template.to_owned();
    for (name, value) in longest_first(player) {
        rendered = rendered.replace(&format!("%{name}%"), value);
    }
    for (name, value) in longest_first(fields) {
        rendered = rendered.replace(&format!("%{name}"), value);
    }
    rendered
}

/// Longer names first so `%ball` never eats the front of `%ball_count`.
fn longest_first(values: &Params) -> Vec<(&str, &str)> {
    let mut ordered: Vec<(&str, &str)> = values
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    ordered.sort_by(|left, right| right.0.len().cmp(&left.0.len()).then(left.0.cmp(right.0)));
    ordered
}

/// Which player variable changes are forwarded to peers.
///
/// Score changes are always forwarded as `player_score`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlayerVariableFilter {
    /// Only score changes.
    #[default]
    ScoreOnly,
    /// Every variable.
    All,
    /// Score plus the named variables.
    Named(BTreeSet<String>),
}

impl PlayerVariableFilter {
    /// Builds the filter from the configured variable list.
    ///
    /// An empty list forwards scores only; a list containing `__all__`
    /// forwards everything.
    #[must_use]
    pub fn from_names(names: &[String]) -> Self {
        if names.is_empty() {
            Self::ScoreOnly
        } else if names.iter().any(|name| name == ALL_PLAYER_VARIABLES) {
            Self::All
        } else {
            Self::Named(names.iter().cloned().collect())
        }
    }

    /// Renders the command for a variable change, or `None` when filtered.
    #[must_use]
    pub fn render(&self, name: &str, value: &str, prev_value: &str, change: &str) -> Option<Command> {
        if name == "score" {
            return Some(
                Command::new(names::PLAYER_SCORE)
                    .with_param("value", value)
                    .with_param("prev_value", prev_value)
                    .with_param("change", change),
            );
        }
        let forwarded = match self {
            Self::ScoreOnly => false,
            Self::All => true,
            Self::Named(variables) => variables.contains(name),
        };
        forwarded.then(|| Command::player_variable(name, value, prev_value, change))
    }
}
