//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Label selectors used to associate dependents with their owner."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Set-based selector operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
pub enum SelectorOperator {
    /// Label value must be one of `values`.
    In,
    /// Label must be absent or its value outside `values`.
    NotIn,
    /// Label key must be present.
    Exists,
    /// Label key must be absent.
    DoesNotExist,
}

/// One set-based requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    /// Label key the requirement applies to.
    pub key: String,
    /// Operator applied to the key.
    pub operator: SelectorOperator,
    /// Values for `In` and `NotIn`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.map(|v| self.values.contains(v)).unwrap_or(false),
            SelectorOperator::NotIn => value.map(|v| !self.values.contains(v)).unwrap_or(true),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// Conjunction of exact label matches and set-based requirements.
///
/// An empty selector selects nothing, so a misconfigured owner never sweeps up
/// every object in its namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels that must be present with the given values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    /// Additional set-based requirements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Selector built from exact label matches only.
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    /// True when there are no requirements at all.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Whether `labels` satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if self.is_empty() {
            return false;
        }
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let selector = LabelSelector::default();
        assert!(!selector.matches(&labels(&[("app", "web")])));
        assert!(!selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn match_labels_require_exact_values() {
        let selector = LabelSelector::from_labels([("app", "web")]);
        assert!(selector.matches(&labels(&[("app", "web"), ("tier", "front")])));
        assert!(!selector.matches(&labels(&[("app", "db")])));
        assert!(!selector.matches(&labels(&[("tier", "front")])));
    }

    #[test]
    fn expressions_combine_with_labels() {
        let selector = LabelSelector {
            match_labels: labels(&[("app", "web")]),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "track".into(),
                    operator: SelectorOperator::In,
                    values: vec!["stable".into(), "canary".into()],
                },
                LabelSelectorRequirement {
                    key: "debug".into(),
                    operator: SelectorOperator::DoesNotExist,
                    values: Vec::new(),
                },
            ],
        };
        assert!(selector.matches(&labels(&[("app", "web"), ("track", "canary")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("track", "beta")])));
        assert!(!selector.matches(&labels(&[
            ("app", "web"),
            ("track", "stable"),
            ("debug", "1")
        ])));
    }

    #[test]
    fn not_in_accepts_missing_keys() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".into(),
                operator: SelectorOperator::NotIn,
                values: vec!["prod".into()],
            }],
        };
        assert!(selector.matches(&labels(&[("app", "web")])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
    }
}
