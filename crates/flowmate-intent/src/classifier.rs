//! Intent classifier -- maps free text to a workflow template.
//!
//! Classification is an ordered table of keyword predicates, each paired with
//! a [`Template`].  The first rule whose predicate holds wins; there is no
//! scoring, negation or disambiguation.
//!
//! Keyword presence is computed in a single pass over the lowercased input
//! with an [`aho_corasick`] automaton reporting overlapping matches (so
//! "reminder" registers both `remind` and `reminder`).  Matching is plain
//! substring containment: "if" matches inside "notify".
//!
//! | Order | Predicate | Template |
//! |-------|-----------|----------|
//! | 1 | `slack` and any of `every`, `daily`, `morning` | [`Template::ScheduledSlack`] |
//! | 2 | `email` and `whatsapp` | [`Template::EmailToWhatsApp`] |
//! | 3 | any of `remind`, `reminder` | [`Template::Reminder`] |
//! | 4 | any of `when`, `if` | [`Template::Conditional`] |

use std::collections::HashSet;

use aho_corasick::AhoCorasick;
use tracing::debug;

use crate::error::{IntentError, Result};
use crate::suggestion::WorkflowSuggestion;
use crate::templates::Template;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A keyword condition over the set of keywords present in the input.
#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    /// The keyword occurs somewhere in the input.
    Has(&'static str),
    /// Every sub-predicate holds.
    AllOf(&'static [Predicate]),
    /// At least one sub-predicate holds.
    AnyOf(&'static [Predicate]),
}

impl Predicate {
    fn holds(&self, present: &HashSet<&'static str>) -> bool {
        match self {
            Self::Has(keyword) => present.contains(keyword),
            Self::AllOf(parts) => parts.iter().all(|p| p.holds(present)),
            Self::AnyOf(parts) => parts.iter().any(|p| p.holds(present)),
        }
    }

    fn collect_keywords(&self, out: &mut Vec<&'static str>) {
        match self {
            Self::Has(keyword) => {
                if !out.contains(keyword) {
                    out.push(*keyword);
                }
            }
            Self::AllOf(parts) | Self::AnyOf(parts) => {
                for part in *parts {
                    part.collect_keywords(out);
                }
            }
        }
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub predicate: Predicate,
    pub template: Template,
}

use Predicate::{AllOf, AnyOf, Has};

/// The rule table, in precedence order.
pub const RULES: &[Rule] = &[
    Rule {
        predicate: AllOf(&[
            Has("slack"),
            AnyOf(&[Has("every"), Has("daily"), Has("morning")]),
        ]),
        template: Template::ScheduledSlack,
    },
    Rule {
        predicate: AllOf(&[Has("email"), Has("whatsapp")]),
        template: Template::EmailToWhatsApp,
    },
    Rule {
        predicate: AnyOf(&[Has("remind"), Has("reminder")]),
        template: Template::Reminder,
    },
    Rule {
        predicate: AnyOf(&[Has("when"), Has("if")]),
        template: Template::Conditional,
    },
];

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// First-match-wins keyword classifier.
///
/// The classifier is **not** `Clone` because it holds a compiled automaton.
/// Wrap in `Arc` if shared access is needed.
pub struct IntentClassifier {
    rules: Vec<Rule>,
    keywords: Vec<&'static str>,
    automaton: AhoCorasick,
}

impl IntentClassifier {
    /// Build a classifier over the default [`RULES`] table.
    pub fn new() -> Result<Self> {
        Self::with_rules(RULES.to_vec())
    }

    /// Build a classifier over a custom rule table.
    pub fn with_rules(rules: Vec<Rule>) -> Result<Self> {
        let mut keywords = Vec::new();
        for rule in &rules {
            rule.predicate.collect_keywords(&mut keywords);
        }

        let automaton = AhoCorasick::new(&keywords).map_err(|e| IntentError::ClassifierBuild {
            reason: e.to_string(),
        })?;

        debug!(
            rules = rules.len(),
            keywords = keywords.len(),
            "intent classifier built"
        );

        Ok(Self {
            rules,
            keywords,
            automaton,
        })
    }

    /// Return the template of the first matching rule, if any.
    pub fn match_template(&self, text: &str) -> Option<Template> {
        let lower = text.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }

        let present: HashSet<&'static str> = self
            .automaton
            .find_overlapping_iter(&lower)
            .map(|m| self.keywords[m.pattern().as_usize()])
            .collect();

        let template = self
            .rules
            .iter()
            .find(|rule| rule.predicate.holds(&present))
            .map(|rule| rule.template);

        debug!(
            keywords = ?present,
            template = ?template.map(Template::name),
            "intent classified"
        );
        template
    }

    /// Classify free text into a workflow suggestion.
    ///
    /// Returns `None` when no rule matches; callers should ask the user to be
    /// more specific.
    pub fn classify(&self, text: &str) -> Option<WorkflowSuggestion> {
        self.match_template(text).map(Template::suggestion)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
