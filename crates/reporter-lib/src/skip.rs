//! Skip rules for noisy events
//!
//! Rules are declared as comma-separated `[kind:]value` entries, either
//! globally through configuration or per namespace through annotations:
//!
//! - `Pod:created,Service:AllocationFailed` as reasons skips those reasons
//!   for the named kinds only
//! - `normal,Pod:warning` as levels skips every `Normal` event plus pod
//!   warnings
//!
//! A namespace carrying its own rules never consults the global set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::models::{EventRecord, NamespaceSnapshot};

/// Namespace annotation holding level rules
pub const SKIP_LEVELS_ANNOTATION: &str = "event-reporter/skip-event-levels";

/// Namespace annotation holding reason rules
pub const SKIP_REASONS_ANNOTATION: &str = "event-reporter/skip-event-reasons";

/// Namespace annotation disabling container termination reports
pub const IGNORE_POD_UPDATES_ANNOTATION: &str = "event-reporter/ignore-pod-updates";

/// Level skipped when no level rules are configured at all
const FALLBACK_SKIP_LEVEL: &str = "normal";

/// What a rule compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipCriteria {
    Reason,
    Level,
}

/// A single normalized skip rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SkipRule {
    pub criteria: SkipCriteria,
    /// Involved-object kind the rule is scoped to; `None` matches any kind
    pub kind: Option<String>,
    pub value: String,
}

impl SkipRule {
    pub fn new(criteria: SkipCriteria, kind: Option<&str>, value: &str) -> Self {
        let kind = kind
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty());

        Self {
            criteria,
            kind,
            value: value.trim().to_lowercase(),
        }
    }
}

/// Parse a `[kind:]value[,...]` declaration
///
/// Malformed entries are logged and dropped. `Pod:` keeps a kind-scoped
/// rule with an empty value, which matches events of that kind carrying no
/// reason (or level); a bare `:` scopes nothing and is dropped.
pub fn parse_rules(criteria: SkipCriteria, raw: &str) -> Vec<SkipRule> {
    let mut rules = Vec::new();

    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let rule = match parts.as_slice() {
            [value] => SkipRule::new(criteria, None, value),
            [kind, value] => SkipRule::new(criteria, Some(kind), value),
            _ => {
                warn!(entry = %entry, criteria = ?criteria, "Ignoring malformed skip rule");
                continue;
            }
        };

        if rule.value.is_empty() && rule.kind.is_none() {
            warn!(entry = %entry, criteria = ?criteria, "Ignoring skip rule without kind or value");
            continue;
        }

        rules.push(rule);
    }

    rules
}

/// A set of skip rules applied as one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: HashSet<SkipRule>,
}

impl RuleSet {
    /// A rule set that skips nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Skip `Normal` events, nothing else
    pub fn builtin_default() -> Self {
        let mut set = Self::empty();
        set.insert(SkipRule::new(SkipCriteria::Level, None, FALLBACK_SKIP_LEVEL));
        set
    }

    /// Build the global rule set from configured reason and level lists
    ///
    /// An unset or blank level list keeps the built-in `normal` level rule.
    pub fn from_config(reasons: Option<&str>, levels: Option<&str>) -> Self {
        let mut set = Self::empty();

        if let Some(raw) = reasons {
            set.extend(parse_rules(SkipCriteria::Reason, raw));
        }

        match levels.filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => set.extend(parse_rules(SkipCriteria::Level, raw)),
            None => set.insert(SkipRule::new(SkipCriteria::Level, None, FALLBACK_SKIP_LEVEL)),
        }

        set
    }

    /// Build a namespace rule set from its annotations
    ///
    /// Returns `None` when neither skip annotation is present. A present
    /// but blank annotation contributes no rules.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        let reasons = annotations.get(SKIP_REASONS_ANNOTATION);
        let levels = annotations.get(SKIP_LEVELS_ANNOTATION);

        if reasons.is_none() && levels.is_none() {
            return None;
        }

        let mut set = Self::empty();
        if let Some(raw) = reasons {
            set.extend(parse_rules(SkipCriteria::Reason, raw));
        }
        if let Some(raw) = levels {
            set.extend(parse_rules(SkipCriteria::Level, raw));
        }
        Some(set)
    }

    pub fn insert(&mut self, rule: SkipRule) {
        self.rules.insert(rule);
    }

    pub fn extend(&mut self, rules: impl IntoIterator<Item = SkipRule>) {
        self.rules.extend(rules);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the first rule matching, in precedence order
    ///
    /// kind-specific reason, any-kind reason, kind-specific level, any-kind level.
    pub fn first_match(&self, kind: &str, reason: &str, level: &str) -> Option<&SkipRule> {
        let kind = kind.to_lowercase();
        let reason = reason.to_lowercase();
        let level = level.to_lowercase();

        let candidates = [
            (SkipCriteria::Reason, Some(kind.as_str()), reason.as_str()),
            (SkipCriteria::Reason, None, reason.as_str()),
            (SkipCriteria::Level, Some(kind.as_str()), level.as_str()),
            (SkipCriteria::Level, None, level.as_str()),
        ];

        let found = candidates.into_iter().find_map(|(criteria, kind, value)| {
            let candidate = SkipRule {
                criteria,
                kind: kind.filter(|k| !k.is_empty()).map(str::to_string),
                value: value.to_string(),
            };
            self.rules.get(&candidate)
        });
        found
    }
}

/// Decide whether an event is noise under the given rule set
pub fn should_skip(event: &EventRecord, rules: &RuleSet) -> bool {
    rules
        .first_match(&event.involved_object.kind, &event.reason, &event.level)
        .is_some()
}

#[derive(Debug, Clone, Default)]
struct NamespacePolicy {
    rules: Option<RuleSet>,
    ignore_pod_updates: bool,
}

impl NamespacePolicy {
    fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let ignore_pod_updates = annotations
            .get(IGNORE_POD_UPDATES_ANNOTATION)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            rules: RuleSet::from_annotations(annotations),
            ignore_pod_updates,
        }
    }

    fn is_trivial(&self) -> bool {
        self.rules.is_none() && !self.ignore_pod_updates
    }
}

/// Global rule set plus per-namespace overrides
///
/// Shared by every delivery path; all access goes through one lock.
#[derive(Debug)]
pub struct NamespaceRules {
    default: RuleSet,
    namespaces: RwLock<HashMap<String, NamespacePolicy>>,
}

impl NamespaceRules {
    pub fn new(default: RuleSet) -> Self {
        Self {
            default,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// The global rule set
    pub fn default_rules(&self) -> &RuleSet {
        &self.default
    }

    /// Create or replace the policy for a namespace from its annotations
    ///
    /// Returns true when the namespace now carries its own rule set.
    pub fn upsert(&self, ns: &NamespaceSnapshot) -> bool {
        let policy = NamespacePolicy::from_annotations(&ns.annotations);
        let has_rules = policy.rules.is_some();

        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        if policy.is_trivial() {
            namespaces.remove(&ns.name);
        } else {
            debug!(
                namespace = %ns.name,
                rules = policy.rules.as_ref().map(RuleSet::len),
                ignore_pod_updates = policy.ignore_pod_updates,
                "Namespace policy updated"
            );
            namespaces.insert(ns.name.clone(), policy);
        }

        has_rules
    }

    /// Drop the policy of a deleted namespace
    pub fn remove(&self, namespace: &str) -> bool {
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        namespaces.remove(namespace).is_some()
    }

    /// Replace every namespace policy with the given listing
    pub fn replace_all<'a>(&self, listing: impl IntoIterator<Item = &'a NamespaceSnapshot>) {
        let fresh: HashMap<String, NamespacePolicy> = listing
            .into_iter()
            .map(|ns| (ns.name.clone(), NamespacePolicy::from_annotations(&ns.annotations)))
            .filter(|(_, policy)| !policy.is_trivial())
            .collect();

        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        *namespaces = fresh;
    }

    /// Rule set in force for a namespace
    pub fn rules_for(&self, namespace: &str) -> RuleSet {
        if namespace.is_empty() {
            return self.default.clone();
        }

        let namespaces = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        namespaces
            .get(namespace)
            .and_then(|policy| policy.rules.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    /// Resolve the rule set for the event's namespace and evaluate it
    pub fn should_skip(&self, event: &EventRecord) -> bool {
        let namespace = event.namespace();
        if namespace.is_empty() {
            return should_skip(event, &self.default);
        }

        let namespaces = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        match namespaces.get(namespace).and_then(|policy| policy.rules.as_ref()) {
            Some(rules) => should_skip(event, rules),
            None => should_skip(event, &self.default),
        }
    }

    /// Whether termination reporting is disabled for a namespace
    pub fn ignores_pod_updates(&self, namespace: &str) -> bool {
        let namespaces = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        namespaces
            .get(namespace)
            .map(|policy| policy.ignore_pod_updates)
            .unwrap_or(false)
    }

    /// Number of namespaces with a non-default policy
    pub fn len(&self) -> usize {
        self.namespaces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
