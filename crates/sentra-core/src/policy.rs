//! Policy data model.
//!
//! Policies are the unit of authorization configuration: a policy governs a
//! resource kind (or a principal, for principal policies) and carries an
//! ordered list of rules. Derived roles are named roles computed from parent
//! roles under an optional condition.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pattern for policy names, rule names, role names, and resource kinds.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("name pattern is valid"));

/// Pattern for action identifiers (allows `:` for namespaced actions).
static ACTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-:]*$").expect("action pattern is valid"));

/// Wildcard matching any resource kind or action.
pub const WILDCARD: &str = "*";

/// Returns `true` if `name` is a valid policy/rule/role identifier.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Returns `true` if `kind` is a valid resource kind (identifier or `*`).
#[must_use]
pub fn is_valid_kind(kind: &str) -> bool {
    kind == WILDCARD || NAME_PATTERN.is_match(kind)
}

/// Returns `true` if `action` is a valid action identifier (or `*`).
#[must_use]
pub fn is_valid_action(action: &str) -> bool {
    action == WILDCARD || ACTION_PATTERN.is_match(action)
}

/// Returns the parent of a dotted scope, or `None` at the root.
///
/// `parent_scope("acme.corp.engineering")` is `Some("acme.corp")`;
/// `parent_scope("acme")` and `parent_scope("")` are `None`.
#[must_use]
pub fn parent_scope(scope: &str) -> Option<&str> {
    scope.rfind('.').map(|idx| &scope[..idx])
}

// =============================================================================
// Effect
// =============================================================================

/// The outcome a rule produces when it matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Grant the action.
    #[default]
    Allow,
    /// Refuse the action.
    Deny,
}

impl Effect {
    /// Returns the string representation of the effect.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Selectors
// =============================================================================

/// Selects the principals a principal policy applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrincipalSelector {
    /// Specific principal id this policy targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Roles this policy targets; the policy applies to a principal holding
    /// any of them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl PrincipalSelector {
    /// Selector targeting a single principal id.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            roles: Vec::new(),
        }
    }

    /// Selector targeting any principal holding one of `roles`.
    #[must_use]
    pub fn by_roles(roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: None,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if the selector names neither an id nor a role.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.as_deref().is_none_or(str::is_empty) && self.roles.is_empty()
    }
}

/// Selects the resources a principal policy applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSelector {
    /// Resource kind, or `*` for any kind.
    pub kind: String,

    /// Optional scope restriction for this selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ResourceSelector {
    /// Selector for a resource kind with no scope restriction.
    #[must_use]
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope: None,
        }
    }

    /// Selector for a resource kind within a scope.
    #[must_use]
    pub fn scoped(kind: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope: Some(scope.into()),
        }
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A single ordered entry in a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    /// Rule name, unique within its policy.
    pub name: String,

    /// Actions this rule covers; `*` covers every action.
    pub actions: Vec<String>,

    /// What matching this rule produces.
    pub effect: Effect,

    /// Roles the principal must hold for this rule to apply.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Derived roles imported by this rule.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub derived_roles: Vec<String>,

    /// Optional condition expression source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Rule {
    /// Creates an allow rule over the given actions.
    #[must_use]
    pub fn allow(name: impl Into<String>, actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            effect: Effect::Allow,
            ..Default::default()
        }
    }

    /// Creates a deny rule over the given actions.
    #[must_use]
    pub fn deny(name: impl Into<String>, actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            effect: Effect::Deny,
            ..Default::default()
        }
    }

    /// Attaches a condition expression to the rule.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Restricts the rule to principals holding one of `roles`.
    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Imports derived roles into the rule.
    #[must_use]
    pub fn with_derived_roles(
        mut self,
        roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.derived_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` if this rule covers `action` (exactly or via `*`).
    #[must_use]
    pub fn covers_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == WILDCARD || a == action)
    }

    /// Returns `true` if this rule's action set intersects `other`'s.
    #[must_use]
    pub fn overlaps_actions(&self, other: &Rule) -> bool {
        self.actions.iter().any(|a| {
            a == WILDCARD || other.actions.iter().any(|b| b == WILDCARD || b == a)
        })
    }
}

// =============================================================================
// Policy
// =============================================================================

/// An authorization policy.
///
/// A resource policy governs a resource kind, optionally within a scope. A
/// principal policy (`principal_policy = true`) is selected by principal id
/// or role and carries resource selectors naming the kinds it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    /// Unique policy name.
    pub name: String,

    /// Schema version of the policy document.
    pub api_version: String,

    /// Resource kind this policy governs; `*` means any kind.
    pub resource_kind: String,

    /// Dotted hierarchical scope; empty means the global region.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,

    /// Whether this is a principal policy.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub principal_policy: bool,

    /// Principal selector; required for principal policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalSelector>,

    /// Resource selectors; required for principal policies.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSelector>,

    /// Ordered rules.
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Creates a resource policy for `resource_kind` with no rules yet.
    #[must_use]
    pub fn resource(name: impl Into<String>, resource_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_version: "v1".to_string(),
            resource_kind: resource_kind.into(),
            ..Default::default()
        }
    }

    /// Creates a principal policy with the given selector.
    #[must_use]
    pub fn principal(
        name: impl Into<String>,
        selector: PrincipalSelector,
        resources: Vec<ResourceSelector>,
    ) -> Self {
        Self {
            name: name.into(),
            api_version: "v1".to_string(),
            resource_kind: WILDCARD.to_string(),
            principal_policy: true,
            principal: Some(selector),
            resources,
            ..Default::default()
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Appends a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Returns `true` if any rule covers `action`.
    #[must_use]
    pub fn matches_action(&self, action: &str) -> bool {
        self.rules.iter().any(|r| r.covers_action(action))
    }

    /// Returns `true` if any rule covers any of `actions` (an empty slice
    /// matches everything).
    #[must_use]
    pub fn matches_any_action(&self, actions: &[String]) -> bool {
        actions.is_empty() || actions.iter().any(|a| self.matches_action(a))
    }

    /// Iterates over every condition source in the policy's rules.
    pub fn conditions(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(|r| r.condition.as_deref())
    }
}

// =============================================================================
// Derived role
// =============================================================================

/// A named role computed from parent roles under an optional condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DerivedRole {
    /// Derived role name.
    pub name: String,

    /// Roles the principal must already hold.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parent_roles: Vec<String>,

    /// Optional condition expression source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl DerivedRole {
    /// Creates a derived role from its parents.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        parent_roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            parent_roles: parent_roles.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    /// Attaches a condition expression.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pattern() {
        assert!(is_valid_name("doc_policy"));
        assert!(is_valid_name("_internal"));
        assert!(is_valid_name("a-b-c"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("9lives"));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("dotted.name"));
    }

    #[test]
    fn test_kind_pattern_allows_wildcard() {
        assert!(is_valid_kind("document"));
        assert!(is_valid_kind("*"));
        assert!(!is_valid_kind(""));
        assert!(!is_valid_kind("a b"));
    }

    #[test]
    fn test_action_pattern() {
        assert!(is_valid_action("read"));
        assert!(is_valid_action("doc:read"));
        assert!(is_valid_action("re-read"));
        assert!(is_valid_action("*"));
        assert!(!is_valid_action(""));
        assert!(!is_valid_action(":lead-colon"));
    }

    #[test]
    fn test_parent_scope() {
        assert_eq!(parent_scope("acme.corp.engineering"), Some("acme.corp"));
        assert_eq!(parent_scope("acme.corp"), Some("acme"));
        assert_eq!(parent_scope("acme"), None);
        assert_eq!(parent_scope(""), None);
    }

    #[test]
    fn test_rule_action_matching() {
        let rule = Rule::allow("r", ["read", "list"]);
        assert!(rule.covers_action("read"));
        assert!(!rule.covers_action("write"));

        let wild = Rule::deny("w", ["*"]);
        assert!(wild.covers_action("anything"));

        assert!(rule.overlaps_actions(&Rule::deny("d", ["list"])));
        assert!(rule.overlaps_actions(&wild));
        assert!(!rule.overlaps_actions(&Rule::deny("d", ["write"])));
    }

    #[test]
    fn test_policy_action_matching() {
        let policy = Policy::resource("p1", "document")
            .with_rule(Rule::allow("r1", ["read"]))
            .with_rule(Rule::deny("r2", ["delete"]));

        assert!(policy.matches_action("read"));
        assert!(policy.matches_action("delete"));
        assert!(!policy.matches_action("write"));
        assert!(policy.matches_any_action(&[]));
        assert!(policy.matches_any_action(&["write".to_string(), "read".to_string()]));
    }

    #[test]
    fn test_principal_selector_emptiness() {
        assert!(PrincipalSelector::default().is_empty());
        assert!(!PrincipalSelector::by_id("alice").is_empty());
        assert!(!PrincipalSelector::by_roles(["admin"]).is_empty());
        let blank_id = PrincipalSelector {
            id: Some(String::new()),
            roles: Vec::new(),
        };
        assert!(blank_id.is_empty());
    }

    #[test]
    fn test_serde_round_trip_camel_case() {
        let policy = Policy::principal(
            "alice_docs",
            PrincipalSelector::by_id("alice"),
            vec![ResourceSelector::kind("document")],
        )
        .with_rule(Rule::allow("r", ["read"]).with_condition("context.mfa == true"));

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["resourceKind"], "*");
        assert_eq!(json["principalPolicy"], true);
        assert_eq!(json["rules"][0]["actions"][0], "read");

        let back: Policy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_conditions_iterator() {
        let policy = Policy::resource("p", "file")
            .with_rule(Rule::allow("a", ["read"]))
            .with_rule(Rule::allow("b", ["write"]).with_condition("principal.owner == true"));
        let conditions: Vec<_> = policy.conditions().collect();
        assert_eq!(conditions, vec!["principal.owner == true"]);
    }
}
