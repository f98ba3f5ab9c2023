//! Structural, expression, cross-reference, and cycle validation.
//!
//! The validator never mutates anything: callers (normally the rollback
//! manager) decide what to do with the outcome. Errors are fatal; warnings
//! are advisory unless `strict_mode` promotes them.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use sentra_core::policy::{
    DerivedRole, Policy, Rule, is_valid_action, is_valid_kind, is_valid_name,
};
use sentra_core::validation::{IssueTag, ValidationIssue, ValidationOutcome};

use crate::condition::{ConditionCache, ConditionInput};
use crate::config::ValidatorConfig;

/// Policy and derived-role validator.
pub struct PolicyValidator {
    config: ValidatorConfig,
    conditions: Arc<ConditionCache>,
}

impl PolicyValidator {
    /// Creates a validator with default configuration.
    #[must_use]
    pub fn new(conditions: Arc<ConditionCache>) -> Self {
        Self::with_config(ValidatorConfig::default(), conditions)
    }

    /// Creates a validator with explicit configuration.
    #[must_use]
    pub fn with_config(config: ValidatorConfig, conditions: Arc<ConditionCache>) -> Self {
        Self { config, conditions }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Single-policy validation
    // -------------------------------------------------------------------------

    /// Validates one policy: required fields, identifier formats, rule-name
    /// uniqueness, rule shape, condition compilation, and principal-policy
    /// selector shape, plus the advisory checks (empty policy, shadowed
    /// rules).
    #[must_use]
    pub fn validate_policy(&self, policy: &Policy) -> ValidationOutcome {
        let mut outcome = self.check_policy(policy);
        self.finish(&mut outcome);
        outcome
    }

    /// Validates one derived-role definition.
    #[must_use]
    pub fn validate_derived_role(&self, role: &DerivedRole) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::ok();

        if role.name.is_empty() {
            outcome.push_error(ValidationIssue::new(
                IssueTag::Schema,
                "derived role name is required",
            ));
        } else if !is_valid_name(&role.name) {
            outcome.push_error(
                ValidationIssue::new(
                    IssueTag::Syntax,
                    format!("invalid derived role name '{}'", role.name),
                ),
            );
        }

        for parent in &role.parent_roles {
            if !is_valid_name(parent) {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Syntax,
                        format!("invalid parent role name '{parent}'"),
                    ),
                );
            }
        }

        if let Some(condition) = role.condition.as_deref() {
            self.check_condition(condition, &role.name, None, &mut outcome);
        }

        if role.parent_roles.is_empty() {
            outcome.push_warning(ValidationIssue::new(
                IssueTag::Schema,
                format!("derived role '{}' has no parent roles", role.name),
            ));
        }

        self.finish(&mut outcome);
        outcome
    }

    // -------------------------------------------------------------------------
    // Batch validation
    // -------------------------------------------------------------------------

    /// Validates a batch of policies and derived roles together.
    ///
    /// On top of the individual checks this detects duplicate names within
    /// each set and verifies that every derived role referenced by a rule is
    /// defined in the batch or in `known_derived_roles` (normally the
    /// store's current definitions).
    #[must_use]
    pub fn validate_batch(
        &self,
        policies: &[Policy],
        derived_roles: &[DerivedRole],
        known_derived_roles: &HashSet<String>,
    ) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::ok();

        let mut policy_names = HashSet::new();
        for policy in policies {
            if !policy.name.is_empty() && !policy_names.insert(policy.name.as_str()) {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Semantic,
                        format!("duplicate policy name '{}'", policy.name),
                    )
                    .for_policy(&policy.name),
                );
            }
            outcome.merge(self.validate_enhanced(policy));
        }

        let mut role_names = HashSet::new();
        for role in derived_roles {
            if !role.name.is_empty() && !role_names.insert(role.name.as_str()) {
                outcome.push_error(ValidationIssue::new(
                    IssueTag::Semantic,
                    format!("duplicate derived role name '{}'", role.name),
                ));
            }
            outcome.merge(self.validate_derived_role(role));
        }

        // Cross-references: rules may only import derived roles that exist in
        // this batch or are already defined.
        for policy in policies {
            for rule in &policy.rules {
                for derived in &rule.derived_roles {
                    if !role_names.contains(derived.as_str())
                        && !known_derived_roles.contains(derived)
                    {
                        outcome.push_error(
                            ValidationIssue::new(
                                IssueTag::Semantic,
                                format!("rule references unknown derived role '{derived}'"),
                            )
                            .for_policy(&policy.name)
                            .for_rule(&rule.name),
                        );
                    }
                }
            }
        }

        self.finish(&mut outcome);
        outcome
    }

    // -------------------------------------------------------------------------
    // Enhanced validation
    // -------------------------------------------------------------------------

    /// Runs the basic checks plus the configured enhanced checks: cycle
    /// detection over the derived-role graph, allowed-action and
    /// allowed-resource vetting, and a dry evaluation of each condition.
    #[must_use]
    pub fn validate_enhanced(&self, policy: &Policy) -> ValidationOutcome {
        let mut outcome = self.check_policy(policy);

        if self.config.check_circular_dep {
            for cycle in detect_cycles(policy, self.config.max_rule_depth) {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::CircularDep,
                        format!("circular derived role dependency: {cycle}"),
                    )
                    .for_policy(&policy.name),
                );
            }
        }

        if !self.config.allowed_actions.is_empty() {
            for rule in &policy.rules {
                for action in &rule.actions {
                    if action != "*" && !self.config.allowed_actions.contains(action) {
                        outcome.push_warning(
                            ValidationIssue::new(
                                IssueTag::Semantic,
                                format!("action '{action}' is not in the allowed action list"),
                            )
                            .for_policy(&policy.name)
                            .for_rule(&rule.name),
                        );
                    }
                }
            }
        }

        if !self.config.allowed_resources.is_empty()
            && policy.resource_kind != "*"
            && !self.config.allowed_resources.contains(&policy.resource_kind)
        {
            outcome.push_warning(
                ValidationIssue::new(
                    IssueTag::Semantic,
                    format!(
                        "resource kind '{}' is not in the allowed resource list",
                        policy.resource_kind
                    ),
                )
                .for_policy(&policy.name),
            );
        }

        if self.config.validate_cel {
            for rule in &policy.rules {
                if let Some(condition) = rule.condition.as_deref()
                    && self.conditions.get_or_compile(condition).is_ok()
                    && let Err(e) = self.conditions.evaluate(condition, &ConditionInput::new())
                {
                    outcome.push_warning(
                        ValidationIssue::new(
                            IssueTag::Cel,
                            format!("condition failed a dry evaluation: {e}"),
                        )
                        .for_policy(&policy.name)
                        .for_rule(&rule.name),
                    );
                }
            }
        }

        self.finish(&mut outcome);
        outcome
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// The basic checks, unpromoted.
    fn check_policy(&self, policy: &Policy) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::ok();

        // Required fields and identifier formats.
        if policy.name.is_empty() {
            outcome.push_error(ValidationIssue::new(
                IssueTag::Schema,
                "policy name is required",
            ));
        } else if !is_valid_name(&policy.name) {
            outcome.push_error(
                ValidationIssue::new(
                    IssueTag::Syntax,
                    format!("invalid policy name '{}'", policy.name),
                )
                .for_policy(&policy.name),
            );
        }

        if policy.api_version.is_empty() {
            outcome.push_error(
                ValidationIssue::new(IssueTag::Schema, "apiVersion is required")
                    .for_policy(&policy.name),
            );
        }

        if policy.resource_kind.is_empty() {
            outcome.push_error(
                ValidationIssue::new(IssueTag::Schema, "resourceKind is required")
                    .for_policy(&policy.name),
            );
        } else if !is_valid_kind(&policy.resource_kind) {
            outcome.push_error(
                ValidationIssue::new(
                    IssueTag::Syntax,
                    format!("invalid resource kind '{}'", policy.resource_kind),
                )
                .for_policy(&policy.name),
            );
        }

        // Rules.
        let mut rule_names = HashSet::new();
        for rule in &policy.rules {
            self.check_rule(policy, rule, &mut rule_names, &mut outcome);
        }

        // Principal policies carry extra required shape.
        if policy.principal_policy {
            let selector_ok = policy
                .principal
                .as_ref()
                .is_some_and(|sel| !sel.is_empty());
            if !selector_ok {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Schema,
                        "principal policy requires a principal selector with an id or at least one role",
                    )
                    .for_policy(&policy.name),
                );
            }
            if policy.resources.is_empty() {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Schema,
                        "principal policy requires at least one resource selector",
                    )
                    .for_policy(&policy.name),
                );
            }
            for selector in &policy.resources {
                if selector.kind.is_empty() {
                    outcome.push_error(
                        ValidationIssue::new(
                            IssueTag::Schema,
                            "resource selector requires a non-empty kind",
                        )
                        .for_policy(&policy.name),
                    );
                } else if !is_valid_kind(&selector.kind) {
                    outcome.push_error(
                        ValidationIssue::new(
                            IssueTag::Syntax,
                            format!("invalid resource selector kind '{}'", selector.kind),
                        )
                        .for_policy(&policy.name),
                    );
                }
            }
        }

        // Advisory checks.
        if policy.rules.is_empty() {
            outcome.push_warning(
                ValidationIssue::new(IssueTag::Schema, "policy has no rules")
                    .for_policy(&policy.name),
            );
        }
        self.check_shadowed_rules(policy, &mut outcome);

        outcome
    }

    fn check_rule<'a>(
        &self,
        policy: &Policy,
        rule: &'a Rule,
        rule_names: &mut HashSet<&'a str>,
        outcome: &mut ValidationOutcome,
    ) {
        if rule.name.is_empty() {
            outcome.push_error(
                ValidationIssue::new(IssueTag::Schema, "rule name is required")
                    .for_policy(&policy.name),
            );
        } else {
            if !is_valid_name(&rule.name) {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Syntax,
                        format!("invalid rule name '{}'", rule.name),
                    )
                    .for_policy(&policy.name)
                    .for_rule(&rule.name),
                );
            }
            if !rule_names.insert(rule.name.as_str()) {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Semantic,
                        format!("duplicate rule name '{}'", rule.name),
                    )
                    .for_policy(&policy.name)
                    .for_rule(&rule.name),
                );
            }
        }

        if rule.actions.is_empty() {
            outcome.push_error(
                ValidationIssue::new(IssueTag::Schema, "rule requires at least one action")
                    .for_policy(&policy.name)
                    .for_rule(&rule.name),
            );
        }
        for action in &rule.actions {
            if !is_valid_action(action) {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Syntax,
                        format!("invalid action '{action}'"),
                    )
                    .for_policy(&policy.name)
                    .for_rule(&rule.name),
                );
            }
        }

        for role in &rule.roles {
            if !is_valid_name(role) {
                outcome.push_error(
                    ValidationIssue::new(IssueTag::Syntax, format!("invalid role name '{role}'"))
                        .for_policy(&policy.name)
                        .for_rule(&rule.name),
                );
            }
        }
        for derived in &rule.derived_roles {
            if !is_valid_name(derived) {
                outcome.push_error(
                    ValidationIssue::new(
                        IssueTag::Syntax,
                        format!("invalid derived role reference '{derived}'"),
                    )
                    .for_policy(&policy.name)
                    .for_rule(&rule.name),
                );
            }
        }

        if let Some(condition) = rule.condition.as_deref() {
            self.check_condition(condition, &policy.name, Some(&rule.name), outcome);
        }
    }

    /// Basic condition check: the source must compile. This always runs,
    /// independent of `validate_cel`.
    fn check_condition(
        &self,
        condition: &str,
        policy: &str,
        rule: Option<&str>,
        outcome: &mut ValidationOutcome,
    ) {
        if let Err(e) = self.conditions.get_or_compile(condition) {
            let issues = match e.validation_issues() {
                Some(issues) => issues.to_vec(),
                None => vec![ValidationIssue::new(IssueTag::Cel, e.to_string())],
            };
            for mut issue in issues {
                issue.policy = Some(policy.to_string());
                issue.rule = rule.map(String::from);
                outcome.push_error(issue);
            }
        }
    }

    /// Warns about deny rules whose action sets were already covered by an
    /// earlier allow rule.
    fn check_shadowed_rules(&self, policy: &Policy, outcome: &mut ValidationOutcome) {
        for (i, later) in policy.rules.iter().enumerate() {
            if later.effect != sentra_core::policy::Effect::Deny {
                continue;
            }
            for earlier in &policy.rules[..i] {
                if earlier.effect == sentra_core::policy::Effect::Allow
                    && earlier.overlaps_actions(later)
                {
                    outcome.push_warning(
                        ValidationIssue::new(
                            IssueTag::Conflict,
                            format!(
                                "rule '{}' might be unreachable: earlier allow rule '{}' has overlapping actions and opposite effect",
                                later.name, earlier.name
                            ),
                        )
                        .for_policy(&policy.name)
                        .for_rule(&later.name),
                    );
                    break;
                }
            }
        }
    }

    fn finish(&self, outcome: &mut ValidationOutcome) {
        if self.config.strict_mode {
            outcome.promote_warnings();
        }
    }
}

// =============================================================================
// Cycle detection
// =============================================================================

/// Finds cycles in the derived-role dependency graph of one policy.
///
/// An edge `r -> q` exists when a rule importing derived role `r` also lists
/// role `q`. Returns each cycle as an `A -> B -> A` path.
fn detect_cycles(policy: &Policy, max_depth: usize) -> Vec<String> {
    let mut graph: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for rule in &policy.rules {
        for derived in &rule.derived_roles {
            let targets = graph.entry(derived.as_str()).or_default();
            for role in &rule.roles {
                targets.insert(role.as_str());
            }
        }
    }

    let mut cycles = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let starts: Vec<&str> = graph.keys().copied().collect();
    for start in starts {
        if !visited.contains(start) {
            let mut stack = Vec::new();
            walk(start, &graph, &mut visited, &mut stack, max_depth, &mut cycles);
        }
    }
    cycles
}

fn walk<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    max_depth: usize,
    cycles: &mut Vec<String>,
) {
    if let Some(pos) = stack.iter().position(|&n| n == node) {
        let mut path: Vec<&str> = stack[pos..].to_vec();
        path.push(node);
        cycles.push(path.join(" -> "));
        return;
    }
    if visited.contains(node) || stack.len() >= max_depth {
        return;
    }

    stack.push(node);
    if let Some(targets) = graph.get(node) {
        for &next in targets {
            walk(next, graph, visited, stack, max_depth, cycles);
        }
    }
    stack.pop();
    visited.insert(node);
}
