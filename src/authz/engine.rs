use serde_json::{Map, Value};

use crate::authz::condition::{Conditions, Outcome};
use crate::authz::types::{Decision, Effect, Policy, PolicyRule, PolicyStatus};
use crate::errors::ArbiterError;

pub const DEFAULT_DENY_REASON: &str = "no matching policy rule (default deny)";

/// A rule together with its compiled conditions.
#[derive(Debug, Clone)]
pub struct CandidateRule {
    pub rule: PolicyRule,
    /// `Err` holds the compile error of conditions stored before a parser
    /// change; such rules evaluate as indeterminate.
    conditions: Option<Result<Conditions, String>>,
}

impl CandidateRule {
    pub fn new(rule: PolicyRule) -> Self {
        let conditions = rule
            .conditions
            .as_ref()
            .map(|raw| Conditions::compile(raw).map_err(|e| e.to_string()));
        Self { rule, conditions }
    }
}

/// A policy applicable to the subject, together with its rules.
#[derive(Debug, Clone)]
pub struct CandidatePolicy {
    pub policy: Policy,
    pub rules: Vec<CandidateRule>,
}

impl CandidatePolicy {
    /// Conditions are compiled here, once per evaluation, not per match attempt.
    pub fn new(policy: Policy, rules: Vec<PolicyRule>) -> Self {
        Self {
            policy,
            rules: rules.into_iter().map(CandidateRule::new).collect(),
        }
    }
}

/// Resource/action/context of one access attempt, subject already resolved.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub action: &'a str,
    pub resource: &'a str,
    pub context: &'a Map<String, Value>,
}

/// Normalize the caller-supplied context. `null` means no attributes.
pub fn context_map(context: &Value) -> Result<Map<String, Value>, ArbiterError> {
    match context {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        _ => Err(ArbiterError::InvalidRequest(
            "context must be a JSON object".into(),
        )),
    }
}

struct Match<'a> {
    policy: &'a Policy,
    rule: &'a PolicyRule,
}

impl Match<'_> {
    fn order_key(&self) -> (i64, i32, i64) {
        (
            self.rule.created_at,
            self.policy.policy_number,
            self.rule.seq,
        )
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

/// Whether `rule` matches the target. Conditions that cannot be evaluated
/// count as a match for deny rules only.
fn rule_matches(policy: &Policy, candidate: &CandidateRule, target: &Target<'_>) -> bool {
    let rule = &candidate.rule;
    if !pattern_matches(&rule.resource, target.resource)
        || !pattern_matches(&rule.action, target.action)
    {
        return false;
    }
    let outcome = match &candidate.conditions {
        None => return true,
        Some(Ok(conditions)) => conditions.evaluate(target.context),
        Some(Err(e)) => Outcome::Indeterminate(e.clone()),
    };
    match outcome {
        Outcome::Satisfied => true,
        Outcome::Unsatisfied => false,
        Outcome::Indeterminate(why) => {
            tracing::warn!(
                policy_id = %policy.id,
                rule_id = %rule.id,
                effect = %rule.effect,
                reason = %why,
                "Rule condition is indeterminate"
            );
            rule.effect == Effect::Deny
        }
    }
}

/// Combine the rules of the candidate policies into one decision.
///
/// Only active policies take part. Any matching deny wins; otherwise any
/// matching allow; otherwise the default deny. Among matches of the winning
/// effect the earliest-defined rule is attributed.
pub fn decide(candidates: &[CandidatePolicy], target: &Target<'_>) -> Decision {
    let mut first_deny: Option<Match<'_>> = None;
    let mut first_allow: Option<Match<'_>> = None;

    for candidate in candidates {
        if candidate.policy.status != PolicyStatus::Active {
            continue;
        }
        for compiled in &candidate.rules {
            if !rule_matches(&candidate.policy, compiled, target) {
                continue;
            }
            let rule = &compiled.rule;
            let found = Match {
                policy: &candidate.policy,
                rule,
            };
            let slot = match rule.effect {
                Effect::Deny => &mut first_deny,
                Effect::Allow => &mut first_allow,
            };
            let earlier = match slot {
                Some(current) => found.order_key() < current.order_key(),
                None => true,
            };
            if earlier {
                *slot = Some(found);
            }
        }
    }

    if let Some(m) = first_deny {
        return attributed(false, &m);
    }
    if let Some(m) = first_allow {
        return attributed(true, &m);
    }
    Decision {
        allowed: false,
        reason: DEFAULT_DENY_REASON.to_string(),
        policy_id: None,
        rule_id: None,
    }
}

/// The reason names the rule's own patterns, so a wildcard that fired shows.
fn attributed(allowed: bool, m: &Match<'_>) -> Decision {
    let verdict = if allowed { "allowed" } else { "denied" };
    Decision {
        allowed,
        reason: format!(
            "{verdict} by policy {} rule ({}, {})",
            m.policy.id, m.rule.resource, m.rule.action
        ),
        policy_id: Some(m.policy.id.clone()),
        rule_id: Some(m.rule.id.clone()),
    }
}
