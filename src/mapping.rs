//! Attribute-to-role mapping for federated logins.
//!
//! Administrators attach an ordered list of [`RoleMappingRule`]s to a
//! provider. Resolution is first-match-wins over rules sorted by descending
//! priority, with declaration order breaking ties. Administrators write rule
//! order expecting exactly that behavior, so it must never be replaced with
//! best-match or most-specific-match semantics.

use crate::errors::FieldError;
use crate::profile::FederatedProfile;
use serde::{Deserialize, Serialize};

/// Local authorization role a federated identity resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Member,
    /// Lowest-privilege role; the default when no rule matches.
    #[default]
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a secondary condition inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "subject")]
pub enum ConditionSubject {
    /// A named attribute extracted from the profile
    Attribute { name: String },
    /// Any group membership
    Group,
    /// The domain part of the profile email
    EmailDomain,
}

/// Comparison operator for secondary conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    /// Value is a regular expression the subject must match
    Matches,
}

/// An optional secondary condition on a mapping rule. All conditions on a
/// rule must hold for the rule to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingCondition {
    #[serde(flatten)]
    pub subject: ConditionSubject,
    pub operator: ConditionOperator,
    pub value: String,
}

impl MappingCondition {
    fn holds(&self, profile: &FederatedProfile) -> bool {
        match &self.subject {
            ConditionSubject::Attribute { name } => {
                self.compare(&profile.attribute_or_empty(name))
            }
            ConditionSubject::Group => profile.groups.iter().any(|g| self.compare(g)),
            ConditionSubject::EmailDomain => {
                let email = profile.email.as_deref().unwrap_or("");
                match email.rsplit_once('@') {
                    Some((_, domain)) => self.compare(domain),
                    None => false,
                }
            }
        }
    }

    fn compare(&self, subject: &str) -> bool {
        match self.operator {
            ConditionOperator::Equals => subject == self.value,
            ConditionOperator::Contains => subject.contains(&self.value),
            ConditionOperator::StartsWith => subject.starts_with(&self.value),
            ConditionOperator::EndsWith => subject.ends_with(&self.value),
            // An unparseable pattern fails the condition rather than the
            // whole resolution; validation rejects bad patterns up front.
            ConditionOperator::Matches => regex::Regex::new(&self.value)
                .map(|re| re.is_match(subject))
                .unwrap_or(false),
        }
    }
}

/// One role-mapping rule: a group match or an attribute match (exactly one),
/// a target role, optional secondary conditions, and a priority.
///
/// Rules are immutable once attached to a provider; a provider update
/// replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMappingRule {
    /// Group-name match form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Attribute-name/value match form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_value: Option<String>,

    /// Role assigned when the rule matches
    pub role: Role,

    /// Secondary conditions; all must hold
    #[serde(default)]
    pub conditions: Vec<MappingCondition>,

    /// Higher priority wins; ties break by declaration order
    pub priority: i32,
}

impl RoleMappingRule {
    /// A group-membership rule.
    pub fn for_group(group: impl Into<String>, role: Role, priority: i32) -> Self {
        Self {
            group: Some(group.into()),
            attribute_name: None,
            attribute_value: None,
            role,
            conditions: Vec::new(),
            priority,
        }
    }

    /// An attribute-equality rule.
    pub fn for_attribute(
        name: impl Into<String>,
        value: impl Into<String>,
        role: Role,
        priority: i32,
    ) -> Self {
        Self {
            group: None,
            attribute_name: Some(name.into()),
            attribute_value: Some(value.into()),
            role,
            conditions: Vec::new(),
            priority,
        }
    }

    /// Attach a secondary condition.
    pub fn with_condition(mut self, condition: MappingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Whether the rule's primary match and every secondary condition hold.
    fn matches(&self, profile: &FederatedProfile) -> bool {
        let primary = match (&self.group, &self.attribute_name, &self.attribute_value) {
            (Some(group), _, _) => profile.groups.iter().any(|g| g == group),
            (None, Some(name), Some(value)) => &profile.attribute_or_empty(name) == value,
            _ => false,
        };
        primary && self.conditions.iter().all(|c| c.holds(profile))
    }

    /// Structural validation, reported per field.
    ///
    /// `index` positions the rule inside the provider's list for the field
    /// path, e.g. `role_mappings[2].group`.
    pub fn validate(&self, index: usize) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let prefix = format!("role_mappings[{index}]");

        match (
            self.group.as_deref(),
            self.attribute_name.as_deref(),
            self.attribute_value.as_deref(),
        ) {
            (Some(g), None, None) => {
                if g.trim().is_empty() {
                    errors.push(FieldError::new(
                        format!("{prefix}.group"),
                        "group name must not be empty",
                    ));
                }
            }
            (None, Some(name), Some(value)) => {
                if name.trim().is_empty() {
                    errors.push(FieldError::new(
                        format!("{prefix}.attribute_name"),
                        "attribute name must not be empty",
                    ));
                }
                if value.trim().is_empty() {
                    errors.push(FieldError::new(
                        format!("{prefix}.attribute_value"),
                        "attribute value must not be empty",
                    ));
                }
            }
            (None, Some(_), None) | (None, None, Some(_)) => {
                errors.push(FieldError::new(
                    prefix.clone(),
                    "attribute rules need both attribute_name and attribute_value",
                ));
            }
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                errors.push(FieldError::new(
                    prefix.clone(),
                    "rule must be either a group match or an attribute match, not both",
                ));
            }
            (None, None, None) => {
                errors.push(FieldError::new(
                    prefix.clone(),
                    "rule must specify a group or an attribute match",
                ));
            }
        }

        for (ci, condition) in self.conditions.iter().enumerate() {
            if condition.operator == ConditionOperator::Matches
                && regex::Regex::new(&condition.value).is_err()
            {
                errors.push(FieldError::new(
                    format!("{prefix}.conditions[{ci}].value"),
                    "invalid regular expression",
                ));
            }
        }

        errors
    }
}

/// Resolve the role for a profile against an ordered rule list.
///
/// Rules are considered in descending priority; equal priorities keep their
/// declaration order (stable sort). The first matching rule wins and its
/// role is returned immediately. With no match the default lowest-privilege
/// role applies.
pub fn resolve_role(profile: &FederatedProfile, rules: &[RoleMappingRule]) -> Role {
    let mut ordered: Vec<&RoleMappingRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

    for rule in ordered {
        if rule.matches(profile) {
            return rule.role;
        }
    }
    Role::default()
}
