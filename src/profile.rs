//! Federated user profiles asserted by external identity providers.
//!
//! A [`FederatedProfile`] is the provider's claim about a user for a single
//! login attempt. It is transient: the orchestrator maps it to local user
//! fields, snapshots the parts a session needs, and drops it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The provider's claims about a user for one authentication attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FederatedProfile {
    /// Stable subject identifier asserted by the provider
    pub subject: String,

    /// Email address, if asserted as a first-class field
    pub email: Option<String>,

    /// Given name, if asserted as a first-class field
    pub given_name: Option<String>,

    /// Family name, if asserted as a first-class field
    pub family_name: Option<String>,

    /// Free-form attribute dictionary. Values may be scalars or lists
    /// depending on the protocol (SAML attributes are lists by nature).
    pub attributes: HashMap<String, serde_json::Value>,

    /// Group memberships asserted by the provider
    pub groups: Vec<String>,
}

impl FederatedProfile {
    /// Create a profile for the given subject.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Set the email claim.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the given-name claim.
    pub fn with_given_name(mut self, name: impl Into<String>) -> Self {
        self.given_name = Some(name.into());
        self
    }

    /// Set the family-name claim.
    pub fn with_family_name(mut self, name: impl Into<String>) -> Self {
        self.family_name = Some(name.into());
        self
    }

    /// Add an attribute claim.
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Set group memberships.
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Extract a named attribute with a profile-native fallback.
    ///
    /// Lookup order: the attribute dictionary first (taking the first element
    /// when the stored value is a list), then the supplied fallback, then the
    /// empty string. Extraction never fails; it degrades to empty so that a
    /// sparse assertion still maps to *something* the validation layer can
    /// judge.
    pub fn attribute(&self, name: &str, fallback: Option<&str>) -> String {
        if let Some(value) = self.attributes.get(name) {
            if let Some(text) = scalar_text(value) {
                return text;
            }
        }
        fallback.unwrap_or("").to_string()
    }

    /// Extract an attribute with no fallback.
    pub fn attribute_or_empty(&self, name: &str) -> String {
        self.attribute(name, None)
    }
}

/// Render a JSON claim value as scalar text, taking the first element of a
/// list-valued claim. Non-textual scalars (numbers, booleans) are rendered
/// with their JSON representation; null and empty lists yield nothing.
fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.first().and_then(scalar_text),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attribute_prefers_dictionary_over_fallback() {
        let profile = FederatedProfile::new("subj-1")
            .with_email("native@example.com")
            .with_attribute("mail", json!("mapped@example.com"));

        assert_eq!(
            profile.attribute("mail", profile.email.as_deref()),
            "mapped@example.com"
        );
    }

    #[test]
    fn list_valued_attribute_takes_first_element() {
        let profile = FederatedProfile::new("subj-1")
            .with_attribute("department", json!(["engineering", "platform"]));

        assert_eq!(profile.attribute_or_empty("department"), "engineering");
    }

    #[test]
    fn missing_attribute_uses_fallback() {
        let profile = FederatedProfile::new("subj-1").with_email("native@example.com");
        assert_eq!(
            profile.attribute("mail", profile.email.as_deref()),
            "native@example.com"
        );
    }

    #[test]
    fn extraction_degrades_to_empty_never_fails() {
        let profile = FederatedProfile::new("subj-1");
        assert_eq!(profile.attribute("mail", None), "");
        assert_eq!(
            profile
                .clone()
                .with_attribute("mail", json!(null))
                .attribute("mail", None),
            ""
        );
        assert_eq!(
            profile
                .with_attribute("mail", json!([]))
                .attribute("mail", None),
            ""
        );
    }
}
