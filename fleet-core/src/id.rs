//! Typed identifiers used across the fleet orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers keep creature names, cost identities, and event ids
/// from being mixed up at call sites. No format is enforced beyond what
/// each wrapper's constructor validates.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a raw string as this id type.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(CreatureName, "A creature's unique lowercase identifier.");

/// The key under which token usage accrues: a creature name, `creator:<name>`,
/// or `_narrator`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    /// Identity for a creature's own LLM usage.
    pub fn creature(name: &CreatureName) -> Self {
        Self(name.0.clone())
    }

    /// Identity for a Creator run against a given creature.
    pub fn creator(name: &CreatureName) -> Self {
        Self(format!("creator:{}", name.0))
    }

    /// Identity for the narrator's own usage.
    pub fn narrator() -> Self {
        Self("_narrator".to_string())
    }

    /// The bare creature name this identity is about, if any.
    ///
    /// For `"<prefix>:<name>"` identities this returns `<name>`; for a bare
    /// creature identity it returns the identity itself.
    pub fn creature_name(&self) -> &str {
        match self.0.split_once(':') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Validate a creature name: lowercase identifier, at most 32 characters.
pub fn is_valid_creature_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(is_valid_creature_name("alpha"));
        assert!(is_valid_creature_name("alpha-2"));
        assert!(is_valid_creature_name("a"));
    }

    #[test]
    fn invalid_names() {
        assert!(!is_valid_creature_name(""));
        assert!(!is_valid_creature_name("Alpha"));
        assert!(!is_valid_creature_name(&"a".repeat(33)));
        assert!(!is_valid_creature_name("has space"));
    }

    #[test]
    fn identity_creature_name_strips_prefix() {
        let name = CreatureName::new("beta");
        assert_eq!(Identity::creator(&name).creature_name(), "beta");
        assert_eq!(Identity::creature(&name).creature_name(), "beta");
        assert_eq!(Identity::narrator().creature_name(), "_narrator");
    }
}
