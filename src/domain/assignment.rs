//! Assignments of resources to nodes
//!
//! An assignment carries a current and a target state, each a set of
//! capability flags. It is settled once both sets are equal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One capability of an assignment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFlag {
    Connect,
    Deploy,
    Diskless,
    /// Any flag this agent does not interpret, kept verbatim
    Other(String),
}

impl StateFlag {
    /// Parse a single flag token
    pub fn parse(token: &str) -> Self {
        match token {
            "connect" => StateFlag::Connect,
            "deploy" => StateFlag::Deploy,
            "diskless" => StateFlag::Diskless,
            other => StateFlag::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StateFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFlag::Connect => write!(f, "connect"),
            StateFlag::Deploy => write!(f, "deploy"),
            StateFlag::Diskless => write!(f, "diskless"),
            StateFlag::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Unordered set of state flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags(BTreeSet<StateFlag>);

impl StateFlags {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `|`-separated flag list such as `connect|deploy|diskless`
    pub fn parse(s: &str) -> Self {
        Self(
            s.split('|')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(StateFlag::parse)
                .collect(),
        )
    }

    pub fn insert(&mut self, flag: StateFlag) {
        self.0.insert(flag);
    }

    pub fn contains(&self, flag: &StateFlag) -> bool {
        self.0.contains(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<StateFlag> for StateFlags {
    fn from_iter<I: IntoIterator<Item = StateFlag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<String> = self.0.iter().map(|flag| flag.to_string()).collect();
        write!(f, "{}", flags.join("|"))
    }
}

/// Binding of a resource to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub resource: String,
    pub node: String,
    pub current: StateFlags,
    pub target: StateFlags,
}

impl Assignment {
    /// Current state has caught up with the target state
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// The node holds no local backing storage for this resource.
    ///
    /// Such assignments own no data and may be removed automatically.
    pub fn is_client_only(&self) -> bool {
        self.target.contains(&StateFlag::Diskless)
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} (current: {}, target: {})",
            self.resource, self.node, self.current, self.target
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(current: &str, target: &str) -> Assignment {
        Assignment {
            resource: "r0".into(),
            node: "kubelet-a".into(),
            current: StateFlags::parse(current),
            target: StateFlags::parse(target),
        }
    }

    #[test]
    fn test_settled_ignores_flag_order() {
        assert!(assignment("connect|deploy", "connect|deploy").is_settled());
        assert!(assignment("deploy|connect", "connect|deploy").is_settled());
        assert!(!assignment("connect|deploy", "connect|deploy|diskless").is_settled());
        assert!(!assignment("", "connect|deploy").is_settled());
    }

    #[test]
    fn test_client_only() {
        assert!(assignment("connect|deploy|diskless", "connect|deploy|diskless").is_client_only());
        assert!(!assignment("connect|deploy", "connect|deploy").is_client_only());
    }

    #[test]
    fn test_unknown_flags_are_kept() {
        let flags = StateFlags::parse("connect| overwrite |deploy");
        assert!(flags.contains(&StateFlag::Other("overwrite".into())));
        assert_eq!(flags.to_string(), "connect|deploy|overwrite");
    }
}
