//! Capability tags describing what a provider/model can do.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A capability a provider advertises and a request may require.
///
/// A provider is eligible for a request when its capability set is a
/// superset of the request's required set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Plain text generation.
    Text,
    /// Image inputs.
    Vision,
    /// Schema-constrained JSON output.
    StructuredJson,
    /// Large context windows (full curriculum drafts, long transcripts).
    LongContext,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Vision => "vision",
            Self::StructuredJson => "structured_json",
            Self::LongContext => "long_context",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn capability_serde_uses_snake_case() {
        let json = serde_json::to_string(&Capability::StructuredJson).expect("serialize");
        assert_eq!(json, "\"structured_json\"");

        let parsed: Capability = serde_json::from_str("\"long_context\"").expect("deserialize");
        assert_eq!(parsed, Capability::LongContext);
    }

    #[test]
    fn capability_set_superset_check() {
        let advertised: BTreeSet<Capability> =
            [Capability::Text, Capability::StructuredJson].into_iter().collect();
        let required: BTreeSet<Capability> = [Capability::StructuredJson].into_iter().collect();

        assert!(advertised.is_superset(&required));
        assert!(!required.is_superset(&advertised));
    }
}
