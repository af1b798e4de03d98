use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Backends hand out numeric and string identifiers interchangeably, so every
// id is carried as an opaque trimmed string.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new id from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the underlying string value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $kind, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        kind: $kind.to_string(),
                    });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a test (exam) as issued by the test source.
    TestId,
    "TestId"
);
string_id!(
    /// Identifier of the student taking a session.
    StudentId,
    "StudentId"
);
string_id!(
    /// Identifier of a question, unique within its test.
    QuestionId,
    "QuestionId"
);
string_id!(
    /// Identifier of an answer option, never reused across questions.
    AnswerId,
    "AnswerId"
);

/// Error type for parsing ID from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_id_display() {
        let id = QuestionId::new("q1");
        assert_eq!(id.to_string(), "q1");
        assert_eq!(format!("{id:?}"), "QuestionId(q1)");
    }

    #[test]
    fn answer_id_from_str_trims() {
        let id: AnswerId = "  B ".parse().unwrap();
        assert_eq!(id, AnswerId::new("B"));
    }

    #[test]
    fn blank_id_is_rejected() {
        assert!("   ".parse::<TestId>().is_err());
    }

    #[test]
    fn numeric_ids_become_strings() {
        assert_eq!(StudentId::from(42_u64).as_str(), "42");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&QuestionId::new("q7")).unwrap();
        assert_eq!(json, "\"q7\"");
    }
}
