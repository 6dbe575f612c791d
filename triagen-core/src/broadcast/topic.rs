//! Broadcast topics
//!
//! Topic strings coming from observers are sanitised and parsed into the
//! closed [`Topic`] enum; anything else is rejected.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TriageError;
use crate::model::{IncidentId, TeamId};

/// Logical broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    /// Every connected observer
    General,
    /// Members of one team
    Team(TeamId),
    /// Observers watching one incident
    Incident(IncidentId),
}

impl Topic {
    pub fn team(id: impl Into<TeamId>) -> Self {
        Self::Team(id.into())
    }

    pub fn incident(id: impl Into<IncidentId>) -> Self {
        Self::Incident(id.into())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Team(id) => write!(f, "team:{}", id),
            Self::Incident(id) => write!(f, "incident:{}", id),
        }
    }
}

impl FromStr for Topic {
    type Err = TriageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let cleaned: String = raw.chars().filter(|c| *c != '"').collect();
        let cleaned = cleaned.trim();

        if cleaned == "general" {
            return Ok(Self::General);
        }

        let (prefix, id) = cleaned
            .split_once(':')
            .ok_or_else(|| TriageError::validation(format!("unknown topic '{}'", cleaned)))?;

        if id.is_empty() || id.contains(char::is_whitespace) {
            return Err(TriageError::validation(format!(
                "topic '{}' has an invalid id",
                cleaned
            )));
        }

        match prefix {
            "team" => Ok(Self::Team(id.to_string())),
            "incident" => Ok(Self::Incident(id.to_string())),
            _ => Err(TriageError::validation(format!(
                "unknown topic prefix '{}'",
                prefix
            ))),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = TriageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips() {
        for topic in [
            Topic::General,
            Topic::team("t-1"),
            Topic::incident("0b8e6d1c"),
        ] {
            assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn test_quotes_are_stripped() {
        let topic: Topic = "\"incident:42\"".parse().unwrap();
        assert_eq!(topic, Topic::incident("42"));
    }

    #[test]
    fn test_rejects_unknown_shapes() {
        assert!("random".parse::<Topic>().is_err());
        assert!("user:1".parse::<Topic>().is_err());
        assert!("incident:".parse::<Topic>().is_err());
        assert!("team:a b".parse::<Topic>().is_err());
    }
}
