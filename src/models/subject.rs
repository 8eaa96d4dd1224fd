use serde::{Deserialize, Serialize};

/// Whether a subject is a user or a workspace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Workspace,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Workspace => "workspace",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "workspace" => Some(Self::Workspace),
            _ => None,
        }
    }
}

/// Something a feature can be granted to.
///
/// The id is opaque: existence is the identity provider's concern, never
/// checked here. The kind is part of the key, so `user:1` and `workspace:1`
/// are unrelated subjects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: String,
}

impl Subject {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            id: id.into(),
        }
    }

    pub fn workspace(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Workspace,
            id: id.into(),
        }
    }

    /// Parse the `kind:id` form used by the CLI and logs.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidInput(format!("expected kind:id, got {:?}", s)))?;
        let kind = SubjectKind::from_str(kind)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown subject kind {:?}", kind)))?;
        if id.is_empty() {
            return Err(crate::Error::InvalidInput("subject id is empty".to_string()));
        }
        Ok(Self {
            kind,
            id: id.to_string(),
        })
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_display() {
        let subject = Subject::workspace("w-42");
        assert_eq!(subject.to_string(), "workspace:w-42");
        assert_eq!(Subject::parse("workspace:w-42").unwrap(), subject);
    }

    #[test]
    fn test_id_may_contain_colons() {
        let subject = Subject::parse("user:oauth:123").unwrap();
        assert_eq!(subject, Subject::user("oauth:123"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Subject::parse("nobody").is_err());
        assert!(Subject::parse("team:1").is_err());
        assert!(Subject::parse("user:").is_err());
    }
}
