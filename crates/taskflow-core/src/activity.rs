use serde::{Deserialize, Serialize};

/// Audit action recorded for every task mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Completed,
    Reopened,
    Deleted,
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Completed => write!(f, "completed"),
            Self::Reopened => write!(f, "reopened"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for ActivityAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "completed" => Ok(Self::Completed),
            "reopened" => Ok(Self::Reopened),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown activity action: {other}")),
        }
    }
}
