use std::fmt;

use serde::{Deserialize, Serialize};

use crate::activity::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffKind {
    Create,
    Update,
    Delete,
}

impl DiffKind {
    /// Activity log level for an applied change of this kind.
    pub fn log_level(self) -> LogLevel {
        match self {
            DiffKind::Create => LogLevel::Add,
            DiffKind::Update => LogLevel::Update,
            DiffKind::Delete => LogLevel::Delete,
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            DiffKind::Create => "Added",
            DiffKind::Update => "Updated",
            DiffKind::Delete => "Deleted",
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKind::Create => write!(f, "+"),
            DiffKind::Update => write!(f, "~"),
            DiffKind::Delete => write!(f, "-"),
        }
    }
}
