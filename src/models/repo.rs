//! Target repository (the auth context of a sync session).

use super::NoteId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default branch notes are committed to.
pub const DEFAULT_BRANCH: &str = "main";

/// The GitHub repository that holds the notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Branch notes are read from and committed to.
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

impl RepoTarget {
    /// Creates a target on the default branch.
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            branch: default_branch(),
        }
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Parses `owner/name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if either part is missing.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            },
            _ => Err(Error::InvalidInput(format!(
                "repository must be 'owner/name', got '{s}'"
            ))),
        }
    }

    /// URL of a note's markdown file on GitHub.
    #[must_use]
    pub fn blob_url(&self, id: &NoteId) -> String {
        format!(
            "https://github.com/{}/{}/blob/{}/{}.md",
            self.owner, self.name, self.branch, id
        )
    }
}

impl fmt::Display for RepoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
