//! Note types and identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier of a note: its path in the store without the `.md` suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Creates a note ID without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses and validates a note ID.
    ///
    /// IDs are relative slash-separated paths: non-empty segments, no `.` or
    /// `..` segments, no backslashes and no `.md` suffix (the suffix belongs
    /// to the file name, not the ID).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] when the ID is not a valid note path.
    pub fn parse(id: &str) -> crate::Result<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidInput("note id is empty".to_string()));
        }
        if trimmed.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "note id '{trimmed}' contains a backslash"
            )));
        }
        if trimmed.ends_with(".md") {
            return Err(crate::Error::InvalidInput(format!(
                "note id '{trimmed}' must not include the .md extension"
            )));
        }
        let bad_segment = trimmed
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if bad_segment {
            return Err(crate::Error::InvalidInput(format!(
                "note id '{trimmed}' is not a relative path"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Checks an ID built with [`Self::new`] against the rules of [`Self::parse`].
    ///
    /// Unlike `parse`, surrounding whitespace is an error rather than trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] when the ID would not map back
    /// from its own store path.
    pub fn validated(self) -> crate::Result<Self> {
        if Self::parse(&self.0)? != self {
            return Err(crate::Error::InvalidInput(format!(
                "note id '{}' has surrounding whitespace",
                self.0
            )));
        }
        Ok(self)
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque version marker issued by the remote store.
///
/// For git-backed stores this is a commit or blob id; the in-memory store
/// uses content hashes and sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Creates a version token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Creates a token from the SHA-256 of a note body.
    #[must_use]
    pub fn for_content(body: &str) -> Self {
        Self(content_hash(body))
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 7 characters, as git shortens commit ids.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded SHA-256 of a note body.
#[must_use]
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// A single markdown note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Stable identifier.
    pub id: NoteId,
    /// Raw markdown body.
    pub body: String,
    /// Last version token seen from the remote, if the note was ever synced.
    pub version: Option<VersionToken>,
}

impl Note {
    /// Creates a note that has never been synced.
    #[must_use]
    pub fn new(id: NoteId, body: impl Into<String>) -> Self {
        Self {
            id,
            body: body.into(),
            version: None,
        }
    }

    /// Sets the remote version token.
    #[must_use]
    pub fn with_version(mut self, version: VersionToken) -> Self {
        self.version = Some(version);
        self
    }
}

/// The full local view of the notebook, keyed by note id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteSet {
    notes: BTreeMap<NoteId, Note>,
}

impl NoteSet {
    /// Creates an empty note set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the note with the given id.
    #[must_use]
    pub fn get(&self, id: &NoteId) -> Option<&Note> {
        self.notes.get(id)
    }

    /// Returns the body of the note with the given id.
    #[must_use]
    pub fn body(&self, id: &NoteId) -> Option<&str> {
        self.notes.get(id).map(|note| note.body.as_str())
    }

    /// Returns true if a note with the id exists.
    #[must_use]
    pub fn contains(&self, id: &NoteId) -> bool {
        self.notes.contains_key(id)
    }

    /// Inserts or replaces a note, returning the previous one.
    pub fn insert(&mut self, note: Note) -> Option<Note> {
        self.notes.insert(note.id.clone(), note)
    }

    /// Removes a note.
    pub fn remove(&mut self, id: &NoteId) -> Option<Note> {
        self.notes.remove(id)
    }

    /// Sets the version token of an existing note.
    pub fn set_version(&mut self, id: &NoteId, version: VersionToken) {
        if let Some(note) = self.notes.get_mut(id) {
            note.version = Some(version);
        }
    }

    /// Iterates notes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    /// Iterates note ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &NoteId> {
        self.notes.keys()
    }

    /// Number of notes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Returns true if there are no notes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Returns the id -> body view, ignoring version tokens.
    #[must_use]
    pub fn bodies(&self) -> BTreeMap<NoteId, String> {
        self.notes
            .iter()
            .map(|(id, note)| (id.clone(), note.body.clone()))
            .collect()
    }
}

impl FromIterator<Note> for NoteSet {
    fn from_iter<I: IntoIterator<Item = Note>>(iter: I) -> Self {
        Self {
            notes: iter
                .into_iter()
                .map(|note| (note.id.clone(), note))
                .collect(),
        }
    }
}
