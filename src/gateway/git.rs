//! Git-backed note store.
//!
//! A branch of a local git repository acts as the versioned remote: every
//! batch becomes one commit, the commit id is the store version and blob ids
//! are per-note versions. Blocking libgit2 work runs on the blocking pool.
//!
//! Note bodies are text. A `.md` file that is not valid UTF-8 is left out of
//! snapshots with a warning, so it is never loaded, edited or overwritten
//! through a lossy conversion.

use super::{
    CommitBatch, GatewayError, RemoteGateway, RemoteNote, RemoteSnapshot, note_id_from_path,
    note_path,
};
use crate::models::{DEFAULT_BRANCH, VersionToken};
use async_trait::async_trait;
use git2::{
    Commit, ErrorClass, ErrorCode, Index, IndexEntry, IndexTime, ObjectType, Repository,
    Signature, TreeWalkMode, TreeWalkResult,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Regular, non-executable file mode.
const FILE_MODE: u32 = 0o100_644;

/// Note store on a branch of a local git repository.
#[derive(Debug, Clone)]
pub struct GitGateway {
    /// Path to the repository.
    repo_path: PathBuf,
    /// Branch holding the notes.
    branch: String,
}

impl GitGateway {
    /// Creates a gateway for an existing repository.
    #[must_use]
    pub fn new(repo_path: impl AsRef<Path>) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Creates a bare repository at `repo_path` if none exists, with HEAD on
    /// the gateway's branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be opened or created.
    pub fn init(self) -> crate::Result<Self> {
        if Repository::open(&self.repo_path).is_ok() {
            return Ok(self);
        }
        let repo =
            Repository::init_bare(&self.repo_path).map_err(|e| crate::Error::OperationFailed {
                operation: "init_repository".to_string(),
                cause: e.to_string(),
            })?;
        repo.set_head(&self.refname())
            .map_err(|e| crate::Error::OperationFailed {
                operation: "set_head".to_string(),
                cause: e.to_string(),
            })?;
        Ok(self)
    }

    /// Returns the repository path.
    #[must_use]
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn refname(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn open_repo(&self) -> Result<Repository, GatewayError> {
        Repository::open(&self.repo_path).map_err(map_git_error)
    }

    /// Tip of the branch, `None` while the branch is unborn.
    fn tip<'r>(&self, repo: &'r Repository) -> Result<Option<Commit<'r>>, GatewayError> {
        match repo.find_reference(&self.refname()) {
            Ok(reference) => reference
                .peel_to_commit()
                .map(Some)
                .map_err(map_git_error),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(map_git_error(e)),
        }
    }

    fn signature(repo: &Repository) -> Result<Signature<'static>, GatewayError> {
        repo.signature()
            .or_else(|_| Signature::now("lumen", "lumen@local"))
            .map_err(map_git_error)
    }

    fn read_snapshot(&self) -> Result<RemoteSnapshot, GatewayError> {
        let repo = self.open_repo()?;
        let Some(commit) = self.tip(&repo)? else {
            return Ok(RemoteSnapshot::empty());
        };
        let tree = commit.tree().map_err(map_git_error)?;

        let mut notes = BTreeMap::new();
        let mut failure = None;
        let walked = tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() != Some(ObjectType::Blob) {
                return TreeWalkResult::Ok;
            }
            let Some(name) = entry.name() else {
                return TreeWalkResult::Ok;
            };
            let Some(id) = note_id_from_path(&format!("{root}{name}")) else {
                return TreeWalkResult::Ok;
            };
            match repo.find_blob(entry.id()) {
                Ok(blob) => {
                    match std::str::from_utf8(blob.content()) {
                        Ok(body) => {
                            notes.insert(
                                id,
                                RemoteNote {
                                    body: body.to_string(),
                                    version: VersionToken::new(entry.id().to_string()),
                                },
                            );
                        },
                        Err(e) => warn!(note = %id, error = %e, "skipping note that is not UTF-8"),
                    }
                    TreeWalkResult::Ok
                },
                Err(e) => {
                    failure = Some(e);
                    TreeWalkResult::Abort
                },
            }
        });
        if let Some(e) = failure {
            return Err(map_git_error(e));
        }
        walked.map_err(map_git_error)?;

        Ok(RemoteSnapshot {
            notes,
            version: Some(VersionToken::new(commit.id().to_string())),
        })
    }

    fn write_batch(&self, batch: &CommitBatch) -> Result<VersionToken, GatewayError> {
        let repo = self.open_repo()?;
        let parent = self.tip(&repo)?;

        let mut index = Index::new().map_err(map_git_error)?;
        if let Some(parent) = &parent {
            let tree = parent.tree().map_err(map_git_error)?;
            index.read_tree(&tree).map_err(map_git_error)?;
        }

        for (id, body) in &batch.upserts {
            let oid = repo.blob(body.as_bytes()).map_err(map_git_error)?;
            index
                .add(&IndexEntry {
                    ctime: IndexTime::new(0, 0),
                    mtime: IndexTime::new(0, 0),
                    dev: 0,
                    ino: 0,
                    mode: FILE_MODE,
                    uid: 0,
                    gid: 0,
                    file_size: u32::try_from(body.len()).unwrap_or(u32::MAX),
                    id: oid,
                    flags: 0,
                    flags_extended: 0,
                    path: note_path(id).into_bytes(),
                })
                .map_err(map_git_error)?;
        }
        for id in &batch.deletes {
            let path = note_path(id);
            let path = Path::new(&path);
            if index.get_path(path, 0).is_some() {
                index.remove(path, 0).map_err(map_git_error)?;
            }
        }

        let tree_id = index.write_tree_to(&repo).map_err(map_git_error)?;
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            debug!(commit = %parent.id(), "batch matches the current tree, nothing to commit");
            return Ok(VersionToken::new(parent.id().to_string()));
        }
        let tree = repo.find_tree(tree_id).map_err(map_git_error)?;
        let signature = Self::signature(&repo)?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();

        // Updating the ref fails if the branch moved since `parent` was read.
        let commit_id = repo
            .commit(
                Some(&self.refname()),
                &signature,
                &signature,
                &batch.message(),
                &tree,
                &parents,
            )
            .map_err(map_git_error)?;

        Ok(VersionToken::new(commit_id.to_string()))
    }
}

#[async_trait]
impl RemoteGateway for GitGateway {
    #[instrument(skip(self), fields(operation = "git.fetch_all", branch = %self.branch))]
    async fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
        let gateway = self.clone();
        tokio::task::spawn_blocking(move || gateway.read_snapshot())
            .await
            .map_err(|e| GatewayError::Network(format!("git worker failed: {e}")))?
    }

    #[instrument(skip(self, batch), fields(operation = "git.commit_batch", branch = %self.branch, entries = batch.len()))]
    async fn commit_batch(&self, batch: CommitBatch) -> Result<VersionToken, GatewayError> {
        let gateway = self.clone();
        tokio::task::spawn_blocking(move || gateway.write_batch(&batch))
            .await
            .map_err(|e| GatewayError::Network(format!("git worker failed: {e}")))?
    }
}

/// Classifies a libgit2 error.
#[allow(clippy::needless_pass_by_value)]
fn map_git_error(e: git2::Error) -> GatewayError {
    let message = e.message().to_string();
    match (e.code(), e.class()) {
        (ErrorCode::Auth | ErrorCode::Certificate, _) => GatewayError::AuthRequired(message),
        (ErrorCode::NotFound | ErrorCode::Modified, _) => GatewayError::Rejected(message),
        (ErrorCode::Locked, _)
        | (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Os) => {
            GatewayError::Network(message)
        },
        _ => GatewayError::Rejected(message),
    }
}
