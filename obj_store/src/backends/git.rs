use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use super::{memory::BytesReader, start_after_key};
use crate::{
    backend::Backend,
    config::GitConfig,
    error::{StoreError, StoreResult},
    session::{Session, SessionCache},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

/// Read-only backend over a version-controlled source tree.
///
/// Locators look like `git+https://host/org/repo/path/in/repo?ref=main`:
/// the first two path segments name the repository, the rest address a
/// file inside it, and the optional `ref` query parameter selects a
/// branch, tag or commit. Each distinct `{repository}+{ref}` is cloned
/// once into a
/// temporary bare snapshot and shared through the session cache.
pub struct GitBackend {
    conf: GitConfig,
    snapshots: SessionCache<GitSnapshot>,
}

impl GitBackend {
    pub fn new(conf: GitConfig) -> Self {
        GitBackend {
            conf,
            snapshots: SessionCache::new(),
        }
    }

    fn tmp_dir(&self) -> PathBuf {
        self.conf
            .tmp_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    async fn snapshot(&self, location: &GitLocation) -> StoreResult<Arc<GitSnapshot>> {
        let identity = format!(
            "{}+{}",
            location.repository,
            location.refname.as_deref().unwrap_or("")
        );
        let repository = location.repository.clone();
        let refname = location.refname.clone();
        let tmp_dir = self.tmp_dir();

        self.snapshots
            .get_or_create(&identity, || async move {
                debug!(repository, ?refname, "cloning repository snapshot");
                tokio::task::spawn_blocking(move || clone_snapshot(&repository, refname, &tmp_dir))
                    .await?
            })
            .await
    }
}

struct GitLocation {
    /// Clone URL, e.g. `https://host/org/repo`.
    repository: String,
    refname: Option<String>,
    /// Locator path of the repository root, `/{org}/{repo}`.
    base_path: String,
    /// Path of the object inside the repository, no leading slash.
    path: String,
}

fn parse_location(url: &Url) -> StoreResult<GitLocation> {
    let invalid = |reason: &str| StoreError::InvalidLocator {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let transport = match url.scheme() {
        "git+https" => "https",
        "git+ssh" => "ssh",
        _ => return Err(invalid("unhandled git scheme")),
    };

    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;

    // The first two path segments name the repository; the raw remainder
    // (trailing slash included) addresses content inside it.
    let mut segments = url.path().trim_start_matches('/').splitn(3, '/');
    let org = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("missing repository"))?;
    let repo = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("missing repository"))?;
    let path = segments.next().unwrap_or("").to_string();

    let refname = url
        .query_pairs()
        .find(|(k, _)| k == "ref")
        .map(|(_, v)| v.into_owned());

    Ok(GitLocation {
        repository: format!("{transport}://{host}/{org}/{repo}"),
        refname,
        base_path: format!("/{org}/{repo}"),
        path,
    })
}

/// A cloned, pinned repository state: a bare clone on disk plus the commit
/// the requested ref resolved to at clone time. The clone directory is
/// removed when the snapshot is dropped at cache shutdown.
struct GitSnapshot {
    dir: tempfile::TempDir,
    commit: git2::Oid,
    commit_time: Option<DateTime<Utc>>,
}

#[async_trait]
impl Session for GitSnapshot {}

fn clone_snapshot(
    repository: &str,
    refname: Option<String>,
    tmp_dir: &Path,
) -> StoreResult<GitSnapshot> {
    let dir = tempfile::Builder::new()
        .prefix("objstr-git-")
        .tempdir_in(tmp_dir)?;

    let mut builder = git2::build::RepoBuilder::new();
    builder.bare(true);

    let repo = builder.clone(repository, dir.path())?;
    let commit = resolve_commit(&repo, refname.as_deref())?;
    let commit_time = DateTime::from_timestamp(commit.time().seconds(), 0);
    let commit = commit.id();

    Ok(GitSnapshot {
        commit,
        commit_time,
        dir,
    })
}

/// `refname` may be a branch, a tag or a commit id. Branches a bare clone
/// keeps under `refs/remotes/origin/` are tried second.
fn resolve_commit<'r>(
    repo: &'r git2::Repository,
    refname: Option<&str>,
) -> StoreResult<git2::Commit<'r>> {
    let Some(refname) = refname else {
        return Ok(repo.head()?.peel_to_commit()?);
    };

    let object = repo
        .revparse_single(refname)
        .or_else(|_| repo.revparse_single(&format!("origin/{refname}")))
        .or_else(|_| repo.revparse_single(&format!("refs/tags/{refname}")))?;

    Ok(object.peel_to_commit()?)
}

fn map_git_err(err: git2::Error) -> StoreError {
    if err.code() == git2::ErrorCode::NotFound {
        StoreError::ObjectNotFound
    } else {
        err.into()
    }
}

impl GitSnapshot {
    fn open(&self) -> StoreResult<(git2::Repository, git2::Oid)> {
        let repo = git2::Repository::open_bare(self.dir.path())?;
        Ok((repo, self.commit))
    }

    fn read_blob(&self, path: &str) -> StoreResult<Bytes> {
        let (repo, oid) = self.open()?;
        let tree = repo.find_commit(oid)?.tree()?;
        let entry = tree.get_path(Path::new(path)).map_err(map_git_err)?;
        let blob = repo.find_blob(entry.id()).map_err(map_git_err)?;
        Ok(Bytes::copy_from_slice(blob.content()))
    }

    fn blob_size(&self, path: &str) -> StoreResult<u64> {
        let (repo, oid) = self.open()?;
        let tree = repo.find_commit(oid)?.tree()?;
        let entry = tree.get_path(Path::new(path)).map_err(map_git_err)?;
        let blob = repo.find_blob(entry.id()).map_err(map_git_err)?;
        Ok(blob.size() as u64)
    }

    fn list_blobs(&self, prefix: &str) -> StoreResult<Vec<(String, u64)>> {
        let (repo, oid) = self.open()?;
        let tree = repo.find_commit(oid)?.tree()?;
        let mut blobs = Vec::new();

        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    let full = format!("{root}{name}");
                    if full.starts_with(prefix) {
                        let size = repo
                            .find_blob(entry.id())
                            .map(|b| b.size() as u64)
                            .unwrap_or(0);
                        blobs.push((full, size));
                    }
                }
            }
            git2::TreeWalkResult::Ok
        })?;

        Ok(blobs)
    }
}

#[async_trait]
impl Backend for GitBackend {
    async fn list_prefix(&self, url: &Url, opts: &ListOptions) -> StoreResult<Vec<Object>> {
        let location = parse_location(url)?;
        let snapshot = self.snapshot(&location).await?;
        let start_after = start_after_key(opts);
        let modified = snapshot.commit_time;

        let prefix = location.path.clone();
        let blobs = {
            let snapshot = snapshot.clone();
            tokio::task::spawn_blocking(move || snapshot.list_blobs(&prefix)).await??
        };

        let mut objects = Vec::with_capacity(blobs.len());

        for (path, size) in blobs {
            let mut object_url = url.clone();
            object_url.set_path(&format!("{}/{}", location.base_path, path));

            if let Some(after) = &start_after {
                if object_url.path() <= after.as_str() {
                    continue;
                }
            }

            objects.push(Object {
                url: object_url,
                metadata: ObjectMetadata {
                    size,
                    modified,
                    etag: None,
                },
            });
        }

        Ok(objects)
    }

    async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata> {
        let location = parse_location(url)?;
        let snapshot = self.snapshot(&location).await?;
        let modified = snapshot.commit_time;

        let size = tokio::task::spawn_blocking(move || snapshot.blob_size(&location.path))
            .await??;

        Ok(ObjectMetadata {
            size,
            modified,
            etag: None,
        })
    }

    async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
        let location = parse_location(url)?;
        let snapshot = self.snapshot(&location).await?;

        let data = tokio::task::spawn_blocking(move || snapshot.read_blob(&location.path))
            .await??;

        Ok(Box::new(BytesReader { data: Some(data) }))
    }

    async fn reader_at(&self, _url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
        Err(StoreError::Unsupported("reader_at"))
    }

    async fn writer(&self, _url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
        Err(StoreError::Unsupported("writer"))
    }

    async fn delete(&self, _url: &Url) -> StoreResult<()> {
        Err(StoreError::Unsupported("delete"))
    }

    async fn close(&self) -> StoreResult<()> {
        self.snapshots.close_all().await
    }
}
