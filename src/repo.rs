// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Profile repository access.
//!
//! All profiles live inside one Git repository called the
//! __profile repository__. Each profile is a branch of that repository, and
//! the working tree always holds the contents of the active profile.
//!
//! # Remote
//!
//! The profile repository may have a remote named "origin". Profiles that
//! exist on the remote are discovered through its remote-tracking branches.
//! Network failures while fetching never stop local-only workflows.

pub(crate) mod remote;

use crate::repo::remote::RemoteSession;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, Commit, ErrorCode, FetchOptions, FetchPrune, IndexAddOption, Oid, PushOptions,
    Repository, RepositoryInitOptions, ResetType, Signature,
};
use std::{
    collections::BTreeSet,
    ffi::OsStr,
    fs::remove_file,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Name of the only remote dotctl talks to.
pub const ORIGIN: &str = "origin";

/// Message of the commit made on repositories without history.
pub const INITIAL_COMMIT_MESSAGE: &str = "chore: initial commit for dotctl";

/// Branch listing of profile repository.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Branches {
    /// Local branch names.
    pub local: BTreeSet<String>,

    /// Remote branch names without the "origin/" prefix, or the symbolic
    /// remote HEAD.
    pub remote: BTreeSet<String>,

    /// Currently checked out branch, if HEAD is not detached.
    pub active: Option<String>,

    /// Union of local, remote, and active branch names.
    pub all: BTreeSet<String>,
}

impl Branches {
    /// Check if branch exists locally or remotely.
    pub fn contains(&self, name: &str) -> bool {
        self.local.contains(name) || self.remote.contains(name)
    }
}

/// Git working tree holding every profile as a branch.
pub struct ProfileRepo {
    repository: Repository,
}

impl ProfileRepo {
    /// Open existing profile repository.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NotInitialized`] if path is not a repository.
    #[instrument(skip(path), level = "debug")]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!("open profile repository: {:?}", path.as_ref().display());
        let repository = Repository::open(path.as_ref()).map_err(|err| RepoError::NotInitialized {
            path: path.as_ref().to_path_buf(),
            source: err,
        })?;

        Ok(Self { repository })
    }

    /// Initialize new profile repository with one empty commit on initial
    /// branch.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if libgit2 operations fail.
    #[instrument(skip(path), level = "debug")]
    pub fn init(path: impl AsRef<Path>, initial_branch: &str) -> Result<Self> {
        info!("initialize profile repository: {:?}", path.as_ref().display());
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(initial_branch);
        opts.mkpath(true);
        let repository = Repository::init_opts(path.as_ref(), &opts)?;

        let repo = Self { repository };
        repo.commit(INITIAL_COMMIT_MESSAGE)?;

        Ok(repo)
    }

    /// Clone profile repository from remote.
    ///
    /// Prompts for credentials if the remote requires them.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if clone fails.
    #[instrument(skip(url, path), level = "debug")]
    pub fn clone(url: impl AsRef<str>, path: impl AsRef<Path>) -> Result<Self> {
        info!("clone {} into {:?}", url.as_ref(), path.as_ref().display());
        let session = RemoteSession::new(url.as_ref())?;
        let result = {
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(session.callbacks());
            RepoBuilder::new()
                .fetch_options(fo)
                .clone(url.as_ref(), path.as_ref())
        };
        session.finish();

        Ok(Self {
            repository: result?,
        })
    }

    /// Path to working tree.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Bare`] if repository has no working tree.
    pub fn workdir(&self) -> Result<&Path> {
        self.repository.workdir().ok_or(RepoError::Bare)
    }

    /// Fetch from remote with pruning.
    ///
    /// Failures are logged, and never returned.
    #[instrument(skip(self), level = "debug")]
    pub fn fetch(&self) {
        let mut remote = match self.repository.find_remote(ORIGIN) {
            Ok(remote) => remote,
            Err(_) => {
                debug!("no remote {ORIGIN:?} to fetch from");
                return;
            }
        };

        let session = match RemoteSession::new(format!("fetch {ORIGIN}")) {
            Ok(session) => session,
            Err(err) => {
                warn!("failed to fetch remote: {err}");
                return;
            }
        };

        let result = {
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(session.callbacks());
            fo.prune(FetchPrune::On);
            remote.fetch(&[] as &[&str], Some(&mut fo), None)
        };
        session.finish();

        if let Err(err) = result {
            warn!("failed to fetch remote: {err}");
        }
    }

    /// List local and remote branches.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if branches cannot be read.
    pub fn branches(&self) -> Result<Branches> {
        let mut local = BTreeSet::new();
        for branch in self.repository.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                local.insert(name.to_string());
            }
        }

        let mut remote = BTreeSet::new();
        let prefix = format!("{ORIGIN}/");
        for branch in self.repository.branches(Some(BranchType::Remote))? {
            let (branch, _) = branch?;
            let name = branch.name()?.and_then(|name| name.strip_prefix(prefix.as_str()));
            match name {
                Some("HEAD") | None => continue,
                Some(name) => remote.insert(name.to_string()),
            };
        }

        let active = self.active_branch()?;
        let mut all = local.union(&remote).cloned().collect::<BTreeSet<_>>();
        all.extend(active.clone());

        Ok(Branches {
            local,
            remote,
            active,
            all,
        })
    }

    /// Name of currently checked out branch.
    ///
    /// Works even if the branch has no commits yet. Returns `None` if HEAD is
    /// detached.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if HEAD cannot be read.
    pub fn active_branch(&self) -> Result<Option<String>> {
        let head = self.repository.find_reference("HEAD")?;
        Ok(head
            .symbolic_target()
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(ToString::to_string))
    }

    /// Branch that remote HEAD points to.
    pub fn remote_default_branch(&self) -> Option<String> {
        let head = self
            .repository
            .find_reference(&format!("refs/remotes/{ORIGIN}/HEAD"))
            .ok()?;
        head.symbolic_target()
            .and_then(|target| target.strip_prefix(&format!("refs/remotes/{ORIGIN}/")))
            .map(ToString::to_string)
    }

    /// Switch working tree to local branch.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::BranchNotFound`] if branch does not exist locally.
    /// - Return [`RepoError::Git2`] if checkout fails, e.g., uncommitted
    ///   changes would be overwritten.
    #[instrument(skip(self), level = "debug")]
    pub fn checkout(&self, name: &str) -> Result<()> {
        let branch = self
            .repository
            .find_branch(name, BranchType::Local)
            .map_err(|_| RepoError::BranchNotFound {
                name: name.to_string(),
            })?;
        let commit = branch.get().peel_to_commit()?;

        self.repository
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
        self.repository.set_head(&format!("refs/heads/{name}"))?;

        Ok(())
    }

    /// Create local branch tracking remote branch of the same name, and
    /// switch to it.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::BranchNotFound`] if remote branch does not exist.
    /// - Return [`RepoError::Git2`] if branch cannot be created.
    #[instrument(skip(self), level = "debug")]
    pub fn checkout_remote(&self, name: &str) -> Result<()> {
        let reference = self
            .repository
            .find_reference(&format!("refs/remotes/{ORIGIN}/{name}"))
            .map_err(|_| RepoError::BranchNotFound {
                name: format!("{ORIGIN}/{name}"),
            })?;
        let commit = reference.peel_to_commit()?;

        let mut branch = self.repository.branch(name, &commit, false)?;
        branch.set_upstream(Some(&format!("{ORIGIN}/{name}")))?;
        self.checkout(name)
    }

    /// Create new branch from current history, and switch to it.
    ///
    /// Repositories without commits get an empty initial commit first, since
    /// a branch needs a commit to point to.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Bare`] if repository has no working tree.
    /// - Return [`RepoError::Git2`] if branch cannot be created.
    #[instrument(skip(self), level = "debug")]
    pub fn create_branch(&self, name: &str) -> Result<()> {
        if self.repository.is_bare() {
            return Err(RepoError::Bare);
        }

        let head = match self.head_commit()? {
            Some(head) => head,
            None => {
                info!("create initial commit");
                let oid = self.commit(INITIAL_COMMIT_MESSAGE)?;
                self.repository.find_commit(oid)?
            }
        };

        if self.repository.find_branch(name, BranchType::Local).is_err() {
            self.repository.branch(name, &head, false)?;
        }

        self.checkout(name)
    }

    /// Create branch without any history, and switch to it.
    ///
    /// Tracked files of the previous branch are removed from the working
    /// tree, so the new branch starts from a blank slate. The branch itself
    /// only comes into existence with its first commit.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Bare`] if repository has no working tree.
    /// - Return [`RepoError::BranchExists`] if branch already exists.
    /// - Return [`RepoError::Io`] if tracked files cannot be removed.
    #[instrument(skip(self), level = "debug")]
    pub fn create_empty_branch(&self, name: &str) -> Result<()> {
        let workdir = self.workdir()?.to_path_buf();
        if self.repository.find_branch(name, BranchType::Local).is_ok() {
            return Err(RepoError::BranchExists {
                name: name.to_string(),
            });
        }

        let mut index = self.repository.index()?;
        for entry in index.iter() {
            let path = workdir.join(bytes_to_path(&entry.path));
            match remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(RepoError::Io { source: err, path }),
            }
        }
        index.clear()?;
        index.write()?;

        self.repository.set_head(&format!("refs/heads/{name}"))?;

        Ok(())
    }

    /// Forcefully switch back to local branch, discarding uncommitted changes
    /// to tracked files along with the index.
    ///
    /// Works on branches without history, which end up with an empty index.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if HEAD cannot be moved, or working tree
    ///   cannot be checked out.
    #[instrument(skip(self), level = "debug")]
    pub fn reset_to(&self, name: &str) -> Result<()> {
        self.repository.set_head(&format!("refs/heads/{name}"))?;
        match self.head_commit()? {
            Some(commit) => {
                let mut checkout = CheckoutBuilder::new();
                checkout.force();
                self.repository
                    .reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))?;
            }
            None => {
                let mut index = self.repository.index()?;
                index.clear()?;
                index.write()?;
            }
        }

        Ok(())
    }

    /// Stage every change of working tree, including deletions.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if index cannot be updated.
    pub fn stage_all(&self) -> Result<()> {
        let mut index = self.repository.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        Ok(())
    }

    /// Check if index differs from HEAD.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if diff cannot be computed.
    pub fn is_dirty(&self) -> Result<bool> {
        let head_tree = self.head_commit()?.map(|commit| commit.tree()).transpose()?;
        let index = self.repository.index()?;
        let diff = self
            .repository
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;

        Ok(diff.deltas().len() > 0)
    }

    /// Commit index onto HEAD.
    ///
    /// Uses configured Git identity, falling back to one built from the user
    /// and host names.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if commit cannot be made.
    #[instrument(skip(self), level = "debug")]
    pub fn commit(&self, message: &str) -> Result<Oid> {
        let mut index = self.repository.index()?;
        let tree = self.repository.find_tree(index.write_tree()?)?;
        let signature = self.signature()?;
        let parent = self.head_commit()?;
        let parents = parent.iter().collect::<Vec<_>>();

        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        debug!("commit {oid}: {message}");

        Ok(oid)
    }

    /// Check if remote "origin" exists.
    pub fn is_remote_configured(&self) -> bool {
        self.repository.find_remote(ORIGIN).is_ok()
    }

    /// Check if local branch has reachable upstream branch.
    pub fn has_upstream(&self, name: &str) -> bool {
        self.repository
            .find_branch(name, BranchType::Local)
            .and_then(|branch| branch.upstream())
            .is_ok()
    }

    /// Check if local branch has recorded upstream in configuration.
    ///
    /// Unlike [`Self::has_upstream`], the upstream branch itself need not
    /// exist anymore.
    pub fn has_recorded_upstream(&self, name: &str) -> bool {
        self.repository
            .config()
            .and_then(|config| config.get_string(&format!("branch.{name}.remote")))
            .is_ok()
    }

    /// Push active branch for the first time, and track it.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::DetachedHead`] if no branch is active.
    /// - Return [`RepoError::Git2`] if push fails.
    #[instrument(skip(self), level = "debug")]
    pub fn push_new_branch(&self) -> Result<()> {
        let name = self.active_branch()?.ok_or(RepoError::DetachedHead)?;
        self.push(&[format!("refs/heads/{name}:refs/heads/{name}").as_str()])?;

        let mut branch = self.repository.find_branch(&name, BranchType::Local)?;
        branch.set_upstream(Some(&format!("{ORIGIN}/{name}")))?;
        info!("profile {name:?} now tracks {ORIGIN}/{name}");

        Ok(())
    }

    /// Push active branch that already has an upstream.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::DetachedHead`] if no branch is active.
    /// - Return [`RepoError::Git2`] if push fails.
    #[instrument(skip(self), level = "debug")]
    pub fn push_existing_branch(&self) -> Result<()> {
        let name = self.active_branch()?.ok_or(RepoError::DetachedHead)?;
        self.push(&[format!("refs/heads/{name}:refs/heads/{name}").as_str()])
    }

    /// Force delete local branch.
    ///
    /// The active branch is switched away from to any other local branch
    /// first.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NoFallbackBranch`] if target is the active and
    ///   only local branch.
    /// - Return [`RepoError::BranchNotFound`] if branch does not exist.
    #[instrument(skip(self), level = "debug")]
    pub fn delete_local_branch(&self, name: &str) -> Result<()> {
        if self.active_branch()?.as_deref() == Some(name) {
            let fallback = self
                .branches()?
                .local
                .into_iter()
                .find(|branch| branch != name)
                .ok_or_else(|| RepoError::NoFallbackBranch {
                    name: name.to_string(),
                })?;
            info!("switch to {fallback:?} before deleting {name:?}");
            self.checkout(&fallback)?;
        }

        let mut branch = self
            .repository
            .find_branch(name, BranchType::Local)
            .map_err(|_| RepoError::BranchNotFound {
                name: name.to_string(),
            })?;
        branch.delete()?;

        Ok(())
    }

    /// Delete branch from remote.
    ///
    /// Does nothing if there is no remote.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if push fails.
    #[instrument(skip(self), level = "debug")]
    pub fn delete_remote_branch(&self, name: &str) -> Result<()> {
        if !self.is_remote_configured() {
            info!("no remote {ORIGIN:?} to delete profile {name:?} from");
            return Ok(());
        }

        self.push(&[format!(":refs/heads/{name}").as_str()])?;

        // INVARIANT: Remote-tracking branch goes away with its remote branch.
        if let Ok(mut reference) = self
            .repository
            .find_reference(&format!("refs/remotes/{ORIGIN}/{name}"))
        {
            reference.delete()?;
        }

        Ok(())
    }

    /// Count commits only reachable from local branch, and commits only
    /// reachable from its remote counterpart.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if either side cannot be resolved.
    pub fn ahead_behind(&self, name: &str) -> Result<(usize, usize)> {
        let local = self.repository.refname_to_id(&format!("refs/heads/{name}"))?;
        let remote = self
            .repository
            .refname_to_id(&format!("refs/remotes/{ORIGIN}/{name}"))?;

        Ok(self.repository.graph_ahead_behind(local, remote)?)
    }

    fn push(&self, refspecs: &[&str]) -> Result<()> {
        let mut remote = self.repository.find_remote(ORIGIN)?;
        let session = RemoteSession::new(format!("push {}", refspecs.join(" ")))?;
        let result = {
            let mut po = PushOptions::new();
            po.remote_callbacks(session.callbacks());
            remote.push(refspecs, Some(&mut po))
        };
        session.finish();

        Ok(result?)
    }

    fn head_commit(&self) -> Result<Option<Commit<'_>>> {
        match self.repository.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn signature(&self) -> Result<Signature<'static>> {
        if let Ok(signature) = self.repository.signature() {
            return Ok(signature);
        }

        let user = std::env::var("USER").unwrap_or_else(|_| "dotctl".into());
        let host = hostname::get()
            .map(|host| host.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".into());

        Ok(Signature::now(&user, &format!("{user}@{host}"))?)
    }
}

// Thanks from:
//
// https://github.com/rust-lang/git2-rs/blob/5bc3baa9694a94db2ca9cc256b5bce8a215f9013/
// src/util.rs#L85
#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> &Path {
    use std::os::unix::prelude::*;
    Path::new(OsStr::from_bytes(bytes))
}
#[cfg(windows)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Profile repository error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Path is not a repository.
    #[error("profile repository {:?} not yet initialized, run `dotctl init` first", path.display())]
    NotInitialized {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// Repository has no working tree.
    #[error("profile repository is bare")]
    Bare,

    /// HEAD does not point to a branch.
    #[error("no profile is active, HEAD is detached")]
    DetachedHead,

    /// Branch does not exist.
    #[error("profile {name:?} does not exist")]
    BranchNotFound { name: String },

    /// Branch already exists.
    #[error("profile {name:?} already exists")]
    BranchExists { name: String },

    /// Only branch cannot be deleted while active.
    #[error("cannot delete {name:?}, no other profile to switch to")]
    NoFallbackBranch { name: String },

    /// Working tree file cannot be manipulated.
    #[error("failed to remove {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    ProgressTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;
