// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Privilege-aware recursive file synchronization.
//!
//! Mirror a source tree onto a destination tree such that the destination
//! ends up with the same file set and contents as the source. Entries that
//! only exist at the destination are deleted, and a missing source removes
//! its destination counterpart entirely.
//!
//! # Elevation Protocol
//!
//! Any mkdir, unlink, or copy may fail because the current user lacks the
//! permissions to perform it. Each such failure is handed over to the
//! elevation protocol, which uses the [`Elevation`] state threaded through
//! every call:
//!
//! 1. If escalation was skipped for the whole run, quietly skip the failing
//!    operation.
//! 2. If a credential is cached, retry the operation once through an
//!    [`ElevatedRunner`] with it.
//! 3. Otherwise ask the operator through an [`ElevationPrompter`]. The
//!    operator may supply a credential and cache it for the rest of the run,
//!    supply one for the failing operation only, skip escalation for the rest
//!    of the run, or skip the failing operation only. Invalid answers are
//!    asked again a limited number of times before the operation is skipped.
//!
//! The updated state is returned to the caller, who is expected to pass it
//! into the next call. Nothing about elevation lives in global state.
//!
//! Errors other than permission failures are fatal for the current copy.

pub mod elevate;

use crate::copier::elevate::{
    Credential, ElevatedCommand, ElevatedRunner, ElevationChoice, ElevationPrompter,
    InquirePrompter, PromptError, SudoRunner,
};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::{
    collections::BTreeSet,
    ffi::OsString,
    fs::{self, File, FileTimes, Metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Number of times the operator may answer the elevation prompt.
pub const MAX_PROMPT_ATTEMPTS: usize = 3;

/// Elevation state of a single save or apply run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Elevation {
    /// Never attempt to elevate privileges.
    pub skip: bool,

    /// Credential to reuse for every elevated operation.
    pub credential: Option<Credential>,
}

impl Elevation {
    /// Construct new elevation state.
    pub fn new(skip: bool, credential: Option<Credential>) -> Self {
        Self { skip, credential }
    }
}

/// Result of attempting one filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Skipped,
}

/// Recursive tree synchronizer.
#[derive(Debug)]
pub struct Copier<P = InquirePrompter, R = SudoRunner>
where
    P: ElevationPrompter,
    R: ElevatedRunner,
{
    prompter: P,
    runner: R,
    excludes: Gitignore,
}

impl Copier {
    /// Construct new copier that talks to the terminal, and elevates through
    /// sudo.
    pub fn interactive() -> Self {
        Self::new(InquirePrompter::new(), SudoRunner::new())
    }
}

impl<P, R> Copier<P, R>
where
    P: ElevationPrompter,
    R: ElevatedRunner,
{
    /// Construct new copier.
    pub fn new(prompter: P, runner: R) -> Self {
        Self {
            prompter,
            runner,
            excludes: Gitignore::empty(),
        }
    }

    /// Set gitignore-style patterns of entries to never copy or delete.
    ///
    /// Only entries reached through directory recursion are matched.
    ///
    /// # Errors
    ///
    /// - Return [`CopyError::Exclude`] if a pattern is invalid.
    pub fn with_excludes(
        mut self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        self.set_excludes(patterns)?;
        Ok(self)
    }

    /// Replace exclude patterns of existing copier.
    ///
    /// # Errors
    ///
    /// - Return [`CopyError::Exclude`] if a pattern is invalid.
    pub fn set_excludes(
        &mut self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<()> {
        let mut builder = GitignoreBuilder::new("/");
        for pattern in patterns {
            builder.add_line(None, pattern.as_ref())?;
        }
        self.excludes = builder.build()?;

        Ok(())
    }

    /// Synchronize source onto destination.
    ///
    /// Returns the elevation state to thread into the next call.
    ///
    /// # Errors
    ///
    /// - Return [`CopyError::SamePath`] if source and destination are equal.
    /// - Return [`CopyError::Io`] if a filesystem operation fails for any
    ///   reason other than missing permissions.
    #[instrument(skip(self, source, dest, elevation), level = "debug")]
    pub fn copy(
        &mut self,
        source: impl AsRef<Path>,
        dest: impl AsRef<Path>,
        elevation: Elevation,
    ) -> Result<Elevation> {
        let (source, dest) = (source.as_ref(), dest.as_ref());
        if source == dest {
            return Err(CopyError::SamePath {
                path: source.to_path_buf(),
            });
        }

        debug!("copy {:?} to {:?}", source.display(), dest.display());
        self.ensure_parent(source, dest, elevation)
            .and_then(|(elevation, outcome)| match outcome {
                Outcome::Done => self.sync(source, dest, elevation),
                Outcome::Skipped => Ok(elevation),
            })
            .inspect_err(|err| {
                error!("failed to copy {:?}: {err}", source.display());
            })
    }

    fn ensure_parent(
        &mut self,
        source: &Path,
        dest: &Path,
        elevation: Elevation,
    ) -> Result<(Elevation, Outcome)> {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => return Ok((elevation, Outcome::Done)),
        };

        // INVARIANT: Missing sources never create directories at destination.
        if fs::symlink_metadata(parent).is_ok() || fs::symlink_metadata(source).is_err() {
            return Ok((elevation, Outcome::Done));
        }

        self.attempt(
            || fs::create_dir_all(parent),
            ElevatedCommand::MakeDir(parent.to_path_buf()),
            parent,
            elevation,
        )
    }

    fn sync(&mut self, source: &Path, dest: &Path, elevation: Elevation) -> Result<Elevation> {
        let tree = ElevatedCommand::MirrorTree {
            from: source.to_path_buf(),
            to: dest.to_path_buf(),
        };

        // INVARIANT: Uninspectable paths get escalated as one whole tree.
        let source_meta = match inspect(source) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return Ok(self.escalate(tree, elevation)?.0);
            }
            Err(err) => return Err(CopyError::io(err, source)),
        };
        let dest_meta = match inspect(dest) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                let command = match source_meta {
                    Some(_) => tree,
                    None => ElevatedCommand::Remove(dest.to_path_buf()),
                };
                return Ok(self.escalate(command, elevation)?.0);
            }
            Err(err) => return Err(CopyError::io(err, dest)),
        };

        let Some(source_meta) = source_meta else {
            return match dest_meta {
                Some(meta) => Ok(self.remove(dest, &meta, elevation)?.0),
                None => Ok(elevation),
            };
        };

        let file_type = source_meta.file_type();
        if file_type.is_dir() {
            self.sync_dir(source, dest, dest_meta, elevation)
        } else if file_type.is_symlink() {
            self.sync_symlink(source, dest, dest_meta, elevation)
        } else {
            self.sync_file(source, &source_meta, dest, dest_meta, elevation)
        }
    }

    fn sync_dir(
        &mut self,
        source: &Path,
        dest: &Path,
        dest_meta: Option<Metadata>,
        mut elevation: Elevation,
    ) -> Result<Elevation> {
        let dest_is_dir = dest_meta.as_ref().is_some_and(Metadata::is_dir);
        if let Some(meta) = dest_meta.as_ref().filter(|_| !dest_is_dir) {
            let (next, outcome) = self.remove(dest, meta, elevation)?;
            elevation = next;
            if outcome == Outcome::Skipped {
                return Ok(elevation);
            }
        }

        if !dest_is_dir {
            let (next, outcome) = self.attempt(
                || fs::create_dir_all(dest),
                ElevatedCommand::MakeDir(dest.to_path_buf()),
                dest,
                elevation,
            )?;
            elevation = next;
            if outcome == Outcome::Skipped {
                return Ok(elevation);
            }
        }

        // INVARIANT: Unlistable directories get mirrored as one whole tree.
        let tree = || ElevatedCommand::MirrorTree {
            from: source.to_path_buf(),
            to: dest.to_path_buf(),
        };
        let source_names = match list_names(source) {
            Ok(names) => names,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return Ok(self.escalate(tree(), elevation)?.0);
            }
            Err(err) => return Err(CopyError::io(err, source)),
        };
        let dest_names = match list_names(dest) {
            Ok(names) => names,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                debug!("cannot list {:?}", dest.display());
                return Ok(self.escalate(tree(), elevation)?.0);
            }
            Err(err) => return Err(CopyError::io(err, dest)),
        };

        for name in source_names.union(&dest_names) {
            let (child_source, child_dest) = (source.join(name), dest.join(name));
            if self.is_excluded(&child_source) || self.is_excluded(&child_dest) {
                debug!("exclude {:?}", child_source.display());
                continue;
            }

            elevation = self.sync(&child_source, &child_dest, elevation)?;
        }

        Ok(elevation)
    }

    fn sync_file(
        &mut self,
        source: &Path,
        source_meta: &Metadata,
        dest: &Path,
        dest_meta: Option<Metadata>,
        mut elevation: Elevation,
    ) -> Result<Elevation> {
        if let Some(meta) = dest_meta {
            if is_unchanged(source_meta, &meta) {
                debug!("{:?} is up to date", dest.display());
                return Ok(elevation);
            }

            let (next, outcome) = self.remove(dest, &meta, elevation)?;
            elevation = next;
            if outcome == Outcome::Skipped {
                return Ok(elevation);
            }
        }

        let (elevation, _) = self.attempt(
            || copy_with_metadata(source, source_meta, dest),
            ElevatedCommand::Copy {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
            },
            dest,
            elevation,
        )?;

        Ok(elevation)
    }

    fn sync_symlink(
        &mut self,
        source: &Path,
        dest: &Path,
        dest_meta: Option<Metadata>,
        mut elevation: Elevation,
    ) -> Result<Elevation> {
        let target = fs::read_link(source).map_err(|err| CopyError::io(err, source))?;
        if let Some(meta) = dest_meta {
            if meta.file_type().is_symlink()
                && fs::read_link(dest).is_ok_and(|current| current == target)
            {
                return Ok(elevation);
            }

            let (next, outcome) = self.remove(dest, &meta, elevation)?;
            elevation = next;
            if outcome == Outcome::Skipped {
                return Ok(elevation);
            }
        }

        let (elevation, _) = self.attempt(
            || symlink(&target, dest),
            ElevatedCommand::Copy {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
            },
            dest,
            elevation,
        )?;

        Ok(elevation)
    }

    fn remove(
        &mut self,
        path: &Path,
        meta: &Metadata,
        elevation: Elevation,
    ) -> Result<(Elevation, Outcome)> {
        debug!("remove {:?}", path.display());
        let is_dir = meta.is_dir();
        self.attempt(
            || {
                if is_dir {
                    fs::remove_dir_all(path)
                } else {
                    fs::remove_file(path)
                }
            },
            ElevatedCommand::Remove(path.to_path_buf()),
            path,
            elevation,
        )
    }

    /// Attempt filesystem operation, falling back to elevation protocol on
    /// permission failure.
    fn attempt(
        &mut self,
        operation: impl FnOnce() -> std::io::Result<()>,
        fallback: ElevatedCommand,
        path: &Path,
        elevation: Elevation,
    ) -> Result<(Elevation, Outcome)> {
        match operation() {
            Ok(()) => Ok((elevation, Outcome::Done)),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                debug!("permission denied on {:?}", path.display());
                self.escalate(fallback, elevation)
            }
            Err(err) => Err(CopyError::io(err, path)),
        }
    }

    #[instrument(skip(self, elevation), level = "debug")]
    fn escalate(
        &mut self,
        command: ElevatedCommand,
        mut elevation: Elevation,
    ) -> Result<(Elevation, Outcome)> {
        if elevation.skip {
            debug!("skip {:?}", command.target().display());
            return Ok((elevation, Outcome::Skipped));
        }

        if let Some(credential) = elevation.credential.clone() {
            let outcome = self.run_elevated(&command, &credential);
            return Ok((elevation, outcome));
        }

        let Some(choice) = self.ask_choice(command.target()) else {
            warn!("skip {:?}", command.target().display());
            return Ok((elevation, Outcome::Skipped));
        };

        let outcome = match choice {
            ElevationChoice::CacheCredential => match self.ask_credential() {
                Some(credential) => {
                    let outcome = self.run_elevated(&command, &credential);
                    elevation.credential = Some(credential);
                    outcome
                }
                None => Outcome::Skipped,
            },
            ElevationChoice::CredentialOnce => match self.ask_credential() {
                Some(credential) => self.run_elevated(&command, &credential),
                None => Outcome::Skipped,
            },
            ElevationChoice::SkipAll => {
                info!("skipping privilege escalation for the rest of this run");
                elevation.skip = true;
                Outcome::Skipped
            }
            ElevationChoice::SkipOnce => Outcome::Skipped,
        };

        Ok((elevation, outcome))
    }

    fn ask_choice(&mut self, path: &Path) -> Option<ElevationChoice> {
        for attempt in 1..=MAX_PROMPT_ATTEMPTS {
            match self
                .prompter
                .ask_choice(path)
                .and_then(|answer| answer.parse::<ElevationChoice>())
            {
                Ok(choice) => return Some(choice),
                Err(PromptError::InvalidChoice(answer)) => {
                    warn!("invalid choice {answer:?} ({attempt}/{MAX_PROMPT_ATTEMPTS})");
                }
                Err(err) => {
                    warn!("cannot ask for elevation: {err}");
                    return None;
                }
            }
        }

        warn!("too many invalid choices");
        None
    }

    fn ask_credential(&mut self) -> Option<Credential> {
        self.prompter
            .ask_credential()
            .inspect_err(|err| warn!("cannot ask for credential: {err}"))
            .ok()
    }

    fn run_elevated(&mut self, command: &ElevatedCommand, credential: &Credential) -> Outcome {
        match self.runner.run(command, credential) {
            Ok(()) => Outcome::Done,
            Err(err) => {
                warn!("{err}");
                Outcome::Skipped
            }
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let is_dir = path.is_dir();
        self.excludes.matched(path, is_dir).is_ignore()
    }
}

/// Look up metadata of path without following symbolic links.
///
/// Returns `None` if the path does not exist.
fn inspect(path: &Path) -> std::io::Result<Option<Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn list_names(path: &Path) -> std::io::Result<BTreeSet<OsString>> {
    fs::read_dir(path)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect()
}

fn is_unchanged(source: &Metadata, dest: &Metadata) -> bool {
    if !dest.is_file() || source.len() != dest.len() {
        return false;
    }

    match (source.modified(), dest.modified()) {
        (Ok(source), Ok(dest)) => source == dest,
        _ => false,
    }
}

fn copy_with_metadata(source: &Path, meta: &Metadata, dest: &Path) -> std::io::Result<()> {
    fs::copy(source, dest)?;

    let mut times = FileTimes::new();
    if let Ok(modified) = meta.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }
    File::open(dest)?.set_times(times)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Copy error types.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// Source and destination point to the same path.
    #[error("source and destination are both {:?}", path.display())]
    SamePath { path: PathBuf },

    /// Filesystem operation failed for a reason other than permissions.
    #[error("failed to synchronize {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Exclude pattern cannot be parsed.
    #[error(transparent)]
    Exclude(#[from] ignore::Error),
}

impl CopyError {
    fn io(source: std::io::Error, path: &Path) -> Self {
        Self::Io {
            source,
            path: path.to_path_buf(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = CopyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copier::elevate::ElevateError;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Prompter answering from a fixed script.
    #[derive(Debug, Default)]
    struct ScriptedPrompter {
        answers: VecDeque<&'static str>,
        asked: usize,
    }

    impl ScriptedPrompter {
        fn new(answers: impl IntoIterator<Item = &'static str>) -> Self {
            Self {
                answers: answers.into_iter().collect(),
                asked: 0,
            }
        }
    }

    impl ElevationPrompter for ScriptedPrompter {
        fn ask_choice(&mut self, _path: &Path) -> Result<String, PromptError> {
            self.asked += 1;
            Ok(self.answers.pop_front().unwrap_or_default().to_string())
        }

        fn ask_credential(&mut self) -> Result<Credential, PromptError> {
            Ok(Credential::new("hunter2"))
        }
    }

    /// Runner recording each command instead of running it.
    #[derive(Debug, Default)]
    struct RecordingRunner {
        runs: Vec<(ElevatedCommand, String)>,
    }

    impl ElevatedRunner for RecordingRunner {
        fn run(
            &mut self,
            command: &ElevatedCommand,
            credential: &Credential,
        ) -> Result<(), ElevateError> {
            self.runs
                .push((command.clone(), credential.expose().to_string()));
            Ok(())
        }
    }

    fn copier() -> Copier<ScriptedPrompter, RecordingRunner> {
        Copier::new(ScriptedPrompter::default(), RecordingRunner::default())
    }

    fn command() -> ElevatedCommand {
        ElevatedCommand::MakeDir("/root/locked".into())
    }

    fn tree(root: &Path, files: &[(&str, &str)]) -> anyhow::Result<()> {
        for (name, content) in files {
            let path = root.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }

        Ok(())
    }

    fn snapshot(root: &Path) -> anyhow::Result<Vec<(String, String)>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let name = path.strip_prefix(root)?.to_string_lossy().into_owned();
                    files.push((name, fs::read_to_string(&path)?));
                }
            }
        }
        files.sort();

        Ok(files)
    }

    #[test]
    fn copy_single_file() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        tree(root.path(), &[("src/a.txt", "hello")])?;
        let (source, dest) = (root.path().join("src/a.txt"), root.path().join("a.txt"));

        let elevation = copier().copy(&source, &dest, Elevation::default())?;

        assert_eq!(fs::read_to_string(&dest)?, "hello");
        assert_eq!(
            fs::metadata(&dest)?.modified()?,
            fs::metadata(&source)?.modified()?
        );
        assert_eq!(elevation, Elevation::default());

        Ok(())
    }

    #[test]
    fn copy_creates_missing_parents() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        tree(root.path(), &[("src/a.txt", "hello")])?;
        let dest = root.path().join("deep/down/a.txt");

        copier().copy(root.path().join("src/a.txt"), &dest, Elevation::default())?;
        assert_eq!(fs::read_to_string(&dest)?, "hello");

        let (source, dest) = (root.path().join("nope"), root.path().join("other/nope"));
        copier().copy(source, dest, Elevation::default())?;
        assert!(!root.path().join("other").exists());

        Ok(())
    }

    #[test]
    fn copy_replaces_changed_file() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        tree(root.path(), &[("src", "new content"), ("dest", "old")])?;

        copier().copy(root.path().join("src"), root.path().join("dest"), Elevation::default())?;

        assert_eq!(fs::read_to_string(root.path().join("dest"))?, "new content");

        Ok(())
    }

    #[test]
    fn copy_mirrors_directory_tree() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let (source, dest) = (root.path().join("src"), root.path().join("dest"));
        tree(
            &source,
            &[("a.txt", "a"), ("nested/b.txt", "b"), ("nested/deep/c.txt", "c")],
        )?;
        tree(
            &dest,
            &[("a.txt", "stale"), ("gone.txt", "x"), ("old/d.txt", "d")],
        )?;

        let mut copier = copier();
        copier.copy(&source, &dest, Elevation::default())?;
        assert_eq!(snapshot(&dest)?, snapshot(&source)?);
        assert!(!dest.join("old").exists());

        // Running again changes nothing.
        copier.copy(&source, &dest, Elevation::default())?;
        assert_eq!(snapshot(&dest)?, snapshot(&source)?);

        Ok(())
    }

    #[test]
    fn copy_replaces_file_with_directory() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let (source, dest) = (root.path().join("src"), root.path().join("dest"));
        tree(&source, &[("thing/inner.txt", "inner")])?;
        tree(&dest, &[("thing", "was a file")])?;

        copier().copy(&source, &dest, Elevation::default())?;

        assert_eq!(fs::read_to_string(dest.join("thing/inner.txt"))?, "inner");

        Ok(())
    }

    #[test]
    fn missing_source_removes_destination() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let dest = root.path().join("dest");
        tree(&dest, &[("a.txt", "a"), ("nested/b.txt", "b")])?;

        copier().copy(root.path().join("nope"), &dest, Elevation::default())?;
        assert!(!dest.exists());

        // Nothing on either side is a no-op.
        copier().copy(root.path().join("nope"), &dest, Elevation::default())?;
        assert!(!dest.exists());

        Ok(())
    }

    #[test]
    fn same_source_and_destination_is_rejected() {
        let result = copier().copy("/tmp/same", "/tmp/same", Elevation::default());
        assert!(matches!(result, Err(CopyError::SamePath { .. })));
    }

    #[test]
    fn excluded_entries_are_left_alone() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let (source, dest) = (root.path().join("src"), root.path().join("dest"));
        tree(&source, &[("keep.py", "k"), ("skip.pyc", "s")])?;
        tree(&dest, &[("local.pyc", "l")])?;

        copier()
            .with_excludes(["*.pyc"])?
            .copy(&source, &dest, Elevation::default())?;

        assert!(dest.join("keep.py").exists());
        assert!(!dest.join("skip.pyc").exists());
        assert!(dest.join("local.pyc").exists());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_recreated() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let (source, dest) = (root.path().join("src"), root.path().join("dest"));
        tree(&source, &[("real.txt", "real")])?;
        std::os::unix::fs::symlink("real.txt", source.join("link.txt"))?;

        copier().copy(&source, &dest, Elevation::default())?;

        assert_eq!(fs::read_link(dest.join("link.txt"))?, PathBuf::from("real.txt"));

        Ok(())
    }

    #[cfg(unix)]
    fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_files_are_copied_elevated() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let (source, dest) = (root.path().join("src"), root.path().join("dest"));
        tree(&source, &[("one.txt", "1"), ("two.txt", "2")])?;
        fs::create_dir_all(&dest)?;
        set_mode(&source.join("one.txt"), 0o000)?;
        set_mode(&source.join("two.txt"), 0o000)?;
        if fs::read(source.join("one.txt")).is_ok() {
            // Permission bits do not bind privileged users.
            return Ok(());
        }

        let mut copier = Copier::new(ScriptedPrompter::new(["1"]), RecordingRunner::default());
        let mut elevation = Elevation::default();
        for name in ["one.txt", "two.txt"] {
            elevation = copier.copy(source.join(name), dest.join(name), elevation)?;
        }

        assert_eq!(copier.prompter.asked, 1);
        assert_eq!(elevation, Elevation::new(false, Some(Credential::new("hunter2"))));
        let expect = ["one.txt", "two.txt"]
            .into_iter()
            .map(|name| {
                let command = ElevatedCommand::Copy {
                    from: source.join(name),
                    to: dest.join(name),
                };
                (command, "hunter2".to_string())
            })
            .collect::<Vec<_>>();
        assert_eq!(copier.runner.runs, expect);

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn unlistable_destination_is_mirrored_elevated() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let (source, dest) = (root.path().join("src"), root.path().join("dest"));
        tree(&source, &[("a.txt", "a")])?;
        tree(&dest, &[("stale.txt", "stale")])?;
        set_mode(&dest, 0o300)?;
        if fs::read_dir(&dest).is_ok() {
            set_mode(&dest, 0o755)?;
            return Ok(());
        }

        let mut copier = Copier::new(ScriptedPrompter::new(["1"]), RecordingRunner::default());
        let result = copier.copy(&source, &dest, Elevation::default());
        set_mode(&dest, 0o755)?;
        let elevation = result?;

        assert_eq!(copier.prompter.asked, 1);
        assert_eq!(elevation.credential, Some(Credential::new("hunter2")));
        let command = ElevatedCommand::MirrorTree {
            from: source.clone(),
            to: dest.clone(),
        };
        assert_eq!(copier.runner.runs, vec![(command, "hunter2".to_string())]);

        Ok(())
    }

    #[test]
    fn escalate_when_skipping_all() -> anyhow::Result<()> {
        let mut copier = copier();
        let elevation = Elevation::new(true, None);

        let (result, outcome) = copier.escalate(command(), elevation.clone())?;

        assert_eq!(result, elevation);
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(copier.prompter.asked, 0);
        assert!(copier.runner.runs.is_empty());

        Ok(())
    }

    #[test]
    fn escalate_with_cached_credential() -> anyhow::Result<()> {
        let mut copier = copier();
        let elevation = Elevation::new(false, Some(Credential::new("cached")));

        let (result, outcome) = copier.escalate(command(), elevation.clone())?;

        assert_eq!(result, elevation);
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(copier.prompter.asked, 0);
        assert_eq!(copier.runner.runs, vec![(command(), "cached".to_string())]);

        Ok(())
    }

    #[test]
    fn escalate_and_cache_credential() -> anyhow::Result<()> {
        let mut copier = Copier::new(ScriptedPrompter::new(["1"]), RecordingRunner::default());

        let (result, outcome) = copier.escalate(command(), Elevation::default())?;

        assert_eq!(result, Elevation::new(false, Some(Credential::new("hunter2"))));
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(copier.runner.runs.len(), 1);

        // Cached credential is reused without asking again.
        let (_, outcome) = copier.escalate(command(), result)?;
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(copier.prompter.asked, 1);
        assert_eq!(copier.runner.runs.len(), 2);

        Ok(())
    }

    #[test]
    fn escalate_with_credential_once() -> anyhow::Result<()> {
        let mut copier = Copier::new(ScriptedPrompter::new(["2"]), RecordingRunner::default());

        let (result, outcome) = copier.escalate(command(), Elevation::default())?;

        assert_eq!(result, Elevation::default());
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(copier.runner.runs, vec![(command(), "hunter2".to_string())]);

        Ok(())
    }

    #[test]
    fn escalate_then_skip_all() -> anyhow::Result<()> {
        let mut copier = Copier::new(ScriptedPrompter::new(["3"]), RecordingRunner::default());

        let (result, outcome) = copier.escalate(command(), Elevation::default())?;

        assert_eq!(result, Elevation::new(true, None));
        assert_eq!(outcome, Outcome::Skipped);
        assert!(copier.runner.runs.is_empty());

        Ok(())
    }

    #[test]
    fn escalate_then_skip_once() -> anyhow::Result<()> {
        let mut copier = Copier::new(ScriptedPrompter::new(["4"]), RecordingRunner::default());

        let (result, outcome) = copier.escalate(command(), Elevation::default())?;

        assert_eq!(result, Elevation::default());
        assert_eq!(outcome, Outcome::Skipped);
        assert!(copier.runner.runs.is_empty());

        Ok(())
    }

    #[test]
    fn escalate_retries_invalid_choices() -> anyhow::Result<()> {
        let mut copier = Copier::new(
            ScriptedPrompter::new(["x", "9", "2"]),
            RecordingRunner::default(),
        );
        let (_, outcome) = copier.escalate(command(), Elevation::default())?;
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(copier.prompter.asked, 3);

        let mut copier = Copier::new(
            ScriptedPrompter::new(["x", "9", "nope", "1"]),
            RecordingRunner::default(),
        );
        let (result, outcome) = copier.escalate(command(), Elevation::default())?;
        assert_eq!(result, Elevation::default());
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(copier.prompter.asked, MAX_PROMPT_ATTEMPTS);
        assert!(copier.runner.runs.is_empty());

        Ok(())
    }
}
