// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Profile store management and manipulation.
//!
//! Dotctl groups every profile together into one place called the
//! __profile store__. The store pairs the profile repository with the
//! declarative configuration that says which live files belong in a profile.
//!
//! # Profile Store Layout
//!
//! Each top-level directory of the profile repository matches one `save`
//! section of the configuration, and mirrors the entries of that section:
//!
//! ```text
//! $XDG_DATA_HOME/dotctl/
//! ├── dotctl.toml
//! └── profile/
//!     ├── configs/
//!     │   ├── gtk-3.0/
//!     │   └── kdeglobals
//!     └── home_folder/
//!         └── .zshrc
//! ```
//!
//! # Profile Selection
//!
//! Saving into a named profile picks the branch to work on like so: no name
//! means the active profile, a local profile gets checked out, a profile that
//! only exists on the remote gets tracked and checked out, and a profile that
//! exists nowhere gets created from current history.

use crate::{
    archive::{self, ArchiveError, ARCHIVE_CONFIG, ARCHIVE_EXPORT_DIR, ARCHIVE_SAVE_DIR},
    config::{ConfigError, ProfileConfig, DEFAULT_TEMPLATE},
    copier::{
        elevate::{ElevatedRunner, ElevationPrompter},
        CopyError, Copier, Elevation,
    },
    path::{ARCHIVE_EXTENSION, DEFAULT_PROFILE},
    repo::{ProfileRepo, RepoError},
    status::{list_profiles, Profile},
};

use chrono::Local;
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Result of saving live files into a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// New commit was made on profile.
    Committed { profile: String, pushed: bool },

    /// Profile already matched live files.
    Unchanged { profile: String },
}

/// Profile repository paired with its declarative configuration.
pub struct ProfileStore {
    repo: ProfileRepo,
    config_file: PathBuf,
}

impl ProfileStore {
    /// Open existing profile store.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Repo`] wrapping
    ///   [`RepoError::NotInitialized`] if the profile repository is missing.
    pub fn open(profile_dir: impl AsRef<Path>, config_file: impl Into<PathBuf>) -> Result<Self> {
        let repo = ProfileRepo::open(profile_dir)?;
        Ok(Self {
            repo,
            config_file: config_file.into(),
        })
    }

    /// Initialize profile store.
    ///
    /// Clones the profile repository from `url` if given, and creates an
    /// empty one otherwise. An already initialized repository is reused.
    /// The configuration file is replaced by `custom_config` if given, kept
    /// if it already exists, and written from the built-in template
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Repo`] if repository cannot be created.
    /// - Return [`StoreError::Io`] if configuration cannot be installed.
    #[instrument(skip_all, level = "debug")]
    pub fn init(
        profile_dir: impl AsRef<Path>,
        config_file: impl Into<PathBuf>,
        url: Option<&str>,
        profile: Option<&str>,
        custom_config: Option<&Path>,
    ) -> Result<Self> {
        let profile_dir = profile_dir.as_ref();
        let repo = match (ProfileRepo::open(profile_dir), url) {
            (Ok(repo), _) => {
                info!("profile repository already initialized at {:?}", profile_dir.display());
                repo
            }
            (Err(_), Some(url)) => ProfileRepo::clone(url, profile_dir)?,
            (Err(_), None) => ProfileRepo::init(profile_dir, profile.unwrap_or(DEFAULT_PROFILE))?,
        };

        let store = Self {
            repo,
            config_file: config_file.into(),
        };
        store.install_config(custom_config)?;
        if profile.is_some() {
            store.select_profile(profile, false)?;
        }

        Ok(store)
    }

    /// Profile repository of store.
    pub fn repo(&self) -> &ProfileRepo {
        &self.repo
    }

    /// Load declarative configuration of store.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Config`] if configuration is missing or
    ///   malformed.
    pub fn config(&self) -> Result<ProfileConfig> {
        Ok(ProfileConfig::load(&self.config_file)?)
    }

    /// Select profile to work on, creating it if needed.
    ///
    /// Returns name of selected profile, which is now active.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Repo`] if branch cannot be checked out or
    ///   created.
    #[instrument(skip(self), level = "debug")]
    pub fn select_profile(&self, profile: Option<&str>, fetch: bool) -> Result<String> {
        if fetch {
            self.repo.fetch();
        }

        let active = self.repo.active_branch()?;
        let Some(name) = profile else {
            return active.ok_or(StoreError::Repo(RepoError::DetachedHead));
        };

        if active.as_deref() == Some(name) {
            return Ok(name.to_string());
        }

        let mut branches = self.repo.branches()?;
        if !fetch && !branches.contains(name) {
            self.repo.fetch();
            branches = self.repo.branches()?;
        }

        if branches.local.contains(name) {
            info!("switch to profile {name:?}");
            self.repo.checkout(name)?;
        } else if branches.remote.contains(name) {
            info!("track remote profile {name:?}");
            self.repo.checkout_remote(name)?;
        } else {
            info!("create new profile {name:?}");
            self.repo.create_branch(name)?;
        }

        Ok(name.to_string())
    }

    /// Snapshot live files of every `save` section into a profile.
    ///
    /// Elevation state is threaded through every copy of the run. Changes
    /// are committed, and pushed if the repository has a remote. With
    /// `fetch`, the remote is fetched before the profile is selected.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Config`] if configuration cannot be loaded.
    /// - Return [`StoreError::Copy`] if an entry cannot be copied.
    /// - Return [`StoreError::Repo`] if commit or push fails.
    #[instrument(skip(self, elevation, copier), level = "debug")]
    pub fn save<P, R>(
        &self,
        profile: Option<&str>,
        fetch: bool,
        mut elevation: Elevation,
        copier: &mut Copier<P, R>,
    ) -> Result<(SaveOutcome, Elevation)>
    where
        P: ElevationPrompter,
        R: ElevatedRunner,
    {
        let profile = self.select_profile(profile, fetch)?;
        let config = self.config()?;
        copier.set_excludes(&config.exclude)?;
        let workdir = self.repo.workdir()?.to_path_buf();

        for (name, section) in &config.save {
            let section_dir = workdir.join(name);
            make_dir(&section_dir)?;
            for (entry, source) in section.entry_paths() {
                info!("save {name}/{entry}");
                elevation = copier.copy(&source, section_dir.join(entry), elevation)?;
            }
        }

        self.repo.stage_all()?;
        if !self.repo.is_dirty()? {
            info!("no changes to save in profile {profile:?}");
            return Ok((SaveOutcome::Unchanged { profile }, elevation));
        }

        self.repo.commit(&commit_message())?;
        let pushed = self.push(&profile)?;

        Ok((SaveOutcome::Committed { profile, pushed }, elevation))
    }

    /// Restore stored files of a profile onto their live locations.
    ///
    /// Entries missing from the profile are skipped, so live files are never
    /// deleted because a profile lacks them.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ProfileNotFound`] if profile does not exist.
    /// - Return [`StoreError::Config`] if configuration cannot be loaded.
    /// - Return [`StoreError::Copy`] if an entry cannot be copied.
    #[instrument(skip(self, elevation, copier), level = "debug")]
    pub fn apply<P, R>(
        &self,
        profile: Option<&str>,
        fetch: bool,
        mut elevation: Elevation,
        copier: &mut Copier<P, R>,
    ) -> Result<(String, Elevation)>
    where
        P: ElevationPrompter,
        R: ElevatedRunner,
    {
        let profile = match profile {
            Some(name) => self.switch(Some(name), fetch)?,
            None => self.select_profile(None, fetch)?,
        };
        let config = self.config()?;
        copier.set_excludes(&config.exclude)?;
        let workdir = self.repo.workdir()?.to_path_buf();

        for (name, section) in &config.save {
            for (entry, dest) in section.entry_paths() {
                let source = workdir.join(name).join(entry);
                if fs::symlink_metadata(&source).is_err() {
                    debug!("profile {profile:?} lacks {name}/{entry}");
                    continue;
                }

                info!("apply {name}/{entry}");
                elevation = copier.copy(&source, &dest, elevation)?;
            }
        }

        Ok((profile, elevation))
    }

    /// Switch to existing profile.
    ///
    /// Without a name, switches to the default branch of the remote, or to
    /// "main" if the remote does not say.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ProfileNotFound`] if profile exists nowhere.
    #[instrument(skip(self), level = "debug")]
    pub fn switch(&self, profile: Option<&str>, fetch: bool) -> Result<String> {
        if fetch {
            self.repo.fetch();
        }

        let name = profile
            .map(ToString::to_string)
            .or_else(|| self.repo.remote_default_branch())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        if self.repo.active_branch()?.as_deref() == Some(name.as_str()) {
            info!("profile {name:?} is already active");
            return Ok(name);
        }

        let branches = self.repo.branches()?;
        if branches.local.contains(&name) {
            self.repo.checkout(&name)?;
        } else if branches.remote.contains(&name) {
            self.repo.checkout_remote(&name)?;
        } else {
            return Err(StoreError::ProfileNotFound { name });
        }
        info!("switched to profile {name:?}");

        Ok(name)
    }

    /// Create new profile, and switch to it.
    ///
    /// An `empty` profile starts without any history. Returns false if the
    /// profile already exists.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Repo`] if branch cannot be created.
    #[instrument(skip(self), level = "debug")]
    pub fn create(&self, profile: &str, fetch: bool, empty: bool) -> Result<bool> {
        if fetch {
            self.repo.fetch();
        }

        if self.repo.branches()?.contains(profile) {
            warn!("profile {profile:?} already exists");
            return Ok(false);
        }

        if empty {
            self.repo.create_empty_branch(profile)?;
        } else {
            self.repo.create_branch(profile)?;
        }
        info!("created profile {profile:?}");

        Ok(true)
    }

    /// Remove profile locally, and from the remote unless `keep_remote` is
    /// set.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ProfileNotFound`] if profile exists nowhere.
    /// - Return [`StoreError::Repo`] wrapping [`RepoError::NoFallbackBranch`]
    ///   if profile is the only local one while active.
    #[instrument(skip(self), level = "debug")]
    pub fn remove(&self, profile: &str, fetch: bool, keep_remote: bool) -> Result<()> {
        if fetch {
            self.repo.fetch();
        }

        let branches = self.repo.branches()?;
        if !branches.contains(profile) {
            return Err(StoreError::ProfileNotFound {
                name: profile.to_string(),
            });
        }

        if branches.local.contains(profile) {
            self.repo.delete_local_branch(profile)?;
            info!("removed local profile {profile:?}");
        }

        if !keep_remote && branches.remote.contains(profile) {
            self.repo.delete_remote_branch(profile)?;
            info!("removed remote profile {profile:?}");
        }

        Ok(())
    }

    /// List every known profile with its status.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Repo`] if branches cannot be listed.
    pub fn list(&self, fetch: bool) -> Result<Vec<Profile>> {
        if fetch {
            self.repo.fetch();
        }

        Ok(list_profiles(&self.repo)?)
    }

    /// Bundle profile into portable archive.
    ///
    /// The archive holds the configuration, the stored tree of each `save`
    /// section, and live data of each `export` section. Defaults to
    /// `<profile>.dtsv` in the current directory.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ArchiveExists`] if output already exists.
    /// - Return [`StoreError::ProfileNotFound`] if profile does not exist.
    /// - Return [`StoreError::Archive`] if archive cannot be written.
    #[instrument(skip(self, elevation, copier), level = "debug")]
    pub fn export<P, R>(
        &self,
        profile: Option<&str>,
        output: Option<&Path>,
        fetch: bool,
        mut elevation: Elevation,
        copier: &mut Copier<P, R>,
    ) -> Result<(PathBuf, Elevation)>
    where
        P: ElevationPrompter,
        R: ElevatedRunner,
    {
        let profile = match profile {
            Some(name) => self.switch(Some(name), fetch)?,
            None => self.select_profile(None, fetch)?,
        };
        let output = match output {
            Some(output) => output.to_path_buf(),
            None => PathBuf::from(format!("{profile}.{ARCHIVE_EXTENSION}")),
        };
        if output.exists() {
            return Err(StoreError::ArchiveExists { path: output });
        }

        let config = self.config()?;
        copier.set_excludes(&config.exclude)?;
        let workdir = self.repo.workdir()?.to_path_buf();
        let staging =
            tempfile::tempdir().map_err(|err| StoreError::io(err, "temporary directory"))?;
        let root = staging.path();

        fs::copy(&self.config_file, root.join(ARCHIVE_CONFIG))
            .map_err(|err| StoreError::io(err, &self.config_file))?;

        for name in config.save.keys() {
            debug!("export stored section {name:?}");
            elevation = copier.copy(
                workdir.join(name),
                root.join(ARCHIVE_SAVE_DIR).join(name),
                elevation,
            )?;
        }

        for (name, section) in &config.export {
            let section_dir = root.join(ARCHIVE_EXPORT_DIR).join(name);
            make_dir(&section_dir)?;
            for (entry, source) in section.entry_paths() {
                info!("export {name}/{entry}");
                elevation = copier.copy(&source, section_dir.join(entry), elevation)?;
            }
        }

        archive::pack(root, &output)?;
        info!("exported profile {profile:?} to {:?}", output.display());

        Ok((output, elevation))
    }

    /// Import profile from portable archive.
    ///
    /// The archive file stem names the new profile. Stored sections are
    /// committed into a fresh profile without history, and live data of
    /// each `export` section is restored onto its location. If the stored
    /// sections cannot be committed, the previously active profile is checked
    /// out again and no new profile is left behind.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidArchive`] if file does not look like a
    ///   profile archive.
    /// - Return [`StoreError::ProfileExists`] if profile already exists.
    /// - Return [`StoreError::Copy`] if an entry cannot be restored.
    #[instrument(skip(self, path, elevation, copier), level = "debug")]
    pub fn import<P, R>(
        &self,
        path: impl AsRef<Path>,
        fetch: bool,
        mut elevation: Elevation,
        copier: &mut Copier<P, R>,
    ) -> Result<(String, Elevation)>
    where
        P: ElevationPrompter,
        R: ElevatedRunner,
    {
        let path = path.as_ref();
        let name = archive_profile_name(path)?;
        if fetch {
            self.repo.fetch();
        }
        if self.repo.branches()?.contains(&name) {
            return Err(StoreError::ProfileExists { name });
        }

        let staging =
            tempfile::tempdir().map_err(|err| StoreError::io(err, "temporary directory"))?;
        let root = staging.path();
        archive::unpack(path, root)?;
        let config = ProfileConfig::load(root.join(ARCHIVE_CONFIG))?;
        copier.set_excludes(&config.exclude)?;

        let previous = self.repo.active_branch()?;
        self.repo.create_empty_branch(&name)?;
        elevation = match self.commit_import(&name, root, &config, elevation, copier) {
            Ok(elevation) => elevation,
            Err(err) => {
                self.abandon_import(previous.as_deref(), &config);
                return Err(err);
            }
        };

        for (section, entries) in &config.export {
            for (entry, dest) in entries.entry_paths() {
                let source = root.join(ARCHIVE_EXPORT_DIR).join(section).join(entry);
                if fs::symlink_metadata(&source).is_err() {
                    debug!("archive lacks {section}/{entry}");
                    continue;
                }

                info!("restore {section}/{entry}");
                elevation = copier.copy(&source, &dest, elevation)?;
            }
        }
        info!("imported profile {name:?}");

        Ok((name, elevation))
    }

    fn commit_import<P, R>(
        &self,
        name: &str,
        root: &Path,
        config: &ProfileConfig,
        mut elevation: Elevation,
        copier: &mut Copier<P, R>,
    ) -> Result<Elevation>
    where
        P: ElevationPrompter,
        R: ElevatedRunner,
    {
        let workdir = self.repo.workdir()?.to_path_buf();
        for section in config.save.keys() {
            debug!("import stored section {section:?}");
            elevation = copier.copy(
                root.join(ARCHIVE_SAVE_DIR).join(section),
                workdir.join(section),
                elevation,
            )?;
        }
        self.repo.stage_all()?;
        self.repo.commit(&format!("import {name} | {}", commit_message()))?;

        Ok(elevation)
    }

    /// Put previously active profile back after a failed import.
    fn abandon_import(&self, previous: Option<&str>, config: &ProfileConfig) {
        let Some(previous) = previous else {
            warn!("no profile to go back to after failed import");
            return;
        };

        if let Ok(workdir) = self.repo.workdir() {
            for section in config.save.keys() {
                let path = workdir.join(section);
                let removed = match fs::symlink_metadata(&path) {
                    Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
                    Ok(_) => fs::remove_file(&path),
                    Err(_) => continue,
                };
                if let Err(err) = removed {
                    warn!("cannot discard {:?}: {err}", path.display());
                }
            }
        }

        match self.repo.reset_to(previous) {
            Ok(()) => info!("import failed, back on profile {previous:?}"),
            Err(err) => warn!("cannot go back to profile {previous:?}: {err}"),
        }
    }

    fn install_config(&self, custom_config: Option<&Path>) -> Result<()> {
        if let Some(parent) = self.config_file.parent() {
            make_dir(parent)?;
        }

        match custom_config {
            Some(custom) => {
                info!("install configuration from {:?}", custom.display());
                fs::copy(custom, &self.config_file).map_err(|err| StoreError::io(err, custom))?;
            }
            None if self.config_file.exists() => {
                info!("keep existing configuration {:?}", self.config_file.display());
            }
            None => {
                info!("write default configuration {:?}", self.config_file.display());
                fs::write(&self.config_file, DEFAULT_TEMPLATE)
                    .map_err(|err| StoreError::io(err, &self.config_file))?;
            }
        }

        Ok(())
    }

    fn push(&self, profile: &str) -> Result<bool> {
        if !self.repo.is_remote_configured() {
            debug!("no remote to push profile {profile:?} to");
            return Ok(false);
        }

        if self.repo.has_upstream(profile) {
            self.repo.push_existing_branch()?;
        } else {
            self.repo.push_new_branch()?;
        }
        info!("pushed profile {profile:?}");

        Ok(true)
    }
}

/// Commit message naming the host and local time of a save.
pub fn commit_message() -> String {
    let host = hostname::get()
        .map(|host| host.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into());
    format!("{host} | {}", Local::now().format("%Y-%m-%d %H:%M:%S"))
}

fn archive_profile_name(path: &Path) -> Result<String> {
    let invalid = || StoreError::InvalidArchive {
        path: path.to_path_buf(),
    };

    if path.extension().and_then(|ext| ext.to_str()) != Some(ARCHIVE_EXTENSION) {
        return Err(invalid());
    }

    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(ToString::to_string)
        .ok_or_else(invalid)
}

fn make_dir(path: &Path) -> Result<()> {
    mkdirp::mkdirp(path)
        .map(|_| ())
        .map_err(|err| StoreError::io(err, path))
}

/// Profile store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Profile exists neither locally nor remotely.
    #[error("profile {name:?} does not exist")]
    ProfileNotFound { name: String },

    /// Profile name is already taken.
    #[error("profile {name:?} already exists")]
    ProfileExists { name: String },

    /// Export would overwrite existing file.
    #[error("archive {:?} already exists", path.display())]
    ArchiveExists { path: PathBuf },

    /// File is not a profile archive.
    #[error("{:?} is not a .dtsv profile archive", path.display())]
    InvalidArchive { path: PathBuf },

    /// Profile repository operation failed.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Configuration cannot be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Entry cannot be copied.
    #[error(transparent)]
    Copy(#[from] CopyError),

    /// Archive cannot be packed or unpacked.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Filesystem operation failed.
    #[error("failed to access {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

impl StoreError {
    fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("/tmp/laptop.dtsv", Some("laptop"); "valid archive")]
    #[test_case("desk.top.dtsv", Some("desk.top"); "dotted stem")]
    #[test_case("/tmp/laptop.zip", None; "wrong extension")]
    #[test_case("/tmp/.dtsv", None; "hidden file without stem")]
    #[test]
    fn profile_name_from_archive(path: &str, expect: Option<&str>) {
        let result = archive_profile_name(Path::new(path)).ok();
        pretty_assertions::assert_eq!(result.as_deref(), expect);
    }

    #[test]
    fn commit_message_names_host_and_time() {
        let message = commit_message();
        let (host, time) = message.split_once(" | ").unwrap_or_default();
        assert!(!host.is_empty());
        pretty_assertions::assert_eq!(time.len(), "2025-01-01 00:00:00".len());
    }

    #[test]
    fn init_writes_default_template() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let config_file = root.path().join("app/dotctl.toml");
        let profile_dir = root.path().join("app/profile");
        let store = ProfileStore::init(profile_dir, &config_file, None, None, None)?;

        pretty_assertions::assert_eq!(fs::read_to_string(&config_file)?, DEFAULT_TEMPLATE);
        pretty_assertions::assert_eq!(
            store.repo().active_branch()?.as_deref(),
            Some(DEFAULT_PROFILE)
        );

        Ok(())
    }

    #[test]
    fn init_keeps_existing_config() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let config_file = root.path().join("dotctl.toml");
        fs::write(&config_file, "exclude = []\n")?;

        ProfileStore::init(root.path().join("profile"), &config_file, None, Some("work"), None)?;
        pretty_assertions::assert_eq!(fs::read_to_string(&config_file)?, "exclude = []\n");

        let store = ProfileStore::open(root.path().join("profile"), &config_file)?;
        pretty_assertions::assert_eq!(store.repo().active_branch()?.as_deref(), Some("work"));

        Ok(())
    }
}
