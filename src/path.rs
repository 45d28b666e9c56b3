// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.
//!
//! # Application Layout
//!
//! Dotctl keeps everything it owns under one application directory, which
//! defaults to `$XDG_DATA_HOME/dotctl`:
//!
//! - `profile/` is the Git working tree holding every profile as a branch.
//! - `dotctl.toml` is the declarative configuration of what to save.
//! - `dotctl.log` collects detailed traces of failed runs.

use std::{collections::BTreeMap, path::PathBuf};

/// Name of the application directory and binary.
pub const APP_NAME: &str = "dotctl";

/// Profile that gets created when nothing else was asked for.
pub const DEFAULT_PROFILE: &str = "main";

/// File extension given to exported profile archives.
pub const ARCHIVE_EXTENSION: &str = "dtsv";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the application directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/dotctl`. Does not check if
/// the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_app_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join(APP_NAME))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the profile repository.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
pub fn default_profile_dir() -> Result<PathBuf> {
    default_app_dir().map(|path| path.join("profile"))
}

/// Determine default absolute path to the declarative configuration file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
pub fn default_config_file() -> Result<PathBuf> {
    default_app_dir().map(|path| path.join(format!("{APP_NAME}.toml")))
}

/// Determine default absolute path to the log file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
pub fn default_log_file() -> Result<PathBuf> {
    default_app_dir().map(|path| path.join(format!("{APP_NAME}.log")))
}

/// Placeholder tokens usable in section locations.
///
/// Each token is written as `$NAME` inside a location string, and maps to
/// one resolved absolute path. The set of tokens is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTable {
    tokens: BTreeMap<&'static str, PathBuf>,
}

impl TokenTable {
    /// Resolve token table against current user environment.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn from_env() -> Result<Self> {
        let home = home_dir()?;
        let config = dirs::config_dir().unwrap_or_else(|| home.join(".config"));
        let share = dirs::data_dir().unwrap_or_else(|| home.join(".local").join("share"));
        let bin = dirs::executable_dir().unwrap_or_else(|| home.join(".local").join("bin"));

        let mut tokens = BTreeMap::new();
        tokens.insert("APP_DIR", share.join(APP_NAME));
        tokens.insert("HOME", home);
        tokens.insert("CONFIG_DIR", config);
        tokens.insert("SHARE_DIR", share);
        tokens.insert("BIN_DIR", bin);
        tokens.insert("ROOT_SHARE_DIR", PathBuf::from("/usr/share"));
        tokens.insert("SYS_CONFIG_DIR", PathBuf::from("/etc"));

        Ok(Self { tokens })
    }

    /// Lookup resolved path of a token by name, e.g., "HOME".
    pub fn get(&self, name: &str) -> Option<&PathBuf> {
        self.tokens.get(name)
    }

    /// Iterate through all token names with their resolved paths.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PathBuf)> {
        self.tokens.iter().map(|(name, path)| (*name, path))
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
