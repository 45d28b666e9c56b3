// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the declarative configuration file that tells
//! dotctl what to snapshot into a profile, and what to bundle into exported
//! archives.
//!
//! # General Layout
//!
//! The configuration is composed of two mappings of named __sections__:
//! `save` and `export`. A section names a base location on the file system,
//! and an ordered listing of entries relative to that location. Each `save`
//! section is mirrored into the profile repository under a top-level
//! directory of the same name. The `export` sections hold heavier data like
//! themes or fonts that only travel inside exported archives.
//!
//! ```toml
//! exclude = ["*.pyc", "*.pyo"]
//!
//! [save.configs]
//! location = "$CONFIG_DIR"
//! entries = ["gtk-3.0", "kdeglobals"]
//!
//! [export.fonts]
//! location = "$HOME"
//! entries = [".fonts"]
//! ```
//!
//! # Location Tokens
//!
//! Locations may contain placeholder tokens listed in [`TokenTable`]. These
//! are substituted at load time. Unknown tokens are left untouched.

use crate::path::{NoWayHome, TokenTable};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Built-in configuration template written by `dotctl init`.
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/default.toml");

/// Declarative profile configuration.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// Gitignore-style patterns never copied nor deleted.
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,

    /// Sections to snapshot into the profile.
    #[serde(default)]
    pub save: BTreeMap<String, SyncSection>,

    /// Sections bundled into exported archives.
    #[serde(default)]
    pub export: BTreeMap<String, SyncSection>,
}

impl ProfileConfig {
    /// Load configuration file, resolving location tokens from current user
    /// environment.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] if file does not exist.
    /// - Return [`ConfigError::Malformed`] if file content is not valid.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let tokens = TokenTable::from_env()?;
        Self::load_with(path, &tokens)
    }

    /// Load configuration file, resolving location tokens with target table.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] if file does not exist.
    /// - Return [`ConfigError::Malformed`] if file content is not valid.
    pub fn load_with(path: impl AsRef<Path>, tokens: &TokenTable) -> Result<Self> {
        let path = path.as_ref();
        debug!("load configuration: {:?}", path.display());
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }

        let data = read_to_string(path).map_err(|err| ConfigError::Io {
            source: err,
            path: path.to_path_buf(),
        })?;

        Self::parse_with(&data, tokens)
    }

    /// Parse configuration data, resolving location tokens with target table.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Malformed`] if data is not valid.
    pub fn parse_with(data: &str, tokens: &TokenTable) -> Result<Self> {
        let mut config: ProfileConfig = toml::de::from_str(data).map_err(ConfigError::Malformed)?;

        // INVARIANT: Locations are always token free after loading.
        for section in config.save.values_mut().chain(config.export.values_mut()) {
            section.location = section.location.expand(tokens);
        }

        Ok(config)
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            exclude: default_excludes(),
            save: BTreeMap::new(),
            export: BTreeMap::new(),
        }
    }
}

impl FromStr for ProfileConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::parse_with(data, &TokenTable::from_env()?)
    }
}

impl Display for ProfileConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn default_excludes() -> Vec<String> {
    vec!["*.pyc".into(), "*.pyo".into()]
}

/// Named group of entries sharing a common base location.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncSection {
    /// Base location of all entries.
    pub location: Location,

    /// Ordered listing of paths relative to location.
    #[serde(default)]
    pub entries: Vec<String>,
}

impl SyncSection {
    /// Absolute path of each entry of section.
    pub fn entry_paths(&self) -> impl Iterator<Item = (&str, PathBuf)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.as_str(), self.location.as_path().join(entry)))
    }
}

/// Base location of a section.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Location(PathBuf);

impl Location {
    /// Construct new location.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat location as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Substitute placeholder tokens in location.
    ///
    /// A leading tilde expands to the home directory. Tokens missing from the
    /// table are kept verbatim.
    pub fn expand(&self, tokens: &TokenTable) -> Self {
        let raw = self.0.to_string_lossy();
        let expanded = shellexpand::full_with_context_no_errors(
            raw.as_ref(),
            || tokens.get("HOME").map(|path| path.to_string_lossy().into_owned()),
            |name| tokens.get(name).map(|path| path.to_string_lossy().into_owned()),
        );

        Self(PathBuf::from(expanded.into_owned()))
    }
}

impl Display for Location {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file does not exist.
    #[error("configuration file {:?} is missing, run `dotctl init` first", path.display())]
    Missing { path: PathBuf },

    /// Failed to deserialize configuration.
    #[error("malformed configuration")]
    Malformed(#[source] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Configuration file cannot be read.
    #[error("failed to read configuration file {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Token table cannot be resolved.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [
        ("HOME", "/home/blah"),
        ("XDG_CONFIG_HOME", "/home/blah/.config"),
        ("XDG_DATA_HOME", "/home/blah/.local/share"),
    ])]
    fn deserialize_profile_config() -> anyhow::Result<()> {
        let result: ProfileConfig = indoc! {r#"
            exclude = ["*.swp"]

            [save.configs]
            location = "$CONFIG_DIR"
            entries = ["gtk-3.0", "kdeglobals"]

            [save.home]
            location = "~/"
            entries = [".zshrc"]

            [export.themes]
            location = "$ROOT_SHARE_DIR/themes"
            entries = ["Breeze"]
        "#}
        .parse()?;

        let mut save = BTreeMap::new();
        save.insert(
            "configs".to_string(),
            SyncSection {
                location: Location::new("/home/blah/.config"),
                entries: vec!["gtk-3.0".into(), "kdeglobals".into()],
            },
        );
        save.insert(
            "home".to_string(),
            SyncSection {
                location: Location::new("/home/blah/"),
                entries: vec![".zshrc".into()],
            },
        );
        let mut export = BTreeMap::new();
        export.insert(
            "themes".to_string(),
            SyncSection {
                location: Location::new("/usr/share/themes"),
                entries: vec!["Breeze".into()],
            },
        );
        let expect = ProfileConfig {
            exclude: vec!["*.swp".into()],
            save,
            export,
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn unknown_tokens_stay_verbatim() -> anyhow::Result<()> {
        let result: ProfileConfig = indoc! {r#"
            [save.odd]
            location = "$NOT_A_TOKEN/$HOME"
            entries = []
        "#}
        .parse()?;

        assert_eq!(
            result.save["odd"].location,
            Location::new("$NOT_A_TOKEN//home/blah")
        );
        assert_eq!(result.exclude, default_excludes());
        assert!(result.export.is_empty());

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn reject_malformed_config() {
        let result = "[save.configs]\nentries = 42\n".parse::<ProfileConfig>();
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn report_missing_config() -> anyhow::Result<()> {
        let tokens = TokenTable::from_env()?;
        let result = ProfileConfig::load_with("definitely/not/here.toml", &tokens);
        assert!(matches!(result, Err(ConfigError::Missing { .. })));

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn default_template_is_valid() -> anyhow::Result<()> {
        let config: ProfileConfig = DEFAULT_TEMPLATE.parse()?;
        assert!(!config.save.is_empty());
        for section in config.save.values().chain(config.export.values()) {
            assert!(section.location.as_path().is_absolute());
        }

        Ok(())
    }

    #[test]
    fn section_entry_paths_join_location() {
        let section = SyncSection {
            location: Location::new("/tmp/src"),
            entries: vec!["a.txt".into(), "nested/b.txt".into()],
        };
        let result = section.entry_paths().collect::<Vec<_>>();
        let expect = vec![
            ("a.txt", PathBuf::from("/tmp/src/a.txt")),
            ("nested/b.txt", PathBuf::from("/tmp/src/nested/b.txt")),
        ];
        assert_eq!(result, expect);
    }
}
