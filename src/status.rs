// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Profile status resolution.
//!
//! Status of a profile is never stored. It is derived fresh from the branch
//! listing and commit graph of the profile repository every time it is asked
//! for.

use crate::repo::{ProfileRepo, Result};

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, warn};

/// Relationship between local and remote copy of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfileStatus {
    /// Exists only locally.
    Local,

    /// Exists only on the remote.
    Remote,

    /// Local and remote point to the same commit.
    Synced,

    /// Local has commits the remote lacks.
    Ahead,

    /// Remote has commits local lacks.
    Behind,

    /// Upstream counterpart of local branch no longer exists.
    Stale,
}

impl Display for ProfileStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Synced => "synced",
            Self::Ahead => "ahead",
            Self::Behind => "behind",
            Self::Stale => "stale",
        };
        fmt.write_str(label)
    }
}

/// Profile along with its derived status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub status: ProfileStatus,
    pub active: bool,
}

/// Classify profile by comparing local and remote branch sets.
///
/// Only reads from the repository. A failed commit graph comparison is logged
/// and reported as [`ProfileStatus::Synced`].
pub fn classify(
    repo: &ProfileRepo,
    name: &str,
    local: &BTreeSet<String>,
    remote: &BTreeSet<String>,
) -> ProfileStatus {
    match (local.contains(name), remote.contains(name)) {
        (true, true) => match repo.ahead_behind(name) {
            Ok((ahead, _)) if ahead > 0 => ProfileStatus::Ahead,
            Ok((_, behind)) if behind > 0 => ProfileStatus::Behind,
            Ok(_) => ProfileStatus::Synced,
            Err(err) => {
                warn!("cannot compare {name:?} with its remote, assuming synced: {err}");
                ProfileStatus::Synced
            }
        },
        (false, true) => ProfileStatus::Remote,
        (true, false) if repo.has_recorded_upstream(name) => ProfileStatus::Stale,
        _ => ProfileStatus::Local,
    }
}

/// List every known profile sorted by name.
///
/// # Errors
///
/// - Return [`RepoError`](crate::repo::RepoError) if branches cannot be
///   listed.
pub fn list_profiles(repo: &ProfileRepo) -> Result<Vec<Profile>> {
    let branches = repo.branches()?;
    let profiles = branches
        .all
        .iter()
        .map(|name| {
            let status = classify(repo, name, &branches.local, &branches.remote);
            debug!("profile {name:?} is {status}");
            Profile {
                name: name.clone(),
                status,
                active: branches.active.as_deref() == Some(name.as_str()),
            }
        })
        .collect();

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test_case(ProfileStatus::Local, "local"; "local")]
    #[test_case(ProfileStatus::Remote, "remote"; "remote")]
    #[test_case(ProfileStatus::Synced, "synced"; "synced")]
    #[test_case(ProfileStatus::Ahead, "ahead"; "ahead")]
    #[test_case(ProfileStatus::Behind, "behind"; "behind")]
    #[test_case(ProfileStatus::Stale, "stale"; "stale")]
    #[test]
    fn display_status(status: ProfileStatus, expect: &str) {
        pretty_assertions::assert_eq!(status.to_string(), expect);
    }

    #[test]
    fn classify_without_remote() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = ProfileRepo::init(dir.path(), "main")?;
        let local = names(&["main"]);
        let remote = names(&["laptop"]);

        pretty_assertions::assert_eq!(
            classify(&repo, "main", &local, &remote),
            ProfileStatus::Local
        );
        pretty_assertions::assert_eq!(
            classify(&repo, "laptop", &local, &remote),
            ProfileStatus::Remote
        );
        pretty_assertions::assert_eq!(
            classify(&repo, "ghost", &local, &remote),
            ProfileStatus::Local
        );

        Ok(())
    }

    #[test]
    fn unreachable_remote_counts_as_synced() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = ProfileRepo::init(dir.path(), "main")?;
        let both = names(&["main"]);

        pretty_assertions::assert_eq!(classify(&repo, "main", &both, &both), ProfileStatus::Synced);

        Ok(())
    }

    #[test]
    fn list_profiles_marks_active() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = ProfileRepo::init(dir.path(), "main")?;
        repo.create_branch("desktop")?;

        let result = list_profiles(&repo)?;
        let expect = vec![
            Profile {
                name: "desktop".into(),
                status: ProfileStatus::Local,
                active: true,
            },
            Profile {
                name: "main".into(),
                status: ProfileStatus::Local,
                active: false,
            },
        ];
        pretty_assertions::assert_eq!(result, expect);

        Ok(())
    }
}
