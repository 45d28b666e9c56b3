// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote transfer plumbing.
//!
//! Every network operation on the profile repository (clone, fetch, push)
//! goes through a [`RemoteSession`]. A session shows transfer progress, and
//! prompts the user for credentials whenever the remote asks for them.

use crate::repo::Result;

use auth_git2::{GitAuthenticator, Prompter};
use git2::{Config, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    path::Path,
    time::{Duration, Instant},
};
use tracing::{info, instrument};

/// Authenticated remote transfer with progress reporting.
pub(crate) struct RemoteSession {
    authenticator: GitAuthenticator,
    config: Config,
    bar: ProgressBar,
}

impl RemoteSession {
    /// Start new session labeled by message.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`](crate::repo::RepoError::Git2) if default
    ///   Git configuration cannot be opened.
    /// - Return [`RepoError::ProgressTemplate`](crate::repo::RepoError::ProgressTemplate)
    ///   if progress bar style is invalid.
    pub(crate) fn new(message: impl Into<String>) -> Result<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;

        Ok(Self {
            authenticator,
            config,
            bar,
        })
    }

    /// Callbacks wired to credential prompting and progress reporting.
    pub(crate) fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut rc = RemoteCallbacks::new();
        rc.credentials(self.authenticator.credentials(&self.config));

        let bar = self.bar.clone();
        let mut throttle = Instant::now();
        rc.transfer_progress(move |progress| {
            if throttle.elapsed() > Duration::from_millis(10) {
                throttle = Instant::now();
                bar.set_length(progress.total_objects() as u64);
                bar.set_position(progress.received_objects() as u64);
            }
            true
        });

        let bar = self.bar.clone();
        rc.push_transfer_progress(move |current, total, _| {
            bar.set_length(total as u64);
            bar.set_position(current as u64);
        });

        // INVARIANT: Remote rejections are errors, not silent no-ops.
        rc.push_update_reference(|refname, status| match status {
            Some(message) => Err(git2::Error::from_str(&format!(
                "remote rejected {refname}: {message}"
            ))),
            None => Ok(()),
        });

        rc
    }

    /// Clear progress bar of session.
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub(crate) struct IndicatifPrompter {
    bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub(crate) fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}
