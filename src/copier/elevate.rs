// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Privilege elevation plumbing.
//!
//! The copier never touches elevated privileges directly. Instead it asks an
//! [`ElevationPrompter`] what the operator wants to do about a permission
//! failure, and hands the failing operation over to an [`ElevatedRunner`] as
//! an [`ElevatedCommand`].

use inquire::{Password, Text};
use std::{
    ffi::OsString,
    fmt::{Debug, Formatter, Result as FmtResult},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Child, Command, Output, Stdio},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Secret used to obtain elevated privileges.
///
/// Never shows up in debug output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Construct new credential.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose secret of credential.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl Debug for Credential {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("Credential(<redacted>)")
    }
}

/// Filesystem operation to perform with elevated privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevatedCommand {
    /// Create directory along with missing parents.
    MakeDir(PathBuf),

    /// Remove file or directory recursively.
    Remove(PathBuf),

    /// Copy one file or symbolic link, preserving metadata.
    Copy { from: PathBuf, to: PathBuf },

    /// Replace target with exact copy of entire tree, preserving metadata.
    ///
    /// Entries that only exist at the target do not survive.
    MirrorTree { from: PathBuf, to: PathBuf },
}

/// Program and argument listing of one invocation.
pub type Step = (&'static str, Vec<OsString>);

impl ElevatedCommand {
    /// Invocations that perform the operation, in order.
    pub fn steps(&self) -> Vec<Step> {
        match self {
            Self::MakeDir(path) => vec![("mkdir", vec!["-p".into(), path.into()])],
            Self::Remove(path) => vec![remove_step(path)],
            Self::Copy { from, to } => vec![(
                "cp",
                vec![
                    "-P".into(),
                    "-p".into(),
                    "--remove-destination".into(),
                    from.into(),
                    to.into(),
                ],
            )],
            Self::MirrorTree { from, to } => vec![
                remove_step(to),
                ("cp", vec!["-a".into(), "-T".into(), from.into(), to.into()]),
            ],
        }
    }

    /// Path the operation is performed on.
    pub fn target(&self) -> &Path {
        match self {
            Self::MakeDir(path) | Self::Remove(path) => path,
            Self::Copy { to, .. } | Self::MirrorTree { to, .. } => to,
        }
    }
}

fn remove_step(path: &Path) -> Step {
    ("rm", vec!["-rf".into(), path.into()])
}

/// Execute filesystem operations with elevated privileges.
pub trait ElevatedRunner {
    /// Run elevated command with given credential.
    ///
    /// # Errors
    ///
    /// - Return [`ElevateError`] if elevated command cannot be run, or fails.
    fn run(&mut self, command: &ElevatedCommand, credential: &Credential) -> Result<()>;
}

/// Elevated runner backed by `sudo`.
///
/// The credential is fed through the standard input of `sudo -S`, so it is
/// never part of the argument listing of any process.
#[derive(Debug, Default, Clone)]
pub struct SudoRunner;

impl SudoRunner {
    /// Construct new sudo runner.
    pub fn new() -> Self {
        Self
    }

    fn sudo(
        &self,
        program: &'static str,
        args: &[OsString],
        target: &Path,
        credential: &Credential,
    ) -> Result<()> {
        debug!("sudo {program} {args:?}");
        let child = Command::new("sudo")
            .args(["-S", "-p", "", "--", program])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = feed_and_wait(child, credential.expose())?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(output.stderr.as_slice());
            return Err(ElevateError::Failed {
                program,
                target: target.to_path_buf(),
                message: stderr.trim_end().to_string(),
            });
        }

        Ok(())
    }
}

impl ElevatedRunner for SudoRunner {
    #[instrument(skip(self, credential), level = "debug")]
    fn run(&mut self, command: &ElevatedCommand, credential: &Credential) -> Result<()> {
        for (program, args) in command.steps() {
            self.sudo(program, &args, command.target(), credential)?;
        }

        Ok(())
    }
}

/// Write line into standard input of child, and wait for it to exit.
///
/// A child that exits without reading its input is not an error. Sudo does
/// exactly that while its timestamp is still valid.
fn feed_and_wait(mut child: Child, input: &str) -> std::io::Result<Output> {
    let written = match child.stdin.take() {
        Some(mut stdin) => writeln!(stdin, "{input}"),
        None => Ok(()),
    };

    // INVARIANT: Always reap child, even if it could not be fed.
    let output = child.wait_with_output()?;
    match written {
        Err(err) if err.kind() != ErrorKind::BrokenPipe => Err(err),
        _ => Ok(output),
    }
}

/// What the operator wants done about a permission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationChoice {
    /// Supply credential, and reuse it for the rest of the run.
    CacheCredential,

    /// Supply credential for current operation only.
    CredentialOnce,

    /// Never elevate again for the rest of the run.
    SkipAll,

    /// Skip current operation only.
    SkipOnce,
}

impl FromStr for ElevationChoice {
    type Err = PromptError;

    fn from_str(answer: &str) -> Result<Self, Self::Err> {
        match answer.trim() {
            "1" => Ok(Self::CacheCredential),
            "2" => Ok(Self::CredentialOnce),
            "3" => Ok(Self::SkipAll),
            "4" => Ok(Self::SkipOnce),
            other => Err(PromptError::InvalidChoice(other.to_string())),
        }
    }
}

/// Ask operator how to deal with permission failures.
pub trait ElevationPrompter {
    /// Ask which [`ElevationChoice`] to make for target path.
    ///
    /// Returns the raw answer of the operator. The caller is responsible for
    /// validating it.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if operator cannot be asked.
    fn ask_choice(&mut self, path: &Path) -> Result<String, PromptError>;

    /// Ask for credential to elevate privileges with.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if operator cannot be asked.
    fn ask_credential(&mut self) -> Result<Credential, PromptError>;
}

/// Interactive terminal prompter.
#[derive(Debug, Default, Clone)]
pub struct InquirePrompter;

impl InquirePrompter {
    /// Construct new terminal prompter.
    pub fn new() -> Self {
        Self
    }
}

impl ElevationPrompter for InquirePrompter {
    fn ask_choice(&mut self, path: &Path) -> Result<String, PromptError> {
        let message = format!("elevated privileges required to process {}", path.display());
        let answer = Text::new(message.as_str())
            .with_help_message(
                "1: give password and reuse it, 2: give password for this file only, \
                 3: skip all, 4: skip this file",
            )
            .with_placeholder("1/2/3/4")
            .prompt()?;

        Ok(answer)
    }

    fn ask_credential(&mut self) -> Result<Credential, PromptError> {
        let secret = Password::new("password")
            .without_confirmation()
            .prompt()?;

        Ok(Credential::new(secret))
    }
}

/// Elevated execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ElevateError {
    /// Elevated command exited unsuccessfully.
    #[error("elevated {program} failed on {:?}: {message}", target.display())]
    Failed {
        program: &'static str,
        target: PathBuf,
        message: String,
    },

    /// Elevated command cannot be spawned or talked to.
    #[error(transparent)]
    Spawn(#[from] std::io::Error),
}

/// Operator interaction error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Operator answered with something that is not a valid choice.
    #[error("invalid choice {0:?}, expected one of 1, 2, 3, or 4")]
    InvalidChoice(String),

    /// Terminal prompt failed.
    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),
}

/// Friendly result alias :3
type Result<T, E = ElevateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("1", ElevationChoice::CacheCredential; "cache credential")]
    #[test_case("2", ElevationChoice::CredentialOnce; "credential once")]
    #[test_case(" 3\n", ElevationChoice::SkipAll; "skip all with whitespace")]
    #[test_case("4", ElevationChoice::SkipOnce; "skip once")]
    #[test]
    fn parse_valid_choice(answer: &str, expect: ElevationChoice) {
        let result: ElevationChoice = answer.parse().unwrap();
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test_case(""; "empty")]
    #[test_case("5"; "out of range")]
    #[test_case("yes"; "word")]
    #[test]
    fn parse_invalid_choice(answer: &str) {
        let result = answer.parse::<ElevationChoice>();
        assert!(matches!(result, Err(PromptError::InvalidChoice(_))));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("hunter2");
        pretty_assertions::assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
        pretty_assertions::assert_eq!(credential.expose(), "hunter2");
    }

    #[test]
    fn elevated_command_steps() {
        let steps = ElevatedCommand::MakeDir("/etc/foo".into()).steps();
        pretty_assertions::assert_eq!(
            steps,
            vec![("mkdir", vec![OsString::from("-p"), OsString::from("/etc/foo")])]
        );

        let steps = ElevatedCommand::Remove("/etc/foo".into()).steps();
        pretty_assertions::assert_eq!(
            steps,
            vec![("rm", vec![OsString::from("-rf"), OsString::from("/etc/foo")])]
        );

        let command = ElevatedCommand::MirrorTree {
            from: "/a".into(),
            to: "/b".into(),
        };
        let programs = command
            .steps()
            .into_iter()
            .map(|(program, args)| (program, args.last().cloned()))
            .collect::<Vec<_>>();
        pretty_assertions::assert_eq!(
            programs,
            vec![("rm", Some(OsString::from("/b"))), ("cp", Some(OsString::from("/b")))]
        );
        pretty_assertions::assert_eq!(command.target(), Path::new("/b"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn mirror_tree_drops_target_only_entries() -> anyhow::Result<()> {
        let root = tempfile::TempDir::new()?;
        let (from, to) = (root.path().join("from"), root.path().join("to"));
        std::fs::create_dir_all(from.join("nested"))?;
        std::fs::write(from.join("nested/keep.txt"), "keep")?;
        std::fs::create_dir_all(&to)?;
        std::fs::write(to.join("stale.txt"), "stale")?;

        let command = ElevatedCommand::MirrorTree {
            from: from.clone(),
            to: to.clone(),
        };
        for (program, args) in command.steps() {
            let status = Command::new(program).args(&args).status()?;
            assert!(status.success(), "{program} {args:?} failed");
        }

        assert!(!to.join("stale.txt").exists());
        pretty_assertions::assert_eq!(
            std::fs::read_to_string(to.join("nested/keep.txt"))?,
            "keep"
        );

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn feed_child_that_never_reads() -> anyhow::Result<()> {
        // Large enough to overflow the pipe buffer, so the write cannot finish
        // before the child exits.
        let input = "x".repeat(1 << 20);
        let child = Command::new("true")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = feed_and_wait(child, &input)?;
        assert!(output.status.success());

        Ok(())
    }
}
