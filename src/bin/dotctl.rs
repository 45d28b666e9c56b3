// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotctl::{
    copier::{elevate::Credential, Copier, Elevation},
    path::{default_config_file, default_log_file, default_profile_dir},
    status::{Profile, ProfileStatus},
    store::{ProfileStore, SaveOutcome},
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::{
    fs::{File, OpenOptions},
    path::PathBuf,
    process::exit,
    sync::Mutex,
};
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotctl [options] <dotctl-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Init(opts) => run_init(opts),
            Command::Save(opts) => run_save(opts),
            Command::Apply(opts) => run_apply(opts),
            Command::List(opts) => run_list(opts),
            Command::Switch(opts) => run_switch(opts),
            Command::Create(opts) => run_create(opts),
            Command::Remove(opts) => run_remove(opts),
            Command::Import(opts) => run_import(opts),
            Command::Export(opts) => run_export(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize profile repository and configuration.
    #[command(override_usage = "dotctl init [options] [profile]")]
    Init(InitOptions),

    /// Save live files into profile.
    #[command(override_usage = "dotctl save [options] [profile]")]
    Save(SyncOptions),

    /// Apply stored files of profile onto live locations.
    #[command(override_usage = "dotctl apply [options] [profile]")]
    Apply(SyncOptions),

    /// List profiles with their status.
    #[command(override_usage = "dotctl list [options]")]
    List(ListOptions),

    /// Switch to existing profile.
    #[command(override_usage = "dotctl switch [options] [profile]")]
    Switch(SwitchOptions),

    /// Create new profile.
    #[command(override_usage = "dotctl create [options] <profile>")]
    Create(CreateOptions),

    /// Remove profile locally and from remote.
    #[command(override_usage = "dotctl remove [options] <profile>")]
    Remove(RemoveOptions),

    /// Import profile from archive.
    #[command(override_usage = "dotctl import [options] <archive>")]
    Import(ImportOptions),

    /// Export profile into archive.
    #[command(override_usage = "dotctl export [options] [profile]")]
    Export(ExportOptions),
}

#[derive(Args, Clone, Debug)]
struct ElevationOptions {
    /// Password to use whenever elevated privileges are needed.
    #[arg(short, long, value_name = "password")]
    pub password: Option<String>,

    /// Never ask for elevated privileges, skip files that need them.
    #[arg(short, long)]
    pub skip_sudo: bool,
}

impl ElevationOptions {
    fn into_elevation(self) -> Elevation {
        Elevation::new(self.skip_sudo, self.password.map(Credential::new))
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Profile to create or check out after initialization.
    #[arg(value_name = "profile")]
    pub profile: Option<String>,

    /// URL of remote to clone profile repository from.
    #[arg(short, long, value_name = "url")]
    pub url: Option<String>,

    /// Custom configuration file to install.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Profile to use instead of the active one.
    #[arg(value_name = "profile")]
    pub profile: Option<String>,

    /// Fetch from remote before selecting profile.
    #[arg(short, long)]
    pub fetch: bool,

    #[command(flatten)]
    pub elevation: ElevationOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Fetch from remote before listing.
    #[arg(short, long)]
    pub fetch: bool,

    /// Describe status of each profile.
    #[arg(short, long)]
    pub details: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SwitchOptions {
    /// Profile to switch to, defaults to default branch of remote.
    #[arg(value_name = "profile")]
    pub profile: Option<String>,

    /// Fetch from remote before switching.
    #[arg(short, long)]
    pub fetch: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CreateOptions {
    /// Name of new profile.
    #[arg(required = true, value_name = "profile")]
    pub profile: String,

    /// Fetch from remote before creating.
    #[arg(short, long)]
    pub fetch: bool,

    /// Start profile without any history.
    #[arg(short, long)]
    pub empty: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Name of profile to remove.
    #[arg(required = true, value_name = "profile")]
    pub profile: String,

    /// Fetch from remote before removing.
    #[arg(short, long)]
    pub fetch: bool,

    /// Only remove local profile, leave remote one alone.
    #[arg(short, long)]
    pub keep_remote: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ImportOptions {
    /// Path to profile archive.
    #[arg(required = true, value_name = "archive")]
    pub archive: PathBuf,

    /// Fetch from remote before checking for existing profile.
    #[arg(short, long)]
    pub fetch: bool,

    #[command(flatten)]
    pub elevation: ElevationOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ExportOptions {
    /// Profile to export instead of the active one.
    #[arg(value_name = "profile")]
    pub profile: Option<String>,

    /// Path of archive to write.
    #[arg(short, long, value_name = "path")]
    pub output: Option<PathBuf>,

    /// Fetch from remote before switching to profile.
    #[arg(short, long)]
    pub fetch: bool,

    #[command(flatten)]
    pub elevation: ElevationOptions,
}

fn main() {
    let log_file = default_log_file().ok();
    let log_writer = log_file
        .as_ref()
        .filter(|path| path.parent().is_some_and(|parent| parent.exists()))
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

    let stderr_layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    let file_layer = log_writer.map(|file: File| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::DEBUG)
    });
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Err(error) = run() {
        debug!("{error:?}");
        match log_file {
            Some(path) => error!("{error:#}, see {} for details", path.display()),
            None => error!("{error:#}"),
        }
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn open_store() -> Result<ProfileStore> {
    Ok(ProfileStore::open(
        default_profile_dir()?,
        default_config_file()?,
    )?)
}

fn run_init(opts: InitOptions) -> Result<()> {
    let store = ProfileStore::init(
        default_profile_dir()?,
        default_config_file()?,
        opts.url.as_deref(),
        opts.profile.as_deref(),
        opts.config.as_deref(),
    )?;

    if let Some(profile) = store.repo().active_branch()? {
        info!("profile store ready, active profile is {profile:?}");
    }

    Ok(())
}

fn run_save(opts: SyncOptions) -> Result<()> {
    let store = open_store()?;
    let mut copier = Copier::interactive();
    let (outcome, _) = store.save(
        opts.profile.as_deref(),
        opts.fetch,
        opts.elevation.into_elevation(),
        &mut copier,
    )?;

    match outcome {
        SaveOutcome::Committed { profile, pushed: true } => {
            info!("saved and pushed profile {profile:?}")
        }
        SaveOutcome::Committed { profile, pushed: false } => info!("saved profile {profile:?}"),
        SaveOutcome::Unchanged { profile } => info!("profile {profile:?} has no changes"),
    }

    Ok(())
}

fn run_apply(opts: SyncOptions) -> Result<()> {
    let store = open_store()?;
    let mut copier = Copier::interactive();
    let (profile, _) = store.apply(
        opts.profile.as_deref(),
        opts.fetch,
        opts.elevation.into_elevation(),
        &mut copier,
    )?;
    info!("applied profile {profile:?}, log out and back in to see every change");

    Ok(())
}

fn run_list(opts: ListOptions) -> Result<()> {
    let store = open_store()?;
    let profiles = store.list(opts.fetch)?;
    if profiles.is_empty() {
        info!("no profiles yet, run `dotctl save` to create one");
        return Ok(());
    }

    for profile in profiles {
        println!("{}", format_profile(&profile, opts.details));
    }

    Ok(())
}

fn run_switch(opts: SwitchOptions) -> Result<()> {
    let store = open_store()?;
    store.switch(opts.profile.as_deref(), opts.fetch)?;

    Ok(())
}

fn run_create(opts: CreateOptions) -> Result<()> {
    let store = open_store()?;
    store.create(&opts.profile, opts.fetch, opts.empty)?;

    Ok(())
}

fn run_remove(opts: RemoveOptions) -> Result<()> {
    let store = open_store()?;
    store.remove(&opts.profile, opts.fetch, opts.keep_remote)?;

    Ok(())
}

fn run_import(opts: ImportOptions) -> Result<()> {
    let store = open_store()?;
    let mut copier = Copier::interactive();
    store.import(
        &opts.archive,
        opts.fetch,
        opts.elevation.into_elevation(),
        &mut copier,
    )?;

    Ok(())
}

fn run_export(opts: ExportOptions) -> Result<()> {
    let store = open_store()?;
    let mut copier = Copier::interactive();
    store.export(
        opts.profile.as_deref(),
        opts.output.as_deref(),
        opts.fetch,
        opts.elevation.into_elevation(),
        &mut copier,
    )?;

    Ok(())
}

fn format_profile(profile: &Profile, details: bool) -> String {
    let (title, description) = describe_status(profile.status);
    let marker = if profile.active { "*" } else { " " };
    if details {
        format!("{marker} {:<24} {title:<8} {description}", profile.name)
    } else {
        format!("{marker} {:<24} {title}", profile.name)
    }
}

fn describe_status(status: ProfileStatus) -> (&'static str, &'static str) {
    match status {
        ProfileStatus::Local => ("local", "only exists on this machine"),
        ProfileStatus::Remote => ("remote", "only exists on the remote"),
        ProfileStatus::Synced => ("synced", "same as the remote"),
        ProfileStatus::Ahead => ("ahead", "has saves the remote lacks, push them"),
        ProfileStatus::Behind => ("behind", "remote has newer saves, pull them"),
        ProfileStatus::Stale => ("stale", "remote counterpart was removed"),
    }
}
