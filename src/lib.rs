// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile profile manager.
//!
//! Dotctl snapshots desktop configuration and data directories into named
//! __profiles__, and restores them later. Every profile is a branch of one
//! Git repository, so profiles can be shared between machines through a
//! remote.
//!
//! - [`copier`] mirrors file trees while recovering from permission failures.
//! - [`repo`] wraps the profile repository.
//! - [`status`] derives the status of each profile.
//! - [`store`] drives the save, apply, and profile selection workflows.

pub mod archive;
pub mod config;
pub mod copier;
pub mod path;
pub mod repo;
pub mod status;
pub mod store;
