// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Portable profile archives.
//!
//! An exported profile is a zip file with the `.dtsv` extension laid out as
//! follows:
//!
//! - `dotctl.toml` is the configuration the profile was exported with.
//! - `save/<section>/...` holds the stored tree of every `save` section.
//! - `export/<section>/<entry>` holds live data of every `export` section.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

/// Name of configuration file inside archive.
pub const ARCHIVE_CONFIG: &str = "dotctl.toml";

/// Directory of stored `save` sections inside archive.
pub const ARCHIVE_SAVE_DIR: &str = "save";

/// Directory of live `export` sections inside archive.
pub const ARCHIVE_EXPORT_DIR: &str = "export";

/// Pack directory tree into zip archive.
///
/// Symbolic links are stored as links.
///
/// # Errors
///
/// - Return [`ArchiveError::Io`] if tree cannot be read, or archive cannot be
///   written.
/// - Return [`ArchiveError::Zip`] if archive cannot be encoded.
#[instrument(skip(root, output), level = "debug")]
pub fn pack(root: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
    let (root, output) = (root.as_ref(), output.as_ref());
    let file = File::create(output).map_err(|err| ArchiveError::io(err, output))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default();

    pack_dir(&mut writer, root, root, options)?;
    writer.finish()?;
    debug!("packed {:?} into {:?}", root.display(), output.display());

    Ok(())
}

fn pack_dir<W>(
    writer: &mut ZipWriter<W>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> Result<()>
where
    W: io::Write + io::Seek,
{
    let mut entries = fs::read_dir(dir)
        .map_err(|err| ArchiveError::io(err, dir))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| ArchiveError::io(err, dir))?;
    entries.sort();

    for path in entries {
        let name = archive_name(root, &path);
        let meta = fs::symlink_metadata(&path).map_err(|err| ArchiveError::io(err, &path))?;

        if meta.file_type().is_symlink() {
            let target = fs::read_link(&path).map_err(|err| ArchiveError::io(err, &path))?;
            writer.add_symlink(name, target.to_string_lossy(), options)?;
        } else if meta.is_dir() {
            writer.add_directory(name, options)?;
            pack_dir(writer, root, &path, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut reader = File::open(&path)
                .map(BufReader::new)
                .map_err(|err| ArchiveError::io(err, &path))?;
            io::copy(&mut reader, writer).map_err(|err| ArchiveError::io(err, &path))?;
        }
    }

    Ok(())
}

// INVARIANT: Archive names always use forward slashes.
fn archive_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Unpack zip archive into target directory.
///
/// # Errors
///
/// - Return [`ArchiveError::Invalid`] if file is not a zip archive, or lacks
///   the configuration file.
/// - Return [`ArchiveError::Io`] if archive cannot be read.
#[instrument(skip(archive, dest), level = "debug")]
pub fn unpack(archive: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let (archive, dest) = (archive.as_ref(), dest.as_ref());
    let file = File::open(archive).map_err(|err| ArchiveError::io(err, archive))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|err| ArchiveError::Invalid {
        path: archive.to_path_buf(),
        source: Some(err),
    })?;

    if zip.index_for_name(ARCHIVE_CONFIG).is_none() {
        return Err(ArchiveError::Invalid {
            path: archive.to_path_buf(),
            source: None,
        });
    }

    zip.extract(dest)?;
    debug!("unpacked {:?} into {:?}", archive.display(), dest.display());

    Ok(())
}

/// Archive error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// File is not a profile archive.
    #[error("{:?} is not a valid profile archive", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: Option<zip::result::ZipError>,
    },

    /// Archive cannot be encoded or decoded.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// Filesystem operation failed.
    #[error("failed to access {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

impl ArchiveError {
    fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pack_then_unpack_tree() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let root = work.path().join("root");
        fs::create_dir_all(root.join("save/configs/nested"))?;
        fs::write(root.join(ARCHIVE_CONFIG), "exclude = []\n")?;
        fs::write(root.join("save/configs/nested/a.txt"), "alpha")?;

        let output = work.path().join("laptop.dtsv");
        pack(&root, &output)?;

        let dest = work.path().join("dest");
        unpack(&output, &dest)?;
        assert_eq!(fs::read_to_string(dest.join(ARCHIVE_CONFIG))?, "exclude = []\n");
        assert_eq!(
            fs::read_to_string(dest.join("save/configs/nested/a.txt"))?,
            "alpha"
        );

        Ok(())
    }

    #[test]
    fn reject_archive_without_config() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let root = work.path().join("root");
        fs::create_dir_all(&root)?;
        fs::write(root.join("stray.txt"), "nope")?;

        let output = work.path().join("bad.dtsv");
        pack(&root, &output)?;

        let result = unpack(&output, work.path().join("dest"));
        assert!(matches!(result, Err(ArchiveError::Invalid { source: None, .. })));

        Ok(())
    }

    #[test]
    fn reject_non_zip_file() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let bogus = work.path().join("bogus.dtsv");
        fs::write(&bogus, "plain text")?;

        let result = unpack(&bogus, work.path().join("dest"));
        assert!(matches!(result, Err(ArchiveError::Invalid { source: Some(_), .. })));

        Ok(())
    }

    #[test]
    fn archive_name_uses_forward_slashes() {
        let root = Path::new("/tmp/root");
        let path = root.join("save").join("configs").join("a.txt");
        assert_eq!(archive_name(root, &path), "save/configs/a.txt");
    }
}
