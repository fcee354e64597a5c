//! Run-scoped spill directory.
//!
//! Every sort run gets its own freshly created directory, so concurrent runs never share spill
//! file names. Files inside are named by a per-run sequence number. Dropping or closing the
//! directory removes everything still in it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use tempfile;

/// Spill directory name prefix.
const SPILL_DIR_PREFIX: &str = "record-sort-";

/// Directory holding the spill files of one sort run.
pub struct SpillDir {
    dir: tempfile::TempDir,
    next_seq: usize,
}

impl SpillDir {
    /// Creates a new run directory inside `tmp_path`, or inside the OS temporary directory if the
    /// path is [`None`].
    pub fn new(tmp_path: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPILL_DIR_PREFIX);

        let dir = match tmp_path {
            Some(tmp_path) => builder.tempdir_in(tmp_path),
            None => builder.tempdir(),
        }?;

        log::info!("using {} as a spill directory", dir.path().display());

        return Ok(SpillDir { dir, next_seq: 0 });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the run identifier, the unique part of the directory name.
    pub fn run_id(&self) -> &str {
        self.dir
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(SPILL_DIR_PREFIX))
            .unwrap_or_default()
    }

    /// Creates a new, empty spill file.
    pub fn create(&mut self) -> io::Result<(PathBuf, fs::File)> {
        let path = self.dir.path().join(format!("spill-{:06}.run", self.next_seq));
        self.next_seq += 1;

        let file = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
        log::trace!("created spill file {}", path.display());

        return Ok((path, file));
    }

    /// Returns number of spill files created so far.
    pub fn created(&self) -> usize {
        self.next_seq
    }

    /// Removes the directory with all remaining spill files.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_owned();
        let result = self.dir.close();
        match &result {
            Ok(()) => log::debug!("spill directory {} removed", path.display()),
            Err(err) => log::warn!("spill directory {} not removed: {}", path.display(), err),
        }
        return result;
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::SpillDir;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_spill_dir_lifecycle(tmp_dir: tempfile::TempDir) {
        let mut dir = SpillDir::new(Some(tmp_dir.path())).unwrap();
        assert!(dir.path().starts_with(tmp_dir.path()));
        assert!(!dir.run_id().is_empty());

        let (first, _) = dir.create().unwrap();
        let (second, _) = dir.create().unwrap();
        assert_ne!(first, second);
        assert_eq!(dir.created(), 2);

        let path = dir.path().to_owned();
        dir.close().unwrap();
        assert!(!path.exists());
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_concurrent_runs_do_not_collide(tmp_dir: tempfile::TempDir) {
        let mut a = SpillDir::new(Some(tmp_dir.path())).unwrap();
        let mut b = SpillDir::new(Some(tmp_dir.path())).unwrap();
        assert_ne!(a.run_id(), b.run_id());

        let (path_a, _) = a.create().unwrap();
        let (path_b, _) = b.create().unwrap();
        assert_ne!(path_a, path_b);
        assert_eq!(path_a.file_name(), path_b.file_name());
    }

    #[rstest]
    fn test_drop_removes_files(tmp_dir: tempfile::TempDir) {
        {
            let mut dir = SpillDir::new(Some(tmp_dir.path())).unwrap();
            dir.create().unwrap();
        }
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }
}
