use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::PlayerError;

/// A flat directory of saved `.mid` files.
pub struct Library {
    dir: PathBuf,
}

impl Library {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The player's default library next to the working directory.
    pub fn default_dir() -> Self {
        Self::new("./midi")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy a source file into the library under `title`. Creates the
    /// library directory on first use.
    pub fn import(&self, source: &Path, title: &str) -> Result<PathBuf, PlayerError> {
        fs::create_dir_all(&self.dir)?;
        let dest = self.dir.join(format!("{title}.mid"));
        fs::copy(source, &dest)?;
        info!(source = %source.display(), dest = %dest.display(), "imported into library");
        Ok(dest)
    }

    /// The library's `.mid` files, sorted by name. An absent directory is
    /// just an empty library.
    pub fn entries(&self) -> Vec<PathBuf> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut entries: Vec<PathBuf> = read_dir
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mid"))
            })
            .collect();
        entries.sort();
        entries
    }
}
