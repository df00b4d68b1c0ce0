use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::{MigrateError, Result};

/// Take the run lock next to a destination store. Held until the handle drops.
pub fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    file.try_lock_exclusive()
        .map_err(|_| MigrateError::Locked(path.display().to_string()))?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_migration_cannot_take_the_lock() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("gitlab.lock");

        let file = acquire_lock(&lock_path).unwrap();
        let err = acquire_lock(&lock_path).unwrap_err();
        assert_eq!(err.code(), "locked");

        drop(file);
        let _file = acquire_lock(&lock_path).unwrap();
    }
}
