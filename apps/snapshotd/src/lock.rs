use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use snapshot_core::DestinationSlot;

/// Exclusive claim on one destination slot, held for the daemon's lifetime.
/// While held, the lock file names the owning pid and the guarded snapshot.
pub struct SlotLock {
    path: PathBuf,
    _file: File,
}

impl SlotLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn acquire_slot_lock(slot: &DestinationSlot) -> io::Result<SlotLock> {
    let path = slot.lock_path();
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)?;

    file.try_lock_exclusive()?;

    // Only the holder rewrites the contents.
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    writeln!(file, "{}", slot.current().display())?;
    file.flush()?;
    Ok(SlotLock { path, _file: file })
}

/// Pid recorded by whoever holds (or last held) the slot's lock.
pub fn lock_holder(slot: &DestinationSlot) -> Option<u32> {
    let text = fs::read_to_string(slot.lock_path()).ok()?;
    text.lines().next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{acquire_slot_lock, lock_holder};
    use snapshot_core::DestinationSlot;
    use std::io::ErrorKind;

    #[test]
    fn second_holder_is_turned_away_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slot = DestinationSlot::new(dir.path().join("db_save.json"));

        let first = acquire_slot_lock(&slot).expect("first lock");
        assert_eq!(first.path(), dir.path().join("db_save.json.lock"));
        let err = acquire_slot_lock(&slot)
            .err()
            .expect("slot is already locked");
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        drop(first);
        acquire_slot_lock(&slot).expect("lock after release");
    }

    #[test]
    fn lock_file_names_the_holder_and_its_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slot = DestinationSlot::new(dir.path().join("db_save.json"));
        assert_eq!(lock_holder(&slot), None);

        let lock = acquire_slot_lock(&slot).expect("lock");

        assert_eq!(lock_holder(&slot), Some(std::process::id()));
        let contents = std::fs::read_to_string(lock.path()).expect("read lock file");
        assert!(contents.contains("db_save.json"), "{contents}");
    }
}
