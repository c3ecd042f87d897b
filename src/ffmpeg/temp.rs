use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const WORK_DIR_PREFIX: &str = "crop-mov-";

/// Short suffix for unique directory names. Not cryptographically secure.
fn random_alphanumeric_suffix(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    static STATE: AtomicU64 = AtomicU64::new(0);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mut s = String::with_capacity(len);
    for _ in 0..len {
        let n = STATE.fetch_add(1, Ordering::Relaxed).wrapping_add(seed);
        s.push(CHARS[(n % CHARS.len() as u64) as usize] as char);
    }
    s
}

/// Scratch directory the engine stages input and output files in. Removed on drop.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn create_in(root: &Path) -> io::Result<Self> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let path = root.join(format!(
            "{}{}-{}",
            WORK_DIR_PREFIX,
            millis,
            random_alphanumeric_suffix(9)
        ));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a staged file. Only plain file names are accepted so staged
    /// names cannot escape the directory.
    pub fn file(&self, name: &str) -> io::Result<PathBuf> {
        let candidate = Path::new(name);
        let is_plain = candidate.file_name().is_some_and(|f| f == candidate.as_os_str());
        if !is_plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid staged file name: {}", name),
            ));
        }
        Ok(self.path.join(name))
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Removes work directories older than `max_age` left behind by crashed runs.
pub fn cleanup_old_work_dirs(root: &Path, max_age: Duration) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(WORK_DIR_PREFIX) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| now.duration_since(modified).unwrap_or_default() > max_age)
            .unwrap_or(false);
        if stale {
            log::debug!(
                target: "crop_mov::ffmpeg::temp",
                "Removing stale work dir: {}",
                entry.path().display()
            );
            let _ = fs::remove_dir_all(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_is_removed_on_drop() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = {
            let dir = WorkDir::create_in(root.path()).expect("create work dir");
            fs::write(dir.file("input").unwrap(), b"x").unwrap();
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn work_dirs_are_unique() {
        let root = tempfile::tempdir().expect("tempdir");
        let a = WorkDir::create_in(root.path()).unwrap();
        let b = WorkDir::create_in(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn staged_names_cannot_escape() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = WorkDir::create_in(root.path()).unwrap();
        assert!(dir.file("../evil").is_err());
        assert!(dir.file("a/b").is_err());
        assert!(dir.file("").is_err());
        assert!(dir.file("output.webp").is_ok());
    }

    #[test]
    fn cleanup_keeps_fresh_dirs_and_foreign_entries() {
        let root = tempfile::tempdir().expect("tempdir");
        let fresh = root.path().join(format!("{}fresh", WORK_DIR_PREFIX));
        let foreign = root.path().join("not-ours");
        fs::create_dir_all(&fresh).unwrap();
        fs::create_dir_all(&foreign).unwrap();

        cleanup_old_work_dirs(root.path(), Duration::from_secs(3600));
        assert!(fresh.exists());
        assert!(foreign.exists());

        std::thread::sleep(Duration::from_millis(20));
        cleanup_old_work_dirs(root.path(), Duration::from_millis(1));
        assert!(!fresh.exists());
        assert!(foreign.exists());
    }
}
