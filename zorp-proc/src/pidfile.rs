//! A single ASCII decimal PID, newline-terminated. `<pidfile_dir>/<name>.pid`
//! unless `--pidfile` overrides the whole path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use zorp_errors::{ZorpError, ZorpResult};

/// Resolves the effective pidfile path: the explicit override if given,
/// else `<dir>/<name>.pid`.
pub fn resolve_path(override_path: Option<&Path>, dir: &Path, name: &str) -> PathBuf {
    match override_path {
        Some(p) => p.to_path_buf(),
        None => dir.join(format!("{name}.pid")),
    }
}

pub fn write(path: &Path, pid: u32) -> ZorpResult<()> {
    let mut file = fs::File::create(path).map_err(ZorpError::Io)?;
    write!(file, "{pid}\n").map_err(ZorpError::Io)?;
    Ok(())
}

pub fn read(path: &Path) -> ZorpResult<u32> {
    let contents = fs::read_to_string(path).map_err(ZorpError::Io)?;
    contents
        .trim()
        .parse()
        .map_err(|_| ZorpError::config(format!("pidfile {} does not contain a PID", path.display())))
}

pub fn remove(path: &Path) -> ZorpResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ZorpError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_path(None, dir.path(), "zorpd");
        write(&path, 1234).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1234\n");
        assert_eq!(read(&path).unwrap(), 1234);
    }

    #[test]
    fn explicit_override_wins_over_dir_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom.pid");
        let path = resolve_path(Some(&explicit), dir.path(), "zorpd");
        assert_eq!(path, explicit);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zorpd.pid");
        remove(&path).unwrap();
        write(&path, 1).unwrap();
        remove(&path).unwrap();
        remove(&path).unwrap();
        assert!(!path.exists());
    }
}
