//! Persistent device identifier
//!
//! Each installation carries a stable device id used to label sessions on
//! the backend. The id lives in a plain file under the caller's data
//! directory and is regenerated only when missing or unreadable.

use crate::error::Result;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

const DEVICE_ID_FILE: &str = "device_id";

/// Load the device id from `data_dir`, creating one if absent.
pub fn load_or_create(data_dir: &Path) -> Result<String> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(DEVICE_ID_FILE);

    if let Ok(contents) = std::fs::read_to_string(&path) {
        let trimmed = contents.trim();
        if Uuid::parse_str(trimmed).is_ok() {
            return Ok(trimmed.to_string());
        }
        info!("Device id file is corrupt, regenerating");
    }

    let id = Uuid::new_v4().to_string();
    std::fs::write(&path, &id)?;
    info!("Generated new device id");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create(dir.path()).unwrap();
        let second = load_or_create(dir.path()).unwrap();
        assert_eq!(first, second);
        Uuid::parse_str(&first).unwrap();
    }

    #[test]
    fn test_regenerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEVICE_ID_FILE), "garbage").unwrap();
        let id = load_or_create(dir.path()).unwrap();
        Uuid::parse_str(&id).unwrap();
    }
}
