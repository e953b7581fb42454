//! Storage layout configuration

use std::path::{Path, PathBuf};

use crate::errors::ClawError;
use crate::filesys::file::File;

/// Where clawctl keeps its settings, records and logs
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Deployment store file; relative paths resolve against the base directory
    pub fn store_file(&self, path: Option<&Path>) -> File {
        match path {
            Some(p) if p.is_absolute() => File::new(p),
            Some(p) => File::new(self.base_dir.join(p)),
            None => File::new(self.base_dir.join("deployments.json")),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Create the directories clawctl writes to
    pub async fn setup(&self) -> Result<(), ClawError> {
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("CLAWCTL_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".clawctl"))
            })
            .unwrap_or_else(|| PathBuf::from(".clawctl"));
        Self::new(base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_file_resolution() {
        let layout = StorageLayout::new("/var/lib/clawctl");
        assert_eq!(
            layout.store_file(None).path(),
            Path::new("/var/lib/clawctl/deployments.json")
        );
        assert_eq!(
            layout.store_file(Some(Path::new("db/records.json"))).path(),
            Path::new("/var/lib/clawctl/db/records.json")
        );
        assert_eq!(
            layout.store_file(Some(Path::new("/tmp/records.json"))).path(),
            Path::new("/tmp/records.json")
        );
    }
}
