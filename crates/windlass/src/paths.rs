use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct WindlassPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl WindlassPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("WINDLASS_DATA_DIR"),
            std::env::var("WINDLASS_CONFIG_DIR"),
        ) {
            let data_dir = PathBuf::from(data_dir);
            let config_dir = PathBuf::from(config_dir);
            let log_file = data_dir.join("windlass.log.jsonl");
            return Ok(Self {
                config_dir,
                data_dir,
                log_file,
            });
        }

        // Default locations:
        // macOS: ~/Library/Application Support/windlass
        // Linux: ~/.config/windlass
        // Windows: %APPDATA%\\windlass
        let proj =
            ProjectDirs::from("", "", "windlass").context("failed to resolve project dirs")?;
        let config_dir = proj.config_dir().to_path_buf();
        let data_dir = proj.data_dir().to_path_buf();

        let log_file = data_dir.join("windlass.log.jsonl");

        Ok(Self {
            config_dir,
            data_dir,
            log_file,
        })
    }

    /// Durable slot for the user-pinned position id list.
    pub fn tracked_ids_path(&self) -> PathBuf {
        self.data_dir.join("tracked_ids.json")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
