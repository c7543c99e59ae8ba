//! Environment constants and path utilities for the transcode queue.
//!
//! This module centralizes the hardcoded names and directories used throughout
//! the service, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git, .vscode)
pub const TQ_DIR_NAME: &str = ".tq";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name when placed directly in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "tq.toml";

/// Encoder-related names
pub mod encoder {
    /// Bare name of the encoder binary, resolved through `PATH`
    pub const BINARY_NAME: &str = "ffmpeg";

    /// Location where macOS users are allowed to install binaries
    pub const MACOS_SYSTEM_PATH: &str = "/usr/local/bin/ffmpeg";
}

/// Cache directory names under the system temp directory
pub mod cache {
    /// Uploaded chunks of remote inputs land here
    pub const UPLOAD_DIR_NAME: &str = "FFBoxUploadCache";

    /// Outputs of remote tasks are written here for download
    pub const DOWNLOAD_DIR_NAME: &str = "FFBoxDownloadCache";
}

/// Default upload cache directory
pub fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join(cache::UPLOAD_DIR_NAME)
}

/// Default download cache directory
pub fn default_download_dir() -> PathBuf {
    std::env::temp_dir().join(cache::DOWNLOAD_DIR_NAME)
}

/// Build the main .tq directory path from a base directory
pub fn tq_dir_path(base: &Path) -> PathBuf {
    base.join(TQ_DIR_NAME)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    tq_dir_path(home_dir)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    tq_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    tq_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the path an uploaded chunk is stored at
pub fn upload_chunk_path(upload_dir: &Path, hash: &str) -> PathBuf {
    upload_dir.join(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.tq/config.toml")
        );

        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.tq/config.toml")
        );
    }

    #[test]
    fn test_cache_paths() {
        assert!(default_upload_dir().ends_with("FFBoxUploadCache"));
        assert!(default_download_dir().ends_with("FFBoxDownloadCache"));
        assert_eq!(
            upload_chunk_path(Path::new("/tmp/up"), "abc123"),
            Path::new("/tmp/up/abc123")
        );
    }
}
