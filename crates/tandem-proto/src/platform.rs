use std::path::PathBuf;

/// Port the remote playback service listens on for the push link by default.
pub const REMOTE_PUSH_PORT: u16 = 8765;

const REMOTE_HOST: &str = "127.0.0.1";

pub fn remote_address() -> String {
    format!("{}:{}", REMOTE_HOST, REMOTE_PUSH_PORT)
}

pub fn remote_api_base_url() -> String {
    format!("http://{}:{}", REMOTE_HOST, REMOTE_PUSH_PORT)
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/tandem on macOS too, for consistency with Linux
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("tandem")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("tandem")
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
    }
}
