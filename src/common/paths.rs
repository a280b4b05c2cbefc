use std::path::PathBuf;

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/faceunlock")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/faceunlock/faceunlock.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/opt/faceunlock/models")
}

pub fn system_socket_path() -> PathBuf {
    PathBuf::from("/run/faceunlock/faceunlock.sock")
}

pub fn dev_socket_path() -> PathBuf {
    PathBuf::from("/tmp/faceunlock-dev.sock")
}

pub enum RunMode {
    Development(PathBuf),  // Base directory for dev mode
    System,
}

/// Resolves where config, signatures and the socket live for a run mode.
pub struct Paths {
    mode: RunMode,
}

impl Paths {
    pub fn new(dev: bool) -> Self {
        let mode = if dev {
            RunMode::Development(PathBuf::from("./dev_data"))
        } else {
            RunMode::System
        };
        Self { mode }
    }

    pub fn config_file(&self) -> PathBuf {
        match &self.mode {
            RunMode::Development(_) => PathBuf::from("configs/faceunlock.toml"),
            RunMode::System => {
                // Try user config first, then system config
                if let Some(home) = dirs::home_dir() {
                    let user_config = home.join(".config/faceunlock/faceunlock.toml");
                    if user_config.exists() {
                        return user_config;
                    }
                }
                system_config_file()
            }
        }
    }

    /// Dev mode overrides the storage directory; system mode keeps the config value.
    pub fn data_dir_override(&self) -> Option<PathBuf> {
        match &self.mode {
            RunMode::Development(base) => Some(base.join("signatures")),
            RunMode::System => None,
        }
    }

    pub fn socket_path_override(&self) -> Option<PathBuf> {
        match &self.mode {
            RunMode::Development(_) => Some(dev_socket_path()),
            RunMode::System => None,
        }
    }

    pub fn captures_dir(&self) -> PathBuf {
        match &self.mode {
            RunMode::Development(base) => base.join("captures"),
            RunMode::System => std::env::temp_dir(),
        }
    }

    pub fn capture_path(&self, prefix: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.captures_dir().join(format!("{}_{}.png", prefix, timestamp))
    }

    pub fn is_development(&self) -> bool {
        matches!(self.mode, RunMode::Development(_))
    }
}
