//! On-disk layout: `~/.switchboard/{config.toml,logs/switchboard.log}`

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const DIR_NAME: &str = ".switchboard";

static ROOT: OnceLock<DataDir> = OnceLock::new();

/// A data directory and the files switchboard keeps inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.switchboard`, or `./.switchboard` when there is no home directory
    pub fn home() -> Self {
        let root = match dirs::home_dir() {
            Some(home) => home.join(DIR_NAME),
            None => PathBuf::from(DIR_NAME),
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs().join("switchboard.log")
    }
}

/// Pin the data directory for the rest of the process. Only the first call
/// counts; later ones are logged and ignored.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let wanted = custom_path.map(DataDir::new).unwrap_or_else(DataDir::home);
    let current = ROOT.get_or_init(|| wanted.clone());
    if *current != wanted {
        tracing::debug!(
            requested = %wanted.root().display(),
            current = %current.root().display(),
            "Data directory already fixed"
        );
    }
}

fn current() -> DataDir {
    ROOT.get().cloned().unwrap_or_else(DataDir::home)
}

pub fn data_dir() -> PathBuf {
    current().root
}

pub fn logs_dir() -> PathBuf {
    current().logs()
}

pub fn log_file_path() -> PathBuf {
    current().log_file()
}

pub fn config_path() -> PathBuf {
    current().config_file()
}
