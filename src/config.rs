//! Configuration management for stamplog

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV_VAR: &str = "STAMPLOG_CONFIG";

/// Time zone used when formatting log file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timezone {
    /// Coordinated Universal Time (matches the record timestamps)
    #[default]
    Utc,
    /// The host's local time zone
    Local,
}

/// Categories of disk errors for user-friendly messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Get a user-friendly message for this error kind
    pub fn user_message(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "disk full, log records are being lost",
            DiskErrorKind::PermissionDenied => "permission denied writing log file",
            DiskErrorKind::NotFound => "log folder does not exist",
            DiskErrorKind::Other => "failed to write log file",
        }
    }
}

/// Categorize an IO error into a user-friendly category
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,

        // Check raw OS error for disk full on Unix
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    if os_error == libc::ENOSPC || os_error == libc::EDQUOT {
                        return DiskErrorKind::DiskFull;
                    }
                    if os_error == libc::EACCES {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

/// Create a user-friendly error message from an IO error
pub fn friendly_io_error_message(e: &std::io::Error, path: &Path) -> String {
    let kind = categorize_io_error(e);
    match kind {
        DiskErrorKind::Other => format!("{}: {}", path.display(), e),
        _ => format!("{}: {}", path.display(), kind.user_message()),
    }
}

/// Fully resolved logger configuration
///
/// Built once from [`LoggerOptions`] merged over the defaults and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Directory containing the log files
    #[serde(default = "default_folder")]
    pub folder: PathBuf,

    /// Date mask used to derive each file's base name (e.g. "yyyy-mm-dd")
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Mirror everything written to stdout/stderr into the log
    #[serde(default = "default_log_all_std_output")]
    pub log_all_std_output: bool,

    /// Time zone used to format file names
    #[serde(default)]
    pub timezone: Timezone,

    /// Number of records that may wait for the writer before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Create the folder (and parents) before opening a log file
    #[serde(default = "default_create_folder")]
    pub create_folder: bool,
}

fn default_folder() -> PathBuf {
    // Sibling "tmp" directory of the one holding the executable
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
        .map(|base| base.join("tmp"))
        .unwrap_or_else(|| PathBuf::from("tmp"))
}

fn default_filename() -> String {
    "yyyy-mm-dd".to_string()
}

fn default_log_all_std_output() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_create_folder() -> bool {
    true
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            filename: default_filename(),
            log_all_std_output: default_log_all_std_output(),
            timezone: Timezone::default(),
            queue_capacity: default_queue_capacity(),
            create_folder: default_create_folder(),
        }
    }
}

/// Partial configuration; any field left as `None` keeps its default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerOptions {
    pub folder: Option<PathBuf>,
    pub filename: Option<String>,
    pub log_all_std_output: Option<bool>,
    pub timezone: Option<Timezone>,
    pub queue_capacity: Option<usize>,
    pub create_folder: Option<bool>,
}

impl LoggerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn filename(mut self, pattern: impl Into<String>) -> Self {
        self.filename = Some(pattern.into());
        self
    }

    pub fn log_all_std_output(mut self, enabled: bool) -> Self {
        self.log_all_std_output = Some(enabled);
        self
    }

    pub fn timezone(mut self, timezone: Timezone) -> Self {
        self.timezone = Some(timezone);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn create_folder(mut self, create: bool) -> Self {
        self.create_folder = Some(create);
        self
    }
}

impl LoggerConfig {
    /// Apply the defaults, then every option that is set
    pub fn merged(options: LoggerOptions) -> Self {
        let defaults = Self::default();
        Self {
            folder: options
                .folder
                .map(|f| expand_folder(&f))
                .unwrap_or(defaults.folder),
            filename: options.filename.unwrap_or(defaults.filename),
            log_all_std_output: options
                .log_all_std_output
                .unwrap_or(defaults.log_all_std_output),
            timezone: options.timezone.unwrap_or(defaults.timezone),
            // A zero-capacity queue would reject every record
            queue_capacity: options
                .queue_capacity
                .unwrap_or(defaults.queue_capacity)
                .max(1),
            create_folder: options.create_folder.unwrap_or(defaults.create_folder),
        }
    }

    /// Load options from a TOML file and merge them over the defaults
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let options: LoggerOptions = toml::from_str(&content)?;
        Ok(Self::merged(options))
    }

    /// Load from the default config file location
    pub fn load_default() -> Result<Self> {
        Self::load(&config_file_path())
    }
}

/// Expand a leading `~` in a configured folder
fn expand_folder(folder: &Path) -> PathBuf {
    match folder.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => folder.to_path_buf(),
    }
}

/// Get the base configuration directory (~/.stamplog)
/// Falls back to ./.stamplog if home directory cannot be determined
pub fn config_dir() -> PathBuf {
    try_config_dir().unwrap_or_else(|| {
        tracing::warn!("Could not determine home directory, using current directory for config");
        PathBuf::from(".stamplog")
    })
}

/// Try to get the base configuration directory, returning None if home dir is unavailable
pub fn try_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".stamplog"))
}

/// Get the path to the config file, honoring `STAMPLOG_CONFIG`
pub fn config_file_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("config.toml"))
}
