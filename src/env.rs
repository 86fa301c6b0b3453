//! Environment constants and path utilities for the task orchestrator.
//!
//! This module centralizes the file names, directory names and defaults used
//! by the engine, the report writer and configuration discovery.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".orchestrator";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name at a project root
pub const LOCAL_CONFIG_FILE_NAME: &str = "orchestrator.toml";

/// Run report file name, written into the project's output directory
pub const REPORT_FILE_NAME: &str = "execution_report.json";

/// Default root for per-project work directories
pub const DEFAULT_WORK_DIR: &str = "./workspace";

/// Default root for per-project output directories
pub const DEFAULT_OUTPUT_DIR: &str = "./output";

/// Default concurrency cap for the parallel optimizer
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 5;

/// Default log level for the binary
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Directory name used for a project under the work and output roots.
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; every other run of characters
/// becomes a single `-`. An empty result falls back to `project`.
pub fn project_dir_name(project_name: &str) -> String {
    let mut name = String::with_capacity(project_name.len());
    for c in project_name.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }

    let name = name.trim_matches(|c| c == '-' || c == '.');
    if name.is_empty() {
        "project".to_string()
    } else {
        name.to_string()
    }
}

/// Build the project work directory path
pub fn project_work_dir(work_root: &Path, project_name: &str) -> PathBuf {
    work_root.join(project_dir_name(project_name))
}

/// Build the project output directory path
pub fn project_output_dir(output_root: &Path, project_name: &str) -> PathBuf {
    output_root.join(project_dir_name(project_name))
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(APP_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build the project-root config file path
pub fn project_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME)
}
