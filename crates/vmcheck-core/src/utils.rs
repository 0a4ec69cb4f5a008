//! Shared utility functions for vmcheck crates

use camino::Utf8PathBuf;

use crate::error::{Error, Result};

/// Get the user's home directory
///
/// `HOME` wins over `dirs::home_dir()` so that an overridden environment is
/// honored the same way shell scripts honor it.
pub fn get_home_dir() -> Result<Utf8PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Ok(Utf8PathBuf::from(home));
        }
    }

    let home = dirs::home_dir()
        .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;
    Utf8PathBuf::from_path_buf(home)
        .map_err(|p| Error::invalid_config(format!("Home directory is not UTF-8: {}", p.display())))
}
