// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations of files geotagger reads and writes on
//! behalf of the user.

use std::path::PathBuf;

/// Determine default absolute path to configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/geotagger/config.toml`.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("geotagger").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to Strava track cache.
///
/// Uses XDG Base Directory path `$XDG_CACHE_HOME/geotagger/strava`. Does not
/// check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_strava_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|path| path.join("geotagger").join("strava"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("XDG_CONFIG_HOME", "/home/blah/.config"), ("XDG_CACHE_HOME", "/home/blah/.cache")])]
    fn xdg_locations() -> anyhow::Result<()> {
        if cfg!(target_os = "linux") {
            assert_eq!(
                default_config_file()?,
                PathBuf::from("/home/blah/.config/geotagger/config.toml")
            );
            assert_eq!(
                default_strava_cache_dir()?,
                PathBuf::from("/home/blah/.cache/geotagger/strava")
            );
        }

        Ok(())
    }
}
