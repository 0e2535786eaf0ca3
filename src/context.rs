//! `AppContext`: the startup-constructed value threaded through every
//! subsystem in place of process-wide statics (spec §9 "Global mutable
//! state").

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;

pub struct AppContext {
    pub app_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub html_convert_cmd: String,
    pub ext_viewer_cmd: String,
    pub online: bool,
}

impl AppContext {
    /// Creates the application directory tree (`cache/`, a freshly-reset
    /// `temp/`) and returns a context carrying the paths and the config
    /// values every subsystem needs. `temp/` is reset here (removed then
    /// recreated) so a crash-leftover from a previous run never leaks
    /// into a new session (spec §6).
    pub fn new(app_dir: PathBuf, config: &Config, online: bool) -> io::Result<Self> {
        let cache_dir = app_dir.join("cache");
        let temp_dir = app_dir.join("temp");

        fs::create_dir_all(&app_dir)?;
        fs::create_dir_all(&cache_dir)?;
        reset_dir(&temp_dir)?;

        Ok(Self {
            app_dir,
            cache_dir,
            temp_dir,
            html_convert_cmd: config.html_convert_cmd.clone(),
            ext_viewer_cmd: config.ext_viewer_cmd.clone(),
            online,
        })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.app_dir.join("lock")
    }

    pub fn main_conf_path(&self) -> PathBuf {
        self.app_dir.join("main.conf")
    }

    pub fn ui_conf_path(&self) -> PathBuf {
        self.app_dir.join("ui.conf")
    }

    pub fn log_path(&self) -> PathBuf {
        self.app_dir.join("log.txt")
    }

    /// Removes `temp/`'s contents. Called on clean shutdown in addition
    /// to the reset performed in [`AppContext::new`], so exit via any
    /// path leaves nothing behind (spec §5 "Scoped resources").
    pub fn cleanup_temp_dir(&self) -> io::Result<()> {
        if self.temp_dir.exists() {
            fs::remove_dir_all(&self.temp_dir)?;
        }
        Ok(())
    }
}

fn reset_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_cache_and_temp_dirs() {
        let root = tempfile::tempdir().unwrap();
        let app_dir = root.path().join("app");
        let ctx = AppContext::new(app_dir.clone(), &Config::default(), true).unwrap();

        assert!(ctx.cache_dir.is_dir());
        assert!(ctx.temp_dir.is_dir());
        assert_eq!(ctx.cache_dir, app_dir.join("cache"));
    }

    #[test]
    fn new_clears_stale_temp_contents() {
        let root = tempfile::tempdir().unwrap();
        let app_dir = root.path().join("app");
        fs::create_dir_all(app_dir.join("temp")).unwrap();
        fs::write(app_dir.join("temp").join("stale.txt"), b"leftover").unwrap();

        let ctx = AppContext::new(app_dir, &Config::default(), true).unwrap();
        assert!(!ctx.temp_dir.join("stale.txt").exists());
    }

    #[test]
    fn cleanup_removes_temp_dir() {
        let root = tempfile::tempdir().unwrap();
        let app_dir = root.path().join("app");
        let ctx = AppContext::new(app_dir, &Config::default(), true).unwrap();

        ctx.cleanup_temp_dir().unwrap();
        assert!(!ctx.temp_dir.exists());
    }

    #[test]
    fn carries_config_derived_fields() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.ext_viewer_cmd = "my-viewer".to_string();
        let ctx = AppContext::new(root.path().join("app"), &config, false).unwrap();

        assert_eq!(ctx.ext_viewer_cmd, "my-viewer");
        assert!(!ctx.online);
    }
}
