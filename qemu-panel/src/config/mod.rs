use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod catalog;

pub use catalog::{IsoSource, default_catalog};

/// Settings file looked up in the working directory.
pub const SETTINGS_FILE: &str = ".qemu-panel.toml";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Profile collection, relative to the working directory unless absolute
    pub profiles_file: PathBuf,
    /// Where downloaded ISOs are saved by default
    pub download_dir: PathBuf,
    /// Raw stdout/stderr of started VMs
    pub instance_log_dir: PathBuf,
    pub iso_catalog: Vec<IsoSource>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profiles_file: PathBuf::from("qemu-profiles.json"),
            download_dir: PathBuf::from("."),
            instance_log_dir: PathBuf::from("target/qemu-panel/logs"),
            iso_catalog: default_catalog(),
        }
    }
}

impl Settings {
    /// Reads the settings file, writing the defaults there first if it does
    /// not exist yet.
    pub fn load_or_init(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("can not open config file: {}", path.display()))?;
            let settings: Settings = toml::from_str(&content)
                .with_context(|| format!("invalid config file: {}", path.display()))?;
            return Ok(settings);
        }

        let settings = Settings::default();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(&settings)?)
            .with_context(|| format!("can not write config file: {}", path.display()))?;
        info!("wrote default settings to {}", path.display());
        Ok(settings)
    }

    pub fn profiles_path(&self, workdir: &Path) -> PathBuf {
        resolve(workdir, &self.profiles_file)
    }

    pub fn download_dir(&self, workdir: &Path) -> PathBuf {
        resolve(workdir, &self.download_dir)
    }

    pub fn instance_log_dir(&self, workdir: &Path) -> PathBuf {
        resolve(workdir, &self.instance_log_dir)
    }

    pub fn find_iso(&self, name: &str) -> Option<&IsoSource> {
        self.iso_catalog
            .iter()
            .find(|s| s.name == name || s.filename == name)
    }
}

fn resolve(workdir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}
