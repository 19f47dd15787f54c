//! Persistent configuration: selected machine model, CPU variant,
//! video timing, and default cassette/disk paths.
//! Stored as JSON in `<config_dir>/dragoncore/config.json`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which real machine to emulate. Fixes the keyboard layout, the
/// default ROM list entry, and (for `Dragon64`) whether a second ROM
/// bank is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    Dragon32,
    Dragon64,
    Dragon200E,
    Coco1,
    Coco2,
}

impl Default for Model {
    fn default() -> Self {
        Model::Dragon64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuVariant {
    M6809,
    H6309,
}

impl Default for CpuVariant {
    fn default() -> Self {
        CpuVariant::M6809
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Machine model to emulate on next start.
    pub model: Model,
    /// CPU variant override (Dragon64 and CoCo2 can take either).
    pub cpu_variant: CpuVariant,
    /// PAL (50Hz) timing if true, NTSC (60Hz) if false.
    pub pal: bool,
    /// Path of the primary ROM image, if set explicitly rather than
    /// resolved through the ROM list.
    pub rom_path: Option<String>,
    /// Path of the alternate (Dragon64 64K-mode) ROM image.
    pub rom_alt_path: Option<String>,
    /// Last directory used when attaching a cassette (.cas/.wav) file.
    pub last_tape_dir: Option<String>,
    /// Last directory used when attaching a disk image.
    pub last_disk_dir: Option<String>,
    /// Disk images to auto-insert on startup, one per drive (0-3).
    pub default_disks: [Option<String>; 4],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: Model::default(),
            cpu_variant: CpuVariant::default(),
            pal: true,
            rom_path: None,
            rom_alt_path: None,
            last_tape_dir: None,
            last_disk_dir: None,
            default_disks: Default::default(),
        }
    }
}

impl Config {
    /// Path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.json"))
    }

    /// Load config from disk, falling back to defaults on any read or
    /// parse failure -- a corrupt or hand-edited config file should
    /// never stop the emulator from starting.
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!(target: "config", "cannot parse {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!(target: "config", "cannot read {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save config to disk.
    pub fn save(&self) {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return,
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!(target: "config", "cannot create {}: {e}", parent.display());
                return;
            }
        }

        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    log::warn!(target: "config", "cannot write {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!(target: "config", "cannot serialise config: {e}"),
        }
    }

    /// Remember a directory a tape file was loaded from.
    pub fn remember_tape_dir(&mut self, path: &std::path::Path) {
        if let Some(parent) = path.parent() {
            self.last_tape_dir = Some(parent.to_string_lossy().into_owned());
            self.save();
        }
    }

    /// Remember a directory a disk image was loaded from.
    pub fn remember_disk_dir(&mut self, path: &std::path::Path) {
        if let Some(parent) = path.parent() {
            self.last_disk_dir = Some(parent.to_string_lossy().into_owned());
            self.save();
        }
    }
}

/// Get the application config directory.
fn config_dir() -> Option<PathBuf> {
    // macOS:   ~/Library/Application Support/dragoncore/
    // Linux:   ~/.config/dragoncore/
    // Windows: %APPDATA%/dragoncore/

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").ok()?;
        Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("dragoncore"),
        )
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").ok()?;
        Some(PathBuf::from(appdata).join("dragoncore"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join(".config").join("dragoncore"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut config = Config::default();
        config.model = Model::Coco2;
        config.cpu_variant = CpuVariant::H6309;
        config.pal = false;
        config.default_disks[0] = Some("game.dsk".to_string());

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model, Model::Coco2);
        assert_eq!(back.cpu_variant, CpuVariant::H6309);
        assert!(!back.pal);
        assert_eq!(back.default_disks[0].as_deref(), Some("game.dsk"));
    }

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.model, Model::Dragon64);
        assert!(config.rom_path.is_none());
        assert!(config.default_disks.iter().all(Option::is_none));
    }
}
