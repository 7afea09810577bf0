use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};

use crate::auto_window::AutoWindowMode;
use crate::windowing::preset_index;

pub const LOAD_WORKERS_ENV: &str = "TAGSCOPE_LOAD_WORKERS";
const MAX_LOAD_WORKERS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    MedicalBlue,
    #[default]
    ForestGreen,
    PurpleHaze,
    OceanBreeze,
}

/// RGB triples for the viewer chrome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub primary: [u8; 3],
    pub accent: [u8; 3],
    pub warning: [u8; 3],
    pub error: [u8; 3],
    pub success: [u8; 3],
    pub surface: [u8; 3],
    pub panel: [u8; 3],
}

impl Theme {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "medical_blue" => Some(Self::MedicalBlue),
            "forest_green" => Some(Self::ForestGreen),
            "purple_haze" => Some(Self::PurpleHaze),
            "ocean_breeze" => Some(Self::OceanBreeze),
            _ => None,
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            Self::MedicalBlue => Palette {
                primary: [0x2E, 0x86, 0xAB],
                accent: [0xF1, 0x8F, 0x01],
                warning: [0xC7, 0x3E, 0x1D],
                error: [0xC7, 0x3E, 0x1D],
                success: [0x6B, 0xCF, 0x7F],
                surface: [0x1A, 0x1D, 0x29],
                panel: [0x25, 0x2A, 0x3A],
            },
            Self::ForestGreen => Palette {
                primary: [0x2D, 0x50, 0x16],
                accent: [0x68, 0xB6, 0x84],
                warning: [0xE6, 0x7E, 0x22],
                error: [0xE7, 0x4C, 0x3C],
                success: [0x68, 0xB6, 0x84],
                surface: [0x1C, 0x1C, 0x1C],
                panel: [0x2C, 0x2C, 0x2C],
            },
            Self::PurpleHaze => Palette {
                primary: [0x6A, 0x4C, 0x93],
                accent: [0xFF, 0x6B, 0x6B],
                warning: [0xF3, 0x9C, 0x12],
                error: [0xE7, 0x4C, 0x3C],
                success: [0x2E, 0xCC, 0x71],
                surface: [0x2C, 0x18, 0x10],
                panel: [0x3D, 0x28, 0x17],
            },
            Self::OceanBreeze => Palette {
                primary: [0x00, 0x4E, 0x89],
                accent: [0xFF, 0xB7, 0x00],
                warning: [0xFF, 0x6B, 0x35],
                error: [0xD6, 0x28, 0x28],
                success: [0x00, 0xA8, 0x96],
                surface: [0x00, 0x12, 0x19],
                panel: [0x0A, 0x1A, 0x24],
            },
        }
    }
}

/// Startup settings. Built once and handed to the viewer by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub theme: Theme,
    pub default_preset: usize,
    pub auto_window: AutoWindowMode,
    pub load_workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            default_preset: 0,
            auto_window: AutoWindowMode::default(),
            load_workers: default_load_workers(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Self {
        let settings = settings_file_path().and_then(|path| match read_settings(&path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("Ignoring settings: {err:#}");
                None
            }
        });
        let env_workers = env::var(LOAD_WORKERS_ENV).ok();
        Self::from_sources(settings.as_deref(), env_workers.as_deref())
    }

    pub fn from_sources(settings: Option<&str>, env_workers: Option<&str>) -> Self {
        let mut config = Self::default();

        for (key, value) in settings.map(parse_settings).unwrap_or_default() {
            match key.as_str() {
                "theme" => match Theme::from_name(&value) {
                    Some(theme) => config.theme = theme,
                    None => log::warn!("Unknown theme {value:?}, keeping default"),
                },
                "default_preset" => match preset_index(&value) {
                    Some(index) => config.default_preset = index,
                    None => log::warn!("Unknown window preset {value:?}, keeping Auto"),
                },
                "auto_window" => match AutoWindowMode::from_name(&value) {
                    Some(mode) => config.auto_window = mode,
                    None => log::warn!("Unknown auto_window mode {value:?}, keeping minmax"),
                },
                "load_workers" => {
                    if let Some(workers) = parse_workers(&value) {
                        config.load_workers = workers;
                    }
                }
                _ => {}
            }
        }

        if let Some(workers) = env_workers.and_then(parse_workers) {
            config.load_workers = workers;
        }
        config
    }
}

fn default_load_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(1, 4)
}

fn parse_workers(raw: &str) -> Option<usize> {
    let value = raw.trim().parse::<usize>().ok()?;
    if value == 0 {
        return None;
    }
    Some(value.min(MAX_LOAD_WORKERS))
}

pub fn settings_file_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join("tagscope").join("settings.toml"));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join("tagscope")
                .join("settings.toml")
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join("tagscope").join("settings.toml"));
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join("tagscope").join("settings.toml"))
    }
}

fn read_settings(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))
        .map(Some)
}

/// Top-level `key = value` pairs. Tables, arrays and comments are skipped.
fn parse_settings(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut in_table = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_table = true;
            continue;
        }
        if in_table {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if let Some(value) = parse_scalar(value.trim()) {
            pairs.push((key.trim().to_string(), value));
        }
    }
    pairs
}

fn parse_scalar(raw: &str) -> Option<String> {
    if let Some(rest) = raw.strip_prefix('"') {
        let mut output = String::with_capacity(rest.len());
        let mut chars = rest.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '"' => return Some(output),
                '\\' => match chars.next()? {
                    'n' => output.push('\n'),
                    't' => output.push('\t'),
                    other => output.push(other),
                },
                other => output.push(other),
            }
        }
        return None;
    }

    let bare = raw.split('#').next().unwrap_or_default().trim();
    (!bare.is_empty()).then(|| bare.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_forest_green_and_auto() {
        let config = AppConfig::from_sources(None, None);
        assert_eq!(config.theme, Theme::ForestGreen);
        assert_eq!(config.default_preset, 0);
        assert_eq!(config.auto_window, AutoWindowMode::MinMax);
        assert!((1..=4).contains(&config.load_workers));
    }

    #[test]
    fn settings_file_values_are_applied() {
        let text = r#"
# viewer settings
theme = "ocean_breeze"
default_preset = "Bone"
auto_window = "percentile"   # trailing comment
load_workers = 3
"#;
        let config = AppConfig::from_sources(Some(text), None);
        assert_eq!(config.theme, Theme::OceanBreeze);
        assert_eq!(config.default_preset, 3);
        assert_eq!(config.auto_window, AutoWindowMode::Percentile);
        assert_eq!(config.load_workers, 3);
    }

    #[test]
    fn environment_overrides_worker_count() {
        let config = AppConfig::from_sources(Some("load_workers = 3"), Some("7"));
        assert_eq!(config.load_workers, 7);

        let config = AppConfig::from_sources(Some("load_workers = 3"), Some("0"));
        assert_eq!(config.load_workers, 3);

        let config = AppConfig::from_sources(None, Some("500"));
        assert_eq!(config.load_workers, MAX_LOAD_WORKERS);
    }

    #[test]
    fn unknown_keys_values_and_tables_are_ignored() {
        let text = "theme = \"neon\"\ncolour = \"red\"\n[extra]\ntheme = \"purple_haze\"\n";
        let config = AppConfig::from_sources(Some(text), None);
        assert_eq!(config.theme, Theme::ForestGreen);
    }

    #[test]
    fn settings_are_read_from_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        assert_eq!(read_settings(&path).expect("missing file is fine"), None);

        fs::write(&path, "theme = \"medical_blue\"\n").expect("write");
        let text = read_settings(&path).expect("reads");
        let config = AppConfig::from_sources(text.as_deref(), None);
        assert_eq!(config.theme, Theme::MedicalBlue);
    }
}
