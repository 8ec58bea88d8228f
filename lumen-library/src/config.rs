//! Persisted preferences for Lumen
//!
//! Remembers the last working DMX port and the show paths between runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Serial port the DMX interface last answered on
    pub last_dmx_port: Option<String>,
    /// Profile file
    pub profile: Option<PathBuf>,
    pub scenes_dir: Option<PathBuf>,
    pub fallback_file: Option<PathBuf>,
    /// Preferred audio input device name
    pub audio_device: Option<String>,
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lumen")
            .join("config.txt")
    }

    /// Parse `key=value` lines; blank values and unknown keys are ignored
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key.trim() {
                "last_dmx_port" => config.last_dmx_port = Some(value.to_string()),
                "profile" => config.profile = Some(PathBuf::from(value)),
                "scenes_dir" => config.scenes_dir = Some(PathBuf::from(value)),
                "fallback_file" => config.fallback_file = Some(PathBuf::from(value)),
                "audio_device" => config.audio_device = Some(value.to_string()),
                _ => {}
            }
        }

        config
    }

    fn serialize(&self) -> String {
        let mut lines = vec!["# Lumen Configuration".to_string()];

        if let Some(ref port) = self.last_dmx_port {
            lines.push(format!("last_dmx_port={}", port));
        }
        if let Some(ref path) = self.profile {
            lines.push(format!("profile={}", path.display()));
        }
        if let Some(ref path) = self.scenes_dir {
            lines.push(format!("scenes_dir={}", path.display()));
        }
        if let Some(ref path) = self.fallback_file {
            lines.push(format!("fallback_file={}", path.display()));
        }
        if let Some(ref device) = self.audio_device {
            lines.push(format!("audio_device={}", device));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(Config::parse(""), Config::default());
    }

    #[test]
    fn test_parse_port_and_paths() {
        let config = Config::parse("last_dmx_port=/dev/ttyUSB0\nscenes_dir=/show/scenes\nprofile=");
        assert_eq!(config.last_dmx_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.scenes_dir, Some(PathBuf::from("/show/scenes")));
        assert!(config.profile.is_none());
    }

    #[test]
    fn test_parse_with_comments() {
        let content = "# Comment\naudio_device = USB Audio \nbogus line\nunknown=1";
        let config = Config::parse(content);
        assert_eq!(config.audio_device.as_deref(), Some("USB Audio"));
        assert!(config.last_dmx_port.is_none());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config {
            last_dmx_port: Some("COM3".into()),
            profile: Some(PathBuf::from("/show/mobile.json")),
            scenes_dir: None,
            fallback_file: Some(PathBuf::from("/show/profile_fallbacks.json")),
            audio_device: Some("Loopback".into()),
        };
        assert_eq!(Config::parse(&config.serialize()), config);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("lumen_config_{}", std::process::id()))
            .join("config.txt");
        let config = Config {
            last_dmx_port: Some("/dev/ttyUSB1".into()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }
}
