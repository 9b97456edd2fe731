//! Simple configuration persistence for TwinDeck
//!
//! Stores engine settings and the last folder a mix was written to.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;
use twindeck_audio::EngineConfig;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub engine: EngineConfig,
    /// Last folder a recording was saved to
    pub last_output_dir: Option<PathBuf>,
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.serialize();
        fs::write(path, content)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("twindeck")
            .join("config.txt")
    }

    /// Folder for new recordings: the last one used, else the music dir
    pub fn output_dir(&self) -> PathBuf {
        self.last_output_dir
            .clone()
            .or_else(dirs::audio_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                warn!(line, "Ignoring malformed config line");
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            let engine = &mut config.engine;

            match key {
                "sample_rate" => set_parsed(key, value, &mut engine.sample_rate),
                "looping" => set_parsed(key, value, &mut engine.looping),
                "record_chunk_ms" => set_parsed(key, value, &mut engine.record_chunk_ms),
                "record_ring_secs" => set_parsed(key, value, &mut engine.record_ring_secs),
                "master_volume" => set_parsed(key, value, &mut engine.master_volume),
                "last_output_dir" => {
                    if !value.is_empty() {
                        config.last_output_dir = Some(PathBuf::from(value));
                    }
                }
                _ => warn!(key, "Ignoring unknown config key"),
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let engine = &self.engine;
        let mut lines = vec![
            "# TwinDeck Configuration".to_string(),
            format!("sample_rate={}", engine.sample_rate),
            format!("looping={}", engine.looping),
            format!("record_chunk_ms={}", engine.record_chunk_ms),
            format!("record_ring_secs={}", engine.record_ring_secs),
            format!("master_volume={}", engine.master_volume),
        ];

        if let Some(ref dir) = self.last_output_dir {
            lines.push(format!("last_output_dir={}", dir.display()));
        }

        lines.join("\n")
    }
}

/// Overwrite `slot` if `value` parses; keep the default otherwise
fn set_parsed<T: FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "Ignoring invalid config value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let config = Config::parse("");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_engine_settings() {
        let config = Config::parse("sample_rate=44100\nlooping=false\nmaster_volume=0.8");
        assert_eq!(config.engine.sample_rate, 44100);
        assert!(!config.engine.looping);
        assert_eq!(config.engine.master_volume, 0.8);
        assert_eq!(config.engine.record_chunk_ms, 100);
    }

    #[test]
    fn test_parse_with_comments() {
        let content = "# Comment\nlast_output_dir=/mixes\n# Another comment";
        let config = Config::parse(content);
        assert_eq!(config.last_output_dir, Some(PathBuf::from("/mixes")));
        assert_eq!(config.output_dir(), PathBuf::from("/mixes"));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = Config::parse("sample_rate=fast\nno_equals_here\nmystery=1");
        assert_eq!(config.engine.sample_rate, 48000);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut config = Config::default();
        config.engine.sample_rate = 44100;
        config.engine.looping = false;
        config.last_output_dir = Some(PathBuf::from("/test/path"));

        let serialized = config.serialize();
        let parsed = Config::parse(&serialized);

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir()
            .join(format!("twindeck-config-{}", std::process::id()))
            .join("config.txt");
        let mut config = Config::default();
        config.engine.record_chunk_ms = 50;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.record_chunk_ms, 50);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
