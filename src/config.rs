//! # Configuration Module
//!
//! Startup configuration, read from the environment (optionally seeded from a `.env` file) with a
//! JSON settings file as a fallback source for the bot token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::Rgb;
use serde::Deserialize;

use crate::compositor::{DEFAULT_JPEG_QUALITY, WHITE};

pub const TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";
pub const SETTINGS_VAR: &str = "BORDERIFY_SETTINGS";
pub const TEMP_DIR_VAR: &str = "BORDERIFY_TEMP_DIR";
pub const SESSION_TTL_VAR: &str = "BORDERIFY_SESSION_TTL_SECS";
pub const BACKGROUND_VAR: &str = "BORDERIFY_BACKGROUND";
pub const JPEG_QUALITY_VAR: &str = "BORDERIFY_JPEG_QUALITY";

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

/// Settings file layout
#[derive(Debug, Default, Deserialize)]
pub struct SettingsFile {
    pub tg_token: Option<String>,
}

/// How delivered pictures are rendered
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub background: Rgb<u8>,
    pub jpeg_quality: u8,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            background: WHITE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Everything the bot needs at startup
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    /// Where pending uploads are kept
    pub temp_dir: PathBuf,
    /// Abandoned sessions older than this are dropped, `None` keeps them forever
    pub session_ttl: Option<Duration>,
    pub render: RenderSettings,
}

impl BotConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a variable if set
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = match lookup(TOKEN_VAR).filter(|token| !token.trim().is_empty()) {
            Some(token) => token,
            None => {
                let settings_path = lookup(SETTINGS_VAR)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
                read_settings_file(&settings_path)?
                    .tg_token
                    .filter(|token| !token.trim().is_empty())
                    .with_context(|| {
                        format!(
                            "{TOKEN_VAR} must be set, or tg_token given in {}",
                            settings_path.display()
                        )
                    })?
            }
        };

        let temp_dir = lookup(TEMP_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let session_ttl = match lookup(SESSION_TTL_VAR) {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{SESSION_TTL_VAR} must be whole seconds, got {raw:?}"))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => Some(Duration::from_secs(DEFAULT_SESSION_TTL_SECS)),
        };

        let background = match lookup(BACKGROUND_VAR) {
            Some(raw) => parse_hex_color(&raw)
                .with_context(|| format!("{BACKGROUND_VAR} must look like #RRGGBB, got {raw:?}"))?,
            None => WHITE,
        };

        let jpeg_quality = match lookup(JPEG_QUALITY_VAR) {
            Some(raw) => {
                let quality: u8 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{JPEG_QUALITY_VAR} must be 1-100, got {raw:?}"))?;
                if !(1..=100).contains(&quality) {
                    bail!("{JPEG_QUALITY_VAR} must be 1-100, got {quality}");
                }
                quality
            }
            None => DEFAULT_JPEG_QUALITY,
        };

        Ok(Self {
            bot_token,
            temp_dir,
            session_ttl,
            render: RenderSettings {
                background,
                jpeg_quality,
            },
        })
    }
}

/// Read the JSON settings file, an absent file reads as empty
pub fn read_settings_file(path: &Path) -> Result<SettingsFile> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read settings file {}", path.display())),
    }
}

/// Parse `#RRGGBB` (leading `#` optional)
pub fn parse_hex_color(raw: &str) -> Result<Rgb<u8>> {
    let hex = raw.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("expected six hex digits, got {raw:?}");
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FFFFFF").unwrap(), Rgb([255, 255, 255]));
        assert_eq!(parse_hex_color("10a0Ff").unwrap(), Rgb([16, 160, 255]));
        assert!(parse_hex_color("#FFF").is_err());
        assert!(parse_hex_color("#GGGGGG").is_err());
    }
}
