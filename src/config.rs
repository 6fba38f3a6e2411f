//! Config module.
//! Manages I/O for chess_vision.json (window hint, directories, detector thresholds, engine depth).
//! Uses serde for JSON serialization; a missing file means defaults.
//! Command-line flags override individual fields for one launch.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "chess_vision.json";

/// Which side of the board was at the bottom of the captured image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSide {
    #[default]
    White,
    Black,
}

impl std::str::FromStr for PlayerSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "white" | "w" => Ok(PlayerSide::White),
            "black" | "b" => Ok(PlayerSide::Black),
            other => Err(format!("unknown side {other:?} (expected white or black)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Case-insensitive substring of the window title to capture.
    pub target_window: Option<String>,
    /// Capture the primary display when no window matches.
    pub fallback_to_display: bool,
    pub squares_dir: PathBuf,
    pub model_path: PathBuf,
    pub engine_dir: PathBuf,
    pub engine_depth: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub blur_sigma: f32,
    pub board_padding: u32,
    pub aspect_min: f32,
    pub aspect_max: f32,
    pub player_side: PlayerSide,
    pub infer_castling: bool,
    pub save_debug_images: bool,
    pub analysis_site: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_window: None,
            fallback_to_display: true,
            squares_dir: PathBuf::from("processed").join("64_squares"),
            model_path: PathBuf::from("models").join("model.json"),
            engine_dir: PathBuf::from("engines"),
            engine_depth: 15,
            canny_low: 50.0,
            canny_high: 150.0,
            blur_sigma: 1.1,
            board_padding: 3,
            aspect_min: 0.8,
            aspect_max: 1.2,
            player_side: PlayerSide::White,
            infer_castling: true,
            save_debug_images: true,
            analysis_site: "https://lichess.org".to_string(),
        }
    }
}

impl AppConfig {
    /// Directory for debug artifacts, the parent of the squares directory.
    pub fn processed_dir(&self) -> PathBuf {
        self.squares_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Per-launch overrides collected from the command line.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub target_window: Option<String>,
    pub player_side: Option<PlayerSide>,
    pub model_path: Option<PathBuf>,
    pub squares_dir: Option<PathBuf>,
    pub engine_depth: Option<u32>,
}

impl Overrides {
    pub fn apply(self, config: &mut AppConfig) {
        if let Some(target) = self.target_window {
            config.target_window = Some(target);
        }
        if let Some(side) = self.player_side {
            config.player_side = side;
        }
        if let Some(path) = self.model_path {
            config.model_path = path;
        }
        if let Some(dir) = self.squares_dir {
            config.squares_dir = dir;
        }
        if let Some(depth) = self.engine_depth {
            config.engine_depth = depth;
        }
    }
}

/// Loads the config, falling back to defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    tracing::debug!(?config, "config loaded");
    Ok(config)
}
