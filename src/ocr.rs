//! Recognition pipeline.
//! Screenshot -> board region -> 64 square files -> labels -> position string.
//! Runs once per capture request, start to finish, on the caller's thread. Capture and
//! location failures abort the run; unreadable squares are already absorbed by the
//! classifier.

use std::path::Path;
use std::time::Instant;

use image::DynamicImage;

use crate::capture::{self, Desktop};
use crate::classifier::Classifier;
use crate::config::{AppConfig, PlayerSide};
use crate::error::{VisionError, VisionResult};
use crate::grid;
use crate::position::{self, Position, PositionMeta};
use crate::vision::{BoardLocator, BoardRegion};

pub const DEBUG_CROP_NAME: &str = "cropped_chessboard.png";

/// Outcome of one recognition run.
#[derive(Clone, Debug)]
pub struct Recognition {
    pub fen: String,
    pub position: Position,
    pub region: BoardRegion,
    /// Sanity report entries; never fatal.
    pub warnings: Vec<String>,
}

/// Captures the configured window and recognizes the board in it.
pub fn board_to_fen(
    desktop: &dyn Desktop,
    classifier: &Classifier,
    config: &AppConfig,
) -> VisionResult<Recognition> {
    let screenshot =
        capture::capture(desktop, config.target_window.as_deref(), config.fallback_to_display)?;
    recognize(&screenshot, classifier, config)
}

fn save_debug_crop(board: &DynamicImage, dir: &Path) {
    let path = dir.join(DEBUG_CROP_NAME);
    let result = std::fs::create_dir_all(dir).map_err(VisionError::from).and_then(|_| {
        board.save(&path)?;
        Ok(())
    });
    match result {
        Ok(()) => tracing::debug!(path = %path.display(), "saved board crop"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not save board crop"),
    }
}

/// Runs everything after capture on an existing screenshot.
pub fn recognize(
    screenshot: &DynamicImage,
    classifier: &Classifier,
    config: &AppConfig,
) -> VisionResult<Recognition> {
    let start = Instant::now();

    let region = BoardLocator::from_config(config).locate(screenshot)?;
    let board = region.crop(screenshot);
    // fewer than 8 px per side leaves zero-sized cells
    if board.width() < 8 || board.height() < 8 {
        return Err(VisionError::BoardNotFound);
    }
    if config.save_debug_images {
        save_debug_crop(&board, &config.processed_dir());
    }

    let squares = grid::slice(&board);
    grid::save_squares(&config.squares_dir, &squares)?;
    let labels = classifier.classify_dir(&config.squares_dir)?;

    let mut position = Position::new(labels, PositionMeta::default())?;
    if config.player_side == PlayerSide::Black {
        position = position.rotated();
    }
    if config.infer_castling {
        position.meta.castling = position::infer_castling(&position.labels);
    }
    let fen = position::assemble(&position.labels, &position.meta)?;

    let warnings = position::sanity_report(&position.labels);
    for warning in &warnings {
        tracing::warn!("recognition: {warning}");
    }
    tracing::info!(%fen, latency = ?start.elapsed(), "board recognized");

    Ok(Recognition { fen, position, region, warnings })
}
