//! Error taxonomy shared by the recognition pipeline and the engine service.
//! Capture and location failures abort a run; square read failures are
//! recovered inside the classifier; engine failures only disable engine UI.

use std::path::PathBuf;

use thiserror::Error;

pub type VisionResult<T> = Result<T, VisionError>;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("no window matching {0:?} was found")]
    WindowNotFound(String),

    #[error("cannot access the display: {0}")]
    DisplayAccessDenied(String),

    #[error("no chessboard found in the captured image")]
    BoardNotFound,

    #[error("cannot read square image {path}: {reason}")]
    SquareReadFailure { path: PathBuf, reason: String },

    #[error("cannot load model {path}: {reason}")]
    ModelLoadFailure { path: PathBuf, reason: String },

    #[error("chess engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("invalid position string {input:?}: {reason}")]
    InvalidPositionString { input: String, reason: String },

    #[error("invalid position field: {0}")]
    InvalidPosition(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl VisionError {
    /// Short message for the status line of the GUI.
    pub fn user_message(&self) -> String {
        match self {
            VisionError::WindowNotFound(_) => "No browser found!".to_string(),
            VisionError::DisplayAccessDenied(_) => {
                "Cannot capture the screen (check permissions)".to_string()
            }
            VisionError::BoardNotFound => "Chessboard not found in the image".to_string(),
            VisionError::SquareReadFailure { .. } => "Could not read a square image".to_string(),
            VisionError::ModelLoadFailure { .. } => "Classifier model could not be loaded".to_string(),
            VisionError::EngineUnavailable(_) => "Stockfish not found".to_string(),
            VisionError::InvalidPositionString { .. } => "Invalid FEN position".to_string(),
            VisionError::InvalidPosition(field) => format!("Invalid position: {field}"),
            VisionError::Io(_) | VisionError::Image(_) => "Error processing image".to_string(),
        }
    }

    pub fn invalid_fen(input: &str, reason: impl Into<String>) -> Self {
        VisionError::InvalidPositionString {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_are_short() {
        let errors = [
            VisionError::WindowNotFound("chrome".into()),
            VisionError::BoardNotFound,
            VisionError::EngineUnavailable("missing".into()),
            VisionError::invalid_fen("xx", "bad"),
        ];
        for e in errors {
            assert!(e.user_message().len() <= 48, "{}", e.user_message());
        }
    }

    #[test]
    fn io_errors_convert() {
        let err: VisionError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, VisionError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
