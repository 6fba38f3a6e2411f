//! GUI application state.
//!
//! Holds the shown position, the status line and the engine result slot. All updates
//! happen on the UI thread; engine replies arrive through [`GuiState::apply_engine_reply`].

use crate::engine::{EngineQuery, EngineReply, Score};
use crate::error::{VisionError, VisionResult};
use crate::grid::Coord;
use crate::ocr::Recognition;
use crate::position::{self, Position};

/// Status line contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Ready,
    Info(String),
    Error(String),
}

impl Status {
    pub fn text(&self) -> &str {
        match self {
            Self::Ready => "Ready",
            Self::Info(msg) | Self::Error(msg) => msg,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    /// Engine buttons are disabled.
    Unavailable(String),
    Idle,
    Thinking(EngineQuery),
}

impl EngineStatus {
    pub fn is_thinking(&self) -> bool {
        matches!(self, Self::Thinking(_))
    }
}

#[derive(Debug)]
pub struct GuiState {
    /// Text box for manual position entry.
    pub fen_input: String,
    pub position: Option<Position>,
    pub fen: String,
    pub status: Status,
    /// Recognition anomalies for the last capture.
    pub warnings: Vec<String>,
    /// Why the shown position is not playable, if it isn't.
    pub illegal_reason: Option<String>,
    pub best_move: Option<String>,
    /// White's point of view.
    pub evaluation: Option<Score>,
    pub engine: EngineStatus,
}

impl GuiState {
    pub fn new(engine: EngineStatus) -> Self {
        Self {
            fen_input: String::new(),
            position: None,
            fen: String::new(),
            status: Status::Ready,
            warnings: Vec::new(),
            illegal_reason: None,
            best_move: None,
            evaluation: None,
            engine,
        }
    }

    fn show(&mut self, position: Position) {
        self.fen = position.to_fen();
        self.illegal_reason = position::legality(&self.fen).err();
        if let Some(reason) = &self.illegal_reason {
            tracing::warn!(fen = %self.fen, %reason, "position is not legal");
        }
        self.fen_input = self.fen.clone();
        self.position = Some(position);
        self.best_move = None;
        self.evaluation = None;
    }

    pub fn show_recognition(&mut self, recognition: Recognition) {
        self.show(recognition.position);
        self.warnings = recognition.warnings;
        self.status = Status::Info(format!("FEN Generated: {}", self.fen));
    }

    /// Validates the text box and shows the position it describes.
    pub fn load_from_input(&mut self) -> VisionResult<()> {
        let position = position::validate_position_string(&self.fen_input)?;
        self.show(position);
        self.warnings.clear();
        self.status = Status::Info("FEN loaded".to_string());
        Ok(())
    }

    pub fn show_error(&mut self, error: &VisionError) {
        tracing::warn!(%error, "action failed");
        self.status = Status::Error(error.user_message());
    }

    /// Engine buttons are live only for a legal position with an idle engine.
    pub fn can_query_engine(&self) -> bool {
        self.engine == EngineStatus::Idle && self.position.is_some() && self.illegal_reason.is_none()
    }

    /// Marks a query as submitted.
    pub fn engine_started(&mut self, query: EngineQuery) {
        self.engine = EngineStatus::Thinking(query);
        self.status = Status::Info("Engine thinking...".to_string());
    }

    pub fn apply_engine_reply(&mut self, reply: VisionResult<EngineReply>) {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.show_error(&e);
                self.engine = EngineStatus::Unavailable(e.user_message());
                return;
            }
        };
        self.engine = EngineStatus::Idle;
        if reply.fen != self.fen {
            tracing::debug!(fen = %reply.fen, "dropping reply for a position no longer shown");
            return;
        }
        match reply.query {
            EngineQuery::BestMove => {
                let text = match &reply.analysis.best_move {
                    Some(mv) => format!("Best: {mv}"),
                    None => "No legal moves".to_string(),
                };
                self.best_move = reply.analysis.best_move;
                self.status = Status::Info(text);
            }
            EngineQuery::Evaluate => {
                let text = reply
                    .analysis
                    .score
                    .map(|s| s.display())
                    .unwrap_or_else(|| "No evaluation".to_string());
                self.evaluation = reply.analysis.score;
                self.status = Status::Info(text);
            }
        }
    }
}

/// From and to squares of a UCI move such as `e2e4` or `e7e8q`.
pub fn move_squares(uci: &str) -> Option<(Coord, Coord)> {
    let from = uci.get(0..2)?.parse().ok()?;
    let to = uci.get(2..4)?.parse().ok()?;
    Some((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Analysis;

    const KINGS: &str = "4k3/8/8/8/8/8/8/4K3 w - - 0 1";

    fn loaded(fen: &str) -> GuiState {
        let mut state = GuiState::new(EngineStatus::Idle);
        state.fen_input = fen.to_string();
        state.load_from_input().unwrap();
        state
    }

    fn reply(query: EngineQuery, fen: &str) -> EngineReply {
        EngineReply {
            query,
            fen: fen.to_string(),
            analysis: Analysis { best_move: Some("e1d2".into()), score: Some(Score::Centipawns(-12)) },
        }
    }

    #[test]
    fn loading_valid_input_shows_position() {
        let state = loaded(KINGS);
        assert_eq!(state.fen, KINGS);
        assert!(state.illegal_reason.is_none());
        assert!(state.can_query_engine());
        assert_eq!(state.status, Status::Info("FEN loaded".into()));
    }

    #[test]
    fn invalid_input_keeps_previous_position() {
        let mut state = loaded(KINGS);
        state.fen_input = "not a position".into();
        let err = state.load_from_input().unwrap_err();
        state.show_error(&err);
        assert_eq!(state.fen, KINGS);
        assert_eq!(state.status, Status::Error("Invalid FEN position".into()));
    }

    #[test]
    fn illegal_position_disables_engine() {
        // two white kings
        let state = loaded("4k3/8/8/8/8/8/8/3KK3 w - - 0 1");
        assert!(state.illegal_reason.is_some());
        assert!(!state.can_query_engine());
    }

    #[test]
    fn engine_replies_update_status() {
        let mut state = loaded(KINGS);
        state.engine_started(EngineQuery::BestMove);
        assert!(!state.can_query_engine());
        state.apply_engine_reply(Ok(reply(EngineQuery::BestMove, KINGS)));
        assert_eq!(state.status.text(), "Best: e1d2");
        assert_eq!(state.best_move.as_deref(), Some("e1d2"));

        state.engine_started(EngineQuery::Evaluate);
        state.apply_engine_reply(Ok(reply(EngineQuery::Evaluate, KINGS)));
        assert_eq!(state.evaluation, Some(Score::Centipawns(-12)));
        assert_eq!(state.status.text(), "Eval: -0.12");
        assert_eq!(state.engine, EngineStatus::Idle);
    }

    #[test]
    fn stale_reply_is_dropped() {
        let mut state = loaded(KINGS);
        state.engine_started(EngineQuery::BestMove);
        state.apply_engine_reply(Ok(reply(EngineQuery::BestMove, "8/8/8/8/8/8/8/K6k w - - 0 1")));
        assert_eq!(state.best_move, None);
        assert_eq!(state.engine, EngineStatus::Idle);
    }

    #[test]
    fn engine_failure_disables_engine() {
        let mut state = loaded(KINGS);
        state.apply_engine_reply(Err(VisionError::EngineUnavailable("gone".into())));
        assert!(matches!(state.engine, EngineStatus::Unavailable(_)));
        assert!(state.status.is_error());
    }

    #[test]
    fn new_state_is_ready() {
        let state = GuiState::new(EngineStatus::Idle);
        assert_eq!(Status::default(), Status::Ready);
        assert_eq!(state.status.text(), "Ready");
        assert!(!state.status.is_error());
    }

    #[test]
    fn parses_move_squares() {
        let (from, to) = move_squares("e7e8q").unwrap();
        assert_eq!((from.to_string(), to.to_string()), ("E7".into(), "E8".into()));
        assert!(move_squares("e9").is_none());
    }
}
