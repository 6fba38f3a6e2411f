//! GUI rendering functions.
//!
//! Layout of the control rows and the analysis board painter.

use std::collections::HashMap;

use eframe::egui::{self, Align2, Color32, FontId, Pos2, Rect, RichText, Stroke, TextureHandle, Vec2};

use super::state::{move_squares, EngineStatus, GuiState};
use crate::classifier::SquareLabel;
use crate::engine::Score;
use crate::grid::{Coord, FILES};

const LIGHT_SQUARE: Color32 = Color32::from_rgb(0xF0, 0xD9, 0xB5);
const DARK_SQUARE: Color32 = Color32::from_rgb(0xB5, 0x88, 0x63);
const HIGHLIGHT: Color32 = Color32::from_rgb(0x2E, 0x8B, 0x57);
const WHITE_AHEAD: Color32 = Color32::from_rgb(0x3C, 0xB3, 0x71);
const BLACK_AHEAD: Color32 = Color32::from_rgb(0xDC, 0x3C, 0x3C);
const LABEL_MARGIN: f32 = 18.0;

/// Buttons pressed during this frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct Actions {
    pub capture: bool,
    pub load: bool,
    pub editor: bool,
    pub analysis: bool,
    pub best_move: bool,
    pub evaluate: bool,
}

/// Capture button and the manual position row.
pub fn render_input(ui: &mut egui::Ui, state: &mut GuiState, actions: &mut Actions) {
    ui.horizontal(|ui| {
        if ui.button(RichText::new("📷 Capture").size(16.0)).clicked() {
            actions.capture = true;
        }
        ui.add_space(12.0);
        ui.label("FEN:");
        let response = ui.add(
            egui::TextEdit::singleline(&mut state.fen_input)
                .desired_width(420.0)
                .hint_text("Paste a FEN string"),
        );
        let submitted = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
        if ui.button("Load").clicked() || submitted {
            actions.load = true;
        }
    });
}

/// Web analysis links and engine buttons.
pub fn render_actions(ui: &mut egui::Ui, state: &GuiState, actions: &mut Actions) {
    let has_position = state.position.is_some();
    ui.horizontal(|ui| {
        ui.add_enabled_ui(has_position, |ui| {
            if ui.button("Lichess Editor").clicked() {
                actions.editor = true;
            }
            if ui.button("Lichess Analysis").clicked() {
                actions.analysis = true;
            }
        });

        ui.add_space(20.0);

        let engine_ready = state.can_query_engine();
        ui.add_enabled_ui(engine_ready, |ui| {
            if ui.button("Best Move").clicked() {
                actions.best_move = true;
            }
            if ui.button("Evaluate").clicked() {
                actions.evaluate = true;
            }
        });
        match &state.engine {
            EngineStatus::Unavailable(reason) => {
                ui.label(RichText::new(reason).color(Color32::GRAY));
            }
            EngineStatus::Thinking(_) => {
                ui.spinner();
            }
            EngineStatus::Idle => {}
        }
    });
}

pub fn render_status(ui: &mut egui::Ui, state: &GuiState) {
    let colour = if state.status.is_error() { Color32::RED } else { ui.visuals().text_color() };
    ui.label(RichText::new(state.status.text()).color(colour).strong());

    if !state.fen.is_empty() {
        ui.horizontal(|ui| {
            ui.monospace(&state.fen);
            if ui.small_button("Copy").clicked() {
                ui.ctx().copy_text(state.fen.clone());
            }
        });
    }
    if let Some(reason) = &state.illegal_reason {
        ui.label(RichText::new(format!("⚠ Illegal position: {reason}")).color(Color32::YELLOW));
    }
    for warning in &state.warnings {
        ui.label(RichText::new(format!("⚠ {warning}")).color(Color32::YELLOW));
    }
    ui.horizontal(|ui| {
        if let Some(best) = &state.best_move {
            ui.label(format!("Best: {best}"));
        }
        if let Some(score) = state.evaluation {
            ui.label(RichText::new(score.display()).color(eval_colour(ui, score)));
        }
    });
}

fn eval_colour(ui: &egui::Ui, score: Score) -> Color32 {
    match score.favours_white() {
        Some(true) => WHITE_AHEAD,
        Some(false) => BLACK_AHEAD,
        None => ui.visuals().text_color(),
    }
}

fn square_rect(board: Rect, coord: Coord) -> Rect {
    let cell = board.width() / 8.0;
    let (row, col) = coord.grid_position();
    Rect::from_min_size(
        board.min + Vec2::new(col as f32 * cell, row as f32 * cell),
        Vec2::splat(cell),
    )
}

fn draw_piece_disc(painter: &egui::Painter, rect: Rect, label: SquareLabel) {
    let Some(letter) = label.fen_char() else {
        return;
    };
    let white = letter.is_ascii_uppercase();
    let (fill, ink) = if white {
        (Color32::from_gray(250), Color32::BLACK)
    } else {
        (Color32::from_gray(30), Color32::WHITE)
    };
    let radius = rect.width() * 0.38;
    painter.circle_filled(rect.center(), radius, fill);
    painter.circle_stroke(rect.center(), radius, Stroke::new(1.5, Color32::from_gray(90)));
    painter.text(
        rect.center(),
        Align2::CENTER_CENTER,
        letter.to_ascii_uppercase(),
        FontId::proportional(rect.width() * 0.45),
        ink,
    );
}

/// Draws the board with White at the bottom. `pieces` maps asset names such as `wK` to
/// textures; squares without a texture get a lettered disc.
pub fn render_board(ui: &mut egui::Ui, state: &GuiState, pieces: &HashMap<String, TextureHandle>) {
    let side = (ui.available_width().min(ui.available_height()) - LABEL_MARGIN).clamp(160.0, 560.0);
    // left column for ranks, bottom row for files
    let (outer, _) = ui.allocate_exact_size(Vec2::splat(side + LABEL_MARGIN), egui::Sense::hover());
    let board = Rect::from_min_size(outer.min + Vec2::new(LABEL_MARGIN, 0.0), Vec2::splat(side));
    let painter = ui.painter_at(outer);
    let cell = side / 8.0;
    let label_font = FontId::proportional(12.0);
    let label_colour = ui.visuals().text_color();

    for coord in Coord::all() {
        let rect = square_rect(board, coord);
        let light = (coord.file() + coord.rank()) % 2 == 0;
        painter.rect_filled(rect, 0.0, if light { LIGHT_SQUARE } else { DARK_SQUARE });
    }

    if let Some((from, to)) = state.best_move.as_deref().and_then(move_squares) {
        for coord in [from, to] {
            painter.rect_stroke(square_rect(board, coord).shrink(1.5), 0.0, Stroke::new(3.0, HIGHLIGHT));
        }
    }

    if let Some(position) = &state.position {
        for (coord, label) in position.labels.iter() {
            let SquareLabel::Piece(piece) = label else {
                continue;
            };
            let rect = square_rect(board, coord);
            let asset = format!("{}{}", piece.color.char(), piece.role.upper_char());
            match pieces.get(&asset) {
                Some(texture) => {
                    let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
                    painter.image(texture.id(), rect.shrink(cell * 0.04), uv, Color32::WHITE);
                }
                None => draw_piece_disc(&painter, rect, label),
            }
        }
    }

    for i in 0..8u8 {
        let rank_y = board.min.y + (7 - i) as f32 * cell + cell / 2.0;
        painter.text(
            Pos2::new(outer.min.x + LABEL_MARGIN / 2.0, rank_y),
            Align2::CENTER_CENTER,
            (i + 1).to_string(),
            label_font.clone(),
            label_colour,
        );
    }
    let file_y = board.max.y + LABEL_MARGIN / 2.0;
    for (i, file) in FILES.iter().enumerate() {
        painter.text(
            Pos2::new(board.min.x + i as f32 * cell + cell / 2.0, file_y),
            Align2::CENTER_CENTER,
            file.to_ascii_lowercase(),
            label_font.clone(),
            label_colour,
        );
    }
}
