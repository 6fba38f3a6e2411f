//! GUI module for the application.
//!
//! egui/eframe front end: capture a board, load a position by hand, open it on the web or
//! ask the engine about it. Engine queries run on the engine service task; the window
//! polls for replies each frame and stays responsive while the engine thinks.

pub mod render;
pub mod state;

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use eframe::egui::{self, TextureHandle, Vec2};

use crate::capture::Desktop;
use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::engine::{EngineQuery, EngineService};
use crate::ocr;
use crate::position;

use render::Actions;
use state::{EngineStatus, GuiState};

pub const PIECE_ASSET_DIR: &str = "assets/pieces";

/// Everything the window needs, built by `main` before the event loop starts.
pub struct Services {
    pub config: AppConfig,
    pub desktop: Box<dyn Desktop>,
    pub classifier: Classifier,
    /// `None` when no engine binary was found.
    pub engine: Option<EngineService>,
}

pub struct ChessVisionApp {
    state: GuiState,
    config: AppConfig,
    desktop: Box<dyn Desktop>,
    classifier: Classifier,
    engine: Option<EngineService>,
    pieces: HashMap<String, TextureHandle>,
    pieces_loaded: bool,
}

impl ChessVisionApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, services: Services) -> Self {
        let engine_status = match services.engine {
            Some(_) => EngineStatus::Idle,
            None => EngineStatus::Unavailable("Stockfish not found".to_string()),
        };
        Self {
            state: GuiState::new(engine_status),
            config: services.config,
            desktop: services.desktop,
            classifier: services.classifier,
            engine: services.engine,
            pieces: HashMap::new(),
            pieces_loaded: false,
        }
    }

    /// Loads `assets/pieces/wK.png` .. `bP.png` once; missing files fall back to discs.
    fn load_pieces(&mut self, ctx: &egui::Context) {
        if self.pieces_loaded {
            return;
        }
        self.pieces_loaded = true;

        for color in ['w', 'b'] {
            for role in ['K', 'Q', 'R', 'B', 'N', 'P'] {
                let name = format!("{color}{role}");
                let path = Path::new(PIECE_ASSET_DIR).join(format!("{name}.png"));
                let Ok(image) = image::open(&path) else {
                    continue;
                };
                let rgba = image.to_rgba8();
                let size = [rgba.width() as usize, rgba.height() as usize];
                let color_image = egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
                let texture = ctx.load_texture(name.clone(), color_image, egui::TextureOptions::LINEAR);
                self.pieces.insert(name, texture);
            }
        }
        tracing::debug!(loaded = self.pieces.len(), "piece images");
    }

    fn poll_engine(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        while let Some(reply) = engine.try_recv() {
            self.state.apply_engine_reply(reply);
        }
    }

    fn handle_capture(&mut self) {
        tracing::info!("GUI: capture requested");
        match ocr::board_to_fen(self.desktop.as_ref(), &self.classifier, &self.config) {
            Ok(recognition) => self.state.show_recognition(recognition),
            Err(e) => self.state.show_error(&e),
        }
    }

    fn handle_load(&mut self) {
        if let Err(e) = self.state.load_from_input() {
            self.state.show_error(&e);
        }
    }

    fn handle_web(&mut self, mode: &str) {
        let url = position::analysis_url(&self.config.analysis_site, mode, &self.state.fen);
        tracing::info!(%url, "opening browser");
        if let Err(e) = open_in_browser(&url) {
            tracing::warn!(error = %e, "could not open browser");
            self.state.status = state::Status::Error(format!("Could not open browser: {e}"));
        }
    }

    fn handle_engine(&mut self, query: EngineQuery) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        match engine.submit(query, &self.state.fen) {
            Ok(()) => self.state.engine_started(query),
            Err(e) => self.state.apply_engine_reply(Err(e)),
        }
    }

    fn dispatch(&mut self, actions: Actions) {
        if actions.capture {
            self.handle_capture();
        }
        if actions.load {
            self.handle_load();
        }
        if actions.editor {
            self.handle_web("editor");
        }
        if actions.analysis {
            self.handle_web("analysis");
        }
        if actions.best_move {
            self.handle_engine(EngineQuery::BestMove);
        } else if actions.evaluate {
            self.handle_engine(EngineQuery::Evaluate);
        }
    }
}

impl eframe::App for ChessVisionApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.load_pieces(ctx);
        self.poll_engine();

        if self.state.engine.is_thinking() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        let mut actions = Actions::default();
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Chess Vision");
            ui.add_space(8.0);
            render::render_input(ui, &mut self.state, &mut actions);
            ui.add_space(4.0);
            render::render_actions(ui, &self.state, &mut actions);
            ui.separator();
            render::render_status(ui, &self.state);
            ui.add_space(8.0);
            render::render_board(ui, &self.state, &self.pieces);
        });
        self.dispatch(actions);
    }
}

impl Drop for ChessVisionApp {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown();
        }
    }
}

/// Hands `url` to the system browser without waiting for it.
fn open_in_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    };
    #[cfg(target_os = "macos")]
    let mut command = Command::new("open");
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let mut command = Command::new("xdg-open");

    command.arg(url).spawn().map(|_| ())
}

/// Run the GUI application.
/// This function blocks until the window is closed.
pub fn run_gui(services: Services) -> eframe::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(Vec2::new(720.0, 860.0))
            .with_min_inner_size(Vec2::new(480.0, 560.0))
            .with_title("Chess Vision"),
        ..Default::default()
    };

    tracing::info!("GUI: starting event loop");
    eframe::run_native(
        "Chess Vision",
        options,
        Box::new(|cc| Ok(Box::new(ChessVisionApp::new(cc, services)))),
    )
}
