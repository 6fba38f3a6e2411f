mod capture;
mod classifier;
mod config;
mod engine;
mod error;
mod grid;
mod gui;
mod logging;
mod model;
mod ocr;
mod position;
mod vision;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};

use classifier::Classifier;
use config::{Overrides, PlayerSide};
use engine::EngineService;

fn cli() -> Command {
    Command::new("chess-vision")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reads a chessboard from a browser window and turns it into a FEN position")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Configuration file")
                .default_value(config::DEFAULT_CONFIG_PATH)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .value_name("TITLE")
                .help("Part of the window title to capture (case-insensitive)"),
        )
        .arg(
            Arg::new("side")
                .long("side")
                .value_name("SIDE")
                .help("Side shown at the bottom of the captured board")
                .value_parser(["white", "black"]),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .value_name("PATH")
                .help("Square classifier model (JSON)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("squares-dir")
                .long("squares-dir")
                .value_name("DIR")
                .help("Where the 64 square images are written")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("engine-depth")
                .long("engine-depth")
                .value_name("N")
                .help("Search depth for Best Move / Evaluate")
                .value_parser(value_parser!(u32).range(1..=60)),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Debug logging for this crate")
                .action(ArgAction::SetTrue),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("verbose"));

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let mut config = config::load_config(&config_path)?;

    let side = match matches.get_one::<String>("side") {
        Some(side) => Some(side.parse::<PlayerSide>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    Overrides {
        target_window: matches.get_one::<String>("target").cloned(),
        player_side: side,
        model_path: matches.get_one::<PathBuf>("model").cloned(),
        squares_dir: matches.get_one::<PathBuf>("squares-dir").cloned(),
        engine_depth: matches.get_one::<u32>("engine-depth").copied(),
    }
    .apply(&mut config);
    tracing::debug!(?config, "effective configuration");

    let classifier = Classifier::new(config.model_path.clone());
    if let Err(e) = classifier.warm_up() {
        tracing::warn!(error = %e, "classifier model not loaded; capture will fail");
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let engine = match engine::locate_engine(&config.engine_dir) {
        Some(path) => {
            tracing::info!(path = %path.display(), "using engine");
            Some(EngineService::start(runtime.handle(), path, config.engine_depth))
        }
        None => {
            tracing::warn!(dir = %config.engine_dir.display(), "Stockfish not found, engine features disabled");
            None
        }
    };

    let services = gui::Services {
        classifier,
        desktop: capture::platform_desktop(),
        engine,
        config,
    };
    let result = gui::run_gui(services).map_err(|e| anyhow::anyhow!("GUI failed: {e}"));

    runtime.shutdown_timeout(Duration::from_secs(2));
    result
}
