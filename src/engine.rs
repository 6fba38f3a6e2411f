//! Engine module.
//! Talks UCI to an external engine binary (Stockfish) over stdin/stdout with tokio.
//! Inputs a position string, searches to a configurable depth, reports the best move and
//! the evaluation from White's point of view.
//! The binary is looked up in the local engines/ folder first, then on PATH. A missing
//! binary only disables the engine buttons.
//! `EngineService` runs the engine on the tokio runtime; the GUI submits requests and polls
//! typed replies, so the UI thread never blocks on a search.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use shakmaty::Color;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{VisionError, VisionResult};

pub fn engine_binary_name() -> &'static str {
    if cfg!(windows) { "stockfish.exe" } else { "stockfish" }
}

/// First file named `name` in a PATH-style list of directories.
pub fn find_in_path(name: &str, paths: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// `<engine_dir>/stockfish`, else `stockfish` on PATH.
pub fn locate_engine(engine_dir: &Path) -> Option<PathBuf> {
    let name = engine_binary_name();
    let local = engine_dir.join(name);
    if local.is_file() {
        return Some(local);
    }
    let path_var = std::env::var_os("PATH")?;
    find_in_path(name, &path_var)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Moves to mate, negative when the side in question gets mated.
    Mate(i32),
}

impl Score {
    /// Converts a side-to-move score into White's point of view.
    pub fn for_white(self, side_to_move: Color) -> Self {
        if side_to_move == Color::White {
            return self;
        }
        match self {
            Score::Centipawns(cp) => Score::Centipawns(-cp),
            Score::Mate(n) => Score::Mate(-n),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Score::Centipawns(cp) => format!("Eval: {:+.2}", *cp as f64 / 100.0),
            Score::Mate(n) => format!("Mate in {n}"),
        }
    }

    /// Positive when White is better.
    pub fn favours_white(&self) -> Option<bool> {
        match *self {
            Score::Centipawns(0) => None,
            Score::Centipawns(cp) => Some(cp > 0),
            Score::Mate(n) => Some(n > 0),
        }
    }
}

/// Score from an `info ... score cp 35 ...` line.
pub fn parse_score(line: &str) -> Option<Score> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }
    while let Some(token) = tokens.next() {
        if token == "score" {
            let kind = tokens.next()?;
            let value: i32 = tokens.next()?.parse().ok()?;
            return match kind {
                "cp" => Some(Score::Centipawns(value)),
                "mate" => Some(Score::Mate(value)),
                _ => None,
            };
        }
    }
    None
}

/// Move from a `bestmove e2e4 [ponder e7e5]` line; `Some(None)` for `bestmove (none)`.
pub fn parse_bestmove(line: &str) -> Option<Option<String>> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    Some(tokens.next().filter(|m| *m != "(none)").map(str::to_string))
}

fn side_to_move(fen: &str) -> Color {
    match fen.split_whitespace().nth(1) {
        Some("b") => Color::Black,
        _ => Color::White,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    pub best_move: Option<String>,
    /// White's point of view.
    pub score: Option<Score>,
}

fn unavailable(reason: impl std::fmt::Display) -> VisionError {
    VisionError::EngineUnavailable(reason.to_string())
}

pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    depth: u32,
    pub name: String,
}

impl UciEngine {
    pub async fn launch(path: &Path, depth: u32) -> VisionResult<Self> {
        Self::start(Command::new(path), depth).await
    }

    /// Spawns `command` and completes the `uci` / `isready` handshake.
    pub async fn start(mut command: Command, depth: u32) -> VisionResult<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(unavailable)?;
        let stdin = child.stdin.take().ok_or_else(|| unavailable("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| unavailable("no stdout"))?;

        let mut engine = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            depth,
            name: String::new(),
        };

        engine.write_line("uci").await?;
        loop {
            let line = engine.read_line().await?;
            if let Some(name) = line.strip_prefix("id name ") {
                engine.name = name.to_string();
            }
            if line == "uciok" {
                break;
            }
        }
        engine.sync().await?;
        tracing::info!(name = %engine.name, depth, "engine ready");
        Ok(engine)
    }

    async fn write_line(&mut self, msg: &str) -> VisionResult<()> {
        tracing::trace!("write line to engine: {msg}");
        self.stdin.write_all(format!("{msg}\n").as_bytes()).await.map_err(unavailable)?;
        self.stdin.flush().await.map_err(unavailable)
    }

    async fn read_line(&mut self) -> VisionResult<String> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).await.map_err(unavailable)?;
        if read == 0 {
            return Err(unavailable("engine closed its output"));
        }
        let line = line.trim().to_string();
        tracing::trace!("read line from engine: {line}");
        Ok(line)
    }

    async fn sync(&mut self) -> VisionResult<()> {
        self.write_line("isready").await?;
        while self.read_line().await? != "readyok" {}
        Ok(())
    }

    /// Searches `fen` to the configured depth.
    pub async fn analyze(&mut self, fen: &str) -> VisionResult<Analysis> {
        let start = Instant::now();
        self.write_line("ucinewgame").await?;
        self.sync().await?;
        self.write_line(&format!("position fen {fen}")).await?;
        self.write_line(&format!("go depth {}", self.depth)).await?;

        let mut score = None;
        loop {
            let line = self.read_line().await?;
            if let Some(s) = parse_score(&line) {
                score = Some(s);
            } else if let Some(best_move) = parse_bestmove(&line) {
                let side = side_to_move(fen);
                tracing::debug!(?best_move, ?score, latency = ?start.elapsed(), "search finished");
                return Ok(Analysis { best_move, score: score.map(|s| s.for_white(side)) });
            }
        }
    }

    pub async fn quit(mut self) {
        let _ = self.write_line("quit").await;
        let _ = self.child.wait().await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineQuery {
    BestMove,
    Evaluate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineRequest {
    pub query: EngineQuery,
    pub fen: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineReply {
    pub query: EngineQuery,
    pub fen: String,
    pub analysis: Analysis,
}

/// Owns the engine process on a runtime task. Requests are handled one at a time in
/// submission order; every request gets exactly one reply.
pub struct EngineService {
    requests: mpsc::UnboundedSender<EngineRequest>,
    replies: mpsc::UnboundedReceiver<VisionResult<EngineReply>>,
}

impl EngineService {
    pub fn start(runtime: &Handle, path: PathBuf, depth: u32) -> Self {
        Self::spawn(runtime, move || async move { UciEngine::launch(&path, depth).await })
    }

    fn spawn<F, Fut>(runtime: &Handle, launch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = VisionResult<UciEngine>> + Send + 'static,
    {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<EngineRequest>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        runtime.spawn(async move {
            let mut engine = match launch().await {
                Ok(engine) => engine,
                Err(e) => {
                    tracing::warn!(error = %e, "engine failed to start");
                    let _ = reply_tx.send(Err(e));
                    return;
                }
            };
            while let Some(request) = request_rx.recv().await {
                let result = engine.analyze(&request.fen).await.map(|analysis| EngineReply {
                    query: request.query,
                    fen: request.fen,
                    analysis,
                });
                let failed = result.is_err();
                if reply_tx.send(result).is_err() || failed {
                    break;
                }
            }
            engine.quit().await;
            tracing::debug!("engine task finished");
        });

        Self { requests: request_tx, replies: reply_rx }
    }

    pub fn submit(&self, query: EngineQuery, fen: &str) -> VisionResult<()> {
        self.requests
            .send(EngineRequest { query, fen: fen.to_string() })
            .map_err(|_| unavailable("engine task has stopped"))
    }

    /// Next finished reply, without blocking.
    pub fn try_recv(&mut self) -> Option<VisionResult<EngineReply>> {
        self.replies.try_recv().ok()
    }

    /// Closes the request channel; the task sends `quit` and exits.
    pub fn shutdown(self) {
        drop(self.requests);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_scores() {
        assert_eq!(
            parse_score("info depth 12 seldepth 15 score cp -34 nodes 100 pv e7e5"),
            Some(Score::Centipawns(-34))
        );
        assert_eq!(parse_score("info depth 20 score mate 3 pv d1h5"), Some(Score::Mate(3)));
        assert_eq!(parse_score("info string NNUE enabled"), None);
        assert_eq!(parse_score("bestmove e2e4"), None);
    }

    #[test]
    fn parses_bestmove() {
        assert_eq!(parse_bestmove("bestmove e2e4 ponder e7e5"), Some(Some("e2e4".into())));
        assert_eq!(parse_bestmove("bestmove (none)"), Some(None));
        assert_eq!(parse_bestmove("info depth 1"), None);
    }

    #[test]
    fn score_is_reported_for_white() {
        assert_eq!(Score::Centipawns(35).for_white(Color::Black), Score::Centipawns(-35));
        assert_eq!(Score::Mate(-2).for_white(Color::Black), Score::Mate(2));
        assert_eq!(Score::Centipawns(35).for_white(Color::White).display(), "Eval: +0.35");
        assert_eq!(Score::Centipawns(-120).display(), "Eval: -1.20");
        assert_eq!(Score::Mate(3).display(), "Mate in 3");
        assert_eq!(Score::Centipawns(0).favours_white(), None);
        assert_eq!(Score::Mate(-1).favours_white(), Some(false));
    }

    #[test]
    fn finds_local_engine_first() {
        let dir = tempfile::tempdir().unwrap();
        let engines = dir.path().join("engines");
        std::fs::create_dir_all(&engines).unwrap();
        std::fs::write(engines.join(engine_binary_name()), b"").unwrap();
        assert_eq!(locate_engine(&engines), Some(engines.join(engine_binary_name())));
    }

    #[test]
    fn searches_path_list() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("fakefish"), b"").unwrap();
        let paths = std::env::join_paths([a.path(), b.path()]).unwrap();
        assert_eq!(find_in_path("fakefish", &paths), Some(b.path().join("fakefish")));
        assert_eq!(find_in_path("missing", &paths), None);
    }

    #[cfg(unix)]
    const FAKE_ENGINE: &str = r#"
while read -r line; do
  case "$line" in
    uci) echo "id name FakeFish"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) echo "info depth 1 score cp 20 pv e2e4"; echo "info depth 2 score cp 35 pv e2e4 e7e5"; echo "bestmove e2e4 ponder e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;

    #[cfg(unix)]
    fn fake_engine_command(dir: &Path) -> Command {
        let script = dir.join("fakefish.sh");
        std::fs::write(&script, FAKE_ENGINE).unwrap();
        let mut command = Command::new("sh");
        command.arg(script);
        command
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn talks_uci_to_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = UciEngine::start(fake_engine_command(dir.path()), 2).await.unwrap();
        assert_eq!(engine.name, "FakeFish");

        let white = engine.analyze("4k3/8/8/8/8/8/8/4K3 w - - 0 1").await.unwrap();
        assert_eq!(white.best_move.as_deref(), Some("e2e4"));
        assert_eq!(white.score, Some(Score::Centipawns(35)));

        let black = engine.analyze("4k3/8/8/8/8/8/8/4K3 b - - 0 1").await.unwrap();
        assert_eq!(black.score, Some(Score::Centipawns(-35)));
        engine.quit().await;
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let result = UciEngine::launch(Path::new("/definitely/not/stockfish"), 5).await;
        assert!(matches!(result, Err(VisionError::EngineUnavailable(_))));
    }

    async fn next_reply(service: &mut EngineService) -> VisionResult<EngineReply> {
        for _ in 0..500 {
            if let Some(reply) = service.try_recv() {
                return reply;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no reply from engine service");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn service_replies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let command = fake_engine_command(dir.path());
        let mut service =
            EngineService::spawn(&Handle::current(), move || UciEngine::start(command, 3));

        service.submit(EngineQuery::BestMove, "4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        service.submit(EngineQuery::Evaluate, "4k3/8/8/8/8/8/8/4K3 b - - 0 1").unwrap();

        let first = next_reply(&mut service).await.unwrap();
        assert_eq!(first.query, EngineQuery::BestMove);
        assert_eq!(first.analysis.best_move.as_deref(), Some("e2e4"));

        let second = next_reply(&mut service).await.unwrap();
        assert_eq!(second.query, EngineQuery::Evaluate);
        assert_eq!(second.analysis.score, Some(Score::Centipawns(-35)));
        service.shutdown();
    }

    #[tokio::test]
    async fn service_reports_launch_failure() {
        let mut service = EngineService::start(
            &Handle::current(),
            PathBuf::from("/definitely/not/stockfish"),
            5,
        );
        let reply = next_reply(&mut service).await;
        assert!(matches!(reply, Err(VisionError::EngineUnavailable(_))));
        let mut submitted = Ok(());
        for _ in 0..100 {
            submitted = service.submit(EngineQuery::BestMove, "8/8/8/8/8/8/8/8 w - - 0 1");
            if submitted.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(submitted, Err(VisionError::EngineUnavailable(_))));
    }
}
