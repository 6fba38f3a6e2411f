//! Square classifier.
//! Resizes each square to the model's input size, scales intensities to [0, 1], runs one
//! forward pass and keeps the most probable class. Ties go to the lowest class index.
//! The model is loaded on first use and shared read-only afterwards.
//! An unreadable square is labelled empty instead of failing the whole board.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use image::imageops::FilterType;
use image::DynamicImage;
use shakmaty::{Color, Piece, Role};

use crate::error::{VisionError, VisionResult};
use crate::grid::{square_path, Coord};
use crate::model::{ChannelOrder, SequentialModel, SquareModel, Tensor};

/// Output classes in network order: colour prefix then piece letter, empty last.
pub const CLASS_CODES: [&str; 13] = [
    "bb", "bk", "bn", "bp", "bq", "br", "wb", "wk", "wn", "wp", "wq", "wr", "zEmpty",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SquareLabel {
    #[default]
    Empty,
    Piece(Piece),
}

fn role_from_letter(c: char) -> Option<Role> {
    Some(match c.to_ascii_lowercase() {
        'p' => Role::Pawn,
        'n' => Role::Knight,
        'b' => Role::Bishop,
        'r' => Role::Rook,
        'q' => Role::Queen,
        'k' => Role::King,
        _ => return None,
    })
}

fn role_letter(role: Role) -> char {
    match role {
        Role::Pawn => 'p',
        Role::Knight => 'n',
        Role::Bishop => 'b',
        Role::Rook => 'r',
        Role::Queen => 'q',
        Role::King => 'k',
    }
}

impl SquareLabel {
    pub fn piece(color: Color, role: Role) -> Self {
        SquareLabel::Piece(Piece { color, role })
    }

    pub fn from_class_index(index: usize) -> Option<Self> {
        CLASS_CODES.get(index).and_then(|code| Self::from_code(code))
    }

    /// Parses a class code such as `wk` or `zEmpty`.
    pub fn from_code(code: &str) -> Option<Self> {
        if code == "zEmpty" {
            return Some(SquareLabel::Empty);
        }
        let mut chars = code.chars();
        let color = match chars.next()? {
            'w' => Color::White,
            'b' => Color::Black,
            _ => return None,
        };
        let role = role_from_letter(chars.next()?)?;
        chars.next().is_none().then(|| Self::piece(color, role))
    }

    pub fn code(&self) -> String {
        match self {
            SquareLabel::Empty => "zEmpty".to_string(),
            SquareLabel::Piece(p) => {
                let prefix = if p.color == Color::White { 'w' } else { 'b' };
                format!("{prefix}{}", role_letter(p.role))
            }
        }
    }

    /// Position-string letter: uppercase for White, `None` when empty.
    pub fn fen_char(&self) -> Option<char> {
        match self {
            SquareLabel::Empty => None,
            SquareLabel::Piece(p) => {
                let c = role_letter(p.role);
                Some(if p.color == Color::White { c.to_ascii_uppercase() } else { c })
            }
        }
    }

    pub fn from_fen_char(c: char) -> Option<Self> {
        let role = role_from_letter(c)?;
        let color = if c.is_ascii_uppercase() { Color::White } else { Color::Black };
        Some(Self::piece(color, role))
    }

    /// Same piece in the other colour.
    pub fn swap_color(self) -> Self {
        match self {
            SquareLabel::Empty => SquareLabel::Empty,
            SquareLabel::Piece(p) => Self::piece(p.color.other(), p.role),
        }
    }
}

/// Labels for all 64 squares, indexed by [`Coord::index`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardLabels([SquareLabel; 64]);

impl Default for BoardLabels {
    fn default() -> Self {
        Self([SquareLabel::Empty; 64])
    }
}

impl BoardLabels {
    pub fn get(&self, coord: Coord) -> SquareLabel {
        self.0[coord.index()]
    }

    pub fn set(&mut self, coord: Coord, label: SquareLabel) {
        self.0[coord.index()] = label;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coord, SquareLabel)> + '_ {
        Coord::all().map(|c| (c, self.get(c)))
    }

    pub fn count(&self, label: SquareLabel) -> usize {
        self.0.iter().filter(|l| **l == label).count()
    }
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Resizes to `size` x `size` and scales to [0, 1] in the requested channel order.
pub fn preprocess(image: &DynamicImage, size: u32, order: ChannelOrder) -> Tensor {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let mut data = Vec::with_capacity((size * size * 3) as usize);
    for px in rgb.pixels() {
        let [r, g, b] = px.0;
        let ordered = match order {
            ChannelOrder::Rgb => [r, g, b],
            ChannelOrder::Bgr => [b, g, r],
        };
        data.extend(ordered.iter().map(|&v| v as f32 / 255.0));
    }
    Tensor::new(size as usize, size as usize, 3, data)
}

/// Classification service. Owns the model, which is loaded once on first use.
pub struct Classifier {
    model_path: PathBuf,
    model: OnceLock<Arc<dyn SquareModel>>,
}

impl Classifier {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self { model_path: model_path.into(), model: OnceLock::new() }
    }

    /// Wraps an already constructed model.
    pub fn with_model(model: Arc<dyn SquareModel>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(model);
        Self { model_path: PathBuf::new(), model: cell }
    }

    fn model(&self) -> VisionResult<&dyn SquareModel> {
        if let Some(model) = self.model.get() {
            return Ok(model.as_ref());
        }
        let start = Instant::now();
        tracing::info!(path = %self.model_path.display(), "loading classifier model");
        let loaded = SequentialModel::load(&self.model_path)?;
        if loaded.class_codes() != CLASS_CODES {
            return Err(VisionError::ModelLoadFailure {
                path: self.model_path.clone(),
                reason: format!("unexpected classes {:?}", loaded.class_codes()),
            });
        }
        tracing::debug!(latency = ?start.elapsed(), "model loaded");
        Ok(self.model.get_or_init(|| Arc::new(loaded)).as_ref())
    }

    /// Loads the model now instead of on the first square.
    pub fn warm_up(&self) -> VisionResult<()> {
        self.model().map(|_| ())
    }

    pub fn classify(&self, square: &DynamicImage) -> VisionResult<SquareLabel> {
        let model = self.model()?;
        let input = preprocess(square, model.input_size(), model.channel_order());
        let probabilities = model.predict(&input);
        let label = argmax(&probabilities)
            .and_then(|i| model.class_codes().get(i))
            .and_then(|code| SquareLabel::from_code(code))
            .unwrap_or_default();
        Ok(label)
    }

    /// Classifies one square image file.
    pub fn classify_file(&self, path: &Path) -> VisionResult<SquareLabel> {
        let read_failure = |reason: String| VisionError::SquareReadFailure {
            path: path.to_path_buf(),
            reason,
        };
        let image = image::open(path).map_err(|e| read_failure(e.to_string()))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(read_failure("empty image".into()));
        }
        self.classify(&image)
    }

    /// Classifies `<dir>/A1.png` .. `<dir>/H8.png`. Unreadable squares become empty;
    /// only a model failure aborts the scan.
    pub fn classify_dir(&self, dir: &Path) -> VisionResult<BoardLabels> {
        self.model()?;
        let start = Instant::now();
        let mut labels = BoardLabels::default();
        for coord in Coord::all() {
            let label = match self.classify_file(&square_path(dir, coord)) {
                Ok(label) => label,
                Err(e @ VisionError::SquareReadFailure { .. }) => {
                    tracing::warn!(square = %coord, error = %e, "could not read square, assuming empty");
                    SquareLabel::Empty
                }
                Err(e) => return Err(e),
            };
            labels.set(coord, label);
        }
        tracing::info!(latency = ?start.elapsed(), "board classified");
        Ok(labels)
    }

}
