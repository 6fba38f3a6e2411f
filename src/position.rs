//! Position assembler.
//! Turns 64 square labels into a position string (rank 8 first, empty runs as digits)
//! followed by side to move, castling, en passant and the two move counters. Vision cannot
//! see those five fields, so they come from the caller or default to `w - - 0 1`.
//! No legality checks happen here; `legality` asks shakmaty separately.

use std::fmt;
use std::str::FromStr;

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, Role};

use crate::classifier::{BoardLabels, SquareLabel};
use crate::error::{VisionError, VisionResult};
use crate::grid::Coord;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionMeta {
    pub side_to_move: Color,
    /// `-` or a subset of `KQkq`.
    pub castling: String,
    /// `-` or a square such as `e3`.
    pub en_passant: String,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

impl Default for PositionMeta {
    fn default() -> Self {
        Self {
            side_to_move: Color::White,
            castling: "-".to_string(),
            en_passant: "-".to_string(),
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }
}

fn side_char(color: Color) -> char {
    if color == Color::White { 'w' } else { 'b' }
}

fn check_castling(castling: &str) -> VisionResult<()> {
    if castling == "-" {
        return Ok(());
    }
    let valid = !castling.is_empty()
        && castling.chars().all(|c| "KQkq".contains(c))
        && castling.chars().enumerate().all(|(i, c)| !castling[i + 1..].contains(c));
    if valid {
        Ok(())
    } else {
        Err(VisionError::InvalidPosition(format!("castling rights {castling:?}")))
    }
}

fn check_en_passant(square: &str) -> VisionResult<()> {
    if square == "-" {
        return Ok(());
    }
    let bytes = square.as_bytes();
    let valid = bytes.len() == 2
        && (b'a'..=b'h').contains(&bytes[0])
        && (bytes[1] == b'3' || bytes[1] == b'6');
    if valid {
        Ok(())
    } else {
        Err(VisionError::InvalidPosition(format!("en passant square {square:?}")))
    }
}

impl PositionMeta {
    pub fn validate(&self) -> VisionResult<()> {
        check_castling(&self.castling)?;
        check_en_passant(&self.en_passant)?;
        if self.fullmove_number == 0 {
            return Err(VisionError::InvalidPosition("fullmove number must start at 1".into()));
        }
        Ok(())
    }
}

/// Piece placement field: rank 8 down to rank 1, `/` between ranks.
pub fn placement(labels: &BoardLabels) -> String {
    let mut rows = Vec::with_capacity(8);
    for grid_row in 0..8 {
        let mut row = String::new();
        let mut empty = 0;
        for col in 0..8 {
            match labels.get(Coord::from_grid(grid_row, col)).fen_char() {
                Some(c) => {
                    if empty > 0 {
                        row.push_str(&empty.to_string());
                        empty = 0;
                    }
                    row.push(c);
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            row.push_str(&empty.to_string());
        }
        rows.push(row);
    }
    rows.join("/")
}

/// Full position string. Metadata fields are appended as given after a syntax check.
pub fn assemble(labels: &BoardLabels, meta: &PositionMeta) -> VisionResult<String> {
    meta.validate()?;
    Ok(format!(
        "{} {} {} {} {} {}",
        placement(labels),
        side_char(meta.side_to_move),
        meta.castling,
        meta.en_passant,
        meta.halfmove_clock,
        meta.fullmove_number
    ))
}

fn label_at(labels: &BoardLabels, square: &str) -> SquareLabel {
    square.parse::<Coord>().map(|c| labels.get(c)).unwrap_or_default()
}

/// Castling rights that the piece placement still allows: king and rook on their home
/// squares. Returns `-` when none remain.
pub fn infer_castling(labels: &BoardLabels) -> String {
    let is = |square: &str, code: &str| label_at(labels, square).code() == code;

    let white_king_e1 = is("E1", "wk");
    let black_king_e8 = is("E8", "bk");

    let mut castling = String::new();
    if white_king_e1 && is("H1", "wr") { castling.push('K'); }
    if white_king_e1 && is("A1", "wr") { castling.push('Q'); }
    if black_king_e8 && is("H8", "br") { castling.push('k'); }
    if black_king_e8 && is("A8", "br") { castling.push('q'); }

    if castling.is_empty() {
        castling.push('-');
    }
    castling
}

/// Anomalies that usually mean a misclassified square. Informational only.
pub fn sanity_report(labels: &BoardLabels) -> Vec<String> {
    let mut issues = Vec::new();
    for (color, name) in [(Color::White, "White"), (Color::Black, "Black")] {
        let kings = labels.count(SquareLabel::piece(color, Role::King));
        if kings != 1 {
            issues.push(format!("{name} has {kings} kings"));
        }
        let pawns = labels.count(SquareLabel::piece(color, Role::Pawn));
        if pawns > 8 {
            issues.push(format!("{name} has {pawns} pawns (max 8)"));
        }
    }
    let back_rank_pawns = labels
        .iter()
        .filter(|(c, l)| {
            (c.rank() == 1 || c.rank() == 8)
                && matches!(l, SquareLabel::Piece(p) if p.role == Role::Pawn)
        })
        .count();
    if back_rank_pawns > 0 {
        issues.push(format!("{back_rank_pawns} pawn(s) on a back rank"));
    }
    issues
}

/// A parsed or assembled position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub labels: BoardLabels,
    pub meta: PositionMeta,
}

impl Position {
    pub fn new(labels: BoardLabels, meta: PositionMeta) -> VisionResult<Self> {
        meta.validate()?;
        Ok(Self { labels, meta })
    }

    pub fn to_fen(&self) -> String {
        self.to_string()
    }

    /// Board turned 180° with colours swapped and the other side to move. Applying it twice
    /// gives back the original position.
    pub fn rotated(&self) -> Self {
        let mut labels = BoardLabels::default();
        for (coord, label) in self.labels.iter() {
            labels.set(coord.rotated(), label.swap_color());
        }
        let castling = if self.meta.castling == "-" {
            "-".to_string()
        } else {
            self.meta
                .castling
                .chars()
                .map(|c| if c.is_ascii_uppercase() { c.to_ascii_lowercase() } else { c.to_ascii_uppercase() })
                .collect()
        };
        let en_passant = self
            .meta
            .en_passant
            .parse::<Coord>()
            .map(|square| square.rotated().to_string().to_ascii_lowercase())
            .unwrap_or_else(|_| "-".to_string());
        Self {
            labels,
            meta: PositionMeta {
                side_to_move: self.meta.side_to_move.other(),
                castling,
                en_passant,
                ..self.meta.clone()
            },
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            placement(&self.labels),
            side_char(self.meta.side_to_move),
            self.meta.castling,
            self.meta.en_passant,
            self.meta.halfmove_clock,
            self.meta.fullmove_number
        )
    }
}

fn parse_placement(input: &str, field: &str) -> VisionResult<BoardLabels> {
    let rows: Vec<&str> = field.split('/').collect();
    if rows.len() != 8 {
        return Err(VisionError::invalid_fen(input, format!("expected 8 ranks, got {}", rows.len())));
    }
    let mut labels = BoardLabels::default();
    for (row_index, row) in rows.iter().enumerate() {
        let rank = 8 - row_index as u8;
        let mut file = 0u8;
        for c in row.chars() {
            if let Some(n) = c.to_digit(10).filter(|n| (1..=8).contains(n)) {
                file += n as u8;
            } else {
                let label = SquareLabel::from_fen_char(c)
                    .ok_or_else(|| VisionError::invalid_fen(input, format!("bad piece {c:?}")))?;
                let coord = Coord::new(file, rank)
                    .ok_or_else(|| VisionError::invalid_fen(input, format!("rank {rank} too long")))?;
                labels.set(coord, label);
                file += 1;
            }
            if file > 8 {
                return Err(VisionError::invalid_fen(input, format!("rank {rank} too long")));
            }
        }
        if file != 8 {
            return Err(VisionError::invalid_fen(input, format!("rank {rank} has {file} squares")));
        }
    }
    Ok(labels)
}

impl FromStr for Position {
    type Err = VisionError;

    /// Missing trailing fields default to `w - - 0 1`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = input.split_whitespace().collect();
        if fields.is_empty() {
            return Err(VisionError::invalid_fen(input, "empty position string"));
        }
        if fields.len() > 6 {
            return Err(VisionError::invalid_fen(input, "too many fields"));
        }
        let labels = parse_placement(input, fields[0])?;
        let defaults = PositionMeta::default();
        let side_to_move = match fields.get(1).copied() {
            None | Some("w") => Color::White,
            Some("b") => Color::Black,
            Some(other) => return Err(VisionError::invalid_fen(input, format!("bad side {other:?}"))),
        };
        let number = |i: usize, default: u32| -> VisionResult<u32> {
            fields.get(i).map_or(Ok(default), |s| {
                s.parse().map_err(|_| VisionError::invalid_fen(input, format!("bad counter {s:?}")))
            })
        };
        let meta = PositionMeta {
            side_to_move,
            castling: fields.get(2).map_or(defaults.castling, |s| s.to_string()),
            en_passant: fields.get(3).map_or(defaults.en_passant, |s| s.to_string()),
            halfmove_clock: number(4, defaults.halfmove_clock)?,
            fullmove_number: number(5, defaults.fullmove_number)?,
        };
        meta.validate()
            .map_err(|e| VisionError::invalid_fen(input, e.to_string()))?;
        Ok(Self { labels, meta })
    }
}

/// Validates user input. shakmaty is the syntax authority; the result is then parsed into
/// a [`Position`] for display.
pub fn validate_position_string(input: &str) -> VisionResult<Position> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(VisionError::invalid_fen(input, "Please enter a FEN string"));
    }
    Fen::from_ascii(trimmed.as_bytes()).map_err(|e| VisionError::invalid_fen(trimmed, e.to_string()))?;
    trimmed.parse()
}

/// Whether the position is playable under standard rules. The error text says why not.
pub fn legality(fen: &str) -> Result<(), String> {
    let parsed = Fen::from_ascii(fen.as_bytes()).map_err(|e| e.to_string())?;
    parsed
        .into_position::<Chess>(CastlingMode::Standard)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Web analysis page for a position, e.g. `https://lichess.org/analysis/<fen>`.
pub fn analysis_url(site: &str, mode: &str, fen: &str) -> String {
    format!("{}/{}/{}", site.trim_end_matches('/'), mode, fen.trim().replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn kings_only() -> BoardLabels {
        let mut labels = BoardLabels::default();
        labels.set("E1".parse().unwrap(), SquareLabel::piece(Color::White, Role::King));
        labels.set("E8".parse().unwrap(), SquareLabel::piece(Color::Black, Role::King));
        labels
    }

    #[test]
    fn assembles_kings_only_board() {
        let fen = assemble(&kings_only(), &PositionMeta::default()).unwrap();
        assert_eq!(fen, "4k3/8/8/8/8/8/8/4K3 w - - 0 1");
    }

    #[test]
    fn metadata_is_appended_verbatim() {
        let meta = PositionMeta {
            side_to_move: Color::Black,
            castling: "Kq".into(),
            en_passant: "e3".into(),
            halfmove_clock: 7,
            fullmove_number: 42,
        };
        let fen = assemble(&kings_only(), &meta).unwrap();
        assert_eq!(fen, "4k3/8/8/8/8/8/8/4K3 b Kq e3 7 42");
    }

    #[test]
    fn assembler_allows_illegal_piece_counts() {
        let mut labels = kings_only();
        labels.set("A1".parse().unwrap(), SquareLabel::piece(Color::White, Role::King));
        assert_eq!(placement(&labels), "4k3/8/8/8/8/8/8/K3K3");
    }

    #[test]
    fn malformed_metadata_is_invalid_position() {
        let meta = PositionMeta { castling: "KK".into(), ..PositionMeta::default() };
        assert!(matches!(assemble(&kings_only(), &meta), Err(VisionError::InvalidPosition(_))));
        let meta = PositionMeta { en_passant: "e4".into(), ..PositionMeta::default() };
        assert!(assemble(&kings_only(), &meta).is_err());
    }

    #[test]
    fn parses_and_reprints_start_position() {
        let position: Position = START.parse().unwrap();
        assert_eq!(position.to_fen(), START);
        assert_eq!(position.labels.get("D1".parse().unwrap()).code(), "wq");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let position: Position = "4k3/8/8/8/8/8/8/4K3".parse().unwrap();
        assert_eq!(position.to_fen(), "4k3/8/8/8/8/8/8/4K3 w - - 0 1");
    }

    #[test]
    fn rejects_bad_placements() {
        assert!("8/8/8".parse::<Position>().is_err());
        assert!("9/8/8/8/8/8/8/8 w - - 0 1".parse::<Position>().is_err());
        assert!("4k4/8/8/8/8/8/8/4K3 w - - 0 1".parse::<Position>().is_err());
        assert!("4x3/8/8/8/8/8/8/4K3 w - - 0 1".parse::<Position>().is_err());
        assert!("4k3/8/8/8/8/8/8/4K3 x - - 0 1".parse::<Position>().is_err());
    }

    #[test]
    fn rotation_swaps_colours_and_side() {
        let position: Position = "4k3/8/8/8/8/8/8/R3K3 w Q e3 3 9".parse().unwrap();
        assert_eq!(position.rotated().to_fen(), "3k3r/8/8/8/8/8/8/3K4 b q d6 3 9");
    }

    #[test]
    fn rotation_tolerates_malformed_en_passant() {
        for square in ["@3", "z9", "a", "e33"] {
            let position = Position {
                labels: kings_only(),
                meta: PositionMeta { en_passant: square.to_string(), ..PositionMeta::default() },
            };
            assert_eq!(position.rotated().meta.en_passant, "-", "{square}");
        }
    }

    #[test]
    fn rotation_is_self_inverse() {
        for fen in [
            START,
            "4k3/8/8/8/8/8/8/4K3 b - - 0 1",
            "r3k2r/pp3ppp/2n5/3pP3/8/8/PPP2PPP/R3K2R w Kq d6 0 12",
        ] {
            let position: Position = fen.parse().unwrap();
            assert_eq!(position.rotated().rotated(), position, "{fen}");
        }
    }

    #[test]
    fn infers_castling_from_home_squares() {
        let start: Position = START.parse().unwrap();
        assert_eq!(infer_castling(&start.labels), "KQkq");

        let castled: Position = "r4rk1/8/8/8/8/8/8/4K2R w - - 0 1".parse().unwrap();
        assert_eq!(infer_castling(&castled.labels), "K");

        assert_eq!(infer_castling(&kings_only()), "-");
    }

    #[test]
    fn sanity_report_flags_anomalies() {
        assert!(sanity_report(&START.parse::<Position>().unwrap().labels).is_empty());

        let nine_pawns: Position = "4k3/8/8/8/4P3/8/PPPPPPPP/4K3 w - - 0 1".parse().unwrap();
        let report = sanity_report(&nine_pawns.labels);
        assert_eq!(report, vec!["White has 9 pawns (max 8)".to_string()]);

        let report = sanity_report(&BoardLabels::default());
        assert!(report.contains(&"White has 0 kings".to_string()));
        assert!(report.contains(&"Black has 0 kings".to_string()));

        let back_rank: Position = "4k2p/8/8/8/8/8/8/4K3 w - - 0 1".parse().unwrap();
        assert_eq!(sanity_report(&back_rank.labels), vec!["1 pawn(s) on a back rank".to_string()]);
    }

    #[test]
    fn validates_user_input() {
        assert!(validate_position_string(START).is_ok());
        assert!(validate_position_string(&format!("  {START}  ")).is_ok());
        assert!(matches!(
            validate_position_string("   "),
            Err(VisionError::InvalidPositionString { .. })
        ));
        assert!(matches!(
            validate_position_string("not a fen"),
            Err(VisionError::InvalidPositionString { .. })
        ));
    }

    #[test]
    fn legality_uses_board_rules() {
        assert!(legality(START).is_ok());
        assert!(legality("4k3/8/8/8/8/8/8/K3K3 w - - 0 1").is_err());
    }

    #[test]
    fn builds_analysis_url() {
        assert_eq!(
            analysis_url("https://lichess.org/", "analysis", "8/8/8/8/8/8/8/8 w - - 0 1"),
            "https://lichess.org/analysis/8/8/8/8/8/8/8/8_w_-_-_0_1"
        );
    }
}
