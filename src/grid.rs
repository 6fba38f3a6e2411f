//! Grid slicer.
//! Cuts a located board into 64 square crops tagged with algebraic coordinates, and writes
//! them as `A1.png` .. `H8.png` for the classifier.
//!
//! The cell size is `floor(width / 8)` on both axes and every square is exactly
//! `cell x cell`. Remainder pixels on the right and bottom edges are dropped. A region
//! shorter than it is wide leaves the bottom ranks partly outside the image; those pixels
//! are filled with black instead of shrinking the square. Neither case is corrected here.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{imageops, DynamicImage, RgbImage};

use crate::error::VisionResult;

pub const FILES: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// Board square: `file` 0..8 maps to A..H, `rank` is 1..=8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    file: u8,
    rank: u8,
}

impl Coord {
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && (1..=8).contains(&rank)).then_some(Self { file, rank })
    }

    /// Image row 0 is rank 8, row 7 is rank 1; column 0 is file A.
    pub fn from_grid(row: u32, col: u32) -> Self {
        debug_assert!(row < 8 && col < 8);
        Self { file: col as u8, rank: 8 - row as u8 }
    }

    /// Inverse of [`Coord::from_grid`], as `(row, col)`.
    pub fn grid_position(&self) -> (u32, u32) {
        (8 - self.rank as u32, self.file as u32)
    }

    pub fn file(&self) -> u8 {
        self.file
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    /// `0` for A1 up to `63` for H8, rank-major.
    pub fn index(&self) -> usize {
        (self.rank as usize - 1) * 8 + self.file as usize
    }

    /// All 64 squares, file by file: A1, A2, .., A8, B1, .., H8.
    pub fn all() -> impl Iterator<Item = Coord> {
        (0..8u8).flat_map(|file| (1..=8u8).map(move |rank| Coord { file, rank }))
    }

    /// Square seen from the other side of the board (180° rotation).
    pub fn rotated(&self) -> Self {
        Self { file: 7 - self.file, rank: 9 - self.rank }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", FILES[self.file as usize], self.rank)
    }
}

impl FromStr for Coord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let (Some(file), Some(rank), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(format!("bad square {s:?}"));
        };
        let file = FILES
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&file))
            .ok_or_else(|| format!("bad file in {s:?}"))?;
        let rank = rank.to_digit(10).ok_or_else(|| format!("bad rank in {s:?}"))?;
        Coord::new(file as u8, rank as u8).ok_or_else(|| format!("bad square {s:?}"))
    }
}

pub struct SquareImage {
    pub coord: Coord,
    pub image: DynamicImage,
}

pub fn cell_size(region_width: u32) -> u32 {
    region_width / 8
}

/// Slices a board crop row by row from the top-left corner. Always yields 64 squares of
/// `cell x cell` pixels; parts of a cell outside the region stay black.
pub fn slice(region_image: &DynamicImage) -> Vec<SquareImage> {
    let cell = cell_size(region_image.width());
    let rgb = region_image.to_rgb8();
    let mut squares = Vec::with_capacity(64);
    for row in 0..8 {
        for col in 0..8 {
            let mut square = RgbImage::new(cell, cell);
            let inside = imageops::crop_imm(&rgb, col * cell, row * cell, cell, cell).to_image();
            imageops::replace(&mut square, &inside, 0, 0);
            squares.push(SquareImage {
                coord: Coord::from_grid(row, col),
                image: DynamicImage::ImageRgb8(square),
            });
        }
    }
    squares
}

pub fn square_path(dir: &Path, coord: Coord) -> PathBuf {
    dir.join(format!("{coord}.png"))
}

/// Writes every square as `<dir>/<coord>.png`, replacing files from earlier runs.
pub fn save_squares(dir: &Path, squares: &[SquareImage]) -> VisionResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    squares
        .iter()
        .map(|square| {
            let path = square_path(dir, square.coord);
            square.image.save(&path)?;
            Ok(path)
        })
        .collect()
}
