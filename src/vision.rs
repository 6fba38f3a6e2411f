//! Board locator.
//! Grayscale -> Gaussian blur -> Canny -> external contours, then the largest contour whose
//! bounding box is near-square wins. The winner is padded by a few pixels and clamped to
//! the image.

use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;

use crate::config::AppConfig;
use crate::error::{VisionError, VisionResult};

/// Axis-aligned bounding box in image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// A contour reduced to what the selection heuristic needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub bounds: Rect,
    pub area: f64,
}

/// Located board, `x1 < x2 <= width`, `y1 < y2 <= height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardRegion {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoardRegion {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Grows `bounds` by `padding` on every side, clamped to a `width` x `height` image.
    pub fn padded(bounds: Rect, padding: u32, width: u32, height: u32) -> Self {
        Self {
            x1: bounds.x.saturating_sub(padding),
            y1: bounds.y.saturating_sub(padding),
            x2: (bounds.x + bounds.width).saturating_add(padding).min(width),
            y2: (bounds.y + bounds.height).saturating_add(padding).min(height),
        }
    }

    pub fn crop(&self, image: &DynamicImage) -> DynamicImage {
        image.crop_imm(self.x1, self.y1, self.width(), self.height())
    }
}

/// Picks the largest-area candidate whose aspect ratio lies in `[min, max]`.
/// Candidates outside the band are rejected regardless of their area.
pub fn select_board(
    candidates: impl IntoIterator<Item = Candidate>,
    aspect_min: f32,
    aspect_max: f32,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        let ratio = candidate.bounds.aspect_ratio();
        if !(aspect_min..=aspect_max).contains(&ratio) {
            continue;
        }
        // strictly larger than zero and than the current best
        if candidate.area > best.map_or(0.0, |b| b.area) {
            best = Some(candidate);
        }
    }
    best
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[(i64, i64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.0 * b.1 - b.0 * a.1)
        .sum();
    twice.abs() as f64 / 2.0
}

fn bounding_rect(contour: &Contour<i32>) -> Option<Rect> {
    let xs = contour.points.iter().map(|p| p.x);
    let ys = contour.points.iter().map(|p| p.y);
    let (min_x, max_x) = (xs.clone().min()?, xs.max()?);
    let (min_y, max_y) = (ys.clone().min()?, ys.max()?);
    Some(Rect {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}

fn to_candidate(contour: &Contour<i32>) -> Option<Candidate> {
    let bounds = bounding_rect(contour)?;
    let points: Vec<(i64, i64)> = contour
        .points
        .iter()
        .map(|p| (p.x as i64, p.y as i64))
        .collect();
    Some(Candidate { bounds, area: polygon_area(&points) })
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardLocator {
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub aspect_min: f32,
    pub aspect_max: f32,
    pub padding: u32,
}

impl Default for BoardLocator {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl BoardLocator {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            blur_sigma: config.blur_sigma,
            canny_low: config.canny_low,
            canny_high: config.canny_high,
            aspect_min: config.aspect_min,
            aspect_max: config.aspect_max,
            padding: config.board_padding,
        }
    }

    /// Outermost contours of the edge map, as selection candidates.
    pub fn candidates(&self, image: &DynamicImage) -> Vec<Candidate> {
        let gray = image.to_luma8();
        let blurred = gaussian_blur_f32(&gray, self.blur_sigma);
        let edges = canny(&blurred, self.canny_low, self.canny_high);
        find_contours::<i32>(&edges)
            .iter()
            .filter(|c| c.parent.is_none() && matches!(c.border_type, BorderType::Outer))
            .filter_map(to_candidate)
            .collect()
    }

    pub fn locate(&self, image: &DynamicImage) -> VisionResult<BoardRegion> {
        let start = Instant::now();
        let candidates = self.candidates(image);
        let best = select_board(candidates.iter().copied(), self.aspect_min, self.aspect_max)
            .ok_or(VisionError::BoardNotFound)?;

        let (width, height) = image.dimensions();
        let region = BoardRegion::padded(best.bounds, self.padding, width, height);
        tracing::debug!(
            contours = candidates.len(),
            ?region,
            area = best.area,
            latency = ?start.elapsed(),
            "board located"
        );
        Ok(region)
    }
}
