//! LBPH (Local Binary Pattern Histograms) face recognizer.
//!
//! Each face is resized to a fixed square, encoded as 8-neighbour LBP
//! codes, split into a grid of cells and summarised as one normalized
//! 256-bin histogram per cell. Matching is nearest-neighbour over all
//! training examples under the alternative chi-square distance, so a
//! perfect match scores 0 and completely disjoint histograms score
//! 4 per cell.

use crate::recognizer::{RecognitionError, Recognizer, TrainedModel};
use crate::types::{Label, Prediction};
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::borrow::Cow;

// --- Named constants ---
const LBPH_FACE_SIZE: u32 = 100;
const LBPH_GRID: u32 = 8;
const LBP_BINS: usize = 256;
const LBPH_MAGIC: &[u8; 6] = b"HLBPH1";

/// Neighbour offsets in bit order, clockwise from the top-left corner.
const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbphParams {
    /// Side of the square every face is resized to before encoding.
    pub face_size: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            face_size: LBPH_FACE_SIZE,
            grid_x: LBPH_GRID,
            grid_y: LBPH_GRID,
        }
    }
}

impl LbphParams {
    fn histogram_len(&self) -> usize {
        (self.grid_x * self.grid_y) as usize * LBP_BINS
    }

    fn validate(&self) -> Result<(), RecognitionError> {
        let usable = self.face_size.saturating_sub(2);
        if self.grid_x == 0 || self.grid_y == 0 || usable < self.grid_x || usable < self.grid_y {
            return Err(RecognitionError::MalformedModel(format!(
                "face size {} cannot hold a {}x{} grid",
                self.face_size, self.grid_x, self.grid_y
            )));
        }
        Ok(())
    }
}

/// LBPH training capability.
#[derive(Debug, Clone, Default)]
pub struct LbphRecognizer {
    params: LbphParams,
}

impl LbphRecognizer {
    pub fn new(params: LbphParams) -> Self {
        Self { params }
    }
}

impl Recognizer for LbphRecognizer {
    fn train(
        &self,
        faces: &[GrayImage],
        labels: &[Label],
    ) -> Result<Box<dyn TrainedModel>, RecognitionError> {
        if faces.len() != labels.len() {
            return Err(RecognitionError::LabelCountMismatch {
                faces: faces.len(),
                labels: labels.len(),
            });
        }
        if faces.is_empty() {
            return Err(RecognitionError::EmptyTrainingSet);
        }
        self.params.validate()?;

        let histograms = faces
            .iter()
            .map(|face| spatial_histogram(face, &self.params))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            examples = histograms.len(),
            grid_x = self.params.grid_x,
            grid_y = self.params.grid_y,
            "LBPH model trained"
        );

        Ok(Box::new(LbphModel {
            params: self.params,
            labels: labels.to_vec(),
            histograms,
        }))
    }

    fn load(&self, bytes: &[u8]) -> Result<Box<dyn TrainedModel>, RecognitionError> {
        Ok(Box::new(LbphModel::from_bytes(bytes)?))
    }
}

/// Trained LBPH model: one spatial histogram per training example.
pub struct LbphModel {
    params: LbphParams,
    labels: Vec<Label>,
    histograms: Vec<Vec<f32>>,
}

impl TrainedModel for LbphModel {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognitionError> {
        if self.histograms.is_empty() {
            return Err(RecognitionError::NotTrained);
        }

        let probe = spatial_histogram(face, &self.params)?;
        let expected = self.params.histogram_len();
        if probe.len() != expected {
            return Err(RecognitionError::DimensionMismatch {
                expected,
                actual: probe.len(),
            });
        }

        let mut best = Prediction {
            label: self.labels[0],
            distance: f64::INFINITY,
        };
        for (label, histogram) in self.labels.iter().zip(&self.histograms) {
            let distance = chi_square(histogram, &probe);
            if distance < best.distance {
                best = Prediction { label: *label, distance };
            }
        }

        Ok(best)
    }

    fn labels(&self) -> Vec<Label> {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    fn to_bytes(&self) -> Vec<u8> {
        let hist_len = self.params.histogram_len();
        let mut out = Vec::with_capacity(22 + self.labels.len() * (4 + hist_len * 4));
        out.extend_from_slice(LBPH_MAGIC);
        for v in [
            self.params.face_size,
            self.params.grid_x,
            self.params.grid_y,
            self.labels.len() as u32,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for (label, histogram) in self.labels.iter().zip(&self.histograms) {
            out.extend_from_slice(&label.to_le_bytes());
            for bin in histogram {
                out.extend_from_slice(&bin.to_le_bytes());
            }
        }
        out
    }
}

impl LbphModel {
    fn from_bytes(bytes: &[u8]) -> Result<Self, RecognitionError> {
        let mut reader = ByteReader { bytes, pos: 0 };
        if reader.take(LBPH_MAGIC.len())? != LBPH_MAGIC {
            return Err(RecognitionError::MalformedModel("bad magic".into()));
        }

        let params = LbphParams {
            face_size: reader.u32()?,
            grid_x: reader.u32()?,
            grid_y: reader.u32()?,
        };
        params.validate()?;
        let count = reader.u32()? as usize;
        let hist_len = params.histogram_len();

        let mut labels = Vec::with_capacity(count.min(4096));
        let mut histograms = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            labels.push(reader.u32()?);
            let raw = reader.take(hist_len * 4)?;
            histograms.push(
                raw.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            );
        }

        if reader.pos != bytes.len() {
            return Err(RecognitionError::MalformedModel(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }

        Ok(Self { params, labels, histograms })
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RecognitionError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| RecognitionError::MalformedModel("truncated".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, RecognitionError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Compute the concatenated per-cell LBP histograms of a face.
pub fn spatial_histogram(face: &GrayImage, params: &LbphParams) -> Result<Vec<f32>, RecognitionError> {
    let (width, height) = face.dimensions();
    if width < 3 || height < 3 {
        return Err(RecognitionError::FaceTooSmall { width, height });
    }

    let size = params.face_size;
    let normalized: Cow<'_, GrayImage> = if width == size && height == size {
        Cow::Borrowed(face)
    } else {
        Cow::Owned(imageops::resize(face, size, size, FilterType::Triangle))
    };

    let codes = lbp_codes(&normalized);
    let code_width = size - 2;
    let cell_w = code_width / params.grid_x;
    let cell_h = (size - 2) / params.grid_y;
    let cell_pixels = (cell_w * cell_h) as f32;

    let mut histogram = vec![0f32; params.histogram_len()];
    for gy in 0..params.grid_y {
        for gx in 0..params.grid_x {
            let base = (gy * params.grid_x + gx) as usize * LBP_BINS;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    let code = codes[(y * code_width + x) as usize];
                    histogram[base + code as usize] += 1.0;
                }
            }
            for bin in &mut histogram[base..base + LBP_BINS] {
                *bin /= cell_pixels;
            }
        }
    }

    Ok(histogram)
}

/// LBP code for every interior pixel, row-major, `(w - 2) * (h - 2)` entries.
fn lbp_codes(img: &GrayImage) -> Vec<u8> {
    let (w, h) = img.dimensions();
    let mut codes = Vec::with_capacity(((w - 2) * (h - 2)) as usize);

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = img.get_pixel(x, y)[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let nx = (x as i32 + dx) as u32;
                let ny = (y as i32 + dy) as u32;
                if img.get_pixel(nx, ny)[0] >= center {
                    code |= 1 << bit;
                }
            }
            codes.push(code);
        }
    }

    codes
}

/// Alternative chi-square distance: `Σ 2(a - b)² / (a + b)`.
pub fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let sum = f64::from(x) + f64::from(y);
            if sum > 0.0 {
                let diff = f64::from(x) - f64::from(y);
                2.0 * diff * diff / sum
            } else {
                0.0
            }
        })
        .sum()
}
