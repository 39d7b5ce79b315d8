//! Labeled (time, y, x) raster that accompanies a lineage graph.
//!
//! The raster is never mutated in place by the analyzers. Relabeling and
//! filtering build a new [`LabelMask`] so that a caller never observes a
//! half-applied relabel.

use crate::core::error::{MaskError, MaskResult};
use crate::core::types::{Frame, MaskId, BACKGROUND};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Lookup table mapping old labels to new labels for one frame.
///
/// Labels without an entry map to background.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelLut {
    table: Vec<MaskId>,
}

impl LabelLut {
    /// Build a table from `(old, new)` pairs.
    pub fn from_pairs<I: IntoIterator<Item = (MaskId, MaskId)>>(pairs: I) -> Self {
        let pairs: Vec<_> = pairs.into_iter().collect();
        let len = pairs.iter().map(|&(old, _)| old as usize + 1).max().unwrap_or(0);
        let mut table = vec![BACKGROUND; len];
        for (old, new) in pairs {
            if old != BACKGROUND {
                table[old as usize] = new;
            }
        }
        Self { table }
    }

    /// Identity mapping restricted to `labels`.
    pub fn retaining<I: IntoIterator<Item = MaskId>>(labels: I) -> Self {
        Self::from_pairs(labels.into_iter().map(|l| (l, l)))
    }

    /// Map one label.
    #[inline]
    pub fn apply(&self, label: MaskId) -> MaskId {
        self.table.get(label as usize).copied().unwrap_or(BACKGROUND)
    }
}

/// A 3D label raster indexed as (time, y, x).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMask {
    data: Array3<MaskId>,
}

impl LabelMask {
    /// Wrap an existing array.
    pub fn new(data: Array3<MaskId>) -> Self {
        Self { data }
    }

    /// All-background raster of the given shape.
    pub fn zeros(shape: (usize, usize, usize)) -> Self {
        Self {
            data: Array3::zeros(shape),
        }
    }

    /// Build from row-major data.
    pub fn from_shape_vec(shape: (usize, usize, usize), data: Vec<MaskId>) -> MaskResult<Self> {
        let expected = shape.0 * shape.1 * shape.2;
        let len = data.len();
        Array3::from_shape_vec(shape, data)
            .map(Self::new)
            .map_err(|_| MaskError::ShapeMismatch {
                shape,
                len,
                expected,
            })
    }

    /// Shape as (frames, height, width).
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of frames.
    pub fn n_frames(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Whether the raster has no pixels at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Underlying array.
    pub fn data(&self) -> &Array3<MaskId> {
        &self.data
    }

    /// Consume into the underlying array.
    pub fn into_inner(self) -> Array3<MaskId> {
        self.data
    }

    /// View of one frame.
    pub fn frame(&self, frame: Frame) -> MaskResult<ArrayView2<'_, MaskId>> {
        let n_frames = self.n_frames();
        if frame as usize >= n_frames {
            return Err(MaskError::FrameOutOfRange { frame, n_frames });
        }
        Ok(self.data.index_axis(Axis(0), frame as usize))
    }

    /// Pixel count per positive label in one frame.
    pub fn pixel_counts(&self, frame: Frame) -> MaskResult<BTreeMap<MaskId, u64>> {
        let mut counts = BTreeMap::new();
        for &label in self.frame(frame)?.iter() {
            if label != BACKGROUND {
                *counts.entry(label).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Positive labels present in one frame.
    pub fn labels_in_frame(&self, frame: Frame) -> MaskResult<BTreeSet<MaskId>> {
        Ok(self
            .frame(frame)?
            .iter()
            .copied()
            .filter(|&l| l != BACKGROUND)
            .collect())
    }

    /// Labels with at least one pixel within `width` pixels of any of the
    /// four image edges.
    pub fn labels_touching_border(&self, frame: Frame, width: usize) -> MaskResult<HashSet<MaskId>> {
        let view = self.frame(frame)?;
        let (height, w) = view.dim();
        let mut labels = HashSet::new();
        if width == 0 {
            return Ok(labels);
        }
        for ((y, x), &label) in view.indexed_iter() {
            if label == BACKGROUND {
                continue;
            }
            let near_border = y < width
                || x < width
                || y + width >= height
                || x + width >= w;
            if near_border {
                labels.insert(label);
            }
        }
        Ok(labels)
    }

    /// Number of 8-connected regions per positive label in one frame.
    ///
    /// A count above one means several unconnected regions share a label.
    pub fn region_counts(&self, frame: Frame) -> MaskResult<BTreeMap<MaskId, usize>> {
        let view = self.frame(frame)?;
        let (height, width) = view.dim();
        let mut visited = Array2::<bool>::default((height, width));
        let mut counts = BTreeMap::new();
        let mut queue = VecDeque::new();

        for ((y, x), &label) in view.indexed_iter() {
            if label == BACKGROUND || visited[[y, x]] {
                continue;
            }
            *counts.entry(label).or_insert(0) += 1;
            visited[[y, x]] = true;
            queue.push_back((y, x));

            while let Some((cy, cx)) = queue.pop_front() {
                for (ny, nx) in n8_positions((cy, cx), (height, width)) {
                    if !visited[[ny, nx]] && view[[ny, nx]] == label {
                        visited[[ny, nx]] = true;
                        queue.push_back((ny, nx));
                    }
                }
            }
        }
        Ok(counts)
    }

    /// Apply one lookup table per frame and return the new raster.
    ///
    /// Frames without a table become background.
    pub fn relabel_frames(&self, luts: &HashMap<Frame, LabelLut>) -> LabelMask {
        let mut data = self.data.clone();
        for (f, mut slice) in data.axis_iter_mut(Axis(0)).enumerate() {
            match luts.get(&(f as Frame)) {
                Some(lut) => slice.mapv_inplace(|label| lut.apply(label)),
                None => slice.fill(BACKGROUND),
            }
        }
        LabelMask { data }
    }

    /// Zero every label not listed for its frame. Surviving labels keep
    /// their values.
    pub fn retain_labels(&self, keep: &HashMap<Frame, BTreeSet<MaskId>>) -> LabelMask {
        let luts = keep
            .iter()
            .map(|(&frame, labels)| (frame, LabelLut::retaining(labels.iter().copied())))
            .collect();
        self.relabel_frames(&luts)
    }
}

/// In-bounds 8-neighbourhood of a pixel.
fn n8_positions((y, x): (usize, usize), (height, width): (usize, usize)) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(8);
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dy == 0 && dx == 0 {
                continue;
            }
            let ny = y as i64 + dy;
            let nx = x as i64 + dx;
            if ny >= 0 && nx >= 0 && (ny as usize) < height && (nx as usize) < width {
                out.push((ny as usize, nx as usize));
            }
        }
    }
    out
}
