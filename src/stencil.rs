//! Stencils: per-row lists of inclusive x spans.
//!
//! An input stencil restricts which output voxels are resampled; the rest
//! get the background colour. An output stencil records which voxels
//! received sampled data.

use crate::volume::Extent;

/// One inclusive x span on row `(y, z)`. Ordered by `(z, y, x_start)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StencilSpan {
    pub z: i32,
    pub y: i32,
    pub x_start: i32,
    pub x_end: i32,
}

/// Span lists for every `(y, z)` row of an extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStencil {
    extent: Extent,
    rows: Vec<Vec<(i32, i32)>>,
}

impl ImageStencil {
    /// Empty stencil over `extent`.
    pub fn new(extent: Extent) -> Self {
        let [_, ny, nz] = extent.dims();
        Self {
            extent,
            rows: vec![Vec::new(); ny * nz],
        }
    }

    /// Stencil covering the voxels for which `inside` holds.
    pub fn from_fn<F>(extent: Extent, mut inside: F) -> Self
    where
        F: FnMut(i32, i32, i32) -> bool,
    {
        let mut stencil = Self::new(extent);
        for z in extent.min(2)..=extent.max(2) {
            for y in extent.min(1)..=extent.max(1) {
                for x in extent.min(0)..=extent.max(0) {
                    if inside(x, y, z) {
                        stencil.insert_next_extent(x, x, y, z);
                    }
                }
            }
        }
        stencil
    }

    /// Build from spans in any order; adjacent spans are merged.
    pub fn from_spans(extent: Extent, mut spans: Vec<StencilSpan>) -> Self {
        spans.sort_unstable();
        let mut stencil = Self::new(extent);
        for s in spans {
            stencil.insert_next_extent(s.x_start, s.x_end, s.y, s.z);
        }
        stencil
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    #[inline]
    fn row_index(&self, y: i32, z: i32) -> Option<usize> {
        let e = &self.extent;
        if y < e.min(1) || y > e.max(1) || z < e.min(2) || z > e.max(2) {
            return None;
        }
        let ny = e.len(1);
        Some((z - e.min(2)) as usize * ny + (y - e.min(1)) as usize)
    }

    /// Append a span to row `(y, z)`, merging it with the previous span when
    /// they touch. Spans must arrive in increasing x order per row; rows
    /// outside the extent are ignored.
    pub fn insert_next_extent(&mut self, x_start: i32, x_end: i32, y: i32, z: i32) {
        if x_end < x_start {
            return;
        }
        let Some(r) = self.row_index(y, z) else {
            return;
        };
        let row = &mut self.rows[r];
        if let Some(last) = row.last_mut() {
            if x_start <= last.1 + 1 {
                last.1 = last.1.max(x_end);
                return;
            }
        }
        row.push((x_start, x_end));
    }

    /// Spans on row `(y, z)`.
    pub fn row(&self, y: i32, z: i32) -> &[(i32, i32)] {
        match self.row_index(y, z) {
            Some(r) => &self.rows[r],
            None => &[],
        }
    }

    pub fn is_inside(&self, x: i32, y: i32, z: i32) -> bool {
        self.row(y, z).iter().any(|&(a, b)| x >= a && x <= b)
    }

    /// Split `[x_min, x_max]` on row `(y, z)` into consecutive runs, each
    /// flagged inside or outside the stencil.
    pub fn row_runs(&self, x_min: i32, x_max: i32, y: i32, z: i32) -> RowRuns<'_> {
        RowRuns {
            spans: self.row(y, z).iter(),
            x: x_min,
            x_max,
            pending: None,
        }
    }

    /// All spans in `(z, y, x_start)` order.
    pub fn spans(&self) -> Vec<StencilSpan> {
        let ny = self.extent.len(1);
        let mut out = Vec::new();
        for (r, row) in self.rows.iter().enumerate() {
            let y = self.extent.min(1) + (r % ny.max(1)) as i32;
            let z = self.extent.min(2) + (r / ny.max(1)) as i32;
            for &(x_start, x_end) in row {
                out.push(StencilSpan { z, y, x_start, x_end });
            }
        }
        out
    }

    /// Number of voxels covered.
    pub fn count(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.iter())
            .map(|&(a, b)| (b - a + 1) as usize)
            .sum()
    }
}

/// Runs of equal stencil state along one row, see [`ImageStencil::row_runs`].
#[derive(Debug, Clone)]
pub struct RowRuns<'a> {
    spans: std::slice::Iter<'a, (i32, i32)>,
    x: i32,
    x_max: i32,
    pending: Option<(i32, i32)>,
}

impl RowRuns<'_> {
    /// A single inside run over `[x_min, x_max]`, for rows without a stencil.
    pub fn inside(x_min: i32, x_max: i32) -> Self {
        Self {
            spans: [].iter(),
            x: x_min,
            x_max,
            pending: (x_min <= x_max).then_some((x_min, x_max)),
        }
    }
}

impl Iterator for RowRuns<'_> {
    type Item = (i32, i32, bool);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((a, b)) = self.pending.take() {
            self.x = b + 1;
            return Some((a, b, true));
        }
        if self.x > self.x_max {
            return None;
        }
        for &(a, b) in self.spans.by_ref() {
            if b < self.x {
                continue;
            }
            if a > self.x_max {
                break;
            }
            let a = a.max(self.x);
            let b = b.min(self.x_max);
            if a > self.x {
                let start = self.x;
                self.x = a;
                self.pending = Some((a, b));
                return Some((start, a - 1, false));
            }
            self.x = b + 1;
            return Some((a, b, true));
        }
        let start = self.x;
        self.x = self.x_max + 1;
        Some((start, self.x_max, false))
    }
}
