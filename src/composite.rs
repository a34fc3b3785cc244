//! Slab compositing.
//!
//! A thick slab is sampled `n` times per output voxel and reduced to one
//! value. The general executor reduces a block of `n` contiguous samples at
//! once; the permuted executor accumulates whole rows layer by layer. Both
//! forms perform the same floating point operations in the same order.

/// Slab reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlabMode {
    Min,
    Max,
    #[default]
    Mean,
    Sum,
}

impl SlabMode {
    pub fn name(self) -> &'static str {
        match self {
            SlabMode::Min => "min",
            SlabMode::Max => "max",
            SlabMode::Mean => "mean",
            SlabMode::Sum => "sum",
        }
    }
}

/// Slab parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlabSettings {
    /// Samples per output voxel (at least 1).
    pub count: usize,
    /// Sample spacing as a fraction of the output z spacing.
    pub spacing_fraction: f64,
    pub mode: SlabMode,
    /// Halve the first and last samples (trapezoid rule).
    pub trapezoid: bool,
}

impl Default for SlabSettings {
    fn default() -> Self {
        Self {
            count: 1,
            spacing_fraction: 1.0,
            mode: SlabMode::Mean,
            trapezoid: false,
        }
    }
}

/// Reduce `n` samples of `nc` components stored back to back in `values`,
/// leaving the result in the first `nc` slots.
pub type CompositeFn = fn(values: &mut [f64], nc: usize, n: usize);

/// Fold layer `i` of `n` (`input`) into the running row (`output`).
pub type RowCompositeFn = fn(output: &mut [f64], input: &[f64], i: usize, n: usize);

fn slab_sum(values: &mut [f64], nc: usize, n: usize, f: f64) {
    for c in 0..nc {
        let mut result = values[c];
        for k in 1..n {
            result += values[k * nc + c];
        }
        values[c] = result * f;
    }
}

fn slab_trap(values: &mut [f64], nc: usize, n: usize, f: f64) {
    for c in 0..nc {
        let mut result = values[c] * 0.5;
        for k in 1..n - 1 {
            result += values[k * nc + c];
        }
        result += values[(n - 1) * nc + c] * 0.5;
        values[c] = result * f;
    }
}

fn mean_value(values: &mut [f64], nc: usize, n: usize) {
    slab_sum(values, nc, n, 1.0 / n as f64);
}

fn mean_trap(values: &mut [f64], nc: usize, n: usize) {
    slab_trap(values, nc, n, 1.0 / (n - 1) as f64);
}

fn sum_values(values: &mut [f64], nc: usize, n: usize) {
    slab_sum(values, nc, n, 1.0);
}

fn sum_trap(values: &mut [f64], nc: usize, n: usize) {
    slab_trap(values, nc, n, 1.0);
}

fn min_value(values: &mut [f64], nc: usize, n: usize) {
    for c in 0..nc {
        let mut result = values[c];
        for k in 1..n {
            let v = values[k * nc + c];
            result = if result < v { result } else { v };
        }
        values[c] = result;
    }
}

fn max_value(values: &mut [f64], nc: usize, n: usize) {
    for c in 0..nc {
        let mut result = values[c];
        for k in 1..n {
            let v = values[k * nc + c];
            result = if result > v { result } else { v };
        }
        values[c] = result;
    }
}

/// Block reduction for a slab mode.
pub fn composite_func(mode: SlabMode, trapezoid: bool) -> CompositeFn {
    match (mode, trapezoid) {
        (SlabMode::Min, _) => min_value,
        (SlabMode::Max, _) => max_value,
        (SlabMode::Mean, false) => mean_value,
        (SlabMode::Mean, true) => mean_trap,
        (SlabMode::Sum, false) => sum_values,
        (SlabMode::Sum, true) => sum_trap,
    }
}

fn sum_row(output: &mut [f64], input: &[f64], i: usize, _n: usize) {
    if i == 0 {
        output.copy_from_slice(input);
    } else {
        for (o, v) in output.iter_mut().zip(input) {
            *o += v;
        }
    }
}

fn sum_row_trap(output: &mut [f64], input: &[f64], i: usize, n: usize) {
    if i == 0 {
        for (o, v) in output.iter_mut().zip(input) {
            *o = 0.5 * v;
        }
    } else if i == n - 1 {
        for (o, v) in output.iter_mut().zip(input) {
            *o += 0.5 * v;
        }
    } else {
        for (o, v) in output.iter_mut().zip(input) {
            *o += v;
        }
    }
}

fn mean_row(output: &mut [f64], input: &[f64], i: usize, n: usize) {
    if i == 0 {
        output.copy_from_slice(input);
    } else if i == n - 1 {
        let f = 1.0 / n as f64;
        for (o, v) in output.iter_mut().zip(input) {
            *o += v;
            *o *= f;
        }
    } else {
        for (o, v) in output.iter_mut().zip(input) {
            *o += v;
        }
    }
}

fn mean_row_trap(output: &mut [f64], input: &[f64], i: usize, n: usize) {
    if i == 0 {
        for (o, v) in output.iter_mut().zip(input) {
            *o = 0.5 * v;
        }
    } else if i == n - 1 {
        let f = 1.0 / (n - 1) as f64;
        for (o, v) in output.iter_mut().zip(input) {
            *o += 0.5 * v;
            *o *= f;
        }
    } else {
        for (o, v) in output.iter_mut().zip(input) {
            *o += v;
        }
    }
}

fn min_row(output: &mut [f64], input: &[f64], i: usize, _n: usize) {
    if i == 0 {
        output.copy_from_slice(input);
    } else {
        for (o, v) in output.iter_mut().zip(input) {
            *o = if *o < *v { *o } else { *v };
        }
    }
}

fn max_row(output: &mut [f64], input: &[f64], i: usize, _n: usize) {
    if i == 0 {
        output.copy_from_slice(input);
    } else {
        for (o, v) in output.iter_mut().zip(input) {
            *o = if *o > *v { *o } else { *v };
        }
    }
}

/// Incremental row reduction for a slab mode.
pub fn row_composite_func(mode: SlabMode, trapezoid: bool) -> RowCompositeFn {
    match (mode, trapezoid) {
        (SlabMode::Min, _) => min_row,
        (SlabMode::Max, _) => max_row,
        (SlabMode::Mean, false) => mean_row,
        (SlabMode::Mean, true) => mean_row_trap,
        (SlabMode::Sum, false) => sum_row,
        (SlabMode::Sum, true) => sum_row_trap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MODES: [SlabMode; 4] = [SlabMode::Min, SlabMode::Max, SlabMode::Mean, SlabMode::Sum];

    #[test]
    fn test_block_modes() {
        // 4 samples of 2 components
        let samples = [1.0, -1.0, 4.0, 2.0, 2.0, 8.0, 5.0, 3.0];
        let run = |mode, trap| {
            let mut v = samples;
            composite_func(mode, trap)(&mut v, 2, 4);
            [v[0], v[1]]
        };
        assert_eq!(run(SlabMode::Min, false), [1.0, -1.0]);
        assert_eq!(run(SlabMode::Max, false), [5.0, 8.0]);
        assert_eq!(run(SlabMode::Sum, false), [12.0, 12.0]);
        assert_eq!(run(SlabMode::Mean, false), [3.0, 3.0]);
        assert_eq!(run(SlabMode::Sum, true), [9.0, 11.0]);
        let mean_trap = run(SlabMode::Mean, true);
        assert_relative_eq!(mean_trap[0], 3.0);
        assert_relative_eq!(mean_trap[1], 11.0 / 3.0);
    }

    #[test]
    fn test_row_form_matches_block_form() {
        let n = 5;
        let nc = 3;
        let width = 4;
        let layer = |i: usize| -> Vec<f64> {
            (0..width * nc).map(|k| ((k * 7 + i * 13) % 11) as f64 * 0.37 - 1.0).collect()
        };
        for mode in MODES {
            for trap in [false, true] {
                let mut row = vec![0.0; width * nc];
                let fold = row_composite_func(mode, trap);
                for i in 0..n {
                    fold(&mut row, &layer(i), i, n);
                }
                let block = composite_func(mode, trap);
                for x in 0..width {
                    let mut samples = Vec::with_capacity(n * nc);
                    for i in 0..n {
                        samples.extend_from_slice(&layer(i)[x * nc..(x + 1) * nc]);
                    }
                    block(&mut samples, nc, n);
                    assert_eq!(&samples[..nc], &row[x * nc..(x + 1) * nc], "{mode:?} trap={trap}");
                }
            }
        }
    }

    #[test]
    fn test_single_layer_is_identity() {
        for mode in [SlabMode::Mean, SlabMode::Sum, SlabMode::Min, SlabMode::Max] {
            let input = [1.25, -3.5];
            let mut row = [0.0; 2];
            row_composite_func(mode, false)(&mut row, &input, 0, 1);
            assert_eq!(row, input);
        }
    }
}
