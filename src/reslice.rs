//! Reslice configuration and execution.
//!
//! [`Reslice`] gathers everything that shapes one resampling pass: the
//! reslice axes and transform, the output geometry (each part optional and
//! otherwise derived from the input), the interpolator and its border
//! policy, slab compositing, scalar rescaling and stencils. An update
//! derives the output information, builds (or reuses) the index matrix,
//! picks an execution strategy and runs it over disjoint output chunks.

use std::sync::Arc;

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use tracing::{debug, trace, warn};

use crate::composite::{SlabMode, SlabSettings};
use crate::error::{ResliceError, Result};
use crate::execute::{execute_chunk, ExecuteContext, OutputChunk, PermutePlan, Strategy};
use crate::extent::{infer_input_extent, round_index, InputRequest};
use crate::interpolate::{
    BorderMode, ImageInterpolator, InterpolationMode, Interpolator, SamplerSettings, FLOOR_TOLERANCE,
};
use crate::matrix::{
    axes_matrix, can_use_nearest_neighbor, invert_direction, is_permutation_matrix, IndexMatrix,
    IndexMatrixCache,
};
use crate::scalar::{Scalar, ScalarType};
use crate::stencil::{ImageStencil, StencilSpan};
use crate::transform::ResliceTransform;
use crate::volume::{Extent, Geometry, Volume, VolumeInfo};

/// Geometry and storage of the output of one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputInformation {
    /// Whole output extent.
    pub extent: Extent,
    pub geometry: Geometry,
    pub scalar_type: ScalarType,
    pub components: usize,
}

/// Result of an execute call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResliceOutput {
    pub volume: Volume,
    /// Voxels that received sampled data, when stencil output is enabled.
    pub stencil: Option<ImageStencil>,
}

/// Per-update decisions shared by extent requests and execution.
#[derive(Debug)]
struct UpdatePlan {
    info: OutputInformation,
    index_matrix: IndexMatrix,
    settings: SamplerSettings,
    mode: InterpolationMode,
    slab: SlabSettings,
    use_permute: bool,
}

/// Resampling of a volume through reslice axes and a reslice transform.
///
/// ```
/// use volreslice::{Extent, InterpolationMode, Reslice, Volume};
///
/// let input = Volume::from_fn(Extent::new(0, 3, 0, 3, 0, 0), 1, |x, y, _, _| (10 * x + y) as u8).unwrap();
/// let reslice = Reslice::new()
///     .with_axes_direction_cosines([0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0])
///     .with_interpolation_mode(InterpolationMode::Nearest);
/// let output = reslice.execute(&input).unwrap();
/// // output (x, y) reads input (3 - y, x)
/// assert_eq!(output.volume.get::<u8>(1, 1, 0, 0), Some(21));
/// ```
#[derive(Debug, Clone)]
pub struct Reslice {
    reslice_axes: Option<Matrix4<f64>>,
    transform: Option<Arc<dyn ResliceTransform>>,
    interpolator: Arc<dyn Interpolator>,
    output_spacing: Option<[f64; 3]>,
    output_origin: Option<[f64; 3]>,
    output_direction: Option<Matrix3<f64>>,
    output_extent: Option<Extent>,
    output_dimensionality: usize,
    transform_input_sampling: bool,
    auto_crop_output: bool,
    wrap: bool,
    mirror: bool,
    border: bool,
    border_thickness: f64,
    slab: SlabSettings,
    scalar_shift: f64,
    scalar_scale: f64,
    output_scalar_type: Option<ScalarType>,
    background: [f64; 4],
    optimization: bool,
    generate_stencil_output: bool,
    stencil: Option<Arc<ImageStencil>>,
    cache: IndexMatrixCache,
}

impl Default for Reslice {
    fn default() -> Self {
        Self {
            reslice_axes: None,
            transform: None,
            interpolator: Arc::new(ImageInterpolator::default()),
            output_spacing: None,
            output_origin: None,
            output_direction: None,
            output_extent: None,
            output_dimensionality: 3,
            transform_input_sampling: true,
            auto_crop_output: false,
            wrap: false,
            mirror: false,
            border: true,
            border_thickness: 0.5,
            slab: SlabSettings::default(),
            scalar_shift: 0.0,
            scalar_scale: 1.0,
            output_scalar_type: None,
            background: [0.0; 4],
            optimization: true,
            generate_stencil_output: false,
            stencil: None,
            cache: IndexMatrixCache::default(),
        }
    }
}

impl Reslice {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- reslice axes and transform -----

    /// Matrix whose columns are the output x, y and z axes and whose last
    /// column is the origin, in the input's physical frame.
    pub fn with_reslice_axes(mut self, axes: Matrix4<f64>) -> Self {
        self.set_reslice_axes(Some(axes));
        self
    }

    pub fn set_reslice_axes(&mut self, axes: Option<Matrix4<f64>>) {
        self.reslice_axes = axes;
    }

    pub fn reslice_axes(&self) -> Option<&Matrix4<f64>> {
        self.reslice_axes.as_ref()
    }

    /// Set the three axis directions of the reslice axes, keeping the origin.
    pub fn with_axes_direction_cosines(mut self, x: [f64; 3], y: [f64; 3], z: [f64; 3]) -> Self {
        self.set_axes_direction_cosines(x, y, z);
        self
    }

    pub fn set_axes_direction_cosines(&mut self, x: [f64; 3], y: [f64; 3], z: [f64; 3]) {
        let origin = self.axes_origin();
        self.reslice_axes = Some(axes_matrix(x, y, z, origin));
    }

    /// Set the origin of the reslice axes, keeping the directions.
    pub fn with_axes_origin(mut self, origin: [f64; 3]) -> Self {
        self.set_axes_origin(origin);
        self
    }

    pub fn set_axes_origin(&mut self, origin: [f64; 3]) {
        let axes = self.reslice_axes.get_or_insert_with(Matrix4::identity);
        for (i, o) in origin.iter().enumerate() {
            axes[(i, 3)] = *o;
        }
    }

    /// Direction cosines of the reslice axes (identity when unset).
    pub fn axes_direction_cosines(&self) -> [[f64; 3]; 3] {
        let m = self.reslice_axes.unwrap_or_else(Matrix4::identity);
        let mut axes = [[0.0; 3]; 3];
        for (j, axis) in axes.iter_mut().enumerate() {
            for (i, a) in axis.iter_mut().enumerate() {
                *a = m[(i, j)];
            }
        }
        axes
    }

    pub fn axes_origin(&self) -> [f64; 3] {
        match &self.reslice_axes {
            Some(m) => [m[(0, 3)], m[(1, 3)], m[(2, 3)]],
            None => [0.0; 3],
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn ResliceTransform>) -> Self {
        self.set_transform(Some(transform));
        self
    }

    pub fn set_transform(&mut self, transform: Option<Arc<dyn ResliceTransform>>) {
        self.transform = transform;
    }

    // ----- interpolation -----

    pub fn with_interpolator(mut self, interpolator: Arc<dyn Interpolator>) -> Self {
        self.set_interpolator(interpolator);
        self
    }

    pub fn set_interpolator(&mut self, interpolator: Arc<dyn Interpolator>) {
        self.interpolator = interpolator;
    }

    /// Use the stock image interpolator with the given mode.
    pub fn with_interpolation_mode(mut self, mode: InterpolationMode) -> Self {
        self.set_interpolation_mode(mode);
        self
    }

    pub fn set_interpolation_mode(&mut self, mode: InterpolationMode) {
        self.interpolator = Arc::new(ImageInterpolator::new(mode));
    }

    pub fn interpolation_mode(&self) -> InterpolationMode {
        self.interpolator.interpolation_mode()
    }

    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn set_wrap(&mut self, wrap: bool) {
        self.wrap = wrap;
    }

    /// Mirror takes precedence over wrap.
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn set_mirror(&mut self, mirror: bool) {
        self.mirror = mirror;
    }

    /// Accept samples up to `border_thickness` beyond the input extent.
    pub fn with_border(mut self, border: bool) -> Self {
        self.border = border;
        self
    }

    pub fn set_border(&mut self, border: bool) {
        self.border = border;
    }

    pub fn with_border_thickness(mut self, thickness: f64) -> Self {
        self.border_thickness = thickness;
        self
    }

    pub fn set_border_thickness(&mut self, thickness: f64) {
        self.border_thickness = thickness;
    }

    pub fn border_mode(&self) -> BorderMode {
        if self.mirror {
            BorderMode::Mirror
        } else if self.wrap {
            BorderMode::Repeat
        } else {
            BorderMode::Clamp
        }
    }

    // ----- output geometry -----

    pub fn with_output_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.set_output_spacing(Some(spacing));
        self
    }

    pub fn set_output_spacing(&mut self, spacing: Option<[f64; 3]>) {
        self.output_spacing = spacing;
    }

    pub fn with_output_origin(mut self, origin: [f64; 3]) -> Self {
        self.set_output_origin(Some(origin));
        self
    }

    pub fn set_output_origin(&mut self, origin: Option<[f64; 3]>) {
        self.output_origin = origin;
    }

    pub fn with_output_direction(mut self, direction: Matrix3<f64>) -> Self {
        self.set_output_direction(Some(direction));
        self
    }

    pub fn set_output_direction(&mut self, direction: Option<Matrix3<f64>>) {
        self.output_direction = direction;
    }

    pub fn with_output_extent(mut self, extent: Extent) -> Self {
        self.set_output_extent(Some(extent));
        self
    }

    pub fn set_output_extent(&mut self, extent: Option<Extent>) {
        self.output_extent = extent;
    }

    /// Number of output axes (1 to 3); higher axes collapse to one slice.
    pub fn with_output_dimensionality(mut self, dimensionality: usize) -> Self {
        self.output_dimensionality = dimensionality;
        self
    }

    pub fn set_output_dimensionality(&mut self, dimensionality: usize) {
        self.output_dimensionality = dimensionality;
    }

    /// Derive output spacing and extent from the input sampling rotated
    /// into the output frame.
    pub fn with_transform_input_sampling(mut self, on: bool) -> Self {
        self.transform_input_sampling = on;
        self
    }

    pub fn set_transform_input_sampling(&mut self, on: bool) {
        self.transform_input_sampling = on;
    }

    /// Size the output to the bounding box of the transformed input.
    pub fn with_auto_crop_output(mut self, on: bool) -> Self {
        self.auto_crop_output = on;
        self
    }

    pub fn set_auto_crop_output(&mut self, on: bool) {
        self.auto_crop_output = on;
    }

    // ----- slab -----

    pub fn with_slab(mut self, slab: SlabSettings) -> Self {
        self.slab = slab;
        self
    }

    pub fn set_slab(&mut self, slab: SlabSettings) {
        self.slab = slab;
    }

    pub fn with_slab_number_of_slices(mut self, count: usize) -> Self {
        self.slab.count = count;
        self
    }

    pub fn with_slab_mode(mut self, mode: SlabMode) -> Self {
        self.slab.mode = mode;
        self
    }

    pub fn with_slab_trapezoid_integration(mut self, on: bool) -> Self {
        self.slab.trapezoid = on;
        self
    }

    pub fn with_slab_slice_spacing_fraction(mut self, fraction: f64) -> Self {
        self.slab.spacing_fraction = fraction;
        self
    }

    pub fn slab(&self) -> &SlabSettings {
        &self.slab
    }

    // ----- scalars -----

    /// Rescale interpolated values as `(v + shift) * scale`.
    pub fn with_scalar_shift(mut self, shift: f64) -> Self {
        self.scalar_shift = shift;
        self
    }

    pub fn set_scalar_shift(&mut self, shift: f64) {
        self.scalar_shift = shift;
    }

    pub fn with_scalar_scale(mut self, scale: f64) -> Self {
        self.scalar_scale = scale;
        self
    }

    pub fn set_scalar_scale(&mut self, scale: f64) {
        self.scalar_scale = scale;
    }

    pub fn with_output_scalar_type(mut self, scalar_type: ScalarType) -> Self {
        self.set_output_scalar_type(Some(scalar_type));
        self
    }

    pub fn set_output_scalar_type(&mut self, scalar_type: Option<ScalarType>) {
        self.output_scalar_type = scalar_type;
    }

    /// Colour of voxels that receive no sample.
    pub fn with_background_color(mut self, color: [f64; 4]) -> Self {
        self.background = color;
        self
    }

    pub fn set_background_color(&mut self, color: [f64; 4]) {
        self.background = color;
    }

    /// Background colour with every component set to `level`.
    pub fn with_background_level(self, level: f64) -> Self {
        self.with_background_color([level; 4])
    }

    pub fn background_color(&self) -> [f64; 4] {
        self.background
    }

    // ----- execution switches -----

    /// Allow the permuted executor and its nearest-neighbour downgrade.
    pub fn with_optimization(mut self, on: bool) -> Self {
        self.optimization = on;
        self
    }

    pub fn set_optimization(&mut self, on: bool) {
        self.optimization = on;
    }

    /// Report which output voxels received sampled data.
    pub fn with_generate_stencil_output(mut self, on: bool) -> Self {
        self.generate_stencil_output = on;
        self
    }

    pub fn set_generate_stencil_output(&mut self, on: bool) {
        self.generate_stencil_output = on;
    }

    /// Only resample output voxels inside `stencil`.
    pub fn with_stencil(mut self, stencil: ImageStencil) -> Self {
        self.set_stencil(Some(stencil));
        self
    }

    pub fn set_stencil(&mut self, stencil: Option<ImageStencil>) {
        self.stencil = stencil.map(Arc::new);
    }

    /// Drop the memoized index matrix.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ----- update -----

    fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.output_dimensionality) {
            return Err(ResliceError::config(format!(
                "output dimensionality must be 1, 2 or 3, got {}",
                self.output_dimensionality
            )));
        }
        if let Some(axes) = &self.reslice_axes {
            if axes.iter().any(|v| !v.is_finite()) {
                return Err(ResliceError::config("reslice axes contain non-finite values"));
            }
        }
        if let Some(spacing) = &self.output_spacing {
            if spacing.iter().any(|s| *s == 0.0 || !s.is_finite()) {
                return Err(ResliceError::config(format!("invalid output spacing {spacing:?}")));
            }
        }
        let fraction = self.slab.spacing_fraction;
        if !(fraction.is_finite() && fraction > 0.0) {
            return Err(ResliceError::config(format!("invalid slab spacing fraction {fraction}")));
        }
        Ok(())
    }

    fn effective_slab(&self) -> SlabSettings {
        let mut slab = self.slab;
        if slab.count == 0 {
            warn!("slab number of slices is 0, using 1");
            slab.count = 1;
        }
        slab
    }

    /// Output bounds of the input corners pushed through the inverse
    /// transform and inverse reslice axes, in the output frame.
    fn auto_cropped_bounds(&self, input: &VolumeInfo, out_direction: &Matrix3<f64>) -> Result<[f64; 6]> {
        let axes_inverse = match &self.reslice_axes {
            Some(axes) => axes
                .try_inverse()
                .ok_or_else(|| ResliceError::config("reslice axes are not invertible"))?,
            None => Matrix4::identity(),
        };
        let inverse = match &self.transform {
            Some(t) => Some(
                t.inverse()
                    .ok_or_else(|| ResliceError::config("auto-crop needs an invertible reslice transform"))?,
            ),
            None => None,
        };
        let direction_inverse = invert_direction(out_direction);
        let geometry = &input.geometry;
        let ext = &input.extent;

        let mut bounds = [f64::MAX, f64::MIN, f64::MAX, f64::MIN, f64::MAX, f64::MIN];
        for corner in 0..8 {
            let index = Vector3::new(
                ext.0[corner % 2] as f64 * geometry.spacing[0],
                ext.0[2 + (corner / 2) % 2] as f64 * geometry.spacing[1],
                ext.0[4 + (corner / 4) % 2] as f64 * geometry.spacing[2],
            );
            let p = geometry.direction * index + Vector3::from(geometry.origin);
            let mut point = [p[0], p[1], p[2]];
            if let Some(t) = &inverse {
                point = t.transform_point(point);
            }
            let mut h = axes_inverse * Vector4::new(point[0], point[1], point[2], 1.0);
            let f = 1.0 / h[3];
            h[0] *= f;
            h[1] *= f;
            h[2] *= f;
            let p = direction_inverse * Vector3::new(h[0], h[1], h[2]);
            for j in 0..3 {
                bounds[2 * j] = bounds[2 * j].min(p[j]);
                bounds[2 * j + 1] = bounds[2 * j + 1].max(p[j]);
            }
        }
        Ok(bounds)
    }

    /// Output extent, geometry, scalar type and component count for an
    /// input described by `input`.
    pub fn output_information(&self, input: &VolumeInfo) -> Result<OutputInformation> {
        self.validate()?;
        let in_ext = &input.extent;
        let in_geo = &input.geometry;
        let out_direction = self.output_direction.unwrap_or(in_geo.direction);

        let mut center = Vector3::zeros();
        for i in 0..3 {
            center[i] = 0.5 * (in_ext.min(i) + in_ext.max(i)) as f64 * in_geo.spacing[i];
        }
        let mut center = in_geo.direction * center + Vector3::from(in_geo.origin);

        let mut spacing = [0.0; 3];
        let mut extent = [0i32; 6];
        if self.transform_input_sampling {
            let mut rotation = out_direction;
            if let Some(axes) = &self.reslice_axes {
                let axes_rotation: Matrix3<f64> = axes.fixed_view::<3, 3>(0, 0).into_owned();
                rotation = axes_rotation * rotation;
                center -= Vector3::new(axes[(0, 3)], axes[(1, 3)], axes[(2, 3)]);
                center = invert_direction(&axes_rotation) * center;
            }
            rotation = invert_direction(&in_geo.direction) * rotation;

            for i in 0..3 {
                let (mut s, mut d, mut e, mut r) = (0.0, 0.0, 0.0, 0.0);
                for j in 0..3 {
                    let tmp = rotation[(j, i)] * rotation[(j, i)];
                    s += tmp * in_geo.spacing[j].abs();
                    d += tmp * (in_ext.max(j) - in_ext.min(j)) as f64 * in_geo.spacing[j].abs();
                    e += tmp * in_ext.min(j) as f64;
                    r += tmp;
                }
                s /= r;
                d /= r * r.sqrt();
                e /= r;
                if let Some(user) = &self.output_spacing {
                    s = user[i];
                }
                spacing[i] = s;
                extent[2 * i] = round_index(e);
                extent[2 * i + 1] = round_index(extent[2 * i] as f64 + (d / s).abs());
            }
        } else {
            spacing = in_geo.spacing;
            extent = in_ext.0;
        }

        let bounds = if self.auto_crop_output {
            let bounds = self.auto_cropped_bounds(input, &out_direction)?;
            for i in 0..3 {
                let d = bounds[2 * i + 1] - bounds[2 * i];
                let s = self.output_spacing.map_or(spacing[i], |user| user[i]);
                extent[2 * i + 1] = round_index(extent[2 * i] as f64 + (d / s).abs());
            }
            Some(bounds)
        } else {
            None
        };

        let mut p_center = Vector3::zeros();
        for i in 0..3 {
            if let Some(user) = &self.output_spacing {
                spacing[i] = user[i];
            }
            if i >= self.output_dimensionality {
                extent[2 * i] = 0;
                extent[2 * i + 1] = 0;
            } else if let Some(user) = &self.output_extent {
                extent[2 * i] = user.min(i);
                extent[2 * i + 1] = user.max(i);
            }
            p_center[i] = 0.5 * (extent[2 * i] + extent[2 * i + 1]) as f64 * spacing[i];
        }
        if spacing.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(ResliceError::config(format!("output spacing {spacing:?} is degenerate")));
        }
        let p_center = out_direction * p_center;

        let mut origin = [0.0; 3];
        for i in 0..3 {
            origin[i] = if i >= self.output_dimensionality {
                0.0
            } else if let Some(user) = &self.output_origin {
                user[i]
            } else if let Some(b) = &bounds {
                let x = b[0] - extent[0] as f64 * spacing[0];
                let y = b[2] - extent[2] as f64 * spacing[1];
                let z = b[4] - extent[4] as f64 * spacing[2];
                x * out_direction[(i, 0)] + y * out_direction[(i, 1)] + z * out_direction[(i, 2)]
            } else {
                center[i] - p_center[i]
            };
        }

        Ok(OutputInformation {
            extent: Extent(extent),
            geometry: Geometry {
                spacing,
                origin,
                direction: out_direction,
            },
            scalar_type: self.output_scalar_type.unwrap_or(input.scalar_type),
            components: self.interpolator.number_of_components(input.components),
        })
    }

    /// Index matrix for an input described by `input`.
    pub fn index_matrix(&self, input: &VolumeInfo) -> Result<IndexMatrix> {
        let info = self.output_information(input)?;
        Ok(self.build_matrix(input, &info))
    }

    fn build_matrix(&self, input: &VolumeInfo, info: &OutputInformation) -> IndexMatrix {
        self.cache.get_or_build(
            &input.geometry,
            &info.geometry,
            self.reslice_axes.as_ref(),
            self.transform.as_ref(),
        )
    }

    fn plan(&self, input: &VolumeInfo) -> Result<UpdatePlan> {
        let info = self.output_information(input)?;
        let index_matrix = self.build_matrix(input, &info);
        let slab = self.effective_slab();

        let mut mode = self.interpolator.interpolation_mode();
        let mut use_permute = false;
        if self.optimization
            && index_matrix.is_linear()
            && slab.spacing_fraction == 1.0
            && self.interpolator.is_separable()
            && is_permutation_matrix(index_matrix.matrix())
        {
            use_permute = true;
            if can_use_nearest_neighbor(index_matrix.matrix(), &info.extent) {
                mode = InterpolationMode::Nearest;
            }
        }

        let border = self.border_mode();
        let mut tolerance = if self.border { self.border_thickness } else { 0.0 };
        if border != BorderMode::Clamp {
            tolerance = 2.0 * i32::MAX as f64;
        }
        let tolerance = tolerance.max(FLOOR_TOLERANCE);

        debug!(
            permute = use_permute,
            mode = mode.name(),
            identity = index_matrix.is_identity(),
            "reslice update planned"
        );

        Ok(UpdatePlan {
            info,
            index_matrix,
            settings: SamplerSettings {
                mode: Some(mode),
                border,
                tolerance,
            },
            mode,
            slab,
            use_permute,
        })
    }

    fn request(&self, input: &VolumeInfo, plan: &UpdatePlan, out_ext: &Extent) -> InputRequest {
        let matrix = plan.index_matrix.is_linear().then(|| plan.index_matrix.matrix());
        let support = self.interpolator.support_size(plan.mode, matrix);
        infer_input_extent(
            out_ext,
            &plan.index_matrix,
            support,
            &plan.slab,
            &input.extent,
            self.wrap || self.mirror,
        )
    }

    /// Input extent needed to produce the whole output.
    pub fn request_input_extent(&self, input: &VolumeInfo) -> Result<InputRequest> {
        let plan = self.plan(input)?;
        let out_ext = plan.info.extent;
        Ok(self.request(input, &plan, &out_ext))
    }

    /// Input extent needed to produce `out_ext` of the output.
    pub fn request_input_extent_for(&self, input: &VolumeInfo, out_ext: &Extent) -> Result<InputRequest> {
        let plan = self.plan(input)?;
        Ok(self.request(input, &plan, out_ext))
    }

    /// Resample the whole output.
    pub fn execute(&self, input: &Volume) -> Result<ResliceOutput> {
        let plan = self.plan(&input.info())?;
        let extent = plan.info.extent;
        self.run(input, &plan, extent)
    }

    /// Resample only `extent`, which must lie inside the output whole extent.
    pub fn execute_extent(&self, input: &Volume, extent: Extent) -> Result<ResliceOutput> {
        let plan = self.plan(&input.info())?;
        if !plan.info.extent.contains_extent(&extent) {
            return Err(ResliceError::config(format!(
                "requested extent {:?} is outside the output extent {:?}",
                extent.0, plan.info.extent.0
            )));
        }
        self.run(input, &plan, extent)
    }

    fn run(&self, input: &Volume, plan: &UpdatePlan, extent: Extent) -> Result<ResliceOutput> {
        let info = &plan.info;
        let request = self.request(&input.info(), plan, &extent);
        let sampler = self.interpolator.bind(input, &plan.settings)?;

        let ctx = ExecuteContext {
            input,
            sampler: sampler.as_ref(),
            index_matrix: &plan.index_matrix,
            stencil: self.stencil.as_deref(),
            slab: plan.slab,
            scalar_shift: self.scalar_shift,
            scalar_scale: self.scalar_scale,
            background: self.background,
            border: self.border,
            generate_stencil: self.generate_stencil_output,
        };

        let strategy = if !request.hit_input_extent || input.extent().is_empty() {
            debug!("output does not overlap the input, filling with background");
            Strategy::Clear
        } else if plan.use_permute {
            Strategy::Permute(PermutePlan::new(
                ctx.sampler,
                plan.index_matrix.matrix(),
                &extent,
                &plan.slab,
                ctx.rescales(),
                input.scalar_type(),
                info.scalar_type,
            ))
        } else {
            Strategy::General
        };

        let nc = info.components;
        let (volume, spans) = crate::with_scalar_type!(info.scalar_type, U => {
            let (data, spans) = run_chunks::<U>(&ctx, &strategy, extent, nc);
            (Volume::new(extent, nc, data)?.with_geometry(info.geometry), spans)
        });

        let stencil = self
            .generate_stencil_output
            .then(|| ImageStencil::from_spans(extent, spans));
        Ok(ResliceOutput { volume, stencil })
    }
}

/// Allocate the output and run `strategy` over z slices, or over rows when
/// the output is a single slice.
fn run_chunks<U: Scalar>(
    ctx: &ExecuteContext<'_>,
    strategy: &Strategy,
    extent: Extent,
    nc: usize,
) -> (Vec<U>, Vec<StencilSpan>) {
    let [nx, ny, nz] = extent.dims();
    let mut data = vec![U::default(); nx * ny * nz * nc];
    if data.is_empty() {
        return (data, Vec::new());
    }

    let split_z = nz > 1;
    let chunk_len = if split_z { nx * ny * nc } else { nx * nc };
    debug!(chunks = data.len() / chunk_len, split_z, "resampling output");

    let work = |(i, slice): (usize, &mut [U])| -> Vec<StencilSpan> {
        let mut sub = extent;
        let axis = if split_z { 2 } else { 1 };
        sub.0[2 * axis] = extent.min(axis) + i as i32;
        sub.0[2 * axis + 1] = sub.0[2 * axis];
        trace!(extent = ?sub.0, "chunk");

        let mut chunk = OutputChunk {
            extent: sub,
            components: nc,
            data: slice,
        };
        let mut spans = Vec::new();
        execute_chunk(ctx, strategy, &mut chunk, &mut spans);
        spans
    };

    #[cfg(feature = "parallel")]
    let per_chunk: Vec<Vec<StencilSpan>> = {
        use rayon::prelude::*;
        data.par_chunks_mut(chunk_len).enumerate().map(work).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let per_chunk: Vec<Vec<StencilSpan>> = data.chunks_mut(chunk_len).enumerate().map(work).collect();

    let spans = per_chunk.into_iter().flatten().collect();
    (data, spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{FnTransform, HomogeneousTransform};
    use approx::assert_relative_eq;

    fn ramp_u8() -> Volume {
        Volume::from_fn(Extent::new(0, 3, 0, 3, 0, 0), 1, |x, y, _, _| (10 * x + y) as u8).unwrap()
    }

    #[test]
    fn test_default_output_information_matches_input() {
        let input = Volume::from_fn(Extent::new(2, 9, 0, 4, 1, 3), 2, |_, _, _, _| 0i16)
            .unwrap()
            .with_spacing([0.5, 1.0, 2.0])
            .with_origin([1.0, 2.0, 3.0]);
        let info = Reslice::new().output_information(&input.info()).unwrap();
        assert_eq!(info.extent, input.extent());
        assert_eq!(info.geometry.spacing, [0.5, 1.0, 2.0]);
        for i in 0..3 {
            assert_relative_eq!(info.geometry.origin[i], input.origin()[i], epsilon = 1e-12);
        }
        assert_eq!(info.scalar_type, ScalarType::I16);
        assert_eq!(info.components, 2);
    }

    #[test]
    fn test_rotated_axes_swap_spacing_and_extent() {
        let input = Volume::zeros(ScalarType::F32, Extent::new(0, 9, 0, 4, 0, 0), 1)
            .unwrap()
            .with_spacing([1.0, 2.0, 1.0]);
        let reslice = Reslice::new().with_axes_direction_cosines([0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        let info = reslice.output_information(&input.info()).unwrap();
        assert_eq!(info.geometry.spacing, [2.0, 1.0, 1.0]);
        assert_eq!(info.extent, Extent::new(0, 4, 0, 9, 0, 0));
    }

    #[test]
    fn test_dimensionality_and_user_overrides() {
        let input = Volume::zeros(ScalarType::U8, Extent::new(0, 9, 0, 9, 0, 9), 1).unwrap();
        let info = Reslice::new()
            .with_output_dimensionality(2)
            .with_output_extent(Extent::new(0, 4, 0, 4, 3, 7))
            .with_output_spacing([2.0, 2.0, 2.0])
            .with_output_scalar_type(ScalarType::F64)
            .output_information(&input.info())
            .unwrap();
        assert_eq!(info.extent, Extent::new(0, 4, 0, 4, 0, 0));
        assert_eq!(info.geometry.origin[2], 0.0);
        assert_eq!(info.scalar_type, ScalarType::F64);
        // centred on the input centre (4.5, 4.5)
        assert_relative_eq!(info.geometry.origin[0], 0.5);
    }

    #[test]
    fn test_invalid_configuration() {
        let input = ramp_u8();
        let err = Reslice::new().with_output_spacing([1.0, 0.0, 1.0]).execute(&input);
        assert!(matches!(err, Err(ResliceError::InvalidConfiguration(_))));
        let err = Reslice::new().with_output_dimensionality(4).execute(&input);
        assert!(matches!(err, Err(ResliceError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_auto_crop_covers_translated_input() {
        let input = Volume::zeros(ScalarType::F32, Extent::new(0, 4, 0, 4, 0, 0), 1).unwrap();
        let reslice = Reslice::new()
            .with_transform(Arc::new(HomogeneousTransform::translation([10.0, 0.0, 0.0])))
            .with_auto_crop_output(true);
        let info = reslice.output_information(&input.info()).unwrap();
        assert_eq!(info.extent, Extent::new(0, 4, 0, 4, 0, 0));
        assert_relative_eq!(info.geometry.origin[0], -10.0);
    }

    #[test]
    fn test_auto_crop_requires_inverse() {
        let input = ramp_u8();
        let reslice = Reslice::new()
            .with_transform(Arc::new(FnTransform::new(|p| p)))
            .with_auto_crop_output(true);
        assert!(reslice.execute(&input).is_err());
    }

    #[test]
    fn test_rotation_scenario() {
        let input = ramp_u8();
        let reslice = Reslice::new()
            .with_axes_direction_cosines([0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0])
            .with_interpolation_mode(InterpolationMode::Nearest)
            .with_generate_stencil_output(true);
        let output = reslice.execute(&input).unwrap();
        let volume = &output.volume;
        let ext = volume.extent();
        for y in ext.min(1)..=ext.max(1) {
            for x in ext.min(0)..=ext.max(0) {
                // output (x, y) sits at input (-y, x) relative to the origins
                let p = volume.geometry().index_to_physical([x as f64, y as f64, 0.0]);
                let (ix, iy) = (-p[1], p[0]);
                let expected = if (0.0..=3.0).contains(&ix) && (0.0..=3.0).contains(&iy) {
                    (10.0 * ix + iy) as u8
                } else {
                    0
                };
                assert_eq!(volume.get::<u8>(x, y, 0, 0), Some(expected), "at ({x}, {y})");
            }
        }
        assert_eq!(output.stencil.map(|s| s.count()), Some(16));
    }

    #[test]
    fn test_no_overlap_fills_background() {
        let input = ramp_u8();
        let reslice = Reslice::new()
            .with_output_origin([100.0, 100.0, 0.0])
            .with_background_level(9.0)
            .with_generate_stencil_output(true);
        let output = reslice.execute(&input).unwrap();
        assert!(output.volume.as_slice::<u8>().unwrap().iter().all(|&v| v == 9));
        assert_eq!(output.stencil.map(|s| s.count()), Some(0));
    }

    #[test]
    fn test_execute_extent_fills_sub_region() {
        let input = Volume::from_fn(Extent::new(0, 7, 0, 7, 0, 3), 1, |x, y, z, _| (x + 8 * y + 64 * z) as u16).unwrap();
        let reslice = Reslice::new();
        let full = reslice.execute(&input).unwrap().volume;
        let sub = Extent::new(2, 5, 1, 6, 1, 2);
        let part = reslice.execute_extent(&input, sub).unwrap().volume;
        assert_eq!(part.extent(), sub);
        for z in 1..=2 {
            for y in 1..=6 {
                for x in 2..=5 {
                    assert_eq!(part.get::<u16>(x, y, z, 0), full.get::<u16>(x, y, z, 0));
                }
            }
        }
        assert!(reslice.execute_extent(&input, Extent::new(0, 8, 0, 0, 0, 0)).is_err());
    }

    #[test]
    fn test_request_input_extent_for_sub_region() {
        let input = Volume::zeros(ScalarType::F32, Extent::new(0, 19, 0, 19, 0, 9), 1).unwrap();
        let reslice = Reslice::new().with_optimization(false);
        let request = reslice
            .request_input_extent_for(&input.info(), &Extent::new(4, 8, 0, 19, 2, 2))
            .unwrap();
        assert!(request.hit_input_extent);
        // integral matrix: support collapses to one voxel
        assert_eq!(request.extent, Extent::new(4, 8, 0, 19, 2, 2));
    }

    #[test]
    fn test_slab_count_zero_is_coerced() {
        let input = ramp_u8();
        let output = Reslice::new().with_slab_number_of_slices(0).execute(&input).unwrap();
        assert_eq!(output.volume, Reslice::new().execute(&input).unwrap().volume);
    }
}
