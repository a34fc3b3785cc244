//! Python bindings using PyO3

use std::sync::Arc;

use nalgebra::Matrix4;
use ndarray::{Array4, Axis};
use numpy::{IntoPyArray, PyReadonlyArray2, PyReadonlyArray3, PyReadonlyArray4};
use pyo3::exceptions::{PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::{
    f16, BorderMode, Extent, HomogeneousTransform, InterpolationMode, Reslice, ResliceError, Scalar, ScalarType,
    SlabMode, Volume,
};

// =============================================================================
// Helper functions
// =============================================================================

fn to_py_err(err: ResliceError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Convert any numpy array to a C-contiguous float64 array
fn to_float64_array<'py>(py: Python<'py>, array: &Bound<'py, PyAny>) -> PyResult<PyReadonlyArray2<'py, f64>> {
    let numpy = py.import("numpy")?;
    let kwargs = PyDict::new(py);
    kwargs.set_item("dtype", numpy.getattr("float64")?)?;
    kwargs.set_item("order", "C")?;

    let converted = numpy.call_method("asarray", (array,), Some(&kwargs))?;
    converted
        .extract()
        .map_err(|e| PyTypeError::new_err(format!("Failed to convert matrix to float64 array: {}", e)))
}

/// 4x4 matrix from a numpy array of any numeric dtype
fn to_matrix4<'py>(py: Python<'py>, array: &Bound<'py, PyAny>) -> PyResult<Matrix4<f64>> {
    let array = to_float64_array(py, array)?;
    let view = array.as_array();
    if view.dim() != (4, 4) {
        return Err(PyValueError::new_err("Matrix must be 4x4 homogeneous transformation matrix"));
    }
    Ok(Matrix4::from_fn(|i, j| view[[i, j]]))
}

fn get_dtype_name(array: &Bound<'_, PyAny>) -> PyResult<String> {
    array.getattr("dtype")?.getattr("name")?.extract()
}

/// Wrap a (z, y, x) or (z, y, x, c) numpy array.
fn volume_from_numpy<T: Scalar + numpy::Element>(array: &Bound<'_, PyAny>) -> PyResult<Volume> {
    let ndim: usize = array.getattr("ndim")?.extract()?;
    match ndim {
        3 => {
            let a: PyReadonlyArray3<'_, T> = array.extract()?;
            Ok(Volume::from_array3(a.as_array().to_owned()))
        }
        4 => {
            let a: PyReadonlyArray4<'_, T> = array.extract()?;
            Volume::from_array4(a.as_array().to_owned()).map_err(to_py_err)
        }
        _ => Err(PyValueError::new_err("Input must be a 3D (z, y, x) or 4D (z, y, x, c) array")),
    }
}

/// float16 input, read through a uint16 view of the same buffer
fn volume_from_numpy_f16(py: Python<'_>, array: &Bound<'_, PyAny>) -> PyResult<Volume> {
    let bits = array.call_method1("view", (py.import("numpy")?.getattr("uint16")?,))?;
    let bits = volume_from_numpy::<u16>(&bits)?;
    let values = bits.array::<u16>().map_err(to_py_err)?.mapv(f16::from_bits);
    let volume = Volume::from_array4(values).map_err(to_py_err)?;
    Ok(volume)
}

fn volume_to_numpy<'py, T: Scalar + numpy::Element>(
    py: Python<'py>,
    volume: &Volume,
    keep_components: bool,
) -> PyResult<Bound<'py, PyAny>> {
    let array: Array4<T> = volume.array::<T>().map_err(to_py_err)?.to_owned();
    if keep_components {
        Ok(array.into_pyarray(py).into_any())
    } else {
        Ok(array.index_axis_move(Axis(3), 0).into_pyarray(py).into_any())
    }
}

fn volume_to_numpy_f16<'py>(py: Python<'py>, volume: &Volume, keep_components: bool) -> PyResult<Bound<'py, PyAny>> {
    let bits = volume.array::<f16>().map_err(to_py_err)?.mapv(f16::to_bits);
    let result = if keep_components {
        bits.into_pyarray(py).into_any()
    } else {
        bits.index_axis_move(Axis(3), 0).into_pyarray(py).into_any()
    };
    result.call_method1("view", (py.import("numpy")?.getattr("float16")?,))
}

fn parse_mode(name: &str) -> PyResult<InterpolationMode> {
    match name {
        "nearest" => Ok(InterpolationMode::Nearest),
        "linear" => Ok(InterpolationMode::Linear),
        "cubic" => Ok(InterpolationMode::Cubic),
        _ => Err(PyValueError::new_err(format!(
            "Unknown interpolation '{}'. Expected nearest, linear or cubic",
            name
        ))),
    }
}

fn parse_border(name: &str) -> PyResult<BorderMode> {
    match name {
        "clamp" => Ok(BorderMode::Clamp),
        "repeat" | "wrap" => Ok(BorderMode::Repeat),
        "mirror" => Ok(BorderMode::Mirror),
        _ => Err(PyValueError::new_err(format!(
            "Unknown border mode '{}'. Expected clamp, repeat or mirror",
            name
        ))),
    }
}

fn parse_slab_mode(name: &str) -> PyResult<SlabMode> {
    match name {
        "min" => Ok(SlabMode::Min),
        "max" => Ok(SlabMode::Max),
        "mean" => Ok(SlabMode::Mean),
        "sum" => Ok(SlabMode::Sum),
        _ => Err(PyValueError::new_err(format!(
            "Unknown slab mode '{}'. Expected min, max, mean or sum",
            name
        ))),
    }
}

// =============================================================================
// Build Info
// =============================================================================

/// Get build and runtime information
///
/// Returns a dictionary with:
/// - version: Package version
/// - simd: Dict of available SIMD features (avx2)
/// - parallel: Whether parallel processing is enabled
/// - num_threads: Worker threads available
#[pyfunction]
fn build_info(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let info = PyDict::new(py);
    info.set_item("version", env!("CARGO_PKG_VERSION"))?;

    let simd = PyDict::new(py);
    #[cfg(target_arch = "x86_64")]
    simd.set_item("avx2", is_x86_feature_detected!("avx2"))?;
    #[cfg(not(target_arch = "x86_64"))]
    simd.set_item("avx2", false)?;
    info.set_item("simd", simd)?;

    #[cfg(feature = "parallel")]
    {
        info.set_item("parallel", true)?;
        info.set_item("num_threads", rayon::current_num_threads())?;
    }
    #[cfg(not(feature = "parallel"))]
    {
        info.set_item("parallel", false)?;
        info.set_item("num_threads", 1)?;
    }

    let dtypes: Vec<&str> = ScalarType::ALL.iter().map(|t| t.name()).collect();
    info.set_item("dtypes", dtypes)?;

    Ok(info)
}

// =============================================================================
// Reslice
// =============================================================================

/// Resample a volume through reslice axes and an optional 4x4 transform
///
/// Args:
///     input: 3D (z, y, x) or 4D (z, y, x, c) numpy array of any numeric dtype
///     axes: Optional 4x4 reslice-axes matrix (columns: x, y, z axis, origin)
///     transform: Optional 4x4 homogeneous transform applied after the axes
///     spacing: Input spacing (x, y, z) (default: 1)
///     origin: Input origin (x, y, z) (default: 0)
///     output_spacing: Optional output spacing (x, y, z)
///     output_origin: Optional output origin (x, y, z)
///     output_shape: Optional output shape (z, y, x)
///     interpolation: "nearest", "linear" (default) or "cubic"
///     border_mode: "clamp" (default), "repeat" or "mirror"
///     background: Value for voxels outside the input (default: 0.0)
///     slab_count: Samples composited per output voxel (default: 1)
///     slab_mode: "min", "max", "mean" (default) or "sum"
///     output_dtype: Optional output dtype name (default: input dtype)
///
/// Returns:
///     Resliced array with the same number of dimensions as the input
#[pyfunction]
#[pyo3(signature = (
    input,
    axes=None,
    transform=None,
    spacing=None,
    origin=None,
    output_spacing=None,
    output_origin=None,
    output_shape=None,
    interpolation="linear",
    border_mode="clamp",
    background=0.0,
    slab_count=1,
    slab_mode="mean",
    output_dtype=None,
))]
#[allow(clippy::too_many_arguments)]
fn reslice<'py>(
    py: Python<'py>,
    input: &Bound<'py, PyAny>,
    axes: Option<&Bound<'py, PyAny>>,
    transform: Option<&Bound<'py, PyAny>>,
    spacing: Option<[f64; 3]>,
    origin: Option<[f64; 3]>,
    output_spacing: Option<[f64; 3]>,
    output_origin: Option<[f64; 3]>,
    output_shape: Option<(usize, usize, usize)>,
    interpolation: &str,
    border_mode: &str,
    background: f64,
    slab_count: usize,
    slab_mode: &str,
    output_dtype: Option<&str>,
) -> PyResult<Bound<'py, PyAny>> {
    let dtype_name = get_dtype_name(input)?;
    let input_type = ScalarType::from_name(&dtype_name).ok_or_else(|| {
        PyTypeError::new_err(format!("Unsupported dtype '{}'", dtype_name))
    })?;
    let output_type = match output_dtype {
        Some(name) => ScalarType::from_name(name)
            .ok_or_else(|| PyTypeError::new_err(format!("Unsupported output dtype '{}'", name)))?,
        None => input_type,
    };
    let keep_components: bool = input.getattr("ndim")?.extract::<usize>()? == 4;

    let volume = match input_type {
        ScalarType::F16 => volume_from_numpy_f16(py, input)?,
        ScalarType::I8 => volume_from_numpy::<i8>(input)?,
        ScalarType::U8 => volume_from_numpy::<u8>(input)?,
        ScalarType::I16 => volume_from_numpy::<i16>(input)?,
        ScalarType::U16 => volume_from_numpy::<u16>(input)?,
        ScalarType::I32 => volume_from_numpy::<i32>(input)?,
        ScalarType::U32 => volume_from_numpy::<u32>(input)?,
        ScalarType::I64 => volume_from_numpy::<i64>(input)?,
        ScalarType::U64 => volume_from_numpy::<u64>(input)?,
        ScalarType::F32 => volume_from_numpy::<f32>(input)?,
        ScalarType::F64 => volume_from_numpy::<f64>(input)?,
    };
    let volume = volume
        .with_spacing(spacing.unwrap_or([1.0; 3]))
        .with_origin(origin.unwrap_or([0.0; 3]));

    let border = parse_border(border_mode)?;
    let mut config = Reslice::new()
        .with_interpolation_mode(parse_mode(interpolation)?)
        .with_wrap(border == BorderMode::Repeat)
        .with_mirror(border == BorderMode::Mirror)
        .with_background_level(background)
        .with_slab_number_of_slices(slab_count)
        .with_slab_mode(parse_slab_mode(slab_mode)?)
        .with_output_scalar_type(output_type);
    if let Some(axes) = axes {
        config = config.with_reslice_axes(to_matrix4(py, axes)?);
    }
    if let Some(transform) = transform {
        config = config.with_transform(Arc::new(HomogeneousTransform::new(to_matrix4(py, transform)?)));
    }
    if let Some(s) = output_spacing {
        config = config.with_output_spacing(s);
    }
    if let Some(o) = output_origin {
        config = config.with_output_origin(o);
    }
    if let Some((nz, ny, nx)) = output_shape {
        config = config.with_output_extent(Extent::from_dims(nx, ny, nz));
    }

    let output = py.allow_threads(|| config.execute(&volume)).map_err(to_py_err)?;

    match output_type {
        ScalarType::F16 => volume_to_numpy_f16(py, &output.volume, keep_components),
        ScalarType::I8 => volume_to_numpy::<i8>(py, &output.volume, keep_components),
        ScalarType::U8 => volume_to_numpy::<u8>(py, &output.volume, keep_components),
        ScalarType::I16 => volume_to_numpy::<i16>(py, &output.volume, keep_components),
        ScalarType::U16 => volume_to_numpy::<u16>(py, &output.volume, keep_components),
        ScalarType::I32 => volume_to_numpy::<i32>(py, &output.volume, keep_components),
        ScalarType::U32 => volume_to_numpy::<u32>(py, &output.volume, keep_components),
        ScalarType::I64 => volume_to_numpy::<i64>(py, &output.volume, keep_components),
        ScalarType::U64 => volume_to_numpy::<u64>(py, &output.volume, keep_components),
        ScalarType::F32 => volume_to_numpy::<f32>(py, &output.volume, keep_components),
        ScalarType::F64 => volume_to_numpy::<f64>(py, &output.volume, keep_components),
    }
}

// =============================================================================
// Module registration
// =============================================================================

/// Resampling of 3D volumes through arbitrary transforms
///
/// Main function:
/// - reslice(): Auto-dispatches based on input dtype
///
/// Utilities:
/// - build_info(): Version, SIMD and threading information
#[pymodule]
fn volreslice(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(reslice, m)?)?;
    m.add_function(wrap_pyfunction!(build_info, m)?)?;
    Ok(())
}
