//! # Region of interest max pooling
//!
//! Every region is mapped to a pixel rectangle of the feature map, split into a fixed grid of
//! bins, and each bin keeps its maximum. Bins are computed with floor/ceil bounds and can
//! overlap, so the backward pass accumulates.
use alloc::{format, vec::Vec};
use ndarray::{Array3, Array4, ArrayView4, Axis, Ix3, Ix4};
use serde::{Deserialize, Serialize};

use super::RoiPoolOptions;
use crate::{FloatNdArrayElement, KernelError, NdArrayTensor, sharing::UnsafeSharedRef};

/// Marks a bin that covers no pixel of the feature map.
pub const EMPTY_BIN: i64 = -1;

/// A region `(x, y, w, h)` given as fractions of the feature map width and height.
#[derive(new, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiDescriptor<E> {
    /// Left edge, relative to the width.
    pub x: E,
    /// Top edge, relative to the height.
    pub y: E,
    /// Width, relative to the width.
    pub w: E,
    /// Height, relative to the height.
    pub h: E,
}

/// Pixel rectangle of a region, before the per-bin clipping.
///
/// The origin can lie outside the feature map, only the bins are clipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelRect {
    pub y0: i64,
    pub x0: i64,
    pub height: usize,
    pub width: usize,
}

impl<E: FloatNdArrayElement> RoiDescriptor<E> {
    /// Reads regions from a flat `[x, y, w, h, x, y, w, h, ...]` buffer.
    pub fn from_slice(values: &[E]) -> Result<Vec<Self>, KernelError> {
        if values.len() % 4 != 0 {
            return Err(KernelError::shape(format!(
                "Regions are groups of 4 values (x, y, w, h), got {} values",
                values.len()
            )));
        }

        Ok(values
            .chunks_exact(4)
            .map(|roi| Self::new(roi[0], roi[1], roi[2], roi[3]))
            .collect())
    }

    /// Maps the region to pixels of a `height` x `width` feature map.
    ///
    /// The origin is rounded, the extent is rounded and at least one pixel. The rectangle must
    /// stay within one feature map size of the feature map on every side.
    pub(crate) fn pixel_rect(
        &self,
        index: usize,
        height: usize,
        width: usize,
    ) -> Result<PixelRect, KernelError> {
        let Self { x, y, w, h } = *self;
        if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) {
            return Err(KernelError::invalid_roi(
                index,
                format!("coordinates must be finite, got ({x}, {y}, {w}, {h})"),
            ));
        }
        if w < E::zero() || h < E::zero() {
            return Err(KernelError::invalid_roi(
                index,
                format!("extent must not be negative, got w = {w}, h = {h}"),
            ));
        }

        let scale = |value: E, size: usize| {
            (value * E::from_elem(size as f64))
                .round_elem()
                .to_elem()
        };
        let (x0, roi_width) = (scale(x, width), scale(w, width).max(1.0));
        let (y0, roi_height) = (scale(y, height), scale(h, height).max(1.0));

        // Bounds the integer arithmetic below and in `PixelRect::bin`.
        let in_range = |start: f64, extent: f64, size: usize| {
            let size = size as f64;
            start >= -size && start + extent <= 2.0 * size
        };
        if !in_range(x0, roi_width, width) || !in_range(y0, roi_height, height) {
            return Err(KernelError::invalid_roi(
                index,
                format!(
                    "({x}, {y}, {w}, {h}) extends too far outside a {height}x{width} feature map"
                ),
            ));
        }
        let (x0, roi_width) = (x0 as i64, roi_width as usize);
        let (y0, roi_height) = (y0 as i64, roi_height as usize);

        let clipped_width = clip(x0 + roi_width as i64, width) - clip(x0, width);
        let clipped_height = clip(y0 + roi_height as i64, height) - clip(y0, height);
        if clipped_width == 0 || clipped_height == 0 {
            return Err(KernelError::invalid_roi(
                index,
                format!(
                    "({x}, {y}, {w}, {h}) covers no pixel of a {height}x{width} feature map"
                ),
            ));
        }

        let rect = PixelRect {
            y0,
            x0,
            height: roi_height,
            width: roi_width,
        };
        log::trace!("roi #{index} ({x}, {y}, {w}, {h}) -> {rect:?}");

        Ok(rect)
    }
}

impl PixelRect {
    /// Clipped `[start, end)` rows and columns of bin `(row, col)`.
    ///
    /// Bin bounds are `floor(i * extent / bins)` and `ceil((i + 1) * extent / bins)`, computed
    /// exactly with integers.
    fn bin(
        &self,
        [row, col]: [usize; 2],
        [rows, cols]: [usize; 2],
        [height, width]: [usize; 2],
    ) -> ([usize; 2], [usize; 2]) {
        let start = |i: usize, extent: usize, bins: usize| (i * extent / bins) as i64;
        let end = |i: usize, extent: usize, bins: usize| ((i + 1) * extent).div_ceil(bins) as i64;

        let h_range = [
            clip(self.y0 + start(row, self.height, rows), height),
            clip(self.y0 + end(row, self.height, rows), height),
        ];
        let w_range = [
            clip(self.x0 + start(col, self.width, cols), width),
            clip(self.x0 + end(col, self.width, cols), width),
        ];

        (h_range, w_range)
    }
}

fn clip(value: i64, size: usize) -> usize {
    value.clamp(0, size as i64) as usize
}

/// Output of [roi_pool2d_with_indices].
#[derive(new, Debug, Clone)]
pub struct RoiPool2dWithIndices<E> {
    /// Pooled values, `[num_rois, channels, rows, cols]`.
    pub output: NdArrayTensor<E>,
    /// Flat `h * width + w` index of the selected element of every bin, or [EMPTY_BIN].
    pub indices: NdArrayTensor<i64>,
}

/// Max-pools every region of `feature_map` into an `options.output_size` grid.
///
/// Ties keep the first element in row-major order, which makes the selected indices
/// deterministic. A bin clipped away entirely outputs zero and selects nothing.
///
/// # Shapes
///
/// - feature_map: `[channels, height, width]`
/// - output: `[num_rois, channels, rows, cols]`
/// - indices: `[num_rois, channels, rows, cols]`
pub fn roi_pool2d_with_indices<E: FloatNdArrayElement>(
    feature_map: &NdArrayTensor<E>,
    rois: &[RoiDescriptor<E>],
    options: &RoiPoolOptions,
) -> Result<RoiPool2dWithIndices<E>, KernelError> {
    let [channels, height, width] = feature_map.dims("feature_map")?;
    if channels == 0 || height == 0 || width == 0 {
        return Err(KernelError::shape(format!(
            "Feature map can't be empty, got shape {:?}",
            feature_map.shape()
        )));
    }
    let [rows, cols] = options.output_size;
    if rows == 0 || cols == 0 {
        return Err(KernelError::shape(format!(
            "Pooling grid must not be empty, got {:?}",
            options.output_size
        )));
    }

    let rects = rois
        .iter()
        .enumerate()
        .map(|(index, roi)| roi.pixel_rect(index, height, width))
        .collect::<Result<Vec<_>, _>>()?;
    let num_rois = rects.len();
    log::debug!(
        "roi_pool2d<{}> feature_map {:?} rois {num_rois} -> {:?}",
        E::dtype_name(),
        feature_map.shape(),
        [num_rois, channels, rows, cols]
    );

    let x = feature_map.view_dims::<Ix3>("feature_map")?;

    let mut output = Array4::<E>::zeros([num_rois, channels, rows, cols]);
    let mut indices = Array4::<i64>::from_elem([num_rois, channels, rows, cols], EMPTY_BIN);
    let unsafe_shared_out = UnsafeSharedRef::new(&mut output);
    let unsafe_shared_indices = UnsafeSharedRef::new(&mut indices);

    run_par!(|| {
        // SAFETY: each task owns the bins of one (roi, channel) pair.
        iter_range_par!(0, num_rois * channels).for_each(|k| unsafe {
            let r = k / channels;
            let c = k % channels;

            let output = unsafe_shared_out.get();
            let indices = unsafe_shared_indices.get();
            let rect = &rects[r];

            for ph in 0..rows {
                for pw in 0..cols {
                    let ([h_start, h_end], [w_start, w_end]) =
                        rect.bin([ph, pw], [rows, cols], [height, width]);

                    let mut max_val = E::neg_infinity();
                    let mut max_index = EMPTY_BIN;

                    for ih in h_start..h_end {
                        for iw in w_start..w_end {
                            let val = x[[c, ih, iw]];

                            if max_index == EMPTY_BIN || val > max_val {
                                max_val = val;
                                max_index = (ih * width + iw) as i64;
                            }
                        }
                    }

                    if max_index != EMPTY_BIN {
                        output[[r, c, ph, pw]] = max_val;
                        indices[[r, c, ph, pw]] = max_index;
                    }
                }
            }
        })
    });

    Ok(RoiPool2dWithIndices::new(
        NdArrayTensor::new(output.into_dyn().into_shared()),
        NdArrayTensor::new(indices.into_dyn().into_shared()),
    ))
}

/// Max-pools a single region, returning `[channels, rows, cols]` values and indices.
pub fn roi_pool2d<E: FloatNdArrayElement>(
    feature_map: &NdArrayTensor<E>,
    roi: RoiDescriptor<E>,
    options: &RoiPoolOptions,
) -> Result<RoiPool2dWithIndices<E>, KernelError> {
    let RoiPool2dWithIndices { output, indices } =
        roi_pool2d_with_indices(feature_map, &[roi], options)?;

    Ok(RoiPool2dWithIndices::new(
        NdArrayTensor::new(output.array.index_axis_move(Axis(0), 0)),
        NdArrayTensor::new(indices.array.index_axis_move(Axis(0), 0)),
    ))
}

/// Routes every bin gradient to the element its forward pass selected.
///
/// Bins selecting the same element, from one region or several, add up; every other element
/// gets zero. `output_grad` and `indices` either both have the multi-region shape
/// `[num_rois, channels, rows, cols]` or both the single-region shape `[channels, rows, cols]`.
/// The result has shape `feature_map_shape`.
pub fn roi_pool2d_backward<E: FloatNdArrayElement>(
    feature_map_shape: [usize; 3],
    output_grad: &NdArrayTensor<E>,
    indices: &NdArrayTensor<i64>,
) -> Result<NdArrayTensor<E>, KernelError> {
    if output_grad.shape() != indices.shape() {
        return Err(KernelError::shape(format!(
            "Output gradient {:?} and indices {:?} must have the same shape",
            output_grad.shape(),
            indices.shape()
        )));
    }
    let [channels, height, width] = feature_map_shape;

    let (grad, indices) = match output_grad.rank() {
        3 => (
            output_grad
                .view_dims::<Ix3>("output_grad")?
                .insert_axis(Axis(0)),
            indices.view_dims::<Ix3>("indices")?.insert_axis(Axis(0)),
        ),
        _ => (
            output_grad.view_dims::<Ix4>("output_grad")?,
            indices.view_dims::<Ix4>("indices")?,
        ),
    };
    check_indices(&indices, channels, height * width)?;
    log::debug!(
        "roi_pool2d_backward<{}> output_grad {:?} -> {feature_map_shape:?}",
        E::dtype_name(),
        output_grad.shape()
    );

    let (num_rois, _, rows, cols) = grad.dim();

    let mut x_grad = Array3::<E>::zeros(feature_map_shape);
    let unsafe_shared_grad = UnsafeSharedRef::new(&mut x_grad);

    run_par!(|| {
        // SAFETY: each task owns one channel of the gradient; overlapping bins of every region
        // are accumulated by the same task.
        iter_range_par!(0, channels).for_each(|c| unsafe {
            let x_grad = unsafe_shared_grad.get();

            for r in 0..num_rois {
                for ph in 0..rows {
                    for pw in 0..cols {
                        let index = indices[[r, c, ph, pw]];
                        if index == EMPTY_BIN {
                            continue;
                        }
                        let index = index as usize;

                        x_grad[[c, index / width, index % width]] += grad[[r, c, ph, pw]];
                    }
                }
            }
        })
    });

    Ok(NdArrayTensor::new(x_grad.into_dyn().into_shared()))
}

fn check_indices(
    indices: &ArrayView4<'_, i64>,
    channels: usize,
    spatial_size: usize,
) -> Result<(), KernelError> {
    let (_, index_channels, _, _) = indices.dim();
    if index_channels != channels {
        return Err(KernelError::shape(format!(
            "Indices cover {index_channels} channels, the feature map has {channels}"
        )));
    }
    if let Some(index) = indices
        .iter()
        .find(|&&index| index != EMPTY_BIN && !(0..spatial_size as i64).contains(&index))
    {
        return Err(KernelError::shape(format!(
            "Index {index} is outside a feature map of {spatial_size} elements"
        )));
    }

    Ok(())
}
