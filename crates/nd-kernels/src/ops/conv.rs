//! # Convolution kernel
//!
//! 2D cross-correlation of a batched multi-channel input `x` with a filter bank `weight`:
//!
//! ```text
//! out[n, f, i, j] = sum_{c, di, dj} x[n, c, i * sh + di, j * sw + dj] * weight[f, c, di, dj]
//! ```
//!
//! This is numerically a true convolution of `x` with the spatially flipped filter bank.
use alloc::format;
use ndarray::{Array4, Ix4};

use super::padding::{apply_padding_4d, crop_padding_4d};
use super::{ConvOptions, calculate_conv_output_size};
use crate::{FloatNdArrayElement, KernelError, NdArrayTensor, sharing::UnsafeSharedRef};

/// Sizes shared by the forward and backward passes, validated once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conv2dGeometry {
    batch_size: usize,
    channels_in: usize,
    channels_out: usize,
    in_size: [usize; 2],
    kernel_size: [usize; 2],
    stride: [usize; 2],
    padding: [[usize; 2]; 2],
    out_size: [usize; 2],
}

impl Conv2dGeometry {
    fn new(
        x_shape: [usize; 4],
        weight_shape: [usize; 4],
        options: &ConvOptions,
    ) -> Result<Self, KernelError> {
        let [batch_size, channels_in, height, width] = x_shape;
        let [channels_out, weight_channels, kernel_height, kernel_width] = weight_shape;

        if x_shape.contains(&0) || weight_shape.contains(&0) {
            return Err(KernelError::shape(format!(
                "Convolution operands can't have empty dimensions, got x {x_shape:?} and weight {weight_shape:?}"
            )));
        }
        if weight_channels != channels_in {
            return Err(KernelError::shape(format!(
                "Weight has {weight_channels} input channels but x has {channels_in}"
            )));
        }
        if options.stride.contains(&0) {
            return Err(KernelError::shape(format!(
                "Stride must be positive, got {:?}",
                options.stride
            )));
        }

        let in_size = [height, width];
        let kernel_size = [kernel_height, kernel_width];
        let padding = options
            .padding
            .calculate_padding_2d(in_size, kernel_size, options.stride);

        let output_size_of = |axis: usize| {
            let [before, after] = padding[axis];
            calculate_conv_output_size(
                kernel_size[axis],
                options.stride[axis],
                before + after,
                in_size[axis],
            )
            .ok_or_else(|| {
                KernelError::shape(format!(
                    "Kernel {kernel_size:?} is larger than the padded input {:?}",
                    [
                        height + padding[0][0] + padding[0][1],
                        width + padding[1][0] + padding[1][1]
                    ]
                ))
            })
        };
        let out_size = [output_size_of(0)?, output_size_of(1)?];

        Ok(Self {
            batch_size,
            channels_in,
            channels_out,
            in_size,
            kernel_size,
            stride: options.stride,
            padding,
            out_size,
        })
    }

    fn output_shape(&self) -> [usize; 4] {
        let [out_height, out_width] = self.out_size;
        [self.batch_size, self.channels_out, out_height, out_width]
    }

    fn check_output_grad<E>(&self, output_grad: &NdArrayTensor<E>) -> Result<(), KernelError> {
        if output_grad.shape() != self.output_shape().as_slice() {
            return Err(KernelError::shape(format!(
                "Output gradient has shape {:?}, the convolution produces {:?}",
                output_grad.shape(),
                self.output_shape()
            )));
        }
        Ok(())
    }
}

/// Computes the forward pass of a 2D convolution.
///
/// # Shapes
///
/// - x: `[batch_size, channels_in, height, width]`
/// - weight: `[channels_out, channels_in, kernel_height, kernel_width]`
/// - output: `[batch_size, channels_out, height_out, width_out]`
///
/// With [Valid](super::ConvPadding::Valid) padding and unit stride the output spatial size is
/// `height - kernel_height + 1` by `width - kernel_width + 1`.
pub fn conv2d<E: FloatNdArrayElement>(
    x: &NdArrayTensor<E>,
    weight: &NdArrayTensor<E>,
    options: &ConvOptions,
) -> Result<NdArrayTensor<E>, KernelError> {
    let geometry = Conv2dGeometry::new(x.dims("x")?, weight.dims("weight")?, options)?;
    log::debug!(
        "conv2d<{}> x {:?} weight {:?} -> {:?}",
        E::dtype_name(),
        x.shape(),
        weight.shape(),
        geometry.output_shape()
    );

    let Conv2dGeometry {
        batch_size,
        channels_in,
        channels_out,
        kernel_size: [kernel_height, kernel_width],
        stride: [stride_height, stride_width],
        out_size: [out_height, out_width],
        ..
    } = geometry;

    let x = apply_padding_4d(x.view_dims::<Ix4>("x")?, geometry.padding);
    let weight = weight.view_dims::<Ix4>("weight")?;

    let mut output = Array4::<E>::zeros(geometry.output_shape());
    let unsafe_shared_out = UnsafeSharedRef::new(&mut output);

    run_par!(|| {
        // SAFETY: each task owns the output plane of one (batch, filter) pair.
        iter_range_par!(0, batch_size * channels_out).for_each(|k| unsafe {
            let b = k / channels_out;
            let oc = k % channels_out;

            let output = unsafe_shared_out.get();

            for oh in 0..out_height {
                for ow in 0..out_width {
                    let mut sum = E::zero();

                    for ic in 0..channels_in {
                        for kh in 0..kernel_height {
                            let ih = oh * stride_height + kh;

                            for kw in 0..kernel_width {
                                let iw = ow * stride_width + kw;
                                sum += x[[b, ic, ih, iw]] * weight[[oc, ic, kh, kw]];
                            }
                        }
                    }

                    output[[b, oc, oh, ow]] = sum;
                }
            }
        })
    });

    Ok(NdArrayTensor::new(output.into_dyn().into_shared()))
}

/// Computes the gradient of a 2D convolution with respect to its input.
///
/// Every input element accumulates `weight[f, c, di, dj] * output_grad[n, f, i, j]` for each
/// output position that read it. This is the adjoint of [conv2d], so it is linear in
/// `output_grad`. The result has the shape of `x`.
pub fn conv2d_x_backward<E: FloatNdArrayElement>(
    x: &NdArrayTensor<E>,
    weight: &NdArrayTensor<E>,
    output_grad: &NdArrayTensor<E>,
    options: &ConvOptions,
) -> Result<NdArrayTensor<E>, KernelError> {
    let geometry = Conv2dGeometry::new(x.dims("x")?, weight.dims("weight")?, options)?;
    geometry.check_output_grad(output_grad)?;
    log::debug!(
        "conv2d_x_backward<{}> output_grad {:?} -> {:?}",
        E::dtype_name(),
        output_grad.shape(),
        x.shape()
    );

    let Conv2dGeometry {
        batch_size,
        channels_in,
        channels_out,
        in_size: [height, width],
        kernel_size: [kernel_height, kernel_width],
        stride: [stride_height, stride_width],
        padding,
        out_size: [out_height, out_width],
    } = geometry;
    let [[top, bottom], [left, right]] = padding;

    let weight = weight.view_dims::<Ix4>("weight")?;
    let grad = output_grad.view_dims::<Ix4>("output_grad")?;

    let mut x_grad = Array4::<E>::zeros([
        batch_size,
        channels_in,
        height + top + bottom,
        width + left + right,
    ]);
    let unsafe_shared_grad = UnsafeSharedRef::new(&mut x_grad);

    run_par!(|| {
        // SAFETY: each task owns the gradient plane of one (batch, channel) pair, the sum over
        // filters stays inside the task.
        iter_range_par!(0, batch_size * channels_in).for_each(|k| unsafe {
            let b = k / channels_in;
            let ic = k % channels_in;

            let x_grad = unsafe_shared_grad.get();

            for oc in 0..channels_out {
                for oh in 0..out_height {
                    for ow in 0..out_width {
                        let g = grad[[b, oc, oh, ow]];

                        for kh in 0..kernel_height {
                            let ih = oh * stride_height + kh;

                            for kw in 0..kernel_width {
                                let iw = ow * stride_width + kw;
                                x_grad[[b, ic, ih, iw]] += weight[[oc, ic, kh, kw]] * g;
                            }
                        }
                    }
                }
            }
        })
    });

    let x_grad = crop_padding_4d(x_grad, padding);

    Ok(NdArrayTensor::new(x_grad.into_dyn().into_shared()))
}

/// Computes the gradient of a 2D convolution with respect to its filter bank.
///
/// ```text
/// weight_grad[f, c, di, dj] = sum_{n, i, j} x[n, c, i * sh + di, j * sw + dj] * output_grad[n, f, i, j]
/// ```
///
/// The result has the shape of `weight`.
pub fn conv2d_weight_backward<E: FloatNdArrayElement>(
    x: &NdArrayTensor<E>,
    weight: &NdArrayTensor<E>,
    output_grad: &NdArrayTensor<E>,
    options: &ConvOptions,
) -> Result<NdArrayTensor<E>, KernelError> {
    let geometry = Conv2dGeometry::new(x.dims("x")?, weight.dims("weight")?, options)?;
    geometry.check_output_grad(output_grad)?;
    log::debug!(
        "conv2d_weight_backward<{}> output_grad {:?} -> {:?}",
        E::dtype_name(),
        output_grad.shape(),
        weight.shape()
    );

    let Conv2dGeometry {
        batch_size,
        channels_in,
        channels_out,
        kernel_size: [kernel_height, kernel_width],
        stride: [stride_height, stride_width],
        out_size: [out_height, out_width],
        ..
    } = geometry;

    let x = apply_padding_4d(x.view_dims::<Ix4>("x")?, geometry.padding);
    let grad = output_grad.view_dims::<Ix4>("output_grad")?;

    let mut weight_grad =
        Array4::<E>::zeros([channels_out, channels_in, kernel_height, kernel_width]);
    let unsafe_shared_grad = UnsafeSharedRef::new(&mut weight_grad);

    run_par!(|| {
        // SAFETY: each task owns the kernel of one (filter, channel) pair.
        iter_range_par!(0, channels_out * channels_in).for_each(|k| unsafe {
            let oc = k / channels_in;
            let ic = k % channels_in;

            let weight_grad = unsafe_shared_grad.get();

            for kh in 0..kernel_height {
                for kw in 0..kernel_width {
                    let mut sum = E::zero();

                    for b in 0..batch_size {
                        for oh in 0..out_height {
                            let ih = oh * stride_height + kh;

                            for ow in 0..out_width {
                                let iw = ow * stride_width + kw;
                                sum += x[[b, ic, ih, iw]] * grad[[b, oc, oh, ow]];
                            }
                        }
                    }

                    weight_grad[[oc, ic, kh, kw]] = sum;
                }
            }
        })
    });

    Ok(NdArrayTensor::new(weight_grad.into_dyn().into_shared()))
}
