//! Forward and backward entry points of the kernels.
//!
//! A [Kernel] forward pass returns its output together with the state its backward pass needs,
//! so nothing is kept inside the kernel between calls. Inputs are wrapped in a [Param] whose
//! `require_grad` flag decides which gradients the backward pass computes.
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::ops::{
    ConvOptions, ConvPadding, RoiDescriptor, RoiPool2dWithIndices, RoiPoolOptions, conv2d,
    conv2d_weight_backward, conv2d_x_backward, roi_pool2d_backward, roi_pool2d_with_indices,
};
use crate::{FloatNdArrayElement, KernelError, NdArrayTensor};

/// A kernel input with its gradient capability.
#[derive(new, Debug, Clone)]
pub struct Param<E> {
    /// The value.
    pub tensor: NdArrayTensor<E>,
    /// Whether the backward pass computes a gradient for this input.
    pub require_grad: bool,
}

impl<E> Param<E> {
    /// An input that never receives a gradient, like a fixed filter bank.
    pub fn constant(tensor: NdArrayTensor<E>) -> Self {
        Self::new(tensor, false)
    }

    /// An input that receives a gradient.
    pub fn trainable(tensor: NdArrayTensor<E>) -> Self {
        Self::new(tensor, true)
    }
}

/// Result of a forward pass.
#[derive(new, Debug, Clone)]
pub struct Forward<E, S> {
    /// The computed output.
    pub output: NdArrayTensor<E>,
    /// Whatever the backward pass needs.
    pub state: S,
}

/// A differentiable kernel.
pub trait Kernel<E: FloatNdArrayElement> {
    /// Inputs of the forward pass.
    type Inputs;
    /// Saved by the forward pass for the backward pass.
    type State;
    /// Gradients returned by the backward pass.
    type Grads;

    /// Computes the output.
    fn forward(&self, inputs: Self::Inputs) -> Result<Forward<E, Self::State>, KernelError>;

    /// Computes the gradients of the inputs given the gradient of the output.
    ///
    /// Only inputs flagged with `require_grad` get a gradient.
    fn backward(
        &self,
        state: Self::State,
        output_grad: &NdArrayTensor<E>,
    ) -> Result<Self::Grads, KernelError>;
}

/// Configuration to create a [Conv2dKernel] using the [init function](Conv2dConfig::init).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dConfig {
    /// The stride of the convolution.
    pub stride: [usize; 2],
    /// The padding mode.
    pub padding: ConvPadding,
}

impl Config for Conv2dConfig {}

impl Default for Conv2dConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Conv2dConfig {
    /// Unit stride, no padding.
    pub fn new() -> Self {
        Self {
            stride: [1, 1],
            padding: ConvPadding::Valid,
        }
    }

    /// Sets the stride.
    pub fn with_stride(mut self, stride: [usize; 2]) -> Self {
        self.stride = stride;
        self
    }

    /// Sets the padding mode.
    pub fn with_padding(mut self, padding: ConvPadding) -> Self {
        self.padding = padding;
        self
    }

    /// Initializes a new [convolution kernel](Conv2dKernel).
    pub fn init(&self) -> Conv2dKernel {
        Conv2dKernel::new(ConvOptions::new(self.stride, self.padding))
    }
}

/// 2D convolution of an input with a filter bank.
#[derive(new, Debug, Clone)]
pub struct Conv2dKernel {
    /// Stride and padding.
    pub options: ConvOptions,
}

/// Inputs of a [Conv2dKernel].
#[derive(new, Debug, Clone)]
pub struct Conv2dInputs<E> {
    /// Filter bank `[channels_out, channels_in, kernel_height, kernel_width]`.
    pub weight: Param<E>,
    /// Input `[batch_size, channels_in, height, width]`.
    pub x: Param<E>,
}

/// Gradients of a [Conv2dKernel].
#[derive(Debug, Clone)]
pub struct Conv2dGrads<E> {
    /// Gradient of the filter bank, when it requires one.
    pub weight: Option<NdArrayTensor<E>>,
    /// Gradient of the input, when it requires one.
    pub x: Option<NdArrayTensor<E>>,
}

impl<E: FloatNdArrayElement> Kernel<E> for Conv2dKernel {
    type Inputs = Conv2dInputs<E>;
    type State = Conv2dInputs<E>;
    type Grads = Conv2dGrads<E>;

    fn forward(&self, inputs: Self::Inputs) -> Result<Forward<E, Self::State>, KernelError> {
        let output = conv2d(&inputs.x.tensor, &inputs.weight.tensor, &self.options)?;

        Ok(Forward::new(output, inputs))
    }

    fn backward(
        &self,
        state: Self::State,
        output_grad: &NdArrayTensor<E>,
    ) -> Result<Self::Grads, KernelError> {
        let Conv2dInputs { weight, x } = state;

        let x_grad = x
            .require_grad
            .then(|| conv2d_x_backward(&x.tensor, &weight.tensor, output_grad, &self.options))
            .transpose()?;
        let weight_grad = weight
            .require_grad
            .then(|| conv2d_weight_backward(&x.tensor, &weight.tensor, output_grad, &self.options))
            .transpose()?;

        Ok(Conv2dGrads {
            weight: weight_grad,
            x: x_grad,
        })
    }
}

/// Configuration to create a [RoiPool2dKernel] using the [init function](RoiPool2dConfig::init).
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiPool2dConfig {
    /// The pooling grid `[rows, cols]` of every region.
    pub output_size: [usize; 2],
}

impl Config for RoiPool2dConfig {}

impl RoiPool2dConfig {
    /// Initializes a new [region of interest pooling kernel](RoiPool2dKernel).
    pub fn init(&self) -> RoiPool2dKernel {
        RoiPool2dKernel::new(RoiPoolOptions::new(self.output_size))
    }
}

/// Region of interest max pooling.
#[derive(new, Debug, Clone)]
pub struct RoiPool2dKernel {
    /// The pooling grid.
    pub options: RoiPoolOptions,
}

/// Inputs of a [RoiPool2dKernel].
#[derive(new, Debug, Clone)]
pub struct RoiPool2dInputs<E> {
    /// Feature map `[channels, height, width]`.
    pub feature_map: Param<E>,
    /// Regions to pool. They never receive a gradient.
    pub rois: Vec<RoiDescriptor<E>>,
}

/// Saved by the forward pass of a [RoiPool2dKernel].
#[derive(Debug, Clone)]
pub struct RoiPool2dState {
    feature_map_shape: [usize; 3],
    indices: Option<NdArrayTensor<i64>>,
}

impl RoiPool2dState {
    /// The selected element of every bin, kept only when the feature map requires a gradient.
    pub fn indices(&self) -> Option<&NdArrayTensor<i64>> {
        self.indices.as_ref()
    }
}

/// Gradients of a [RoiPool2dKernel].
#[derive(Debug, Clone)]
pub struct RoiPool2dGrads<E> {
    /// Gradient of the feature map, when it requires one.
    pub feature_map: Option<NdArrayTensor<E>>,
}

impl<E: FloatNdArrayElement> Kernel<E> for RoiPool2dKernel {
    type Inputs = RoiPool2dInputs<E>;
    type State = RoiPool2dState;
    type Grads = RoiPool2dGrads<E>;

    /// Pools every region into `[num_rois, channels, rows, cols]`.
    fn forward(&self, inputs: Self::Inputs) -> Result<Forward<E, Self::State>, KernelError> {
        let RoiPool2dInputs { feature_map, rois } = inputs;
        let feature_map_shape = feature_map.tensor.dims("feature_map")?;

        let RoiPool2dWithIndices { output, indices } =
            roi_pool2d_with_indices(&feature_map.tensor, &rois, &self.options)?;
        let indices = feature_map.require_grad.then_some(indices);

        Ok(Forward::new(
            output,
            RoiPool2dState {
                feature_map_shape,
                indices,
            },
        ))
    }

    fn backward(
        &self,
        state: Self::State,
        output_grad: &NdArrayTensor<E>,
    ) -> Result<Self::Grads, KernelError> {
        let feature_map = state
            .indices
            .map(|indices| roi_pool2d_backward(state.feature_map_shape, output_grad, &indices))
            .transpose()?;

        Ok(RoiPool2dGrads { feature_map })
    }
}
