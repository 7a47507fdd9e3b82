#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

//! CPU kernels for 2D convolution and region of interest max pooling, with their gradients.
//!
//! Every kernel is a pure function of its inputs: the forward pass returns the output together
//! with whatever the backward pass needs, and the backward pass only computes the gradients of
//! the inputs that ask for one. Work is split across threads with rayon when the `std` feature
//! is enabled.

#[macro_use]
extern crate derive_new;

extern crate alloc;

#[macro_use]
mod parallel;

mod element;
mod error;
mod kernel;
mod sharing;
mod tensor;

/// JSON configuration files.
pub mod config;
/// Kernel functions and their options.
pub mod ops;

pub use element::*;
pub use error::*;
pub use kernel::*;
pub use ops::{
    ConvOptions, ConvPadding, EMPTY_BIN, RoiDescriptor, RoiPool2dWithIndices, RoiPoolOptions,
};
pub use tensor::*;

#[cfg(test)]
mod tests;
