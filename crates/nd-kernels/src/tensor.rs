use alloc::{format, string::String, vec::Vec};
use core::fmt::Write;
use ndarray::{ArcArray, Array, ArrayView, Dimension, IxDyn};

use crate::{FloatNdArrayElement, KernelError};

/// Dynamic-rank array with copy-on-write shared storage.
pub type SharedArray<E> = ArcArray<E, IxDyn>;

/// A row-major tensor owned by whoever created it.
///
/// Cloning is cheap: the storage is reference counted and only copied when a clone is mutated.
#[derive(new, Debug, Clone)]
pub struct NdArrayTensor<E> {
    /// The underlying array.
    pub array: SharedArray<E>,
}

impl<E> NdArrayTensor<E> {
    /// The dimensions of the tensor.
    pub fn shape(&self) -> &[usize] {
        self.array.shape()
    }

    /// The number of dimensions.
    pub fn rank(&self) -> usize {
        self.array.ndim()
    }

    /// Borrows the tensor as a fixed-rank view.
    ///
    /// `name` only shows up in the error message.
    pub(crate) fn view_dims<D: Dimension>(
        &self,
        name: &str,
    ) -> Result<ArrayView<'_, E, D>, KernelError> {
        let expected = D::NDIM.unwrap_or(0);
        self.array.view().into_dimensionality::<D>().map_err(|_| {
            KernelError::shape(format!(
                "{name} must have rank {expected}, got shape {:?}",
                self.shape()
            ))
        })
    }

    /// The dimensions of a tensor that must have rank `D`.
    pub(crate) fn dims<const D: usize>(&self, name: &str) -> Result<[usize; D], KernelError> {
        self.shape().try_into().map_err(|_| {
            KernelError::shape(format!(
                "{name} must have rank {D}, got shape {:?}",
                self.shape()
            ))
        })
    }
}

impl<E: Clone> NdArrayTensor<E> {
    /// Builds a tensor from row-major values.
    pub fn from_vec(values: Vec<E>, shape: &[usize]) -> Result<Self, KernelError> {
        let count: usize = shape.iter().product();
        if count != values.len() {
            return Err(KernelError::shape(format!(
                "{} values can't fill shape {shape:?} ({count} elements)",
                values.len()
            )));
        }
        let array = Array::from_shape_vec(IxDyn(shape), values)?;

        Ok(Self::new(array.into_shared()))
    }

    /// Builds a tensor from its data representation.
    pub fn from_data(data: TensorData<E>) -> Result<Self, KernelError> {
        Self::from_vec(data.value, &data.shape)
    }

    /// Collects the values in row-major order, whatever the memory layout.
    pub fn into_data(self) -> TensorData<E> {
        let shape = self.shape().to_vec();
        let value = self.array.iter().cloned().collect();

        TensorData::new(value, shape)
    }
}

impl<E: FloatNdArrayElement> NdArrayTensor<E> {
    /// A tensor of zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(Array::zeros(IxDyn(shape)).into_shared())
    }

    /// Builds a tensor from nested float literals or from [TensorData].
    ///
    /// # Panics
    ///
    /// If a [TensorData] value count does not match its shape. Use
    /// [from_data](Self::from_data) to get the error instead.
    pub fn from_floats<A: Into<TensorData<E>>>(floats: A) -> Self {
        match Self::from_data(floats.into()) {
            Ok(tensor) => tensor,
            Err(err) => panic!("{err}"),
        }
    }
}

/// Flat values with their shape.
#[derive(new, Debug, Clone, PartialEq)]
pub struct TensorData<E> {
    /// Values in row-major order.
    pub value: Vec<E>,
    /// The dimensions.
    pub shape: Vec<usize>,
}

/// Tolerance used to compare float results.
#[derive(new, Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Maximum absolute difference.
    pub absolute: f64,
    /// Maximum difference relative to the expected magnitude.
    pub relative: f64,
}

impl Tolerance {
    /// The default tolerance for the element precision `E`.
    pub fn of<E: FloatNdArrayElement>() -> Self {
        Self::new(E::ABSOLUTE_TOLERANCE, E::RELATIVE_TOLERANCE)
    }

    /// Requires bit-for-bit equality.
    pub fn exact() -> Self {
        Self::new(0.0, 0.0)
    }

    fn accepts(&self, actual: f64, expected: f64) -> bool {
        let diff = libm::fabs(actual - expected);
        diff <= self.absolute || diff <= self.relative * libm::fabs(expected)
    }
}

impl<E: FloatNdArrayElement> TensorData<E> {
    /// Asserts that both data hold the same shape and close enough values.
    ///
    /// # Panics
    ///
    /// If the shapes differ or any value is outside the tolerance.
    #[track_caller]
    pub fn assert_approx_eq(&self, other: &Self, tolerance: Tolerance) {
        let mut message = String::new();

        if self.shape != other.shape {
            let _ = write!(
                message,
                "\n  => Shape is different: {:?} != {:?}",
                self.shape, other.shape
            );
        }

        let mut num_diff = 0;
        let max_num_diff = 5;
        for (i, (a, b)) in self.value.iter().zip(other.value.iter()).enumerate() {
            let (a, b) = (a.to_elem(), b.to_elem());
            let both_nan = a.is_nan() && b.is_nan();

            if !both_nan && !tolerance.accepts(a, b) {
                if num_diff < max_num_diff {
                    let _ = write!(
                        message,
                        "\n  => Position {i}: {a} != {b} | difference {}",
                        libm::fabs(a - b)
                    );
                }
                num_diff += 1;
            }
        }

        if num_diff >= max_num_diff {
            let _ = write!(message, "\n{} more errors...", num_diff - max_num_diff);
        }

        if !message.is_empty() {
            panic!("Tensors are not approx eq:{message}");
        }
    }
}

impl<E: FloatNdArrayElement, const A: usize> From<[E; A]> for TensorData<E> {
    fn from(elems: [E; A]) -> Self {
        TensorData::new(elems.to_vec(), alloc::vec![A])
    }
}

impl<E: FloatNdArrayElement, const A: usize, const B: usize> From<[[E; B]; A]> for TensorData<E> {
    fn from(elems: [[E; B]; A]) -> Self {
        let value = elems.iter().flatten().copied().collect();

        TensorData::new(value, alloc::vec![A, B])
    }
}

impl<E: FloatNdArrayElement, const A: usize, const B: usize, const C: usize>
    From<[[[E; C]; B]; A]> for TensorData<E>
{
    fn from(elems: [[[E; C]; B]; A]) -> Self {
        let value = elems.iter().flatten().flatten().copied().collect();

        TensorData::new(value, alloc::vec![A, B, C])
    }
}

impl<E: FloatNdArrayElement, const A: usize, const B: usize, const C: usize, const D: usize>
    From<[[[[E; D]; C]; B]; A]> for TensorData<E>
{
    fn from(elems: [[[[E; D]; C]; B]; A]) -> Self {
        let value = elems.iter().flatten().flatten().flatten().copied().collect();

        TensorData::new(value, alloc::vec![A, B, C, D])
    }
}
