use core::fmt::{Debug, Display};
use libm::{round, roundf};
use num_traits::{Float, FromPrimitive};

/// A float element the kernels can compute with.
///
/// The precision of a kernel invocation is fixed at compile time by this type parameter; there
/// is no runtime dispatch on the element type.
pub trait FloatNdArrayElement:
    Float
    + FromPrimitive
    + ndarray::LinalgScalar
    + ndarray::ScalarOperand
    + core::ops::AddAssign
    + Default
    + Debug
    + Display
    + Send
    + Sync
    + 'static
{
    /// Absolute tolerance used when comparing kernel results of this precision.
    const ABSOLUTE_TOLERANCE: f64;
    /// Relative tolerance used when comparing kernel results of this precision.
    const RELATIVE_TOLERANCE: f64;

    /// Human readable name of the element type.
    fn dtype_name() -> &'static str;

    /// Converts a double precision value into this element.
    fn from_elem(value: f64) -> Self;

    /// Converts this element into double precision.
    fn to_elem(self) -> f64;

    /// Rounds half-way cases away from zero.
    fn round_elem(self) -> Self;
}

macro_rules! make_elem {
    (
        double
        $ty:ty
    ) => {
        impl FloatNdArrayElement for $ty {
            const ABSOLUTE_TOLERANCE: f64 = 1e-10;
            const RELATIVE_TOLERANCE: f64 = 1e-10;

            fn dtype_name() -> &'static str {
                "f64"
            }

            #[inline(always)]
            fn from_elem(value: f64) -> Self {
                value as $ty
            }

            #[inline(always)]
            fn to_elem(self) -> f64 {
                self as f64
            }

            #[inline(always)]
            fn round_elem(self) -> Self {
                round(self as f64) as $ty
            }
        }
    };
    (
        single
        $ty:ty
    ) => {
        impl FloatNdArrayElement for $ty {
            const ABSOLUTE_TOLERANCE: f64 = 1e-5;
            const RELATIVE_TOLERANCE: f64 = 1e-4;

            fn dtype_name() -> &'static str {
                "f32"
            }

            #[inline(always)]
            fn from_elem(value: f64) -> Self {
                value as $ty
            }

            #[inline(always)]
            fn to_elem(self) -> f64 {
                self as f64
            }

            #[inline(always)]
            fn round_elem(self) -> Self {
                roundf(self as f32) as $ty
            }
        }
    };
}

make_elem!(double f64);
make_elem!(single f32);
