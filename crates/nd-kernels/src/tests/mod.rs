#[macro_use]
mod roi_pool2d;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{FloatNdArrayElement, NdArrayTensor};

macro_rules! testgen_all {
    () => {
        testgen_conv2d!();
        testgen_roi_pool2d!();
        testgen_kernel!();
    };
}

/// Values uniformly drawn in `[-1, 1)`, reproducible through `seed`.
pub(crate) fn random_tensor<E: FloatNdArrayElement>(
    shape: &[usize],
    seed: u64,
) -> NdArrayTensor<E> {
    let mut rng = StdRng::seed_from_u64(seed);
    let count: usize = shape.iter().product();
    let values = (0..count)
        .map(|_| E::from_elem(rng.random_range(-1.0..1.0)))
        .collect();

    NdArrayTensor::from_vec(values, shape).unwrap()
}

/// `a * lhs + b * rhs`.
pub(crate) fn linear_combination<E: FloatNdArrayElement>(
    a: f64,
    lhs: &NdArrayTensor<E>,
    b: f64,
    rhs: &NdArrayTensor<E>,
) -> NdArrayTensor<E> {
    let array = &lhs.array * E::from_elem(a) + &rhs.array * E::from_elem(b);

    NdArrayTensor::new(array.into_shared())
}

mod single {
    use super::*;

    type FloatElem = f32;
    type TestTensor = NdArrayTensor<FloatElem>;

    testgen_all!();
}

mod double {
    use super::*;

    type FloatElem = f64;
    type TestTensor = NdArrayTensor<FloatElem>;

    testgen_all!();
}
