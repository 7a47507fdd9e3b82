use ndarray::{Array4, ArrayView4, CowArray, Ix4, s};

use crate::FloatNdArrayElement;

/// Pads the two spatial axes of a `[batch, channels, height, width]` array with zeros.
///
/// `padding` is `[[top, bottom], [left, right]]`. Without padding the input is borrowed as is.
pub(crate) fn apply_padding_4d<'a, E: FloatNdArrayElement>(
    x: ArrayView4<'a, E>,
    padding: [[usize; 2]; 2],
) -> CowArray<'a, E, Ix4> {
    let [[top, bottom], [left, right]] = padding;
    if top + bottom + left + right == 0 {
        return CowArray::from(x);
    }

    let (batch_size, channels, height, width) = x.dim();
    let mut x_new = Array4::zeros((
        batch_size,
        channels,
        height + top + bottom,
        width + left + right,
    ));
    x_new
        .slice_mut(s![.., .., top..height + top, left..width + left])
        .assign(&x);

    CowArray::from(x_new)
}

/// Removes the padding added by [apply_padding_4d].
pub(crate) fn crop_padding_4d<E: FloatNdArrayElement>(
    x: Array4<E>,
    padding: [[usize; 2]; 2],
) -> Array4<E> {
    let [[top, bottom], [left, right]] = padding;
    if top + bottom + left + right == 0 {
        return x;
    }

    let (_, _, height, width) = x.dim();
    x.slice(s![.., .., top..height - bottom, left..width - right])
        .to_owned()
}
