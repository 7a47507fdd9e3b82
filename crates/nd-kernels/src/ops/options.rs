use serde::{Deserialize, Serialize};

/// Padding applied by a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConvPadding {
    /// No padding: the kernel only visits positions where it fully overlaps the input.
    #[default]
    Valid,
    /// Zero padding so that the output spatial size is `ceil(input / stride)`.
    ///
    /// When the total padding of an axis is odd, the extra row or column goes after the input.
    Same,
}

impl ConvPadding {
    /// Padding `[before, after]` of one spatial axis.
    ///
    /// `size_in` and `stride` must be greater than zero.
    pub fn calculate_padding_1d(
        &self,
        size_in: usize,
        kernel_size: usize,
        stride: usize,
    ) -> [usize; 2] {
        match self {
            Self::Valid => [0, 0],
            Self::Same => {
                let size_out = size_in.div_ceil(stride);
                let total = ((size_out - 1) * stride + kernel_size).saturating_sub(size_in);
                let before = total / 2;

                [before, total - before]
            }
        }
    }

    /// Padding `[[top, bottom], [left, right]]` of a 2D convolution.
    pub fn calculate_padding_2d(
        &self,
        size_in: [usize; 2],
        kernel_size: [usize; 2],
        stride: [usize; 2],
    ) -> [[usize; 2]; 2] {
        [
            self.calculate_padding_1d(size_in[0], kernel_size[0], stride[0]),
            self.calculate_padding_1d(size_in[1], kernel_size[1], stride[1]),
        ]
    }
}

/// Convolution options.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvOptions {
    /// Stride `[height, width]`.
    pub stride: [usize; 2],
    /// Padding mode.
    pub padding: ConvPadding,
}

impl Default for ConvOptions {
    fn default() -> Self {
        Self::new([1, 1], ConvPadding::Valid)
    }
}

/// Region of interest pooling options.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoiPoolOptions {
    /// Pooling grid `[rows, cols]` produced for every region.
    pub output_size: [usize; 2],
}

/// Output size of one spatial axis of a convolution.
///
/// ```text
/// out_size = floor((in_size + padding - kernel_size) / stride) + 1
/// ```
///
/// `padding` is the total padding of the axis (before + after).
///
/// # Returns
///
/// `None` when the kernel does not fit in the padded input.
pub fn calculate_conv_output_size(
    kernel_size: usize,
    stride: usize,
    padding: usize,
    size_in: usize,
) -> Option<usize> {
    let padded = size_in + padding;
    if kernel_size == 0 || stride == 0 || padded < kernel_size {
        return None;
    }

    Some((padded - kernel_size) / stride + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2, 1, 0, 2, Some(1))]
    #[case(3, 1, 0, 5, Some(3))]
    #[case(3, 2, 0, 7, Some(3))]
    #[case(3, 1, 2, 5, Some(5))]
    #[case(3, 1, 0, 2, None)]
    #[case(2, 0, 0, 4, None)]
    fn conv_output_size(
        #[case] kernel_size: usize,
        #[case] stride: usize,
        #[case] padding: usize,
        #[case] size_in: usize,
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(
            calculate_conv_output_size(kernel_size, stride, padding, size_in),
            expected
        );
    }

    #[rstest]
    #[case(5, 3, 1, [1, 1])]
    #[case(4, 2, 1, [0, 1])]
    #[case(5, 4, 1, [1, 2])]
    #[case(6, 3, 2, [0, 1])]
    #[case(1, 1, 1, [0, 0])]
    fn same_padding_keeps_size(
        #[case] size_in: usize,
        #[case] kernel_size: usize,
        #[case] stride: usize,
        #[case] expected: [usize; 2],
    ) {
        let padding = ConvPadding::Same.calculate_padding_1d(size_in, kernel_size, stride);
        assert_eq!(padding, expected);

        let size_out =
            calculate_conv_output_size(kernel_size, stride, padding[0] + padding[1], size_in);
        assert_eq!(size_out, Some(size_in.div_ceil(stride)));
    }

    #[test]
    fn valid_padding_is_zero() {
        assert_eq!(
            ConvPadding::Valid.calculate_padding_2d([7, 7], [3, 3], [1, 1]),
            [[0, 0], [0, 0]]
        );
    }

    #[test]
    fn default_options_are_unit_stride_valid() {
        let options = ConvOptions::default();

        assert_eq!(options.stride, [1, 1]);
        assert_eq!(options.padding, ConvPadding::Valid);
    }
}
