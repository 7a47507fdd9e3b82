macro_rules! testgen_roi_pool2d {
    () => {
        mod roi_pool2d {
            use super::*;
            use crate::ops::{roi_pool2d, roi_pool2d_backward, roi_pool2d_with_indices};
            use crate::tests::random_tensor;
            use crate::{
                EMPTY_BIN, KernelError, RoiDescriptor, RoiPoolOptions, TensorData, Tolerance,
            };

            fn feature_map_3x3() -> TestTensor {
                TestTensor::from_floats([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]])
            }

            #[test]
            fn test_roi_pool2d_overlapping_bins() {
                let feature_map = feature_map_3x3();
                let roi = RoiDescriptor::new(0.33, 0.33, 0.66, 0.66);
                let options = RoiPoolOptions::new([3, 3]);

                let pooled = roi_pool2d(&feature_map, roi, &options).unwrap();
                let grad = TestTensor::from_floats([[
                    [1.0, 1.0, 1.0],
                    [1.0, 1.0, 1.0],
                    [1.0, 1.0, 1.0],
                ]]);
                let x_grad = roi_pool2d_backward([1, 3, 3], &grad, &pooled.indices).unwrap();

                pooled.output.into_data().assert_approx_eq(
                    &TensorData::from([[[5.0, 6.0, 6.0], [8.0, 9.0, 9.0], [8.0, 9.0, 9.0]]]),
                    Tolerance::exact(),
                );
                assert_eq!(
                    pooled.indices.into_data(),
                    TensorData::new(alloc::vec![4, 5, 5, 7, 8, 8, 7, 8, 8], alloc::vec![1, 3, 3])
                );
                x_grad.into_data().assert_approx_eq(
                    &TensorData::from([[[0.0, 0.0, 0.0], [0.0, 1.0, 2.0], [0.0, 2.0, 4.0]]]),
                    Tolerance::exact(),
                );
            }

            #[test]
            fn test_roi_pool2d_whole_image_is_identity() {
                let feature_map = TestTensor::from_floats([
                    [[0.5, -1.0, 2.0], [3.0, 0.0, -4.0]],
                    [[1.5, 2.5, -0.5], [7.0, 6.0, 5.0]],
                ]);
                let roi = RoiDescriptor::new(0.0, 0.0, 1.0, 1.0);

                let pooled = roi_pool2d(&feature_map, roi, &RoiPoolOptions::new([2, 3])).unwrap();
                let grad = TestTensor::from_floats([
                    [[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]],
                    [[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]],
                ]);
                let x_grad = roi_pool2d_backward([2, 2, 3], &grad, &pooled.indices).unwrap();

                pooled
                    .output
                    .into_data()
                    .assert_approx_eq(&feature_map.into_data(), Tolerance::exact());
                x_grad
                    .into_data()
                    .assert_approx_eq(&grad.into_data(), Tolerance::exact());
            }

            #[test]
            fn test_roi_pool2d_ties_select_first_element() {
                let feature_map = TestTensor::from_floats([[
                    [7.0, 7.0, 7.0, 7.0],
                    [7.0, 7.0, 7.0, 7.0],
                    [7.0, 7.0, 7.0, 7.0],
                    [7.0, 7.0, 7.0, 7.0],
                ]]);
                let roi = RoiDescriptor::new(0.0, 0.0, 1.0, 1.0);
                let options = RoiPoolOptions::new([2, 2]);

                let first = roi_pool2d(&feature_map, roi, &options).unwrap();
                let second = roi_pool2d(&feature_map, roi, &options).unwrap();

                let expected = TensorData::new(alloc::vec![0, 2, 8, 10], alloc::vec![1, 2, 2]);
                assert_eq!(first.indices.into_data(), expected);
                assert_eq!(second.indices.into_data(), expected);
            }

            #[test]
            fn test_roi_pool2d_per_channel_max() {
                let feature_map = TestTensor::from_floats([
                    [[1.0, 2.0], [3.0, 4.0]],
                    [[8.0, 7.0], [6.0, 5.0]],
                ]);
                let roi = RoiDescriptor::new(0.0, 0.0, 1.0, 1.0);

                let pooled = roi_pool2d(&feature_map, roi, &RoiPoolOptions::new([1, 1])).unwrap();

                pooled
                    .output
                    .into_data()
                    .assert_approx_eq(&TensorData::from([[[4.0]], [[8.0]]]), Tolerance::exact());
                assert_eq!(
                    pooled.indices.into_data(),
                    TensorData::new(alloc::vec![3, 0], alloc::vec![2, 1, 1])
                );
            }

            #[test]
            fn test_roi_pool2d_gradients_of_rois_accumulate() {
                let feature_map = feature_map_3x3();
                let rois = [
                    RoiDescriptor::new(0.0, 0.0, 1.0, 1.0),
                    RoiDescriptor::new(0.33, 0.33, 0.66, 0.66),
                ];

                let pooled =
                    roi_pool2d_with_indices(&feature_map, &rois, &RoiPoolOptions::new([1, 1]))
                        .unwrap();
                let grad = TestTensor::from_floats([[[[1.0]]], [[[1.0]]]]);
                let x_grad = roi_pool2d_backward([1, 3, 3], &grad, &pooled.indices).unwrap();

                pooled.output.into_data().assert_approx_eq(
                    &TensorData::from([[[[9.0]]], [[[9.0]]]]),
                    Tolerance::exact(),
                );
                x_grad.into_data().assert_approx_eq(
                    &TensorData::from([[[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 2.0]]]),
                    Tolerance::exact(),
                );
            }

            #[test]
            fn test_roi_pool2d_clipped_bin_is_empty() {
                let feature_map = feature_map_3x3();
                let roi = RoiDescriptor::new(0.67, 0.0, 0.67, 1.0);

                let pooled = roi_pool2d(&feature_map, roi, &RoiPoolOptions::new([1, 2])).unwrap();
                let grad = TestTensor::from_floats([[[1.0, 1.0]]]);
                let x_grad = roi_pool2d_backward([1, 3, 3], &grad, &pooled.indices).unwrap();

                pooled
                    .output
                    .into_data()
                    .assert_approx_eq(&TensorData::from([[[9.0, 0.0]]]), Tolerance::exact());
                assert_eq!(
                    pooled.indices.into_data(),
                    TensorData::new(alloc::vec![8, EMPTY_BIN], alloc::vec![1, 1, 2])
                );
                x_grad.into_data().assert_approx_eq(
                    &TensorData::from([[[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]]]),
                    Tolerance::exact(),
                );
            }

            #[test]
            fn test_roi_pool2d_backward_has_feature_map_shape() {
                let feature_map = random_tensor::<FloatElem>(&[3, 7, 5], 11);
                let rois = RoiDescriptor::<FloatElem>::from_slice(&[
                    0.1, 0.2, 0.5, 0.6, 0.0, 0.0, 1.0, 1.0, 0.6, 0.7, 0.9, 0.9,
                ])
                .unwrap();
                let options = RoiPoolOptions::new([2, 3]);

                let pooled = roi_pool2d_with_indices(&feature_map, &rois, &options).unwrap();
                let grad = random_tensor::<FloatElem>(pooled.output.shape(), 12);
                let x_grad = roi_pool2d_backward([3, 7, 5], &grad, &pooled.indices).unwrap();

                assert_eq!(pooled.output.shape(), &[3, 3, 2, 3]);
                assert_eq!(x_grad.shape(), feature_map.shape());
            }

            #[test]
            fn test_roi_pool2d_rejects_invalid_roi() {
                let feature_map = feature_map_3x3();
                let rois = [
                    RoiDescriptor::new(0.0, 0.0, 1.0, 1.0),
                    RoiDescriptor::new(1.5, 0.0, 0.5, 0.5),
                ];

                let err =
                    roi_pool2d_with_indices(&feature_map, &rois, &RoiPoolOptions::new([2, 2]))
                        .unwrap_err();

                assert!(matches!(err, KernelError::InvalidRoi { index: 1, .. }));
            }

            #[test]
            fn test_roi_pool2d_rejects_far_out_of_range_roi() {
                let feature_map = TestTensor::zeros(&[1, 3, 3]);
                let options = RoiPoolOptions::new([2, 2]);

                for roi in [
                    RoiDescriptor::new(1e30, 0.0, 0.5, 0.5),
                    RoiDescriptor::new(0.5, 0.0, 1e30, 0.5),
                    RoiDescriptor::new(0.0, 1e30, 0.5, 0.5),
                    RoiDescriptor::new(0.5, 0.0, 0.5, 1e30),
                ] {
                    let err = roi_pool2d_with_indices(&feature_map, &[roi], &options).unwrap_err();

                    assert!(matches!(err, KernelError::InvalidRoi { index: 0, .. }));
                }
            }

            #[test]
            fn test_roi_pool2d_rejects_bad_shapes() {
                let roi = RoiDescriptor::new(0.0, 0.0, 1.0, 1.0);
                let matrix = TestTensor::from_floats([[1.0, 2.0], [3.0, 4.0]]);

                let rank_err = roi_pool2d(&matrix, roi, &RoiPoolOptions::new([1, 1])).unwrap_err();
                let grid_err =
                    roi_pool2d(&feature_map_3x3(), roi, &RoiPoolOptions::new([0, 2])).unwrap_err();

                assert!(matches!(rank_err, KernelError::Shape { .. }));
                assert!(matches!(grid_err, KernelError::Shape { .. }));
            }

            #[test]
            fn test_roi_pool2d_rejects_empty_feature_map() {
                let roi = RoiDescriptor::new(0.0, 0.0, 1.0, 1.0);
                let options = RoiPoolOptions::new([1, 1]);

                for shape in [[1, 0, 3], [1, 3, 0], [0, 3, 3]] {
                    let feature_map = TestTensor::zeros(&shape);

                    let err = roi_pool2d(&feature_map, roi, &options).unwrap_err();

                    assert!(matches!(err, KernelError::Shape { .. }));
                }
            }
        }
    };
}
