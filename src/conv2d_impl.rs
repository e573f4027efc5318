use ndarray::{Array2, ArrayView4};

/// Lower an NCHW batch to the im2col matrix used for GEMM convolution.
///
/// Row `b * out_h * out_w + oh * out_w + ow` holds the receptive field of
/// output pixel `(oh, ow)` of sample `b`, ordered channel, then kernel row,
/// then kernel column. That matches a `[out, in, kh, kw]` kernel flattened to
/// `[out, in * kh * kw]`. Taps that fall in the zero padding stay zero.
pub fn im2col(
    input: ArrayView4<'_, f32>,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    out: (usize, usize),
) -> Array2<f32> {
    let (batch, channels, height, width) = input.dim();
    let (kernel_h, kernel_w) = kernel;
    let (out_h, out_w) = out;

    let col_h = batch * out_h * out_w;
    let col_w = channels * kernel_h * kernel_w;
    let mut col_matrix = Array2::zeros((col_h, col_w));

    for b in 0..batch {
        for oh in 0..out_h {
            for ow in 0..out_w {
                let row_idx = b * (out_h * out_w) + oh * out_w + ow;
                let mut row = col_matrix.row_mut(row_idx);

                for c in 0..channels {
                    for kh in 0..kernel_h {
                        // Underflow wraps to a huge index and fails the bounds test.
                        let ih = (oh * stride.0 + kh).wrapping_sub(padding.0);
                        if ih >= height {
                            continue;
                        }
                        for kw in 0..kernel_w {
                            let iw = (ow * stride.1 + kw).wrapping_sub(padding.1);
                            if iw < width {
                                row[(c * kernel_h + kh) * kernel_w + kw] = input[[b, c, ih, iw]];
                            }
                        }
                    }
                }
            }
        }
    }

    col_matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_im2col_basic() {
        let input = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();

        let col = im2col(input.view(), (2, 2), (1, 1), (0, 0), (1, 1));

        assert_eq!(col.shape(), &[1, 4]);
        assert_eq!(col.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_im2col_with_stride() {
        let input = Array4::from_shape_vec(
            (1, 1, 3, 3),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        )
        .unwrap();

        let col = im2col(input.view(), (2, 2), (2, 2), (0, 0), (1, 1));

        assert_eq!(col.shape(), &[1, 4]);
        assert_eq!(col.row(0).to_vec(), vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn test_im2col_with_padding() {
        let input = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();

        let col = im2col(input.view(), (3, 3), (1, 1), (1, 1), (2, 2));

        assert_eq!(col.shape(), &[4, 9]);
        // Top-left output pixel: the first row and column of taps are padding.
        assert_eq!(
            col.row(0).to_vec(),
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 3.0, 4.0]
        );
        // Bottom-right output pixel: the last row and column of taps are padding.
        assert_eq!(
            col.row(3).to_vec(),
            vec![1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_im2col_multiple_channels() {
        let input = Array4::from_shape_vec(
            (1, 2, 2, 2),
            vec![
                1.0, 2.0, 3.0, 4.0, // channel 0
                5.0, 6.0, 7.0, 8.0, // channel 1
            ],
        )
        .unwrap();

        let col = im2col(input.view(), (2, 2), (1, 1), (0, 0), (1, 1));

        assert_eq!(col.shape(), &[1, 8]);
        assert_eq!(
            col.row(0).to_vec(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_im2col_batch() {
        let input = Array4::from_shape_vec(
            (2, 1, 2, 2),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )
        .unwrap();

        let col = im2col(input.view(), (2, 2), (1, 1), (0, 0), (1, 1));

        assert_eq!(col.shape(), &[2, 4]);
        assert_eq!(col.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(col.row(1).to_vec(), vec![5.0, 6.0, 7.0, 8.0]);
    }
}
