use crate::{Error, Result, Tensor};
use ndarray::{s, Array4, Axis, Ix4};

/// Max pooling over NCHW input without padding.
///
/// Windows that would run past the bottom or right edge are dropped, so each
/// spatial dimension becomes `(n - pool) / stride + 1`; for a 2x2 window with
/// stride 2 that is `floor(n / 2)`. A NaN anywhere in a window makes that
/// output NaN.
#[derive(Debug, Clone)]
pub struct MaxPooling2D {
    name: String,
    pool_size: (usize, usize),
    strides: (usize, usize),
}

impl MaxPooling2D {
    /// `strides` defaults to `pool_size`.
    pub fn new(
        name: String,
        pool_size: (usize, usize),
        strides: Option<(usize, usize)>,
    ) -> Result<Self> {
        let strides = strides.unwrap_or(pool_size);
        if pool_size.0 == 0 || pool_size.1 == 0 || strides.0 == 0 || strides.1 == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: pool size {:?} and strides {:?} must be positive",
                name, pool_size, strides
            )));
        }

        Ok(Self {
            name,
            pool_size,
            strides,
        })
    }

    pub fn pool_size(&self) -> (usize, usize) {
        self.pool_size
    }

    fn compute_output_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        if height < self.pool_size.0 || width < self.pool_size.1 {
            return Err(Error::Layer(format!(
                "MaxPooling2D {}: input {}x{} is smaller than pool {:?}",
                self.name, height, width, self.pool_size
            )));
        }

        let out_height = (height - self.pool_size.0) / self.strides.0 + 1;
        let out_width = (width - self.pool_size.1) / self.strides.1 + 1;

        Ok((out_height, out_width))
    }
}

impl super::Layer for MaxPooling2D {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input_shape = input.shape();

        let is_batched = match input_shape.len() {
            4 => true,
            3 => false,
            _ => {
                return Err(Error::Layer(format!(
                    "MaxPooling2D expects 3D or 4D input, got {:?}",
                    input_shape
                )))
            }
        };

        let data = input.data().view();
        let input_4d = if is_batched {
            data.into_dimensionality::<Ix4>()
        } else {
            data.insert_axis(Axis(0)).into_dimensionality::<Ix4>()
        }
        .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?;

        let (batch_size, channels, height, width) = input_4d.dim();
        let (out_height, out_width) = self.compute_output_size(height, width)?;

        let mut output = Array4::zeros((batch_size, channels, out_height, out_width));

        for ((b, c, oh, ow), out) in output.indexed_iter_mut() {
            let h_start = oh * self.strides.0;
            let w_start = ow * self.strides.1;
            let window = input_4d.slice(s![
                b,
                c,
                h_start..h_start + self.pool_size.0,
                w_start..w_start + self.pool_size.1
            ]);
            *out = window.fold(f32::NEG_INFINITY, |acc, &v| {
                if v.is_nan() || v > acc {
                    v
                } else {
                    acc
                }
            });
        }

        let output = if is_batched {
            output.into_dyn()
        } else {
            output.index_axis_move(Axis(0), 0).into_dyn()
        };

        Ok(Tensor::new(output))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let rank = input_shape.len();
        if rank != 3 && rank != 4 {
            return Err(Error::Layer(format!(
                "MaxPooling2D expects 3D or 4D input, got {:?}",
                input_shape
            )));
        }

        let (out_height, out_width) =
            self.compute_output_size(input_shape[rank - 2], input_shape[rank - 1])?;

        let mut shape = input_shape[..rank - 2].to_vec();
        shape.extend([out_height, out_width]);
        Ok(shape)
    }
}
