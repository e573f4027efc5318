use crate::{
    activations::Activation,
    conv2d_impl::im2col,
    initializer::{draw, ParamInitializer, ParamKind, ParamSpec},
    Error, Result, Tensor,
};
use ndarray::{Array1, Array4, ArrayView4, Axis, Ix1, Ix4};

use super::{ParamVisitor, ParamVisitorMut};

/// 2D convolution over NCHW input with symmetric zero padding.
///
/// Kernels are stored `[filters, in_channels, kernel_h, kernel_w]`.
#[derive(Debug, Clone)]
pub struct Conv2D {
    name: String,
    kernel_size: (usize, usize),
    strides: (usize, usize),
    padding: (usize, usize),
    weights: Array4<f32>,
    bias: Option<Array1<f32>>,
    activation: Activation,
}

/// Hyperparameters for building a [`Conv2D`] from an initializer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conv2DConfig {
    pub in_channels: usize,
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: (usize, usize),
    pub activation: Activation,
}

impl Conv2DConfig {
    /// Square kernel, stride 1, no padding, no activation.
    pub fn new(in_channels: usize, filters: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            filters,
            kernel_size: (kernel_size, kernel_size),
            strides: (1, 1),
            padding: (0, 0),
            activation: Activation::Linear,
        }
    }

    pub fn with_strides(mut self, strides: usize) -> Self {
        self.strides = (strides, strides);
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = (padding, padding);
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn init<I>(&self, name: &str, initializer: &mut I) -> Result<Conv2D>
    where
        I: ParamInitializer + ?Sized,
    {
        let (kernel_h, kernel_w) = self.kernel_size;
        let weight_shape = [self.filters, self.in_channels, kernel_h, kernel_w];
        let fan_in = self.in_channels * kernel_h * kernel_w;
        let fan_out = self.filters * kernel_h * kernel_w;

        let weights = draw(
            initializer,
            &ParamSpec {
                layer: name,
                kind: ParamKind::Weight,
                shape: &weight_shape,
                fan_in,
                fan_out,
            },
        )?
        .into_dimensionality::<Ix4>()
        .map_err(|e| Error::Layer(format!("{}: bad kernel from initializer: {}", name, e)))?;

        let bias = draw(
            initializer,
            &ParamSpec {
                layer: name,
                kind: ParamKind::Bias,
                shape: &[self.filters],
                fan_in,
                fan_out,
            },
        )?
        .into_dimensionality::<Ix1>()
        .map_err(|e| Error::Layer(format!("{}: bad bias from initializer: {}", name, e)))?;

        Conv2D::new(
            name.to_string(),
            self.strides,
            self.padding,
            weights,
            Some(bias),
            self.activation,
        )
    }
}

impl Conv2D {
    pub fn new(
        name: String,
        strides: (usize, usize),
        padding: (usize, usize),
        weights: Array4<f32>,
        bias: Option<Array1<f32>>,
        activation: Activation,
    ) -> Result<Self> {
        let (filters, in_channels, kernel_h, kernel_w) = weights.dim();

        if filters == 0 || in_channels == 0 || kernel_h == 0 || kernel_w == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: kernel shape {:?} has a zero dimension",
                name,
                weights.shape()
            )));
        }

        if strides.0 == 0 || strides.1 == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: strides must be positive, got {:?}",
                name, strides
            )));
        }

        if let Some(ref b) = bias {
            if b.len() != filters {
                return Err(Error::Layer(format!(
                    "Bias size {} doesn't match filters {}",
                    b.len(),
                    filters
                )));
            }
        }

        Ok(Self {
            name,
            kernel_size: (kernel_h, kernel_w),
            strides,
            padding,
            weights: weights.as_standard_layout().into_owned(),
            bias,
            activation,
        })
    }

    pub fn filters(&self) -> usize {
        self.weights.dim().0
    }

    pub fn in_channels(&self) -> usize {
        self.weights.dim().1
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        self.kernel_size
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weights(&self) -> &Array4<f32> {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut Array4<f32> {
        &mut self.weights
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Array1<f32>> {
        self.bias.as_mut()
    }

    fn compute_output_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let padded_h = height + 2 * self.padding.0;
        let padded_w = width + 2 * self.padding.1;

        if padded_h < self.kernel_size.0 || padded_w < self.kernel_size.1 {
            return Err(Error::Layer(format!(
                "Conv2D {}: input {}x{} is smaller than kernel {:?} after padding",
                self.name, height, width, self.kernel_size
            )));
        }

        let out_height = (padded_h - self.kernel_size.0) / self.strides.0 + 1;
        let out_width = (padded_w - self.kernel_size.1) / self.strides.1 + 1;

        Ok((out_height, out_width))
    }

    fn convolve(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (batch_size, _, height, width) = input.dim();
        let (out_height, out_width) = self.compute_output_size(height, width)?;
        let filters = self.filters();

        let cols = im2col(
            input,
            self.kernel_size,
            self.strides,
            self.padding,
            (out_height, out_width),
        );

        let kernel_matrix = self
            .weights
            .view()
            .into_shape_with_order((filters, cols.ncols()))
            .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?;

        let mut output = cols.dot(&kernel_matrix.t());

        if let Some(ref bias) = self.bias {
            output += bias;
        }

        // Rows are (b, oh, ow) with filters along columns; move filters to axis 1.
        let output = output
            .into_shape_with_order((batch_size, out_height, out_width, filters))
            .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?
            .permuted_axes([0, 3, 1, 2]);

        Ok(output.as_standard_layout().into_owned())
    }
}

impl super::Layer for Conv2D {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input_shape = input.shape();

        let is_batched = match input_shape.len() {
            4 => true,
            3 => false,
            _ => {
                return Err(Error::Layer(format!(
                    "Conv2D expects 3D or 4D input, got {:?}",
                    input_shape
                )))
            }
        };

        let in_channels = input_shape[input_shape.len() - 3];
        if in_channels != self.in_channels() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.in_channels()],
                actual: vec![in_channels],
            });
        }

        let data = input.data().view();
        let input_4d = if is_batched {
            data.into_dimensionality::<Ix4>()
                .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?
        } else {
            data.insert_axis(Axis(0))
                .into_dimensionality::<Ix4>()
                .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?
        };

        let output = self.convolve(input_4d)?;
        let output = if is_batched {
            output.into_dyn()
        } else {
            output.index_axis_move(Axis(0), 0).into_dyn()
        };

        let mut tensor = Tensor::new(output);
        self.activation.apply(&mut tensor);

        Ok(tensor)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let (height, width, is_batched) = match input_shape.len() {
            4 => (input_shape[2], input_shape[3], true),
            3 => (input_shape[1], input_shape[2], false),
            _ => {
                return Err(Error::Layer(format!(
                    "Conv2D expects 3D or 4D input, got {:?}",
                    input_shape
                )))
            }
        };

        let (out_height, out_width) = self.compute_output_size(height, width)?;

        if is_batched {
            Ok(vec![input_shape[0], self.filters(), out_height, out_width])
        } else {
            Ok(vec![self.filters(), out_height, out_width])
        }
    }

    fn num_params(&self) -> usize {
        self.weights.len() + self.bias.as_ref().map_or(0, |b| b.len())
    }

    fn visit_params(&self, visitor: &mut ParamVisitor<'_>) {
        visitor(&self.name, ParamKind::Weight, self.weights.view().into_dyn());
        if let Some(ref bias) = self.bias {
            visitor(&self.name, ParamKind::Bias, bias.view().into_dyn());
        }
    }

    fn visit_params_mut(&mut self, visitor: &mut ParamVisitorMut<'_>) {
        visitor(&self.name, ParamKind::Weight, self.weights.view_mut().into_dyn());
        if let Some(ref mut bias) = self.bias {
            visitor(&self.name, ParamKind::Bias, bias.view_mut().into_dyn());
        }
    }
}
