use crate::{
    activations::Activation,
    initializer::{draw, ParamInitializer, ParamKind, ParamSpec},
    Error, Result, Tensor,
};
use ndarray::{Array1, Array2, Ix1, Ix2, IxDyn};

use super::{ParamVisitor, ParamVisitorMut};

/// Fully connected layer computing `x · W + b`, weights stored `[inputs, units]`.
#[derive(Debug, Clone)]
pub struct Dense {
    name: String,
    weights: Array2<f32>,
    bias: Option<Array1<f32>>,
    activation: Activation,
    units: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseConfig {
    pub inputs: usize,
    pub units: usize,
    pub activation: Activation,
}

impl DenseConfig {
    pub fn new(inputs: usize, units: usize) -> Self {
        Self {
            inputs,
            units,
            activation: Activation::Linear,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn init<I>(&self, name: &str, initializer: &mut I) -> Result<Dense>
    where
        I: ParamInitializer + ?Sized,
    {
        let weights = draw(
            initializer,
            &ParamSpec {
                layer: name,
                kind: ParamKind::Weight,
                shape: &[self.inputs, self.units],
                fan_in: self.inputs,
                fan_out: self.units,
            },
        )?
        .into_dimensionality::<Ix2>()
        .map_err(|e| Error::Layer(format!("{}: bad weights from initializer: {}", name, e)))?;

        let bias = draw(
            initializer,
            &ParamSpec {
                layer: name,
                kind: ParamKind::Bias,
                shape: &[self.units],
                fan_in: self.inputs,
                fan_out: self.units,
            },
        )?
        .into_dimensionality::<Ix1>()
        .map_err(|e| Error::Layer(format!("{}: bad bias from initializer: {}", name, e)))?;

        Dense::new(name.to_string(), weights, Some(bias), self.activation)
    }
}

impl Dense {
    pub fn new(
        name: String,
        weights: Array2<f32>,
        bias: Option<Array1<f32>>,
        activation: Activation,
    ) -> Result<Self> {
        let units = weights.ncols();

        if units == 0 || weights.nrows() == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: weight matrix {:?} has a zero dimension",
                name,
                weights.shape()
            )));
        }

        if let Some(ref b) = bias {
            if b.len() != units {
                return Err(Error::Layer(format!(
                    "Bias size {} doesn't match units {}",
                    b.len(),
                    units
                )));
            }
        }

        Ok(Self {
            name,
            weights,
            bias,
            activation,
            units,
        })
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut Array2<f32> {
        &mut self.weights
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Array1<f32>> {
        self.bias.as_mut()
    }
}

impl super::Layer for Dense {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input_shape = input.shape();

        let (batch_size, features) = match *input_shape {
            [features] => (1, features),
            [batch_size, features] => (batch_size, features),
            _ => {
                return Err(Error::Layer(format!(
                    "Dense layer expects 1D or 2D input, got {:?}",
                    input_shape
                )))
            }
        };

        if features != self.inputs() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.inputs()],
                actual: vec![features],
            });
        }

        let input_2d = input
            .data()
            .view()
            .into_shape_with_order((batch_size, features))
            .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?;

        let mut output = input_2d.dot(&self.weights);

        if let Some(ref bias) = self.bias {
            output += bias;
        }

        let output_shape = if input_shape.len() == 1 {
            vec![self.units]
        } else {
            vec![batch_size, self.units]
        };

        let output_dyn = output
            .into_shape_with_order(IxDyn(&output_shape))
            .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?;

        let mut tensor = Tensor::new(output_dyn);
        self.activation.apply(&mut tensor);

        Ok(tensor)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let features = match *input_shape {
            [features] | [_, features] => features,
            _ => {
                return Err(Error::Layer(format!(
                    "Dense layer expects 1D or 2D input, got {:?}",
                    input_shape
                )))
            }
        };

        if features != self.inputs() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.inputs()],
                actual: vec![features],
            });
        }

        if input_shape.len() == 1 {
            Ok(vec![self.units])
        } else {
            Ok(vec![input_shape[0], self.units])
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

#[cfg(test)]
mod tests {
    use super::super::Layer;
    use super::*;
    use crate::initializer::{InitPolicy, Initializer};
    use ndarray::array;

    #[test]
    fn test_dense_forward() {
        let weights = array![[1.0, 2.0], [3.0, 4.0]];
        let bias = Some(array![0.1, 0.2]);

        let layer =
            Dense::new("test_dense".to_string(), weights, bias, Activation::Linear).unwrap();

        let input = Tensor::from_vec(vec![1.0, 1.0], &[2]).unwrap();
        let output = layer.forward(&input).unwrap();

        let result = output.to_vec();
        assert_eq!(result.len(), 2);
        assert!((result[0] - 4.1).abs() < 1e-6);
        assert!((result[1] - 6.2).abs() < 1e-6);
    }

    #[test]
    fn test_dense_with_relu() {
        let weights = array![[1.0, -2.0], [-3.0, 4.0]];

        let layer = Dense::new("test_dense".to_string(), weights, None, Activation::ReLU).unwrap();

        let input = Tensor::from_vec(vec![1.0, 1.0], &[2]).unwrap();
        let output = layer.forward(&input).unwrap();

        assert_eq!(output.to_vec(), vec![0.0, 2.0]);
    }

    #[test]
    fn test_dense_config_init_shapes() {
        let mut policy = InitPolicy::new(Initializer::XavierUniform(1.0), Initializer::Zeros, Some(9));
        let layer = DenseConfig::new(6, 4)
            .with_activation(Activation::ReLU)
            .init("fc", &mut policy)
            .unwrap();

        assert_eq!(layer.inputs(), 6);
        assert_eq!(layer.units(), 4);
        assert_eq!(layer.num_params(), 6 * 4 + 4);
        assert_eq!(layer.output_shape(&[5, 6]).unwrap(), vec![5, 4]);
        assert!(layer.output_shape(&[5, 7]).is_err());
    }
}
