use crate::{Result, Tensor};

/// Collapses every axis after the batch axis, keeping row-major element order.
#[derive(Debug, Clone)]
pub struct Flatten {
    name: String,
}

impl Flatten {
    pub fn new(name: String) -> Self {
        Self { name }
    }

    fn flattened(shape: &[usize]) -> Vec<usize> {
        match shape {
            [] => vec![1],
            [_] => vec![shape.iter().product()],
            [batch_size, rest @ ..] => vec![*batch_size, rest.iter().product()],
        }
    }
}

impl super::Layer for Flatten {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        input.reshape(&Self::flattened(input.shape()))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        Ok(Self::flattened(input_shape))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Layer;
    use super::*;

    #[test]
    fn test_flatten() {
        let layer = Flatten::new("test_flatten".to_string());

        let input = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 2]);

        let input = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 1, 3]).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 3]);
    }

    #[test]
    fn test_flatten_preserves_channel_major_order() {
        let layer = Flatten::new("flatten".to_string());

        let input = Tensor::from_vec((0..8).map(|v| v as f32).collect(), &[1, 2, 2, 2]).unwrap();
        let output = layer.forward(&input).unwrap();

        assert_eq!(output.shape(), &[1, 8]);
        assert_eq!(output.to_vec(), (0..8).map(|v| v as f32).collect::<Vec<_>>());
        assert_eq!(layer.output_shape(&[4, 64, 37, 37]).unwrap(), vec![4, 87616]);
    }
}
