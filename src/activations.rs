use crate::Tensor;
use ndarray::Zip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    ReLU,
}

impl Activation {
    pub fn apply(&self, tensor: &mut Tensor) {
        match self {
            Activation::Linear => {}
            Activation::ReLU => {
                Zip::from(tensor.data_mut()).for_each(|x| {
                    *x = x.max(0.0);
                });
            }
        }
    }
}
