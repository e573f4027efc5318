pub mod conv2d;
pub mod dense;
pub mod flatten;
pub mod pooling;

use ndarray::{ArrayViewD, ArrayViewMutD};

use crate::{initializer::ParamKind, Result, Tensor};

/// Callback receiving `(layer name, parameter kind, values)`.
pub type ParamVisitor<'v> = dyn FnMut(&str, ParamKind, ArrayViewD<'_, f32>) + 'v;
pub type ParamVisitorMut<'v> = dyn FnMut(&str, ParamKind, ArrayViewMutD<'_, f32>) + 'v;

pub trait Layer: std::fmt::Debug + Send + Sync {
    fn forward(&self, input: &Tensor) -> Result<Tensor>;
    fn name(&self) -> &str;
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>>;

    fn num_params(&self) -> usize {
        0
    }

    /// Parameterless layers visit nothing.
    fn visit_params(&self, _visitor: &mut ParamVisitor<'_>) {}

    fn visit_params_mut(&mut self, _visitor: &mut ParamVisitorMut<'_>) {}
}

pub use conv2d::{Conv2D, Conv2DConfig};
pub use dense::{Dense, DenseConfig};
pub use flatten::Flatten;
pub use pooling::MaxPooling2D;
