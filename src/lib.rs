//! # Simple CNN
//!
//! A small convolutional classifier for recognising coffee-machine models
//! from 299x299 RGB photos. Inference only: parameters are initialised from an
//! explicit policy and can be updated by an external optimiser through the
//! parameter visitors, but no training happens here.
//!
//! ## Example
//!
//! ```rust,no_run
//! use simple_cnn::{SimpleCnn, SimpleCnnConfig, Tensor};
//!
//! # fn main() -> simple_cnn::Result<()> {
//! let model = SimpleCnn::new(SimpleCnnConfig::new(10).with_seed(42))?;
//! let batch = Tensor::zeros(&[1, 3, 299, 299]);
//! let scores = model.forward(&batch)?;
//! assert_eq!(scores.shape(), &[1, 10]);
//! # Ok(())
//! # }
//! ```

pub mod activations;
mod conv2d_impl;
pub mod error;
pub mod initializer;
pub mod layers;
pub mod model;
pub mod tensor;

pub use error::{Error, Result};
pub use initializer::{InitPolicy, Initializer, ParamInitializer, ParamKind, ParamSpec};
pub use model::{Sequential, SimpleCnn, SimpleCnnConfig};
pub use tensor::Tensor;
