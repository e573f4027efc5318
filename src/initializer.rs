//! Parameter initialisation.
//!
//! Every parameter tensor of a model is produced by a [`ParamInitializer`].
//! [`InitPolicy`] pairs one [`Initializer`] for weights with one for biases and
//! draws from a seedable generator, so two models built from the same seed are
//! identical. Any `FnMut(&ParamSpec) -> Result<ArrayD<f32>>` closure can stand
//! in for the policy when a test or an importer needs exact values.

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Weight,
    Bias,
}

/// Description of a parameter tensor about to be initialised.
///
/// `fan_in` and `fan_out` are those of the owning layer's weight, for biases too.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec<'a> {
    pub layer: &'a str,
    pub kind: ParamKind,
    pub shape: &'a [usize],
    pub fan_in: usize,
    pub fan_out: usize,
}

pub trait ParamInitializer {
    fn init(&mut self, param: &ParamSpec<'_>) -> Result<ArrayD<f32>>;
}

impl<F> ParamInitializer for F
where
    F: FnMut(&ParamSpec<'_>) -> Result<ArrayD<f32>>,
{
    fn init(&mut self, param: &ParamSpec<'_>) -> Result<ArrayD<f32>> {
        self(param)
    }
}

/// Runs `initializer` for one parameter and rejects arrays whose shape differs
/// from `param.shape`.
pub(crate) fn draw<I>(initializer: &mut I, param: &ParamSpec<'_>) -> Result<ArrayD<f32>>
where
    I: ParamInitializer + ?Sized,
{
    let values = initializer.init(param)?;
    if values.shape() != param.shape {
        return Err(Error::ShapeMismatch {
            expected: param.shape.to_vec(),
            actual: values.shape().to_vec(),
        });
    }
    Ok(values)
}

/// Value distribution for a parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    /// Every element set to the given value
    Constant(f64),
    Zeros,
    /// Uniform over `[low, high)`
    Uniform(f64, f64),
    /// Uniform over `[-1/sqrt(fan_in), 1/sqrt(fan_in))`
    NormalizedUniform,
    /// Normal with the given mean and standard deviation
    Normal(f64, f64),
    /// Glorot uniform with the given gain
    XavierUniform(f64),
    /// Glorot normal with the given gain
    XavierNormal(f64),
    /// He normal: `N(0, sqrt(2/fan_in))`
    HeNormal,
}

impl Initializer {
    pub fn sample<R: Rng + ?Sized>(
        &self,
        shape: &[usize],
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        match *self {
            Self::Constant(value) => Ok(ArrayD::from_elem(IxDyn(shape), value as f32)),
            Self::Zeros => Ok(ArrayD::zeros(IxDyn(shape))),
            Self::Uniform(low, high) => sample_uniform(shape, low, high, rng),
            Self::NormalizedUniform => {
                let k = 1.0 / (checked_fan(fan_in)? as f64).sqrt();
                sample_uniform(shape, -k, k, rng)
            }
            Self::Normal(mean, std) => sample_normal(shape, mean, std, rng),
            Self::XavierUniform(gain) => {
                let fan_sum = checked_fan(fan_in + fan_out)? as f64;
                let a = gain * (6.0 / fan_sum).sqrt();
                sample_uniform(shape, -a, a, rng)
            }
            Self::XavierNormal(gain) => {
                let fan_sum = checked_fan(fan_in + fan_out)? as f64;
                let std = gain * (2.0 / fan_sum).sqrt();
                sample_normal(shape, 0.0, std, rng)
            }
            Self::HeNormal => {
                let std = (2.0 / checked_fan(fan_in)? as f64).sqrt();
                sample_normal(shape, 0.0, std, rng)
            }
        }
    }
}

fn checked_fan(fan: usize) -> Result<usize> {
    if fan == 0 {
        return Err(Error::InvalidConfig(
            "fan-scaled initializer needs a non-zero fan".to_string(),
        ));
    }
    Ok(fan)
}

fn sample_uniform<R: Rng + ?Sized>(
    shape: &[usize],
    low: f64,
    high: f64,
    rng: &mut R,
) -> Result<ArrayD<f32>> {
    let dist = Uniform::new(low as f32, high as f32).map_err(|e| {
        Error::InvalidConfig(format!("uniform initializer [{}, {}): {}", low, high, e))
    })?;
    Ok(ArrayD::from_shape_fn(IxDyn(shape), |_| dist.sample(rng)))
}

fn sample_normal<R: Rng + ?Sized>(
    shape: &[usize],
    mean: f64,
    std: f64,
    rng: &mut R,
) -> Result<ArrayD<f32>> {
    let dist = Normal::new(mean as f32, std as f32).map_err(|e| {
        Error::InvalidConfig(format!("normal initializer ({}, {}): {}", mean, std, e))
    })?;
    Ok(ArrayD::from_shape_fn(IxDyn(shape), |_| dist.sample(rng)))
}

/// Weight and bias initializers drawing from one generator.
#[derive(Debug, Clone)]
pub struct InitPolicy {
    weight: Initializer,
    bias: Initializer,
    rng: StdRng,
}

impl InitPolicy {
    /// Seeded from the OS when `seed` is `None`.
    pub fn new(weight: Initializer, bias: Initializer, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { weight, bias, rng }
    }

    pub fn weight(&self) -> Initializer {
        self.weight
    }

    pub fn bias(&self) -> Initializer {
        self.bias
    }
}

impl ParamInitializer for InitPolicy {
    fn init(&mut self, param: &ParamSpec<'_>) -> Result<ArrayD<f32>> {
        let initializer = match param.kind {
            ParamKind::Weight => self.weight,
            ParamKind::Bias => self.bias,
        };
        initializer.sample(param.shape, param.fan_in, param.fan_out, &mut self.rng)
    }
}
