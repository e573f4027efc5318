//! The coffee-machine classifier.
//!
//! Three `conv(3x3, stride 1, pad 1) -> ReLU -> maxpool(2x2)` stages widen the
//! channels 3 -> 16 -> 32 -> 64 while halving the resolution, then a flatten and
//! two dense layers map the 64-channel feature map to per-class scores:
//!
//! ```text
//! (N, 3, 299, 299) -> (N, 16, 149, 149) -> (N, 32, 74, 74) -> (N, 64, 37, 37)
//!                  -> (N, 87616) -> (N, 512) -> (N, num_classes)
//! ```
//!
//! The flatten width is derived from the configured input resolution rather
//! than fixed, but the resolution itself is still checked on every forward.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Axis, Ix2};
use serde::{Deserialize, Serialize};

use crate::{
    activations::Activation,
    initializer::{InitPolicy, Initializer, ParamInitializer},
    layers::{Conv2DConfig, DenseConfig, Flatten, MaxPooling2D, ParamVisitor, ParamVisitorMut},
    Error, Result, Sequential, Tensor,
};

pub const INPUT_CHANNELS: usize = 3;
pub const STAGE_CHANNELS: [usize; 3] = [16, 32, 64];
pub const HIDDEN_UNITS: usize = 512;
pub const DEFAULT_NUM_CLASSES: usize = 10;
pub const DEFAULT_INPUT_SIZE: (usize, usize) = (299, 299);

const KERNEL_SIZE: usize = 3;
const CONV_PADDING: usize = 1;
const POOL_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleCnnConfig {
    pub num_classes: usize,
    /// `(height, width)` of every input image.
    pub input_size: (usize, usize),
    /// Seed for parameter initialisation; drawn from the OS when absent.
    pub seed: Option<u64>,
    pub weight_init: Initializer,
    pub bias_init: Initializer,
}

impl Default for SimpleCnnConfig {
    fn default() -> Self {
        Self {
            num_classes: DEFAULT_NUM_CLASSES,
            input_size: DEFAULT_INPUT_SIZE,
            seed: None,
            weight_init: Initializer::NormalizedUniform,
            bias_init: Initializer::NormalizedUniform,
        }
    }
}

impl SimpleCnnConfig {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Default::default()
        }
    }

    pub fn with_input_size(mut self, height: usize, width: usize) -> Self {
        self.input_size = (height, width);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_initializers(mut self, weight_init: Initializer, bias_init: Initializer) -> Self {
        self.weight_init = weight_init;
        self.bias_init = bias_init;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(Error::InvalidConfig(
                "num_classes must be positive".to_string(),
            ));
        }
        self.flatten_size().map(|_| ())
    }

    /// Per-sample `[channels, height, width]` after each of the three stages.
    pub fn stage_shapes(&self) -> Result<[[usize; 3]; 3]> {
        let (mut height, mut width) = self.input_size;
        let mut shapes = [[0; 3]; 3];

        for (shape, &channels) in shapes.iter_mut().zip(STAGE_CHANNELS.iter()) {
            // The padded 3x3 convolution keeps the resolution; only pooling shrinks it.
            height /= POOL_SIZE;
            width /= POOL_SIZE;
            if height == 0 || width == 0 {
                return Err(Error::InvalidConfig(format!(
                    "input size {:?} is too small for three {}x{} poolings",
                    self.input_size, POOL_SIZE, POOL_SIZE
                )));
            }
            *shape = [channels, height, width];
        }

        Ok(shapes)
    }

    /// Length of the vector fed to the first dense layer.
    pub fn flatten_size(&self) -> Result<usize> {
        let [channels, height, width] = self.stage_shapes()?[2];
        channels
            .checked_mul(height)
            .and_then(|n| n.checked_mul(width))
            // fc1 holds flatten_size * HIDDEN_UNITS weights; ndarray caps lengths at isize::MAX.
            .filter(|n| {
                n.checked_mul(HIDDEN_UNITS)
                    .is_some_and(|weights| weights <= isize::MAX as usize)
            })
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "input size {:?} gives a flattened feature map too large to allocate",
                    self.input_size
                ))
            })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Feature extractor (`conv`/`pool` stages) followed by a dense classifier.
#[derive(Debug)]
pub struct SimpleCnn {
    config: SimpleCnnConfig,
    features: Sequential,
    classifier: Sequential,
}

impl SimpleCnn {
    /// Builds the network with the initializers and seed named in `config`.
    pub fn new(config: SimpleCnnConfig) -> Result<Self> {
        let mut policy = InitPolicy::new(config.weight_init, config.bias_init, config.seed);
        Self::with_initializer(config, &mut policy)
    }

    /// Builds the network drawing every parameter tensor from `initializer`,
    /// in order conv1..conv3 then fc1, fc2, weight before bias.
    pub fn with_initializer<I>(config: SimpleCnnConfig, initializer: &mut I) -> Result<Self>
    where
        I: ParamInitializer + ?Sized,
    {
        config.validate()?;
        let (height, width) = config.input_size;

        let mut features = Sequential::new("features".to_string());
        features.set_input_shape(vec![1, INPUT_CHANNELS, height, width]);

        let mut in_channels = INPUT_CHANNELS;
        for (idx, &filters) in STAGE_CHANNELS.iter().enumerate() {
            let conv = Conv2DConfig::new(in_channels, filters, KERNEL_SIZE)
                .with_padding(CONV_PADDING)
                .with_activation(Activation::ReLU)
                .init(&format!("conv{}", idx + 1), initializer)?;
            let pool = MaxPooling2D::new(
                format!("pool{}", idx + 1),
                (POOL_SIZE, POOL_SIZE),
                None,
            )?;

            features.add(Box::new(conv));
            features.add(Box::new(pool));
            in_channels = filters;
        }

        let flatten_size = config.flatten_size()?;
        let mut classifier = Sequential::new("classifier".to_string());
        let [channels, pooled_h, pooled_w] = config.stage_shapes()?[2];
        classifier.set_input_shape(vec![1, channels, pooled_h, pooled_w]);

        let fc1 = DenseConfig::new(flatten_size, HIDDEN_UNITS)
            .with_activation(Activation::ReLU)
            .init("fc1", initializer)?;
        let fc2 = DenseConfig::new(HIDDEN_UNITS, config.num_classes).init("fc2", initializer)?;

        classifier.add(Box::new(Flatten::new("flatten".to_string())));
        classifier.add(Box::new(fc1));
        classifier.add(Box::new(fc2));

        let model = Self {
            config,
            features,
            classifier,
        };

        log::info!(
            "built SimpleCnn: {} classes, input {:?}, flatten size {}, {} parameters",
            model.config.num_classes,
            model.config.input_size,
            flatten_size,
            model.num_params()
        );

        Ok(model)
    }

    pub fn config(&self) -> &SimpleCnnConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    /// Per-sample input shape `[3, height, width]`.
    pub fn input_shape(&self) -> [usize; 3] {
        let (height, width) = self.config.input_size;
        [INPUT_CHANNELS, height, width]
    }

    pub fn stage_shapes(&self) -> [[usize; 3]; 3] {
        // Validated at construction.
        self.config.stage_shapes().unwrap_or_default()
    }

    pub fn flatten_size(&self) -> usize {
        // Validated at construction.
        self.config.flatten_size().unwrap_or_default()
    }

    pub fn num_params(&self) -> usize {
        self.features.num_params() + self.classifier.num_params()
    }

    pub fn features(&self) -> &Sequential {
        &self.features
    }

    pub fn classifier(&self) -> &Sequential {
        &self.classifier
    }

    pub fn visit_params(&self, visitor: &mut ParamVisitor<'_>) {
        self.features.visit_params(visitor);
        self.classifier.visit_params(visitor);
    }

    pub fn visit_params_mut(&mut self, visitor: &mut ParamVisitorMut<'_>) {
        self.features.visit_params_mut(visitor);
        self.classifier.visit_params_mut(visitor);
    }

    /// Rejects anything but `(N, 3, height, width)` at the configured size.
    pub fn check_input(&self, input: &Tensor) -> Result<()> {
        let expected = self.input_shape();
        match input.shape() {
            [_, rest @ ..] if rest == &expected[..] => Ok(()),
            [_, rest @ ..] if rest.len() == 3 => Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                actual: rest.to_vec(),
            }),
            shape => Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                actual: shape.to_vec(),
            }),
        }
    }

    /// Class scores of shape `(N, num_classes)`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        let features = self.features.predict(input)?;
        self.classifier.predict(&features)
    }

    /// Outputs of the three `conv -> ReLU -> pool` stages.
    pub fn feature_maps(&self, input: &Tensor) -> Result<[Tensor; 3]> {
        self.check_input(input)?;
        let (_, trace) = self.features.predict_with_trace(input)?;
        let mut pooled = trace.into_iter().skip(1).step_by(2);

        match (pooled.next(), pooled.next(), pooled.next()) {
            (Some(stage1), Some(stage2), Some(stage3)) => Ok([stage1, stage2, stage3]),
            _ => Err(Error::Layer(
                "feature extractor produced fewer than three stages".to_string(),
            )),
        }
    }

    /// Row-wise softmax of the class scores.
    pub fn probabilities(&self, input: &Tensor) -> Result<Tensor> {
        let mut scores = self
            .forward(input)?
            .into_data()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?;

        for mut row in scores.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }

        Ok(Tensor::new(scores.into_dyn()))
    }

    /// Index of the highest-scoring class for each sample.
    pub fn classify(&self, input: &Tensor) -> Result<Vec<usize>> {
        let scores = self
            .forward(input)?
            .into_data()
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::Layer(format!("Reshape failed: {}", e)))?;

        Ok(scores
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (idx, &v)| {
                        if v > best.1 {
                            (idx, v)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect())
    }

    pub fn summary(&self) -> String {
        format!(
            "{}\n{}Total params: {}\n",
            self.features.summary(),
            self.classifier.summary(),
            self.num_params()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::ParamKind;
    use approx::assert_abs_diff_eq;

    fn small_config(num_classes: usize) -> SimpleCnnConfig {
        SimpleCnnConfig::new(num_classes)
            .with_input_size(16, 16)
            .with_seed(7)
    }

    #[test]
    fn test_default_config() {
        let config = SimpleCnnConfig::default();
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.input_size, (299, 299));
        assert_eq!(config.flatten_size().unwrap(), 64 * 37 * 37);
        assert_eq!(
            config.stage_shapes().unwrap(),
            [[16, 149, 149], [32, 74, 74], [64, 37, 37]]
        );
    }

    #[test]
    fn test_flatten_size_follows_input_size() {
        let config = SimpleCnnConfig::default().with_input_size(32, 20);
        assert_eq!(config.flatten_size().unwrap(), 64 * 4 * 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(SimpleCnnConfig::new(0).validate().is_err());
        assert!(SimpleCnnConfig::default().with_input_size(7, 299).validate().is_err());
        assert!(SimpleCnnConfig::default().with_input_size(8, 8).validate().is_ok());
    }

    #[test]
    fn test_oversized_input_is_invalid_config() {
        let config = SimpleCnnConfig::default().with_input_size(1 << 40, 1 << 40);

        assert!(matches!(config.flatten_size(), Err(Error::InvalidConfig(_))));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert!(matches!(SimpleCnn::new(config), Err(Error::InvalidConfig(_))));

        let wide = SimpleCnnConfig::default().with_input_size(8, usize::MAX);
        assert!(matches!(wide.flatten_size(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_small_forward_shapes() {
        let model = SimpleCnn::new(small_config(4)).unwrap();
        let input = Tensor::full(&[2, 3, 16, 16], 0.5);

        let output = model.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 4]);

        let maps = model.feature_maps(&input).unwrap();
        assert_eq!(maps[0].shape(), &[2, 16, 8, 8]);
        assert_eq!(maps[1].shape(), &[2, 32, 4, 4]);
        assert_eq!(maps[2].shape(), &[2, 64, 2, 2]);
        assert!(maps.iter().all(|m| m.data().iter().all(|&v| v >= 0.0)));
    }

    #[test]
    fn test_rejects_wrong_input() {
        let model = SimpleCnn::new(small_config(2)).unwrap();

        let shapes: [Vec<usize>; 4] = [
            vec![1, 1, 16, 16],
            vec![1, 3, 15, 16],
            vec![3, 16, 16],
            vec![1, 3, 32, 32],
        ];
        for shape in shapes {
            let result = model.forward(&Tensor::zeros(&shape));
            assert!(
                matches!(result, Err(Error::ShapeMismatch { .. })),
                "shape {:?} accepted",
                shape
            );
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let model = SimpleCnn::new(small_config(5)).unwrap();
        let input = Tensor::full(&[3, 3, 16, 16], -0.25);

        let probs = model.probabilities(&input).unwrap();
        assert_eq!(probs.shape(), &[3, 5]);
        for row in probs.data().axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_classify_picks_largest_bias() {
        let config = small_config(3).with_initializers(Initializer::Zeros, Initializer::Zeros);
        let mut model = SimpleCnn::new(config).unwrap();
        model.visit_params_mut(&mut |layer, kind, mut values| {
            if layer == "fc2" && kind == ParamKind::Bias {
                if let Some(bias) = values.as_slice_mut() {
                    bias[1] = 2.0;
                }
            }
        });

        let classes = model.classify(&Tensor::zeros(&[2, 3, 16, 16])).unwrap();
        assert_eq!(classes, vec![1, 1]);
    }

    #[test]
    fn test_summary_mentions_every_layer() {
        let model = SimpleCnn::new(small_config(2)).unwrap();
        let summary = model.summary();
        for name in ["conv1", "pool1", "conv3", "pool3", "flatten", "fc1", "fc2"] {
            assert!(summary.contains(name), "{} missing from summary", name);
        }
        for shape in ["[1, 16, 16, 16]", "[1, 64, 2, 2]", "[1, 256]", "[1, 512]", "[1, 2]"] {
            assert!(summary.contains(shape), "{} missing from summary:\n{}", shape, summary);
        }
        assert!(summary.contains(&format!("Total params: {}", model.num_params())));
    }
}
