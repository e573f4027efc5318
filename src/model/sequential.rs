use crate::{
    layers::{Layer, ParamVisitor, ParamVisitorMut},
    Error, Result, Tensor,
};

/// Ordered stack of layers, each fed the previous layer's output.
#[derive(Debug)]
pub struct Sequential {
    name: String,
    layers: Vec<Box<dyn Layer>>,
    input_shape: Option<Vec<usize>>,
}

impl Sequential {
    pub fn new(name: String) -> Self {
        Self {
            name,
            layers: Vec::new(),
            input_shape: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    /// Input shape including the batch axis, used by [`Sequential::summary`].
    pub fn set_input_shape(&mut self, shape: Vec<usize>) {
        self.input_shape = Some(shape);
    }

    pub fn input_shape(&self) -> Option<&[usize]> {
        self.input_shape.as_deref()
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.num_params()).sum()
    }

    pub fn visit_params(&self, visitor: &mut ParamVisitor<'_>) {
        for layer in &self.layers {
            layer.visit_params(visitor);
        }
    }

    pub fn visit_params_mut(&mut self, visitor: &mut ParamVisitorMut<'_>) {
        for layer in &mut self.layers {
            layer.visit_params_mut(visitor);
        }
    }

    pub fn predict(&self, input: &Tensor) -> Result<Tensor> {
        self.run(input, |_| {})
    }

    /// Like [`Sequential::predict`], also returning every layer's output in order.
    pub fn predict_with_trace(&self, input: &Tensor) -> Result<(Tensor, Vec<Tensor>)> {
        let mut trace = Vec::with_capacity(self.layers.len());
        let output = self.run(input, |t| trace.push(t.clone()))?;
        Ok((output, trace))
    }

    fn run<F>(&self, input: &Tensor, mut observe: F) -> Result<Tensor>
    where
        F: FnMut(&Tensor),
    {
        if self.layers.is_empty() {
            return Err(Error::Layer(format!(
                "Cannot predict with empty model {}",
                self.name
            )));
        }

        let mut current = input.clone();

        for (idx, layer) in self.layers.iter().enumerate() {
            current = layer.forward(&current).map_err(|e| match e {
                Error::ShapeMismatch { .. } => e,
                e => Error::Layer(format!("Layer {} ({}): {}", idx, layer.name(), e)),
            })?;
            log::debug!("{} -> {:?}", layer.name(), current.shape());
            observe(&current);
        }

        Ok(current)
    }

    pub fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let mut current_shape = input_shape.to_vec();

        for layer in &self.layers {
            current_shape = layer.output_shape(&current_shape)?;
        }

        Ok(current_shape)
    }

    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("Model: {}\n", self.name));
        s.push_str("_________________________________________________________________\n");
        s.push_str("Layer (type)                 Output Shape              Param #\n");
        s.push_str("=================================================================\n");

        let mut current_shape = self.input_shape.clone().unwrap_or_default();

        for layer in &self.layers {
            if !current_shape.is_empty() {
                current_shape = layer.output_shape(&current_shape).unwrap_or_default();
            }

            s.push_str(&format!(
                "{:28} {:25} {}\n",
                layer.name(),
                format!("{:?}", current_shape),
                layer.num_params()
            ));
        }

        s.push_str("=================================================================\n");
        s.push_str(&format!("Total layers: {}\n", self.layers.len()));
        s.push_str(&format!("Total params: {}\n", self.num_params()));

        s
    }
}
