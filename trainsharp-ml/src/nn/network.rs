//! Network abstraction: layers, parameters, state dicts and shared handles.

use ndarray::{Array1, Array2, ArrayD, Axis, Ix2, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use trainsharp_core::{Result, SharpError};

/// N-dimensional `f32` tensor.
pub type Tensor = ArrayD<f32>;

/// Serialized parameter state, keyed by `"{layer}.weight"` / `"{layer}.bias"`.
pub type StateDict = BTreeMap<String, Tensor>;

/// Broad layer family; decides how initializers treat the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Conv,
    Linear,
    BatchNorm,
    Other,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Conv => "Conv",
            Self::Linear => "Linear",
            Self::BatchNorm => "BatchNorm",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}

/// A trainable tensor with an optional accumulated gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub value: Tensor,
    pub grad: Option<Tensor>,
}

impl Parameter {
    pub fn new(value: Tensor) -> Self {
        Self { value, grad: None }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(Tensor::zeros(IxDyn(shape)))
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::new(Tensor::ones(IxDyn(shape)))
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Add `grad` to the accumulated gradient.
    pub fn accumulate_grad(&mut self, grad: &Tensor) -> Result<()> {
        if grad.shape() != self.value.shape() {
            return Err(SharpError::invalid_argument(format!(
                "gradient shape {:?} does not match parameter shape {:?}",
                grad.shape(),
                self.value.shape()
            )));
        }
        match &mut self.grad {
            Some(existing) => *existing += grad,
            None => self.grad = Some(grad.clone()),
        }
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
}

/// A named layer holding up to two parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub weight: Option<Parameter>,
    pub bias: Option<Parameter>,
}

impl Layer {
    /// Fully-connected layer with weight `[out, in]` and bias `[out]`.
    pub fn linear(name: impl Into<String>, in_features: usize, out_features: usize) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Linear,
            weight: Some(Parameter::zeros(&[out_features, in_features])),
            bias: Some(Parameter::zeros(&[out_features])),
        }
    }

    /// 2-D convolution with weight `[out, in, kh, kw]` and bias `[out]`.
    pub fn conv2d(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
    ) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Conv,
            weight: Some(Parameter::zeros(&[
                out_channels,
                in_channels,
                kernel.0,
                kernel.1,
            ])),
            bias: Some(Parameter::zeros(&[out_channels])),
        }
    }

    /// Batch normalization with scale `[features]` (ones) and shift `[features]`.
    pub fn batch_norm(name: impl Into<String>, features: usize) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::BatchNorm,
            weight: Some(Parameter::ones(&[features])),
            bias: Some(Parameter::zeros(&[features])),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.as_ref().map_or(0, Parameter::numel)
            + self.bias.as_ref().map_or(0, Parameter::numel)
    }

    /// `(key, parameter)` pairs, weight first.
    pub fn parameters(&self) -> impl Iterator<Item = (String, &Parameter)> {
        let name = &self.name;
        self.weight
            .iter()
            .map(move |p| (format!("{name}.weight"), p))
            .chain(self.bias.iter().map(move |p| (format!("{name}.bias"), p)))
    }

    pub fn parameters_mut(&mut self) -> impl Iterator<Item = (String, &mut Parameter)> {
        let name = &self.name;
        self.weight
            .iter_mut()
            .map(move |p| (format!("{name}.weight"), p))
            .chain(
                self.bias
                    .iter_mut()
                    .map(move |p| (format!("{name}.bias"), p)),
            )
    }

    /// `x · Wᵀ + b` for a batch `x` of shape `[batch, in]`.
    pub fn forward_linear(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if self.kind != LayerKind::Linear {
            return Err(SharpError::invalid_argument(format!(
                "layer {} is {}, not Linear",
                self.name, self.kind
            )));
        }
        let weight = self
            .weight
            .as_ref()
            .ok_or_else(|| SharpError::invalid_argument("linear layer without weight"))?
            .value
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| SharpError::invalid_argument(e.to_string()))?;
        if x.ncols() != weight.ncols() {
            return Err(SharpError::invalid_argument(format!(
                "input has {} features, layer {} expects {}",
                x.ncols(),
                self.name,
                weight.ncols()
            )));
        }
        let mut out = x.dot(&weight.t());
        if let Some(bias) = &self.bias {
            let bias: Array1<f32> = bias
                .value
                .clone()
                .into_dimensionality()
                .map_err(|e| SharpError::invalid_argument(e.to_string()))?;
            out += &bias.insert_axis(Axis(0));
        }
        Ok(out)
    }
}

/// A trainable network made of named layers.
///
/// Implementors only expose their layers; state-dict handling is shared.
pub trait Network: Send {
    fn layers(&self) -> &[Layer];

    fn layers_mut(&mut self) -> &mut [Layer];

    fn num_parameters(&self) -> usize {
        self.layers().iter().map(Layer::num_parameters).sum()
    }

    fn state_dict(&self) -> StateDict {
        self.layers()
            .iter()
            .flat_map(|layer| layer.parameters())
            .map(|(key, param)| (key, param.value.clone()))
            .collect()
    }

    /// Fails with `DuplicateName` when two layers share a name, since their
    /// state-dict keys would collide.
    fn check_layer_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for layer in self.layers() {
            if !seen.insert(layer.name.as_str()) {
                return Err(SharpError::DuplicateName(layer.name.clone()));
            }
        }
        Ok(())
    }

    /// Strictly load `state`: every parameter must be present with a matching
    /// shape, and no extra keys are allowed. Nothing is written unless the
    /// whole state matches.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        self.check_layer_names()?;

        let mut expected = 0;
        for (key, param) in self.layers().iter().flat_map(|layer| layer.parameters()) {
            let tensor = state
                .get(&key)
                .ok_or_else(|| SharpError::checkpoint(format!("missing key {key}")))?;
            if tensor.shape() != param.value.shape() {
                return Err(SharpError::checkpoint(format!(
                    "shape mismatch for {key}: checkpoint {:?}, network {:?}",
                    tensor.shape(),
                    param.value.shape()
                )));
            }
            expected += 1;
        }
        if expected != state.len() {
            return Err(SharpError::checkpoint(format!(
                "checkpoint has {} keys, network expects {expected}",
                state.len()
            )));
        }

        for layer in self.layers_mut() {
            for (key, param) in layer.parameters_mut() {
                if let Some(tensor) = state.get(&key) {
                    param.value.assign(tensor);
                }
            }
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for layer in self.layers_mut() {
            for (_, param) in layer.parameters_mut() {
                param.zero_grad();
            }
        }
    }
}

/// Layers applied one after another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }
}

impl Network for Sequential {
    fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }
}

/// Shared, mutable reference to a network owned by the training loop.
///
/// Cloning the handle shares the network; the `restored` flag is shared too.
#[derive(Clone)]
pub struct NetworkHandle {
    net: Arc<Mutex<dyn Network>>,
    restored: Arc<AtomicBool>,
}

impl NetworkHandle {
    pub fn new<N: Network + 'static>(network: N) -> Self {
        let net: Arc<Mutex<dyn Network>> = Arc::new(Mutex::new(network));
        Self {
            net,
            restored: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lock the network. A poisoned lock still yields the network.
    pub fn lock(&self) -> MutexGuard<'_, dyn Network + 'static> {
        self.net.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a checkpoint has been loaded into this network.
    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_restored(&self) {
        self.restored.store(true, Ordering::SeqCst);
    }

    /// True when both handles point at the same network.
    pub fn same_network(&self, other: &NetworkHandle) -> bool {
        Arc::ptr_eq(&self.net, &other.net)
    }
}

impl fmt::Debug for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkHandle")
            .field("num_parameters", &self.lock().num_parameters())
            .field("restored", &self.is_restored())
            .finish()
    }
}

/// One row of a [`NetworkSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: LayerKind,
    pub weight_shape: Option<Vec<usize>>,
    pub num_parameters: usize,
}

/// Architecture printout: layers and parameter counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSummary {
    pub layers: Vec<LayerSummary>,
    pub total_parameters: usize,
}

pub fn summary(network: &dyn Network) -> NetworkSummary {
    let layers: Vec<LayerSummary> = network
        .layers()
        .iter()
        .map(|layer| LayerSummary {
            name: layer.name.clone(),
            kind: layer.kind,
            weight_shape: layer.weight.as_ref().map(|w| w.shape().to_vec()),
            num_parameters: layer.num_parameters(),
        })
        .collect();
    let total_parameters = layers.iter().map(|l| l.num_parameters).sum();
    NetworkSummary {
        layers,
        total_parameters,
    }
}

impl fmt::Display for NetworkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for layer in &self.layers {
            let shape = layer
                .weight_shape
                .as_ref()
                .map_or_else(|| "-".to_string(), |s| format!("{s:?}"));
            writeln!(
                f,
                "  ({}): {}{} params={}",
                layer.name, layer.kind, shape, layer.num_parameters
            )?;
        }
        write!(f, "Total number of parameters: {}", self.total_parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn small_net() -> Sequential {
        Sequential::new()
            .push(Layer::conv2d("conv1", 3, 8, (3, 3)))
            .push(Layer::batch_norm("bn1", 8))
            .push(Layer::linear("fc", 8, 2))
    }

    #[test]
    fn test_parameter_counts() {
        let net = small_net();
        // conv: 8*3*3*3 + 8, bn: 8 + 8, fc: 2*8 + 2
        assert_eq!(net.num_parameters(), 224 + 16 + 18);
        let s = summary(&net);
        assert_eq!(s.total_parameters, 258);
        assert_eq!(s.layers[0].weight_shape, Some(vec![8, 3, 3, 3]));
        assert!(s.to_string().ends_with("Total number of parameters: 258"));
    }

    #[test]
    fn test_state_dict_keys() {
        let keys: Vec<String> = small_net().state_dict().into_keys().collect();
        assert_eq!(
            keys,
            vec![
                "bn1.bias", "bn1.weight", "conv1.bias", "conv1.weight", "fc.bias", "fc.weight"
            ]
        );
    }

    #[test]
    fn test_load_state_dict_roundtrip_and_strictness() {
        let mut source = small_net();
        source.layers_mut()[2].weight.as_mut().unwrap().value.fill(0.5);
        let state = source.state_dict();

        let mut target = small_net();
        target.load_state_dict(&state).unwrap();
        assert_eq!(target, source);

        let mut missing = state.clone();
        missing.remove("fc.bias");
        assert!(matches!(
            small_net().load_state_dict(&missing),
            Err(SharpError::Checkpoint(_))
        ));

        let mut extra = state.clone();
        extra.insert("ghost.weight".into(), Tensor::zeros(IxDyn(&[1])));
        assert!(small_net().load_state_dict(&extra).is_err());

        let mut wrong_shape = state;
        wrong_shape.insert("fc.bias".into(), Tensor::zeros(IxDyn(&[3])));
        assert!(small_net().load_state_dict(&wrong_shape).is_err());
    }

    #[test]
    fn test_failed_load_leaves_weights_untouched() {
        let mut net = Sequential::new().push(Layer::linear("fc", 3, 2));
        let before = net.state_dict();

        let mut state = StateDict::new();
        state.insert("fc.weight".into(), Tensor::from_elem(IxDyn(&[2, 3]), 9.0));
        state.insert("fc.bias".into(), Tensor::zeros(IxDyn(&[5])));
        assert!(matches!(net.load_state_dict(&state), Err(SharpError::Checkpoint(_))));
        assert_eq!(net.state_dict(), before);
    }

    #[test]
    fn test_duplicate_layer_names_rejected() {
        let mut net = Sequential::new()
            .push(Layer::linear("fc", 3, 2))
            .push(Layer::linear("fc", 3, 2));
        assert!(matches!(net.check_layer_names(), Err(SharpError::DuplicateName(name)) if name == "fc"));

        let state = net.state_dict();
        assert_eq!(state.len(), 2);
        assert!(matches!(net.load_state_dict(&state), Err(SharpError::DuplicateName(_))));
        assert!(small_net().check_layer_names().is_ok());
    }

    #[test]
    fn test_forward_linear() {
        let mut layer = Layer::linear("fc", 2, 1);
        layer.weight.as_mut().unwrap().value = array![[2.0f32, -1.0]].into_dyn();
        layer.bias.as_mut().unwrap().value = array![0.5f32].into_dyn();
        let out = layer.forward_linear(&array![[1.0, 1.0], [3.0, 2.0]]).unwrap();
        assert_eq!(out, array![[1.5], [4.5]]);
        assert!(layer.forward_linear(&array![[1.0, 1.0, 1.0]]).is_err());
        assert!(Layer::batch_norm("bn", 2).forward_linear(&array![[1.0, 1.0]]).is_err());
    }

    #[test]
    fn test_accumulate_grad() {
        let mut p = Parameter::zeros(&[2]);
        p.accumulate_grad(&array![1.0f32, 2.0].into_dyn()).unwrap();
        p.accumulate_grad(&array![1.0f32, 2.0].into_dyn()).unwrap();
        assert_eq!(p.grad, Some(array![2.0f32, 4.0].into_dyn()));
        assert!(p.accumulate_grad(&array![1.0f32].into_dyn()).is_err());
        p.zero_grad();
        assert!(p.grad.is_none());
    }

    #[test]
    fn test_handle_shares_network_and_flag() {
        let handle = NetworkHandle::new(small_net());
        let clone = handle.clone();
        assert!(handle.same_network(&clone));
        assert!(!clone.is_restored());
        handle.mark_restored();
        assert!(clone.is_restored());

        clone.lock().layers_mut()[0].name = "renamed".into();
        assert_eq!(handle.lock().layers()[0].name, "renamed");
    }
}
