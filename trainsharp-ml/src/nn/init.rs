//! Weight initialization for networks.

use super::network::{Layer, LayerKind, Network, Tensor};
use ndarray::Array2;
use rand::RngCore;
use rand::distributions::{Distribution, Uniform};
use rand_distr::Normal;
use trainsharp_core::{InitMethod, Result, SharpError};

const NORMAL_STD: f32 = 0.02;
const SPARSITY: f64 = 0.1;
const SPARSE_STD: f32 = 0.01;
const BATCH_NORM_LOW: f32 = 0.02;

/// `(fan_in, fan_out)` of a weight tensor.
///
/// The first two dimensions are output and input features; any further
/// dimensions form the receptive field.
pub fn fan_in_and_fan_out(shape: &[usize]) -> Result<(usize, usize)> {
    if shape.len() < 2 {
        return Err(SharpError::invalid_argument(format!(
            "fan in and fan out need at least 2 dimensions, got {shape:?}"
        )));
    }
    let receptive: usize = shape[2..].iter().product();
    Ok((shape[1] * receptive, shape[0] * receptive))
}

fn normal(mean: f32, std: f32) -> Result<Normal<f32>> {
    Normal::new(mean, std).map_err(|e| SharpError::invalid_argument(e.to_string()))
}

fn fill<D: Distribution<f32>>(tensor: &mut Tensor, dist: &D, rng: &mut dyn RngCore) {
    tensor.map_inplace(|v| *v = dist.sample(&mut *rng));
}

fn nonzero_fan(fan: usize, shape: &[usize]) -> Result<f32> {
    if fan == 0 {
        return Err(SharpError::invalid_argument(format!(
            "cannot initialize empty tensor of shape {shape:?}"
        )));
    }
    Ok(fan as f32)
}

/// Fill a Conv/Linear weight tensor in place according to `method`.
pub fn init_tensor(method: InitMethod, tensor: &mut Tensor, rng: &mut dyn RngCore) -> Result<()> {
    let shape = tensor.shape().to_vec();
    match method {
        InitMethod::Normal => fill(tensor, &normal(0.0, NORMAL_STD)?, rng),
        InitMethod::Uniform => fill(tensor, &Uniform::new(0.0f32, 1.0), rng),
        InitMethod::XavierNormal => {
            let (fan_in, fan_out) = fan_in_and_fan_out(&shape)?;
            let fan = nonzero_fan(fan_in + fan_out, &shape)?;
            fill(tensor, &normal(0.0, (2.0 / fan).sqrt())?, rng);
        }
        InitMethod::XavierUniform => {
            let (fan_in, fan_out) = fan_in_and_fan_out(&shape)?;
            let bound = (6.0 / nonzero_fan(fan_in + fan_out, &shape)?).sqrt();
            fill(tensor, &Uniform::new(-bound, bound), rng);
        }
        InitMethod::KaimingNormal => {
            let (fan_in, _) = fan_in_and_fan_out(&shape)?;
            let std = 2.0f32.sqrt() / nonzero_fan(fan_in, &shape)?.sqrt();
            fill(tensor, &normal(0.0, std)?, rng);
        }
        InitMethod::KaimingUniform => {
            let (fan_in, _) = fan_in_and_fan_out(&shape)?;
            let bound = 2.0f32.sqrt() * (3.0 / nonzero_fan(fan_in, &shape)?).sqrt();
            fill(tensor, &Uniform::new(-bound, bound), rng);
        }
        InitMethod::Orthogonal => {
            let values = orthogonal(&shape, rng)?;
            *tensor = Tensor::from_shape_vec(tensor.raw_dim(), values)
                .map_err(|e| SharpError::invalid_argument(e.to_string()))?;
        }
        InitMethod::Sparse => sparse(tensor, rng)?,
    }
    Ok(())
}

/// Rows (or columns, whichever are fewer) of the flattened `[shape[0], rest]`
/// matrix are orthonormal.
fn orthogonal(shape: &[usize], rng: &mut dyn RngCore) -> Result<Vec<f32>> {
    if shape.len() < 2 {
        return Err(SharpError::invalid_argument(format!(
            "orthogonal init needs at least 2 dimensions, got {shape:?}"
        )));
    }
    let rows = shape[0];
    let cols: usize = shape[1..].iter().product();
    let (m, n, transposed) = if rows < cols {
        (cols, rows, true)
    } else {
        (rows, cols, false)
    };

    let gaussian = Normal::new(0.0f64, 1.0).map_err(|e| SharpError::invalid_argument(e.to_string()))?;
    let mut a = Array2::<f64>::from_shape_simple_fn((m, n), || gaussian.sample(&mut *rng));

    // Modified Gram-Schmidt over the columns; R ends up with a positive diagonal.
    for j in 0..n {
        for k in 0..j {
            let q_k = a.column(k).to_owned();
            let proj = a.column(j).dot(&q_k);
            a.column_mut(j).scaled_add(-proj, &q_k);
        }
        let norm = a.column(j).dot(&a.column(j)).sqrt();
        if norm < 1e-12 {
            return Err(SharpError::invalid_argument(
                "degenerate random matrix in orthogonal init",
            ));
        }
        a.column_mut(j).mapv_inplace(|v| v / norm);
    }

    let q = if transposed { a.reversed_axes() } else { a };
    Ok(q.iter().map(|&v| v as f32).collect())
}

fn sparse(tensor: &mut Tensor, rng: &mut dyn RngCore) -> Result<()> {
    let &[rows, cols] = tensor.shape() else {
        return Err(SharpError::invalid_argument(format!(
            "sparse init only supports 2-D tensors, got {:?}",
            tensor.shape()
        )));
    };
    fill(tensor, &normal(0.0, SPARSE_STD)?, rng);
    let num_zeros = (SPARSITY * rows as f64).ceil() as usize;
    for col in 0..cols {
        for row in rand::seq::index::sample(&mut *rng, rows, num_zeros) {
            tensor[&[row, col][..]] = 0.0;
        }
    }
    Ok(())
}

/// Applies an [`InitMethod`] layer by layer.
///
/// Conv and Linear weights follow the method; their biases are left alone.
/// BatchNorm scales are drawn from N(1, 0.02) for `normal` and U(0.02, 1)
/// otherwise, with shifts set to zero. Other layers are untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Initializer {
    method: InitMethod,
}

impl Initializer {
    pub fn new(method: InitMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> InitMethod {
        self.method
    }

    pub fn init_layer(&self, layer: &mut Layer, rng: &mut dyn RngCore) -> Result<()> {
        match layer.kind {
            LayerKind::Conv | LayerKind::Linear => {
                if let Some(weight) = &mut layer.weight {
                    init_tensor(self.method, &mut weight.value, rng)?;
                }
            }
            LayerKind::BatchNorm => {
                if let Some(weight) = &mut layer.weight {
                    if self.method == InitMethod::Normal {
                        fill(&mut weight.value, &normal(1.0, NORMAL_STD)?, rng);
                    } else {
                        fill(&mut weight.value, &Uniform::new(BATCH_NORM_LOW, 1.0), rng);
                    }
                }
                if let Some(bias) = &mut layer.bias {
                    bias.value.fill(0.0);
                }
            }
            LayerKind::Other => {}
        }
        Ok(())
    }

    pub fn init_network(&self, network: &mut dyn Network, rng: &mut dyn RngCore) -> Result<()> {
        tracing::info!(method = %self.method, "Initializing network weights");
        for layer in network.layers_mut() {
            self.init_layer(layer, rng)?;
        }
        Ok(())
    }
}

impl From<InitMethod> for Initializer {
    fn from(method: InitMethod) -> Self {
        Self::new(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::network::Sequential;
    use ndarray::{Ix2, IxDyn};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn init(method: InitMethod, shape: &[usize]) -> Tensor {
        let mut t = Tensor::zeros(IxDyn(shape));
        init_tensor(method, &mut t, &mut rng()).unwrap();
        t
    }

    fn mean_std(t: &Tensor) -> (f32, f32) {
        let mean = t.mean().unwrap();
        let var = t.mapv(|v| (v - mean).powi(2)).mean().unwrap();
        (mean, var.sqrt())
    }

    #[test]
    fn test_fan_in_and_fan_out() {
        assert_eq!(fan_in_and_fan_out(&[8, 3, 3, 3]).unwrap(), (27, 72));
        assert_eq!(fan_in_and_fan_out(&[4, 5]).unwrap(), (5, 4));
        assert!(matches!(
            fan_in_and_fan_out(&[3]),
            Err(SharpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_normal_statistics() {
        let (mean, std) = mean_std(&init(InitMethod::Normal, &[200, 200]));
        assert!(mean.abs() < 0.002, "mean {mean}");
        assert!((std - 0.02).abs() < 0.002, "std {std}");
    }

    #[test]
    fn test_uniform_range() {
        let t = init(InitMethod::Uniform, &[50, 50]);
        assert!(t.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_xavier_uniform_bound() {
        let t = init(InitMethod::XavierUniform, &[100, 50]);
        let bound = (6.0f32 / 150.0).sqrt();
        assert!(t.iter().all(|v| v.abs() <= bound));
        assert!(t.iter().any(|v| v.abs() > bound * 0.9));
    }

    #[test]
    fn test_kaiming_normal_std() {
        let (_, std) = mean_std(&init(InitMethod::KaimingNormal, &[256, 512]));
        let expected = (2.0f32 / 512.0).sqrt();
        assert!((std - expected).abs() < expected * 0.05, "std {std}");
    }

    #[test]
    fn test_kaiming_uniform_bound() {
        let t = init(InitMethod::KaimingUniform, &[16, 4, 3, 3]);
        let bound = 2.0f32.sqrt() * (3.0f32 / 36.0).sqrt();
        assert!(t.iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_orthogonal_rows_and_columns() {
        for shape in [[4usize, 6], [6, 4], [5, 5]] {
            let q = init(InitMethod::Orthogonal, &shape)
                .into_dimensionality::<Ix2>()
                .unwrap();
            let gram = if shape[0] < shape[1] {
                q.dot(&q.t())
            } else {
                q.t().dot(&q)
            };
            for ((i, j), v) in gram.indexed_iter() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-4, "{shape:?} gram[{i},{j}] = {v}");
            }
        }
    }

    #[test]
    fn test_orthogonal_conv_shape_preserved() {
        let t = init(InitMethod::Orthogonal, &[4, 2, 3, 3]);
        assert_eq!(t.shape(), &[4, 2, 3, 3]);
    }

    #[test]
    fn test_sparse_zeros_per_column() {
        let t = init(InitMethod::Sparse, &[25, 8]);
        let m = t.into_dimensionality::<Ix2>().unwrap();
        for col in m.columns() {
            assert_eq!(col.iter().filter(|v| **v == 0.0).count(), 3);
        }

        let mut conv = Tensor::zeros(IxDyn(&[2, 2, 3, 3]));
        assert!(init_tensor(InitMethod::Sparse, &mut conv, &mut rng()).is_err());
    }

    #[test]
    fn test_network_init_rules() {
        let mut net = Sequential::new()
            .push(Layer::conv2d("conv", 3, 4, (3, 3)))
            .push(Layer::batch_norm("bn", 64))
            .push(Layer::linear("fc", 4, 2));
        net.layers_mut()[0].bias.as_mut().unwrap().value.fill(0.5);
        net.layers_mut()[1].bias.as_mut().unwrap().value.fill(0.5);

        Initializer::new(InitMethod::XavierNormal)
            .init_network(&mut net, &mut rng())
            .unwrap();

        let layers = net.layers();
        assert!(layers[0].bias.as_ref().unwrap().value.iter().all(|v| *v == 0.5));
        assert!(layers[0].weight.as_ref().unwrap().value.iter().any(|v| *v != 0.0));
        let bn = &layers[1];
        assert!(bn.weight.as_ref().unwrap().value.iter().all(|v| (0.02..1.0).contains(v)));
        assert!(bn.bias.as_ref().unwrap().value.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_batch_norm_normal_centered_on_one() {
        let mut layer = Layer::batch_norm("bn", 2000);
        Initializer::new(InitMethod::Normal)
            .init_layer(&mut layer, &mut rng())
            .unwrap();
        let (mean, _) = mean_std(&layer.weight.unwrap().value);
        assert!((mean - 1.0).abs() < 0.005);
    }

    #[test]
    fn test_same_seed_same_weights() {
        assert_eq!(
            init(InitMethod::KaimingUniform, &[8, 8]),
            init(InitMethod::KaimingUniform, &[8, 8])
        );
    }
}
