use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Nonlinearity applied between the hidden layers of a block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    Identity,
    Relu,
    Gelu,
    Tanh,
    Sigmoid,
    /// `x` for positive inputs, `alpha * (exp(x) - 1)` otherwise.
    Elu { alpha: f32 },
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Identity => x,
            Activation::Relu => activation::relu(x),
            Activation::Gelu => activation::gelu(x),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => activation::sigmoid(x),
            // relu(x) + alpha * (exp(min(x, 0)) - 1)
            Activation::Elu { alpha } => {
                let saturated = (x.clone().clamp_max(0.0).exp() - 1.0) * *alpha;
                activation::relu(x) + saturated
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::array_from_tensor;
    use burn::backend::NdArray;
    use burn::tensor::{Data, Shape};

    #[test]
    fn elu_keeps_positive_values() {
        let x: Tensor<NdArray, 3> =
            Tensor::from_data(Data::new(vec![-1.0, 0.0, 2.0], Shape::new([1, 1, 3])).convert());
        let y = array_from_tensor(Activation::Elu { alpha: 1.0 }.forward(x));

        assert!((y[[0, 0, 0]] - ((-1.0_f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(y[[0, 0, 1]], 0.0);
        assert_eq!(y[[0, 0, 2]], 2.0);

        let scaled = Activation::Elu { alpha: 0.5 }.forward(Tensor::<NdArray, 3>::from_data(
            Data::new(vec![-2.0, 3.0], Shape::new([1, 1, 2])).convert(),
        ));
        let scaled = array_from_tensor(scaled);
        assert!((scaled[[0, 0, 0]] - 0.5 * ((-2.0_f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(scaled[[0, 0, 1]], 3.0);
    }

    #[test]
    fn relu_clips_negatives() {
        let x: Tensor<NdArray, 3> =
            Tensor::from_data(Data::new(vec![-3.0, 4.0], Shape::new([1, 1, 2])).convert());
        let y = array_from_tensor(Activation::Relu.forward(x));

        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![0.0, 4.0]);
    }
}
