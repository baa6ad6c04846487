use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

use super::activation::Activation;

/// Stack of linear maps with an activation between consecutive layers.
/// With no hidden sizes it is a single linear map.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>, activation: Activation) -> Tensor<B, D> {
        let last = self.layers.len().saturating_sub(1);
        self.layers
            .iter()
            .enumerate()
            .fold(x, |x, (i, layer)| {
                let x = layer.forward(x);
                if i < last {
                    activation.forward(x)
                } else {
                    x
                }
            })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[derive(Config, Debug)]
pub struct MlpConfig {
    d_input: usize,
    d_output: usize,

    #[config(default = "vec![]")]
    hsizes: Vec<usize>,

    #[config(default = false)]
    bias: bool,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self) -> Mlp<B> {
        let sizes: Vec<usize> = std::iter::once(self.d_input)
            .chain(self.hsizes.iter().copied())
            .chain(std::iter::once(self.d_output))
            .collect();

        let layers = sizes
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).with_bias(self.bias).init())
            .collect();

        Mlp { layers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn hidden_sizes_add_layers() {
        let mlp: Mlp<NdArray> = MlpConfig::new(6, 2).with_hsizes(vec![8, 8]).init();
        assert_eq!(mlp.num_layers(), 3);

        let y = mlp.forward(Tensor::<NdArray, 2>::ones([5, 6]), Activation::Gelu);
        assert_eq!(y.dims(), [5, 2]);
    }

    #[test]
    fn no_hidden_sizes_is_linear() {
        let mlp: Mlp<NdArray> = MlpConfig::new(3, 4).init();
        assert_eq!(mlp.num_layers(), 1);
    }
}
