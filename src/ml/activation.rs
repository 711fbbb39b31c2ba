use burn::{prelude::*, tensor::activation};

use crate::domain::options::Activation;

/// Apply a configured hidden activation.
pub fn activate<B: Backend, const D: usize>(x: Tensor<B, D>, kind: Activation) -> Tensor<B, D> {
    match kind {
        Activation::Relu    => activation::relu(x),
        Activation::Gelu    => activation::gelu(x),
        Activation::Tanh    => x.tanh(),
        Activation::Sigmoid => activation::sigmoid(x),
        Activation::Linear  => x,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_relu_and_linear() {
        let device = Default::default();
        let x = Tensor::<NdArray, 1>::from_floats([-1.0, 0.5], &device);
        let relu = activate(x.clone(), Activation::Relu).into_data().to_vec::<f32>().unwrap();
        let same = activate(x, Activation::Linear).into_data().to_vec::<f32>().unwrap();
        assert_eq!(relu, vec![0.0, 0.5]);
        assert_eq!(same, vec![-1.0, 0.5]);
    }
}
