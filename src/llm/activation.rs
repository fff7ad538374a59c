use std::str::FromStr;

use candle_core::{Result as CandleResult, Tensor};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Gelu,
    Relu,
    Silu,
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "gelu" => Ok(Activation::Gelu),
            "relu" => Ok(Activation::Relu),
            "silu" | "swish" => Ok(Activation::Silu),
            _ => Err(Error::Config(format!("unsupported activation function: {name}"))),
        }
    }
}

impl Activation {
    pub fn apply(&self, input: &Tensor) -> CandleResult<Tensor> {
        match self {
            Activation::Gelu => input.gelu(),
            Activation::Relu => input.relu(),
            Activation::Silu => input.silu(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_parse_known_activations() {
        assert_eq!("gelu".parse::<Activation>().unwrap(), Activation::Gelu);
        assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("silu".parse::<Activation>().unwrap(), Activation::Silu);
        assert_eq!("swish".parse::<Activation>().unwrap(), Activation::Silu);
    }

    #[test]
    fn test_parse_unknown_activation_fails() {
        assert!(matches!("tanh".parse::<Activation>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_relu_clamps_negatives() {
        let x = Tensor::new(&[-1.0f32, 0.0, 2.0], &Device::Cpu).unwrap();
        let y: Vec<f32> = Activation::Relu.apply(&x).unwrap().to_vec1().unwrap();
        assert_eq!(y, vec![0.0, 0.0, 2.0]);
    }
}
