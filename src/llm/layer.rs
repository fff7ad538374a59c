use candle_core::{Result as CandleResult, Tensor};

/// A stateless block of the network. Layers are shared across request
/// threads, so a forward pass only reads the weights.
pub trait Layer: Send + Sync {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor>;
}
