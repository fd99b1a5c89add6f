//! Networks as named layers of tensors, and their weight initialization.

pub mod init;
pub mod network;

pub use init::{Initializer, fan_in_and_fan_out, init_tensor};
pub use network::{
    Layer, LayerKind, Network, NetworkHandle, NetworkSummary, Parameter, Sequential, StateDict,
    Tensor, summary,
};
