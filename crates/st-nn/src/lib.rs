//! Layer primitives for the SpiralTorch sequence stack.
//!
//! Layers own [`Parameter`]s and expose them through [`Parameterised`] so
//! composite models can walk, snapshot, and update every weight uniformly.

pub mod layers;
pub mod module;
pub mod recurrent;

pub use layers::embedding::Embedding;
pub use layers::gru::GruCell;
pub use layers::linear::Linear;
pub use layers::lstm::LstmCell;
pub use module::{Module, Parameter, Parameterised};
pub use recurrent::{CellKind, Recurrent, RecurrentState};

pub use st_tensor::{PureResult, Tensor, TensorError};
