pub mod embedding;
pub mod gru;
pub mod linear;
pub mod lstm;

pub(crate) fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}
