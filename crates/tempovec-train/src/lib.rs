//! Time-weighted token embedding training: vocabulary construction, the
//! theta-gated skip-gram and attention loss kernels, the Hogwild worker
//! pool, and model persistence.

pub mod args;
pub mod corpus;
pub mod dictionary;
pub mod loss;
pub mod numeric;
pub mod persist;
pub mod scheduler;
pub mod train;

pub use args::{Args, LossKind, ModelKind, TimeUnit};
pub use train::{print_vectors, train};
