//! Keras model compiler — generates C code targeting the `k2c` runtime library.

pub mod codegen;
pub mod error;
pub mod model;
pub mod validate;

pub use codegen::{convert, Artifacts};
pub use error::{ConvertError, LoadError, ValidationReport, Violation};
pub use model::{load::load_model, Family, LayerConfig, LayerNode, ModelGraph};
