//! Model object model: the layer graph as extracted from a Keras export.
//!
//! The export already names every tensor flowing on every edge, so the graph
//! here is an explicit adjacency structure (per-call-site input/output name
//! lists) rather than anything discovered by string inspection. The
//! scheduler in `codegen::schedule` runs purely against this structure.

pub mod load;
pub mod reference;

use ndarray::ArrayD;
use serde::Deserialize;

/// Maximum tensor rank of the `k2c_tensor` runtime descriptor. Shapes with
/// fewer dimensions are right-padded with 1s up to this rank.
pub const MAX_NDIM: usize = 4;

/// One concrete invocation of a (possibly shared) layer.
///
/// A layer with more than one call site is shared; each call site carries
/// its own resolved tensor names and shapes and is scheduled independently.
#[derive(Debug, Clone, Deserialize)]
pub struct CallSite {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub input_shapes: Vec<Vec<usize>>,
    pub output_shapes: Vec<Vec<usize>>,
}

/// A node of the layer graph. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct LayerNode {
    /// Unique layer name; must be a valid C identifier (validator-checked).
    pub name: String,
    /// Framework class name, e.g. `"Dense"` or `"MaxPooling1D"`.
    pub class_name: String,
    pub config: LayerConfig,
    /// Raw weight arrays in framework-native layout, in framework order
    /// (kernel, recurrent kernel, bias for recurrent layers).
    pub weights: Vec<ArrayD<f32>>,
    pub call_sites: Vec<CallSite>,
}

impl LayerNode {
    /// Resolve the closed family tag, or `None` for unsupported classes.
    pub fn family(&self) -> Option<Family> {
        Family::from_class_name(&self.class_name)
    }
}

/// The full layer graph plus the model's declared I/O boundary.
///
/// Shapes exclude the batch dimension throughout.
#[derive(Debug, Clone)]
pub struct ModelGraph {
    pub inputs: Vec<String>,
    pub input_shapes: Vec<Vec<usize>>,
    pub outputs: Vec<String>,
    pub output_shapes: Vec<Vec<usize>>,
    pub layers: Vec<LayerNode>,
}

impl ModelGraph {
    pub fn is_model_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|n| n == name)
    }

    pub fn is_model_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|n| n == name)
    }
}

/// Closed set of supported layer families. Per-family dispatch is an
/// exhaustive `match`, so growing the set without handling it everywhere is
/// a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Input,
    Dense,
    Lstm,
    Gru,
    SimpleRnn,
    Conv1d,
    MaxPooling1d,
    AveragePooling1d,
    GlobalMaxPooling1d,
    GlobalAveragePooling1d,
    Add,
    Subtract,
    Multiply,
    Average,
    Maximum,
    Minimum,
    Activation,
    LeakyRelu,
    PRelu,
    Elu,
    ThresholdedRelu,
    Relu,
    Reshape,
    Flatten,
    Permute,
    RepeatVector,
    Dot,
    /// Layers that only act during training; inference renames the tensor.
    Passthrough,
}

impl Family {
    pub fn from_class_name(class_name: &str) -> Option<Self> {
        match class_name {
            "InputLayer" | "Input" => Some(Self::Input),
            "Dense" => Some(Self::Dense),
            "LSTM" => Some(Self::Lstm),
            "GRU" => Some(Self::Gru),
            "SimpleRNN" => Some(Self::SimpleRnn),
            "Conv1D" => Some(Self::Conv1d),
            "MaxPooling1D" => Some(Self::MaxPooling1d),
            "AveragePooling1D" => Some(Self::AveragePooling1d),
            "GlobalMaxPooling1D" => Some(Self::GlobalMaxPooling1d),
            "GlobalAveragePooling1D" => Some(Self::GlobalAveragePooling1d),
            "Add" => Some(Self::Add),
            "Subtract" => Some(Self::Subtract),
            "Multiply" => Some(Self::Multiply),
            "Average" => Some(Self::Average),
            "Maximum" => Some(Self::Maximum),
            "Minimum" => Some(Self::Minimum),
            "Activation" => Some(Self::Activation),
            "LeakyReLU" => Some(Self::LeakyRelu),
            "PReLU" => Some(Self::PRelu),
            "ELU" => Some(Self::Elu),
            "ThresholdedReLU" => Some(Self::ThresholdedRelu),
            "ReLU" => Some(Self::Relu),
            "Reshape" => Some(Self::Reshape),
            "Flatten" => Some(Self::Flatten),
            "Permute" => Some(Self::Permute),
            "RepeatVector" => Some(Self::RepeatVector),
            "Dot" => Some(Self::Dot),
            "Dropout" | "SpatialDropout1D" | "SpatialDropout2D" | "SpatialDropout3D"
            | "ActivityRegularization" | "GaussianNoise" | "GaussianDropout" | "AlphaDropout" => {
                Some(Self::Passthrough)
            }
            _ => None,
        }
    }

    pub fn is_merge(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Average | Self::Maximum | Self::Minimum
        )
    }
}

/// The layer configuration dictionary, with framework defaults applied.
///
/// Fields are a union across families; each family reads only its own.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub units: Option<usize>,
    pub activation: Option<String>,
    pub recurrent_activation: Option<String>,
    pub use_bias: bool,
    pub reset_after: bool,
    pub go_backwards: bool,
    pub return_sequences: bool,
    pub return_state: bool,
    pub stateful: bool,
    pub padding: Option<String>,
    pub strides: Vec<usize>,
    pub dilation_rate: Vec<usize>,
    pub kernel_size: Vec<usize>,
    pub pool_size: Vec<usize>,
    pub data_format: Option<String>,
    pub shared_axes: Option<Vec<usize>>,
    pub alpha: Option<f32>,
    pub theta: Option<f32>,
    pub max_value: Option<f32>,
    pub negative_slope: Option<f32>,
    pub threshold: Option<f32>,
    pub target_shape: Option<Vec<usize>>,
    /// One-based permutation for `Permute`.
    pub dims: Option<Vec<usize>>,
    /// Repeat count for `RepeatVector`.
    pub n: Option<usize>,
    /// One-based contraction axes (counting the batch axis) for `Dot`.
    pub axes: Option<Vec<usize>>,
    pub normalize: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            units: None,
            activation: None,
            recurrent_activation: None,
            use_bias: true,
            reset_after: false,
            go_backwards: false,
            return_sequences: false,
            return_state: false,
            stateful: false,
            padding: None,
            strides: vec![1],
            dilation_rate: vec![1],
            kernel_size: vec![1],
            pool_size: vec![2],
            data_format: None,
            shared_axes: None,
            alpha: None,
            theta: None,
            max_value: None,
            negative_slope: None,
            threshold: None,
            target_shape: None,
            dims: None,
            n: None,
            axes: None,
            normalize: false,
        }
    }
}
