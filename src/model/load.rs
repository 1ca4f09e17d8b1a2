//! Model export loader.
//!
//! Reads the single-document JSON export (architecture + weights) produced
//! by the Python-side export helper and lowers it into a [`ModelGraph`].
//! Weight arrays arrive as `{shape, data}` pairs with flat row-major data.

use std::fs;
use std::path::Path;

use ndarray::ArrayD;
use serde::Deserialize;

use crate::error::LoadError;
use crate::model::{CallSite, LayerConfig, LayerNode, ModelGraph};

#[derive(Debug, Deserialize)]
struct ModelDoc {
    inputs: Vec<String>,
    input_shapes: Vec<Vec<usize>>,
    outputs: Vec<String>,
    output_shapes: Vec<Vec<usize>>,
    layers: Vec<LayerDoc>,
}

#[derive(Debug, Deserialize)]
struct LayerDoc {
    name: String,
    class_name: String,
    #[serde(default)]
    config: LayerConfig,
    #[serde(default)]
    weights: Vec<WeightDoc>,
    call_sites: Vec<CallSite>,
}

#[derive(Debug, Deserialize)]
struct WeightDoc {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Load a model export from disk.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<ModelGraph, LoadError> {
    let bytes = fs::read(path)?;
    from_json(&bytes)
}

/// Lower a model export document into a [`ModelGraph`].
pub fn from_json(bytes: &[u8]) -> Result<ModelGraph, LoadError> {
    let doc: ModelDoc = serde_json::from_slice(bytes)?;

    if doc.inputs.len() != doc.input_shapes.len() {
        return Err(LoadError::Malformed(format!(
            "{} inputs but {} input shapes",
            doc.inputs.len(),
            doc.input_shapes.len()
        )));
    }
    if doc.outputs.len() != doc.output_shapes.len() {
        return Err(LoadError::Malformed(format!(
            "{} outputs but {} output shapes",
            doc.outputs.len(),
            doc.output_shapes.len()
        )));
    }

    let mut layers = Vec::with_capacity(doc.layers.len());
    for layer in doc.layers {
        if layer.call_sites.is_empty() {
            return Err(LoadError::Malformed(format!(
                "layer '{}' has no call sites",
                layer.name
            )));
        }
        for (i, site) in layer.call_sites.iter().enumerate() {
            if site.inputs.len() != site.input_shapes.len()
                || site.outputs.len() != site.output_shapes.len()
            {
                return Err(LoadError::Malformed(format!(
                    "layer '{}' call site {} has mismatched name/shape lists",
                    layer.name, i
                )));
            }
        }

        let weights = layer
            .weights
            .into_iter()
            .map(|w| lower_weight(&layer.name, w))
            .collect::<Result<Vec<_>, _>>()?;

        layers.push(LayerNode {
            name: layer.name,
            class_name: layer.class_name,
            config: layer.config,
            weights,
            call_sites: layer.call_sites,
        });
    }

    Ok(ModelGraph {
        inputs: doc.inputs,
        input_shapes: doc.input_shapes,
        outputs: doc.outputs,
        output_shapes: doc.output_shapes,
        layers,
    })
}

fn lower_weight(layer: &str, w: WeightDoc) -> Result<ArrayD<f32>, LoadError> {
    let numel: usize = w.shape.iter().product();
    if numel != w.data.len() {
        return Err(LoadError::Malformed(format!(
            "weight for layer '{}' declares shape {:?} ({} elements) but carries {} values",
            layer,
            w.shape,
            numel,
            w.data.len()
        )));
    }
    ArrayD::from_shape_vec(w.shape.clone(), w.data)
        .map_err(|e| LoadError::Malformed(format!("weight for layer '{layer}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DENSE_EXPORT: &str = r#"{
        "inputs": ["x"],
        "input_shapes": [[2]],
        "outputs": ["fc"],
        "output_shapes": [[3]],
        "layers": [
            {
                "name": "x",
                "class_name": "InputLayer",
                "call_sites": [
                    {"inputs": ["x"], "outputs": ["x"],
                     "input_shapes": [[2]], "output_shapes": [[2]]}
                ]
            },
            {
                "name": "fc",
                "class_name": "Dense",
                "config": {"units": 3, "activation": "relu"},
                "weights": [
                    {"shape": [2, 3], "data": [1, 2, 3, 4, 5, 6]},
                    {"shape": [3], "data": [0.5, -0.5, 0.25]}
                ],
                "call_sites": [
                    {"inputs": ["x"], "outputs": ["fc"],
                     "input_shapes": [[2]], "output_shapes": [[3]]}
                ]
            }
        ]
    }"#;

    #[test]
    fn loads_dense_export() {
        let model = from_json(DENSE_EXPORT.as_bytes()).unwrap();
        assert_eq!(model.inputs, ["x"]);
        assert_eq!(model.outputs, ["fc"]);
        assert_eq!(model.layers.len(), 2);

        let fc = &model.layers[1];
        assert_eq!(fc.class_name, "Dense");
        assert_eq!(fc.config.units, Some(3));
        assert_eq!(fc.config.activation.as_deref(), Some("relu"));
        assert!(fc.config.use_bias);
        assert_eq!(fc.weights[0].shape(), &[2, 3]);
        assert_eq!(fc.weights[1].shape(), &[3]);
        assert_eq!(fc.weights[0][[1, 2]], 6.0);
    }

    #[test]
    fn weight_count_mismatch_rejected() {
        let bad = DENSE_EXPORT.replace(r#""data": [0.5, -0.5, 0.25]"#, r#""data": [0.5]"#);
        let err = from_json(bad.as_bytes()).unwrap_err();
        assert!(
            err.to_string().contains("3 elements"),
            "got: {err}"
        );
    }

    #[test]
    fn missing_call_sites_rejected() {
        let bad = r#"{
            "inputs": [], "input_shapes": [], "outputs": [], "output_shapes": [],
            "layers": [{"name": "a", "class_name": "Dense", "call_sites": []}]
        }"#;
        let err = from_json(bad.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("no call sites"), "got: {err}");
    }
}
