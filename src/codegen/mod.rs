//! Conversion pipeline: validate → weights → schedule → statements → harness.
//!
//! One call to [`convert`] turns a loaded model into exactly two artifacts,
//! `<function_name>.h` (the inference module) and
//! `<function_name>_test_suite.c`. Nothing is created for a model that
//! fails validation; a scheduling failure after the weight section has been
//! flushed intentionally leaves the partial module on disk.

pub mod harness;
pub mod layers;
pub mod names;
pub mod schedule;
pub mod tensor;
pub mod weights;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::ConvertError;
use crate::model::ModelGraph;
use crate::validate;

/// Paths of the two generated files.
#[derive(Debug)]
pub struct Artifacts {
    pub module_path: PathBuf,
    pub harness_path: PathBuf,
}

/// Convert one model into a C module plus its test suite.
pub fn convert(
    model: &ModelGraph,
    function_name: &str,
    num_tests: usize,
    out_dir: &Path,
) -> Result<Artifacts, ConvertError> {
    validate::check_model(model, function_name).map_err(ConvertError::Validation)?;
    info!("all checks passed");

    let module_path = out_dir.join(format!("{function_name}.h"));
    let harness_path = out_dir.join(format!("{function_name}_test_suite.c"));

    let mut file = BufWriter::new(File::create(&module_path)?);
    file.write_all(write_signature(model, function_name).as_bytes())?;

    info!("writing weights");
    file.write_all(weights::write_weights(model).as_bytes())?;
    // the weight section reaches disk before scheduling runs, so a stuck
    // graph leaves a partial module behind for inspection
    file.flush()?;

    let order = schedule::linearize(model)?;
    let mut body = String::new();
    for call in &order {
        let layer = &model.layers[call.layer];
        debug!("writing layer '{}' call site {}", layer.name, call.site);
        layers::write_call(model, layer, call.site, &mut body);
    }
    body.push_str("\n }");
    file.write_all(body.as_bytes())?;
    file.flush()?;
    drop(file);

    info!("writing test suite");
    let suite = harness::make_test_suite(model, function_name, num_tests)?;
    fs::write(&harness_path, suite)?;

    Ok(Artifacts {
        module_path,
        harness_path,
    })
}

/// File prelude and entry-point signature. Parameters are the declared
/// model inputs followed by the declared model outputs.
fn write_signature(model: &ModelGraph, function_name: &str) -> String {
    let mut s = String::new();
    s.push_str("#include <stdio.h> \n#include <stddef.h> \n#include <math.h> \n#include <string.h> \n");
    s.push_str("#include <stdarg.h> \n#include \"k2c_include.h\" \n");
    s.push_str("\n \n");
    let params: Vec<String> = model
        .inputs
        .iter()
        .map(|n| format!("k2c_tensor {n}_input"))
        .chain(model.outputs.iter().map(|n| format!("k2c_tensor {n}_output")))
        .collect();
    s.push_str(&format!("void {function_name}({}) {{ \n \n", params.join(", ")));
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Violation;
    use crate::model::{CallSite, LayerConfig, LayerNode};
    use ndarray::ArrayD;

    fn arr(shape: &[usize], data: Vec<f32>) -> ArrayD<f32> {
        ArrayD::from_shape_vec(shape.to_vec(), data).unwrap()
    }

    fn input_node(name: &str, shape: &[usize]) -> LayerNode {
        LayerNode {
            name: name.to_string(),
            class_name: "InputLayer".into(),
            config: LayerConfig::default(),
            weights: vec![],
            call_sites: vec![CallSite {
                inputs: vec![name.to_string()],
                outputs: vec![name.to_string()],
                input_shapes: vec![shape.to_vec()],
                output_shapes: vec![shape.to_vec()],
            }],
        }
    }

    fn dense_node(name: &str, input: &str, in_dim: usize, units: usize) -> LayerNode {
        LayerNode {
            name: name.to_string(),
            class_name: "Dense".into(),
            config: LayerConfig {
                units: Some(units),
                activation: Some("relu".into()),
                ..Default::default()
            },
            weights: vec![
                arr(&[in_dim, units], (0..in_dim * units).map(|v| v as f32 * 0.1).collect()),
                arr(&[units], vec![0.5; units]),
            ],
            call_sites: vec![CallSite {
                inputs: vec![input.to_string()],
                outputs: vec![name.to_string()],
                input_shapes: vec![vec![in_dim]],
                output_shapes: vec![vec![units]],
            }],
        }
    }

    fn two_layer_model() -> ModelGraph {
        ModelGraph {
            inputs: vec!["x".into()],
            input_shapes: vec![vec![4]],
            outputs: vec!["fc".into()],
            output_shapes: vec![vec![3]],
            layers: vec![input_node("x", &[4]), dense_node("fc", "x", 4, 3)],
        }
    }

    fn out_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("k2c_codegen_{tag}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn convert_writes_module_and_suite() {
        let model = two_layer_model();
        let dir = out_dir("two_layer");
        let artifacts = convert(&model, "two_layer_net", 2, &dir).unwrap();

        let module = fs::read_to_string(&artifacts.module_path).unwrap();
        assert!(module.starts_with("#include <stdio.h> \n"));
        assert!(module.contains(
            "void two_layer_net(k2c_tensor x_input, k2c_tensor fc_output) { \n \n"
        ));
        // declarations precede the statement
        let kernel_pos = module.find("float fc_kernel_array[12]").unwrap();
        let stmt_pos = module
            .find("k2c_dense(fc_output,x_input,fc_kernel, \n\tfc_bias,k2c_relu,fc_fwork); \n")
            .unwrap();
        assert!(kernel_pos < stmt_pos);
        assert!(module.ends_with("\n }"));
        // the model output has no zeroed storage of its own
        assert!(!module.contains("fc_output_array"));

        let suite = fs::read_to_string(&artifacts.harness_path).unwrap();
        assert!(suite.contains("#include \"two_layer_net.h\""));
        assert!(suite.contains("two_layer_net(test1_x_input,\n\tc_fc_test1); \n"));
    }

    #[test]
    fn shared_dense_declares_once_invokes_twice() {
        let shared = LayerNode {
            name: "shared".into(),
            class_name: "Dense".into(),
            config: LayerConfig {
                units: Some(2),
                ..Default::default()
            },
            weights: vec![arr(&[2, 2], vec![0.5; 4]), arr(&[2], vec![0.0; 2])],
            call_sites: vec![
                CallSite {
                    inputs: vec!["x".into()],
                    outputs: vec!["s0".into()],
                    input_shapes: vec![vec![2]],
                    output_shapes: vec![vec![2]],
                },
                CallSite {
                    inputs: vec!["pre".into()],
                    outputs: vec!["s1".into()],
                    input_shapes: vec![vec![2]],
                    output_shapes: vec![vec![2]],
                },
            ],
        };
        let model = ModelGraph {
            inputs: vec!["x".into()],
            input_shapes: vec![vec![2]],
            outputs: vec!["m".into()],
            output_shapes: vec![vec![2]],
            layers: vec![
                input_node("x", &[2]),
                dense_node("pre", "x", 2, 2),
                shared,
                LayerNode {
                    name: "m".into(),
                    class_name: "Add".into(),
                    config: LayerConfig::default(),
                    weights: vec![],
                    call_sites: vec![CallSite {
                        inputs: vec!["s0".into(), "s1".into()],
                        outputs: vec!["m".into()],
                        input_shapes: vec![vec![2], vec![2]],
                        output_shapes: vec![vec![2]],
                    }],
                },
            ],
        };
        let dir = out_dir("shared_dense");
        let artifacts = convert(&model, "shared_net", 1, &dir).unwrap();
        let module = fs::read_to_string(&artifacts.module_path).unwrap();

        assert_eq!(module.matches("float shared_kernel_array[").count(), 1);
        assert_eq!(module.matches("k2c_dense(s0_output,x_input,shared_kernel,").count(), 1);
        assert_eq!(
            module.matches("k2c_dense(s1_output,pre_output,shared_kernel,").count(),
            1
        );
    }

    #[test]
    fn validation_failure_creates_no_files() {
        let mut model = two_layer_model();
        model.layers[1].config.stateful = true;
        let dir = out_dir("stateful");
        let _ = fs::remove_file(dir.join("stateful_net.h"));
        let _ = fs::remove_file(dir.join("stateful_net_test_suite.c"));
        let err = convert(&model, "stateful_net", 1, &dir).unwrap_err();

        match err {
            ConvertError::Validation(report) => {
                assert!(report.violations.contains(&Violation::UnsupportedConfiguration {
                    layer: "fc".into(),
                    reason: "'stateful' option".into(),
                }));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert!(!dir.join("stateful_net.h").exists());
        assert!(!dir.join("stateful_net_test_suite.c").exists());
    }

    #[test]
    fn cyclic_graph_leaves_partial_module() {
        let mut model = two_layer_model();
        // make the dense layer consume its own output
        model.layers[1].call_sites[0].inputs = vec!["fc".into()];
        model.layers[1].call_sites[0].outputs = vec!["fc".into()];
        let dir = out_dir("cyclic");
        let err = convert(&model, "cyclic_net", 1, &dir).unwrap_err();

        match err {
            ConvertError::CyclicOrUnresolvedGraph { stuck } => {
                assert_eq!(stuck, vec!["fc".to_string()]);
            }
            other => panic!("expected CyclicOrUnresolvedGraph, got {other:?}"),
        }
        // weight section already flushed: the partial module stays on disk
        let partial = fs::read_to_string(dir.join("cyclic_net.h")).unwrap();
        assert!(partial.contains("float fc_kernel_array["));
        assert!(!partial.contains("k2c_dense("));
    }

    #[test]
    fn conversion_is_reproducible() {
        let model = two_layer_model();
        let dir = out_dir("repro");
        let first = convert(&model, "repro_net", 1, &dir).unwrap();
        let module_a = fs::read_to_string(&first.module_path).unwrap();
        let second = convert(&model, "repro_net", 1, &dir).unwrap();
        let module_b = fs::read_to_string(&second.module_path).unwrap();
        assert_eq!(module_a, module_b);
    }
}
