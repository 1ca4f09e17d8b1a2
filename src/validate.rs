//! Pre-flight model checks.
//!
//! All four checks run to completion and every finding is aggregated into
//! one [`ValidationReport`], so a failing model surfaces its full list of
//! problems in a single run. Generation never starts for a model that
//! fails here.

use crate::error::{ValidationReport, Violation};
use crate::model::ModelGraph;

const SUPPORTED_ACTIVATIONS: &[&str] = &[
    "linear",
    "relu",
    "softmax",
    "softplus",
    "softsign",
    "tanh",
    "sigmoid",
    "hard_sigmoid",
    "exponential",
];

/// Whether `name` is usable as a C identifier.
pub fn is_valid_c_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Run every check; `Err` carries the aggregated report.
pub fn check_model(model: &ModelGraph, function_name: &str) -> Result<(), ValidationReport> {
    let mut violations = Vec::new();

    name_check(model, function_name, &mut violations);
    layers_supported_check(model, &mut violations);
    activation_supported_check(model, &mut violations);
    config_supported_check(model, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationReport { violations })
    }
}

fn name_check(model: &ModelGraph, function_name: &str, out: &mut Vec<Violation>) {
    if !is_valid_c_name(function_name) {
        out.push(Violation::InvalidIdentifier {
            name: function_name.to_string(),
        });
    }
    for layer in &model.layers {
        if !is_valid_c_name(&layer.name) {
            out.push(Violation::InvalidIdentifier {
                name: layer.name.clone(),
            });
        }
    }
}

fn layers_supported_check(model: &ModelGraph, out: &mut Vec<Violation>) {
    for layer in &model.layers {
        if layer.family().is_none() {
            out.push(Violation::UnsupportedLayer {
                class_name: layer.class_name.clone(),
            });
        }
    }
}

fn activation_supported_check(model: &ModelGraph, out: &mut Vec<Violation>) {
    for layer in &model.layers {
        if let Some(act) = &layer.config.activation {
            if !SUPPORTED_ACTIVATIONS.contains(&act.as_str()) {
                out.push(Violation::UnsupportedActivation {
                    layer: layer.name.clone(),
                    activation: act.clone(),
                    kind: "activation",
                });
            }
        }
        if let Some(act) = &layer.config.recurrent_activation {
            if !SUPPORTED_ACTIVATIONS.contains(&act.as_str()) {
                out.push(Violation::UnsupportedActivation {
                    layer: layer.name.clone(),
                    activation: act.clone(),
                    kind: "recurrent activation",
                });
            }
        }
    }
}

fn config_supported_check(model: &ModelGraph, out: &mut Vec<Violation>) {
    for layer in &model.layers {
        if let Some(fmt) = &layer.config.data_format {
            if fmt != "channels_last" {
                out.push(Violation::UnsupportedConfiguration {
                    layer: layer.name.clone(),
                    reason: format!("data format '{fmt}'"),
                });
            }
        }
        if layer.config.return_state {
            out.push(Violation::UnsupportedConfiguration {
                layer: layer.name.clone(),
                reason: "'return_state' option".to_string(),
            });
        }
        if layer.config.stateful {
            out.push(Violation::UnsupportedConfiguration {
                layer: layer.name.clone(),
                reason: "'stateful' option".to_string(),
            });
        }
        if layer.config.shared_axes.is_some() {
            out.push(Violation::UnsupportedConfiguration {
                layer: layer.name.clone(),
                reason: "'shared_axes' option".to_string(),
            });
        }
        // Merge kernels have no broadcasting: all inputs of a call site
        // must carry the same element count.
        if layer.family().is_some_and(|f| f.is_merge()) {
            for site in &layer.call_sites {
                let mut sizes = site
                    .input_shapes
                    .iter()
                    .map(|s| s.iter().product::<usize>());
                let first = sizes.next();
                if first.is_some() && sizes.any(|n| Some(n) != first) {
                    out.push(Violation::UnsupportedConfiguration {
                        layer: layer.name.clone(),
                        reason: "merging tensors of different sizes".to_string(),
                    });
                }
            }
        }
    }
}
