//! Per-call-site statement emission.
//!
//! Consumes the scheduler's order and renders one or two `k2c_*` runtime
//! calls per call site, addressing tensors through the storage names
//! resolved in `names`. Activation-like families operate in place and
//! rename the tensor instead of writing a new buffer.

use crate::codegen::names::{output_name, resolve_inputs};
use crate::model::{Family, LayerNode, ModelGraph};

/// Append the statement(s) for one scheduled call site.
pub fn write_call(model: &ModelGraph, layer: &LayerNode, site_idx: usize, out: &mut String) {
    let family = layer.family().unwrap_or_else(|| {
        panic!(
            "layer '{}' with unsupported class '{}' reached statement emission",
            layer.name, layer.class_name
        )
    });
    let site = &layer.call_sites[site_idx];
    let inputs = resolve_inputs(model, site);
    let output = output_name(&site.outputs[0]);
    let nm = &layer.name;

    match family {
        Family::Input => {}

        Family::Dense => {
            out.push_str(&format!(
                "k2c_dense({output},{},{nm}_kernel, \n\t{nm}_bias,k2c_{},{nm}_fwork); \n",
                inputs[0],
                activation(layer),
            ));
        }

        Family::Lstm => {
            out.push_str(&format!(
                "k2c_lstm({output},{},{nm}_state,{nm}_kernel, \n\t{nm}_recurrent_kernel,{nm}_bias,{nm}_fwork, \n\t{nm}_go_backwards,{nm}_return_sequences, \n\tk2c_{},k2c_{}); \n",
                inputs[0],
                recurrent_activation(layer),
                activation(layer),
            ));
        }

        Family::Gru => {
            out.push_str(&format!(
                "k2c_gru({output},{},{nm}_state,{nm}_kernel, \n\t{nm}_recurrent_kernel,{nm}_bias,{nm}_fwork, \n\t{nm}_reset_after,{nm}_go_backwards,{nm}_return_sequences, \n\tk2c_{},k2c_{}); \n",
                inputs[0],
                recurrent_activation(layer),
                activation(layer),
            ));
        }

        Family::SimpleRnn => {
            out.push_str(&format!(
                "k2c_simpleRNN({output},{},{nm}_state,{nm}_kernel, \n\t{nm}_recurrent_kernel,{nm}_bias,{nm}_fwork, \n\t{nm}_go_backwards,{nm}_return_sequences,k2c_{}); \n",
                inputs[0],
                activation(layer),
            ));
        }

        Family::Conv1d => {
            write_pad1d_call(nm, site_idx, &inputs[0], out);
            out.push_str(&format!(
                "k2c_conv1d({output},{nm}_padded{site_idx}_input,{nm}_kernel, \n\t{nm}_bias,{nm}_stride,{nm}_dilation,k2c_{}); \n",
                activation(layer),
            ));
        }

        Family::MaxPooling1d | Family::AveragePooling1d => {
            write_pad1d_call(nm, site_idx, &inputs[0], out);
            let kernel = if family == Family::MaxPooling1d {
                "k2c_maxpool1d"
            } else {
                "k2c_avgpool1d"
            };
            out.push_str(&format!(
                "{kernel}({output},{nm}_padded{site_idx}_input,{nm}_pool_size, \n\t{nm}_stride); \n",
            ));
        }

        Family::GlobalMaxPooling1d => {
            out.push_str(&format!("k2c_global_max_pooling_1d({output},{}); \n", inputs[0]));
        }
        Family::GlobalAveragePooling1d => {
            out.push_str(&format!("k2c_global_avg_pooling_1d({output},{}); \n", inputs[0]));
        }

        Family::Add
        | Family::Subtract
        | Family::Multiply
        | Family::Average
        | Family::Maximum
        | Family::Minimum => {
            let kernel = match family {
                Family::Add => "k2c_add",
                Family::Subtract => "k2c_subtract",
                Family::Multiply => "k2c_multiply",
                Family::Average => "k2c_average",
                Family::Maximum => "k2c_max",
                Family::Minimum => "k2c_min",
                _ => unreachable!(),
            };
            let refs: Vec<String> = inputs.iter().map(|n| format!("&{n}")).collect();
            out.push_str(&format!(
                "{kernel}({output},{nm}_num_tensors{site_idx},{}); \n",
                refs.join(",")
            ));
        }

        Family::Activation => {
            out.push_str(&format!(
                "k2c_{}({}.array,{}.numel); \n",
                activation(layer),
                inputs[0],
                inputs[0]
            ));
            write_alias(&output, &inputs[0], out);
        }

        Family::LeakyRelu => {
            out.push_str(&format!(
                "k2c_LeakyReLU({}.array,{}.numel,{nm}_alpha); \n",
                inputs[0], inputs[0]
            ));
            write_alias(&output, &inputs[0], out);
        }
        Family::PRelu => {
            out.push_str(&format!(
                "k2c_PReLU({}.array,{}.numel,{nm}_alpha.array); \n",
                inputs[0], inputs[0]
            ));
            write_alias(&output, &inputs[0], out);
        }
        Family::Elu => {
            out.push_str(&format!(
                "k2c_ELU({}.array,{}.numel,{nm}_alpha); \n",
                inputs[0], inputs[0]
            ));
            write_alias(&output, &inputs[0], out);
        }
        Family::ThresholdedRelu => {
            out.push_str(&format!(
                "k2c_ThresholdedReLU({}.array,{}.numel,{nm}_theta); \n",
                inputs[0], inputs[0]
            ));
            write_alias(&output, &inputs[0], out);
        }
        Family::Relu => {
            out.push_str(&format!(
                "k2c_ReLU({}.array,{}.numel,{nm}_max_value, \n\t{nm}_negative_slope,{nm}_threshold); \n",
                inputs[0], inputs[0]
            ));
            write_alias(&output, &inputs[0], out);
        }

        Family::Reshape => {
            out.push_str(&format!(
                "k2c_reshape({},{nm}_newshp,{nm}_newndim); \n",
                inputs[0]
            ));
            write_alias(&output, &inputs[0], out);
        }
        Family::Flatten => {
            out.push_str(&format!("k2c_flatten({}); \n", inputs[0]));
            write_alias(&output, &inputs[0], out);
        }

        Family::Permute => {
            out.push_str(&format!(
                "k2c_permute_dims({output},{},{nm}_permute); \n",
                inputs[0]
            ));
        }
        Family::RepeatVector => {
            out.push_str(&format!(
                "k2c_repeat_vector({output},{},{nm}_n); \n",
                inputs[0]
            ));
        }
        Family::Dot => {
            out.push_str(&format!(
                "k2c_dot({output},{},{},{nm}_axesA,{nm}_axesB, \n\t{nm}_naxes,{nm}_normalize,{nm}_fwork); \n",
                inputs[0], inputs[1]
            ));
        }

        Family::Passthrough => {
            write_alias(&output, &inputs[0], out);
        }
    }
}

/// The tensor descriptor is a value holding a pointer into its element
/// array, so a struct copy aliases the storage under the new name.
fn write_alias(output: &str, input: &str, out: &mut String) {
    out.push_str(&format!("k2c_tensor {output} = {input}; \n"));
}

fn write_pad1d_call(nm: &str, site_idx: usize, input: &str, out: &mut String) {
    out.push_str(&format!(
        "k2c_pad1d({nm}_padded{site_idx}_input,{input},{nm}_fill{site_idx}, \n\t{nm}_pad{site_idx}_top,{nm}_pad{site_idx}_bottom); \n",
    ));
}

fn activation(layer: &LayerNode) -> &str {
    layer.config.activation.as_deref().unwrap_or("linear")
}

fn recurrent_activation(layer: &LayerNode) -> &str {
    layer.config.recurrent_activation.as_deref().unwrap_or("hard_sigmoid")
}
