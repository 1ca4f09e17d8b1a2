//! Weight re-layout.
//!
//! Per layer family, re-packs framework-native weight tensors into the flat
//! layouts the `k2c` kernels index, and declares the scratch workspaces,
//! state buffers, configuration constants, and zeroed activation storage
//! the emitted statements reference. Weight declarations are keyed by layer
//! identity: a shared layer's state is declared once no matter how many
//! call sites invoke it.
//!
//! This stage performs no validation; it runs only on models the validator
//! accepted, and treats anything else as a caller bug.

use std::collections::BTreeSet;

use ndarray::{concatenate, s, Array1, ArrayD, Axis, Ix1, Ix2};

use crate::codegen::names::output_name;
use crate::codegen::tensor::CTensor;
use crate::model::{Family, LayerNode, ModelGraph, MAX_NDIM};

/// Emit every per-layer declaration, in layer declaration order.
pub fn write_weights(model: &ModelGraph) -> String {
    let mut out = String::new();
    let mut emitted_outputs = BTreeSet::new();

    for layer in &model.layers {
        let family = layer.family().unwrap_or_else(|| {
            panic!(
                "layer '{}' with unsupported class '{}' reached weight generation",
                layer.name, layer.class_name
            )
        });
        log::debug!("writing weights for layer '{}'", layer.name);
        match family {
            Family::Input | Family::Activation | Family::Flatten | Family::Passthrough => {}
            Family::Dense => write_dense(layer, model, &mut emitted_outputs, &mut out),
            Family::Lstm => write_lstm(layer, model, &mut emitted_outputs, &mut out),
            Family::Gru => write_gru(layer, model, &mut emitted_outputs, &mut out),
            Family::SimpleRnn => write_simple_rnn(layer, model, &mut emitted_outputs, &mut out),
            Family::Conv1d => write_conv1d(layer, model, &mut emitted_outputs, &mut out),
            Family::MaxPooling1d | Family::AveragePooling1d => {
                write_pooling1d(layer, model, &mut emitted_outputs, &mut out)
            }
            Family::GlobalMaxPooling1d | Family::GlobalAveragePooling1d => {
                write_outputs(layer, model, &mut emitted_outputs, &mut out);
                out.push_str("\n\n");
            }
            Family::Add
            | Family::Subtract
            | Family::Multiply
            | Family::Average
            | Family::Maximum
            | Family::Minimum => write_merge(layer, model, &mut emitted_outputs, &mut out),
            Family::LeakyRelu => {
                let alpha = layer.config.alpha.unwrap_or(0.3);
                out.push_str(&format!("float {}_alpha = {}; \n", layer.name, alpha));
                out.push_str("\n\n");
            }
            Family::Elu => {
                let alpha = layer.config.alpha.unwrap_or(1.0);
                out.push_str(&format!("float {}_alpha = {}; \n", layer.name, alpha));
                out.push_str("\n\n");
            }
            Family::ThresholdedRelu => {
                let theta = layer.config.theta.unwrap_or(1.0);
                out.push_str(&format!("float {}_theta = {}; \n", layer.name, theta));
                out.push_str("\n\n");
            }
            Family::Relu => write_relu(layer, &mut out),
            Family::PRelu => {
                CTensor::from_array(weight(layer, 0))
                    .render(&format!("{}_alpha", layer.name), &mut out);
                out.push_str("\n\n");
            }
            Family::Reshape => write_reshape(layer, &mut out),
            Family::Permute => {
                write_outputs(layer, model, &mut emitted_outputs, &mut out);
                let dims = layer
                    .config
                    .dims
                    .as_ref()
                    .unwrap_or_else(|| panic!("Permute layer '{}' missing 'dims'", layer.name));
                let zero_based: Vec<String> = dims.iter().map(|d| (d - 1).to_string()).collect();
                out.push_str(&format!(
                    "size_t {}_permute[{}] = {{{}}}; \n",
                    layer.name,
                    dims.len(),
                    zero_based.join(",")
                ));
                out.push_str("\n\n");
            }
            Family::RepeatVector => {
                write_outputs(layer, model, &mut emitted_outputs, &mut out);
                let n = layer
                    .config
                    .n
                    .unwrap_or_else(|| panic!("RepeatVector layer '{}' missing 'n'", layer.name));
                out.push_str(&format!("size_t {}_n = {}; \n", layer.name, n));
                out.push_str("\n\n");
            }
            Family::Dot => write_dot(layer, model, &mut emitted_outputs, &mut out),
        }
    }

    out
}

/// Left/right temporal pad amounts for 1-D convolution and pooling.
///
/// `same` splits the total so the larger remainder lands on the right;
/// `causal` pads entirely on the left; `valid` pads nothing.
pub fn pad1d(
    padding: &str,
    in_len: usize,
    out_len: usize,
    stride: usize,
    dilation: usize,
    window: usize,
) -> (usize, usize) {
    match padding {
        "causal" => (dilation * (window - 1), 0),
        "same" => {
            let total = ((out_len - 1) * stride * dilation + window).saturating_sub(in_len);
            let top = total / 2;
            (top, total - top)
        }
        _ => (0, 0),
    }
}

// ---------------------------------------------------------------------------
// Per-family writers
// ---------------------------------------------------------------------------

fn write_dense(layer: &LayerNode, model: &ModelGraph, emitted: &mut BTreeSet<String>, out: &mut String) {
    write_outputs(layer, model, emitted, out);

    let kernel = weight(layer, 0);
    let units = kernel.shape()[1];
    let bias = if layer.config.use_bias {
        CTensor::from_array(weight(layer, 1))
    } else {
        CTensor::zeros(&[units])
    };

    CTensor::from_array(kernel).render(&format!("{}_kernel", layer.name), out);
    bias.render(&format!("{}_bias", layer.name), out);

    let input_numel = layer
        .call_sites
        .iter()
        .map(|site| site.input_shapes[0].iter().product::<usize>())
        .max()
        .unwrap_or(0);
    out.push_str(&format!(
        "float {}_fwork[{}] = {{0}}; \n",
        layer.name,
        input_numel + kernel.len()
    ));
    out.push_str("\n \n");
}

fn write_lstm(layer: &LayerNode, model: &ModelGraph, emitted: &mut BTreeSet<String>, out: &mut String) {
    let units = units_of(layer);
    write_outputs(layer, model, emitted, out);

    out.push_str(&format!("float {}_fwork[{}] = {{0}}; \n", layer.name, 8 * units));
    out.push_str(&format!(
        "int {}_go_backwards = {};\n",
        layer.name, layer.config.go_backwards as i32
    ));
    out.push_str(&format!(
        "int {}_return_sequences = {};\n",
        layer.name, layer.config.return_sequences as i32
    ));
    out.push_str(&format!("float {}_state[{}] = {{0}}; \n", layer.name, 2 * units));

    let kernel = stack_gates(layer, weight(layer, 0), units, 4);
    let recurrent_kernel = stack_gates(layer, weight(layer, 1), units, 4);
    let bias = if layer.config.use_bias {
        CTensor::from_array(weight(layer, 2))
    } else {
        CTensor::zeros(&[4 * units])
    };

    CTensor::from_array(&kernel).render(&format!("{}_kernel", layer.name), out);
    CTensor::from_array(&recurrent_kernel).render(&format!("{}_recurrent_kernel", layer.name), out);
    bias.render(&format!("{}_bias", layer.name), out);
    out.push_str("\n \n");
}

fn write_gru(layer: &LayerNode, model: &ModelGraph, emitted: &mut BTreeSet<String>, out: &mut String) {
    let units = units_of(layer);
    write_outputs(layer, model, emitted, out);

    out.push_str(&format!("float {}_fwork[{}] = {{0}}; \n", layer.name, 6 * units));
    out.push_str(&format!(
        "int {}_reset_after = {};\n",
        layer.name, layer.config.reset_after as i32
    ));
    out.push_str(&format!(
        "int {}_go_backwards = {};\n",
        layer.name, layer.config.go_backwards as i32
    ));
    out.push_str(&format!(
        "int {}_return_sequences = {};\n",
        layer.name, layer.config.return_sequences as i32
    ));
    out.push_str(&format!("float {}_state[{}] = {{0}}; \n", layer.name, units));

    let kernel = stack_gates(layer, weight(layer, 0), units, 3);
    let recurrent_kernel = stack_gates(layer, weight(layer, 1), units, 3);
    let (input_bias, recurrent_bias) = gru_bias(layer, units);
    let bias = concatenate(Axis(0), &[input_bias.view(), recurrent_bias.view()])
        .expect("bias halves share length")
        .into_dyn();

    CTensor::from_array(&kernel).render(&format!("{}_kernel", layer.name), out);
    CTensor::from_array(&recurrent_kernel).render(&format!("{}_recurrent_kernel", layer.name), out);
    CTensor::from_array(&bias).render(&format!("{}_bias", layer.name), out);
    out.push_str("\n \n");
}

/// Input-side and recurrent-side bias halves, each of length `3*units`.
///
/// Reset-after cells store a (2, 3*units) bias; row 0 is applied with the
/// input kernel, row 1 inside the recurrent gates. Without reset-after the
/// recurrent half does not exist and is zero-filled, so an absent bias and
/// an explicit all-zero bias produce identical declarations.
fn gru_bias(layer: &LayerNode, units: usize) -> (Array1<f32>, Array1<f32>) {
    if !layer.config.use_bias {
        return (Array1::zeros(3 * units), Array1::zeros(3 * units));
    }
    let b = weight(layer, 2);
    if layer.config.reset_after {
        let b2 = b.view().into_dimensionality::<Ix2>().unwrap_or_else(|_| {
            panic!(
                "reset-after GRU '{}' bias must be rank 2, got {:?}",
                layer.name,
                b.shape()
            )
        });
        (b2.row(0).to_owned(), b2.row(1).to_owned())
    } else {
        let b1 = b.view().into_dimensionality::<Ix1>().unwrap_or_else(|_| {
            panic!(
                "GRU '{}' bias must be rank 1, got {:?}",
                layer.name,
                b.shape()
            )
        });
        (b1.to_owned(), Array1::zeros(3 * units))
    }
}

fn write_simple_rnn(
    layer: &LayerNode,
    model: &ModelGraph,
    emitted: &mut BTreeSet<String>,
    out: &mut String,
) {
    let units = units_of(layer);
    write_outputs(layer, model, emitted, out);

    out.push_str(&format!(
        "int {}_go_backwards = {};\n",
        layer.name, layer.config.go_backwards as i32
    ));
    out.push_str(&format!(
        "int {}_return_sequences = {};\n",
        layer.name, layer.config.return_sequences as i32
    ));
    out.push_str(&format!("float {}_fwork[{}] = {{0}}; \n", layer.name, 2 * units));
    out.push_str(&format!("float {}_state[{}] = {{0}}; \n", layer.name, units));

    let bias = if layer.config.use_bias {
        CTensor::from_array(weight(layer, 2))
    } else {
        CTensor::zeros(&[units])
    };
    CTensor::from_array(weight(layer, 0)).render(&format!("{}_kernel", layer.name), out);
    CTensor::from_array(weight(layer, 1)).render(&format!("{}_recurrent_kernel", layer.name), out);
    bias.render(&format!("{}_bias", layer.name), out);
    out.push_str("\n \n");
}

fn write_conv1d(layer: &LayerNode, model: &ModelGraph, emitted: &mut BTreeSet<String>, out: &mut String) {
    let padding = layer.config.padding.as_deref().unwrap_or("valid");
    let stride = layer.config.strides[0];
    let dilation = layer.config.dilation_rate[0];
    let kernel_size = layer.config.kernel_size[0];

    out.push_str(&format!("size_t {}_stride = {}; \n", layer.name, stride));
    out.push_str(&format!("size_t {}_dilation = {}; \n", layer.name, dilation));

    for (i, site) in layer.call_sites.iter().enumerate() {
        let in_shape = &site.input_shapes[0];
        let out_shape = &site.output_shapes[0];
        let (in_rows, in_cols) = (in_shape[0], in_shape[1]);
        let (pad_top, pad_bottom) = pad1d(
            padding,
            in_rows,
            out_shape[0],
            stride,
            dilation,
            kernel_size,
        );

        CTensor::zeros(&[in_rows + pad_top + pad_bottom, in_cols])
            .render(&format!("{}_padded{}_input", layer.name, i), out);
        out.push_str(&format!("size_t {}_pad{}_top = {}; \n", layer.name, i, pad_top));
        out.push_str(&format!(
            "size_t {}_pad{}_bottom = {}; \n",
            layer.name, i, pad_bottom
        ));
        out.push_str(&format!("float {}_fill{} = 0; \n", layer.name, i));

        write_output_once(&site.outputs[0], out_shape, model, emitted, out);
    }

    let kernel = weight(layer, 0);
    let filters = kernel.shape()[2];
    let bias = if layer.config.use_bias {
        CTensor::from_array(weight(layer, 1))
    } else {
        CTensor::zeros(&[filters])
    };
    CTensor::from_array(kernel).render(&format!("{}_kernel", layer.name), out);
    bias.render(&format!("{}_bias", layer.name), out);
    out.push_str("\n \n");
}

fn write_pooling1d(
    layer: &LayerNode,
    model: &ModelGraph,
    emitted: &mut BTreeSet<String>,
    out: &mut String,
) {
    let padding = layer.config.padding.as_deref().unwrap_or("valid");
    let stride = layer.config.strides[0];
    let pool_size = layer.config.pool_size[0];

    out.push_str(&format!("size_t {}_stride = {}; \n", layer.name, stride));
    out.push_str(&format!("size_t {}_pool_size = {}; \n", layer.name, pool_size));

    for (i, site) in layer.call_sites.iter().enumerate() {
        let in_shape = &site.input_shapes[0];
        let out_shape = &site.output_shapes[0];
        let (in_rows, in_cols) = (in_shape[0], in_shape[1]);
        let (pad_top, pad_bottom) = pad1d(padding, in_rows, out_shape[0], stride, 1, pool_size);

        CTensor::zeros(&[in_rows + pad_top + pad_bottom, in_cols])
            .render(&format!("{}_padded{}_input", layer.name, i), out);
        out.push_str(&format!("size_t {}_pad{}_top = {}; \n", layer.name, i, pad_top));
        out.push_str(&format!(
            "size_t {}_pad{}_bottom = {}; \n",
            layer.name, i, pad_bottom
        ));
        // padded positions must never win a max, so the fill is -inf for
        // average pooling as well
        out.push_str(&format!("float {}_fill{} = -HUGE_VALF; \n", layer.name, i));

        write_output_once(&site.outputs[0], out_shape, model, emitted, out);
    }
    out.push_str("\n \n");
}

fn write_merge(layer: &LayerNode, model: &ModelGraph, emitted: &mut BTreeSet<String>, out: &mut String) {
    for (i, site) in layer.call_sites.iter().enumerate() {
        // fan-in is per call site: a shared merge layer may join a
        // different number of tensors at each site
        out.push_str(&format!(
            "size_t {}_num_tensors{} = {}; \n",
            layer.name,
            i,
            site.inputs.len()
        ));
        write_output_once(&site.outputs[0], &site.output_shapes[0], model, emitted, out);
    }
    out.push_str("\n\n");
}

fn write_relu(layer: &LayerNode, out: &mut String) {
    let max_value = match layer.config.max_value {
        Some(v) => v.to_string(),
        None => "HUGE_VALF".to_string(),
    };
    out.push_str(&format!("float {}_max_value = {}; \n", layer.name, max_value));
    out.push_str(&format!(
        "float {}_negative_slope = {}; \n",
        layer.name,
        layer.config.negative_slope.unwrap_or(0.0)
    ));
    out.push_str(&format!(
        "float {}_threshold = {}; \n",
        layer.name,
        layer.config.threshold.unwrap_or(0.0)
    ));
    out.push_str("\n\n");
}

fn write_reshape(layer: &LayerNode, out: &mut String) {
    let target = layer
        .config
        .target_shape
        .as_ref()
        .unwrap_or_else(|| panic!("Reshape layer '{}' missing 'target_shape'", layer.name));
    let mut padded = vec![1usize; MAX_NDIM];
    padded[..target.len()].copy_from_slice(target);
    let dims: Vec<String> = padded.iter().map(|d| d.to_string()).collect();
    out.push_str(&format!("size_t {}_newndim = {}; \n", layer.name, target.len()));
    out.push_str(&format!(
        "size_t {}_newshp[K2C_MAX_NDIM] = {{{}}}; \n",
        layer.name,
        dims.join(",")
    ));
    out.push_str("\n\n");
}

fn write_dot(layer: &LayerNode, model: &ModelGraph, emitted: &mut BTreeSet<String>, out: &mut String) {
    write_outputs(layer, model, emitted, out);

    let axes = layer
        .config
        .axes
        .as_ref()
        .unwrap_or_else(|| panic!("Dot layer '{}' missing 'axes'", layer.name));
    let (a_axis, b_axis) = match axes.as_slice() {
        [a] => (*a, *a),
        [a, b, ..] => (*a, *b),
        [] => panic!("Dot layer '{}' has empty 'axes'", layer.name),
    };
    let site = &layer.call_sites[0];
    let work_size: usize = site.input_shapes[0].iter().product::<usize>()
        + site.input_shapes[1].iter().product::<usize>();

    out.push_str(&format!("size_t {}_axesA[1] = {{{}}}; \n", layer.name, a_axis - 1));
    out.push_str(&format!("size_t {}_axesB[1] = {{{}}}; \n", layer.name, b_axis - 1));
    out.push_str(&format!("size_t {}_naxes = 1; \n", layer.name));
    out.push_str(&format!("float {}_fwork[{}] = {{0}}; \n", layer.name, work_size));
    out.push_str(&format!(
        "int {}_normalize = {}; \n",
        layer.name, layer.config.normalize as i32
    ));
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Zeroed storage for every activation this layer produces that is not a
/// model output, exactly once per distinct name.
fn write_outputs(layer: &LayerNode, model: &ModelGraph, emitted: &mut BTreeSet<String>, out: &mut String) {
    for site in &layer.call_sites {
        for (name, shape) in site.outputs.iter().zip(&site.output_shapes) {
            write_output_once(name, shape, model, emitted, out);
        }
    }
}

fn write_output_once(
    name: &str,
    shape: &[usize],
    model: &ModelGraph,
    emitted: &mut BTreeSet<String>,
    out: &mut String,
) {
    if model.is_model_output(name) {
        return;
    }
    if !emitted.insert(name.to_string()) {
        return;
    }
    CTensor::zeros(shape).render(&output_name(name), out);
}

/// Slice a gate-concatenated kernel `(dim, gates*units)` into per-gate
/// blocks and stack them along axis 0, giving `(gates*dim, units)`.
fn stack_gates(layer: &LayerNode, kernel: &ArrayD<f32>, units: usize, gates: usize) -> ArrayD<f32> {
    let k = kernel.view().into_dimensionality::<Ix2>().unwrap_or_else(|_| {
        panic!(
            "gated kernel of layer '{}' must be rank 2, got {:?}",
            layer.name,
            kernel.shape()
        )
    });
    let blocks: Vec<_> = (0..gates)
        .map(|g| k.slice(s![.., g * units..(g + 1) * units]))
        .collect();
    concatenate(Axis(0), &blocks)
        .expect("gate blocks share the unit axis")
        .into_dyn()
}

fn units_of(layer: &LayerNode) -> usize {
    layer
        .config
        .units
        .unwrap_or_else(|| panic!("layer '{}' missing 'units'", layer.name))
}

fn weight(layer: &LayerNode, idx: usize) -> &ArrayD<f32> {
    layer
        .weights
        .get(idx)
        .unwrap_or_else(|| panic!("layer '{}' is missing weight array {}", layer.name, idx))
}
