//! Reference forward evaluation.
//!
//! Straightforward implementations of the supported layer families, correct
//! but slow, used to compute the prediction fixtures baked into the
//! generated test suite. Call sites execute in the scheduler's emission
//! order, so this path also exercises the same linearization the generated
//! module uses.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Axis};

use crate::codegen::schedule;
use crate::codegen::weights::pad1d;
use crate::model::{CallSite, Family, LayerNode, ModelGraph};

pub type EvalResult<T> = Result<T, String>;

/// Run the model forward on one set of inputs (batch dimension omitted).
pub fn predict(model: &ModelGraph, inputs: &[ArrayD<f32>]) -> EvalResult<Vec<ArrayD<f32>>> {
    if inputs.len() != model.inputs.len() {
        return Err(format!(
            "model declares {} inputs but {} were supplied",
            model.inputs.len(),
            inputs.len()
        ));
    }

    let order = schedule::linearize(model).map_err(|e| e.to_string())?;
    let mut env: BTreeMap<&str, ArrayD<f32>> = model
        .inputs
        .iter()
        .map(|n| n.as_str())
        .zip(inputs.iter().cloned())
        .collect();

    for call in order {
        let layer = &model.layers[call.layer];
        let family = layer
            .family()
            .ok_or_else(|| format!("layer '{}' has no supported family", layer.name))?;
        if family == Family::Input {
            continue;
        }
        let site = &layer.call_sites[call.site];
        let xs: Vec<&ArrayD<f32>> = site
            .inputs
            .iter()
            .map(|n| {
                env.get(n.as_str())
                    .ok_or_else(|| format!("tensor '{n}' consumed before production"))
            })
            .collect::<EvalResult<_>>()?;
        let y = eval_call(layer, family, site, &xs)?;
        env.insert(site.outputs[0].as_str(), y);
    }

    model
        .outputs
        .iter()
        .map(|n| {
            env.get(n.as_str())
                .cloned()
                .ok_or_else(|| format!("model output '{n}' was never produced"))
        })
        .collect()
}

fn eval_call(
    layer: &LayerNode,
    family: Family,
    site: &CallSite,
    xs: &[&ArrayD<f32>],
) -> EvalResult<ArrayD<f32>> {
    match family {
        Family::Input => unreachable!("input layers are skipped by predict"),

        Family::Dense => dense(layer, xs[0]),
        Family::Lstm => lstm(layer, xs[0]),
        Family::Gru => gru(layer, xs[0]),
        Family::SimpleRnn => simple_rnn(layer, xs[0]),
        Family::Conv1d => conv1d(layer, site, xs[0]),
        Family::MaxPooling1d | Family::AveragePooling1d => pooling1d(layer, family, site, xs[0]),
        Family::GlobalMaxPooling1d | Family::GlobalAveragePooling1d => {
            global_pooling1d(family, xs[0])
        }
        Family::Add | Family::Subtract | Family::Multiply | Family::Average | Family::Maximum
        | Family::Minimum => merge(family, xs),

        Family::Activation => {
            let mut y = xs[0].clone();
            apply_activation(activation(layer), &mut y)?;
            Ok(y)
        }
        Family::LeakyRelu => {
            let alpha = layer.config.alpha.unwrap_or(0.3);
            Ok(xs[0].mapv(|v| if v < 0.0 { alpha * v } else { v }))
        }
        Family::PRelu => {
            let alpha = weight(layer, 0)?;
            if alpha.len() != xs[0].len() {
                return Err(format!(
                    "PReLU '{}' alpha has {} elements for an input of {}",
                    layer.name,
                    alpha.len(),
                    xs[0].len()
                ));
            }
            let flat = flatten(xs[0]);
            let af = flatten(alpha);
            let data = flat
                .iter()
                .zip(&af)
                .map(|(&v, &a)| if v < 0.0 { a * v } else { v })
                .collect();
            from_flat(xs[0].shape(), data)
        }
        Family::Elu => {
            let alpha = layer.config.alpha.unwrap_or(1.0);
            Ok(xs[0].mapv(|v| if v < 0.0 { alpha * (v.exp() - 1.0) } else { v }))
        }
        Family::ThresholdedRelu => {
            let theta = layer.config.theta.unwrap_or(1.0);
            Ok(xs[0].mapv(|v| if v > theta { v } else { 0.0 }))
        }
        Family::Relu => {
            let max_value = layer.config.max_value.unwrap_or(f32::INFINITY);
            let slope = layer.config.negative_slope.unwrap_or(0.0);
            let threshold = layer.config.threshold.unwrap_or(0.0);
            Ok(xs[0].mapv(|v| {
                if v >= max_value {
                    max_value
                } else if v >= threshold {
                    v
                } else {
                    slope * (v - threshold)
                }
            }))
        }

        Family::Reshape => {
            let target = layer
                .config
                .target_shape
                .clone()
                .ok_or_else(|| format!("Reshape '{}' missing 'target_shape'", layer.name))?;
            from_flat(&target, flatten(xs[0]))
        }
        Family::Flatten => {
            let flat = flatten(xs[0]);
            let len = flat.len();
            from_flat(&[len], flat)
        }
        Family::Permute => {
            let dims = layer
                .config
                .dims
                .clone()
                .ok_or_else(|| format!("Permute '{}' missing 'dims'", layer.name))?;
            let perm: Vec<usize> = dims.iter().map(|d| d - 1).collect();
            let y = xs[0].clone().permuted_axes(perm);
            Ok(y.as_standard_layout().to_owned())
        }
        Family::RepeatVector => {
            let n = layer
                .config
                .n
                .ok_or_else(|| format!("RepeatVector '{}' missing 'n'", layer.name))?;
            let row = flatten(xs[0]);
            let d = row.len();
            let mut data = Vec::with_capacity(n * d);
            for _ in 0..n {
                data.extend_from_slice(&row);
            }
            from_flat(&[n, d], data)
        }
        Family::Dot => {
            let axes = layer
                .config
                .axes
                .clone()
                .ok_or_else(|| format!("Dot '{}' missing 'axes'", layer.name))?;
            let (a_axis, b_axis) = match axes.as_slice() {
                [a] => (*a, *a),
                [a, b] => (*a, *b),
                other => {
                    return Err(format!(
                        "Dot '{}' expects one or two axes, got {}",
                        layer.name,
                        other.len()
                    ))
                }
            };
            dot(xs[0], xs[1], a_axis - 1, b_axis - 1, layer.config.normalize)
        }

        Family::Passthrough => Ok(xs[0].clone()),
    }
}

// ---------------------------------------------------------------------------
// Activations
// ---------------------------------------------------------------------------

/// Apply an activation to a flat slice. Softmax normalizes over the whole
/// slice, so callers with a lane structure split before calling.
fn activate_slice(name: &str, data: &mut [f32]) -> EvalResult<()> {
    match name {
        "linear" => {}
        "relu" => {
            for v in data.iter_mut() {
                if *v < 0.0 {
                    *v = 0.0;
                }
            }
        }
        "softmax" => {
            let max = data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for v in data.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            for v in data.iter_mut() {
                *v /= sum;
            }
        }
        "softplus" => {
            for v in data.iter_mut() {
                *v = v.exp().ln_1p();
            }
        }
        "softsign" => {
            for v in data.iter_mut() {
                *v /= 1.0 + v.abs();
            }
        }
        "tanh" => {
            for v in data.iter_mut() {
                *v = v.tanh();
            }
        }
        "sigmoid" => {
            for v in data.iter_mut() {
                *v = 1.0 / (1.0 + (-*v).exp());
            }
        }
        "hard_sigmoid" => {
            for v in data.iter_mut() {
                *v = (0.2 * *v + 0.5).clamp(0.0, 1.0);
            }
        }
        "exponential" => {
            for v in data.iter_mut() {
                *v = v.exp();
            }
        }
        other => return Err(format!("activation '{other}' has no reference implementation")),
    }
    Ok(())
}

fn apply_activation(name: &str, x: &mut ArrayD<f32>) -> EvalResult<()> {
    if name == "softmax" && x.ndim() > 1 {
        let last = Axis(x.ndim() - 1);
        for mut lane in x.lanes_mut(last) {
            let slice = lane
                .as_slice_mut()
                .ok_or("softmax lane is not contiguous")?;
            activate_slice(name, slice)?;
        }
        return Ok(());
    }
    let mut flat = flatten(x);
    activate_slice(name, &mut flat)?;
    let shape = x.shape().to_vec();
    *x = from_flat(&shape, flat)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Layer math
// ---------------------------------------------------------------------------

fn dense(layer: &LayerNode, x: &ArrayD<f32>) -> EvalResult<ArrayD<f32>> {
    let kernel = weight(layer, 0)?;
    let (in_dim, units) = dims2(kernel)?;
    let last = *x
        .shape()
        .last()
        .ok_or_else(|| format!("Dense '{}' applied to a scalar", layer.name))?;
    if last != in_dim {
        return Err(format!(
            "Dense '{}' kernel expects {} features, input has {}",
            layer.name, in_dim, last
        ));
    }

    let bias = dense_bias(layer, units)?;
    let xf = flatten(x);
    let kf = flatten(kernel);
    let rows = xf.len() / in_dim;
    let mut out = vec![0.0f32; rows * units];
    for r in 0..rows {
        for j in 0..units {
            let mut sum = bias[j];
            for i in 0..in_dim {
                sum += xf[r * in_dim + i] * kf[i * units + j];
            }
            out[r * units + j] = sum;
        }
    }

    let mut shape = x.shape().to_vec();
    *shape.last_mut().unwrap() = units;
    let mut y = from_flat(&shape, out)?;
    apply_activation(activation(layer), &mut y)?;
    Ok(y)
}

fn dense_bias(layer: &LayerNode, units: usize) -> EvalResult<Vec<f32>> {
    if layer.config.use_bias {
        Ok(flatten(weight(layer, 1)?))
    } else {
        Ok(vec![0.0; units])
    }
}

fn simple_rnn(layer: &LayerNode, x: &ArrayD<f32>) -> EvalResult<ArrayD<f32>> {
    let units = units_of(layer)?;
    let (t_len, in_dim) = dims2(x)?;
    let kernel = flatten(weight(layer, 0)?);
    let recurrent = flatten(weight(layer, 1)?);
    let bias = recurrent_bias(layer, units, 2)?;

    let mut h = vec![0.0f32; units];
    let mut seq = Vec::new();
    for t in time_order(layer, t_len) {
        let mut next = bias.clone();
        for j in 0..units {
            for i in 0..in_dim {
                next[j] += x[[t, i]] * kernel[i * units + j];
            }
            for i in 0..units {
                next[j] += h[i] * recurrent[i * units + j];
            }
        }
        activate_slice(activation(layer), &mut next)?;
        h = next;
        if layer.config.return_sequences {
            seq.extend_from_slice(&h);
        }
    }
    rnn_output(layer, t_len, units, seq, h)
}

fn lstm(layer: &LayerNode, x: &ArrayD<f32>) -> EvalResult<ArrayD<f32>> {
    let units = units_of(layer)?;
    let (t_len, in_dim) = dims2(x)?;
    let kernel = flatten(weight(layer, 0)?);
    let recurrent = flatten(weight(layer, 1)?);
    let bias = recurrent_bias(layer, 4 * units, 2)?;
    let act = activation(layer);
    let rec_act = recurrent_activation(layer);

    let width = 4 * units;
    let mut h = vec![0.0f32; units];
    let mut c = vec![0.0f32; units];
    let mut seq = Vec::new();
    for t in time_order(layer, t_len) {
        let mut z = bias.clone();
        for j in 0..width {
            for i in 0..in_dim {
                z[j] += x[[t, i]] * kernel[i * width + j];
            }
            for i in 0..units {
                z[j] += h[i] * recurrent[i * width + j];
            }
        }
        // gate order: input, forget, candidate, output
        activate_slice(rec_act, &mut z[..units])?;
        activate_slice(rec_act, &mut z[units..2 * units])?;
        activate_slice(act, &mut z[2 * units..3 * units])?;
        activate_slice(rec_act, &mut z[3 * units..])?;

        for j in 0..units {
            c[j] = z[units + j] * c[j] + z[j] * z[2 * units + j];
        }
        let mut c_act = c.clone();
        activate_slice(act, &mut c_act)?;
        for j in 0..units {
            h[j] = z[3 * units + j] * c_act[j];
        }
        if layer.config.return_sequences {
            seq.extend_from_slice(&h);
        }
    }
    rnn_output(layer, t_len, units, seq, h)
}

fn gru(layer: &LayerNode, x: &ArrayD<f32>) -> EvalResult<ArrayD<f32>> {
    let units = units_of(layer)?;
    let (t_len, in_dim) = dims2(x)?;
    let kernel = flatten(weight(layer, 0)?);
    let recurrent = flatten(weight(layer, 1)?);
    let (input_bias, rec_bias) = gru_biases(layer, units)?;
    let act = activation(layer);
    let rec_act = recurrent_activation(layer);
    let reset_after = layer.config.reset_after;

    let width = 3 * units;
    let mut h = vec![0.0f32; units];
    let mut seq = Vec::new();
    for t in time_order(layer, t_len) {
        // input-side contribution for all three gates
        let mut xw = input_bias.clone();
        for j in 0..width {
            for i in 0..in_dim {
                xw[j] += x[[t, i]] * kernel[i * width + j];
            }
        }
        // recurrent-side contribution
        let mut hu = rec_bias.clone();
        for j in 0..width {
            for i in 0..units {
                hu[j] += h[i] * recurrent[i * width + j];
            }
        }

        let mut z = vec![0.0f32; units];
        let mut r = vec![0.0f32; units];
        for j in 0..units {
            z[j] = xw[j] + hu[j];
            r[j] = xw[units + j] + hu[units + j];
        }
        activate_slice(rec_act, &mut z)?;
        activate_slice(rec_act, &mut r)?;

        let mut hh = vec![0.0f32; units];
        if reset_after {
            // reset gate applied after the recurrent matmul
            for j in 0..units {
                hh[j] = xw[2 * units + j] + r[j] * hu[2 * units + j];
            }
        } else {
            for j in 0..units {
                let mut rec_sum = 0.0;
                for i in 0..units {
                    rec_sum += (r[i] * h[i]) * recurrent[i * width + 2 * units + j];
                }
                hh[j] = xw[2 * units + j] + rec_sum;
            }
        }
        activate_slice(act, &mut hh)?;

        for j in 0..units {
            h[j] = z[j] * h[j] + (1.0 - z[j]) * hh[j];
        }
        if layer.config.return_sequences {
            seq.extend_from_slice(&h);
        }
    }
    rnn_output(layer, t_len, units, seq, h)
}

/// Input-side and recurrent-side GRU bias vectors, each of length
/// `3*units`. Matches the re-layout engine's split exactly.
fn gru_biases(layer: &LayerNode, units: usize) -> EvalResult<(Vec<f32>, Vec<f32>)> {
    let width = 3 * units;
    if !layer.config.use_bias {
        return Ok((vec![0.0; width], vec![0.0; width]));
    }
    let b = weight(layer, 2)?;
    if layer.config.reset_after {
        let flat = flatten(b);
        if flat.len() != 2 * width {
            return Err(format!(
                "reset-after GRU '{}' bias must have {} elements, got {}",
                layer.name,
                2 * width,
                flat.len()
            ));
        }
        Ok((flat[..width].to_vec(), flat[width..].to_vec()))
    } else {
        Ok((flatten(b), vec![0.0; width]))
    }
}

fn conv1d(layer: &LayerNode, site: &CallSite, x: &ArrayD<f32>) -> EvalResult<ArrayD<f32>> {
    let (t_in, c_in) = dims2(x)?;
    let kernel = weight(layer, 0)?;
    let kshape = kernel.shape();
    let (k_size, filters) = (kshape[0], kshape[2]);
    let stride = layer.config.strides[0];
    let dilation = layer.config.dilation_rate[0];
    let padding = layer.config.padding.as_deref().unwrap_or("valid");
    let bias = if layer.config.use_bias {
        flatten(weight(layer, 1)?)
    } else {
        vec![0.0; filters]
    };

    let (pad_top, pad_bottom) = pad1d(
        padding,
        t_in,
        site.output_shapes[0][0],
        stride,
        dilation,
        k_size,
    );
    let padded_len = t_in + pad_top + pad_bottom;
    let mut padded = vec![0.0f32; padded_len * c_in];
    for t in 0..t_in {
        for ci in 0..c_in {
            padded[(t + pad_top) * c_in + ci] = x[[t, ci]];
        }
    }

    let t_out = (padded_len - dilation * (k_size - 1) - 1) / stride + 1;
    let kf = flatten(kernel);
    let mut out = vec![0.0f32; t_out * filters];
    for ot in 0..t_out {
        for f in 0..filters {
            let mut sum = bias[f];
            for kk in 0..k_size {
                let it = ot * stride + kk * dilation;
                for ci in 0..c_in {
                    sum += padded[it * c_in + ci] * kf[kk * (c_in * filters) + ci * filters + f];
                }
            }
            out[ot * filters + f] = sum;
        }
    }
    let mut y = from_flat(&[t_out, filters], out)?;
    apply_activation(activation(layer), &mut y)?;
    Ok(y)
}

fn pooling1d(
    layer: &LayerNode,
    family: Family,
    site: &CallSite,
    x: &ArrayD<f32>,
) -> EvalResult<ArrayD<f32>> {
    let (t_in, c_in) = dims2(x)?;
    let stride = layer.config.strides[0];
    let pool = layer.config.pool_size[0];
    let padding = layer.config.padding.as_deref().unwrap_or("valid");

    let (pad_top, pad_bottom) = pad1d(padding, t_in, site.output_shapes[0][0], stride, 1, pool);
    let padded_len = t_in + pad_top + pad_bottom;
    let t_out = (padded_len - pool) / stride + 1;

    let mut out = vec![0.0f32; t_out * c_in];
    for ot in 0..t_out {
        for ci in 0..c_in {
            let mut acc = f32::NEG_INFINITY;
            let mut sum = 0.0f32;
            let mut valid = 0usize;
            for p in 0..pool {
                let it = ot * stride + p;
                if it < pad_top || it >= pad_top + t_in {
                    continue;
                }
                let v = x[[it - pad_top, ci]];
                acc = acc.max(v);
                sum += v;
                valid += 1;
            }
            out[ot * c_in + ci] = if family == Family::MaxPooling1d {
                acc
            } else {
                // padded positions are excluded from the average
                sum / valid.max(1) as f32
            };
        }
    }
    from_flat(&[t_out, c_in], out)
}

fn global_pooling1d(family: Family, x: &ArrayD<f32>) -> EvalResult<ArrayD<f32>> {
    let (t_in, c_in) = dims2(x)?;
    let mut out = vec![0.0f32; c_in];
    for ci in 0..c_in {
        if family == Family::GlobalMaxPooling1d {
            let mut best = f32::NEG_INFINITY;
            for t in 0..t_in {
                best = best.max(x[[t, ci]]);
            }
            out[ci] = best;
        } else {
            let mut sum = 0.0;
            for t in 0..t_in {
                sum += x[[t, ci]];
            }
            out[ci] = sum / t_in as f32;
        }
    }
    from_flat(&[c_in], out)
}

fn merge(family: Family, xs: &[&ArrayD<f32>]) -> EvalResult<ArrayD<f32>> {
    let first = xs
        .first()
        .ok_or("merge layer invoked with no inputs")?;
    let numel = first.len();
    for x in xs {
        if x.len() != numel {
            return Err("merge inputs have differing element counts".to_string());
        }
    }

    let flats: Vec<Vec<f32>> = xs.iter().map(|x| flatten(x)).collect();
    let mut out = flats[0].clone();
    match family {
        Family::Add => {
            for rest in &flats[1..] {
                for (o, v) in out.iter_mut().zip(rest) {
                    *o += v;
                }
            }
        }
        Family::Subtract => {
            if xs.len() != 2 {
                return Err(format!("Subtract requires exactly 2 inputs, got {}", xs.len()));
            }
            for (o, v) in out.iter_mut().zip(&flats[1]) {
                *o -= v;
            }
        }
        Family::Multiply => {
            for rest in &flats[1..] {
                for (o, v) in out.iter_mut().zip(rest) {
                    *o *= v;
                }
            }
        }
        Family::Average => {
            for rest in &flats[1..] {
                for (o, v) in out.iter_mut().zip(rest) {
                    *o += v;
                }
            }
            let n = xs.len() as f32;
            for o in out.iter_mut() {
                *o /= n;
            }
        }
        Family::Maximum => {
            for rest in &flats[1..] {
                for (o, v) in out.iter_mut().zip(rest) {
                    *o = o.max(*v);
                }
            }
        }
        Family::Minimum => {
            for rest in &flats[1..] {
                for (o, v) in out.iter_mut().zip(rest) {
                    *o = o.min(*v);
                }
            }
        }
        _ => unreachable!("merge called with non-merge family"),
    }
    from_flat(first.shape(), out)
}

fn dot(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    a_axis: usize,
    b_axis: usize,
    normalize: bool,
) -> EvalResult<ArrayD<f32>> {
    if a_axis >= a.ndim() || b_axis >= b.ndim() {
        return Err("dot axis out of range".to_string());
    }
    let l = a.shape()[a_axis];
    if b.shape()[b_axis] != l {
        return Err(format!(
            "dot contraction axes disagree: {} vs {}",
            l,
            b.shape()[b_axis]
        ));
    }

    // contraction axis last in `a`, first in `b`
    let a_perm: Vec<usize> = (0..a.ndim()).filter(|&i| i != a_axis).chain([a_axis]).collect();
    let b_perm: Vec<usize> = std::iter::once(b_axis)
        .chain((0..b.ndim()).filter(|&i| i != b_axis))
        .collect();
    let ap = a.clone().permuted_axes(a_perm).as_standard_layout().to_owned();
    let bp = b.clone().permuted_axes(b_perm).as_standard_layout().to_owned();
    let mut af = flatten(&ap);
    let mut bf = flatten(&bp);
    let m = af.len() / l;
    let n = bf.len() / l;

    if normalize {
        for row in af.chunks_mut(l) {
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in row.iter_mut() {
                    *v /= norm;
                }
            }
        }
        for j in 0..n {
            let mut norm = 0.0f32;
            for k in 0..l {
                norm += bf[k * n + j] * bf[k * n + j];
            }
            let norm = norm.sqrt();
            if norm > 0.0 {
                for k in 0..l {
                    bf[k * n + j] /= norm;
                }
            }
        }
    }

    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..l {
                sum += af[i * l + k] * bf[k * n + j];
            }
            out[i * n + j] = sum;
        }
    }

    let mut shape: Vec<usize> = a
        .shape()
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != a_axis)
        .map(|(_, &d)| d)
        .collect();
    shape.extend(
        b.shape()
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != b_axis)
            .map(|(_, &d)| d),
    );
    from_flat(&shape, out)
}

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

fn rnn_output(
    layer: &LayerNode,
    t_len: usize,
    units: usize,
    seq: Vec<f32>,
    last: Vec<f32>,
) -> EvalResult<ArrayD<f32>> {
    if layer.config.return_sequences {
        from_flat(&[t_len, units], seq)
    } else {
        from_flat(&[units], last)
    }
}

fn recurrent_bias(layer: &LayerNode, width: usize, idx: usize) -> EvalResult<Vec<f32>> {
    if layer.config.use_bias {
        let b = flatten(weight(layer, idx)?);
        if b.len() != width {
            return Err(format!(
                "layer '{}' bias has {} elements, expected {}",
                layer.name,
                b.len(),
                width
            ));
        }
        Ok(b)
    } else {
        Ok(vec![0.0; width])
    }
}

fn time_order(layer: &LayerNode, t_len: usize) -> Vec<usize> {
    if layer.config.go_backwards {
        (0..t_len).rev().collect()
    } else {
        (0..t_len).collect()
    }
}

fn dims2(x: &ArrayD<f32>) -> EvalResult<(usize, usize)> {
    if x.ndim() != 2 {
        return Err(format!("expected a rank-2 tensor, got rank {}", x.ndim()));
    }
    Ok((x.shape()[0], x.shape()[1]))
}

fn weight(layer: &LayerNode, idx: usize) -> EvalResult<&ArrayD<f32>> {
    layer
        .weights
        .get(idx)
        .ok_or_else(|| format!("layer '{}' is missing weight array {idx}", layer.name))
}

fn flatten(x: &ArrayD<f32>) -> Vec<f32> {
    x.iter().copied().collect()
}

fn from_flat(shape: &[usize], data: Vec<f32>) -> EvalResult<ArrayD<f32>> {
    ArrayD::from_shape_vec(shape.to_vec(), data).map_err(|e| e.to_string())
}

fn activation(layer: &LayerNode) -> &str {
    layer.config.activation.as_deref().unwrap_or("linear")
}

fn recurrent_activation(layer: &LayerNode) -> &str {
    layer.config.recurrent_activation.as_deref().unwrap_or("hard_sigmoid")
}

fn units_of(layer: &LayerNode) -> EvalResult<usize> {
    layer
        .config
        .units
        .ok_or_else(|| format!("layer '{}' missing 'units'", layer.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerConfig;
    use ndarray::ArrayD;

    fn arr(shape: &[usize], data: Vec<f32>) -> ArrayD<f32> {
        ArrayD::from_shape_vec(shape.to_vec(), data).unwrap()
    }

    fn site(inputs: &[&str], outputs: &[&str], in_shapes: &[&[usize]], out_shapes: &[&[usize]]) -> CallSite {
        CallSite {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            input_shapes: in_shapes.iter().map(|s| s.to_vec()).collect(),
            output_shapes: out_shapes.iter().map(|s| s.to_vec()).collect(),
        }
    }

    fn input_node(name: &str, shape: &[usize]) -> LayerNode {
        LayerNode {
            name: name.to_string(),
            class_name: "InputLayer".into(),
            config: LayerConfig::default(),
            weights: vec![],
            call_sites: vec![site(&[name], &[name], &[shape], &[shape])],
        }
    }

    #[test]
    fn dense_matches_hand_computation() {
        let layer = LayerNode {
            name: "fc".into(),
            class_name: "Dense".into(),
            config: LayerConfig {
                units: Some(2),
                activation: Some("relu".into()),
                ..Default::default()
            },
            weights: vec![
                arr(&[3, 2], vec![1.0, -1.0, 0.5, 2.0, 0.0, 1.0]),
                arr(&[2], vec![0.25, -10.0]),
            ],
            call_sites: vec![site(&["x"], &["fc"], &[&[3]], &[&[2]])],
        };
        let x = arr(&[3], vec![1.0, 2.0, 3.0]);
        let y = dense(&layer, &x).unwrap();
        // pre-activation: [1*1 + 2*0.5 + 3*0 + 0.25, 1*-1 + 2*2 + 3*1 - 10]
        //               = [2.25, -4.0] -> relu -> [2.25, 0]
        assert_eq!(y.shape(), &[2]);
        assert!((y[[0]] - 2.25).abs() < 1e-6);
        assert_eq!(y[[1]], 0.0);
    }

    #[test]
    fn dense_applies_per_timestep_on_rank2_input() {
        let layer = LayerNode {
            name: "fc".into(),
            class_name: "Dense".into(),
            config: LayerConfig {
                units: Some(1),
                use_bias: false,
                ..Default::default()
            },
            weights: vec![arr(&[2, 1], vec![1.0, 1.0])],
            call_sites: vec![site(&["x"], &["fc"], &[&[2, 2]], &[&[2, 1]])],
        };
        let x = arr(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let y = dense(&layer, &x).unwrap();
        assert_eq!(y.shape(), &[2, 1]);
        assert_eq!(y[[0, 0]], 3.0);
        assert_eq!(y[[1, 0]], 7.0);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut x = arr(&[2, 3], vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0]);
        apply_activation("softmax", &mut x).unwrap();
        for r in 0..2 {
            let sum: f32 = (0..3).map(|c| x[[r, c]]).sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    fn gru_layer(use_bias: bool, bias: Option<ArrayD<f32>>) -> LayerNode {
        LayerNode {
            name: "g".into(),
            class_name: "GRU".into(),
            config: LayerConfig {
                units: Some(2),
                use_bias,
                activation: Some("tanh".into()),
                recurrent_activation: Some("sigmoid".into()),
                ..Default::default()
            },
            weights: {
                let mut w = vec![
                    arr(&[3, 6], (0..18).map(|v| v as f32 * 0.05).collect()),
                    arr(&[2, 6], (0..12).map(|v| v as f32 * -0.03).collect()),
                ];
                if let Some(b) = bias {
                    w.push(b);
                }
                w
            },
            call_sites: vec![site(&["x"], &["g"], &[&[4, 3]], &[&[2]])],
        }
    }

    #[test]
    fn gru_absent_bias_equals_zero_bias() {
        let x = arr(&[4, 3], (0..12).map(|v| (v as f32 * 0.7).sin()).collect());
        let without = gru(&gru_layer(false, None), &x).unwrap();
        let with_zeros = gru(&gru_layer(true, Some(arr(&[6], vec![0.0; 6]))), &x).unwrap();
        assert_eq!(without, with_zeros);
    }

    #[test]
    fn lstm_output_shapes() {
        let mut layer = LayerNode {
            name: "l".into(),
            class_name: "LSTM".into(),
            config: LayerConfig {
                units: Some(3),
                use_bias: false,
                activation: Some("tanh".into()),
                recurrent_activation: Some("sigmoid".into()),
                ..Default::default()
            },
            weights: vec![
                arr(&[2, 12], vec![0.1; 24]),
                arr(&[3, 12], vec![0.05; 36]),
            ],
            call_sites: vec![site(&["x"], &["l"], &[&[5, 2]], &[&[3]])],
        };
        let x = arr(&[5, 2], (0..10).map(|v| v as f32 * 0.1).collect());
        assert_eq!(lstm(&layer, &x).unwrap().shape(), &[3]);

        layer.config.return_sequences = true;
        assert_eq!(lstm(&layer, &x).unwrap().shape(), &[5, 3]);
    }

    #[test]
    fn go_backwards_changes_final_state() {
        let mut layer = LayerNode {
            name: "r".into(),
            class_name: "SimpleRNN".into(),
            config: LayerConfig {
                units: Some(2),
                use_bias: false,
                activation: Some("tanh".into()),
                ..Default::default()
            },
            weights: vec![arr(&[1, 2], vec![0.8, -0.4]), arr(&[2, 2], vec![0.2; 4])],
            call_sites: vec![site(&["x"], &["r"], &[&[3, 1]], &[&[2]])],
        };
        let x = arr(&[3, 1], vec![1.0, 0.0, -1.0]);
        let forward = simple_rnn(&layer, &x).unwrap();
        layer.config.go_backwards = true;
        let backward = simple_rnn(&layer, &x).unwrap();
        assert_ne!(forward, backward);
    }

    #[test]
    fn conv1d_valid_matches_hand_computation() {
        let layer = LayerNode {
            name: "c".into(),
            class_name: "Conv1D".into(),
            config: LayerConfig {
                kernel_size: vec![2],
                padding: Some("valid".into()),
                ..Default::default()
            },
            // kernel (k=2, c_in=1, filters=1): [1, 2]
            weights: vec![arr(&[2, 1, 1], vec![1.0, 2.0]), arr(&[1], vec![0.5])],
            call_sites: vec![site(&["x"], &["c"], &[&[4, 1]], &[&[3, 1]])],
        };
        let x = arr(&[4, 1], vec![1.0, 2.0, 3.0, 4.0]);
        let y = conv1d(&layer, &layer.call_sites[0], &x).unwrap();
        // windows: 1+2*2, 2+2*3, 3+2*4 (+0.5 bias)
        assert_eq!(y.shape(), &[3, 1]);
        assert_eq!(y[[0, 0]], 5.5);
        assert_eq!(y[[1, 0]], 8.5);
        assert_eq!(y[[2, 0]], 11.5);
    }

    #[test]
    fn causal_conv_preserves_length() {
        let layer = LayerNode {
            name: "c".into(),
            class_name: "Conv1D".into(),
            config: LayerConfig {
                kernel_size: vec![3],
                padding: Some("causal".into()),
                ..Default::default()
            },
            weights: vec![arr(&[3, 1, 1], vec![0.0, 0.0, 1.0]), arr(&[1], vec![0.0])],
            call_sites: vec![site(&["x"], &["c"], &[&[4, 1]], &[&[4, 1]])],
        };
        let x = arr(&[4, 1], vec![1.0, 2.0, 3.0, 4.0]);
        let y = conv1d(&layer, &layer.call_sites[0], &x).unwrap();
        // identity tap on the current timestep: causal padding keeps alignment
        assert_eq!(y.shape(), &[4, 1]);
        assert_eq!(flatten(&y), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn max_pooling_ignores_padding() {
        let layer = LayerNode {
            name: "p".into(),
            class_name: "MaxPooling1D".into(),
            config: LayerConfig {
                pool_size: vec![2],
                strides: vec![2],
                padding: Some("same".into()),
                ..Default::default()
            },
            weights: vec![],
            call_sites: vec![site(&["x"], &["p"], &[&[3, 1]], &[&[2, 1]])],
        };
        let x = arr(&[3, 1], vec![-5.0, -7.0, -1.0]);
        let y = pooling1d(&layer, Family::MaxPooling1d, &layer.call_sites[0], &x).unwrap();
        assert_eq!(y.shape(), &[2, 1]);
        assert_eq!(y[[0, 0]], -5.0);
        // last window covers only the real value, not the pad
        assert_eq!(y[[1, 0]], -1.0);
    }

    #[test]
    fn merge_ops() {
        let a = arr(&[3], vec![1.0, 2.0, 3.0]);
        let b = arr(&[3], vec![4.0, 1.0, -3.0]);
        assert_eq!(flatten(&merge(Family::Add, &[&a, &b]).unwrap()), vec![5.0, 3.0, 0.0]);
        assert_eq!(
            flatten(&merge(Family::Subtract, &[&a, &b]).unwrap()),
            vec![-3.0, 1.0, 6.0]
        );
        assert_eq!(
            flatten(&merge(Family::Maximum, &[&a, &b]).unwrap()),
            vec![4.0, 2.0, 3.0]
        );
    }

    #[test]
    fn dot_of_vectors_is_inner_product() {
        let a = arr(&[3], vec![1.0, 2.0, 3.0]);
        let b = arr(&[3], vec![4.0, 5.0, 6.0]);
        let y = dot(&a, &b, 0, 0, false).unwrap();
        assert_eq!(y.len(), 1);
        assert_eq!(flatten(&y), vec![32.0]);
    }

    #[test]
    fn normalized_dot_of_parallel_vectors_is_one() {
        let a = arr(&[3], vec![1.0, 2.0, 3.0]);
        let b = arr(&[3], vec![2.0, 4.0, 6.0]);
        let y = dot(&a, &b, 0, 0, true).unwrap();
        assert!((flatten(&y)[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn predict_runs_graph_in_scheduled_order() {
        let dense = LayerNode {
            name: "fc".into(),
            class_name: "Dense".into(),
            config: LayerConfig {
                units: Some(2),
                use_bias: false,
                ..Default::default()
            },
            weights: vec![arr(&[2, 2], vec![1.0, 0.0, 0.0, 1.0])],
            call_sites: vec![site(&["x"], &["fc"], &[&[2]], &[&[2]])],
        };
        let act = LayerNode {
            name: "act".into(),
            class_name: "Activation".into(),
            config: LayerConfig {
                activation: Some("relu".into()),
                ..Default::default()
            },
            weights: vec![],
            call_sites: vec![site(&["fc"], &["act"], &[&[2]], &[&[2]])],
        };
        let model = ModelGraph {
            inputs: vec!["x".into()],
            input_shapes: vec![vec![2]],
            outputs: vec!["act".into()],
            output_shapes: vec![vec![2]],
            layers: vec![input_node("x", &[2]), dense, act],
        };
        let out = predict(&model, &[arr(&[2], vec![-1.0, 2.0])]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(flatten(&out[0]), vec![0.0, 2.0]);
    }

    #[test]
    fn predict_rejects_wrong_input_count() {
        let model = ModelGraph {
            inputs: vec!["x".into()],
            input_shapes: vec![vec![2]],
            outputs: vec!["x".into()],
            output_shapes: vec![vec![2]],
            layers: vec![input_node("x", &[2])],
        };
        let err = predict(&model, &[]).unwrap_err();
        assert!(err.contains("1 inputs"), "got: {err}");
    }
}
