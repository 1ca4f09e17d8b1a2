//! C tensor literal encoding.
//!
//! Every tensor the generated module touches (weights, scratch buffers,
//! zeroed activation storage, harness fixtures) goes through [`CTensor`]:
//! a flat row-major f32 buffer with its shape right-padded to
//! [`MAX_NDIM`](crate::model::MAX_NDIM), rendered as a pair of C
//! declarations (the value array and the `k2c_tensor` descriptor).

use ndarray::ArrayD;

use crate::model::MAX_NDIM;

/// Magnitude below which a whole tensor collapses to the `{0}` literal.
const ZERO_EPS: f32 = 1e-16;

/// A tensor in the flat layout the `k2c` runtime consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct CTensor {
    /// True (unpadded) rank.
    pub ndim: usize,
    /// Element count; always the product of the unpadded shape.
    pub numel: usize,
    /// Shape right-padded with 1s up to `MAX_NDIM`.
    pub shape: [usize; MAX_NDIM],
    /// Row-major elements.
    pub data: Vec<f32>,
}

impl CTensor {
    pub fn from_array(array: &ArrayD<f32>) -> Self {
        Self::from_parts(array.shape(), array.iter().copied().collect())
    }

    pub fn zeros(shape: &[usize]) -> Self {
        let numel = shape.iter().product();
        Self::from_parts(shape, vec![0.0; numel])
    }

    fn from_parts(shape: &[usize], data: Vec<f32>) -> Self {
        assert!(
            shape.len() <= MAX_NDIM,
            "tensor of rank {} exceeds the supported maximum of {MAX_NDIM}",
            shape.len()
        );
        let mut padded = [1usize; MAX_NDIM];
        padded[..shape.len()].copy_from_slice(shape);
        let numel: usize = shape.iter().product();
        debug_assert_eq!(numel, data.len());
        Self {
            ndim: shape.len(),
            numel,
            shape: padded,
            data,
        }
    }

    /// Append the array and descriptor declarations for `name`.
    pub fn render(&self, name: &str, out: &mut String) {
        out.push_str(&format!("float {name}_array[{}] = ", self.numel));
        if self.data.iter().all(|v| v.abs() < ZERO_EPS) {
            out.push_str("{0}; \n");
        } else {
            out.push_str("{\n");
            for (i, v) in self.data.iter().enumerate() {
                out.push_str(&c_float(*v));
                out.push(',');
                if (i + 1) % 4 == 0 {
                    out.push('\n');
                }
            }
            out.push_str("}; \n");
        }
        let shape = self
            .shape
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&format!(
            "k2c_tensor {name} = {{&{name}_array[0],{},{},{{{shape}}}}}; \n",
            self.ndim, self.numel
        ));
    }
}

/// Format one element as a C float literal: 10-digit scientific notation
/// with a signed two-digit exponent, or the `HUGE_VAL` sentinels for ±∞.
fn c_float(v: f32) -> String {
    if v == f32::INFINITY {
        return "HUGE_VAL".to_string();
    }
    if v == f32::NEG_INFINITY {
        return "-HUGE_VAL".to_string();
    }
    let s = format!("{v:.10e}");
    match s.split_once('e') {
        Some((mant, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ("-", d),
                None => ("+", exp),
            };
            format!("{mant}e{sign}{digits:0>2}")
        }
        None => s,
    }
}
