//! Tensor name resolution and graph adjacency.
//!
//! A tensor is materialized exactly once, under exactly one storage regime:
//! model inputs live in the entry point's `<name>_input` parameters, every
//! other activation (including model outputs) in a `<name>_output` buffer.
//! Every consumer must address it the same way.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::model::{CallSite, ModelGraph};

/// Index of one call site: (layer index, call-site index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteRef {
    pub layer: usize,
    pub site: usize,
}

/// Explicit dependency structure built once from the per-call-site name
/// lists, so the scheduler never re-discovers edges.
#[derive(Debug)]
pub struct Adjacency {
    /// Every symbolic name appearing anywhere in the graph.
    pub all_names: BTreeSet<String>,
    /// Producing call site per name.
    pub producer: BTreeMap<String, SiteRef>,
    /// Names claimed by more than one producing call site.
    pub duplicates: Vec<String>,
}

pub fn build_adjacency(model: &ModelGraph) -> Adjacency {
    let mut all_names = BTreeSet::new();
    let mut producer: BTreeMap<String, SiteRef> = BTreeMap::new();
    let mut duplicates = BTreeSet::new();

    for (li, layer) in model.layers.iter().enumerate() {
        for (si, site) in layer.call_sites.iter().enumerate() {
            for name in &site.inputs {
                all_names.insert(name.clone());
            }
            for name in &site.outputs {
                all_names.insert(name.clone());
                let site_ref = SiteRef { layer: li, site: si };
                if let Some(prev) = producer.insert(name.clone(), site_ref) {
                    if prev != site_ref {
                        duplicates.insert(name.clone());
                    }
                }
            }
        }
    }

    Adjacency {
        all_names,
        producer,
        duplicates: duplicates.into_iter().collect(),
    }
}

/// Resolve a call site's input names to their storage locations.
///
/// If every input is a declared model input the call reads the `_input`
/// parameters; otherwise it reads `_output` buffers. A call site does not
/// mix regimes.
pub fn resolve_inputs(model: &ModelGraph, site: &CallSite) -> Vec<String> {
    let from_params = site.inputs.iter().all(|n| model.is_model_input(n));
    let suffix = if from_params { "_input" } else { "_output" };
    site.inputs.iter().map(|n| format!("{n}{suffix}")).collect()
}

/// Storage location of a produced activation.
pub fn output_name(name: &str) -> String {
    format!("{name}_output")
}
