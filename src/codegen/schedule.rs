//! Graph linearization.
//!
//! The layer graph carries no explicit dependency edges, only per-call-site
//! input/output name lists, so a valid emission order is discovered by
//! repeated full passes over all call sites. State is the written/pending
//! name partition, local to one [`linearize`] call.
//!
//! A pass that schedules nothing while names remain pending means the graph
//! is cyclic, a name is never produced, or a name has two producers; that is
//! reported positively rather than looping forever.

use std::collections::BTreeSet;

use crate::codegen::names::{build_adjacency, SiteRef};
use crate::error::ConvertError;
use crate::model::{Family, ModelGraph};

/// One scheduled call site. The full result is the module's statement order.
pub type ScheduledCall = SiteRef;

/// Compute the emission order over all call sites.
///
/// Guarantees: every call site appears after the call sites producing its
/// inputs; each call site appears exactly once; the order is deterministic
/// (declaration order among simultaneously-ready call sites).
pub fn linearize(model: &ModelGraph) -> Result<Vec<ScheduledCall>, ConvertError> {
    let adjacency = build_adjacency(model);
    if !adjacency.duplicates.is_empty() {
        return Err(ConvertError::CyclicOrUnresolvedGraph {
            stuck: adjacency.duplicates,
        });
    }

    let mut written: BTreeSet<&str> = model.inputs.iter().map(|s| s.as_str()).collect();
    let mut pending: BTreeSet<&str> = adjacency
        .all_names
        .iter()
        .map(|s| s.as_str())
        .filter(|n| !written.contains(n))
        .collect();

    let mut scheduled: Vec<Vec<bool>> = model
        .layers
        .iter()
        .map(|l| vec![false; l.call_sites.len()])
        .collect();
    let mut order = Vec::new();

    // Input layers are the graph's own sources: their declared tensor is
    // definitional, not a dependency, so they are always eligible.
    for (li, layer) in model.layers.iter().enumerate() {
        if layer.family() != Some(Family::Input) {
            continue;
        }
        for (si, site) in layer.call_sites.iter().enumerate() {
            scheduled[li][si] = true;
            order.push(SiteRef { layer: li, site: si });
            for name in &site.outputs {
                pending.remove(name.as_str());
                written.insert(name);
            }
        }
    }

    while !pending.is_empty() {
        let mut progressed = false;
        for (li, layer) in model.layers.iter().enumerate() {
            for (si, site) in layer.call_sites.iter().enumerate() {
                if scheduled[li][si] {
                    continue;
                }
                let ready = site.inputs.iter().all(|n| written.contains(n.as_str()))
                    && site.outputs.iter().all(|n| pending.contains(n.as_str()));
                if !ready {
                    continue;
                }
                scheduled[li][si] = true;
                order.push(SiteRef { layer: li, site: si });
                for name in &site.outputs {
                    pending.remove(name.as_str());
                    written.insert(name);
                }
                progressed = true;
            }
        }
        if !progressed {
            return Err(ConvertError::CyclicOrUnresolvedGraph {
                stuck: pending.into_iter().map(str::to_string).collect(),
            });
        }
    }

    Ok(order)
}
