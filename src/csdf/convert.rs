//! One-to-one network-to-CSDF conversion.
//!
//! Every layer becomes one actor (`a{id}`), every connection one channel.
//! Layers that re-read input rows across phases additionally get a self-loop
//! channel holding the overlapping rows.

use crate::csdf::CsdfGraph;
use crate::error::{Error, Result};
use crate::graph::{Connection, Network};

/// Convert with separate self-loop channels (the supported mode).
pub fn network_to_csdf(net: &Network) -> Result<CsdfGraph> {
    network_to_csdf_with_options(net, false)
}

/// Convert a network into a functionally equivalent CSDF graph.
///
/// `fuse_self_loops` requests folding each self-loop into the actor's main
/// input channel. Fusion preconditions are validated (exactly one main
/// input, matching sequence lengths) but the folded rates themselves are
/// not implemented; a valid request still yields separate channels.
pub fn network_to_csdf_with_options(net: &Network, fuse_self_loops: bool) -> Result<CsdfGraph> {
    let mut csdf = CsdfGraph::new(&net.name);

    for layer in net.layers() {
        let time = layer.time_eval / (layer.phases.max(1) as f64);
        csdf.add_actor(
            &format!("a{}", layer.id),
            &layer.subop,
            layer.phases.max(1),
            time,
        );
    }

    for conn in net.connections() {
        let (prod, cons) = channel_rates(net, conn);
        csdf.add_channel(conn.src, conn.dst, prod, cons);
    }

    create_self_loops(net, &mut csdf, fuse_self_loops)?;
    Ok(csdf)
}

fn channel_rates(net: &Network, conn: &Connection) -> (Vec<u64>, Vec<u64>) {
    let src = &net.layers()[conn.src];
    let dst = &net.layers()[conn.dst];

    // no communication into a fused (built-in) operation
    if dst.built_in {
        return (vec![0; src.phases.max(1)], vec![0; dst.phases.max(1)]);
    }

    let prod = production_sequence(net, conn);
    let mut cons = consumption_sequence(net, conn);

    // A binary multiply with mismatched totals is a broadcast: the smaller
    // operand is read whole on the first phase.
    if dst.subop == "mul" {
        let to_produce: u64 = prod.iter().sum();
        let to_consume: u64 = cons.iter().sum();
        if to_produce != to_consume {
            cons = vec![0; dst.phases.max(1)];
            cons[0] = to_produce;
        }
    }
    (prod, cons)
}

/// Tokens written per source phase: single-phase layers emit the whole
/// output map at once, multi-phase layers one row slice per phase.
fn production_sequence(net: &Network, conn: &Connection) -> Vec<u64> {
    let src = &net.layers()[conn.src];
    let phase_oh = if src.phases > 1 { 1 } else { src.oh };
    let rate = (src.ow * phase_oh * src.ofm) as u64;
    vec![rate; src.phases.max(1)]
}

fn consumption_sequence(net: &Network, conn: &Connection) -> Vec<u64> {
    let dst = &net.layers()[conn.dst];
    if net.input_connections(conn.dst).len() > 1 {
        return multi_input_consumption(net, conn);
    }

    let total_rows = dst.ih;
    let mut consumed = 0usize;
    let mut cons = Vec::with_capacity(dst.phases.max(1));
    for phase in 0..dst.phases.max(1) {
        let mut rows = dst.ih;
        if dst.phases > 1 {
            rows = dst.fs;
            if dst.reuses_input_rows() && phase > 0 {
                rows = dst.stride;
            }
        }
        // over-consumption near the bottom of the input map
        if consumed + rows > total_rows {
            rows = total_rows.saturating_sub(consumed);
        }
        // the last phase drains whatever remains
        if phase == dst.phases.max(1) - 1 && consumed + rows < total_rows {
            rows = total_rows.saturating_sub(consumed);
        }
        consumed += rows;
        cons.push((dst.iw * rows * dst.ifm) as u64);
    }
    cons
}

/// Each destination phase reads an equal row slice of every source's
/// output. Truncating division; a source smaller than the phase count
/// still yields one row per phase.
fn multi_input_consumption(net: &Network, conn: &Connection) -> Vec<u64> {
    let src = &net.layers()[conn.src];
    let dst = &net.layers()[conn.dst];
    let rows = (src.oh / dst.phases.max(1)).max(1);
    let rate = (src.ow * rows * src.ofm) as u64;
    vec![rate; dst.phases.max(1)]
}

fn create_self_loops(net: &Network, csdf: &mut CsdfGraph, fuse: bool) -> Result<()> {
    for layer in net.layers() {
        if !layer.reuses_input_rows() {
            continue;
        }
        let reuse_rate = (layer.iw * (layer.fs - layer.stride) * layer.ifm) as u64;

        // the last phase keeps nothing, the first phase reuses nothing
        let mut prod = vec![reuse_rate; layer.phases - 1];
        prod.push(0);
        let mut cons = vec![0];
        cons.extend(std::iter::repeat(reuse_rate).take(layer.phases - 1));

        if fuse {
            validate_fusion(csdf, layer.id, &prod, &cons)?;
        }
        csdf.add_channel(layer.id, layer.id, prod, cons);
    }
    Ok(())
}

fn validate_fusion(csdf: &CsdfGraph, actor_id: usize, prod: &[u64], cons: &[u64]) -> Result<()> {
    let inputs = csdf.input_channels(actor_id);
    if inputs.len() != 1 {
        return Err(Error::GraphConstruction(format!(
            "fused self-loop a{actor_id}_a{actor_id} cannot be created: actor a{actor_id} has {} \
             input channels, while 1 expected",
            inputs.len()
        )));
    }
    let main = inputs[0];
    if main.prod.len() != prod.len() || main.cons.len() != cons.len() {
        return Err(Error::GraphConstruction(format!(
            "fused self-loop a{actor_id}_a{actor_id} cannot be created: sequence length mismatch \
             (main {}:{}, self-loop {}:{})",
            main.prod.len(),
            main.cons.len(),
            prod.len(),
            cons.len()
        )));
    }
    Ok(())
}
