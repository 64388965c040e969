//! Buffer reuse: shrink buffers to their observed peak and let memories
//! with disjoint lifetimes share one allocation.

use std::collections::HashMap;

use crate::buffers::{connection_buffer_tokens, ChannelRef, CsdfBuffer, NetBuffer};
use crate::error::{Error, Result};
use crate::graph::mapping::ProcessorMapping;
use crate::graph::Network;
use crate::sim::trace::{OccupancyInterval, SimTrace};

/// Shrink every buffer to the peak token count its memory reached during
/// the simulation. Requires the trace of a run over these exact buffers.
pub fn minimize_buffer_sizes(trace: &SimTrace, buffers: &mut [CsdfBuffer]) {
    for buf in buffers {
        buf.size = trace.max_stored_tokens(&buf.name);
    }
}

/// An allocation shared by one or more named memories.
#[derive(Clone, Debug)]
pub struct ReuseBuffer {
    pub name: String,
    pub size: u64,
    pub users: Vec<String>,
}

/// Greedily pack the traced memories into shared buffers.
///
/// A buffer accepts a memory unless it already stores one with an
/// overlapping occupancy interval, or (under a processor mapping) one whose
/// endpoints live on a different processor. Among eligible buffers the one
/// with the smallest growth cost `max(new_size - size, 0)` wins; ties go to
/// the earliest buffer.
pub fn build_reuse_buffers_from_trace(
    trace: &SimTrace,
    mapping: Option<&ProcessorMapping>,
) -> Result<Vec<ReuseBuffer>> {
    let schedule = trace.asap_schedule();
    let intervals = trace.occupancy_intervals_coarse(&schedule);

    let mut buffers: Vec<ReuseBuffer> = Vec::new();
    for (mem, _) in &intervals {
        let mem_size = trace.max_stored_tokens(mem);
        let eligible: Vec<usize> = (0..buffers.len())
            .filter(|&i| {
                let buf = &buffers[i];
                !stores_conflicting_proc(buf, mem, mapping)
                    && !stores_overlapping_memory(buf, mem, &intervals)
            })
            .collect();

        if eligible.is_empty() {
            let mut buf = ReuseBuffer {
                name: format!("B{}", buffers.len()),
                size: mem_size,
                users: Vec::new(),
            };
            buf.users.push(mem.clone());
            buffers.push(buf);
        } else {
            let best = best_reusable(&buffers, &eligible, mem_size)?;
            let buf = &mut buffers[best];
            buf.size = buf.size.max(mem_size);
            buf.users.push(mem.clone());
        }
    }
    Ok(buffers)
}

/// Smallest-growth-cost buffer, first-found on ties.
fn best_reusable(buffers: &[ReuseBuffer], eligible: &[usize], new_size: u64) -> Result<usize> {
    let first = *eligible.first().ok_or_else(|| {
        Error::ReuseSelection("cannot pick the best buffer from an empty set".to_string())
    })?;
    let mut best = first;
    let mut min_cost = new_size.saturating_sub(buffers[first].size);
    for &i in eligible {
        let cost = new_size.saturating_sub(buffers[i].size);
        if cost < min_cost {
            min_cost = cost;
            best = i;
        }
    }
    Ok(best)
}

fn intervals_of<'a>(
    intervals: &'a [(String, Vec<OccupancyInterval>)],
    mem: &str,
) -> &'a [OccupancyInterval] {
    intervals
        .iter()
        .find(|(name, _)| name == mem)
        .map(|(_, iv)| iv.as_slice())
        .unwrap_or(&[])
}

fn stores_overlapping_memory(
    buf: &ReuseBuffer,
    mem: &str,
    intervals: &[(String, Vec<OccupancyInterval>)],
) -> bool {
    let mem_intervals = intervals_of(intervals, mem);
    buf.users.iter().any(|stored| {
        intervals_of(intervals, stored)
            .iter()
            .any(|s| mem_intervals.iter().any(|m| m.overlaps(s)))
    })
}

fn stores_conflicting_proc(
    buf: &ReuseBuffer,
    mem: &str,
    mapping: Option<&ProcessorMapping>,
) -> bool {
    let Some(mapping) = mapping else {
        return false;
    };
    let Ok((src, dst)) = mem_endpoints(mem) else {
        return true;
    };
    let proc = mapping.find_proc_id(src);
    buf.users.iter().any(|stored| {
        let Ok((s_src, s_dst)) = mem_endpoints(stored) else {
            return true;
        };
        [dst, s_src, s_dst]
            .iter()
            .any(|&a| mapping.find_proc_id(a) != proc)
    })
}

/// Parse the endpoint actor ids out of a memory name `a{src}_a{dst}`.
fn mem_endpoints(mem: &str) -> Result<(usize, usize)> {
    let parse = |s: &str| {
        s.strip_prefix('a')
            .and_then(|id| id.parse::<usize>().ok())
            .ok_or_else(|| {
                Error::ReuseSelection(format!("memory name '{mem}' has no actor endpoints"))
            })
    };
    match mem.split_once('_') {
        Some((src, dst)) => Ok((parse(src)?, parse(dst)?)),
        None => Err(Error::ReuseSelection(format!(
            "memory name '{mem}' has no actor endpoints"
        ))),
    }
}

/// Map old channel buffers onto shared reuse buffers derived from the
/// trace, merging the channels of memories that landed in one allocation.
pub fn build_csdf_reuse_buffers_from_trace(
    trace: &SimTrace,
    old_buffers: &[CsdfBuffer],
    mapping: Option<&ProcessorMapping>,
) -> Result<Vec<CsdfBuffer>> {
    let generic = build_reuse_buffers_from_trace(trace, mapping)?;
    let mut reused: Vec<CsdfBuffer> = Vec::new();

    for old in old_buffers {
        let shared = generic
            .iter()
            .find(|b| b.users.iter().any(|u| u == &old.name))
            .ok_or_else(|| {
                Error::ReuseSelection(format!("no reuse buffer stores memory '{}'", old.name))
            })?;
        let target = match reused.iter_mut().find(|b| b.name == shared.name) {
            Some(buf) => buf,
            None => {
                reused.push(CsdfBuffer::new(&shared.name, shared.size));
                reused.last_mut().ok_or_else(|| {
                    Error::ReuseSelection("reuse buffer list is empty".to_string())
                })?
            }
        };
        target.channels.extend(old.channels.iter().cloned());
    }
    Ok(reused)
}

/// Merge per-model buffer sets into shared buffers. A shared buffer never
/// holds two channels originating from the same model; within-model reuse
/// must already be settled.
pub fn reuse_buffers_among_models(buffers_per_model: &[Vec<CsdfBuffer>]) -> Vec<CsdfBuffer> {
    // channels tagged with the index of the model they came from
    let mut shared: Vec<(CsdfBuffer, Vec<usize>)> = Vec::new();

    for (model_id, model_buffers) in buffers_per_model.iter().enumerate() {
        for buf in model_buffers {
            let eligible: Vec<usize> = (0..shared.len())
                .filter(|&i| !shared[i].1.contains(&model_id))
                .collect();
            let target = if eligible.is_empty() {
                shared.push((
                    CsdfBuffer::new(&format!("B{}", shared.len()), buf.size),
                    Vec::new(),
                ));
                shared.len() - 1
            } else {
                let mut best = eligible[0];
                let mut min_cost = buf.size.saturating_sub(shared[best].0.size);
                for &i in &eligible {
                    let cost = buf.size.saturating_sub(shared[i].0.size);
                    if cost < min_cost {
                        min_cost = cost;
                        best = i;
                    }
                }
                best
            };
            let (shared_buf, models) = &mut shared[target];
            shared_buf.size = shared_buf.size.max(buf.size);
            for ch in &buf.channels {
                shared_buf.channels.push(ch.clone());
                models.push(model_id);
            }
        }
    }
    shared.into_iter().map(|(buf, _)| buf).collect()
}

// --- simulation-free reuse over network connections ------------------------

/// Greedy buffer reuse straight over network connections, without a
/// simulated schedule. Conservative aliasing rules replace the trace:
/// a buffer is rejected when it stores a connection of the same network
/// that shares an endpoint with the new one or spans it (residual paths),
/// or one assigned to another processor under that network's mapping.
pub fn build_net_reuse_buffers(
    nets: &[Network],
    reuse_among_models: bool,
    mappings: Option<&HashMap<String, ProcessorMapping>>,
) -> Vec<NetBuffer> {
    let mut buffers: Vec<NetBuffer> = Vec::new();
    for net in nets {
        for conn in net.connections() {
            let tokens = connection_buffer_tokens(net, conn);
            let eligible: Vec<usize> = (0..buffers.len())
                .filter(|&i| {
                    net_buffer_reusable(&buffers[i], net, conn.src, conn.dst, reuse_among_models, mappings)
                })
                .collect();
            let target = match best_net_buffer(&buffers, &eligible, tokens) {
                Some(i) => i,
                None => {
                    buffers.push(NetBuffer::new(&format!("B{}", buffers.len()), 0));
                    buffers.len() - 1
                }
            };
            buffers[target].add_connection(net, conn);
        }
    }
    buffers
}

fn net_buffer_reusable(
    buf: &NetBuffer,
    net: &Network,
    src: usize,
    dst: usize,
    reuse_among_models: bool,
    mappings: Option<&HashMap<String, ProcessorMapping>>,
) -> bool {
    if buf.is_empty() {
        return true;
    }
    if !reuse_among_models && buf.users.iter().any(|u| u.model != net.name) {
        return false;
    }

    let same_model: Vec<&ChannelRef> =
        buf.users.iter().filter(|u| u.model == net.name).collect();
    for stored in &same_model {
        // input and output of one layer are live together
        if stored.src == dst || stored.dst == src {
            return false;
        }
        // residual paths: one connection spans the other
        if (stored.src <= src && stored.dst >= dst) || (src <= stored.src && dst >= stored.dst) {
            return false;
        }
    }

    if let Some(mapping) = mappings.and_then(|m| m.get(&net.name)) {
        let proc = mapping.find_proc_id(src);
        if same_model
            .iter()
            .any(|stored| mapping.find_proc_id(stored.src) != proc)
        {
            return false;
        }
    }
    true
}

/// Best-fit with the new connection's own size as the acceptance bar:
/// a buffer is only worth reusing when it saves at least one token.
fn best_net_buffer(buffers: &[NetBuffer], eligible: &[usize], tokens: u64) -> Option<usize> {
    let mut best = None;
    let mut min_cost = tokens;
    for &i in eligible {
        let cost = tokens.saturating_sub(buffers[i].size);
        if cost < min_cost {
            min_cost = cost;
            best = Some(i);
        }
    }
    best
}
