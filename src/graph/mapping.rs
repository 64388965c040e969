//! Processor mapping: which layers run on which processor.

use serde::{Deserialize, Serialize};

use crate::graph::Network;

/// Pipeline mapping: `procs[p]` lists the layer ids executed by processor p.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessorMapping {
    pub procs: Vec<Vec<usize>>,
}

impl ProcessorMapping {
    pub fn new(procs: Vec<Vec<usize>>) -> Self {
        ProcessorMapping { procs }
    }

    /// Processor a layer is mapped to, if any.
    pub fn find_proc_id(&self, layer_id: usize) -> Option<usize> {
        self.procs
            .iter()
            .position(|layers| layers.contains(&layer_id))
    }

    /// Whether two layers are mapped to different processors. Unmapped
    /// layers never conflict.
    pub fn split_across_procs(&self, a: usize, b: usize) -> bool {
        match (self.find_proc_id(a), self.find_proc_id(b)) {
            (Some(pa), Some(pb)) => pa != pb,
            _ => false,
        }
    }
}

/// Mark every connection whose endpoints run on different processors as
/// double-buffered; all others are reset.
pub fn set_double_buffers_from_mapping(net: &mut Network, mapping: &ProcessorMapping) {
    for conn in net.connections_mut() {
        conn.double_buffer = mapping.split_across_procs(conn.src, conn.dst);
    }
}

pub fn reset_double_buffers(net: &mut Network) {
    for conn in net.connections_mut() {
        conn.double_buffer = false;
    }
}

pub fn set_all_double_buffers(net: &mut Network) {
    for conn in net.connections_mut() {
        conn.double_buffer = true;
    }
}
