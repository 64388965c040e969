//! Data buffers backing CSDF channels and network connections, with naive
//! (one buffer per channel) builders and token accounting.

pub mod reuse;

use crate::csdf::CsdfGraph;
use crate::graph::{Connection, Network, Op};

/// Stable identity of a channel/connection across graph copies:
/// owning model name plus endpoint layer ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRef {
    pub model: String,
    pub src: usize,
    pub dst: usize,
}

impl ChannelRef {
    pub fn new(model: &str, src: usize, dst: usize) -> Self {
        ChannelRef {
            model: model.to_string(),
            src,
            dst,
        }
    }

    /// Memory name used by the simulator for this channel.
    pub fn mem_name(&self) -> String {
        format!("a{}_a{}", self.src, self.dst)
    }
}

/// A buffer holding the tokens of one or more CSDF channels.
#[derive(Clone, Debug)]
pub struct CsdfBuffer {
    pub name: String,
    /// Capacity in tokens.
    pub size: u64,
    pub channels: Vec<ChannelRef>,
}

impl CsdfBuffer {
    pub fn new(name: &str, size: u64) -> Self {
        CsdfBuffer {
            name: name.to_string(),
            size,
            channels: Vec::new(),
        }
    }

    pub fn stores(&self, model: &str, src: usize, dst: usize) -> bool {
        self.channels
            .iter()
            .any(|c| c.model == model && c.src == src && c.dst == dst)
    }

    pub fn holds_model(&self, model: &str) -> bool {
        self.channels.iter().any(|c| c.model == model)
    }

    /// Register a channel, growing the buffer if the channel needs more room.
    pub fn add_channel(&mut self, channel: ChannelRef, tokens: u64) {
        self.size = self.size.max(tokens);
        self.channels.push(channel);
    }
}

/// One buffer per channel, sized for a full production/consumption cycle.
pub fn build_naive_csdf_buffers(csdf: &CsdfGraph) -> Vec<CsdfBuffer> {
    csdf.channels
        .iter()
        .map(|ch| {
            let produced: u64 = ch.prod.iter().sum();
            let consumed: u64 = ch.cons.iter().sum();
            let mut buf = CsdfBuffer::new(&ch.name, produced.max(consumed));
            buf.channels.push(ChannelRef::new(&csdf.name, ch.src, ch.dst));
            buf
        })
        .collect()
}

/// Rename buffers `B0..Bn` in order.
pub fn set_auto_buffer_names(buffers: &mut [CsdfBuffer]) {
    for (i, buf) in buffers.iter_mut().enumerate() {
        buf.name = format!("B{i}");
    }
}

pub fn total_buffer_tokens(buffers: &[CsdfBuffer]) -> u64 {
    buffers.iter().map(|b| b.size).sum()
}

pub fn tokens_to_mb(tokens: u64, token_size_bytes: u64) -> f64 {
    (tokens * token_size_bytes) as f64 / 1e6
}

// --- connection-level buffers (no simulation involved) ---------------------

/// A buffer holding the payload of one or more network connections.
#[derive(Clone, Debug)]
pub struct NetBuffer {
    pub name: String,
    pub size: u64,
    pub users: Vec<ChannelRef>,
}

impl NetBuffer {
    pub fn new(name: &str, size: u64) -> Self {
        NetBuffer {
            name: name.to_string(),
            size,
            users: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn add_connection(&mut self, net: &Network, conn: &Connection) {
        self.size = self.size.max(connection_buffer_tokens(net, conn));
        self.users.push(ChannelRef::new(&net.name, conn.src, conn.dst));
    }
}

/// Tokens a connection's buffer must hold: the larger of the producing
/// slice and the consuming window, doubled for cross-processor transfers.
pub fn connection_buffer_tokens(net: &Network, conn: &Connection) -> u64 {
    let src = &net.layers()[conn.src];
    let dst = &net.layers()[conn.dst];
    if dst.built_in {
        return 0;
    }

    let src_tokens = if src.built_in {
        0
    } else {
        (src.ofm * src.oh * src.ow / src.phases.max(1)) as u64
    };
    let mut dst_tokens = (dst.ifm * dst.ih * dst.iw / dst.phases.max(1)) as u64;
    if matches!(dst.op, Op::Arithmetic) {
        dst_tokens = src_tokens;
    }
    // phased sliding-window readers keep a full kernel window resident
    if dst.phases > 1 && dst.fs > 1 {
        dst_tokens = (dst.ifm * dst.fs * dst.iw) as u64;
    }

    let mut tokens = src_tokens.max(dst_tokens);
    if conn.double_buffer {
        tokens *= 2;
    }
    tokens
}

/// One buffer per connection across all networks, named `B0..Bn`.
pub fn build_naive_net_buffers(nets: &[Network]) -> Vec<NetBuffer> {
    let mut buffers = Vec::new();
    for net in nets {
        for conn in net.connections() {
            let mut buf = NetBuffer::new(
                &format!("B{}", buffers.len()),
                connection_buffer_tokens(net, conn),
            );
            buf.add_connection(net, conn);
            buffers.push(buf);
        }
    }
    buffers
}

pub fn total_net_buffer_tokens(buffers: &[NetBuffer]) -> u64 {
    buffers.iter().map(|b| b.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csdf::convert::network_to_csdf;
    use crate::graph::{Layer, Network, Op};

    fn chain() -> Network {
        let mut net = Network::new("chain");
        net.stack_layer(Layer::new(Op::Data, "input", 6, 1, 3, 3));
        net.stack_layer(Layer::new(Op::Conv, "conv0", 6, 3, 3, 8).with_output(6, 4));
        net.stack_layer(
            Layer::new(Op::Data, "output", 6, 1, 8, 8)
                .with_input(6, 4)
                .with_output(6, 4),
        );
        net
    }

    #[test]
    fn naive_csdf_buffer_per_channel() {
        let csdf = network_to_csdf(&chain()).unwrap();
        let bufs = build_naive_csdf_buffers(&csdf);
        assert_eq!(bufs.len(), 2);
        assert_eq!(bufs[0].name, "a0_a1");
        assert_eq!(bufs[0].size, 108); // 6*6*3
        assert_eq!(bufs[1].name, "a1_a2");
        assert_eq!(bufs[1].size, 192); // 6*4*8
    }

    #[test]
    fn connection_tokens_single_phase() {
        let net = chain();
        // conv output: 6*4*8 output tokens vs data reader input window
        let conn = net.connections()[1];
        assert_eq!(connection_buffer_tokens(&net, &conn), 192);
    }

    #[test]
    fn connection_tokens_phased_reader_keeps_kernel_window() {
        let mut net = chain();
        net.layers_mut()[1].phases = 4;
        let conn = net.connections()[0];
        // ifm * fs * iw = 3*3*6
        assert_eq!(connection_buffer_tokens(&net, &conn), 108.max(54));
    }

    #[test]
    fn double_buffer_doubles_tokens() {
        let mut net = chain();
        net.connections_mut()[1].double_buffer = true;
        let conn = net.connections()[1];
        assert_eq!(connection_buffer_tokens(&net, &conn), 384);
    }

    #[test]
    fn built_in_destination_needs_no_tokens() {
        let mut net = chain();
        net.layers_mut()[2].built_in = true;
        let conn = net.connections()[1];
        assert_eq!(connection_buffer_tokens(&net, &conn), 0);
    }

    #[test]
    fn auto_names_and_totals() {
        let csdf = network_to_csdf(&chain()).unwrap();
        let mut bufs = build_naive_csdf_buffers(&csdf);
        set_auto_buffer_names(&mut bufs);
        assert_eq!(bufs[0].name, "B0");
        assert_eq!(total_buffer_tokens(&bufs), 300);
        assert!((tokens_to_mb(250_000, 4) - 1.0).abs() < 1e-9);
    }
}
