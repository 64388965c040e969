//! Analytical network model: ordered layers plus explicit connections.
//!
//! Layers carry the mutable `phases` / `time_eval` annotations that the
//! exploration pipeline writes before each evaluation and resets afterwards.

pub mod mapping;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Operator kind of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// External data source/sink marker layer.
    Data,
    Conv,
    Pool,
    /// Fully-connected / matrix multiply.
    Gemm,
    /// Elementwise combine (add, mul, ...).
    Arithmetic,
    Normalization,
    Activation,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Data => "data",
            Op::Conv => "conv",
            Op::Pool => "pool",
            Op::Gemm => "gemm",
            Op::Arithmetic => "arithmetic",
            Op::Normalization => "normalization",
            Op::Activation => "activation",
        }
    }
}

/// A network layer.
///
/// Spatial fields follow the usual convention: `i*` for the input tensor,
/// `o*` for the output tensor, rows (`h`) split into phases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    /// Execution-order id within the owning network. Assigned on `add_layer`.
    #[serde(default)]
    pub id: usize,
    pub name: String,
    pub op: Op,
    /// Sub-operator tag, e.g. "mul" for an elementwise multiply or
    /// "maxpool" for a pooling layer. Defaults to the operator name.
    pub subop: String,
    /// Kernel (filter) size.
    pub fs: usize,
    pub stride: usize,
    pub pads: [usize; 4],
    pub iw: usize,
    pub ih: usize,
    pub ifm: usize,
    pub ow: usize,
    pub oh: usize,
    pub ofm: usize,
    /// Phase count of the current evaluation. Reset to 1 between evaluations.
    #[serde(default = "one")]
    pub phases: usize,
    /// Opaque per-layer time estimate written by a latency estimator.
    #[serde(default)]
    pub time_eval: f64,
    /// Fused into the previous layer; has no output buffer of its own.
    #[serde(default)]
    pub built_in: bool,
}

fn one() -> usize {
    1
}

impl Layer {
    /// A square layer: input and output resolution `res`, kernel `fs`.
    pub fn new(op: Op, name: &str, res: usize, fs: usize, ifm: usize, ofm: usize) -> Self {
        Layer {
            id: 0,
            name: name.to_string(),
            op,
            subop: op.as_str().to_string(),
            fs,
            stride: 1,
            pads: [0, 0, 0, 0],
            iw: res,
            ih: res,
            ifm,
            ow: res,
            oh: res,
            ofm,
            phases: 1,
            time_eval: 0.0,
            built_in: false,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_output(mut self, ow: usize, oh: usize) -> Self {
        self.ow = ow;
        self.oh = oh;
        self
    }

    pub fn with_input(mut self, iw: usize, ih: usize) -> Self {
        self.iw = iw;
        self.ih = ih;
        self
    }

    pub fn with_subop(mut self, subop: &str) -> Self {
        self.subop = subop.to_string();
        self
    }

    /// Whether subsequent phases re-read rows produced for earlier phases.
    /// Only sliding-window operators with stride smaller than the kernel do.
    pub fn reuses_input_rows(&self) -> bool {
        matches!(self.op, Op::Conv | Op::Pool) && self.phases > 1 && self.stride < self.fs
    }
}

/// Directed data dependency between two layers, identified by layer id.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Connection {
    pub src: usize,
    pub dst: usize,
    /// Endpoints map to different processors; the stored tensor must be
    /// double-buffered.
    #[serde(default)]
    pub double_buffer: bool,
}

/// An inference network: layers in execution order plus connections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    layers: Vec<Layer>,
    connections: Vec<Connection>,
}

impl Network {
    pub fn new(name: &str) -> Self {
        Network {
            name: name.to_string(),
            layers: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Append a layer, assigning its execution-order id.
    pub fn add_layer(&mut self, mut layer: Layer) -> usize {
        let id = self.layers.len();
        layer.id = id;
        self.layers.push(layer);
        id
    }

    /// Append a layer and chain-connect it to the previous output layer.
    pub fn stack_layer(&mut self, layer: Layer) -> usize {
        let id = self.add_layer(layer);
        if id > 0 {
            self.connections.push(Connection {
                src: id - 1,
                dst: id,
                double_buffer: false,
            });
        }
        id
    }

    pub fn connect(&mut self, src: usize, dst: usize) -> Result<()> {
        if src >= self.layers.len() || dst >= self.layers.len() {
            return Err(Error::GraphConstruction(format!(
                "connection {}->{} references a missing layer in '{}'",
                src, dst, self.name
            )));
        }
        self.connections.push(Connection {
            src,
            dst,
            double_buffer: false,
        });
        Ok(())
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut [Connection] {
        &mut self.connections
    }

    pub fn input_connections(&self, layer_id: usize) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.dst == layer_id).collect()
    }

    pub fn output_connections(&self, layer_id: usize) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.src == layer_id).collect()
    }

    pub fn find_layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Mark layers running any of `ops` as built-in (fused) operations.
    pub fn set_built_in(&mut self, ops: &[Op]) {
        for layer in &mut self.layers {
            if ops.contains(&layer.op) {
                layer.built_in = true;
            }
        }
    }

    /// Give every layer a unique auto-generated name (`op` + id).
    pub fn set_auto_unique_layer_names(&mut self) {
        for layer in &mut self.layers {
            layer.name = format!("{}{}", layer.op.as_str(), layer.id);
        }
    }

    // --- phase annotation -------------------------------------------------

    /// Set every layer back to single-phase execution.
    pub fn reset_phases(&mut self) {
        for layer in &mut self.layers {
            layer.phases = 1;
        }
    }

    /// Write a phase count onto every layer; `phases[i]` belongs to layer i.
    pub fn annotate_phases(&mut self, phases: &[usize]) {
        for (layer, &p) in self.layers.iter_mut().zip(phases) {
            layer.phases = p.max(1);
        }
    }

    /// Maximum phase count per layer, in execution order.
    ///
    /// Sliding-window layers split down to one output row per phase; gemm,
    /// data markers and broadcast-input elementwise layers never split.
    pub fn max_phases_per_layer(&self) -> Vec<usize> {
        self.layers
            .iter()
            .map(|layer| self.max_phases(layer.id))
            .collect()
    }

    pub fn max_phases(&self, layer_id: usize) -> usize {
        let layer = &self.layers[layer_id];
        if matches!(layer.op, Op::Gemm | Op::Data) {
            return 1;
        }
        if layer.subop == "mul" {
            // broadcast input: some source collapses a spatial dimension
            let broadcast = self
                .input_connections(layer_id)
                .iter()
                .any(|c| self.layers[c.src].oh == 1 || self.layers[c.src].ow == 1);
            if broadcast {
                return 1;
            }
        }
        layer.oh.max(1)
    }

    /// Annotate layers with a synthetic time estimate proportional to the
    /// phase count. Required before a timed simulation when no external
    /// latency estimate was supplied.
    pub fn annotate_sim_time(&mut self) {
        for layer in &mut self.layers {
            layer.time_eval = layer.phases.max(1) as f64;
        }
    }

    /// Write externally estimated per-layer times (opaque to the core).
    pub fn set_time_estimates(&mut self, times: &[f64]) {
        for (layer, &t) in self.layers.iter_mut().zip(times) {
            layer.time_eval = t;
        }
    }
}
