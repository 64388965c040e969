//! JSON application input and result reporting.
//!
//! An application file lists models, each with one or more pipeline
//! partitions described as plain networks. Results go out as Pareto-point
//! and buffer-allocation records.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::buffers::{tokens_to_mb, CsdfBuffer, NetBuffer};
use crate::error::{Error, Result};
use crate::graph::mapping::ProcessorMapping;
use crate::graph::Network;
use crate::search::Chromosome;

/// One model of the application: its pipeline partitions plus an optional
/// layer-to-processor mapping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub partitions: Vec<Network>,
    #[serde(default)]
    pub mapping: Option<ProcessorMapping>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSpec {
    pub models: Vec<ModelSpec>,
}

impl AppSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let mut app: AppSpec = load_json(path)?;
        app.normalize()?;
        Ok(app)
    }

    /// Re-assign execution-order layer ids, reset annotations and check
    /// that connections stay inside their partition.
    fn normalize(&mut self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::Config("application lists no models".into()));
        }
        for model in &mut self.models {
            if model.partitions.is_empty() {
                return Err(Error::Config(format!(
                    "model '{}' lists no partitions",
                    model.name
                )));
            }
            for partition in &mut model.partitions {
                let layer_count = partition.layers().len();
                for (id, layer) in partition.layers_mut().iter_mut().enumerate() {
                    layer.id = id;
                    layer.phases = 1;
                }
                for conn in partition.connections() {
                    if conn.src >= layer_count || conn.dst >= layer_count {
                        return Err(Error::Config(format!(
                            "partition '{}' connects missing layers {}->{}",
                            partition.name, conn.src, conn.dst
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Partition networks grouped per model, ready for evaluation.
    pub fn partitions_per_model(&self) -> Vec<Vec<Network>> {
        self.models.iter().map(|m| m.partitions.clone()).collect()
    }
}

/// One point of the reported Pareto front.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParetoRecord {
    pub dp_by_parts: Vec<bool>,
    /// Total layer count across the application.
    pub layers_num: usize,
    /// Layers the point splits into phases.
    pub layers_split: usize,
    pub buf_size_mb: f64,
    pub time_loss_ms: f64,
}

pub fn pareto_records(front: &[Chromosome]) -> Vec<ParetoRecord> {
    front
        .iter()
        .map(|c| ParetoRecord {
            dp_by_parts: c.dp_by_parts.clone(),
            layers_num: c.dp_by_parts.len(),
            layers_split: c.split_layer_count(),
            buf_size_mb: c.buf_size_mb,
            time_loss_ms: c.time_loss_ms,
        })
        .collect()
}

/// Execution order and phase assignment of one pipeline partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionScheduleRecord {
    pub model: String,
    pub partition: String,
    /// Layer ids in execution order.
    pub schedule: Vec<usize>,
    /// Phase count per layer, aligned with `schedule`.
    pub phases: Vec<usize>,
}

/// Per-partition schedules under a decoded phase assignment;
/// `phases[m][p]` belongs to partition p of model m.
pub fn partition_schedule_records(
    app: &AppSpec,
    phases: &[Vec<Vec<usize>>],
) -> Vec<PartitionScheduleRecord> {
    let mut records = Vec::new();
    for (model, model_phases) in app.models.iter().zip(phases) {
        for (partition, partition_phases) in model.partitions.iter().zip(model_phases) {
            records.push(PartitionScheduleRecord {
                model: model.name.clone(),
                partition: partition.name.clone(),
                schedule: partition.layers().iter().map(|l| l.id).collect(),
                phases: partition_phases.clone(),
            });
        }
    }
    records
}

/// Full allocation report: how each partition runs plus the buffers
/// backing it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocationReport {
    pub schedules: Vec<PartitionScheduleRecord>,
    pub buffers: Vec<BufferRecord>,
}

/// One reported buffer allocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferRecord {
    pub name: String,
    pub size_tokens: u64,
    pub size_mb: f64,
    /// Channels stored in this buffer, as `model:aSRC_aDST`.
    pub users: Vec<String>,
}

pub fn buffer_records(buffers: &[CsdfBuffer], token_size: u64) -> Vec<BufferRecord> {
    buffers
        .iter()
        .map(|b| BufferRecord {
            name: b.name.clone(),
            size_tokens: b.size,
            size_mb: tokens_to_mb(b.size, token_size),
            users: b
                .channels
                .iter()
                .map(|c| format!("{}:{}", c.model, c.mem_name()))
                .collect(),
        })
        .collect()
}

pub fn net_buffer_records(buffers: &[NetBuffer], token_size: u64) -> Vec<BufferRecord> {
    buffers
        .iter()
        .map(|b| BufferRecord {
            name: b.name.clone(),
            size_tokens: b.size,
            size_mb: tokens_to_mb(b.size, token_size),
            users: b
                .users
                .iter()
                .map(|c| format!("{}:{}", c.model, c.mem_name()))
                .collect(),
        })
        .collect()
}

pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Io(format!("serialize {}: {e}", path.display())))?;
    fs::write(path, text).map_err(|e| Error::Io(format!("write {}: {e}", path.display())))?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).map_err(|e| Error::Io(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
}
