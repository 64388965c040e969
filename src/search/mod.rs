//! Search space and fitness evaluation for memory-reduction exploration.
//!
//! A candidate solution is a bit vector with one flag per layer, in global
//! execution order across all models and partitions: a set bit splits the
//! layer into its maximum phase count, a clear bit keeps it whole. Fitness
//! is the pair (total buffer size in MB, throughput loss in ms).

pub mod ga;
pub mod pareto;

use crate::buffers::reuse::{
    build_csdf_reuse_buffers_from_trace, minimize_buffer_sizes, reuse_buffers_among_models,
};
use crate::buffers::{
    build_naive_csdf_buffers, set_auto_buffer_names, tokens_to_mb, total_buffer_tokens, CsdfBuffer,
};
use crate::csdf::convert::network_to_csdf;
use crate::error::{Error, Result};
use crate::graph::Network;
use crate::sim::{simulate_asap, SimOptions};

/// Synchronization delay added by every extra phase, in milliseconds.
pub const DELAY_PER_PHASE_MS: f64 = 0.0005;

/// A candidate: one split/keep flag per layer plus its measured fitness.
/// Freshly created chromosomes carry infinite fitness until evaluated.
#[derive(Clone, Debug)]
pub struct Chromosome {
    pub dp_by_parts: Vec<bool>,
    pub buf_size_mb: f64,
    pub time_loss_ms: f64,
}

impl Chromosome {
    pub fn new(layers_num: usize) -> Self {
        Chromosome {
            dp_by_parts: vec![false; layers_num],
            buf_size_mb: f64::INFINITY,
            time_loss_ms: f64::INFINITY,
        }
    }

    pub fn init_random(&mut self, split_probability: f64, rng: &mut Rng) {
        for bit in &mut self.dp_by_parts {
            *bit = rng.next_f64() <= split_probability;
        }
    }

    /// Flip one randomly chosen flag.
    pub fn mutate(&mut self, rng: &mut Rng) {
        if self.dp_by_parts.is_empty() {
            return;
        }
        let i = rng.next_below(self.dp_by_parts.len());
        self.dp_by_parts[i] = !self.dp_by_parts[i];
    }

    pub fn split_layer_count(&self) -> usize {
        self.dp_by_parts.iter().filter(|&&b| b).count()
    }
}

/// Deterministic PRNG: a counter run through a mixing hash. Identical
/// seeds give identical runs.
#[derive(Clone, Debug)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Rng { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(1);
        simple_hash(self.state)
    }

    /// Uniform float in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform index in [0, n).
    pub fn next_below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Fast deterministic hash for pseudo-random selection.
fn simple_hash(mut x: u64) -> u64 {
    x = x
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x
}

// --- phase decoding ---------------------------------------------------------

/// Decode a bit vector into phase counts, walking models, partitions and
/// layers in order. `max_phases[m][p][l]` is the split ceiling of layer l.
pub fn decode_phases(max_phases: &[Vec<Vec<usize>>], bits: &[bool]) -> Vec<Vec<Vec<usize>>> {
    let mut decoded = Vec::with_capacity(max_phases.len());
    let mut pos = 0;
    for model in max_phases {
        let mut per_partition = Vec::with_capacity(model.len());
        for partition in model {
            let phases = partition
                .iter()
                .map(|&max| {
                    let p = if bits.get(pos).copied().unwrap_or(false) {
                        max
                    } else {
                        1
                    };
                    pos += 1;
                    p
                })
                .collect();
            per_partition.push(phases);
        }
        decoded.push(per_partition);
    }
    decoded
}

/// Throughput loss: every phase beyond the first costs one sync delay.
pub fn time_loss_ms(phases: &[Vec<Vec<usize>>], delay_per_phase_ms: f64) -> f64 {
    let extra: usize = phases
        .iter()
        .flatten()
        .flatten()
        .map(|&p| p.saturating_sub(1))
        .sum();
    extra as f64 * delay_per_phase_ms
}

// --- buffer building pipeline -----------------------------------------------

/// Memory-minimized buffers of one network under a phase assignment:
/// annotate, convert, simulate, shrink to peak, pack by reuse. Phases are
/// reset before returning.
pub fn mms_buffers(net: &mut Network, phases: &[usize]) -> Result<Vec<CsdfBuffer>> {
    net.annotate_phases(phases);
    net.annotate_sim_time();

    let csdf = network_to_csdf(net)?;
    csdf.check_consistency()?;

    let mut buffers = build_naive_csdf_buffers(&csdf);
    let trace = simulate_asap(&csdf, &buffers, SimOptions::default())?;
    minimize_buffer_sizes(&trace, &mut buffers);
    let reused = build_csdf_reuse_buffers_from_trace(&trace, &buffers, None)?;

    net.reset_phases();
    Ok(reused)
}

/// Pipelined variant: partitions run on different processors, so buffers
/// are only reused within each partition and concatenated afterwards.
pub fn mms_buffers_pipelined(
    partitions: &mut [Network],
    phases_per_partition: &[Vec<usize>],
) -> Result<Vec<CsdfBuffer>> {
    let mut all = Vec::new();
    for (partition, phases) in partitions.iter_mut().zip(phases_per_partition) {
        let buffers = mms_buffers(partition, phases)?;
        for mut buf in buffers {
            buf.name = format!("B{}", all.len());
            all.push(buf);
        }
    }
    Ok(all)
}

/// Full multi-model pipeline: per-model buffers (pipelined where a model
/// has several partitions), then cross-model sharing.
pub fn mms_buffers_multi(
    partitions_per_model: &mut [Vec<Network>],
    phases: &[Vec<Vec<usize>>],
) -> Result<Vec<CsdfBuffer>> {
    let mut buffers_per_model = Vec::with_capacity(partitions_per_model.len());
    for (partitions, model_phases) in partitions_per_model.iter_mut().zip(phases) {
        let buffers = if partitions.len() == 1 {
            let phases = model_phases.first().map(Vec::as_slice).unwrap_or(&[]);
            mms_buffers(&mut partitions[0], phases)?
        } else {
            mms_buffers_pipelined(partitions, model_phases)?
        };
        buffers_per_model.push(buffers);
    }

    let mut shared = reuse_buffers_among_models(&buffers_per_model);
    set_auto_buffer_names(&mut shared);
    Ok(shared)
}

// --- fitness ----------------------------------------------------------------

/// Evaluates chromosomes against a fixed application: a list of models,
/// each a list of pipeline partitions. Cloneable so that parallel workers
/// can evaluate on their own deep copy.
#[derive(Clone, Debug)]
pub struct FitnessEvaluator {
    partitions_per_model: Vec<Vec<Network>>,
    max_phases: Vec<Vec<Vec<usize>>>,
    pub data_token_size: u64,
    pub delay_per_phase_ms: f64,
}

impl FitnessEvaluator {
    pub fn new(partitions_per_model: Vec<Vec<Network>>, data_token_size: u64) -> Self {
        let max_phases = partitions_per_model
            .iter()
            .map(|partitions| {
                partitions
                    .iter()
                    .map(|p| p.max_phases_per_layer())
                    .collect()
            })
            .collect();
        FitnessEvaluator {
            partitions_per_model,
            max_phases,
            data_token_size,
            delay_per_phase_ms: DELAY_PER_PHASE_MS,
        }
    }

    /// Total layer count across all models and partitions; also the
    /// chromosome length.
    pub fn layers_num(&self) -> usize {
        self.partitions_per_model
            .iter()
            .flatten()
            .map(|p| p.layers().len())
            .sum()
    }

    pub fn partitions_per_model(&self) -> &[Vec<Network>] {
        &self.partitions_per_model
    }

    /// Score one bit vector: returns (buffer size MB, time loss ms).
    pub fn evaluate(&self, bits: &[bool]) -> Result<(f64, f64)> {
        if bits.len() != self.layers_num() {
            return Err(Error::Config(format!(
                "chromosome has {} bits for {} layers",
                bits.len(),
                self.layers_num()
            )));
        }
        let phases = decode_phases(&self.max_phases, bits);
        let loss = time_loss_ms(&phases, self.delay_per_phase_ms);

        // evaluation mutates phase annotations; work on a private copy
        let mut partitions = self.partitions_per_model.clone();
        let buffers = mms_buffers_multi(&mut partitions, &phases)?;
        let size_mb = tokens_to_mb(total_buffer_tokens(&buffers), self.data_token_size);
        Ok((size_mb, loss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Layer, Op};

    fn small_net(name: &str) -> Network {
        let mut net = Network::new(name);
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
    fn rng_is_deterministic() {
        let mut a = Rng::new(7);
        let mut b = Rng::new(7);
        let xs: Vec<u64> = (0..8).map(|_| a.next_u64()).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.next_u64()).collect();
        assert_eq!(xs, ys);
        assert!((0..100).all(|_| (0.0..1.0).contains(&a.next_f64())));
    }

    #[test]
    fn decode_splits_only_set_bits() {
        let max = vec![vec![vec![1, 4, 1]]];
        let phases = decode_phases(&max, &[true, true, false]);
        assert_eq!(phases, vec![vec![vec![1, 4, 1]]]);
        let phases = decode_phases(&max, &[false, false, false]);
        assert_eq!(phases, vec![vec![vec![1, 1, 1]]]);
    }

    #[test]
    fn all_clear_bits_cost_no_loss() {
        let max = vec![vec![vec![1, 4, 1]]];
        let phases = decode_phases(&max, &[false, false, false]);
        assert_eq!(time_loss_ms(&phases, DELAY_PER_PHASE_MS), 0.0);
        let split = decode_phases(&max, &[true, true, true]);
        // only the conv has extra phases: (4 - 1) * delay
        let loss = time_loss_ms(&split, DELAY_PER_PHASE_MS);
        assert!((loss - 3.0 * DELAY_PER_PHASE_MS).abs() < 1e-12);
    }

    #[test]
    fn evaluate_scores_both_objectives() {
        let evaluator = FitnessEvaluator::new(vec![vec![small_net("m0")]], 4);
        // unsplit: both channel buffers live at once, 108 + 192 tokens
        let (whole_mb, whole_loss) = evaluator.evaluate(&[false, false, false]).unwrap();
        assert!((whole_mb - 300.0 * 4.0 / 1e6).abs() < 1e-12);
        assert_eq!(whole_loss, 0.0);
        // split: only the conv can phase, 3 extra phases of sync delay
        let (split_mb, split_loss) = evaluator.evaluate(&[true, true, true]).unwrap();
        assert!(split_mb.is_finite());
        assert!((split_loss - 3.0 * DELAY_PER_PHASE_MS).abs() < 1e-12);
    }

    #[test]
    fn evaluation_leaves_phases_reset() {
        let mut net = small_net("m0");
        let max = net.max_phases_per_layer();
        let buffers = mms_buffers(&mut net, &max).unwrap();
        assert!(!buffers.is_empty());
        assert!(net.layers().iter().all(|l| l.phases == 1));
    }

    #[test]
    fn multi_model_buffers_are_shared() {
        let mut partitions = vec![vec![small_net("m0")], vec![small_net("m1")]];
        let phases = vec![vec![vec![1, 1, 1]]; 2];
        let shared = mms_buffers_multi(&mut partitions, &phases).unwrap();
        let single = {
            let mut net = small_net("m0");
            mms_buffers(&mut net, &[1, 1, 1]).unwrap()
        };
        // the two identical models share one set of allocations
        let shared_total: u64 = shared.iter().map(|b| b.size).sum();
        let single_total: u64 = single.iter().map(|b| b.size).sum();
        assert_eq!(shared_total, single_total);
    }

    #[test]
    fn chromosome_length_is_validated() {
        let evaluator = FitnessEvaluator::new(vec![vec![small_net("m0")]], 4);
        assert!(evaluator.evaluate(&[true]).is_err());
    }

    #[test]
    fn mutation_flips_exactly_one_bit() {
        let mut rng = Rng::new(1);
        let mut c = Chromosome::new(8);
        c.mutate(&mut rng);
        assert_eq!(c.split_layer_count(), 1);
        c.mutate(&mut rng);
        assert!(c.split_layer_count() == 0 || c.split_layer_count() == 2);
    }
}
