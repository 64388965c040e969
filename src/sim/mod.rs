//! ASAP simulation of a CSDF graph on a pool of identical processors.
//!
//! Actors fire as soon as every input channel holds enough tokens for the
//! current phase. The ready scan is round-robin: it resumes just past the
//! actor fired last, so equally-ready actors take turns.

pub mod trace;

use crate::buffers::CsdfBuffer;
use crate::csdf::CsdfGraph;
use crate::error::{Error, Result};
use crate::sim::trace::{MemAccess, MemAction, SimJob, SimTrace};

#[derive(Clone, Copy, Debug)]
pub struct SimOptions {
    pub proc_num: usize,
    /// Input samples to push through the graph; every actor fires
    /// `phases * max_samples` times in a complete run.
    pub max_samples: usize,
    pub trace_memory: bool,
    pub verbose: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions {
            proc_num: 1,
            max_samples: 1,
            trace_memory: true,
            verbose: false,
        }
    }
}

struct SimBuffer {
    name: String,
    occupied: u64,
}

struct Simulation<'a> {
    csdf: &'a CsdfGraph,
    opts: SimOptions,
    /// channel index -> simulation buffer index
    channel_buf: Vec<usize>,
    buffers: Vec<SimBuffer>,
    /// firings performed so far, per actor
    phase_per_actor: Vec<usize>,
    proc_free: Vec<bool>,
    trace: SimTrace,
}

/// Simulate an ASAP execution of `csdf`, with every channel backed by one
/// of `buffers`. Returns the recorded trace.
///
/// Fails when a channel has no backing buffer, when a read underflows its
/// buffer, or when any actor ends short of its expected firing count
/// (a deadlocked schedule).
pub fn simulate_asap(
    csdf: &CsdfGraph,
    buffers: &[CsdfBuffer],
    opts: SimOptions,
) -> Result<SimTrace> {
    let mut sim = Simulation::new(csdf, buffers, opts)?;
    sim.run()?;
    sim.check_completion()?;
    Ok(sim.trace)
}

impl<'a> Simulation<'a> {
    fn new(csdf: &'a CsdfGraph, buffers: &[CsdfBuffer], opts: SimOptions) -> Result<Self> {
        let sim_buffers: Vec<SimBuffer> = buffers
            .iter()
            .map(|b| SimBuffer {
                name: b.name.clone(),
                occupied: 0,
            })
            .collect();

        let mut channel_buf = Vec::with_capacity(csdf.channels.len());
        for ch in &csdf.channels {
            let idx = buffers
                .iter()
                .position(|b| b.stores(&csdf.name, ch.src, ch.dst))
                .ok_or_else(|| {
                    Error::SimulationConsistency(format!(
                        "channel {} of graph '{}' has no backing buffer",
                        ch.name, csdf.name
                    ))
                })?;
            channel_buf.push(idx);
        }

        Ok(Simulation {
            csdf,
            opts,
            channel_buf,
            buffers: sim_buffers,
            phase_per_actor: vec![0; csdf.actors.len()],
            proc_free: vec![true; opts.proc_num.max(1)],
            trace: SimTrace::new(),
        })
    }

    fn run(&mut self) -> Result<()> {
        let mut last_fired: i64 = -1;
        loop {
            let ready = self.next_ready_actor(last_fired);
            let proc = self.proc_free.iter().position(|&f| f);
            match (ready, proc) {
                (Some(actor), Some(proc)) => {
                    self.fire(actor, proc)?;
                    last_fired = actor as i64;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Round-robin scan: actors after `last`, then from the start.
    fn next_ready_actor(&self, last: i64) -> Option<usize> {
        let n = self.csdf.actors.len();
        let first = (last + 1) as usize;
        (first..n)
            .chain(0..(first.min(n)))
            .find(|&id| self.is_ready(id))
    }

    fn is_ready(&self, actor_id: usize) -> bool {
        let actor = &self.csdf.actors[actor_id];
        let fired = self.phase_per_actor[actor_id];
        if fired >= actor.phases * self.opts.max_samples {
            return false;
        }
        let phase = fired % actor.phases;
        self.csdf
            .channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.dst == actor_id)
            .all(|(i, ch)| self.buffers[self.channel_buf[i]].occupied >= ch.cons[phase])
    }

    fn fire(&mut self, actor_id: usize, proc_id: usize) -> Result<()> {
        let actor = &self.csdf.actors[actor_id];
        let fired = self.phase_per_actor[actor_id];
        let phase = fired % actor.phases;
        let proc_name = format!("proc{proc_id}");

        let start = self.trace.proc_time(&proc_name);
        let end = start + actor.time_per_phase;
        if self.opts.verbose {
            eprintln!(
                "fire {} phase {}/{} on {} at {start}",
                actor.name,
                phase + 1,
                actor.phases,
                proc_name
            );
        }

        // consume from every input channel
        for (i, ch) in self.csdf.channels.iter().enumerate() {
            if ch.dst != actor_id {
                continue;
            }
            let rate = ch.cons[phase];
            let buf = &mut self.buffers[self.channel_buf[i]];
            buf.occupied = buf.occupied.checked_sub(rate).ok_or_else(|| {
                Error::SimulationConsistency(format!(
                    "read underflow: {} reads {} tokens from {} holding {}",
                    actor.name, rate, buf.name, buf.occupied
                ))
            })?;
            if self.opts.trace_memory {
                let mem = buf.name.clone();
                self.record_access(&actor.name, fired, mem, MemAction::Read, rate, start, end);
            }
        }

        self.proc_free[proc_id] = true;
        self.trace.add_job(SimJob {
            task: actor.name.clone(),
            job: fired,
            processor: proc_name,
            start,
            end,
        });

        // produce onto every output channel
        for (i, ch) in self.csdf.channels.iter().enumerate() {
            if ch.src != actor_id {
                continue;
            }
            let rate = ch.prod[phase];
            let buf = &mut self.buffers[self.channel_buf[i]];
            buf.occupied += rate;
            if self.opts.trace_memory {
                let mem = buf.name.clone();
                self.record_access(&actor.name, fired, mem, MemAction::Write, rate, start, end);
            }
        }

        self.phase_per_actor[actor_id] += 1;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_access(
        &mut self,
        task: &str,
        job: usize,
        mem: String,
        action: MemAction,
        tokens: u64,
        start: f64,
        end: f64,
    ) {
        self.trace.add_access(MemAccess {
            task: task.to_string(),
            job,
            mem,
            action,
            tokens,
            start,
            end,
        });
    }

    /// Every actor must have run all its phases for every sample.
    fn check_completion(&self) -> Result<()> {
        for (id, actor) in self.csdf.actors.iter().enumerate() {
            let expected = actor.phases * self.opts.max_samples;
            let performed = self.phase_per_actor[id];
            if performed != expected {
                return Err(Error::SimulationConsistency(format!(
                    "actor {} fired {performed}/{expected} phases",
                    actor.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::build_naive_csdf_buffers;
    use crate::csdf::convert::network_to_csdf;
    use crate::graph::{Layer, Network, Op};

    fn phased_chain() -> Network {
        let mut net = Network::new("chain");
        net.stack_layer(Layer::new(Op::Data, "input", 6, 1, 3, 3));
        net.stack_layer(Layer::new(Op::Conv, "conv0", 6, 3, 3, 8).with_output(6, 4));
        net.stack_layer(
            Layer::new(Op::Data, "output", 6, 1, 8, 8)
                .with_input(6, 4)
                .with_output(6, 4),
        );
        net.annotate_phases(&[1, 4, 1]);
        net.annotate_sim_time();
        net
    }

    #[test]
    fn every_actor_completes_its_firings() {
        let csdf = network_to_csdf(&phased_chain()).unwrap();
        csdf.check_consistency().unwrap();
        let buffers = build_naive_csdf_buffers(&csdf);
        let trace = simulate_asap(&csdf, &buffers, SimOptions::default()).unwrap();
        // 1 + 4 + 1 firings
        assert_eq!(trace.jobs.len(), 6);
        let schedule = trace.asap_schedule();
        assert_eq!(schedule[0].task, "a0");
        assert!(schedule[1..5].iter().all(|j| j.task == "a1"));
        assert_eq!(schedule[5].task, "a2");
    }

    #[test]
    fn trace_peak_matches_naive_size() {
        let csdf = network_to_csdf(&phased_chain()).unwrap();
        let buffers = build_naive_csdf_buffers(&csdf);
        let trace = simulate_asap(&csdf, &buffers, SimOptions::default()).unwrap();
        // the producer writes the whole input map before the reader starts
        assert_eq!(trace.max_stored_tokens("a0_a1"), 108);
        // the conv streams 4 x 48-token slices, drained only at the end
        assert_eq!(trace.max_stored_tokens("a1_a2"), 192);
    }

    #[test]
    fn starved_graph_fails_completion() {
        let mut csdf = crate::csdf::CsdfGraph::new("starved");
        csdf.add_actor("a0", "read", 1, 1.0);
        csdf.add_actor("a1", "conv", 1, 1.0);
        // consumer wants more than the producer ever writes
        csdf.add_channel(0, 1, vec![5], vec![10]);
        let buffers = build_naive_csdf_buffers(&csdf);
        let err = simulate_asap(&csdf, &buffers, SimOptions::default()).unwrap_err();
        assert!(err.to_string().contains("a1 fired 0/1"));
    }

    #[test]
    fn missing_backing_buffer_is_an_error() {
        let csdf = network_to_csdf(&phased_chain()).unwrap();
        let err = simulate_asap(&csdf, &[], SimOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no backing buffer"));
    }

    #[test]
    fn multiple_samples_multiply_firings() {
        let net = phased_chain();
        let csdf = network_to_csdf(&net).unwrap();
        let buffers = build_naive_csdf_buffers(&csdf);
        let opts = SimOptions {
            max_samples: 3,
            ..SimOptions::default()
        };
        let trace = simulate_asap(&csdf, &buffers, opts).unwrap();
        assert_eq!(trace.jobs.len(), 18);
    }

    #[test]
    fn jobs_serialize_on_first_processor() {
        // processors are released as soon as a job is recorded, so the
        // scan always lands on proc0 and jobs run back to back
        let csdf = network_to_csdf(&phased_chain()).unwrap();
        let buffers = build_naive_csdf_buffers(&csdf);
        let opts = SimOptions {
            proc_num: 2,
            ..SimOptions::default()
        };
        let trace = simulate_asap(&csdf, &buffers, opts).unwrap();
        assert!(trace.jobs.iter().all(|j| j.processor == "proc0"));
        let schedule = trace.asap_schedule();
        for pair in schedule.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }
}
