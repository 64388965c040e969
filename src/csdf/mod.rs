//! Cyclo-static dataflow (CSDF) model.
//!
//! An actor fires through a fixed cycle of phases; every channel carries a
//! production sequence (one rate per source phase) and a consumption
//! sequence (one rate per destination phase). A graph is consistent when
//! each channel produces exactly as many tokens per cycle as it consumes.

pub mod convert;

use crate::error::{Error, Result};

/// A CSDF actor: one per network layer, named `a{layer_id}`.
#[derive(Clone, Debug)]
pub struct CsdfActor {
    pub id: usize,
    pub name: String,
    /// Function executed at each firing, carried through to the schedule.
    pub function: String,
    pub phases: usize,
    /// Duration of one phase in simulated time units.
    pub time_per_phase: f64,
}

/// A token channel between two actors (possibly a self-loop).
#[derive(Clone, Debug)]
pub struct CsdfChannel {
    /// Also names the backing memory: `a{src}_a{dst}`.
    pub name: String,
    pub src: usize,
    pub dst: usize,
    /// Tokens written per source phase.
    pub prod: Vec<u64>,
    /// Tokens read per destination phase.
    pub cons: Vec<u64>,
}

impl CsdfChannel {
    pub fn tokens_per_cycle(&self) -> u64 {
        self.prod.iter().sum()
    }
}

#[derive(Clone, Debug, Default)]
pub struct CsdfGraph {
    pub name: String,
    pub actors: Vec<CsdfActor>,
    pub channels: Vec<CsdfChannel>,
}

impl CsdfGraph {
    pub fn new(name: &str) -> Self {
        CsdfGraph {
            name: name.to_string(),
            actors: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn add_actor(&mut self, name: &str, function: &str, phases: usize, time: f64) -> usize {
        let id = self.actors.len();
        self.actors.push(CsdfActor {
            id,
            name: name.to_string(),
            function: function.to_string(),
            phases,
            time_per_phase: time,
        });
        id
    }

    pub fn add_channel(&mut self, src: usize, dst: usize, prod: Vec<u64>, cons: Vec<u64>) {
        let name = format!("{}_{}", self.actors[src].name, self.actors[dst].name);
        self.channels.push(CsdfChannel {
            name,
            src,
            dst,
            prod,
            cons,
        });
    }

    pub fn find_actor_by_name(&self, name: &str) -> Option<&CsdfActor> {
        self.actors.iter().find(|a| a.name == name)
    }

    /// Input channels of an actor, self-loops included.
    pub fn input_channels(&self, actor: usize) -> Vec<&CsdfChannel> {
        self.channels.iter().filter(|c| c.dst == actor).collect()
    }

    pub fn output_channels(&self, actor: usize) -> Vec<&CsdfChannel> {
        self.channels.iter().filter(|c| c.src == actor).collect()
    }

    /// Verify rate balance and sequence lengths on every channel.
    pub fn check_consistency(&self) -> Result<()> {
        for ch in &self.channels {
            let src = &self.actors[ch.src];
            let dst = &self.actors[ch.dst];
            if ch.prod.len() != src.phases {
                return Err(Error::GraphConstruction(format!(
                    "channel {}: production sequence has {} entries, actor {} has {} phases",
                    ch.name,
                    ch.prod.len(),
                    src.name,
                    src.phases
                )));
            }
            if ch.cons.len() != dst.phases {
                return Err(Error::GraphConstruction(format!(
                    "channel {}: consumption sequence has {} entries, actor {} has {} phases",
                    ch.name,
                    ch.cons.len(),
                    dst.name,
                    dst.phases
                )));
            }
            let produced: u64 = ch.prod.iter().sum();
            let consumed: u64 = ch.cons.iter().sum();
            if produced != consumed {
                return Err(Error::GraphConstruction(format!(
                    "channel {}: produces {} tokens per cycle but consumes {}",
                    ch.name, produced, consumed
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_accepts_balanced_rates() {
        let mut g = CsdfGraph::new("g");
        g.add_actor("a0", "read", 1, 1.0);
        g.add_actor("a1", "conv", 4, 4.0);
        g.add_channel(0, 1, vec![108], vec![54, 18, 18, 18]);
        assert!(g.check_consistency().is_ok());
    }

    #[test]
    fn consistency_rejects_rate_mismatch() {
        let mut g = CsdfGraph::new("g");
        g.add_actor("a0", "read", 1, 1.0);
        g.add_actor("a1", "conv", 2, 2.0);
        g.add_channel(0, 1, vec![100], vec![60, 60]);
        let err = g.check_consistency().unwrap_err();
        assert!(err.to_string().contains("a0_a1"));
    }

    #[test]
    fn consistency_rejects_short_sequence() {
        let mut g = CsdfGraph::new("g");
        g.add_actor("a0", "read", 2, 1.0);
        g.add_actor("a1", "conv", 1, 1.0);
        g.add_channel(0, 1, vec![10], vec![10]);
        assert!(g.check_consistency().is_err());
    }
}
