//! Genetic search over layer split flags, producing a Pareto front of
//! buffer size versus throughput loss.
//!
//! Each epoch keeps the best chromosomes by buffer size, breeds children
//! from consecutive pairs with a fixed-midpoint crossover, optionally
//! mutates, and folds the evaluated population into a front accumulated
//! across all epochs.

use rayon::prelude::*;

use crate::config::GaConfig;
use crate::error::{Error, Result};
use crate::search::pareto::{merge_pareto_fronts, select_pareto};
use crate::search::{Chromosome, FitnessEvaluator, Rng};

/// Outcome of a search run: the accumulated front plus the single best
/// chromosome by buffer size.
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub pareto: Vec<Chromosome>,
    pub best: Chromosome,
}

/// Single-point crossover at a fixed midpoint: the child takes the first
/// `split` flags of `a` and the rest of `b`. Fitness starts unset.
pub fn crossover(a: &Chromosome, b: &Chromosome, split: usize) -> Chromosome {
    let len = a.dp_by_parts.len();
    let split = split.min(len);
    let mut bits = Vec::with_capacity(len);
    bits.extend_from_slice(&a.dp_by_parts[..split]);
    bits.extend_from_slice(&b.dp_by_parts[split..]);
    Chromosome {
        dp_by_parts: bits,
        buf_size_mb: f64::INFINITY,
        time_loss_ms: f64::INFINITY,
    }
}

pub struct GaSearch {
    config: GaConfig,
    evaluator: FitnessEvaluator,
    rng: Rng,
    population: Vec<Chromosome>,
    pareto_front: Vec<Chromosome>,
    pool: rayon::ThreadPool,
}

impl GaSearch {
    pub fn new(evaluator: FitnessEvaluator, config: GaConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_workers)
            .build()
            .map_err(|e| Error::Config(format!("worker pool: {e}")))?;
        let rng = Rng::new(config.seed);
        Ok(GaSearch {
            config,
            evaluator,
            rng,
            population: Vec::new(),
            pareto_front: Vec::new(),
            pool,
        })
    }

    pub fn run(&mut self) -> Result<SearchResult> {
        self.init_population();
        self.evaluate_and_sort();
        self.update_pareto();

        let mut best = self.population[0].clone();
        let mut epoch = 0;
        let mut no_improvement = 0;
        let mut to_select = self.selection_count();

        while to_select > 0 && epoch < self.config.epochs {
            self.iteration(to_select);
            self.update_pareto();
            to_select = self.selection_count();
            epoch += 1;

            let current = &self.population[0];
            if self.config.verbose {
                eprintln!(
                    "epoch {epoch}: population {}, best {:.6} MB / {:.4} ms, front {}",
                    self.population.len(),
                    current.buf_size_mb,
                    current.time_loss_ms,
                    self.pareto_front.len()
                );
            }
            if current.buf_size_mb < best.buf_size_mb {
                best = current.clone();
                no_improvement = 0;
            } else {
                no_improvement += 1;
                if no_improvement >= self.config.max_no_improvement_epochs {
                    break;
                }
            }
        }

        Ok(SearchResult {
            pareto: self.pareto_front.clone(),
            best,
        })
    }

    fn init_population(&mut self) {
        let layers = self.evaluator.layers_num();
        self.population = (0..self.config.population_start_size)
            .map(|_| {
                let mut c = Chromosome::new(layers);
                c.init_random(self.config.dp_by_parts_init_probability, &mut self.rng);
                c
            })
            .collect();
    }

    /// Keep the `to_select` best, breed children from consecutive pairs,
    /// mutate, re-evaluate.
    fn iteration(&mut self, to_select: usize) {
        let midpoint = self.evaluator.layers_num() / 2;
        let mut offspring: Vec<Chromosome> =
            self.population[..to_select.min(self.population.len())].to_vec();
        let pairs = offspring.len() / 2;
        for i in 0..pairs {
            let child = crossover(&offspring[2 * i], &offspring[2 * i + 1], midpoint);
            offspring.push(child);
        }
        self.population = offspring;
        self.mutate_population();
        self.evaluate_and_sort();
    }

    /// One roll decides whether this iteration mutates at all; a hit flips
    /// one flag in each of a population share of chromosomes.
    fn mutate_population(&mut self) {
        if self.population.is_empty() || self.config.mutation_percent == 0 {
            return;
        }
        if self.rng.next_f64() >= self.config.mutation_probability {
            return;
        }
        let share =
            self.population.len() * self.config.mutation_percent as usize / 100;
        let touched = share.max(1);
        for _ in 0..touched {
            let i = self.rng.next_below(self.population.len());
            self.population[i].mutate(&mut self.rng);
        }
    }

    /// Evaluate every chromosome in parallel, then sort ascending by
    /// buffer size. A failed evaluation scores infinite on both axes and
    /// sorts last.
    fn evaluate_and_sort(&mut self) {
        let evaluator = &self.evaluator;
        let verbose = self.config.verbose;
        let fitness: Vec<(f64, f64)> = self.pool.install(|| {
            self.population
                .par_iter()
                .map(|c| match evaluator.evaluate(&c.dp_by_parts) {
                    Ok(scores) => scores,
                    Err(e) => {
                        if verbose {
                            eprintln!("evaluation failed: {e}");
                        }
                        (f64::INFINITY, f64::INFINITY)
                    }
                })
                .collect()
        });
        for (c, (buf, loss)) in self.population.iter_mut().zip(fitness) {
            c.buf_size_mb = buf;
            c.time_loss_ms = loss;
        }
        self.population
            .sort_by(|a, b| a.buf_size_mb.total_cmp(&b.buf_size_mb));
    }

    fn selection_count(&self) -> usize {
        self.population.len() * self.config.selection_percent as usize / 100
    }

    fn update_pareto(&mut self) {
        let epoch_front = select_pareto(&self.population);
        self.pareto_front = merge_pareto_fronts(&self.pareto_front, &epoch_front);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::pareto::dominates;

    fn front_is_consistent(front: &[Chromosome]) -> bool {
        front.iter().all(|a| !front.iter().any(|b| dominates(b, a)))
    }
    use crate::graph::{Layer, Network, Op};

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

    fn test_config() -> GaConfig {
        GaConfig {
            epochs: 3,
            population_start_size: 8,
            selection_percent: 50,
            mutation_probability: 1.0,
            mutation_percent: 25,
            seed: 7,
            verbose: false,
            ..GaConfig::default()
        }
    }

    #[test]
    fn crossover_splits_at_midpoint() {
        let a = Chromosome {
            dp_by_parts: vec![true, true, true, true],
            buf_size_mb: 1.0,
            time_loss_ms: 1.0,
        };
        let b = Chromosome {
            dp_by_parts: vec![false, false, false, false],
            buf_size_mb: 2.0,
            time_loss_ms: 2.0,
        };
        let child = crossover(&a, &b, 2);
        assert_eq!(child.dp_by_parts, vec![true, true, false, false]);
        assert!(child.buf_size_mb.is_infinite());
    }

    #[test]
    fn search_is_deterministic_for_a_seed() {
        let run = || {
            let evaluator = FitnessEvaluator::new(vec![vec![small_net("m0")]], 4);
            let mut ga = GaSearch::new(evaluator, test_config()).unwrap();
            ga.run().unwrap()
        };
        let first = run();
        let second = run();
        let key = |r: &SearchResult| {
            r.pareto
                .iter()
                .map(|c| (c.buf_size_mb, c.time_loss_ms, c.dp_by_parts.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&first), key(&second));
        assert_eq!(first.best.buf_size_mb, second.best.buf_size_mb);
    }

    #[test]
    fn front_is_mutually_non_dominated() {
        let evaluator = FitnessEvaluator::new(vec![vec![small_net("m0")]], 4);
        let mut ga = GaSearch::new(evaluator, test_config()).unwrap();
        let result = ga.run().unwrap();
        assert!(!result.pareto.is_empty());
        assert!(front_is_consistent(&result.pareto));
        assert!(result.best.buf_size_mb.is_finite());
    }

    #[test]
    fn zero_mutation_percent_never_flips_bits() {
        let evaluator = FitnessEvaluator::new(vec![vec![small_net("m0")]], 4);
        let config = GaConfig {
            mutation_probability: 1.0,
            mutation_percent: 0,
            verbose: false,
            ..GaConfig::default()
        };
        let mut ga = GaSearch::new(evaluator, config).unwrap();
        ga.population = vec![Chromosome::new(3); 4];
        ga.mutate_population();
        assert!(ga.population.iter().all(|c| c.split_layer_count() == 0));
    }

    #[test]
    fn failed_evaluation_scores_worst_and_stays_off_the_front() {
        // splitting the elementwise add gives it more phases than its ragged
        // inputs can feed, so the converted graph fails the consistency check
        let mut net = Network::new("ragged");
        net.add_layer(Layer::new(Op::Conv, "a", 8, 3, 3, 4).with_output(8, 5));
        net.add_layer(Layer::new(Op::Conv, "b", 8, 3, 3, 4).with_output(8, 5));
        net.add_layer(Layer::new(Op::Arithmetic, "add", 8, 1, 4, 4).with_subop("add"));
        net.connect(0, 2).unwrap();
        net.connect(1, 2).unwrap();

        let evaluator = FitnessEvaluator::new(vec![vec![net]], 4);
        assert!(evaluator.evaluate(&[false, false, true]).is_err());

        let config = GaConfig {
            verbose: false,
            ..GaConfig::default()
        };
        let mut ga = GaSearch::new(evaluator, config).unwrap();
        let mut infeasible = Chromosome::new(3);
        infeasible.dp_by_parts[2] = true;
        ga.population = vec![Chromosome::new(3), infeasible];
        ga.evaluate_and_sort();
        ga.update_pareto();

        // the feasible chromosome sorts first, the failed one scores
        // worst-case on both axes and the epoch carries on
        assert!(ga.population[0].buf_size_mb.is_finite());
        assert!(ga.population[1].buf_size_mb.is_infinite());
        assert!(ga.population[1].time_loss_ms.is_infinite());
        assert_eq!(ga.pareto_front.len(), 1);
        assert!(ga.pareto_front[0].buf_size_mb.is_finite());
        assert!(!ga.pareto_front[0].dp_by_parts[2]);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let evaluator = FitnessEvaluator::new(vec![vec![small_net("m0")]], 4);
        let config = GaConfig {
            selection_percent: 200,
            ..GaConfig::default()
        };
        assert!(GaSearch::new(evaluator, config).is_err());
    }
}
