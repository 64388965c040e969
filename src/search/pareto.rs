//! Pareto-front bookkeeping over the two objectives: buffer size and
//! throughput loss.

use crate::search::Chromosome;

/// `a` dominates `b` when it is strictly better on both objectives.
pub fn dominates(a: &Chromosome, b: &Chromosome) -> bool {
    a.buf_size_mb < b.buf_size_mb && a.time_loss_ms < b.time_loss_ms
}

/// Whether `candidate` sits on the Pareto front of `points`.
pub fn is_pareto_point(candidate: &Chromosome, points: &[Chromosome]) -> bool {
    !points.iter().any(|other| dominates(other, candidate))
}

/// Non-dominated subset of `points`, with duplicate fitness pairs
/// collapsed to their first occurrence.
pub fn select_pareto(points: &[Chromosome]) -> Vec<Chromosome> {
    let mut front: Vec<Chromosome> = Vec::new();
    for point in points {
        if !is_pareto_point(point, points) {
            continue;
        }
        let seen = front
            .iter()
            .any(|p| p.buf_size_mb == point.buf_size_mb && p.time_loss_ms == point.time_loss_ms);
        if !seen {
            front.push(point.clone());
        }
    }
    front
}

/// Merge two fronts into the front of their union.
pub fn merge_pareto_fronts(a: &[Chromosome], b: &[Chromosome]) -> Vec<Chromosome> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    select_pareto(&all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(buf: f64, loss: f64) -> Chromosome {
        Chromosome {
            dp_by_parts: Vec::new(),
            buf_size_mb: buf,
            time_loss_ms: loss,
        }
    }

    #[test]
    fn strict_domination_on_both_axes() {
        assert!(dominates(&point(1.0, 1.0), &point(2.0, 2.0)));
        // equal on one axis is not domination
        assert!(!dominates(&point(1.0, 2.0), &point(2.0, 2.0)));
        assert!(!dominates(&point(1.0, 3.0), &point(2.0, 2.0)));
    }

    #[test]
    fn front_members_do_not_dominate_each_other() {
        let points = vec![point(1.0, 4.0), point(2.0, 3.0), point(3.0, 5.0), point(4.0, 1.0)];
        let front = select_pareto(&points);
        assert_eq!(front.len(), 3);
        for a in &front {
            for b in &front {
                assert!(!dominates(a, b));
            }
        }
        // (3.0, 5.0) is dominated by (2.0, 3.0)
        assert!(!front.iter().any(|p| p.buf_size_mb == 3.0));
    }

    #[test]
    fn duplicate_fitness_collapses() {
        let points = vec![point(1.0, 1.0), point(1.0, 1.0), point(1.0, 1.0)];
        assert_eq!(select_pareto(&points).len(), 1);
    }

    #[test]
    fn merging_fronts_reapplies_domination() {
        let a = vec![point(1.0, 4.0), point(4.0, 1.0)];
        let b = vec![point(0.5, 0.5)];
        let merged = merge_pareto_fronts(&a, &b);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].buf_size_mb, 0.5);
    }
}
