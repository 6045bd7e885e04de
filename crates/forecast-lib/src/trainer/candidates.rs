//! Ranking of fitted candidates

use crate::models::{FitStatus, ModelCandidate};
use std::cmp::Ordering;

/// Total order used for selection: AIC, then BIC, then parameter count,
/// then the order tuple itself so the outcome never depends on fit timing.
pub fn compare_candidates(a: &ModelCandidate, b: &ModelCandidate) -> Ordering {
    let score = |c: &ModelCandidate, s: Option<f64>| match c.status {
        FitStatus::Converged => s.unwrap_or(f64::INFINITY),
        _ => f64::INFINITY,
    };
    score(a, a.aic)
        .total_cmp(&score(b, b.aic))
        .then_with(|| score(a, a.bic).total_cmp(&score(b, b.bic)))
        .then_with(|| a.parameter_count().cmp(&b.parameter_count()))
        .then_with(|| a.order.cmp(&b.order))
}

/// Converged candidates, best first
pub fn rank_candidates(candidates: &[ModelCandidate]) -> Vec<&ModelCandidate> {
    let mut ranked: Vec<&ModelCandidate> = candidates
        .iter()
        .filter(|c| c.status == FitStatus::Converged && c.aic.is_some() && c.bic.is_some())
        .collect();
    ranked.sort_by(|a, b| compare_candidates(a, b));
    ranked
}

/// Best converged candidate, if any
pub fn select_best(candidates: &[ModelCandidate]) -> Option<&ModelCandidate> {
    rank_candidates(candidates).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SarimaOrder;

    fn scored(order: SarimaOrder, aic: f64, bic: f64) -> ModelCandidate {
        ModelCandidate {
            order,
            status: FitStatus::Converged,
            aic: Some(aic),
            bic: Some(bic),
            log_likelihood: Some(-aic / 2.0),
            iterations: 10,
            message: None,
        }
    }

    fn order(p: usize, q: usize, sp: usize) -> SarimaOrder {
        SarimaOrder::new((p, 0, q), (sp, 0, 0), 12)
    }

    #[test]
    fn test_lowest_aic_wins() {
        let candidates = vec![
            scored(order(1, 0, 0), 105.0, 100.0),
            scored(order(2, 0, 0), 101.0, 120.0),
            scored(order(0, 1, 0), 103.0, 90.0),
        ];
        assert_eq!(select_best(&candidates).unwrap().order, order(2, 0, 0));
    }

    #[test]
    fn test_aic_tie_broken_by_bic() {
        let candidates = vec![
            scored(order(1, 0, 0), 100.0, 110.0),
            scored(order(0, 1, 0), 100.0, 108.0),
        ];
        assert_eq!(select_best(&candidates).unwrap().order, order(0, 1, 0));
    }

    #[test]
    fn test_full_tie_prefers_fewer_parameters() {
        let candidates = vec![
            scored(order(2, 1, 1), 100.0, 110.0),
            scored(order(1, 0, 0), 100.0, 110.0),
            scored(order(1, 1, 0), 100.0, 110.0),
        ];
        assert_eq!(select_best(&candidates).unwrap().order, order(1, 0, 0));
    }

    #[test]
    fn test_unconverged_excluded() {
        let mut failed = scored(order(0, 0, 0), 1.0, 1.0);
        failed.status = FitStatus::NonConvergent;
        let mut rejected = scored(order(0, 0, 1), 2.0, 2.0);
        rejected.status = FitStatus::Rejected;
        let skipped = ModelCandidate::unfitted(order(2, 2, 1), FitStatus::Skipped, "timeout");

        let candidates = vec![failed, rejected, skipped, scored(order(1, 0, 0), 50.0, 55.0)];
        let ranked = rank_candidates(&candidates);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].order, order(1, 0, 0));
    }

    #[test]
    fn test_no_converged_candidates() {
        let candidates = vec![ModelCandidate::unfitted(
            order(1, 0, 0),
            FitStatus::NonConvergent,
            "did not converge",
        )];
        assert!(select_best(&candidates).is_none());
    }

    #[test]
    fn test_ranking_is_independent_of_input_order() {
        let mut candidates = vec![
            scored(order(1, 1, 0), 100.0, 110.0),
            scored(order(0, 2, 0), 100.0, 110.0),
            scored(order(2, 0, 0), 100.0, 110.0),
        ];
        let first = select_best(&candidates).unwrap().order;
        candidates.reverse();
        assert_eq!(select_best(&candidates).unwrap().order, first);
    }
}
