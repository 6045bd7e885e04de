//! Derivative-free minimisation (Nelder-Mead simplex)

use std::sync::atomic::{AtomicBool, Ordering};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Result of a minimisation
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct NelderMead {
    pub max_iterations: usize,
    /// Relative spread of objective values across the simplex at convergence
    pub tolerance: f64,
    pub initial_step: f64,
}

impl NelderMead {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            initial_step: 0.1,
        }
    }

    /// Minimise `objective` starting from `start`.
    ///
    /// The objective may return `f64::INFINITY` for infeasible points.
    /// `cancel` is polled once per iteration.
    pub fn minimize<F>(&self, mut objective: F, start: &[f64], cancel: Option<&AtomicBool>) -> Minimum
    where
        F: FnMut(&[f64]) -> f64,
    {
        let n = start.len();
        if n == 0 {
            let value = objective(start);
            return Minimum {
                point: Vec::new(),
                value,
                iterations: 0,
                converged: value.is_finite(),
                cancelled: false,
            };
        }

        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
        simplex.push(start.to_vec());
        for i in 0..n {
            let mut vertex = start.to_vec();
            vertex[i] += self.initial_step;
            simplex.push(vertex);
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| objective(v)).collect();

        let mut iterations = 0;
        let mut converged = false;
        let mut cancelled = false;

        loop {
            sort_simplex(&mut simplex, &mut values);
            let best = values[0];
            let worst = values[n];
            if best.is_finite() && worst.is_finite() {
                let spread = (worst - best).abs();
                let scale = best.abs() + worst.abs();
                if spread <= self.tolerance * scale + f64::MIN_POSITIVE {
                    converged = true;
                    break;
                }
            }
            if iterations >= self.max_iterations {
                break;
            }
            if cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false) {
                cancelled = true;
                break;
            }
            iterations += 1;

            let centroid: Vec<f64> = (0..n)
                .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
                .collect();
            let towards = |coef: f64, vertex: &[f64]| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(vertex)
                    .map(|(c, x)| c + coef * (x - c))
                    .collect()
            };

            let reflected = towards(-REFLECTION, &simplex[n]);
            let reflected_value = objective(&reflected);

            if reflected_value < values[0] {
                let expanded = towards(-REFLECTION * EXPANSION, &simplex[n]);
                let expanded_value = objective(&expanded);
                if expanded_value < reflected_value {
                    simplex[n] = expanded;
                    values[n] = expanded_value;
                } else {
                    simplex[n] = reflected;
                    values[n] = reflected_value;
                }
                continue;
            }
            if reflected_value < values[n - 1] {
                simplex[n] = reflected;
                values[n] = reflected_value;
                continue;
            }

            let (contracted, contracted_value) = if reflected_value < values[n] {
                let outside = towards(-REFLECTION * CONTRACTION, &simplex[n]);
                let value = objective(&outside);
                (outside, value)
            } else {
                let inside = towards(CONTRACTION, &simplex[n]);
                let value = objective(&inside);
                (inside, value)
            };
            if contracted_value < values[n].min(reflected_value) {
                simplex[n] = contracted;
                values[n] = contracted_value;
                continue;
            }

            let anchor = simplex[0].clone();
            for i in 1..=n {
                let shrunk: Vec<f64> = anchor
                    .iter()
                    .zip(&simplex[i])
                    .map(|(a, x)| a + SHRINK * (x - a))
                    .collect();
                values[i] = objective(&shrunk);
                simplex[i] = shrunk;
            }
        }

        Minimum {
            point: simplex.swap_remove(0),
            value: values[0],
            iterations,
            converged,
            cancelled,
        }
    }
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}
