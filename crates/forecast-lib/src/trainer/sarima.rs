//! Seasonal ARIMA estimation by conditional sum of squares
//!
//! The differenced series `w = (1-B)^d (1-B^s)^D y` is modelled as
//! `phi(B) Phi(B^s) (w - mu) = theta(B) Theta(B^s) e`, with `mu` the sample
//! mean of `w` for undifferenced models and zero otherwise. Residuals are
//! computed recursively from `p + s*P` onwards with pre-sample errors at zero.

use super::optimizer::NelderMead;
use super::polynomial::{
    apply, ar_factor, differencing, is_invertible, is_stationary, ma_factor, multiply,
};
use crate::models::{format_timestamp, ModelState, SarimaOrder, SarimaParams, TrainedModel};
use std::f64::consts::PI;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("series too short: {available} usable observations for {required} parameters")]
    TooShort { available: usize, required: usize },
    #[error("optimizer did not converge after {iterations} iterations")]
    NonConvergent { iterations: usize },
    #[error("fit cancelled")]
    Cancelled,
    #[error("degenerate fit: {0}")]
    Degenerate(String),
}

/// A converged candidate fit
#[derive(Debug, Clone, PartialEq)]
pub struct SarimaFit {
    pub order: SarimaOrder,
    pub params: SarimaParams,
    pub state: ModelState,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub iterations: usize,
    /// Residuals entering the likelihood
    pub observations: usize,
}

/// Point forecasts and forecast-error variances, one per step ahead
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

/// Coefficients in optimiser order: ar, seasonal ar, ma, seasonal ma
struct Coefficients<'a> {
    ar: &'a [f64],
    seasonal_ar: &'a [f64],
    ma: &'a [f64],
    seasonal_ma: &'a [f64],
}

impl<'a> Coefficients<'a> {
    fn split(order: &SarimaOrder, x: &'a [f64]) -> Self {
        let (ar, rest) = x.split_at(order.p);
        let (seasonal_ar, rest) = rest.split_at(order.seasonal_p);
        let (ma, seasonal_ma) = rest.split_at(order.q);
        Self {
            ar,
            seasonal_ar,
            ma,
            seasonal_ma,
        }
    }

    fn admissible(&self) -> bool {
        is_stationary(self.ar)
            && is_stationary(self.seasonal_ar)
            && is_invertible(self.ma)
            && is_invertible(self.seasonal_ma)
    }

    fn ar_polynomial(&self, period: usize) -> Vec<f64> {
        multiply(&ar_factor(self.ar, 1), &ar_factor(self.seasonal_ar, period))
    }

    fn ma_polynomial(&self, period: usize) -> Vec<f64> {
        multiply(&ma_factor(self.ma, 1), &ma_factor(self.seasonal_ma, period))
    }
}

/// Recursive CSS residuals of `x` (already demeaned), zero before `start`
fn residuals(ar: &[f64], ma: &[f64], x: &[f64], start: usize) -> (Vec<f64>, f64) {
    let mut e = vec![0.0; x.len()];
    let mut ssr = 0.0;
    for t in start..x.len() {
        let mut value: f64 = ar
            .iter()
            .enumerate()
            .take(t + 1)
            .map(|(i, a)| a * x[t - i])
            .sum();
        for (j, m) in ma.iter().enumerate().skip(1).take(t) {
            value -= m * e[t - j];
        }
        e[t] = value;
        ssr += value * value;
    }
    (e, ssr)
}

/// Last `len` values of `values`, left-padded with zeros when shorter
fn tail(values: &[f64], len: usize) -> Vec<f64> {
    if values.len() >= len {
        values[values.len() - len..].to_vec()
    } else {
        let mut out = vec![0.0; len - values.len()];
        out.extend_from_slice(values);
        out
    }
}

/// Fit one candidate order to the raw (undifferenced) series `y`
pub fn fit(order: &SarimaOrder, y: &[f64], options: &FitOptions) -> Result<SarimaFit, FitError> {
    let period = order.period;
    let diff = differencing(order.d, order.seasonal_d, period);
    let w = apply(&diff, y);
    let mu = if order.has_intercept() && !w.is_empty() {
        w.iter().sum::<f64>() / w.len() as f64
    } else {
        0.0
    };
    let x: Vec<f64> = w.iter().map(|v| v - mu).collect();

    let start = order.p + period * order.seasonal_p;
    let required = order.parameter_count();
    let available = x.len().saturating_sub(start);
    if available <= required + 1 {
        return Err(FitError::TooShort {
            available,
            required,
        });
    }

    let objective = |params: &[f64]| -> f64 {
        let coefficients = Coefficients::split(order, params);
        if !coefficients.admissible() {
            return f64::INFINITY;
        }
        let ar = coefficients.ar_polynomial(period);
        let ma = coefficients.ma_polynomial(period);
        let (_, ssr) = residuals(&ar, &ma, &x, start);
        if ssr.is_finite() {
            ssr / available as f64
        } else {
            f64::INFINITY
        }
    };

    let optimizer = NelderMead::new(options.max_iterations, options.tolerance);
    let minimum = optimizer.minimize(
        objective,
        &vec![0.0; order.coefficient_count()],
        options.cancel.as_deref(),
    );
    if minimum.cancelled {
        return Err(FitError::Cancelled);
    }
    if !minimum.converged {
        return Err(FitError::NonConvergent {
            iterations: minimum.iterations,
        });
    }

    let coefficients = Coefficients::split(order, &minimum.point);
    if !coefficients.admissible() {
        return Err(FitError::Degenerate(
            "coefficients outside the stationary/invertible region".to_string(),
        ));
    }
    let ar = coefficients.ar_polynomial(period);
    let ma = coefficients.ma_polynomial(period);
    let (e, ssr) = residuals(&ar, &ma, &x, start);

    let n = available as f64;
    let sigma2 = ssr / n;
    if !(sigma2.is_finite() && sigma2 > 0.0) {
        return Err(FitError::Degenerate(format!(
            "innovation variance {} is not positive",
            sigma2
        )));
    }
    let log_likelihood = -n / 2.0 * ((2.0 * PI * sigma2).ln() + 1.0);
    let k = required as f64;

    let integrated = multiply(&ar, &diff);
    let state = ModelState {
        y_tail: tail(y, integrated.len() - 1),
        residual_tail: tail(&e, ma.len() - 1),
    };
    let params = SarimaParams {
        ar: coefficients.ar.to_vec(),
        seasonal_ar: coefficients.seasonal_ar.to_vec(),
        ma: coefficients.ma.to_vec(),
        seasonal_ma: coefficients.seasonal_ma.to_vec(),
        intercept: mu,
        sigma2,
    };

    Ok(SarimaFit {
        order: *order,
        params,
        state,
        log_likelihood,
        aic: -2.0 * log_likelihood + 2.0 * k,
        bic: -2.0 * log_likelihood + k * n.ln(),
        iterations: minimum.iterations,
        observations: available,
    })
}

/// Recursive multi-step forecast from the stored state.
///
/// Future innovations are set to zero for the mean; the variance at step
/// `h` is `sigma2 * sum(psi_j^2, j < h)` from the psi-weights of the
/// integrated model.
pub fn project(
    order: &SarimaOrder,
    params: &SarimaParams,
    state: &ModelState,
    horizon: usize,
) -> Result<Projection, String> {
    if params.ar.len() != order.p
        || params.seasonal_ar.len() != order.seasonal_p
        || params.ma.len() != order.q
        || params.seasonal_ma.len() != order.seasonal_q
    {
        return Err(format!("coefficient counts do not match {}", order));
    }

    let period = order.period;
    let ar = multiply(
        &ar_factor(&params.ar, 1),
        &ar_factor(&params.seasonal_ar, period),
    );
    let ma = multiply(
        &ma_factor(&params.ma, 1),
        &ma_factor(&params.seasonal_ma, period),
    );
    let integrated = multiply(&ar, &differencing(order.d, order.seasonal_d, period));

    if state.y_tail.len() != integrated.len() - 1 || state.residual_tail.len() != ma.len() - 1 {
        return Err(format!(
            "state holds {} observations and {} residuals, model needs {} and {}",
            state.y_tail.len(),
            state.residual_tail.len(),
            integrated.len() - 1,
            ma.len() - 1
        ));
    }

    let constant = params.intercept * ar.iter().sum::<f64>();
    let mut y = state.y_tail.clone();
    let mut e = state.residual_tail.clone();
    let mut mean = Vec::with_capacity(horizon);
    for _ in 0..horizon {
        let mut value = constant;
        for (i, a) in integrated.iter().enumerate().skip(1) {
            value -= a * y[y.len() - i];
        }
        for (j, m) in ma.iter().enumerate().skip(1) {
            value += m * e[e.len() - j];
        }
        mean.push(value);
        y.push(value);
        e.push(0.0);
    }

    let mut psi = Vec::with_capacity(horizon);
    for j in 0..horizon {
        if j == 0 {
            psi.push(1.0);
            continue;
        }
        let mut value = ma.get(j).copied().unwrap_or(0.0);
        for (i, a) in integrated.iter().enumerate().skip(1).take(j) {
            value -= a * psi[j - i];
        }
        psi.push(value);
    }
    let mut cumulative = 0.0;
    let variance: Vec<f64> = psi
        .iter()
        .map(|p| {
            cumulative += p * p;
            params.sigma2 * cumulative
        })
        .collect();

    if mean.iter().chain(&variance).any(|v| !v.is_finite()) {
        return Err("projection produced non-finite values".to_string());
    }
    Ok(Projection { mean, variance })
}

/// Human-readable description of a trained model
pub struct ModelSummary<'a>(pub &'a TrainedModel);

impl fmt::Display for ModelSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        let period = model.order.period;
        writeln!(f, "SARIMA model summary")?;
        writeln!(f, "====================")?;
        writeln!(f, "metric:            {}", model.metric)?;
        writeln!(f, "version:           {}", model.version)?;
        writeln!(f, "run id:            {}", model.run_id)?;
        writeln!(f, "order:             {}", model.order)?;
        writeln!(
            f,
            "training window:   {} .. {} ({} observations, {}s interval)",
            format_timestamp(model.window.start),
            format_timestamp(model.window.end),
            model.window.observations,
            model.interval_secs
        )?;
        writeln!(f, "log likelihood:    {:.4}", model.log_likelihood)?;
        writeln!(f, "AIC:               {:.4}", model.aic)?;
        writeln!(f, "BIC:               {:.4}", model.bic)?;
        writeln!(f, "sigma2:            {:.6}", model.params.sigma2)?;
        if model.order.has_intercept() {
            writeln!(f, "intercept:         {:.6}", model.params.intercept)?;
        }
        writeln!(f, "coefficients:")?;
        let groups = [
            ("ar.L", &model.params.ar, 1),
            ("ar.S.L", &model.params.seasonal_ar, period),
            ("ma.L", &model.params.ma, 1),
            ("ma.S.L", &model.params.seasonal_ma, period),
        ];
        for (prefix, values, step) in groups {
            for (i, value) in values.iter().enumerate() {
                let name = format!("{}{}", prefix, (i + 1) * step);
                writeln!(f, "  {:<16} {:>12.6}", name, value)?;
            }
        }
        writeln!(
            f,
            "candidates:        {} evaluated, {} converged",
            model.candidates_evaluated, model.candidates_converged
        )
    }
}

pub fn summary(model: &TrainedModel) -> String {
    ModelSummary(model).to_string()
}
