use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::model::hedge::HedgeVector;
use crate::model::price_matrix::PriceMatrix;

const MODEL: &str = "lasso hedge";

#[derive(Debug, Clone, Copy)]
pub struct LassoSettings {
    /// L1 penalty on the (1 / 2n) squared-error scale.
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LassoFit {
    pub weights: Vec<f64>,
    pub iterations: usize,
    pub dual_gap: f64,
}

/// Non-negative Lasso without intercept:
/// minimize (1 / 2n) ||y - Xw||^2 + alpha ||w||_1 subject to w >= 0.
///
/// `columns[j][i]` is regressor `j` at observation `i`. Cyclic coordinate descent,
/// stopped by the duality gap once the largest weight update is small.
pub fn fit_positive_lasso(
    columns: &[Vec<f64>],
    y: &[f64],
    settings: LassoSettings,
) -> Result<LassoFit, PipelineError> {
    let n = y.len();
    if n == 0 || columns.is_empty() {
        return Err(PipelineError::model_fit(MODEL, "empty design matrix"));
    }
    if let Some(j) = columns.iter().position(|c| c.len() != n) {
        return Err(PipelineError::model_fit(
            MODEL,
            format!("regressor {} has {} rows, target has {}", j, columns[j].len(), n),
        ));
    }

    let l1_reg = settings.alpha * n as f64;
    let norm_cols: Vec<f64> = columns.iter().map(|c| dot(c, c)).collect();
    let tol_scaled = settings.tol * dot(y, y);

    let mut w = vec![0.0; columns.len()];
    let mut residual = y.to_vec();
    let mut gap = f64::INFINITY;

    for iter in 1..=settings.max_iter {
        let mut w_max: f64 = 0.0;
        let mut d_w_max: f64 = 0.0;

        for (j, col) in columns.iter().enumerate() {
            if norm_cols[j] == 0.0 {
                continue;
            }
            let w_old = w[j];
            if w_old != 0.0 {
                axpy(w_old, col, &mut residual);
            }
            let rho = dot(col, &residual);
            w[j] = if rho <= 0.0 {
                0.0
            } else {
                (rho - l1_reg).max(0.0) / norm_cols[j]
            };
            if w[j] != 0.0 {
                axpy(-w[j], col, &mut residual);
            }
            d_w_max = d_w_max.max((w[j] - w_old).abs());
            w_max = w_max.max(w[j].abs());
        }

        let small_step = w_max == 0.0 || d_w_max / w_max < settings.tol;
        if small_step || iter == settings.max_iter {
            gap = duality_gap(columns, y, &residual, &w, l1_reg);
            if gap < tol_scaled {
                return Ok(LassoFit {
                    weights: w,
                    iterations: iter,
                    dual_gap: gap,
                });
            }
        }
    }

    Err(PipelineError::model_fit(
        MODEL,
        format!(
            "no convergence after {} iterations (duality gap {:.3e}, tolerance {:.3e})",
            settings.max_iter, gap, tol_scaled
        ),
    ))
}

fn duality_gap(columns: &[Vec<f64>], y: &[f64], residual: &[f64], w: &[f64], l1_reg: f64) -> f64 {
    // Positive constraint: only the largest correlation bounds the dual.
    let dual_norm = columns
        .iter()
        .map(|c| dot(c, residual))
        .fold(f64::NEG_INFINITY, f64::max);
    let r_norm2 = dot(residual, residual);
    let (scale, mut gap) = if dual_norm > l1_reg {
        let scale = l1_reg / dual_norm;
        (scale, 0.5 * (r_norm2 + r_norm2 * scale * scale))
    } else {
        (1.0, r_norm2)
    };
    let l1_norm: f64 = w.iter().map(|v| v.abs()).sum();
    gap += l1_reg * l1_norm - scale * dot(residual, y);
    gap
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn axpy(a: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

/// Regress the future on the stock basket over the training window.
pub fn estimate_hedge(
    training: &PriceMatrix,
    settings: LassoSettings,
    fitted_on: NaiveDate,
) -> Result<HedgeVector, PipelineError> {
    let n_stocks = training.stock_columns().len();
    let columns: Vec<Vec<f64>> = (0..n_stocks)
        .map(|j| training.rows().iter().map(|row| row[j + 1]).collect())
        .collect();
    let target = training.future_values();

    let fit = fit_positive_lasso(&columns, &target, settings)?;
    if fit.weights.iter().all(|w| *w == 0.0) {
        return Err(PipelineError::model_fit(
            MODEL,
            format!(
                "all {} weights are zero at alpha {}; lower LASSO_alpha",
                n_stocks, settings.alpha
            ),
        ));
    }

    let hedge = HedgeVector::new(fitted_on, training.stock_columns().to_vec(), fit.weights)?;
    tracing::info!(
        candidates = hedge.len(),
        active = hedge.active_count(),
        iterations = fit.iterations,
        dual_gap = fit.dual_gap,
        "Fitted hedge portfolio"
    );
    Ok(hedge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(alpha: f64) -> LassoSettings {
        LassoSettings {
            alpha,
            max_iter: 10_000,
            tol: 1e-8,
        }
    }

    #[test]
    fn recovers_exact_non_negative_combination() {
        let x1: Vec<f64> = (0..60).map(|i| 10.0 + 3.0 * (i as f64 * 0.37).sin()).collect();
        let x2: Vec<f64> = (0..60).map(|i| 5.0 + 4.0 * (i as f64 * 0.23).cos()).collect();
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| 0.3 * a + 0.7 * b).collect();
        let tight = LassoSettings {
            tol: 1e-10,
            ..settings(0.0)
        };
        let fit = fit_positive_lasso(&[x1, x2], &y, tight).unwrap();
        assert!((fit.weights[0] - 0.3).abs() < 1e-2, "{:?}", fit.weights);
        assert!((fit.weights[1] - 0.7).abs() < 1e-2, "{:?}", fit.weights);
    }

    #[test]
    fn negative_relationship_is_clamped_to_zero() {
        let x1: Vec<f64> = (0..40).map(|i| 5.0 + i as f64 * 0.1).collect();
        let x2: Vec<f64> = (0..40).map(|i| 9.0 - i as f64 * 0.1).collect();
        let y: Vec<f64> = x1.clone();
        let fit = fit_positive_lasso(&[x1, x2], &y, settings(0.01)).unwrap();
        assert!(fit.weights.iter().all(|w| *w >= 0.0));
        assert!(fit.weights[0] > 0.5);
    }

    #[test]
    fn huge_penalty_is_degenerate() {
        let dates: Vec<NaiveDate> = (0..10)
            .map(|i| NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Days::new(i))
            .collect();
        let rows = (0..10).map(|i| vec![100.0 + i as f64, 10.0, 20.0]).collect();
        let matrix = PriceMatrix::new(
            dates,
            vec!["future".into(), "A".into(), "B".into()],
            rows,
        )
        .unwrap();
        let err = estimate_hedge(&matrix, settings(1e9), NaiveDate::MIN).unwrap_err();
        assert!(matches!(err, PipelineError::ModelFitFailure { .. }));
    }

    #[test]
    fn iteration_budget_is_enforced() {
        let x1: Vec<f64> = (0..50).map(|i| (i as f64).sin() + 3.0).collect();
        let x2: Vec<f64> = (0..50).map(|i| (i as f64 * 0.5).cos() + 3.0).collect();
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| a + b).collect();
        let tight = LassoSettings {
            alpha: 0.0,
            max_iter: 1,
            tol: 1e-12,
        };
        let err = fit_positive_lasso(&[x1, x2], &y, tight).unwrap_err();
        assert!(matches!(err, PipelineError::ModelFitFailure { .. }));
    }
}
