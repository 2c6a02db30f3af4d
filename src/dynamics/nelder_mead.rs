/// Derivative-free minimizer used for the volatility likelihood.
#[derive(Debug, Clone, Copy)]
pub struct NelderMeadConfig {
    pub max_iter: usize,
    /// Spread of objective values across the simplex, relative to the best value.
    pub f_tol: f64,
    /// Largest coordinate distance from the best vertex.
    pub x_tol: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iter: 5_000,
            f_tol: 1e-7,
            x_tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;
const FLAT_TOL: f64 = 1e-12;

/// Minimize `f` starting from `x0`. Non-finite objective values are treated as +inf.
pub fn minimize<F>(f: F, x0: &[f64], cfg: NelderMeadConfig) -> Minimum
where
    F: Fn(&[f64]) -> f64,
{
    let eval = |x: &[f64]| {
        let v = f(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };
    let n = x0.len();

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for i in 0..n {
        let mut v = x0.to_vec();
        v[i] = if v[i] != 0.0 { v[i] * 1.05 } else { 0.00025 };
        simplex.push(v);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();

    let mut iterations = 0;
    let mut converged = false;
    while iterations < cfg.max_iter {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let best = values[0];
        let f_spread = values.iter().map(|v| (v - best).abs()).fold(0.0, f64::max);
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let scale = 1.0 + best.abs();
        // A flat objective stops the search even while the simplex still spans a ridge.
        let flat = f_spread <= FLAT_TOL * scale;
        if best.is_finite() && f_spread <= cfg.f_tol * scale && (x_spread <= cfg.x_tol || flat) {
            converged = true;
            break;
        }
        iterations += 1;

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let worst = simplex[n].clone();
        let toward = |t: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| c + t * (w - c))
                .collect()
        };

        let reflected = toward(-REFLECT);
        let f_reflected = eval(&reflected);
        if f_reflected < values[0] {
            let expanded = toward(-EXPAND);
            let f_expanded = eval(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }
        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let c = toward(-CONTRACT);
            let fc = eval(&c);
            (c, fc)
        } else {
            let c = toward(CONTRACT);
            let fc = eval(&c);
            (c, fc)
        };
        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        let anchor = simplex[0].clone();
        for i in 1..=n {
            simplex[i] = anchor
                .iter()
                .zip(&simplex[i])
                .map(|(a, v)| a + SHRINK * (v - a))
                .collect();
            values[i] = eval(&simplex[i]);
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);
    Minimum {
        x: simplex[best].clone(),
        value: values[best],
        iterations,
        converged,
    }
}
