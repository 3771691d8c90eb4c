use std::cell::RefCell;

use finitediff::FiniteDiff;
use minrun_core::{
    CostFunctionAdapter, Engine, EngineError, EvalError, Objective, Optimum, ParameterState,
};
use nalgebra::DMatrix;

use crate::{
    bridge::{Bridge, Counts},
    error::Error,
    gradient::Difference,
};

/// Parameter covariance from the second derivatives at the current point.
///
/// The Hessian `H` of the cost with respect to the variable parameters is
/// estimated by central differences (of the gradient when the objective has
/// one, of the cost otherwise). The covariance is `2 · up · H⁻¹`. For
/// limited parameters `H` is taken in internal coordinates and the
/// covariance is carried back through the slope of each transformation.
///
/// Hesse does not move the parameters, so it is normally run on the state
/// of a previous optimum, see [`Optimum::to_state`]. The budget and
/// tolerance are not used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hesse;

impl Engine for Hesse {
    fn name(&self) -> &'static str {
        "hesse"
    }

    fn run_once<O: Objective>(
        &self,
        adapter: &CostFunctionAdapter<O>,
        state: &ParameterState,
        _budget: u64,
        _tolerance: f64,
    ) -> Result<Optimum, EngineError> {
        if state.variable_count() == 0 {
            return Err(Error::NoVariables.into());
        }

        let counts = Counts::default();
        let bridge = Bridge::new(adapter, state, Difference::Central, &counts);
        let x = state.internal_values();

        let cost = bridge.cost_at(&x).map_err(EvalError::into_boxed)?;
        let hessian = hessian(&bridge, &x, adapter.has_gradient()).map_err(EvalError::into_boxed)?;
        if hessian.iter().any(|v| !v.is_finite()) {
            return Err(Error::SingularHessian.into());
        }
        let hessian = (&hessian + hessian.transpose()) * 0.5;
        let inverse = hessian.try_inverse().ok_or(Error::SingularHessian)?;

        // Back to external coordinates: scale by d external / d internal.
        let slopes = state.external_slopes(&x);
        let scale = 2.0 * adapter.up();
        let n = state.len();
        let mut covariance = vec![vec![0.0; n]; n];
        for (a, &i) in state.variable_indices().iter().enumerate() {
            for (b, &j) in state.variable_indices().iter().enumerate() {
                covariance[i][j] = scale * inverse[(a, b)] * slopes[a] * slopes[b];
            }
        }

        for &i in state.variable_indices() {
            let variance = covariance[i][i];
            if !(variance.is_finite() && variance > 0.0) {
                return Err(Error::NotPositiveDefinite {
                    name: state.params()[i].name.clone(),
                    variance,
                }
                .into());
            }
        }

        tracing::debug!(cost, evaluations = counts.cost(), "hessian estimated");

        Ok(Optimum {
            params: state.values(),
            cost,
            covariance: Some(covariance),
            cost_calls: counts.cost(),
            gradient_calls: counts.gradient(),
            iters: 1,
            has_converged: true,
            has_reached_call_limit: false,
            is_valid: true,
        })
    }
}

/// Central-difference Hessian at `x` with respect to the variable parameters.
fn hessian<O: Objective>(
    bridge: &Bridge<'_, O>,
    x: &[f64],
    use_gradient: bool,
) -> Result<DMatrix<f64>, EvalError<O::Error>> {
    if use_gradient {
        from_gradient(bridge, x)
    } else {
        from_costs(bridge, x)
    }
}

/// Differentiates the gradient, carrying the first evaluation error out of
/// the closure.
///
/// The closure must return plain numbers, so a failed evaluation is parked
/// in `failure` and reported as NaN. Once something failed, the remaining
/// evaluations are skipped.
fn from_gradient<O: Objective>(
    bridge: &Bridge<'_, O>,
    x: &[f64],
) -> Result<DMatrix<f64>, EvalError<O::Error>> {
    let failure: RefCell<Option<EvalError<O::Error>>> = RefCell::new(None);

    let gradient = |p: &Vec<f64>| -> Vec<f64> {
        if failure.borrow().is_some() {
            return vec![f64::NAN; p.len()];
        }
        bridge.gradient_at(p).unwrap_or_else(|err| {
            failure.borrow_mut().get_or_insert(err);
            vec![f64::NAN; p.len()]
        })
    };
    let hessian = x.to_vec().central_hessian(&gradient);

    match failure.into_inner() {
        Some(err) => Err(err),
        None => Ok(DMatrix::from_fn(x.len(), x.len(), |i, j| hessian[i][j])),
    }
}

/// Second differences of the cost, with every displaced point evaluated in
/// one parallel batch.
fn from_costs<O: Objective>(
    bridge: &Bridge<'_, O>,
    x: &[f64],
) -> Result<DMatrix<f64>, EvalError<O::Error>> {
    let n = x.len();
    let h: Vec<f64> = x
        .iter()
        .map(|xi| f64::EPSILON.powf(0.25) * xi.abs().max(1.0))
        .collect();
    let displaced = |moves: &[(usize, f64)]| {
        let mut point = x.to_vec();
        for &(i, sign) in moves {
            point[i] += sign * h[i];
        }
        point
    };

    // Layout: x, then x ± h_i per i, then the four corners per pair i < j.
    let mut points = vec![x.to_vec()];
    for i in 0..n {
        points.push(displaced(&[(i, 1.0)]));
        points.push(displaced(&[(i, -1.0)]));
    }
    for i in 0..n {
        for j in (i + 1)..n {
            for (si, sj) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
                points.push(displaced(&[(i, si), (j, sj)]));
            }
        }
    }

    let f = bridge.costs_at(&points)?;
    let center = f[0];
    let mut hessian = DMatrix::zeros(n, n);
    for i in 0..n {
        let (plus, minus) = (f[1 + 2 * i], f[2 + 2 * i]);
        hessian[(i, i)] = (plus - 2.0 * center + minus) / (h[i] * h[i]);
    }

    let mut corners = f[1 + 2 * n..].chunks_exact(4);
    for i in 0..n {
        for j in (i + 1)..n {
            if let Some(&[pp, pm, mp, mm]) = corners.next() {
                let value = (pp - pm - mp + mm) / (4.0 * h[i] * h[j]);
                hessian[(i, j)] = value;
                hessian[(j, i)] = value;
            }
        }
    }

    Ok(hessian)
}
