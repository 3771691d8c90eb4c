use minrun_core::{EvalError, Objective};

use crate::bridge::Bridge;

/// Finite-difference scheme for objectives without an analytic gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Difference {
    /// `n + 1` evaluations, first-order accurate.
    Forward,

    /// `2 n` evaluations, second-order accurate.
    Central,
}

impl Difference {
    fn step(self, x: f64) -> f64 {
        let scale = x.abs().max(1.0);
        match self {
            Self::Forward => f64::EPSILON.sqrt() * scale,
            Self::Central => f64::EPSILON.cbrt() * scale,
        }
    }
}

/// Estimates the gradient at `x`, evaluating all displaced points in one
/// parallel batch.
///
/// `finitediff`'s `forward_diff` and `central_diff` call the cost closure one
/// point at a time, so they cannot hand the points to
/// [`CostFunctionAdapter::evaluate_batch`](minrun_core::CostFunctionAdapter::evaluate_batch).
/// Steps are `√ε` (forward) and `∛ε` (central), scaled by `max(|x|, 1)`.
pub(crate) fn numeric_gradient<O: Objective>(
    bridge: &Bridge<'_, O>,
    x: &[f64],
    difference: Difference,
) -> Result<Vec<f64>, EvalError<O::Error>> {
    let steps: Vec<f64> = x.iter().map(|&xi| difference.step(xi)).collect();
    let displaced = |i: usize, h: f64| {
        let mut point = x.to_vec();
        point[i] += h;
        point
    };

    match difference {
        Difference::Forward => {
            let mut points = Vec::with_capacity(x.len() + 1);
            points.push(x.to_vec());
            points.extend(steps.iter().enumerate().map(|(i, &h)| displaced(i, h)));

            let costs = bridge.costs_at(&points)?;
            let base = costs[0];
            Ok(costs[1..]
                .iter()
                .zip(&steps)
                .map(|(f, h)| (f - base) / h)
                .collect())
        }
        Difference::Central => {
            let points: Vec<_> = steps
                .iter()
                .enumerate()
                .flat_map(|(i, &h)| [displaced(i, h), displaced(i, -h)])
                .collect();

            let costs = bridge.costs_at(&points)?;
            Ok(costs
                .chunks_exact(2)
                .zip(&steps)
                .map(|(pair, h)| (pair[0] - pair[1]) / (2.0 * h))
                .collect())
        }
    }
}
