use std::convert::Infallible;

use super::Objective;

type CostFn = Box<dyn Fn(&[f64]) -> f64 + Send + Sync>;
type GradientFn = Box<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

/// An infallible objective built from closures.
pub struct FnObjective {
    cost: CostFn,
    gradient: Option<GradientFn>,
}

impl FnObjective {
    /// Creates an objective without gradient capability.
    pub fn new(cost: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            cost: Box::new(cost),
            gradient: None,
        }
    }

    /// Adds an analytic gradient.
    #[must_use]
    pub fn with_gradient(
        mut self,
        gradient: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        self.gradient = Some(Box::new(gradient));
        self
    }
}

impl std::fmt::Debug for FnObjective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnObjective")
            .field("has_gradient", &self.gradient.is_some())
            .finish_non_exhaustive()
    }
}

impl Objective for FnObjective {
    type Error = Infallible;

    fn cost(&self, params: &[f64]) -> Result<f64, Self::Error> {
        Ok((self.cost)(params))
    }

    fn has_gradient(&self) -> bool {
        self.gradient.is_some()
    }

    fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
        self.gradient.as_ref().map(|g| Ok(g(params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn forwards_cost_and_gradient() {
        let objective = FnObjective::new(|p| (p[0] - 3.0).powi(2))
            .with_gradient(|p| vec![2.0 * (p[0] - 3.0)]);

        assert!(objective.has_gradient());
        assert_relative_eq!(objective.cost(&[1.0]).unwrap(), 4.0);
        assert_eq!(objective.gradient(&[1.0]).unwrap().unwrap(), vec![-4.0]);
    }

    #[test]
    fn no_gradient_by_default() {
        let objective = FnObjective::new(|p| p[0]);

        assert!(!objective.has_gradient());
        assert!(objective.gradient(&[1.0]).is_none());
    }
}
