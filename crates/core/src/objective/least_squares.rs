use std::convert::Infallible;

use thiserror::Error;

use super::Objective;

type ModelFn = Box<dyn Fn(f64, &[f64]) -> f64 + Send + Sync>;
type ModelGradientFn = Box<dyn Fn(f64, &[f64]) -> Vec<f64> + Send + Sync>;

/// Errors that can occur when constructing a [`LeastSquares`] objective.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LeastSquaresError {
    #[error("x, y and y_error must have the same length (got {x}, {y} and {y_error})")]
    LengthMismatch { x: usize, y: usize, y_error: usize },

    #[error("y_error[{index}] must be finite and positive, got {value}")]
    InvalidYError { index: usize, value: f64 },

    #[error("sigma level must be finite and positive, got {0}")]
    InvalidSigmaLevel(f64),
}

/// Uncertainty of the `y` data.
#[derive(Debug, Clone, PartialEq)]
enum YError {
    PerPoint(Vec<f64>),
    Uniform(f64),

    /// Residuals are unweighted and the error definition is scaled after a
    /// fit instead.
    Unknown,
}

impl YError {
    fn at(&self, i: usize) -> f64 {
        match self {
            Self::PerPoint(errors) => errors[i],
            Self::Uniform(error) => *error,
            Self::Unknown => 1.0,
        }
    }
}

/// Residual sum of squares for a scalar model `y = model(x, p)`.
///
/// The cost is `Σ ((yᵢ - model(xᵢ, p)) / σᵢ)²`. Its error definition is the
/// square of the requested sigma level, so `1.0` yields 1σ uncertainties and
/// `2.0` yields 2σ uncertainties.
///
/// When the `y` uncertainties are unknown ([`LeastSquares::unweighted`]),
/// every `σᵢ` is one and [`Objective::adjust_error_definition`] rescales the
/// error definition by the reduced chi-square at a fitted point. Parameter
/// uncertainties computed afterwards match those of a fit with ideal `y`
/// errors.
pub struct LeastSquares {
    x: Vec<f64>,
    y: Vec<f64>,
    y_error: YError,
    model: ModelFn,
    model_gradient: Option<ModelGradientFn>,
    sigma_level: f64,
    scaling: f64,
}

impl LeastSquares {
    /// Creates a least squares objective with one `y` uncertainty per point.
    ///
    /// # Errors
    ///
    /// Returns an error if the data lengths differ or any `y_error` is not
    /// finite and positive.
    pub fn new(
        x: Vec<f64>,
        y: Vec<f64>,
        y_error: Vec<f64>,
        model: impl Fn(f64, &[f64]) -> f64 + Send + Sync + 'static,
    ) -> Result<Self, LeastSquaresError> {
        if x.len() != y.len() || x.len() != y_error.len() {
            return Err(LeastSquaresError::LengthMismatch {
                x: x.len(),
                y: y.len(),
                y_error: y_error.len(),
            });
        }

        if let Some((index, &value)) = y_error
            .iter()
            .enumerate()
            .find(|&(_, &e)| !is_valid_error(e))
        {
            return Err(LeastSquaresError::InvalidYError { index, value });
        }

        Ok(Self::build(x, y, YError::PerPoint(y_error), model))
    }

    /// Creates a least squares objective where every point shares the same
    /// `y` uncertainty.
    ///
    /// # Errors
    ///
    /// Returns an error if the data lengths differ or `y_error` is not finite
    /// and positive.
    pub fn uniform(
        x: Vec<f64>,
        y: Vec<f64>,
        y_error: f64,
        model: impl Fn(f64, &[f64]) -> f64 + Send + Sync + 'static,
    ) -> Result<Self, LeastSquaresError> {
        check_lengths(&x, &y)?;
        if !is_valid_error(y_error) {
            return Err(LeastSquaresError::InvalidYError {
                index: 0,
                value: y_error,
            });
        }

        Ok(Self::build(x, y, YError::Uniform(y_error), model))
    }

    /// Creates a least squares objective for data without known `y`
    /// uncertainties.
    ///
    /// # Errors
    ///
    /// Returns an error if the data lengths differ.
    pub fn unweighted(
        x: Vec<f64>,
        y: Vec<f64>,
        model: impl Fn(f64, &[f64]) -> f64 + Send + Sync + 'static,
    ) -> Result<Self, LeastSquaresError> {
        check_lengths(&x, &y)?;
        Ok(Self::build(x, y, YError::Unknown, model))
    }

    fn build(
        x: Vec<f64>,
        y: Vec<f64>,
        y_error: YError,
        model: impl Fn(f64, &[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            x,
            y,
            y_error,
            model: Box::new(model),
            model_gradient: None,
            sigma_level: 1.0,
            scaling: 1.0,
        }
    }

    /// Adds the model's analytic gradient with respect to the parameters.
    #[must_use]
    pub fn with_model_gradient(
        mut self,
        gradient: impl Fn(f64, &[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        self.model_gradient = Some(Box::new(gradient));
        self
    }

    /// Sets the sigma level used for the error definition.
    ///
    /// # Errors
    ///
    /// Returns an error if `sigma_level` is not finite and positive.
    pub fn with_sigma_level(mut self, sigma_level: f64) -> Result<Self, LeastSquaresError> {
        if !is_valid_error(sigma_level) {
            return Err(LeastSquaresError::InvalidSigmaLevel(sigma_level));
        }
        self.sigma_level = sigma_level;
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    fn residual(&self, i: usize, params: &[f64]) -> f64 {
        (self.y[i] - (self.model)(self.x[i], params)) / self.y_error.at(i)
    }

    fn chi_square(&self, params: &[f64]) -> f64 {
        (0..self.x.len())
            .map(|i| self.residual(i, params).powi(2))
            .sum()
    }
}

fn is_valid_error(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn check_lengths(x: &[f64], y: &[f64]) -> Result<(), LeastSquaresError> {
    if x.len() == y.len() {
        Ok(())
    } else {
        Err(LeastSquaresError::LengthMismatch {
            x: x.len(),
            y: y.len(),
            y_error: x.len(),
        })
    }
}

impl std::fmt::Debug for LeastSquares {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeastSquares")
            .field("points", &self.x.len())
            .field("has_gradient", &self.model_gradient.is_some())
            .field("error_definition", &self.error_definition())
            .finish_non_exhaustive()
    }
}

impl Objective for LeastSquares {
    type Error = Infallible;

    fn cost(&self, params: &[f64]) -> Result<f64, Self::Error> {
        Ok(self.chi_square(params))
    }

    fn has_gradient(&self) -> bool {
        self.model_gradient.is_some()
    }

    fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
        let model_gradient = self.model_gradient.as_ref()?;

        let mut gradient = vec![0.0; params.len()];
        for i in 0..self.x.len() {
            let factor = 2.0 * self.residual(i, params) / self.y_error.at(i);
            for (g, dm) in gradient.iter_mut().zip(model_gradient(self.x[i], params)) {
                *g -= factor * dm;
            }
        }
        Some(Ok(gradient))
    }

    fn error_definition(&self) -> f64 {
        self.sigma_level * self.sigma_level * self.scaling
    }

    fn adjust_error_definition(
        &mut self,
        params: &[f64],
        variables: &[usize],
    ) -> Result<(), Self::Error> {
        if self.y_error != YError::Unknown {
            return Ok(());
        }

        let Some(dof) = self.x.len().checked_sub(variables.len()).filter(|&d| d > 0) else {
            tracing::warn!(
                points = self.x.len(),
                variables = variables.len(),
                "no degrees of freedom left, keeping the error definition"
            );
            return Ok(());
        };

        #[allow(clippy::cast_precision_loss)]
        let reduced = self.chi_square(params) / dof as f64;
        if reduced.is_finite() && reduced > 0.0 {
            self.scaling = reduced;
        }
        tracing::debug!(reduced_chi_square = reduced, "rescaled error definition");
        Ok(())
    }
}
