use std::collections::HashSet;

use thiserror::Error;

/// Default initial step size for a variable parameter.
pub const DEFAULT_STEP: f64 = 0.1;

/// A named minimization parameter.
///
/// A variable parameter may carry a lower limit, an upper limit, or both.
/// Engines never see limited values directly: they work on an unbounded
/// internal coordinate that [`ParameterState`] maps back into the allowed
/// range before every evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub step: f64,
    pub fixed: bool,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Parameter {
    /// A variable parameter with the default step size.
    pub fn variable(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            step: DEFAULT_STEP,
            fixed: false,
            lower: None,
            upper: None,
        }
    }

    /// A parameter held at `value` during minimization.
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self {
            fixed: true,
            ..Self::variable(name, value)
        }
    }

    /// Sets the initial step size.
    #[must_use]
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Restricts the value to `lower < value < upper`.
    ///
    /// An infinite limit means no limit on that side.
    #[must_use]
    pub fn with_limits(self, lower: f64, upper: f64) -> Self {
        self.with_lower_limit(lower).with_upper_limit(upper)
    }

    #[must_use]
    pub fn with_lower_limit(mut self, lower: f64) -> Self {
        self.lower = (lower != f64::NEG_INFINITY).then_some(lower);
        self
    }

    #[must_use]
    pub fn with_upper_limit(mut self, upper: f64) -> Self {
        self.upper = (upper != f64::INFINITY).then_some(upper);
        self
    }

    fn bounds(&self) -> Bounds {
        match (self.lower, self.upper) {
            (None, None) => Bounds::Open,
            (Some(lower), None) => Bounds::Lower(lower),
            (None, Some(upper)) => Bounds::Upper(upper),
            (Some(lower), Some(upper)) => Bounds::Both(lower, upper),
        }
    }

    fn check_limits(&self, strict: bool) -> Result<(), StateError> {
        let outside = || StateError::OutsideLimits {
            name: self.name.clone(),
            value: self.value,
            lower: self.lower,
            upper: self.upper,
        };

        if self.lower.is_some_and(f64::is_nan) || self.upper.is_some_and(f64::is_nan) {
            return Err(outside());
        }
        if let Some(lower) = self.lower {
            if self.value < lower || (strict && self.value == lower) {
                return Err(outside());
            }
        }
        if let Some(upper) = self.upper {
            if self.value > upper || (strict && self.value == upper) {
                return Err(outside());
            }
        }
        Ok(())
    }

    /// Rejects limits so tight, relative to the value, that mapping nearby
    /// values into the internal coordinate and back loses precision.
    fn check_projection(&self) -> Result<(), StateError> {
        const OFFSET: f64 = 0.1;
        const TOLERANCE: f64 = 0.001;

        let bounds = self.bounds();
        if bounds == Bounds::Open {
            return Ok(());
        }

        let trials = if self.value == 0.0 {
            [-OFFSET, OFFSET]
        } else {
            [(1.0 - OFFSET) * self.value, (1.0 + OFFSET) * self.value]
        };
        for value in trials {
            let round_trip = bounds.to_external(bounds.to_internal(value));
            if ((value - round_trip) / value).abs() > TOLERANCE {
                return Err(StateError::UnstableLimits {
                    name: self.name.clone(),
                    value: self.value,
                });
            }
        }
        Ok(())
    }
}

/// The internal-to-external transformation of one parameter.
///
/// Double-sided limits use `sin`, single-sided ones `sqrt`, so any real
/// internal value maps into the allowed range.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Bounds {
    Open,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
}

impl Bounds {
    fn to_internal(self, value: f64) -> f64 {
        match self {
            Self::Open => value,
            Self::Lower(lower) => ((value - lower + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            Self::Upper(upper) => ((upper - value + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            Self::Both(lower, upper) => {
                (2.0 * (value - lower) / (upper - lower) - 1.0)
                    .clamp(-1.0, 1.0)
                    .asin()
            }
        }
    }

    fn to_external(self, internal: f64) -> f64 {
        match self {
            Self::Open => internal,
            Self::Lower(lower) => lower - 1.0 + internal.hypot(1.0),
            Self::Upper(upper) => upper + 1.0 - internal.hypot(1.0),
            Self::Both(lower, upper) => lower + 0.5 * (upper - lower) * (internal.sin() + 1.0),
        }
    }

    /// `d external / d internal` at `internal`.
    fn derivative(self, internal: f64) -> f64 {
        match self {
            Self::Open => 1.0,
            Self::Lower(_) => internal / internal.hypot(1.0),
            Self::Upper(_) => -internal / internal.hypot(1.0),
            Self::Both(lower, upper) => 0.5 * (upper - lower) * internal.cos(),
        }
    }
}

/// Errors that can occur when building a [`ParameterState`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("parameter '{0}' is defined more than once")]
    DuplicateName(String),

    #[error("value of parameter '{name}' must be finite, got {value}")]
    NonFiniteValue { name: String, value: f64 },

    #[error("step of parameter '{name}' must be finite and positive, got {step}")]
    InvalidStep { name: String, step: f64 },

    #[error(
        "value of parameter '{name}' ({value}) must lie strictly between its limits ({lower:?}, {upper:?})"
    )]
    OutsideLimits {
        name: String,
        value: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    },

    #[error(
        "limits of parameter '{name}' are too narrow for its value ({value}) to be mapped reliably"
    )]
    UnstableLimits { name: String, value: f64 },

    #[error("expected {expected} parameter value(s), got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Ordered parameter set handed to an engine as its starting point.
///
/// Engines minimize over the variable parameters only, in internal
/// coordinates, and map candidates back to the full external vector with
/// [`ParameterState::external`] before calling the adapter. Internal and
/// external values coincide for parameters without limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState {
    params: Vec<Parameter>,
    variables: Vec<usize>,
}

impl ParameterState {
    /// Creates a validated parameter state.
    ///
    /// # Errors
    ///
    /// Returns an error if names repeat, a value is not finite or not
    /// strictly inside its limits, or a step is not finite and positive.
    pub fn new(params: impl IntoIterator<Item = Parameter>) -> Result<Self, StateError> {
        Self::build(params.into_iter().collect(), true)
    }

    /// Creates unnamed variable parameters (`p0`, `p1`, ...) from values.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is not finite.
    pub fn from_values(values: &[f64]) -> Result<Self, StateError> {
        Self::new(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| Parameter::variable(format!("p{i}"), v)),
        )
    }

    /// Returns a copy with values replaced, keeping names, steps, flags, and
    /// limits.
    ///
    /// A minimum can sit exactly on a limit, so values equal to a limit are
    /// accepted here.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of values differs, any is not finite,
    /// or any lies beyond its limits.
    pub fn with_values(&self, values: &[f64]) -> Result<Self, StateError> {
        if values.len() != self.params.len() {
            return Err(StateError::LengthMismatch {
                expected: self.params.len(),
                actual: values.len(),
            });
        }
        let params = self
            .params
            .iter()
            .zip(values)
            .map(|(p, &value)| Parameter { value, ..p.clone() })
            .collect();
        Self::build(params, false)
    }

    fn build(params: Vec<Parameter>, strict: bool) -> Result<Self, StateError> {
        let mut seen = HashSet::new();
        for p in &params {
            if !seen.insert(p.name.as_str()) {
                return Err(StateError::DuplicateName(p.name.clone()));
            }
            if !p.value.is_finite() {
                return Err(StateError::NonFiniteValue {
                    name: p.name.clone(),
                    value: p.value,
                });
            }
            if !p.step.is_finite() || p.step <= 0.0 {
                return Err(StateError::InvalidStep {
                    name: p.name.clone(),
                    step: p.step,
                });
            }
            p.check_limits(strict)?;
            if strict && !p.fixed {
                p.check_projection()?;
            }
        }

        let variables = params
            .iter()
            .enumerate()
            .filter_map(|(i, p)| (!p.fixed).then_some(i))
            .collect();

        Ok(Self { params, variables })
    }

    #[must_use]
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameter names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    /// Number of variable parameters.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// External indices of the variable parameters, in order.
    #[must_use]
    pub fn variable_indices(&self) -> &[usize] {
        &self.variables
    }

    /// Full external value vector.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    /// Internal coordinates of the variable parameters.
    #[must_use]
    pub fn internal_values(&self) -> Vec<f64> {
        self.variable_params()
            .map(|p| p.bounds().to_internal(p.value))
            .collect()
    }

    /// Step sizes of the variable parameters, in internal coordinates.
    ///
    /// A limited parameter's step is divided by the slope of its
    /// transformation at the current value. For double-sided limits the
    /// result is capped at one radian.
    #[must_use]
    pub fn internal_steps(&self) -> Vec<f64> {
        self.variable_params()
            .map(|p| {
                let bounds = p.bounds();
                let slope = bounds.derivative(bounds.to_internal(p.value)).abs();
                match bounds {
                    Bounds::Open => p.step,
                    _ if slope == 0.0 => p.step,
                    Bounds::Both(..) => (p.step / slope).min(1.0),
                    _ => p.step / slope,
                }
            })
            .collect()
    }

    /// Maps an internal (variable-only) vector to the full external vector.
    ///
    /// # Panics
    ///
    /// Panics if `internal` does not have one entry per variable parameter.
    #[must_use]
    pub fn external(&self, internal: &[f64]) -> Vec<f64> {
        assert_eq!(
            internal.len(),
            self.variables.len(),
            "internal vector must have one entry per variable parameter"
        );

        let mut values = self.values();
        for (&i, &v) in self.variables.iter().zip(internal) {
            values[i] = self.params[i].bounds().to_external(v);
        }
        values
    }

    /// `d external / d internal` for each variable parameter at `internal`.
    #[must_use]
    pub fn external_slopes(&self, internal: &[f64]) -> Vec<f64> {
        self.variable_params()
            .zip(internal)
            .map(|(p, &v)| p.bounds().derivative(v))
            .collect()
    }

    /// Converts a gradient over the full external vector into the gradient
    /// over the internal coordinates at `internal`.
    #[must_use]
    pub fn internal_gradient(&self, internal: &[f64], external_gradient: &[f64]) -> Vec<f64> {
        self.variables
            .iter()
            .zip(self.external_slopes(internal))
            .map(|(&i, slope)| external_gradient[i] * slope)
            .collect()
    }

    fn variable_params(&self) -> impl Iterator<Item = &Parameter> {
        self.variables.iter().map(|&i| &self.params[i])
    }
}
