use std::collections::HashSet;

use thiserror::Error;

use super::Objective;

/// A component's failure, type-erased so components of different types can
/// share one [`Sum`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ComponentError(Box<dyn std::error::Error + Send + Sync>);

/// Errors that can occur when adding a component to a [`Sum`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SumError {
    #[error("component parameter '{0}' is listed more than once")]
    DuplicateName(String),
}

/// Object-safe view of an [`Objective`] with its error type erased.
trait Erased: Send + Sync {
    fn cost(&self, params: &[f64]) -> Result<f64, ComponentError>;
    fn has_gradient(&self) -> bool;
    fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, ComponentError>>;
    fn error_definition(&self) -> f64;
    fn adjust(&mut self, params: &[f64], variables: &[usize]) -> Result<(), ComponentError>;
}

impl<O: Objective> Erased for O {
    fn cost(&self, params: &[f64]) -> Result<f64, ComponentError> {
        Objective::cost(self, params).map_err(erase)
    }

    fn has_gradient(&self) -> bool {
        Objective::has_gradient(self)
    }

    fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, ComponentError>> {
        Objective::gradient(self, params).map(|g| g.map_err(erase))
    }

    fn error_definition(&self) -> f64 {
        Objective::error_definition(self)
    }

    fn adjust(&mut self, params: &[f64], variables: &[usize]) -> Result<(), ComponentError> {
        Objective::adjust_error_definition(self, params, variables).map_err(erase)
    }
}

fn erase<E: std::error::Error + Send + Sync + 'static>(err: E) -> ComponentError {
    ComponentError(Box::new(err))
}

struct Component {
    objective: Box<dyn Erased>,

    /// Position of each component parameter in the sum's parameter list.
    indices: Vec<usize>,
}

impl Component {
    fn select(&self, params: &[f64]) -> Vec<f64> {
        self.indices.iter().map(|&i| params[i]).collect()
    }
}

/// The sum of several objectives whose parameters are matched by name.
///
/// The sum's parameters are the union of the component parameter names, in
/// order of first appearance. A name shared by two components refers to one
/// parameter, which is how simultaneous fits of several data sets tie their
/// common parameters together.
///
/// Each component is divided by its own error definition, so the sum's
/// error definition is one.
#[derive(Default)]
pub struct Sum {
    names: Vec<String>,
    components: Vec<Component>,
}

impl Sum {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a component whose parameter vector is `names`, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if `names` lists a parameter more than once.
    pub fn with<O>(
        mut self,
        names: impl IntoIterator<Item = impl Into<String>>,
        objective: O,
    ) -> Result<Self, SumError>
    where
        O: Objective + 'static,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        let mut seen = HashSet::new();
        if let Some(name) = names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(SumError::DuplicateName(name.clone()));
        }

        let indices = names
            .into_iter()
            .map(|name| match self.names.iter().position(|n| *n == name) {
                Some(index) => index,
                None => {
                    self.names.push(name);
                    self.names.len() - 1
                }
            })
            .collect();

        self.components.push(Component {
            objective: Box::new(objective),
            indices,
        });
        Ok(self)
    }

    /// Parameter names, in the order the sum expects its parameter vector.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.names
    }
}

impl std::fmt::Debug for Sum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sum")
            .field("parameters", &self.names)
            .field("components", &self.components.len())
            .finish()
    }
}

impl Objective for Sum {
    type Error = ComponentError;

    fn cost(&self, params: &[f64]) -> Result<f64, Self::Error> {
        self.components.iter().try_fold(0.0, |total, c| {
            let cost = c.objective.cost(&c.select(params))?;
            Ok(total + cost / c.objective.error_definition())
        })
    }

    fn has_gradient(&self) -> bool {
        !self.components.is_empty() && self.components.iter().all(|c| c.objective.has_gradient())
    }

    fn gradient(&self, params: &[f64]) -> Option<Result<Vec<f64>, Self::Error>> {
        if !Objective::has_gradient(self) {
            return None;
        }

        let mut total = vec![0.0; params.len()];
        for c in &self.components {
            let gradient = match c.objective.gradient(&c.select(params))? {
                Ok(gradient) => gradient,
                Err(err) => return Some(Err(err)),
            };
            let up = c.objective.error_definition();
            for (&i, g) in c.indices.iter().zip(gradient) {
                total[i] += g / up;
            }
        }
        Some(Ok(total))
    }

    fn adjust_error_definition(
        &mut self,
        params: &[f64],
        variables: &[usize],
    ) -> Result<(), Self::Error> {
        for c in &mut self.components {
            let local: Vec<usize> = c
                .indices
                .iter()
                .enumerate()
                .filter_map(|(k, i)| variables.contains(i).then_some(k))
                .collect();
            let selected = c.select(params);
            c.objective.adjust(&selected, &local)?;
        }
        Ok(())
    }
}
