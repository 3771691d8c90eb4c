use crate::gradient::Difference;

/// Trades evaluations for accuracy in the gradient-based engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Forward differences and a short L-BFGS history.
    Fast,

    /// Central differences and a medium history.
    #[default]
    Balanced,

    /// Central differences and a long history.
    Precise,
}

impl Strategy {
    /// Number of correction pairs L-BFGS keeps.
    #[must_use]
    pub fn lbfgs_memory(self) -> usize {
        match self {
            Self::Fast => 5,
            Self::Balanced => 7,
            Self::Precise => 10,
        }
    }

    pub(crate) fn difference(self) -> Difference {
        match self {
            Self::Fast => Difference::Forward,
            Self::Balanced | Self::Precise => Difference::Central,
        }
    }
}
