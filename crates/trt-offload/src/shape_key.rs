use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::Graph;
use crate::tensor::HostTensor;

/// Concrete input shapes of one invocation, one entry per graph input.
///
/// Engines are specialized per key; equal keys share one engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeKey(Vec<Vec<usize>>);

impl ShapeKey {
    pub fn new(shapes: Vec<Vec<usize>>) -> Self {
        Self(shapes)
    }

    pub fn from_inputs(inputs: &[HostTensor]) -> Self {
        Self(inputs.iter().map(|tensor| tensor.dims().to_vec()).collect())
    }

    pub fn shapes(&self) -> &[Vec<usize>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks the key against the graph's declared inputs. Returns a
    /// description of the first mismatch.
    pub fn check_against(&self, graph: &Graph) -> Result<(), String> {
        if self.0.len() != graph.inputs.len() {
            return Err(format!(
                "expected {} inputs, got {}",
                graph.inputs.len(),
                self.0.len()
            ));
        }
        for (input, dims) in graph.inputs.iter().zip(&self.0) {
            if !input.spec.shape.admits(dims) {
                return Err(format!(
                    "input '{}' declared as {} cannot take shape {}",
                    input.name,
                    input.spec.shape,
                    DimsDisplay(dims)
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, dims) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "[{}]", DimsDisplay(dims))?;
        }
        f.write_str(")")
    }
}

struct DimsDisplay<'a>(&'a [usize]);

impl fmt::Display for DimsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, dim) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("x")?;
            }
            write!(f, "{dim}")?;
        }
        Ok(())
    }
}
