//! Index-notation expression trees
//!
//! An [`Expr`] is a value-typed tree built from annotated array references
//! and the algebraic operators. Building an expression does no work; the
//! tree is compiled into engines and distributed evaluators when it is
//! assigned to an array or reduced to a scalar.
//!
//! ```no_run
//! # use tessra_expr::DistArray;
//! # fn demo(mut c: DistArray<f64>, a: DistArray<f64>, b: DistArray<f64>)
//! #     -> tessra_core::Result<()> {
//! // c("m,n") = a("m,k") * b("k,n")
//! c.assign("m,n", a.tsr("m,k")? * b.tsr("k,n")?)?;
//! // c("m,n") += a("m,k") * b("k,n"), scaled
//! c.add_assign("m,n", (a.tsr("m,k")? * b.tsr("k,n")?) * 0.5)?;
//! # Ok(())
//! # }
//! ```

use crate::array::DistArray;
use crate::Element;
use tessra_core::error::{RangeError, Result};
use tessra_core::range::Index;
use tessra_core::vars::VariableList;

/// The expression tree nodes
#[derive(Clone)]
pub(crate) enum ExprNode<T: Element> {
    /// Annotated array reference, optionally restricted to a tile block
    Tsr {
        array: DistArray<T>,
        annot: VariableList,
        block: Option<(Index, Index)>,
    },
    Add(Box<ExprNode<T>>, Box<ExprNode<T>>),
    Subt(Box<ExprNode<T>>, Box<ExprNode<T>>),
    /// Hadamard product or contraction, decided by the annotations
    Mult(Box<ExprNode<T>>, Box<ExprNode<T>>),
    Scale(Box<ExprNode<T>>, T),
    Neg(Box<ExprNode<T>>),
}

/// A lazy tensor expression
#[derive(Clone)]
pub struct Expr<T: Element> {
    pub(crate) node: ExprNode<T>,
}

impl<T: Element> Expr<T> {
    pub(crate) fn tsr(array: DistArray<T>, annot: VariableList) -> Self {
        Self {
            node: ExprNode::Tsr {
                array,
                annot,
                block: None,
            },
        }
    }

    /// Restrict an array reference to a box of tile coordinates
    ///
    /// Bounds are half-open in tile-grid coordinates; the block is
    /// re-based to a zero element origin. Only valid directly on an
    /// annotated array reference.
    pub fn block(self, lower: &[usize], upper: &[usize]) -> Result<Expr<T>> {
        match self.node {
            ExprNode::Tsr { array, annot, .. } => {
                let tiles = array.trange().tiles_range().clone();
                if lower.len() != tiles.rank() || upper.len() != tiles.rank() {
                    return Err(RangeError::RankMismatch {
                        expected: tiles.rank(),
                        got: lower.len(),
                    }
                    .into());
                }
                let ok_bounds = lower.iter().zip(upper.iter()).all(|(l, u)| l < u)
                    && upper
                        .iter()
                        .zip(tiles.extents().iter())
                        .all(|(u, e)| u <= e);
                if !ok_bounds {
                    return Err(RangeError::InvalidBounds {
                        lower: lower.to_vec(),
                        upper: upper.to_vec(),
                    }
                    .into());
                }
                Ok(Expr {
                    node: ExprNode::Tsr {
                        array,
                        annot,
                        block: Some((
                            lower.iter().copied().collect(),
                            upper.iter().copied().collect(),
                        )),
                    },
                })
            }
            _ => Err(RangeError::TiledRangeMismatch {
                context: "block() applies to an annotated array reference".to_string(),
            }
            .into()),
        }
    }
}

impl<T: Element> std::ops::Add for Expr<T> {
    type Output = Expr<T>;

    fn add(self, rhs: Expr<T>) -> Expr<T> {
        Expr {
            node: ExprNode::Add(Box::new(self.node), Box::new(rhs.node)),
        }
    }
}

impl<T: Element> std::ops::Sub for Expr<T> {
    type Output = Expr<T>;

    fn sub(self, rhs: Expr<T>) -> Expr<T> {
        Expr {
            node: ExprNode::Subt(Box::new(self.node), Box::new(rhs.node)),
        }
    }
}

impl<T: Element> std::ops::Mul for Expr<T> {
    type Output = Expr<T>;

    fn mul(self, rhs: Expr<T>) -> Expr<T> {
        Expr {
            node: ExprNode::Mult(Box::new(self.node), Box::new(rhs.node)),
        }
    }
}

impl<T: Element> std::ops::Mul<T> for Expr<T> {
    type Output = Expr<T>;

    fn mul(self, factor: T) -> Expr<T> {
        Expr {
            node: ExprNode::Scale(Box::new(self.node), factor),
        }
    }
}

impl<T: Element> std::ops::Neg for Expr<T> {
    type Output = Expr<T>;

    fn neg(self) -> Expr<T> {
        Expr {
            node: ExprNode::Neg(Box::new(self.node)),
        }
    }
}

impl std::ops::Mul<Expr<f64>> for f64 {
    type Output = Expr<f64>;

    fn mul(self, rhs: Expr<f64>) -> Expr<f64> {
        rhs * self
    }
}

impl std::ops::Mul<Expr<f32>> for f32 {
    type Output = Expr<f32>;

    fn mul(self, rhs: Expr<f32>) -> Expr<f32> {
        rhs * self
    }
}
