//! Lambdas: the sub-expressions of a computation that compile into stages.

use std::sync::Arc;

use tcapflow_common::types::{TupleSpec, Value};
use tcapflow_common::utils::error::{Error, Result};

use super::stages::{ApplyFn, ApplyStage, HashStage, Stage, StageKind};

/// A named sub-expression of a computation.
///
/// APPLY statements compile through [`executor`](Lambda::executor);
/// HASHLEFT and HASHRIGHT statements compile through the hashers, which only
/// comparison lambdas provide.
pub trait Lambda: Send + Sync {
    /// Short name of the lambda kind, for diagnostics.
    fn kind(&self) -> &'static str;

    /// Builds the stage that evaluates this lambda.
    ///
    /// `input` is the schema of the incoming batch, `apply` the columns the
    /// lambda reads, `include` the columns copied through.
    fn executor(
        &self,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>>;

    /// Builds the stage hashing the left key of a join.
    fn left_hasher(
        &self,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>> {
        let _ = (input, apply, include);
        Err(Error::Unsupported(format!("{} lambda cannot hash", self.kind())))
    }

    /// Builds the stage hashing the right key of a join.
    fn right_hasher(
        &self,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>> {
        let _ = (input, apply, include);
        Err(Error::Unsupported(format!("{} lambda cannot hash", self.kind())))
    }
}

/// A lambda backed by a native closure.
pub struct FnLambda {
    arity: usize,
    func: ApplyFn,
}

impl FnLambda {
    /// Wraps a one-argument closure.
    pub fn unary<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            arity: 1,
            func: Arc::new(move |args: &[Value]| f(&args[0])),
        }
    }

    /// Wraps a two-argument closure.
    pub fn binary<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            arity: 2,
            func: Arc::new(move |args: &[Value]| f(&args[0], &args[1])),
        }
    }

    /// Number of columns the closure reads.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl Lambda for FnLambda {
    fn kind(&self) -> &'static str {
        "native"
    }

    fn executor(
        &self,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>> {
        if apply.atts().len() != self.arity {
            return Err(Error::execution(format!(
                "native lambda takes {} columns, {} given in {apply}",
                self.arity,
                apply.atts().len()
            )));
        }
        Ok(Box::new(ApplyStage::new(
            apply.positions_in(input)?,
            include.positions_in(input)?,
            Arc::clone(&self.func),
        )))
    }
}

/// Equality of two columns; also supplies the join-key hashers.
#[derive(Debug, Default, Clone, Copy)]
pub struct EqualsLambda;

impl EqualsLambda {
    fn hasher(
        kind: StageKind,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>> {
        Ok(Box::new(HashStage::new(
            kind,
            apply.single_position_in(input)?,
            include.positions_in(input)?,
        )?))
    }
}

impl Lambda for EqualsLambda {
    fn kind(&self) -> &'static str {
        "=="
    }

    fn executor(
        &self,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>> {
        if apply.atts().len() != 2 {
            return Err(Error::execution(format!(
                "== compares two columns, {} given in {apply}",
                apply.atts().len()
            )));
        }
        let eq: ApplyFn = Arc::new(|args: &[Value]| Ok(Value::Bool(args[0] == args[1])));
        Ok(Box::new(ApplyStage::new(
            apply.positions_in(input)?,
            include.positions_in(input)?,
            eq,
        )))
    }

    fn left_hasher(
        &self,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>> {
        Self::hasher(StageKind::HashLeft, input, apply, include)
    }

    fn right_hasher(
        &self,
        input: &TupleSpec,
        apply: &TupleSpec,
        include: &TupleSpec,
    ) -> Result<Box<dyn Stage>> {
        Self::hasher(StageKind::HashRight, input, apply, include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::TupleSet;

    #[test]
    fn test_native_executor_resolves_columns() {
        let lambda = FnLambda::unary(|v| Ok(Value::Int64(v.as_int64().unwrap_or(0) + 1)));
        let input = TupleSpec::new("A", ["a", "b"]);
        let mut stage = lambda
            .executor(&input, &TupleSpec::new("A", ["b"]), &TupleSpec::new("A", ["a"]))
            .unwrap();

        let batch = TupleSet::new(vec![
            vec![Value::from("x")],
            vec![Value::Int64(41)],
        ])
        .unwrap();
        let out = stage.process(batch).unwrap();
        assert_eq!(out.row(0).as_slice(), &[Value::from("x"), Value::Int64(42)]);
    }

    #[test]
    fn test_native_arity_checked() {
        let lambda = FnLambda::binary(|a, _| Ok(a.clone()));
        let input = TupleSpec::new("A", ["a"]);
        assert!(
            lambda
                .executor(&input, &TupleSpec::new("A", ["a"]), &TupleSpec::empty())
                .is_err()
        );
        assert!(lambda.left_hasher(&input, &input, &input).is_err());
    }

    #[test]
    fn test_equals_executor_and_hashers() {
        let input = TupleSpec::new("J", ["l", "r"]);
        let mut eq = EqualsLambda
            .executor(&input, &TupleSpec::new("J", ["l", "r"]), &TupleSpec::empty())
            .unwrap();
        let batch = TupleSet::new(vec![
            vec![Value::Int64(1), Value::Int64(2)],
            vec![Value::Int64(1), Value::Int64(3)],
        ])
        .unwrap();
        let out = eq.process(batch).unwrap();
        assert_eq!(out.column(0).unwrap(), &[Value::Bool(true), Value::Bool(false)]);

        let left = EqualsLambda
            .left_hasher(&input, &TupleSpec::new("J", ["l"]), &TupleSpec::new("J", ["r"]))
            .unwrap();
        assert_eq!(left.kind(), StageKind::HashLeft);
        let right = EqualsLambda
            .right_hasher(&input, &TupleSpec::new("J", ["r"]), &TupleSpec::empty())
            .unwrap();
        assert_eq!(right.kind(), StageKind::HashRight);
    }
}
