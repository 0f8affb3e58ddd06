use crate::errors::PipelineError;
use crate::value::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A pure function step: takes the threaded value, returns the next one
pub type PureFn = Arc<dyn Fn(Value) -> Result<Value, PipelineError> + Send + Sync>;

/// A named pure function, as declared by the user program
#[derive(Clone)]
pub struct NamedFn {
    name: Arc<str>,
    fun: PureFn,
}

impl NamedFn {
    pub fn new(name: &str, fun: PureFn) -> Self {
        Self { name: name.into(), fun }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, value: Value) -> Result<Value, PipelineError> {
        (self.fun)(value).map_err(|err| match err {
            // Keep the innermost failing function name
            named @ PipelineError::Operation { .. } => named,
            other => PipelineError::Operation { name: self.name.to_string(), reason: other.to_string() },
        })
    }
}

impl Debug for NamedFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn {}", self.name)
    }
}

/// One step of a user-declared pipeline
#[derive(Clone, Debug)]
pub enum Operation {
    /// Apply a pure function to the threaded value
    Apply(NamedFn),
    /// Run the inner operations in order, output of step i feeding step i+1
    Sequential(Vec<Operation>),
    /// Feed all inner operations the same input, collect outputs into a list
    /// in declaration order
    Parallel(Vec<Operation>),
}

impl Operation {
    /// Convenience constructor for a named pure-function step
    pub fn apply<F>(name: &str, fun: F) -> Self
    where
        F: Fn(Value) -> Result<Value, PipelineError> + Send + Sync + 'static,
    {
        Self::Apply(NamedFn::new(name, Arc::new(fun)))
    }
}

/// How edge records are sliced off a block for ghost exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GhostType {
    /// Slice whole records off the block edges
    #[default]
    Entry,
}

/// The execution context a user program declares for one named function
#[derive(Clone, Debug)]
pub struct OperationContext {
    pub fun_name: String,
    pub operations: Vec<Operation>,
    pub ghost_left: bool,
    pub ghost_right: bool,
    pub ghost_type: GhostType,
    pub ghost_count: usize,
    pub delimiter: Option<String>,
}

impl OperationContext {
    pub fn new(fun_name: &str, operations: Vec<Operation>) -> Self {
        Self {
            fun_name: fun_name.to_owned(),
            operations,
            ghost_left: false,
            ghost_right: false,
            ghost_type: GhostType::Entry,
            ghost_count: 0,
            delimiter: None,
        }
    }

    pub fn with_ghosts(mut self, left: bool, right: bool, count: usize) -> Self {
        self.ghost_left = left;
        self.ghost_right = right;
        self.ghost_count = count;
        self
    }

    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.delimiter = Some(delimiter.to_owned());
        self
    }

    pub fn needs_ghost(&self) -> bool {
        self.ghost_left || self.ghost_right
    }

    pub fn has_multiple_args(&self) -> bool {
        self.delimiter.is_some()
    }

    pub fn split_query(&self, query: &str) -> Vec<String> {
        match &self.delimiter {
            Some(delimiter) => query.split(delimiter.as_str()).map(str::to_owned).collect(),
            None => vec![query.to_owned()],
        }
    }

    /// The terminal operation doubles as the cross-node reduction and must
    /// therefore be a pure function over a `(peer_partial, self_partial)` pair
    pub fn terminal_reduce(&self) -> Result<&NamedFn, PipelineError> {
        match self.operations.last() {
            Some(Operation::Apply(named)) => Ok(named),
            Some(_) => Err(PipelineError::CompositeTerminal),
            None => Err(PipelineError::EmptyPipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_query() {
        let plain = OperationContext::new("f", vec![]);
        assert_eq!(plain.split_query("a,b"), vec!["a,b".to_owned()]);

        let multi = OperationContext::new("f", vec![]).with_delimiter(",");
        assert!(multi.has_multiple_args());
        assert_eq!(multi.split_query("a,b"), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn test_terminal_reduce() {
        let ok = OperationContext::new("f", vec![Operation::apply("sum", |v| Ok(v))]);
        assert_eq!(ok.terminal_reduce().unwrap().name(), "sum");

        let composite = OperationContext::new("f", vec![Operation::Sequential(vec![])]);
        assert!(matches!(composite.terminal_reduce(), Err(PipelineError::CompositeTerminal)));

        let empty = OperationContext::new("f", vec![]);
        assert!(matches!(empty.terminal_reduce(), Err(PipelineError::EmptyPipeline)));
    }
}
