use rayon::prelude::*;
use trellis_engine_core::errors::PipelineError;
use trellis_engine_core::ops::{Operation, OperationContext};
use trellis_engine_core::value::{Block, Value};

/// Folds the operation list left to right, threading a single value through.
///
/// `Parallel` composites fan out on the ambient rayon pool (the node dedicates
/// a bounded pool to pipeline work) and collect in declaration order.
pub fn interpret(operations: &[Operation], input: Value) -> Result<Value, PipelineError> {
    let mut value = input;
    for operation in operations {
        value = apply(operation, value)?;
    }
    Ok(value)
}

fn apply(operation: &Operation, value: Value) -> Result<Value, PipelineError> {
    match operation {
        Operation::Apply(named) => named.call(value),
        Operation::Sequential(inner) => interpret(inner, value),
        Operation::Parallel(inner) => {
            let results = inner.par_iter().map(|op| apply(op, value.clone())).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(results))
        }
    }
}

/// Builds the pipeline's initial value: the (possibly ghost-merged) local
/// blocks followed by the query parts
pub fn initial_arguments(blocks: Vec<Block>, context: &OperationContext, query: &str) -> Value {
    let mut items = vec![Value::from_blocks(blocks)];
    items.extend(context.split_query(query).into_iter().map(Value::Text));
    Value::List(items)
}
