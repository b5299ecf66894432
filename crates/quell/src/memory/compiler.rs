//! Compiles expressions into record-level closures.

use std::rc::Rc;

use itertools::Itertools;

use quell_ast::error::{Error, Result};
use quell_ast::expr::{Aggregation, Expr, ExprKind, Operand};
use quell_ast::value::Value;

use super::queryset::MemoryQuerySet;
use crate::queryset::QuerySet;

/// How the evaluator reaches into a record.
///
/// `Value` implements this for its own records; user-defined record types
/// implement it to expose their fields (and optionally methods) without
/// converting whole objects up front.
pub trait Access {
    /// Read a field by name.
    fn get(&self, name: &str) -> Result<Value>;

    /// Invoke a method by name. Records without callable members keep the
    /// default.
    fn invoke(&self, name: &str, args: &[Value]) -> Result<Value> {
        let _ = args;
        Err(Error::not_callable(name).into())
    }

    /// The record itself as a plain value, when it is one (elements of a
    /// scalar collection).
    fn as_value(&self) -> Option<Value> {
        None
    }
}

impl Access for Value {
    fn get(&self, name: &str) -> Result<Value> {
        match self {
            Value::Record(record) => record
                .get(name)
                .cloned()
                .ok_or_else(|| Error::access(name).into()),
            other => Err(Error::access(name)
                .with_help(format!("cannot read fields of a {}", other.type_name()))
                .into()),
        }
    }

    fn as_value(&self) -> Option<Value> {
        Some(self.clone())
    }
}

/// An expression lowered to a closure over the record under evaluation.
pub type Compiled = Rc<dyn Fn(&dyn Access) -> Result<Value>>;

/// Injectable field accessor; defaults to [Access::get].
pub type Accessor = Rc<dyn Fn(&dyn Access, &str) -> Result<Value>>;

#[derive(Clone)]
pub struct LambdaCompiler {
    get_value: Accessor,
}

impl Default for LambdaCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl LambdaCompiler {
    pub fn new() -> Self {
        LambdaCompiler {
            get_value: Rc::new(|item, name| item.get(name)),
        }
    }

    /// A compiler reading root fields through a custom accessor, for records
    /// whose fields are reached via map lookup, method call, etc.
    pub fn with_accessor(get_value: Accessor) -> Self {
        LambdaCompiler { get_value }
    }

    pub(crate) fn get_value(&self, item: &dyn Access, name: &str) -> Result<Value> {
        (self.get_value)(item, name)
    }

    /// Walk a dotted path: the first segment through the injected accessor,
    /// the rest through the values themselves.
    pub(crate) fn project(&self, item: &dyn Access, path: &str) -> Result<Value> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        let mut value = self.get_value(item, root)?;
        for segment in segments {
            value = value.get(segment)?;
        }
        Ok(value)
    }

    /// Recursively lower `node` to a closure `record -> value`.
    pub fn compile(&self, node: &Expr) -> Compiled {
        match &node.kind {
            ExprKind::Field(name) => {
                let name = name.clone();
                let compiler = self.clone();
                Rc::new(move |item| compiler.get_value(item, &name))
            }

            ExprKind::GetAttr { name, parent } => {
                let parent = self.compile(parent);
                let name = self.compile_operand(name);
                Rc::new(move |item| {
                    let base = parent(item)?;
                    let name = name(item)?;
                    match name.as_string() {
                        Some(field) => base.get(field),
                        None => Err(Error::access(name.to_string())
                            .with_help("attribute names must be strings")
                            .into()),
                    }
                })
            }

            ExprKind::GetItem { key, parent } => {
                let parent = self.compile(parent);
                let key = self.compile_operand(key);
                Rc::new(move |item| {
                    let base = parent(item)?;
                    let key = key(item)?;
                    get_item(&base, &key)
                })
            }

            ExprKind::Call { args, parent } => self.compile_call(args, parent),

            ExprKind::Literal(value) => {
                let value = value.clone();
                Rc::new(move |_| Ok(value.clone()))
            }

            ExprKind::Binary(binary) if binary.op.is_boolean() => {
                let op = binary.op;
                let operands = self.compile_operands(&binary.operands);
                Rc::new(move |item| {
                    let values: Vec<Value> =
                        operands.iter().map(|operand| operand(item)).try_collect()?;
                    // pairwise over consecutive operands, so chained
                    // comparisons hold between every neighbouring pair
                    for (lhs, rhs) in values.iter().tuple_windows() {
                        if !op.reduce(lhs, rhs)?.is_truthy() {
                            return Ok(Value::Boolean(false));
                        }
                    }
                    Ok(Value::Boolean(true))
                })
            }

            ExprKind::Binary(binary) => {
                let op = binary.op;
                let operands = self.compile_operands(&binary.operands);
                Rc::new(move |item| {
                    let values: Vec<Value> =
                        operands.iter().map(|operand| operand(item)).try_collect()?;
                    let mut values = values.into_iter();
                    let Some(mut acc) = values.next() else {
                        return Err(Error::unsupported("a binary node with no operands").into());
                    };
                    for value in values {
                        acc = op.reduce(&acc, &value)?;
                    }
                    Ok(acc)
                })
            }

            ExprKind::Unary(unary) => {
                let op = unary.op;
                let operand = self.compile_operand(&unary.operand);
                Rc::new(move |item| Ok(op.reduce(&operand(item)?)?))
            }

            ExprKind::Aggregation(agg) => {
                let agg = agg.clone();
                let compiler = self.clone();
                Rc::new(move |item| compiler.evaluate_aggregation(&agg, item))
            }
        }
    }

    fn compile_operand(&self, operand: &Operand) -> Compiled {
        match operand {
            Operand::Expr(expr) => self.compile(expr),
            Operand::Value(value) => {
                let value = value.clone();
                Rc::new(move |_| Ok(value.clone()))
            }
        }
    }

    fn compile_operands(&self, operands: &[Operand]) -> Vec<Compiled> {
        operands
            .iter()
            .map(|operand| self.compile_operand(operand))
            .collect()
    }

    fn compile_call(&self, args: &[Operand], parent: &Expr) -> Compiled {
        let args = self.compile_operands(args);
        match &parent.kind {
            // `field("refresh").call([])`: a method on the record itself
            ExprKind::Field(name) => {
                let name = name.clone();
                Rc::new(move |item| {
                    let argv: Vec<Value> = args.iter().map(|arg| arg(item)).try_collect()?;
                    item.invoke(&name, &argv)
                })
            }
            // `field("cart").attr("total").call([])`: a method on a value
            ExprKind::GetAttr { name, parent } => {
                let parent = self.compile(parent);
                let name = self.compile_operand(name);
                Rc::new(move |item| {
                    let base = parent(item)?;
                    let name = name(item)?;
                    let Some(method) = name.as_string() else {
                        return Err(Error::not_callable(name.to_string())
                            .with_help("method names must be strings")
                            .into());
                    };
                    let argv: Vec<Value> = args.iter().map(|arg| arg(item)).try_collect()?;
                    base.invoke(method, &argv)
                })
            }
            _ => {
                let path = parent.to_string();
                Rc::new(move |_| Err(Error::not_callable(path.clone()).into()))
            }
        }
    }

    /// Correlated sub-evaluation: an inner queryset over the record-local
    /// collection, refined by the aggregation's inner query, then reduced.
    fn evaluate_aggregation(&self, agg: &Aggregation, item: &dyn Access) -> Result<Value> {
        let (collection, projection) = agg.collection_and_projection();
        let source = self.project(item, collection)?;
        let Value::List(items) = source else {
            return Err(Error::type_mismatch("aggregate", source.type_name(), "list")
                .with_help(format!("`{collection}` is not a collection"))
                .into());
        };

        let queryset =
            MemoryQuerySet::from_parts(Rc::new(move || items.clone()), Rc::new(self.clone()));
        let queryset = match &agg.query {
            Some(query) => queryset.filter((**query).clone()),
            None => queryset,
        };
        queryset.reduce(agg.kind, projection)
    }
}

fn get_item(base: &Value, key: &Value) -> Result<Value> {
    match (base, key) {
        (Value::List(items), Value::Integer(index)) => {
            let position = if *index < 0 {
                items.len() as i64 + index
            } else {
                *index
            };
            usize::try_from(position)
                .ok()
                .and_then(|position| items.get(position))
                .cloned()
                .ok_or_else(|| Error::access(format!("[{index}]")).into())
        }
        (Value::Record(record), Value::String(name)) => record
            .get(name)
            .cloned()
            .ok_or_else(|| Error::access(name.clone()).into()),
        _ => Err(Error::access(format!("[{key}]"))
            .with_help(format!(
                "cannot index a {} with a {}",
                base.type_name(),
                key.type_name()
            ))
            .into()),
    }
}

#[cfg(test)]
mod test {
    use quell_ast::builder::{count, field, has, lit};
    use quell_ast::value::Record;

    use super::*;

    fn cart(id: i64, quantities: &[i64]) -> Value {
        Value::Record(
            Record::new().with("id", id).with(
                "items",
                quantities
                    .iter()
                    .map(|q| Value::Record(Record::new().with("quantity", *q)))
                    .collect::<Vec<_>>(),
            ),
        )
    }

    fn eval(expr: &Expr, item: &Value) -> Result<Value> {
        LambdaCompiler::new().compile(expr)(item)
    }

    #[test]
    fn field_access_and_literals() {
        let item = cart(3, &[]);
        assert_eq!(eval(&field("id"), &item).unwrap(), Value::Integer(3));
        assert_eq!(eval(&lit("x"), &item).unwrap(), Value::from("x"));
        assert!(eval(&field("missing"), &item).is_err());
    }

    #[test]
    fn chained_access() {
        let item = cart(1, &[2, 5]);
        let expr = field("items").index(1).attr("quantity");
        assert_eq!(eval(&expr, &item).unwrap(), Value::Integer(5));

        let negative = field("items").index(-1).attr("quantity");
        assert_eq!(eval(&negative, &item).unwrap(), Value::Integer(5));
    }

    #[test]
    fn chained_comparison_is_pairwise() {
        let item = cart(5, &[]);
        let expr = lit(1).lt(field("id")).lt(10);
        assert_eq!(eval(&expr, &item).unwrap(), Value::Boolean(true));

        let expr = lit(6).lt(field("id")).lt(10);
        assert_eq!(eval(&expr, &item).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn arithmetic_folds_left() {
        let item = cart(7, &[]);
        let expr = field("id") * 2 + 1;
        assert_eq!(eval(&expr, &item).unwrap(), Value::Integer(15));
    }

    #[test]
    fn count_over_a_record_local_collection() {
        let expr = count("items").eq(0);
        assert_eq!(eval(&expr, &cart(3, &[])).unwrap(), Value::Boolean(true));
        assert_eq!(eval(&expr, &cart(1, &[2])).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn count_where_filters_the_inner_collection() {
        let expr = count("items").where_(field("quantity").gt(0));
        assert_eq!(eval(&expr, &cart(1, &[2, 0])).unwrap(), Value::Integer(1));
    }

    #[test]
    fn has_is_existence() {
        assert_eq!(eval(&has("items"), &cart(1, &[1])).unwrap(), Value::Boolean(true));
        assert_eq!(eval(&has("items"), &cart(1, &[])).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn projecting_aggregations_use_the_last_path_segment() {
        use quell_ast::builder::{mean, sum};
        let item = cart(1, &[2, 3, 5]);
        assert_eq!(
            eval(&sum("items.quantity"), &item).unwrap(),
            Value::Integer(10)
        );
        assert_eq!(
            eval(&mean("items.quantity"), &item).unwrap(),
            Value::Float(10.0 / 3.0)
        );
    }

    #[test]
    fn mean_of_nothing_is_an_error() {
        use quell_ast::builder::mean;
        let err = eval(&mean("items.quantity"), &cart(1, &[])).unwrap_err();
        let reason = &err.downcast_ref::<Error>().unwrap().reason;
        assert!(matches!(
            reason,
            quell_ast::error::Reason::EmptyAggregation { .. }
        ));
    }

    #[test]
    fn call_nodes_dispatch_through_invoke() {
        struct Machine {
            speed: i64,
        }

        impl Access for Machine {
            fn get(&self, name: &str) -> Result<Value> {
                match name {
                    "speed" => Ok(self.speed.into()),
                    _ => Err(Error::access(name).into()),
                }
            }

            fn invoke(&self, name: &str, args: &[Value]) -> Result<Value> {
                match (name, args) {
                    ("boosted", [Value::Integer(by)]) => Ok(Value::Integer(self.speed + by)),
                    _ => Err(Error::not_callable(name).into()),
                }
            }
        }

        let machine = Machine { speed: 30 };
        let expr = field("boosted").call([lit(12)]);
        assert_eq!(
            LambdaCompiler::new().compile(&expr)(&machine).unwrap(),
            Value::Integer(42)
        );

        let unknown = field("stop").call([lit(1)]);
        assert!(LambdaCompiler::new().compile(&unknown)(&machine).is_err());
    }

    #[test]
    fn custom_accessor_reads_roots() {
        let compiler = LambdaCompiler::with_accessor(Rc::new(|item, name| {
            // uppercased field names, as an exotic record shape would
            item.get(&name.to_uppercase())
        }));
        let item = Value::Record(Record::new().with("ID", 9));
        assert_eq!(
            compiler.compile(&field("id"))(&item).unwrap(),
            Value::Integer(9)
        );
    }
}
