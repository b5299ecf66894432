//! The in-memory queryset: a source factory plus a pipeline of pure stages.

use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;

use itertools::Itertools;

use quell_ast::error::{Error, Reason, Result};
use quell_ast::expr::{AggKind, Expr, ExprKind, Operand, UnOp};
use quell_ast::value::Value;

use super::compiler::{Access, Compiled, LambdaCompiler};
use crate::queryset::{IntoQueries, QuerySet};

/// Produces the records an iteration starts from; invoked fresh on every
/// materialization, so a queryset is re-iterable.
pub type Source<T> = Rc<dyn Fn() -> Vec<T>>;

type Stage<T> = Rc<dyn Fn(Vec<T>) -> Result<Vec<T>>>;

pub struct MemoryQuerySet<T> {
    source: Source<T>,
    compiler: Rc<LambdaCompiler>,
    pipeline: Vec<Stage<T>>,
}

impl<T> Clone for MemoryQuerySet<T> {
    fn clone(&self) -> Self {
        MemoryQuerySet {
            source: self.source.clone(),
            compiler: self.compiler.clone(),
            pipeline: self.pipeline.clone(),
        }
    }
}

impl<T: Access + Clone + 'static> MemoryQuerySet<T> {
    pub fn new(source: impl Fn() -> Vec<T> + 'static) -> Self {
        Self::from_parts(Rc::new(source), Rc::new(LambdaCompiler::new()))
    }

    /// A queryset over `source` evaluated by an existing compiler.
    /// Aggregation sub-evaluations use this to share the enclosing compiler.
    pub fn from_parts(source: Source<T>, compiler: Rc<LambdaCompiler>) -> Self {
        MemoryQuerySet {
            source,
            compiler,
            pipeline: Vec::new(),
        }
    }

    fn with_stage(&self, stage: Stage<T>) -> Self {
        let mut pipeline = self.pipeline.clone();
        pipeline.push(stage);
        MemoryQuerySet {
            source: self.source.clone(),
            compiler: self.compiler.clone(),
            pipeline,
        }
    }

    fn compile_queries(&self, queries: impl IntoQueries) -> Vec<Compiled> {
        queries
            .into_queries()
            .iter()
            .map(|query| self.compiler.compile(query))
            .collect()
    }

    /// Apply an aggregation's reducer to the materialized queryset.
    /// `projection` names the field projected out of each record; `None`
    /// uses the records themselves (elements of a scalar collection).
    pub(crate) fn reduce(&self, kind: AggKind, projection: Option<&str>) -> Result<Value> {
        let records = self.execute()?;
        match kind {
            AggKind::Count => Ok(Value::Integer(records.len() as i64)),
            AggKind::Has => Ok(Value::Boolean(!records.is_empty())),
            AggKind::Sum => {
                let mut acc = Value::Integer(0);
                for value in self.projected(&records, projection)? {
                    acc = acc.add(&value)?;
                }
                Ok(acc)
            }
            AggKind::Mean => {
                if records.is_empty() {
                    return Err(Error::new(Reason::EmptyAggregation {
                        kind: kind.to_string(),
                    })
                    .into());
                }
                let mut acc = Value::Integer(0);
                for value in self.projected(&records, projection)? {
                    acc = acc.add(&value)?;
                }
                Ok(acc.div(&Value::Integer(records.len() as i64))?)
            }
            AggKind::Median => {
                let mut values = self.projected(&records, projection)?;
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                sort_values(&mut values)?;
                let middle = values.len() / 2;
                if values.len() % 2 == 0 {
                    let low = &values[middle - 1];
                    let high = &values[middle];
                    Ok(low.add(high)?.div(&Value::Integer(2))?)
                } else {
                    Ok(values[middle].clone())
                }
            }
            AggKind::Collect => Ok(Value::List(self.projected(&records, projection)?)),
        }
    }

    fn projected(&self, records: &[T], projection: Option<&str>) -> Result<Vec<Value>> {
        records
            .iter()
            .map(|record| match projection {
                Some(path) => self.compiler.project(record, path),
                None => record.as_value().ok_or_else(|| {
                    Error::unsupported("aggregating records without a projection path")
                        .with_help("name the projected field, e.g. sum(\"items.line_total\")")
                        .into()
                }),
            })
            .try_collect()
    }
}

impl<T: Access + Clone + 'static> QuerySet for MemoryQuerySet<T> {
    type Item = T;

    fn all(&self) -> Self {
        self.clone()
    }

    fn filter(&self, queries: impl IntoQueries) -> Self {
        let callbacks = self.compile_queries(queries);
        self.with_stage(Rc::new(move |records: Vec<T>| {
            let mut kept = Vec::with_capacity(records.len());
            'records: for record in records {
                for callback in &callbacks {
                    if !callback(&record)?.is_truthy() {
                        continue 'records;
                    }
                }
                kept.push(record);
            }
            Ok(kept)
        }))
    }

    fn exclude(&self, queries: impl IntoQueries) -> Self {
        let callbacks = self.compile_queries(queries);
        self.with_stage(Rc::new(move |records: Vec<T>| {
            let mut kept = Vec::new();
            for record in records {
                let mut keep = false;
                for callback in &callbacks {
                    if !callback(&record)?.is_truthy() {
                        keep = true;
                        break;
                    }
                }
                if keep {
                    kept.push(record);
                }
            }
            Ok(kept)
        }))
    }

    fn order_by(&self, fields: impl IntoQueries) -> Self {
        let keys: Vec<(Compiled, bool)> = fields
            .into_queries()
            .into_iter()
            .map(|field| match field.kind {
                // a negated field sorts that key descending
                ExprKind::Unary(unary) if unary.op == UnOp::Neg => {
                    let inner = match unary.operand {
                        Operand::Expr(expr) => *expr,
                        Operand::Value(value) => Expr::literal(value),
                    };
                    (self.compiler.compile(&inner), true)
                }
                kind => (self.compiler.compile(&Expr::new(kind)), false),
            })
            .collect();

        self.with_stage(Rc::new(move |records: Vec<T>| {
            let mut records = records;
            // stable sorts applied right-to-left make the first field the
            // primary key
            for (key, descending) in keys.iter().rev() {
                let keyed: Vec<(Value, T)> = records
                    .into_iter()
                    .map(|record| Ok::<(Value, T), anyhow::Error>((key(&record)?, record)))
                    .try_collect()?;
                let mut keyed = keyed;
                let mut failure = None;
                keyed.sort_by(|(lhs, _), (rhs, _)| match lhs.compare(rhs) {
                    Ok(ordering) if *descending => ordering.reverse(),
                    Ok(ordering) => ordering,
                    Err(error) => {
                        failure.get_or_insert(error);
                        std::cmp::Ordering::Equal
                    }
                });
                if let Some(error) = failure {
                    return Err(error.into());
                }
                records = keyed.into_iter().map(|(_, record)| record).collect();
            }
            Ok(records)
        }))
    }

    fn get(&self, queries: impl IntoQueries) -> Result<T> {
        let mut records = self.filter(queries).execute()?;
        if records.len() > 1 {
            return Err(Error::new(Reason::MultipleObjectsReturned).into());
        }
        records
            .pop()
            .ok_or_else(|| Error::new(Reason::ObjectDoesNotExist).into())
    }

    fn first(&self) -> Result<Option<T>> {
        Ok(self.execute()?.into_iter().next())
    }

    fn last(&self) -> Result<Option<T>> {
        Ok(self.execute()?.pop())
    }

    fn aggregate(&self, expr: &Expr) -> Result<Value> {
        let ExprKind::Aggregation(agg) = &expr.kind else {
            return Err(Error::unsupported(format!("`{expr}` is not an aggregation")).into());
        };
        let queryset = match &agg.query {
            Some(query) => self.filter((**query).clone()),
            None => self.clone(),
        };
        queryset.reduce(agg.kind, Some(&agg.field))
    }

    fn execute(&self) -> Result<Vec<T>> {
        let mut records = (self.source)();
        for stage in &self.pipeline {
            records = stage(records)?;
        }
        Ok(records)
    }
}

fn sort_values(values: &mut [Value]) -> Result<()> {
    let mut failure = None;
    values.sort_by(|lhs, rhs| match lhs.compare(rhs) {
        Ok(ordering) => ordering,
        Err(error) => {
            failure.get_or_insert(error);
            std::cmp::Ordering::Equal
        }
    });
    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

impl<T: Access + Clone + Debug + 'static> Display for MemoryQuerySet<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.execute() {
            Ok(records) => {
                f.write_str("<MemoryQuerySet [")?;
                for (index, record) in records.iter().take(3).enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{record:?}")?;
                }
                if records.len() > 3 {
                    f.write_str(", ...")?;
                }
                f.write_str("]>")
            }
            Err(error) => write!(f, "<MemoryQuerySet (error: {error})>"),
        }
    }
}

#[cfg(test)]
mod test {
    use quell_ast::builder::{collect, count, field, median, sum};
    use quell_ast::value::Record;

    use super::*;

    fn users() -> Vec<Value> {
        [("jane", 1200), ("john", 600), ("june", 1000), ("jade", 999)]
            .into_iter()
            .map(|(name, points)| {
                Value::Record(Record::new().with("name", name).with("points", points))
            })
            .collect()
    }

    fn queryset() -> MemoryQuerySet<Value> {
        MemoryQuerySet::new(users)
    }

    fn names(records: &[Value]) -> Vec<String> {
        records
            .iter()
            .map(|record| record.get("name").unwrap().as_string().unwrap().clone())
            .collect()
    }

    #[test]
    fn filter_keeps_matching_records() {
        let rich = queryset().filter(field("points").gte(1000)).execute().unwrap();
        assert_eq!(names(&rich), ["jane", "june"]);
    }

    #[test]
    fn filter_with_several_queries_is_a_conjunction() {
        let result = queryset()
            .filter([field("points").gte(1000), field("name").eq("june")])
            .execute()
            .unwrap();
        assert_eq!(names(&result), ["june"]);
    }

    #[test]
    fn exclude_is_the_opposite_of_filter() {
        let queryset = queryset();
        let query = field("points").gte(1000);
        let kept = queryset.filter(query.clone()).execute().unwrap();
        let dropped = queryset.exclude(query).execute().unwrap();
        assert_eq!(kept.len() + dropped.len(), queryset.execute().unwrap().len());
        assert_eq!(names(&dropped), ["john", "jade"]);
    }

    #[test]
    fn refinement_does_not_alter_the_original() {
        let queryset = queryset();
        let _refined = queryset.filter(field("points").gt(100_000));
        assert_eq!(queryset.execute().unwrap().len(), 4);
    }

    #[test]
    fn all_is_idempotent() {
        let queryset = queryset().filter(field("points").gt(0));
        assert_eq!(
            queryset.all().execute().unwrap(),
            queryset.execute().unwrap()
        );
    }

    #[test]
    fn order_by_sorts_stably_with_descending_keys() {
        let by_points = queryset().order_by(field("points")).execute().unwrap();
        assert_eq!(names(&by_points), ["john", "jade", "june", "jane"]);

        let descending = queryset().order_by(-field("points")).execute().unwrap();
        assert_eq!(names(&descending), ["jane", "june", "jade", "john"]);
    }

    #[test]
    fn order_by_applies_keys_right_to_left() {
        // primary key first: equivalent to sorting by the secondary key,
        // then stably by the primary
        let composed = queryset()
            .order_by(field("points"))
            .order_by(field("name"))
            .execute()
            .unwrap();
        let at_once = queryset()
            .order_by([field("name"), field("points")])
            .execute()
            .unwrap();
        assert_eq!(composed, at_once);
    }

    #[test]
    fn order_by_rejects_incomparable_keys() {
        let mixed = MemoryQuerySet::new(|| {
            vec![
                Value::Record(Record::new().with("id", 1)),
                Value::Record(Record::new().with("id", "two")),
            ]
        });
        assert!(mixed.order_by(field("id")).execute().is_err());
    }

    #[test]
    fn get_enforces_cardinality() {
        let jane = queryset().get(field("name").eq("jane")).unwrap();
        assert_eq!(jane.get("points").unwrap(), Value::Integer(1200));

        let missing = queryset().get(field("name").eq("nobody")).unwrap_err();
        assert_eq!(
            missing.downcast_ref::<Error>().unwrap().reason,
            Reason::ObjectDoesNotExist
        );

        let ambiguous = queryset().get(field("points").gt(0)).unwrap_err();
        assert_eq!(
            ambiguous.downcast_ref::<Error>().unwrap().reason,
            Reason::MultipleObjectsReturned
        );
    }

    #[test]
    fn first_and_last() {
        let queryset = queryset().order_by(field("points"));
        let first = queryset.first().unwrap().unwrap();
        let last = queryset.last().unwrap().unwrap();
        assert_eq!(first.get("name").unwrap(), Value::from("john"));
        assert_eq!(last.get("name").unwrap(), Value::from("jane"));

        let none = queryset.filter(field("points").lt(0)).first().unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn aggregate_over_the_whole_queryset() {
        let queryset = queryset();
        assert_eq!(
            queryset.aggregate(&count("points")).unwrap(),
            Value::Integer(4)
        );
        assert_eq!(
            queryset.aggregate(&sum("points")).unwrap(),
            Value::Integer(3799)
        );
        assert_eq!(
            queryset.aggregate(&median("points")).unwrap(),
            Value::Float(999.5)
        );
        assert_eq!(
            queryset
                .aggregate(&sum("points").where_(field("points").gte(1000)))
                .unwrap(),
            Value::Integer(2200)
        );
        assert_eq!(
            queryset.aggregate(&collect("name")).unwrap(),
            Value::List(vec![
                "jane".into(),
                "john".into(),
                "june".into(),
                "jade".into(),
            ])
        );
    }

    #[test]
    fn each_iteration_rereads_the_source() {
        use std::cell::Cell;
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let queryset = MemoryQuerySet::new(move || {
            counter.set(counter.get() + 1);
            vec![Value::Record(Record::new().with("id", 1))]
        });
        queryset.execute().unwrap();
        queryset.execute().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn preview_shows_the_first_records() {
        let display = queryset().to_string();
        assert!(display.starts_with("<MemoryQuerySet ["));
        assert!(display.ends_with(", ...]>"));
    }
}
