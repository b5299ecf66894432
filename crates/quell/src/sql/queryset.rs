//! The relational queryset: each refinement merges clauses into the
//! accumulated query; materialization executes it on the session.

use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use itertools::Itertools;
use sqlparser::ast::{self as sql_ast, FunctionArgExpr, SelectItem, WildcardAdditionalOptions};

use quell_ast::error::{Error, Reason, Result};
use quell_ast::expr::{AggKind, Aggregation, Expr, ExprKind};
use quell_ast::value::Value;

use super::compiler::{
    column, combine_and, function, negate, number, select_from, select_scalar, SqlCompiler,
};
use super::schema::{Schema, Table};
use super::session::Session;
use crate::memory::MemoryQuerySet;
use crate::queryset::{IntoQueries, QuerySet};

#[derive(Clone)]
pub struct SqlQuerySet {
    session: Rc<Session>,
    table: Table,
    compiler: SqlCompiler,
    selection: Option<sql_ast::Expr>,
    order: Vec<sql_ast::OrderByExpr>,
    /// A refinement that failed to lower; surfaced at materialization so the
    /// fluent API stays infallible like the in-memory one.
    failure: Option<Error>,
}

impl SqlQuerySet {
    pub fn new(session: Rc<Session>, schema: Rc<Schema>, table: &str) -> Result<Self> {
        let table = schema.table(table)?.clone();
        Ok(SqlQuerySet {
            session,
            table,
            compiler: SqlCompiler::new(schema),
            selection: None,
            order: Vec::new(),
            failure: None,
        })
    }

    /// The SQL the queryset would execute.
    pub fn to_sql(&self) -> String {
        self.build_query().to_string()
    }

    fn build_query(&self) -> sql_ast::Query {
        let mut query = select_from(
            &self.table.name,
            vec![SelectItem::Wildcard(WildcardAdditionalOptions::default())],
            self.selection.clone(),
        );
        query.order_by = self.order.clone();
        query
    }

    fn compile_clauses(&self, queries: impl IntoQueries) -> Result<Vec<sql_ast::Expr>, Error> {
        queries
            .into_queries()
            .iter()
            .map(|query| {
                self.compiler
                    .compile(query, &self.table)
                    .map_err(into_compile_error)
            })
            .try_collect()
    }

    fn with_selection(&self, clause: sql_ast::Expr) -> Self {
        let mut refined = self.clone();
        refined.selection = Some(match refined.selection.take() {
            Some(existing) => combine_and(existing, clause),
            None => clause,
        });
        refined
    }

    fn with_failure(&self, failure: Error) -> Self {
        let mut refined = self.clone();
        refined.failure.get_or_insert(failure);
        refined
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }

    /// A scalar aggregate over the accumulated query, where SQL has one.
    fn aggregate_scalar(&self, agg: &Aggregation) -> Result<Value> {
        let mut selection = self.selection.clone();
        if let Some(query) = &agg.query {
            let clause = self
                .compiler
                .compile(query, &self.table)
                .map_err(into_compile_error)?;
            selection = Some(match selection {
                Some(existing) => combine_and(existing, clause),
                None => clause,
            });
        }

        let call = match agg.kind {
            AggKind::Count => function("COUNT", vec![FunctionArgExpr::Wildcard]),
            AggKind::Sum => function(
                "COALESCE",
                vec![
                    FunctionArgExpr::Expr(function(
                        "SUM",
                        vec![FunctionArgExpr::Expr(column(&self.table.name, &agg.field))],
                    )),
                    FunctionArgExpr::Expr(number("0")),
                ],
            ),
            AggKind::Mean => function(
                "AVG",
                vec![FunctionArgExpr::Expr(column(&self.table.name, &agg.field))],
            ),
            AggKind::Has => {
                let exists = sql_ast::Expr::Exists {
                    subquery: Box::new(select_from(
                        &self.table.name,
                        vec![SelectItem::UnnamedExpr(number("1"))],
                        selection,
                    )),
                    negated: false,
                };
                let sql = select_scalar(vec![SelectItem::UnnamedExpr(exists)]).to_string();
                let value = self.session.query_scalar(&sql)?;
                return Ok(Value::Boolean(value.is_truthy()));
            }
            _ => unreachable!("routed to the in-memory reducers"),
        };

        let sql = select_from(
            &self.table.name,
            vec![SelectItem::UnnamedExpr(call)],
            selection,
        )
        .to_string();
        let value = self.session.query_scalar(&sql)?;

        // AVG of no rows is NULL in SQL; the contract wants an error
        if agg.kind == AggKind::Mean && value == Value::Null {
            return Err(Error::new(Reason::EmptyAggregation {
                kind: agg.kind.to_string(),
            })
            .into());
        }
        Ok(value)
    }
}

impl QuerySet for SqlQuerySet {
    type Item = Value;

    fn all(&self) -> Self {
        self.clone()
    }

    fn filter(&self, queries: impl IntoQueries) -> Self {
        match self.compile_clauses(queries) {
            Ok(clauses) => clauses
                .into_iter()
                .fold(self.clone(), |queryset, clause| {
                    queryset.with_selection(clause)
                }),
            Err(error) => self.with_failure(error),
        }
    }

    fn exclude(&self, queries: impl IntoQueries) -> Self {
        match self.compile_clauses(queries) {
            Ok(clauses) => {
                // keep rows failing at least one query: NOT (q1 AND q2 ...)
                match clauses.into_iter().reduce(combine_and) {
                    Some(conjunction) => self.with_selection(negate(conjunction)),
                    None => self.clone(),
                }
            }
            Err(error) => self.with_failure(error),
        }
    }

    fn order_by(&self, fields: impl IntoQueries) -> Self {
        let sorts: Result<Vec<sql_ast::OrderByExpr>, Error> = fields
            .into_queries()
            .iter()
            .map(|field| {
                self.compiler
                    .compile_sort(field, &self.table)
                    .map_err(into_compile_error)
            })
            .try_collect();
        match sorts {
            Ok(mut sorts) => {
                // the latest order_by provides the primary keys
                let mut refined = self.clone();
                sorts.extend(refined.order.drain(..));
                refined.order = sorts;
                refined
            }
            Err(error) => self.with_failure(error),
        }
    }

    fn get(&self, queries: impl IntoQueries) -> Result<Value> {
        let mut rows = self.filter(queries).execute()?;
        if rows.len() > 1 {
            return Err(Error::new(Reason::MultipleObjectsReturned).into());
        }
        rows.pop()
            .ok_or_else(|| Error::new(Reason::ObjectDoesNotExist).into())
    }

    fn first(&self) -> Result<Option<Value>> {
        Ok(self.execute()?.into_iter().next())
    }

    fn last(&self) -> Result<Option<Value>> {
        Ok(self.execute()?.pop())
    }

    fn aggregate(&self, expr: &Expr) -> Result<Value> {
        self.check_failure()?;
        let ExprKind::Aggregation(agg) = &expr.kind else {
            return Err(Error::unsupported(format!("`{expr}` is not an aggregation")).into());
        };
        match agg.kind {
            AggKind::Count | AggKind::Sum | AggKind::Mean | AggKind::Has => {
                self.aggregate_scalar(agg)
            }
            // no portable SQL rendition; materialize and reuse the shared
            // reducers
            AggKind::Median | AggKind::Collect => {
                let rows = self.execute()?;
                MemoryQuerySet::new(move || rows.clone()).aggregate(expr)
            }
        }
    }

    fn execute(&self) -> Result<Vec<Value>> {
        self.check_failure()?;
        self.session.query(&self.to_sql())
    }
}

/// Lowering failures are our typed [Error]; anything else is preserved as an
/// unsupported-construct message.
fn into_compile_error(error: anyhow::Error) -> Error {
    match error.downcast::<Error>() {
        Ok(error) => error,
        Err(other) => Error::unsupported(other.to_string()),
    }
}

impl Display for SqlQuerySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let formatted = sqlformat::format(
            &self.to_sql(),
            &sqlformat::QueryParams::default(),
            sqlformat::FormatOptions::default(),
        );
        write!(f, "{formatted}")
    }
}

#[cfg(test)]
mod test {
    use insta::assert_snapshot;
    use quell_ast::builder::{field, has};

    use super::*;

    fn queryset() -> SqlQuerySet {
        let schema = Rc::new(
            Schema::new()
                .with_table(
                    Table::new("order", "id").with_relation("items", "orderitem", "order_id"),
                )
                .with_table(Table::new("orderitem", "id")),
        );
        let session = Rc::new(Session::open_in_memory().unwrap());
        SqlQuerySet::new(session, schema, "order").unwrap()
    }

    #[test]
    fn bare_queryset_selects_everything() {
        assert_snapshot!(queryset().to_sql(), @r###"SELECT * FROM "order""###);
    }

    #[test]
    fn filter_accumulates_clauses() {
        let queryset = queryset()
            .filter(field("total").gte(100.0))
            .filter(field("total").lt(500.0));
        assert_snapshot!(
            queryset.to_sql(),
            @r###"SELECT * FROM "order" WHERE "order"."total" >= 100.0 AND "order"."total" < 500.0"###
        );
    }

    #[test]
    fn exclude_negates_the_conjunction() {
        let queryset = queryset().exclude(has("items"));
        assert_snapshot!(
            queryset.to_sql(),
            @r###"SELECT * FROM "order" WHERE NOT EXISTS (SELECT 1 FROM "orderitem" WHERE "orderitem"."order_id" = "order"."id")"###
        );
    }

    #[test]
    fn order_by_prepends_primary_keys() {
        let queryset = queryset()
            .order_by(field("reference"))
            .order_by(-field("total"));
        assert_snapshot!(
            queryset.to_sql(),
            @r###"SELECT * FROM "order" ORDER BY "order"."total" DESC, "order"."reference""###
        );
    }

    #[test]
    fn refinement_leaves_the_original_untouched() {
        let queryset = queryset();
        let _refined = queryset.filter(field("total").gte(100.0));
        assert_snapshot!(queryset.to_sql(), @r###"SELECT * FROM "order""###);
    }

    #[test]
    fn unsupported_refinements_fail_at_materialization() {
        let queryset = queryset().filter(field("items").index(0).eq(1));
        let error = queryset.execute().unwrap_err();
        assert!(error.to_string().contains("unsupported"));
    }
}
