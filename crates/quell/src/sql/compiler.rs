//! Lowers expressions into [sqlparser] nodes against a [Table].

use std::rc::Rc;

use itertools::Itertools;
use sqlparser::ast::{
    self as sql_ast, BinaryOperator, Function, FunctionArg, FunctionArgExpr, ObjectName, Select,
    SelectItem, SetExpr, TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue,
};

use quell_ast::error::{Error, Result};
use quell_ast::expr::{AggKind, Aggregation, BinOp, Expr, ExprKind, Operand, UnOp};
use quell_ast::value::Value;

use super::schema::{Schema, Table};

#[derive(Clone)]
pub struct SqlCompiler {
    schema: Rc<Schema>,
}

impl SqlCompiler {
    pub fn new(schema: Rc<Schema>) -> Self {
        SqlCompiler { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Lower `node` to a clause over `table`'s columns.
    pub fn compile(&self, node: &Expr, table: &Table) -> Result<sql_ast::Expr> {
        Ok(match &node.kind {
            ExprKind::Field(name) => column(&table.name, name),

            // traversing a relationship to a child column
            ExprKind::GetAttr { name, parent } => match (&parent.kind, name) {
                (ExprKind::Field(relation_name), Operand::Value(Value::String(column_name))) => {
                    let relation = table.relation(relation_name).ok_or_else(|| {
                        Error::access(relation_name.clone()).with_help(format!(
                            "table `{}` has no relation `{relation_name}`",
                            table.name
                        ))
                    })?;
                    let child = self.schema.table(&relation.table)?;
                    column(&child.name, column_name)
                }
                _ => {
                    return Err(
                        Error::unsupported("attribute access beyond a relation's column").into(),
                    )
                }
            },

            ExprKind::Literal(value) => translate_literal(value)?,

            ExprKind::Binary(binary) if binary.op.is_boolean() => {
                let op = translate_operator(binary.op)?;
                let operands: Vec<sql_ast::Expr> = binary
                    .operands
                    .iter()
                    .map(|operand| self.compile_operand(operand, table))
                    .try_collect()?;
                // pairwise over consecutive operands, joined with AND, so
                // n-ary chains mean the same thing as in-memory
                let mut pairs = operands.windows(2);
                let Some(first) = pairs.next() else {
                    return Err(
                        Error::unsupported("a boolean node with fewer than two operands").into(),
                    );
                };
                let mut clause = translate_binary(first[0].clone(), op.clone(), first[1].clone());
                for pair in pairs {
                    let next = translate_binary(pair[0].clone(), op.clone(), pair[1].clone());
                    clause = translate_binary(clause, BinaryOperator::And, next);
                }
                clause
            }

            ExprKind::Binary(binary) => {
                let op = translate_operator(binary.op)?;
                let operands: Vec<sql_ast::Expr> = binary
                    .operands
                    .iter()
                    .map(|operand| self.compile_operand(operand, table))
                    .try_collect()?;
                let mut operands = operands.into_iter();
                let Some(mut clause) = operands.next() else {
                    return Err(Error::unsupported("a binary node with no operands").into());
                };
                // SQLite divides integers integrally; promote the left side
                // so `/` stays true division like the in-memory evaluator
                if binary.op == BinOp::Div {
                    clause = translate_binary(clause, BinaryOperator::Multiply, number("1.0"));
                }
                for operand in operands {
                    clause = translate_binary(clause, op.clone(), operand);
                }
                clause
            }

            ExprKind::Unary(unary) => {
                let op = match unary.op {
                    UnOp::Not => UnaryOperator::Not,
                    UnOp::Neg => UnaryOperator::Minus,
                };
                let operand = self.compile_operand(&unary.operand, table)?;
                sql_ast::Expr::UnaryOp {
                    op,
                    expr: nest_operand(operand, op.binding_strength(), false),
                }
            }

            ExprKind::Aggregation(agg) => self.compile_aggregation(agg, table)?,

            ExprKind::GetItem { .. } => {
                return Err(Error::unsupported("index access in SQL").into())
            }
            ExprKind::Call { .. } => {
                return Err(Error::unsupported("method calls in SQL").into())
            }
        })
    }

    fn compile_operand(&self, operand: &Operand, table: &Table) -> Result<sql_ast::Expr> {
        match operand {
            Operand::Expr(expr) => self.compile(expr, table),
            Operand::Value(value) => translate_literal(value),
        }
    }

    /// Correlated subqueries over the related table: `EXISTS` for `has`,
    /// scalar aggregates for `count`, `sum` and `mean`. The child table is
    /// resolved directly through the relationship metadata.
    fn compile_aggregation(&self, agg: &Aggregation, table: &Table) -> Result<sql_ast::Expr> {
        let (collection, projection) = agg.collection_and_projection();
        let relation = table.relation(collection).ok_or_else(|| {
            Error::access(collection).with_help(format!(
                "table `{}` has no relation `{collection}`",
                table.name
            ))
        })?;
        let child = self.schema.table(&relation.table)?;

        let mut selection = translate_binary(
            column(&child.name, &relation.foreign_key),
            BinaryOperator::Eq,
            column(&table.name, &table.primary_key),
        );
        if let Some(query) = &agg.query {
            let inner = self.compile(query, child)?;
            selection = translate_binary(selection, BinaryOperator::And, inner);
        }

        Ok(match agg.kind {
            AggKind::Has => sql_ast::Expr::Exists {
                subquery: Box::new(select_from(
                    &child.name,
                    vec![SelectItem::UnnamedExpr(number("1"))],
                    Some(selection),
                )),
                negated: false,
            },
            AggKind::Count => sql_ast::Expr::Subquery(Box::new(select_from(
                &child.name,
                vec![SelectItem::UnnamedExpr(function(
                    "COUNT",
                    vec![FunctionArgExpr::Wildcard],
                ))],
                Some(selection),
            ))),
            AggKind::Sum | AggKind::Mean => {
                let column_name = projection.ok_or_else(|| {
                    Error::unsupported(format!("`{}({})` in SQL", agg.kind, agg.field)).with_help(
                        "name the projected column, e.g. sum(\"items.line_total\")",
                    )
                })?;
                let projected = FunctionArgExpr::Expr(column(&child.name, column_name));
                let call = match agg.kind {
                    // an empty SUM is NULL in SQL but zero in memory
                    AggKind::Sum => function(
                        "COALESCE",
                        vec![
                            FunctionArgExpr::Expr(function("SUM", vec![projected])),
                            FunctionArgExpr::Expr(number("0")),
                        ],
                    ),
                    _ => function("AVG", vec![projected]),
                };
                sql_ast::Expr::Subquery(Box::new(select_from(
                    &child.name,
                    vec![SelectItem::UnnamedExpr(call)],
                    Some(selection),
                )))
            }
            AggKind::Median | AggKind::Collect => {
                return Err(
                    Error::unsupported(format!("`{}` as a relational clause", agg.kind)).into(),
                )
            }
        })
    }

    /// An ORDER BY key; a negated field sorts descending.
    pub fn compile_sort(&self, field: &Expr, table: &Table) -> Result<sql_ast::OrderByExpr> {
        let (expr, descending) = match &field.kind {
            ExprKind::Unary(unary) if unary.op == UnOp::Neg => {
                let inner = match &unary.operand {
                    Operand::Expr(expr) => (**expr).clone(),
                    Operand::Value(value) => Expr::literal(value.clone()),
                };
                (self.compile(&inner, table)?, true)
            }
            _ => (self.compile(field, table)?, false),
        };
        Ok(sql_ast::OrderByExpr {
            expr,
            // default order is ASC, so there is no need to emit it
            asc: if descending { Some(false) } else { None },
            nulls_first: None,
        })
    }
}

fn translate_operator(op: BinOp) -> Result<BinaryOperator> {
    use BinaryOperator::*;
    Ok(match op {
        BinOp::Eq => Eq,
        BinOp::Ne => NotEq,
        BinOp::Gt => Gt,
        BinOp::Gte => GtEq,
        BinOp::Lt => Lt,
        BinOp::Lte => LtEq,
        BinOp::And => And,
        BinOp::Or => Or,
        BinOp::Add => Plus,
        BinOp::Sub => Minus,
        BinOp::Mul => Multiply,
        BinOp::Div => Divide,
        BinOp::Mod => Modulo,
        BinOp::FloorDiv | BinOp::Pow => {
            return Err(
                Error::unsupported(format!("operator `{op}` has no SQLite lowering")).into(),
            )
        }
    })
}

fn translate_literal(value: &Value) -> Result<sql_ast::Expr> {
    Ok(match value {
        Value::Null => sql_ast::Expr::Value(SqlValue::Null),
        Value::Boolean(b) => sql_ast::Expr::Value(SqlValue::Boolean(*b)),
        Value::Integer(i) => number(&format!("{i}")),
        Value::Float(f) => number(&format!("{f:?}")),
        Value::String(s) => sql_ast::Expr::Value(SqlValue::SingleQuotedString(s.clone())),
        Value::List(_) | Value::Record(_) => {
            return Err(Error::unsupported(format!(
                "a {} as a bound SQL parameter",
                value.type_name()
            ))
            .into())
        }
    })
}

fn translate_binary(
    left: sql_ast::Expr,
    op: BinaryOperator,
    right: sql_ast::Expr,
) -> sql_ast::Expr {
    let strength = op.binding_strength();
    let left = nest_operand(left, strength, !op.associates_left());
    let right = nest_operand(right, strength, !op.associates_right());
    sql_ast::Expr::BinaryOp { left, op, right }
}

/// Wrap the operand in parentheses when its binding strength is below the
/// parent operator's (or equal, where associativity demands it).
fn nest_operand(
    expr: sql_ast::Expr,
    parent_strength: i32,
    fix_associativity: bool,
) -> Box<sql_ast::Expr> {
    let strength = expr.binding_strength();
    let needs_nesting =
        strength < parent_strength || (strength == parent_strength && fix_associativity);
    if needs_nesting {
        Box::new(sql_ast::Expr::Nested(Box::new(expr)))
    } else {
        Box::new(expr)
    }
}

enum Associativity {
    Left,
    Both,
}

trait SqlExpression {
    /// Binding strength of an SQL expression or operator, after
    /// https://www.postgresql.org/docs/14/sql-syntax-lexical.html#id-1.5.3.5.13.2
    fn binding_strength(&self) -> i32;

    fn associativity(&self) -> Associativity {
        Associativity::Both
    }

    /// Returns true iff `a + b + c = (a + b) + c`
    fn associates_left(&self) -> bool {
        matches!(self.associativity(), Associativity::Left | Associativity::Both)
    }

    /// Returns true iff `a + b + c = a + (b + c)`
    fn associates_right(&self) -> bool {
        matches!(self.associativity(), Associativity::Both)
    }
}

impl SqlExpression for sql_ast::Expr {
    fn binding_strength(&self) -> i32 {
        // Strength of an expression depends only on the top-level operator,
        // because all other nested expressions can only have lower strength
        match self {
            sql_ast::Expr::BinaryOp { op, .. } => op.binding_strength(),
            sql_ast::Expr::UnaryOp { op, .. } => op.binding_strength(),
            // all other node types bind stronger (function calls, literals,
            // parenthesized subqueries, ...)
            _ => 20,
        }
    }

    fn associativity(&self) -> Associativity {
        match self {
            sql_ast::Expr::BinaryOp { op, .. } => op.associativity(),
            _ => Associativity::Both,
        }
    }
}

impl SqlExpression for BinaryOperator {
    fn binding_strength(&self) -> i32 {
        use BinaryOperator::*;
        match self {
            Modulo | Multiply | Divide => 11,
            Minus | Plus => 10,
            Gt | Lt | GtEq | LtEq | Eq | NotEq => 6,
            And => 3,
            Or => 2,
            _ => 9,
        }
    }

    fn associativity(&self) -> Associativity {
        use BinaryOperator::*;
        match self {
            Minus | Divide => Associativity::Left,
            _ => Associativity::Both,
        }
    }
}

impl SqlExpression for UnaryOperator {
    fn binding_strength(&self) -> i32 {
        match self {
            UnaryOperator::Minus | UnaryOperator::Plus => 13,
            UnaryOperator::Not => 4,
            _ => 9,
        }
    }
}

pub(super) fn combine_and(left: sql_ast::Expr, right: sql_ast::Expr) -> sql_ast::Expr {
    translate_binary(left, BinaryOperator::And, right)
}

pub(super) fn negate(expr: sql_ast::Expr) -> sql_ast::Expr {
    let op = UnaryOperator::Not;
    sql_ast::Expr::UnaryOp {
        op,
        expr: nest_operand(expr, op.binding_strength(), false),
    }
}

pub(super) fn quoted_ident(name: &str) -> sql_ast::Ident {
    sql_ast::Ident::with_quote('"', name)
}

pub(super) fn column(table: &str, column: &str) -> sql_ast::Expr {
    sql_ast::Expr::CompoundIdentifier(vec![quoted_ident(table), quoted_ident(column)])
}

pub(super) fn number(text: &str) -> sql_ast::Expr {
    sql_ast::Expr::Value(SqlValue::Number(text.to_string(), false))
}

pub(super) fn function(name: &str, args: Vec<FunctionArgExpr>) -> sql_ast::Expr {
    sql_ast::Expr::Function(Function {
        name: ObjectName(vec![sql_ast::Ident::new(name)]),
        args: args.into_iter().map(FunctionArg::Unnamed).collect(),
        over: None,
        distinct: false,
        special: false,
        order_by: Vec::new(),
    })
}

pub(super) fn select_from(
    table: &str,
    projection: Vec<SelectItem>,
    selection: Option<sql_ast::Expr>,
) -> sql_ast::Query {
    default_query(SetExpr::Select(Box::new(Select {
        projection,
        from: vec![TableWithJoins {
            relation: TableFactor::Table {
                name: ObjectName(vec![quoted_ident(table)]),
                alias: None,
                args: None,
                with_hints: vec![],
            },
            joins: vec![],
        }],
        selection,
        ..default_select()
    })))
}

/// A bare scalar SELECT with no FROM, e.g. `SELECT EXISTS (...)`.
pub(super) fn select_scalar(projection: Vec<SelectItem>) -> sql_ast::Query {
    default_query(SetExpr::Select(Box::new(Select {
        projection,
        ..default_select()
    })))
}

pub(super) fn default_query(body: SetExpr) -> sql_ast::Query {
    sql_ast::Query {
        with: None,
        body: Box::new(body),
        order_by: Vec::new(),
        limit: None,
        offset: None,
        fetch: None,
        locks: Vec::new(),
    }
}

fn default_select() -> Select {
    Select {
        distinct: None,
        top: None,
        projection: Vec::new(),
        into: None,
        from: Vec::new(),
        lateral_views: Vec::new(),
        selection: None,
        group_by: Vec::new(),
        cluster_by: Vec::new(),
        distribute_by: Vec::new(),
        sort_by: Vec::new(),
        having: None,
        named_window: Vec::new(),
        qualify: None,
    }
}

#[cfg(test)]
mod test {
    use insta::assert_snapshot;
    use quell_ast::builder::{count, field, has, sum};

    use super::*;

    fn schema() -> Rc<Schema> {
        Rc::new(
            Schema::new()
                .with_table(
                    Table::new("order", "id").with_relation("items", "orderitem", "order_id"),
                )
                .with_table(Table::new("orderitem", "id")),
        )
    }

    fn compile(expr: &Expr) -> String {
        let schema = schema();
        let compiler = SqlCompiler::new(schema.clone());
        let table = schema.table("order").unwrap();
        compiler.compile(expr, table).unwrap().to_string()
    }

    #[test]
    fn columns_and_comparisons() {
        assert_snapshot!(
            compile(&field("total").gte(499.0)),
            @r###""order"."total" >= 499.0"###
        );
        assert_snapshot!(
            compile(&field("reference").eq("A-1")),
            @r###""order"."reference" = 'A-1'"###
        );
    }

    #[test]
    fn conjunction_and_negation() {
        assert_snapshot!(
            compile(&(field("total").gte(100) & field("total").lt(500))),
            @r###""order"."total" >= 100 AND "order"."total" < 500"###
        );
        assert_snapshot!(
            compile(&!(field("total").gte(100) & field("total").lt(500))),
            @r###"NOT ("order"."total" >= 100 AND "order"."total" < 500)"###
        );
    }

    #[test]
    fn comparison_inversion_rewrites_the_operator() {
        assert_snapshot!(
            compile(&!field("total").gte(100)),
            @r###""order"."total" < 100"###
        );
    }

    #[test]
    fn chained_comparisons_expand_pairwise() {
        let expr = Expr::binary(
            BinOp::Lt,
            [
                Operand::from(field("subtotal")),
                Operand::from(field("total")),
                Operand::from(1000),
            ],
        );
        assert_snapshot!(
            compile(&expr),
            @r###""order"."subtotal" < "order"."total" AND "order"."total" < 1000"###
        );
    }

    #[test]
    fn arithmetic_nests_by_binding_strength() {
        assert_snapshot!(
            compile(&((field("total") + 10) * 2)),
            @r###"("order"."total" + 10) * 2"###
        );
        assert_snapshot!(
            compile(&(field("total") / 2)),
            @r###""order"."total" * 1.0 / 2"###
        );
    }

    #[test]
    fn has_lowers_to_a_correlated_exists() {
        assert_snapshot!(
            compile(&has("items")),
            @r###"EXISTS (SELECT 1 FROM "orderitem" WHERE "orderitem"."order_id" = "order"."id")"###
        );
        assert_snapshot!(
            compile(&has("items").where_(field("line_total").gte(1000.0))),
            @r###"EXISTS (SELECT 1 FROM "orderitem" WHERE "orderitem"."order_id" = "order"."id" AND "orderitem"."line_total" >= 1000.0)"###
        );
    }

    #[test]
    fn count_lowers_to_a_scalar_subquery() {
        assert_snapshot!(
            compile(&count("items").eq(0)),
            @r###"(SELECT COUNT(*) FROM "orderitem" WHERE "orderitem"."order_id" = "order"."id") = 0"###
        );
    }

    #[test]
    fn sum_projects_the_last_path_segment() {
        assert_snapshot!(
            compile(&sum("items.line_total").gte(100)),
            @r###"(SELECT COALESCE(SUM("orderitem"."line_total"), 0) FROM "orderitem" WHERE "orderitem"."order_id" = "order"."id") >= 100"###
        );
    }

    #[test]
    fn relation_columns_resolve_through_the_child_mapper() {
        assert_snapshot!(
            compile(&field("items").attr("line_total")),
            @r###""orderitem"."line_total""###
        );
    }

    #[test]
    fn unsupported_constructs_are_reported() {
        let error = {
            let schema = schema();
            let compiler = SqlCompiler::new(schema.clone());
            let table = schema.table("order").unwrap();
            compiler
                .compile(&field("items").index(0), table)
                .unwrap_err()
        };
        assert!(error.to_string().contains("unsupported"));
    }
}
