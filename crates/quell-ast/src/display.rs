//! Source-like rendering of expressions, for logs and error messages.

use std::fmt::{self, Display, Formatter};

use crate::expr::{Expr, ExprKind, Operand, UnOp};
use crate::value::Value;

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Field(name) => f.write_str(name),
            ExprKind::GetAttr { name, parent } => {
                write!(f, "{parent}.")?;
                match name {
                    Operand::Value(Value::String(name)) => f.write_str(name),
                    other => write_operand(f, other),
                }
            }
            ExprKind::GetItem { key, parent } => {
                write!(f, "{parent}[")?;
                write_operand(f, key)?;
                f.write_str("]")
            }
            ExprKind::Call { args, parent } => {
                write!(f, "{parent}(")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write_operand(f, arg)?;
                }
                f.write_str(")")
            }
            ExprKind::Literal(value) => write!(f, "{value}"),
            ExprKind::Binary(binary) => {
                for (index, operand) in binary.operands.iter().enumerate() {
                    if index > 0 {
                        write!(f, " {} ", binary.op)?;
                    }
                    write_operand(f, operand)?;
                }
                Ok(())
            }
            ExprKind::Unary(unary) => {
                write!(f, "{}", unary.op)?;
                if unary.op == UnOp::Not {
                    write_operand(f, &unary.operand)
                } else {
                    match &unary.operand {
                        Operand::Expr(expr) if expr.kind.is_binary() => write!(f, "({expr})"),
                        other => write_operand(f, other),
                    }
                }
            }
            ExprKind::Aggregation(agg) => {
                write!(f, "{}({})", agg.kind, agg.field)?;
                if let Some(query) = &agg.query {
                    write!(f, ".where({query})")?;
                }
                Ok(())
            }
        }
    }
}

/// Operands that are themselves compound expressions are parenthesized;
/// precedence is not reconstructed from operator tables.
fn write_operand(f: &mut Formatter<'_>, operand: &Operand) -> fmt::Result {
    match operand {
        Operand::Expr(expr) if expr.kind.is_binary() || expr.kind.is_unary() => {
            write!(f, "({expr})")
        }
        Operand::Expr(expr) => write!(f, "{expr}"),
        Operand::Value(value) => write!(f, "{value}"),
    }
}

#[cfg(test)]
mod test {
    use insta::assert_snapshot;

    use crate::builder::{count, field, has, lit};

    #[test]
    fn expressions_render_like_source() {
        assert_snapshot!(field("points").gte(1000), @"points >= 1000");
        assert_snapshot!(
            count("items").where_(field("quantity").gt(0)).eq(0),
            @"count(items).where(quantity > 0) == 0"
        );
        assert_snapshot!(
            has("giftcards").where_(field("reason").eq("welcome giftcard")),
            @r###"has(giftcards).where(reason == "welcome giftcard")"###
        );
        assert_snapshot!(field("cart").attr("items").index(0), @"cart.items[0]");
        assert_snapshot!((lit(10) + field("x")) * 2, @"(10 + x) * 2");
        assert_snapshot!(
            !(field("a").eq(1) & field("b").eq(2)),
            @"~((a == 1) & (b == 2))"
        );
        assert_snapshot!(-field("total"), @"-total");
    }
}
