//! Operator overloading over [Expr]. Rust has no overloadable comparison
//! operators returning a non-`bool`, so comparisons stay builder methods on
//! [Expr]; everything else uses the real operator.

use std::ops;

use crate::expr::{BinOp, BinaryExpr, Expr, ExprKind, Operand, UnOp};

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Operand>> ops::$trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, [self.into(), rhs.into()])
            }
        }
    };
}

impl_binary_op!(Add, add, BinOp::Add);
impl_binary_op!(Sub, sub, BinOp::Sub);
impl_binary_op!(Mul, mul, BinOp::Mul);
impl_binary_op!(Div, div, BinOp::Div);
impl_binary_op!(Rem, rem, BinOp::Mod);
impl_binary_op!(BitAnd, bitand, BinOp::And);
impl_binary_op!(BitOr, bitor, BinOp::Or);

impl ops::Not for Expr {
    type Output = Expr;

    /// Logical negation. Comparisons invert by rewrite (`!Eq` is `Ne`,
    /// `!Gt` is `Lte`, ...), and double negation unwraps to the original
    /// operand.
    fn not(self) -> Expr {
        match self.kind {
            ExprKind::Binary(binary) => match binary.op.inverse() {
                Some(op) => Expr::new(ExprKind::Binary(BinaryExpr {
                    op,
                    operands: binary.operands,
                })),
                None => wrap_unary(UnOp::Not, ExprKind::Binary(binary)),
            },
            ExprKind::Unary(unary) if unary.op == UnOp::Not => unwrap_operand(unary.operand),
            kind => wrap_unary(UnOp::Not, kind),
        }
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        match self.kind {
            ExprKind::Unary(unary) if unary.op == UnOp::Neg => unwrap_operand(unary.operand),
            kind => wrap_unary(UnOp::Neg, kind),
        }
    }
}

fn wrap_unary(op: UnOp, kind: ExprKind) -> Expr {
    Expr::unary(op, Expr::new(kind))
}

fn unwrap_operand(operand: Operand) -> Expr {
    match operand {
        Operand::Expr(expr) => *expr,
        Operand::Value(value) => Expr::literal(value),
    }
}

#[cfg(test)]
mod test {
    use crate::builder::{field, has, lit};
    use crate::expr::{BinOp, ExprKind, UnOp};

    #[test]
    fn arithmetic_operators_build_nodes() {
        let expr = field("price") * 2 + field("shipping");
        let binary = expr.kind.as_binary().unwrap();
        assert_eq!(binary.op, BinOp::Add);
    }

    #[test]
    fn comparisons_invert_by_rewrite() {
        let inverted = !field("points").gte(1000);
        let binary = inverted.kind.as_binary().unwrap();
        assert_eq!(binary.op, BinOp::Lt);
    }

    #[test]
    fn double_negation_collapses() {
        let has_items = has("items");
        assert_eq!(!!has_items.clone(), has_items);

        let total = field("total");
        assert_eq!(-(-total.clone()), total);
    }

    #[test]
    fn negating_a_conjunction_keeps_the_not_node() {
        let expr = !(field("a").eq(1) & field("b").eq(2));
        let unary = expr.kind.as_unary().unwrap();
        assert_eq!(unary.op, UnOp::Not);
    }

    #[test]
    fn literals_participate() {
        let expr = lit(10) + field("x");
        assert!(matches!(expr.kind, ExprKind::Binary(_)));
    }
}
