//! Constant folding over the tree.
//!
//! Folds literal arithmetic, comparisons and prefix operators, strips
//! parentheses and prunes `if` arms whose condition is a literal. Running
//! the pass twice gives the same tree as running it once.

use super::*;

impl Statement {
    /// Folds constants in this statement and everything below it.
    pub fn simplify(&mut self) {
        match &mut self.kind {
            StatementKind::Expression(expr) | StatementKind::Throw(expr) => expr.simplify(),
            StatementKind::If(stmt) => stmt.simplify(),
            StatementKind::Try(stmt) => {
                simplify_block(&mut stmt.body);
                simplify_block(&mut stmt.catch);
            }
            StatementKind::ForEach(stmt) => {
                stmt.iterable.simplify();
                simplify_block(&mut stmt.body);
            }
            StatementKind::NumericFor(stmt) => {
                stmt.from.simplify();
                stmt.to.simplify();
                simplify_block(&mut stmt.body);
            }
            StatementKind::While(stmt) => {
                stmt.condition.simplify();
                simplify_block(&mut stmt.body);
            }
            StatementKind::Return(values) => values.iter_mut().for_each(Expression::simplify),
            StatementKind::Module(stmt) => simplify_block(&mut stmt.body),
            StatementKind::Var(stmt) => stmt.values.iter_mut().for_each(Expression::simplify),
            StatementKind::Switch(stmt) => {
                stmt.subject.simplify();
                simplify_clauses(&mut stmt.clauses);
            }
            StatementKind::Select(stmt) => simplify_clauses(&mut stmt.clauses),
            StatementKind::Assign(stmt) => {
                stmt.targets.iter_mut().for_each(Expression::simplify);
                stmt.values.iter_mut().for_each(Expression::simplify);
            }
            StatementKind::Break | StatementKind::Continue => {}
        }
    }
}

/// Simplifies every statement of a block.
pub fn simplify_block(block: &mut [Statement]) {
    block.iter_mut().for_each(Statement::simplify);
}

fn simplify_clauses(clauses: &mut [Clause]) {
    for clause in clauses {
        match clause {
            Clause::Case(case) => {
                case.test.simplify();
                simplify_block(&mut case.body);
            }
            Clause::Default(default) => simplify_block(&mut default.body),
        }
    }
}

impl IfStatement {
    fn simplify(&mut self) {
        self.condition.simplify();
        simplify_block(&mut self.then);
        for arm in &mut self.else_ifs {
            arm.condition.simplify();
            simplify_block(&mut arm.body);
        }
        simplify_block(&mut self.otherwise);

        // a literal true ends the chain; a literal false drops its arm
        loop {
            match self.condition.literal_truth() {
                Some(true) => {
                    self.else_ifs.clear();
                    self.otherwise.clear();
                    return;
                }
                Some(false) if !self.else_ifs.is_empty() => {
                    let next = self.else_ifs.remove(0);
                    self.condition = next.condition;
                    self.then = next.body;
                }
                _ => break,
            }
        }
        self.else_ifs
            .retain(|arm| arm.condition.literal_truth() != Some(false));
        if let Some(cut) = self
            .else_ifs
            .iter()
            .position(|arm| arm.condition.literal_truth() == Some(true))
        {
            let arm = self.else_ifs.remove(cut);
            self.else_ifs.truncate(cut);
            self.otherwise = arm.body;
        }
    }
}

impl Expression {
    /// Folds constants in place.
    pub fn simplify(&mut self) {
        let kind = std::mem::replace(&mut self.kind, ExpressionKind::Literal(Constant::Nil));
        self.kind = fold(kind);
    }

    /// Returns the boolean value of a literal condition.
    pub fn literal_truth(&self) -> Option<bool> {
        match &self.kind {
            ExpressionKind::Literal(Constant::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    fn literal(&self) -> Option<&Constant> {
        match &self.kind {
            ExpressionKind::Literal(c) => Some(c),
            _ => None,
        }
    }
}

fn simplify_boxed(expr: &mut Box<Expression>) {
    expr.as_mut().simplify();
}

fn fold(kind: ExpressionKind) -> ExpressionKind {
    match kind {
        ExpressionKind::Number(text) => match parse_number(&text) {
            Some(constant) => ExpressionKind::Literal(constant),
            None => ExpressionKind::Number(text),
        },
        ExpressionKind::Paren(mut inner) => {
            inner.simplify();
            inner.kind
        }
        ExpressionKind::Unary { op, mut operand } => {
            operand.simplify();
            match operand.literal().and_then(|c| fold_unary(op, c)) {
                Some(constant) => ExpressionKind::Literal(constant),
                None => ExpressionKind::Unary { op, operand },
            }
        }
        ExpressionKind::Binary {
            op,
            mut lhs,
            mut rhs,
        } => {
            lhs.simplify();
            rhs.simplify();
            let folded = match (lhs.literal(), rhs.literal()) {
                (Some(l), Some(r)) => fold_binary(op, l, r),
                _ => None,
            };
            match folded {
                Some(constant) => ExpressionKind::Literal(constant),
                None => ExpressionKind::Binary { op, lhs, rhs },
            }
        }
        ExpressionKind::Logical {
            op,
            mut lhs,
            mut rhs,
        } => {
            lhs.simplify();
            rhs.simplify();
            match (op, lhs.literal_truth()) {
                (LogicalOp::And, Some(false)) | (LogicalOp::Or, Some(true)) => lhs.kind,
                (LogicalOp::And, Some(true)) | (LogicalOp::Or, Some(false)) => rhs.kind,
                _ => ExpressionKind::Logical { op, lhs, rhs },
            }
        }
        ExpressionKind::Ternary {
            mut condition,
            mut then,
            mut otherwise,
        } => {
            condition.simplify();
            then.simplify();
            otherwise.simplify();
            match condition.literal_truth() {
                Some(true) => then.kind,
                Some(false) => otherwise.kind,
                None => ExpressionKind::Ternary {
                    condition,
                    then,
                    otherwise,
                },
            }
        }
        ExpressionKind::Array(mut items) => {
            items.iter_mut().for_each(Expression::simplify);
            ExpressionKind::Array(items)
        }
        ExpressionKind::Map(mut entries) => {
            entries.iter_mut().for_each(|(_, value)| value.simplify());
            ExpressionKind::Map(entries)
        }
        ExpressionKind::AddressOf(mut inner) => {
            simplify_boxed(&mut inner);
            ExpressionKind::AddressOf(inner)
        }
        ExpressionKind::Deref(mut inner) => {
            simplify_boxed(&mut inner);
            ExpressionKind::Deref(inner)
        }
        ExpressionKind::Call { name, mut call } => {
            call.args.iter_mut().for_each(Expression::simplify);
            ExpressionKind::Call { name, call }
        }
        ExpressionKind::CallValue {
            mut callee,
            mut call,
        } => {
            callee.simplify();
            call.args.iter_mut().for_each(Expression::simplify);
            ExpressionKind::CallValue { callee, call }
        }
        ExpressionKind::Member { mut object, name } => {
            object.simplify();
            ExpressionKind::Member { object, name }
        }
        ExpressionKind::Item {
            mut value,
            mut index,
        } => {
            value.simplify();
            index.simplify();
            ExpressionKind::Item { value, index }
        }
        ExpressionKind::Slice {
            mut value,
            mut begin,
            mut end,
        } => {
            value.simplify();
            begin.iter_mut().for_each(simplify_boxed);
            end.iter_mut().for_each(simplify_boxed);
            ExpressionKind::Slice { value, begin, end }
        }
        ExpressionKind::Function(mut func) => {
            simplify_block(&mut func.body);
            ExpressionKind::Function(func)
        }
        ExpressionKind::Cast { mut value, mut ty } => {
            value.simplify();
            if let TypeRef::Dynamic(expr) = &mut ty {
                expr.simplify();
            }
            ExpressionKind::Cast { value, ty }
        }
        ExpressionKind::Make(mut ty) => {
            if let TypeRef::Dynamic(expr) = &mut ty {
                expr.simplify();
            }
            ExpressionKind::Make(ty)
        }
        ExpressionKind::MakeChan(mut size) => {
            size.iter_mut().for_each(simplify_boxed);
            ExpressionKind::MakeChan(size)
        }
        ExpressionKind::MakeArray { mut len, mut cap } => {
            len.simplify();
            cap.iter_mut().for_each(simplify_boxed);
            ExpressionKind::MakeArray { len, cap }
        }
        ExpressionKind::Channel { mut lhs, mut rhs } => {
            lhs.iter_mut().for_each(simplify_boxed);
            rhs.simplify();
            ExpressionKind::Channel { lhs, rhs }
        }
        ExpressionKind::Compound {
            op,
            mut target,
            mut value,
        } => {
            target.simplify();
            value.iter_mut().for_each(simplify_boxed);
            ExpressionKind::Compound { op, target, value }
        }
        other @ (ExpressionKind::Literal(_) | ExpressionKind::Str(_) | ExpressionKind::Ident(_)) => {
            other
        }
    }
}

/// Parses numeric literal text into an integer or float constant.
pub fn parse_number(text: &str) -> Option<Constant> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Some(Constant::Int(n));
    }
    text.parse::<f64>().ok().map(Constant::Float)
}

fn fold_unary(op: UnaryOp, operand: &Constant) -> Option<Constant> {
    match (op, operand) {
        (UnaryOp::Neg, Constant::Int(n)) => n.checked_neg().map(Constant::Int),
        (UnaryOp::Neg, Constant::Float(n)) => Some(Constant::Float(-n)),
        (UnaryOp::Not, Constant::Bool(b)) => Some(Constant::Bool(!b)),
        (UnaryOp::BitNot, Constant::Int(n)) => Some(Constant::Int(!n)),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> Option<Constant> {
    use BinaryOp::*;
    match (lhs, rhs) {
        (Constant::Int(a), Constant::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => a.checked_add(b).map(Constant::Int),
                Sub => a.checked_sub(b).map(Constant::Int),
                Mul => a.checked_mul(b).map(Constant::Int),
                // division by zero is left for the runtime to report
                Div => a.checked_div(b).map(Constant::Int),
                Rem => a.checked_rem(b).map(Constant::Int),
                Eq => Some(Constant::Bool(a == b)),
                Ne => Some(Constant::Bool(a != b)),
                Lt => Some(Constant::Bool(a < b)),
                Le => Some(Constant::Bool(a <= b)),
                Gt => Some(Constant::Bool(a > b)),
                Ge => Some(Constant::Bool(a >= b)),
                BitAnd => Some(Constant::Int(a & b)),
                BitOr => Some(Constant::Int(a | b)),
                BitXor => Some(Constant::Int(a ^ b)),
                Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)).map(Constant::Int),
                Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)).map(Constant::Int),
            }
        }
        (Constant::Float(_), Constant::Float(_))
        | (Constant::Int(_), Constant::Float(_))
        | (Constant::Float(_), Constant::Int(_)) => {
            let a = as_float(lhs)?;
            let b = as_float(rhs)?;
            match op {
                Add => Some(Constant::Float(a + b)),
                Sub => Some(Constant::Float(a - b)),
                Mul => Some(Constant::Float(a * b)),
                Div if b != 0.0 => Some(Constant::Float(a / b)),
                Lt => Some(Constant::Bool(a < b)),
                Le => Some(Constant::Bool(a <= b)),
                Gt => Some(Constant::Bool(a > b)),
                Ge => Some(Constant::Bool(a >= b)),
                _ => None,
            }
        }
        (Constant::Str(a), Constant::Str(b)) => match op {
            Add => Some(Constant::Str(format!("{}{}", a, b))),
            Eq => Some(Constant::Bool(a == b)),
            Ne => Some(Constant::Bool(a != b)),
            _ => None,
        },
        (Constant::Bool(a), Constant::Bool(b)) => match op {
            Eq => Some(Constant::Bool(a == b)),
            Ne => Some(Constant::Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn as_float(c: &Constant) -> Option<f64> {
    match c {
        Constant::Int(n) => Some(*n as f64),
        Constant::Float(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interner::Ident;

    #[test]
    fn test_fold_arithmetic() {
        let mut expr = Expression::binary(
            BinaryOp::Add,
            Expression::int(2),
            Expression::binary(BinaryOp::Mul, Expression::int(3), Expression::number("4")),
        );
        expr.simplify();
        assert_eq!(expr.kind, ExpressionKind::Literal(Constant::Int(14)));
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let mut expr = Expression::binary(BinaryOp::Div, Expression::int(1), Expression::int(0));
        expr.simplify();
        assert!(matches!(expr.kind, ExpressionKind::Binary { .. }));
    }

    #[test]
    fn test_paren_and_unary() {
        let mut expr = Expression::unary(
            UnaryOp::Neg,
            Expression::new(ExpressionKind::Paren(Box::new(Expression::int(5)))),
        );
        expr.simplify();
        assert_eq!(expr.kind, ExpressionKind::Literal(Constant::Int(-5)));
    }

    #[test]
    fn test_identifiers_are_kept() {
        let x = Ident(0);
        let mut expr = Expression::binary(BinaryOp::Add, Expression::ident(x), Expression::int(1));
        expr.simplify();
        assert!(matches!(expr.kind, ExpressionKind::Binary { .. }));
    }

    #[test]
    fn test_if_pruning() {
        let x = Ident(0);
        let mut stmt = Statement::new(StatementKind::If(IfStatement {
            condition: Expression::binary(BinaryOp::Lt, Expression::int(2), Expression::int(1)),
            then: vec![Statement::set(x, Expression::int(1))],
            else_ifs: vec![ElseIf {
                condition: Expression::ident(x),
                body: vec![Statement::set(x, Expression::int(2))],
                pos: Position::default(),
            }],
            otherwise: vec![Statement::set(x, Expression::int(3))],
        }));
        stmt.simplify();
        let StatementKind::If(if_stmt) = &stmt.kind else {
            panic!("expected if");
        };
        // the false first arm is replaced by the elseif arm
        assert_eq!(if_stmt.condition, Expression::ident(x));
        assert!(if_stmt.else_ifs.is_empty());
        assert_eq!(if_stmt.otherwise.len(), 1);
    }

    #[test]
    fn test_simplify_is_idempotent() {
        let x = Ident(0);
        let mut stmt = Statement::while_loop(
            Expression::logical(LogicalOp::And, Expression::bool(true), Expression::ident(x)),
            vec![Statement::set(
                x,
                Expression::binary(BinaryOp::Sub, Expression::int(10), Expression::int(4)),
            )],
        );
        stmt.simplify();
        let once = stmt.clone();
        stmt.simplify();
        assert_eq!(once, stmt);
    }
}
