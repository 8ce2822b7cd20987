//! Constructors for building trees by hand.
//!
//! Front ends and tests use these instead of spelling out every struct.
//! Positions default to zero; chain [`Expression::at`] / [`Statement::at`]
//! to attach one.

use super::*;

impl Expression {
    /// Wraps `kind` with an unknown position.
    pub fn new(kind: ExpressionKind) -> Self {
        Self {
            kind,
            pos: Position::default(),
        }
    }

    /// Sets the source position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.pos = Position::new(line, column);
        self
    }

    /// Integer literal.
    pub fn int(n: i64) -> Self {
        Self::new(ExpressionKind::Literal(Constant::Int(n)))
    }

    /// Float literal.
    pub fn float(n: f64) -> Self {
        Self::new(ExpressionKind::Literal(Constant::Float(n)))
    }

    /// Boolean literal.
    pub fn bool(b: bool) -> Self {
        Self::new(ExpressionKind::Literal(Constant::Bool(b)))
    }

    /// The absent value.
    pub fn nil() -> Self {
        Self::new(ExpressionKind::Literal(Constant::Nil))
    }

    /// Numeric literal kept as source text.
    pub fn number(text: &str) -> Self {
        Self::new(ExpressionKind::Number(text.to_string()))
    }

    /// String literal.
    pub fn string(s: &str) -> Self {
        Self::new(ExpressionKind::Str(s.to_string()))
    }

    /// Variable reference.
    pub fn ident(id: Ident) -> Self {
        Self::new(ExpressionKind::Ident(id))
    }

    /// Array literal.
    pub fn array(items: Vec<Expression>) -> Self {
        Self::new(ExpressionKind::Array(items))
    }

    /// Map literal.
    pub fn map(entries: Vec<(&str, Expression)>) -> Self {
        Self::new(ExpressionKind::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        ))
    }

    /// Prefix operator.
    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Self::new(ExpressionKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// Eager infix operator.
    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Self::new(ExpressionKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Short-circuit operator.
    pub fn logical(op: LogicalOp, lhs: Expression, rhs: Expression) -> Self {
        Self::new(ExpressionKind::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Conditional expression.
    pub fn ternary(condition: Expression, then: Expression, otherwise: Expression) -> Self {
        Self::new(ExpressionKind::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// Call by name.
    pub fn call(name: Ident, args: Vec<Expression>) -> Self {
        Self::new(ExpressionKind::Call {
            name,
            call: CallArgs {
                args,
                ..CallArgs::default()
            },
        })
    }

    /// Call by name, launched as a concurrent task.
    pub fn launch(name: Ident, args: Vec<Expression>) -> Self {
        Self::new(ExpressionKind::Call {
            name,
            call: CallArgs {
                args,
                variadic: false,
                launch: true,
            },
        })
    }

    /// Call of a function value.
    pub fn call_value(callee: Expression, args: Vec<Expression>) -> Self {
        Self::new(ExpressionKind::CallValue {
            callee: Box::new(callee),
            call: CallArgs {
                args,
                ..CallArgs::default()
            },
        })
    }

    /// `object.name`.
    pub fn member(object: Expression, name: Ident) -> Self {
        Self::new(ExpressionKind::Member {
            object: Box::new(object),
            name,
        })
    }

    /// `value[index]`.
    pub fn item(value: Expression, index: Expression) -> Self {
        Self::new(ExpressionKind::Item {
            value: Box::new(value),
            index: Box::new(index),
        })
    }

    /// `value[begin:end]`.
    pub fn slice(value: Expression, begin: Option<Expression>, end: Option<Expression>) -> Self {
        Self::new(ExpressionKind::Slice {
            value: Box::new(value),
            begin: begin.map(Box::new),
            end: end.map(Box::new),
        })
    }

    /// Anonymous function literal.
    pub fn function(params: Vec<Ident>, body: Vec<Statement>) -> Self {
        Self::new(ExpressionKind::Function(FunctionLiteral {
            name: None,
            params,
            variadic: false,
            body,
        }))
    }

    /// Named function literal, bound in the defining scope.
    pub fn named_function(name: Ident, params: Vec<Ident>, body: Vec<Statement>) -> Self {
        Self::new(ExpressionKind::Function(FunctionLiteral {
            name: Some(name),
            params,
            variadic: false,
            body,
        }))
    }

    /// `make chan(size)`.
    pub fn make_chan(size: Option<Expression>) -> Self {
        Self::new(ExpressionKind::MakeChan(size.map(Box::new)))
    }

    /// `make([], len, cap)`.
    pub fn make_array(len: Expression, cap: Option<Expression>) -> Self {
        Self::new(ExpressionKind::MakeArray {
            len: Box::new(len),
            cap: cap.map(Box::new),
        })
    }

    /// `lhs <- rhs`.
    pub fn send(channel: Expression, value: Expression) -> Self {
        Self::new(ExpressionKind::Channel {
            lhs: Some(Box::new(channel)),
            rhs: Box::new(value),
        })
    }

    /// `<- channel`.
    pub fn receive(channel: Expression) -> Self {
        Self::new(ExpressionKind::Channel {
            lhs: None,
            rhs: Box::new(channel),
        })
    }

    /// `target <- channel`, receiving into `target`.
    pub fn receive_into(target: Expression, channel: Expression) -> Self {
        Self::new(ExpressionKind::Channel {
            lhs: Some(Box::new(target)),
            rhs: Box::new(channel),
        })
    }

    /// `target++` and friends.
    pub fn compound(op: CompoundOp, target: Expression, value: Option<Expression>) -> Self {
        Self::new(ExpressionKind::Compound {
            op,
            target: Box::new(target),
            value: value.map(Box::new),
        })
    }
}

impl Statement {
    /// Wraps `kind` with an unknown position.
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            pos: Position::default(),
        }
    }

    /// Sets the source position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.pos = Position::new(line, column);
        self
    }

    /// Expression statement.
    pub fn expr(expression: Expression) -> Self {
        Self::new(StatementKind::Expression(expression))
    }

    /// `targets = values`.
    pub fn assign(targets: Vec<Expression>, values: Vec<Expression>) -> Self {
        Self::new(StatementKind::Assign(AssignStatement { targets, values }))
    }

    /// `name = value`.
    pub fn set(name: Ident, value: Expression) -> Self {
        Self::assign(vec![Expression::ident(name)], vec![value])
    }

    /// `var names = values`.
    pub fn var(names: Vec<Ident>, values: Vec<Expression>) -> Self {
        Self::new(StatementKind::Var(VarStatement { names, values }))
    }

    /// `if` without further arms.
    pub fn if_then(condition: Expression, then: Vec<Statement>, otherwise: Vec<Statement>) -> Self {
        Self::new(StatementKind::If(IfStatement {
            condition,
            then,
            else_ifs: Vec::new(),
            otherwise,
        }))
    }

    /// `try body catch var handler`.
    pub fn try_catch(body: Vec<Statement>, catch_var: Option<Ident>, catch: Vec<Statement>) -> Self {
        Self::new(StatementKind::Try(TryStatement {
            body,
            catch_var,
            catch,
        }))
    }

    /// `for var in iterable`.
    pub fn for_each(var: Ident, iterable: Expression, body: Vec<Statement>) -> Self {
        Self::new(StatementKind::ForEach(ForEachStatement {
            var,
            iterable,
            body,
        }))
    }

    /// `for var = from to to`.
    pub fn numeric_for(var: Ident, from: Expression, to: Expression, body: Vec<Statement>) -> Self {
        Self::new(StatementKind::NumericFor(NumericForStatement {
            var,
            from,
            to,
            body,
        }))
    }

    /// `while condition`.
    pub fn while_loop(condition: Expression, body: Vec<Statement>) -> Self {
        Self::new(StatementKind::While(WhileStatement { condition, body }))
    }

    /// `break`.
    pub fn break_loop() -> Self {
        Self::new(StatementKind::Break)
    }

    /// `continue`.
    pub fn continue_loop() -> Self {
        Self::new(StatementKind::Continue)
    }

    /// `return values`.
    pub fn ret(values: Vec<Expression>) -> Self {
        Self::new(StatementKind::Return(values))
    }

    /// `throw value`.
    pub fn throw(value: Expression) -> Self {
        Self::new(StatementKind::Throw(value))
    }

    /// `module name`.
    pub fn module(name: Ident, body: Vec<Statement>) -> Self {
        Self::new(StatementKind::Module(ModuleStatement { name, body }))
    }

    /// `switch subject`.
    pub fn switch(subject: Expression, clauses: Vec<Clause>) -> Self {
        Self::new(StatementKind::Switch(SwitchStatement { subject, clauses }))
    }

    /// `select`.
    pub fn select(clauses: Vec<Clause>) -> Self {
        Self::new(StatementKind::Select(SelectStatement { clauses }))
    }
}

impl Clause {
    /// `case test: body`.
    pub fn case(test: Expression, body: Vec<Statement>) -> Self {
        Clause::Case(CaseClause {
            test,
            body,
            pos: Position::default(),
        })
    }

    /// `default: body`.
    pub fn default_case(body: Vec<Statement>) -> Self {
        Clause::Default(DefaultClause {
            body,
            pos: Position::default(),
        })
    }
}
