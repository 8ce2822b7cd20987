//! Statement and expression tree consumed by the compiler.
//!
//! The tree is produced by a front end (not part of this crate) and is
//! lowered by [`crate::compiler::Compiler`]. Identifiers are already
//! interned: every name is an [`Ident`] handle.

mod build;
mod simplify;

pub use simplify::{parse_number, simplify_block};

use crate::runtime::interner::Ident;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source position used for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// 1-based line, 0 when unknown
    pub line: u32,
    /// 1-based column, 0 when unknown
    pub column: u32,
}

impl Position {
    /// Creates a position.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A literal value that can be embedded directly in an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// The absent value
    Nil,
    /// Explicit null, distinct from absence
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(n) => write!(f, "{:?}", n),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// A statement with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// What the statement does
    pub kind: StatementKind,
    /// Where it came from
    pub pos: Position,
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Expression evaluated for its side effects
    Expression(Expression),
    /// if / elseif / else
    If(IfStatement),
    /// try / catch
    Try(TryStatement),
    /// for each item in a collection or channel
    ForEach(ForEachStatement),
    /// for counter = from to to
    NumericFor(NumericForStatement),
    /// while condition
    While(WhileStatement),
    /// break out of the innermost loop
    Break,
    /// continue the innermost loop
    Continue,
    /// return zero or more values
    Return(Vec<Expression>),
    /// raise an error value
    Throw(Expression),
    /// module body
    Module(ModuleStatement),
    /// variable declaration in the current scope
    Var(VarStatement),
    /// switch / case / default
    Switch(SwitchStatement),
    /// select over channel operations
    Select(SelectStatement),
    /// single or multiple assignment
    Assign(AssignStatement),
}

/// `if` with optional `elseif` arms and `else` body.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    /// The first condition
    pub condition: Expression,
    /// Body run when `condition` holds
    pub then: Vec<Statement>,
    /// Further arms, tried in order
    pub else_ifs: Vec<ElseIf>,
    /// Body run when no condition holds
    pub otherwise: Vec<Statement>,
}

/// One `elseif` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    /// Arm condition
    pub condition: Expression,
    /// Arm body
    pub body: Vec<Statement>,
    /// Position of the arm
    pub pos: Position,
}

/// `try` / `catch`.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStatement {
    /// Protected body
    pub body: Vec<Statement>,
    /// Name bound to the error value inside the handler
    pub catch_var: Option<Ident>,
    /// Handler body
    pub catch: Vec<Statement>,
}

/// `for each var in iterable`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEachStatement {
    /// Loop variable
    pub var: Ident,
    /// Slice, map, string or channel to iterate
    pub iterable: Expression,
    /// Loop body
    pub body: Vec<Statement>,
}

/// `for var = from to to` (inclusive, ascending).
#[derive(Debug, Clone, PartialEq)]
pub struct NumericForStatement {
    /// Loop variable
    pub var: Ident,
    /// First value
    pub from: Expression,
    /// Last value
    pub to: Expression,
    /// Loop body
    pub body: Vec<Statement>,
}

/// `while condition`.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    /// Checked before every iteration
    pub condition: Expression,
    /// Loop body
    pub body: Vec<Statement>,
}

/// `module name ... end`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleStatement {
    /// Module name; `_` inlines the body into the current scope
    pub name: Ident,
    /// Module body
    pub body: Vec<Statement>,
}

/// `var a, b = x, y`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarStatement {
    /// Declared names
    pub names: Vec<Ident>,
    /// Initial values: one shared value, or one per name
    pub values: Vec<Expression>,
}

/// `switch subject` with its clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStatement {
    /// Value compared against every case
    pub subject: Expression,
    /// Case and default clauses in source order
    pub clauses: Vec<Clause>,
}

/// `select` with its clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    /// Case and default clauses in source order
    pub clauses: Vec<Clause>,
}

/// A clause of a `switch` or `select`.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `case test:`
    Case(CaseClause),
    /// `default:`
    Default(DefaultClause),
}

/// `case test: body`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseClause {
    /// Value (switch) or channel operation (select)
    pub test: Expression,
    /// Clause body
    pub body: Vec<Statement>,
    /// Position of the clause
    pub pos: Position,
}

/// `default: body`.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultClause {
    /// Clause body
    pub body: Vec<Statement>,
    /// Position of the clause
    pub pos: Position,
}

/// `a, b = x, y`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignStatement {
    /// Assignment targets
    pub targets: Vec<Expression>,
    /// Right-hand values
    pub values: Vec<Expression>,
}

/// An expression with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// What the expression computes
    pub kind: ExpressionKind,
    /// Where it came from
    pub pos: Position,
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// Literal constant
    Literal(Constant),
    /// Numeric literal kept as text, converted at runtime
    Number(String),
    /// String literal
    Str(String),
    /// `[a, b, c]`
    Array(Vec<Expression>),
    /// `{"key": value}`
    Map(Vec<(String, Expression)>),
    /// Variable reference
    Ident(Ident),
    /// Prefix operator
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expression>,
    },
    /// `&target`
    AddressOf(Box<Expression>),
    /// `*target`
    Deref(Box<Expression>),
    /// `(inner)`
    Paren(Box<Expression>),
    /// Infix operator evaluating both sides
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expression>,
        /// Right operand
        rhs: Box<Expression>,
    },
    /// Short-circuit `and` / `or`
    Logical {
        /// Operator
        op: LogicalOp,
        /// Left operand
        lhs: Box<Expression>,
        /// Right operand, evaluated only when needed
        rhs: Box<Expression>,
    },
    /// `condition ? then : otherwise`
    Ternary {
        /// Condition
        condition: Box<Expression>,
        /// Value when true
        then: Box<Expression>,
        /// Value when false
        otherwise: Box<Expression>,
    },
    /// Call of a function bound to a name
    Call {
        /// Function name
        name: Ident,
        /// Arguments and call flags
        call: CallArgs,
    },
    /// Call of a function value produced by an expression
    CallValue {
        /// Expression yielding the callee
        callee: Box<Expression>,
        /// Arguments and call flags
        call: CallArgs,
    },
    /// `object.name`
    Member {
        /// Object expression
        object: Box<Expression>,
        /// Member name
        name: Ident,
    },
    /// `value[index]`
    Item {
        /// Indexed value
        value: Box<Expression>,
        /// Index or key
        index: Box<Expression>,
    },
    /// `value[begin:end]`
    Slice {
        /// Sliced value
        value: Box<Expression>,
        /// Start, defaults to the beginning
        begin: Option<Box<Expression>>,
        /// End, defaults to the length
        end: Option<Box<Expression>>,
    },
    /// Function literal
    Function(FunctionLiteral),
    /// `value as type`
    Cast {
        /// Converted value
        value: Box<Expression>,
        /// Target type
        ty: TypeRef,
    },
    /// New zero value of a registered type
    Make(TypeRef),
    /// New channel with an optional buffer size
    MakeChan(Option<Box<Expression>>),
    /// New slice with a length and optional capacity
    MakeArray {
        /// Length
        len: Box<Expression>,
        /// Capacity, defaults to the length
        cap: Option<Box<Expression>>,
    },
    /// `lhs <- rhs` or `<- rhs`
    Channel {
        /// Channel to send to, or variable to receive into
        lhs: Option<Box<Expression>>,
        /// Value to send, or channel to receive from
        rhs: Box<Expression>,
    },
    /// `target++`, `target--`, `target op= value`
    Compound {
        /// Operator
        op: CompoundOp,
        /// Updated target
        target: Box<Expression>,
        /// Right operand for `op=`
        value: Option<Box<Expression>>,
    },
}

/// Arguments shared by both call forms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArgs {
    /// Argument expressions
    pub args: Vec<Expression>,
    /// The last argument is a slice spread into the parameter list
    pub variadic: bool,
    /// Run the call as a concurrent task
    pub launch: bool,
}

/// A function literal.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    /// Name, bound in the defining scope when present
    pub name: Option<Ident>,
    /// Parameter names
    pub params: Vec<Ident>,
    /// The last parameter collects the remaining arguments
    pub variadic: bool,
    /// Function body
    pub body: Vec<Statement>,
}

/// Type named by a cast or `make`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    /// Type known by name at compile time
    Named(Ident),
    /// Type name computed at runtime as a string
    Dynamic(Box<Expression>),
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
    /// `^x`
    BitNot,
}

impl UnaryOp {
    /// Operator spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "^",
        }
    }
}

/// Infix operators evaluated eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

impl BinaryOp {
    /// Operator spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

/// Short-circuit operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// Assignment operators that read the target first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    /// `x++`
    Increment,
    /// `x--`
    Decrement,
    /// `x op= value`
    Apply(BinaryOp),
}
