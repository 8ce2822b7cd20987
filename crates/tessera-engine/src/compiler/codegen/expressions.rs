//! Expression lowering.
//!
//! An expression lowered at `reg` leaves its value in `reg`. Operands are
//! computed into `reg`, `reg+1`, ... in source order.
//!
//! | Expression | Key Operations |
//! |------------|----------------|
//! | literals | `LOAD`, `CASTNUM` |
//! | `[..]`, `{..}` | `MAKESLICE`/`SETIDX`, `MAKEMAP`/`SETKEY` |
//! | `a op b` | `OPER` |
//! | `a and b`, `a or b` | `JFALSE`/`JTRUE` around the right operand |
//! | `f(x)` | `MAKESLICE` for the arguments, `CALL` |
//! | `func(..)` | `FUNC` with the body lowered at `r0` |
//! | `c <- v`, `<- c` | `ISKIND`, `CHANSEND`, `CHANRECV` |

use super::{CompileError, Compiler};
use crate::ast::*;
use crate::compiler::bytecode::{Bytecode, OpCode};
use crate::runtime::interner::Ident;
use crate::runtime::value::ValueKind;

/// A compound assignment target after its current value was read.
enum Place<'e> {
    /// Object held in `object`
    Member { object: usize, name: Ident },
    /// Container held in `object`, index in `object + 1`
    Item {
        container: &'e Expression,
        object: usize,
    },
    /// Plain name or any other target, stored with [`Compiler::assign`]
    Other(&'e Expression),
}

impl Place<'_> {
    /// First register above `reg` the place does not occupy.
    fn free(&self, reg: usize) -> usize {
        match self {
            Place::Member { .. } => reg + 2,
            Place::Item { .. } => reg + 3,
            Place::Other(_) => reg + 1,
        }
    }
}

impl Compiler<'_> {
    /// Lowers `expr` into `reg`.
    pub(super) fn expression(
        &mut self,
        code: &mut Bytecode,
        expr: &Expression,
        reg: usize,
    ) -> Result<(), CompileError> {
        let pos = expr.pos;
        match &expr.kind {
            ExpressionKind::Literal(value) => {
                code.emit(
                    OpCode::Load {
                        reg,
                        value: value.clone(),
                    },
                    pos,
                );
            }
            ExpressionKind::Number(text) => {
                code.emit(
                    OpCode::Load {
                        reg,
                        value: Constant::Str(text.clone()),
                    },
                    pos,
                );
                code.emit(OpCode::CastNum { reg }, pos);
            }
            ExpressionKind::Str(text) => {
                code.emit(
                    OpCode::Load {
                        reg,
                        value: Constant::Str(text.clone()),
                    },
                    pos,
                );
            }
            ExpressionKind::Array(items) => {
                code.emit(
                    OpCode::MakeSlice {
                        reg,
                        len: items.len(),
                        cap: items.len(),
                    },
                    pos,
                );
                for (index, item) in items.iter().enumerate() {
                    self.expression(code, item, reg + 1)?;
                    code.emit(
                        OpCode::SetIdx {
                            reg,
                            index,
                            val: reg + 1,
                        },
                        item.pos,
                    );
                }
            }
            ExpressionKind::Map(entries) => {
                code.emit(
                    OpCode::MakeMap {
                        reg,
                        len: entries.len(),
                    },
                    pos,
                );
                for (key, value) in entries {
                    self.expression(code, value, reg + 1)?;
                    code.emit(
                        OpCode::SetKey {
                            reg,
                            key: key.clone(),
                            val: reg + 1,
                        },
                        value.pos,
                    );
                }
            }
            ExpressionKind::Ident(id) => {
                code.emit(OpCode::Get { reg, id: *id }, pos);
            }
            ExpressionKind::Unary { op, operand } => {
                self.expression(code, operand, reg)?;
                code.emit(OpCode::Unary { reg, op: *op }, pos);
            }
            ExpressionKind::AddressOf(target) => match &target.kind {
                ExpressionKind::Ident(id) => {
                    code.emit(OpCode::AddrId { reg, id: *id }, pos);
                }
                ExpressionKind::Member { object, name } => {
                    self.expression(code, object, reg)?;
                    code.emit(OpCode::AddrMember { reg, id: *name }, pos);
                }
                _ => return Err(CompileError::new("cannot take the address of this value", pos)),
            },
            ExpressionKind::Deref(target) => match &target.kind {
                ExpressionKind::Ident(id) => {
                    code.emit(OpCode::UnrefId { reg, id: *id }, pos);
                }
                ExpressionKind::Member { object, name } => {
                    self.expression(code, object, reg)?;
                    code.emit(OpCode::UnrefMember { reg, id: *name }, pos);
                }
                _ => return Err(CompileError::new("cannot dereference this value", pos)),
            },
            ExpressionKind::Paren(inner) => self.expression(code, inner, reg)?,
            ExpressionKind::Binary { op, lhs, rhs } => {
                self.expression(code, lhs, reg)?;
                self.expression(code, rhs, reg + 1)?;
                code.emit(
                    OpCode::Oper {
                        lhs: reg,
                        rhs: reg + 1,
                        op: *op,
                    },
                    pos,
                );
            }
            ExpressionKind::Logical { op, lhs, rhs } => {
                self.expression(code, lhs, reg)?;
                let done = self.label();
                // the left value is the result when it decides the outcome
                match op {
                    LogicalOp::Or => code.emit(OpCode::JTrue { reg, label: done }, pos),
                    LogicalOp::And => code.emit(OpCode::JFalse { reg, label: done }, pos),
                };
                self.expression(code, rhs, reg)?;
                code.emit(OpCode::Label { label: done }, pos);
            }
            ExpressionKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.expression(code, condition, reg)?;
                let other = self.label();
                code.emit(OpCode::JFalse { reg, label: other }, pos);
                self.expression(code, then, reg)?;
                let end = self.label();
                code.emit(OpCode::Jmp { label: end }, pos);
                code.emit(OpCode::Label { label: other }, pos);
                self.expression(code, otherwise, reg)?;
                code.emit(OpCode::Label { label: end }, pos);
            }
            ExpressionKind::Call { name, call } => {
                self.call(code, Some(*name), call, reg, reg, pos)?;
            }
            ExpressionKind::CallValue { callee, call } => {
                self.expression(code, callee, reg)?;
                self.call(code, None, call, reg, reg + 1, pos)?;
            }
            ExpressionKind::Member { object, name } => {
                self.expression(code, object, reg)?;
                code.emit(OpCode::GetMember { reg, id: *name }, pos);
            }
            ExpressionKind::Item { value, index } => {
                self.expression(code, value, reg)?;
                self.expression(code, index, reg + 1)?;
                code.emit(
                    OpCode::GetIdx {
                        reg,
                        index: reg + 1,
                    },
                    pos,
                );
            }
            ExpressionKind::Slice { value, begin, end } => {
                self.expression(code, value, reg)?;
                self.optional(code, begin.as_deref(), reg + 1, pos)?;
                self.optional(code, end.as_deref(), reg + 2, pos)?;
                code.emit(
                    OpCode::GetSubSlice {
                        reg,
                        begin: reg + 1,
                        end: reg + 2,
                    },
                    pos,
                );
            }
            ExpressionKind::Function(func) => {
                let mut body = Bytecode::new();
                self.block(&mut body, &func.body, 0)?;
                code.emit(
                    OpCode::Func {
                        reg,
                        name: func.name,
                        code: body,
                        params: func.params.clone(),
                        variadic: func.variadic,
                    },
                    pos,
                );
            }
            ExpressionKind::Cast { value, ty } => {
                self.expression(code, value, reg)?;
                self.type_ref(code, ty, reg + 1, pos)?;
                code.emit(OpCode::CastType { reg, ty: reg + 1 }, pos);
            }
            ExpressionKind::Make(ty) => {
                self.type_ref(code, ty, reg, pos)?;
                code.emit(OpCode::Make { reg }, pos);
            }
            ExpressionKind::MakeChan(size) => {
                match size {
                    Some(size) => self.expression(code, size, reg)?,
                    None => {
                        code.emit(
                            OpCode::Load {
                                reg,
                                value: Constant::Int(0),
                            },
                            pos,
                        );
                    }
                }
                code.emit(OpCode::MakeChan { reg }, pos);
            }
            ExpressionKind::MakeArray { len, cap } => {
                self.expression(code, len, reg)?;
                match cap {
                    Some(cap) => self.expression(code, cap, reg + 1)?,
                    None => {
                        code.emit(
                            OpCode::Move {
                                from: reg,
                                to: reg + 1,
                            },
                            pos,
                        );
                    }
                }
                code.emit(OpCode::MakeArr { reg, cap: reg + 1 }, pos);
            }
            ExpressionKind::Channel { lhs, rhs } => self.channel(code, lhs.as_deref(), rhs, reg, pos)?,
            ExpressionKind::Compound { op, target, value } => {
                let place = self.compound_place(code, target, reg)?;
                let operand = place.free(reg);
                match op {
                    CompoundOp::Increment => {
                        code.emit(OpCode::Inc { reg }, pos);
                    }
                    CompoundOp::Decrement => {
                        code.emit(OpCode::Dec { reg }, pos);
                    }
                    CompoundOp::Apply(op) => {
                        let Some(value) = value else {
                            return Err(CompileError::new(
                                format!("`{}=` needs a right operand", op.symbol()),
                                pos,
                            ));
                        };
                        self.expression(code, value, operand)?;
                        code.emit(
                            OpCode::Oper {
                                lhs: reg,
                                rhs: operand,
                                op: *op,
                            },
                            pos,
                        );
                    }
                }
                match place {
                    Place::Member { object, name } => {
                        code.emit(
                            OpCode::SetMember {
                                reg: object,
                                id: name,
                                val: reg,
                            },
                            target.pos,
                        );
                    }
                    Place::Item { container, object } => {
                        self.store_item(code, container, object, reg, target.pos)?;
                    }
                    Place::Other(target) => self.assign(code, target, reg, operand)?,
                }
            }
        }
        Ok(())
    }

    /// Reads the current value of a compound target into `reg`. Member and
    /// item targets keep their object (and index) in the registers above
    /// `reg` so the store does not evaluate them a second time.
    fn compound_place<'e>(
        &mut self,
        code: &mut Bytecode,
        target: &'e Expression,
        reg: usize,
    ) -> Result<Place<'e>, CompileError> {
        let pos = target.pos;
        match &target.kind {
            ExpressionKind::Paren(inner) => self.compound_place(code, inner, reg),
            ExpressionKind::Member { object, name } => {
                self.expression(code, object, reg + 1)?;
                code.emit(OpCode::Move { from: reg + 1, to: reg }, pos);
                code.emit(OpCode::GetMember { reg, id: *name }, pos);
                Ok(Place::Member {
                    object: reg + 1,
                    name: *name,
                })
            }
            ExpressionKind::Item { value, index } => {
                self.expression(code, value, reg + 1)?;
                self.expression(code, index, reg + 2)?;
                code.emit(OpCode::Move { from: reg + 1, to: reg }, pos);
                code.emit(
                    OpCode::GetIdx {
                        reg,
                        index: reg + 2,
                    },
                    pos,
                );
                Ok(Place::Item {
                    container: value,
                    object: reg + 1,
                })
            }
            _ => {
                self.expression(code, target, reg)?;
                Ok(Place::Other(target))
            }
        }
    }

    /// Lowers an optional operand, loading nil when it is absent.
    pub(super) fn optional(
        &mut self,
        code: &mut Bytecode,
        expr: Option<&Expression>,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        match expr {
            Some(expr) => self.expression(code, expr, reg),
            None => {
                code.emit(
                    OpCode::Load {
                        reg,
                        value: Constant::Nil,
                    },
                    pos,
                );
                Ok(())
            }
        }
    }

    /// Packs the arguments into a slice at `args` and emits the call.
    fn call(
        &mut self,
        code: &mut Bytecode,
        name: Option<Ident>,
        call: &CallArgs,
        reg: usize,
        args: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let argc = call.args.len();
        code.emit(
            OpCode::MakeSlice {
                reg: args,
                len: argc,
                cap: argc,
            },
            pos,
        );
        for (index, arg) in call.args.iter().enumerate() {
            self.expression(code, arg, args + 1)?;
            code.emit(
                OpCode::SetIdx {
                    reg: args,
                    index,
                    val: args + 1,
                },
                arg.pos,
            );
        }
        code.emit(
            OpCode::Call {
                name,
                reg,
                args,
                argc,
                variadic: call.variadic,
                launch: call.launch,
            },
            pos,
        );
        Ok(())
    }

    fn type_ref(
        &mut self,
        code: &mut Bytecode,
        ty: &TypeRef,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        match ty {
            TypeRef::Named(id) => {
                code.emit(OpCode::LoadType { reg, id: *id }, pos);
            }
            TypeRef::Dynamic(expr) => {
                self.expression(code, expr, reg)?;
                code.emit(OpCode::ResolveType { reg }, pos);
            }
        }
        Ok(())
    }

    /// `<- rhs` receives into `reg`.
    ///
    /// `lhs <- rhs` sends `rhs` when `lhs` holds a channel at runtime and
    /// `reg` becomes true; otherwise it receives from `rhs` and stores the
    /// value into `lhs` as well as `reg`.
    fn channel(
        &mut self,
        code: &mut Bytecode,
        lhs: Option<&Expression>,
        rhs: &Expression,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        self.expression(code, rhs, reg + 1)?;
        let Some(lhs) = lhs else {
            code.emit(
                OpCode::ChanRecv {
                    reg: reg + 1,
                    val: reg,
                },
                pos,
            );
            return Ok(());
        };

        self.expression(code, lhs, reg + 2)?;
        code.emit(
            OpCode::Move {
                from: reg + 2,
                to: reg + 3,
            },
            pos,
        );
        code.emit(
            OpCode::IsKind {
                reg: reg + 3,
                kind: ValueKind::Channel,
            },
            pos,
        );
        let receive = self.label();
        code.emit(
            OpCode::JFalse {
                reg: reg + 3,
                label: receive,
            },
            pos,
        );
        code.emit(
            OpCode::ChanSend {
                reg: reg + 2,
                val: reg + 1,
            },
            pos,
        );
        code.emit(
            OpCode::Load {
                reg,
                value: Constant::Bool(true),
            },
            pos,
        );
        let end = self.label();
        code.emit(OpCode::Jmp { label: end }, pos);

        code.emit(OpCode::Label { label: receive }, pos);
        code.emit(
            OpCode::ChanRecv {
                reg: reg + 1,
                val: reg,
            },
            pos,
        );
        self.assign(code, lhs, reg, reg + 1)?;
        code.emit(OpCode::Label { label: end }, pos);
        Ok(())
    }
}
