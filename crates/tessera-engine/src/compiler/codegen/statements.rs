//! Statement lowering.
//!
//! | Statement | Key Operations | Notes |
//! |-----------|----------------|-------|
//! | `if/elseif/else` | `JFALSE`, `JMP` | first true arm wins |
//! | `try/catch` | `TRY`, `CATCH`, `POPTRY` | error lands in the base register |
//! | `for x in v` | `FOREACH`, `NEXT`, `POPFOR` | iterator in `reg+1` |
//! | `for i = a to b` | `FORNUM`, `NEXTNUM`, `POPFOR` | counter in `reg` |
//! | `while` | `WHILE`, `JFALSE`, `POPFOR` | |
//! | `switch` | `EQUAL`, `JFALSE` | `default` runs when nothing matched |
//! | `select` | `TRYRECV`, `TRYSEND`, `YIELD` | polls until a case is ready |
//! | `a, b = x, y` | `ISSLICE`, `GETIDX`, `SET` | see [`Compiler::assign_statement`] |
//!
//! ## Try/Catch
//!
//! ```text
//!   TRY r0, L2          errors go to r0, control to L2
//!   [body at r1]
//! L2:
//!   CATCH r0, L1        no error: skip the handler
//!   [handler at r0]
//! L1:
//!   POPTRY L2
//!   FREE r1
//! ```
//!
//! ## Numeric For
//!
//! ```text
//!   [from -> r1]
//!   [to -> r2]
//!   FORNUM r0, r1..r2, break L1, continue L2
//! L2:
//!   NEXTNUM r0, r1..r2, done L1
//!   SET i, r0
//!   [body at r3]
//!   JMP L2
//! L1:
//!   POPFOR L2
//!   FREE r1
//! ```

use super::{CompileError, Compiler};
use crate::ast::*;
use crate::compiler::bytecode::{Bytecode, OpCode};
use crate::runtime::value::ValueKind;

impl Compiler<'_> {
    /// Lowers a block, every statement starting at `reg`.
    pub(super) fn block(
        &mut self,
        code: &mut Bytecode,
        stmts: &[Statement],
        reg: usize,
    ) -> Result<(), CompileError> {
        for stmt in stmts {
            self.statement(code, stmt, reg)?;
        }
        Ok(())
    }

    fn statement(
        &mut self,
        code: &mut Bytecode,
        stmt: &Statement,
        reg: usize,
    ) -> Result<(), CompileError> {
        let pos = stmt.pos;
        match &stmt.kind {
            StatementKind::Expression(expr) => self.expression(code, expr, reg)?,
            StatementKind::If(if_stmt) => self.if_statement(code, if_stmt, reg, pos)?,
            StatementKind::Try(try_stmt) => self.try_statement(code, try_stmt, reg, pos)?,
            StatementKind::ForEach(for_stmt) => self.for_each(code, for_stmt, reg, pos)?,
            StatementKind::NumericFor(for_stmt) => self.numeric_for(code, for_stmt, reg, pos)?,
            StatementKind::While(while_stmt) => self.while_loop(code, while_stmt, reg, pos)?,
            StatementKind::Break => {
                code.emit(OpCode::Break, pos);
            }
            StatementKind::Continue => {
                code.emit(OpCode::Continue, pos);
            }
            StatementKind::Return(values) => self.return_statement(code, values, reg, pos)?,
            StatementKind::Throw(value) => {
                self.expression(code, value, reg)?;
                code.emit(OpCode::Throw { reg }, pos);
            }
            StatementKind::Module(module) => {
                if module.name == self.inline_module {
                    self.block(code, &module.body, reg)?;
                } else {
                    let mut body = Bytecode::new();
                    self.block(&mut body, &module.body, 0)?;
                    code.emit(
                        OpCode::Module {
                            name: module.name,
                            code: body,
                        },
                        pos,
                    );
                }
            }
            StatementKind::Var(var) => self.var_statement(code, var, reg, pos)?,
            StatementKind::Switch(switch) => self.switch_statement(code, switch, reg, pos)?,
            StatementKind::Select(select) => self.select_statement(code, select, reg, pos)?,
            StatementKind::Assign(assign) => self.assign_statement(code, assign, reg, pos)?,
        }
        Ok(())
    }

    fn if_statement(
        &mut self,
        code: &mut Bytecode,
        stmt: &IfStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let end = self.label();

        self.expression(code, &stmt.condition, reg)?;
        let next = self.label();
        code.emit(OpCode::JFalse { reg, label: next }, pos);
        self.block(code, &stmt.then, reg)?;
        code.emit(OpCode::Jmp { label: end }, pos);
        code.emit(OpCode::Label { label: next }, pos);

        for arm in &stmt.else_ifs {
            self.expression(code, &arm.condition, reg)?;
            let next = self.label();
            code.emit(OpCode::JFalse { reg, label: next }, arm.pos);
            self.block(code, &arm.body, reg)?;
            code.emit(OpCode::Jmp { label: end }, arm.pos);
            code.emit(OpCode::Label { label: next }, arm.pos);
        }

        self.block(code, &stmt.otherwise, reg)?;
        code.emit(OpCode::Label { label: end }, pos);
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        Ok(())
    }

    fn try_statement(
        &mut self,
        code: &mut Bytecode,
        stmt: &TryStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let end = self.label();
        let catch = self.label();

        code.emit(OpCode::Try { reg, label: catch }, pos);
        // the body must not overwrite the error register
        self.block(code, &stmt.body, reg + 1)?;
        code.emit(OpCode::Label { label: catch }, pos);
        code.emit(OpCode::Catch { reg, label: end }, pos);
        if let Some(var) = stmt.catch_var {
            code.emit(OpCode::Set { reg, id: var }, pos);
        }
        self.block(code, &stmt.catch, reg)?;
        code.emit(OpCode::Label { label: end }, pos);
        code.emit(OpCode::PopTry { label: catch }, pos);
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        Ok(())
    }

    fn for_each(
        &mut self,
        code: &mut Bytecode,
        stmt: &ForEachStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        self.expression(code, &stmt.iterable, reg)?;

        let end = self.label();
        let next = self.label();
        let iter = reg + 1;
        let val = reg + 2;

        code.emit(
            OpCode::ForEach {
                reg,
                iter,
                break_label: end,
                continue_label: next,
            },
            pos,
        );
        code.emit(OpCode::Label { label: next }, pos);
        code.emit(
            OpCode::Next {
                reg,
                iter,
                val,
                label: end,
            },
            pos,
        );
        code.emit(OpCode::Set { reg: val, id: stmt.var }, pos);
        self.block(code, &stmt.body, reg + 3)?;
        code.emit(OpCode::Jmp { label: next }, pos);
        code.emit(OpCode::Label { label: end }, pos);
        code.emit(OpCode::PopFor { label: next }, pos);
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        Ok(())
    }

    fn numeric_for(
        &mut self,
        code: &mut Bytecode,
        stmt: &NumericForStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let from = reg + 1;
        let to = reg + 2;
        self.expression(code, &stmt.from, from)?;
        self.expression(code, &stmt.to, to)?;

        let end = self.label();
        let next = self.label();

        code.emit(
            OpCode::ForNum {
                reg,
                from,
                to,
                break_label: end,
                continue_label: next,
            },
            pos,
        );
        code.emit(OpCode::Label { label: next }, pos);
        code.emit(
            OpCode::NextNum {
                reg,
                from,
                to,
                label: end,
            },
            pos,
        );
        code.emit(OpCode::Set { reg, id: stmt.var }, pos);
        self.block(code, &stmt.body, reg + 3)?;
        code.emit(OpCode::Jmp { label: next }, pos);
        code.emit(OpCode::Label { label: end }, pos);
        code.emit(OpCode::PopFor { label: next }, pos);
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        Ok(())
    }

    fn while_loop(
        &mut self,
        code: &mut Bytecode,
        stmt: &WhileStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let end = self.label();
        let next = self.label();

        code.emit(
            OpCode::While {
                break_label: end,
                continue_label: next,
            },
            pos,
        );
        code.emit(OpCode::Label { label: next }, pos);
        self.expression(code, &stmt.condition, reg)?;
        code.emit(OpCode::JFalse { reg, label: end }, pos);
        self.block(code, &stmt.body, reg + 1)?;
        code.emit(OpCode::Jmp { label: next }, pos);
        code.emit(OpCode::Label { label: end }, pos);
        code.emit(OpCode::PopFor { label: next }, pos);
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        Ok(())
    }

    fn return_statement(
        &mut self,
        code: &mut Bytecode,
        values: &[Expression],
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        match values {
            [] => {
                code.emit(
                    OpCode::Load {
                        reg,
                        value: Constant::Nil,
                    },
                    pos,
                );
            }
            [value] => self.expression(code, value, reg)?,
            _ => {
                code.emit(
                    OpCode::MakeSlice {
                        reg,
                        len: values.len(),
                        cap: values.len(),
                    },
                    pos,
                );
                for (index, value) in values.iter().enumerate() {
                    self.expression(code, value, reg + 1)?;
                    code.emit(
                        OpCode::SetIdx {
                            reg,
                            index,
                            val: reg + 1,
                        },
                        value.pos,
                    );
                }
            }
        }
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        code.emit(OpCode::Ret { reg }, pos);
        Ok(())
    }

    fn var_statement(
        &mut self,
        code: &mut Bytecode,
        stmt: &VarStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        match stmt.values.len() {
            0 => {
                code.emit(
                    OpCode::Load {
                        reg,
                        value: Constant::Nil,
                    },
                    pos,
                );
                for name in &stmt.names {
                    code.emit(OpCode::Set { reg, id: *name }, pos);
                }
            }
            1 => {
                self.expression(code, &stmt.values[0], reg)?;
                for name in &stmt.names {
                    code.emit(OpCode::Set { reg, id: *name }, pos);
                }
            }
            n if n == stmt.names.len() => {
                for (name, value) in stmt.names.iter().zip(&stmt.values) {
                    self.expression(code, value, reg)?;
                    code.emit(OpCode::Set { reg, id: *name }, pos);
                }
            }
            _ => {
                return Err(CompileError::new(
                    "the number of names and values must match, or there must be one value",
                    pos,
                ));
            }
        }
        Ok(())
    }

    fn switch_statement(
        &mut self,
        code: &mut Bytecode,
        stmt: &SwitchStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        self.expression(code, &stmt.subject, reg)?;

        let end = self.label();
        let mut default = None;
        for clause in &stmt.clauses {
            let case = match clause {
                Clause::Default(clause) => {
                    if default.replace(clause).is_some() {
                        return Err(CompileError::new(
                            "a switch can have only one default clause",
                            clause.pos,
                        ));
                    }
                    continue;
                }
                Clause::Case(case) => case,
            };
            let next = self.label();
            self.expression(code, &case.test, reg + 1)?;
            code.emit(
                OpCode::Equal {
                    reg: reg + 2,
                    lhs: reg,
                    rhs: reg + 1,
                },
                case.pos,
            );
            code.emit(
                OpCode::JFalse {
                    reg: reg + 2,
                    label: next,
                },
                case.pos,
            );
            self.block(code, &case.body, reg + 1)?;
            code.emit(OpCode::Jmp { label: end }, case.pos);
            code.emit(OpCode::Label { label: next }, case.pos);
        }
        if let Some(default) = default {
            self.block(code, &default.body, reg + 1)?;
        }
        code.emit(OpCode::Label { label: end }, pos);
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        Ok(())
    }

    /// Lowers `select` as a polling loop.
    ///
    /// Each case tries its channel operation without blocking. Without a
    /// `default`, a full pass where nothing was ready ends in `YIELD` and
    /// starts over.
    fn select_statement(
        &mut self,
        code: &mut Bytecode,
        stmt: &SelectStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let start = self.label();
        code.emit(OpCode::Label { label: start }, pos);
        let end = self.label();

        let mut default = None;
        for clause in &stmt.clauses {
            let case = match clause {
                Clause::Default(clause) => {
                    if default.replace(clause).is_some() {
                        return Err(CompileError::new(
                            "a select can have only one default clause",
                            clause.pos,
                        ));
                    }
                    continue;
                }
                Clause::Case(case) => case,
            };
            let ExpressionKind::Channel { lhs, rhs } = &case.test.kind else {
                return Err(CompileError::new(
                    "select cases must be channel operations",
                    case.pos,
                ));
            };
            let next = self.label();

            self.expression(code, rhs, reg)?;
            match lhs {
                None => {
                    code.emit(
                        OpCode::TryRecv {
                            reg,
                            val: reg + 1,
                            ok: reg + 2,
                            closed: reg + 3,
                        },
                        rhs.pos,
                    );
                    code.emit(
                        OpCode::JFalse {
                            reg: reg + 2,
                            label: next,
                        },
                        case.pos,
                    );
                }
                Some(lhs) => {
                    self.expression(code, lhs, reg + 1)?;

                    // a channel on the left means send, anything else receives
                    code.emit(
                        OpCode::Move {
                            from: reg + 1,
                            to: reg + 3,
                        },
                        lhs.pos,
                    );
                    code.emit(
                        OpCode::IsKind {
                            reg: reg + 3,
                            kind: ValueKind::Channel,
                        },
                        lhs.pos,
                    );
                    let receive = self.label();
                    code.emit(
                        OpCode::JFalse {
                            reg: reg + 3,
                            label: receive,
                        },
                        lhs.pos,
                    );

                    code.emit(
                        OpCode::TrySend {
                            reg: reg + 1,
                            val: reg,
                            ok: reg + 2,
                        },
                        lhs.pos,
                    );
                    let ready = self.label();
                    code.emit(
                        OpCode::JTrue {
                            reg: reg + 2,
                            label: ready,
                        },
                        case.pos,
                    );
                    code.emit(OpCode::Jmp { label: next }, case.pos);

                    code.emit(OpCode::Label { label: receive }, case.pos);
                    code.emit(
                        OpCode::TryRecv {
                            reg,
                            val: reg + 1,
                            ok: reg + 2,
                            closed: reg + 3,
                        },
                        rhs.pos,
                    );
                    code.emit(
                        OpCode::JFalse {
                            reg: reg + 2,
                            label: next,
                        },
                        case.pos,
                    );
                    self.assign(code, lhs, reg + 1, reg + 2)?;
                    code.emit(OpCode::Label { label: ready }, case.pos);
                }
            }

            self.block(code, &case.body, reg)?;
            code.emit(OpCode::Jmp { label: end }, case.pos);
            code.emit(OpCode::Label { label: next }, case.pos);
        }

        match default {
            Some(default) => self.block(code, &default.body, reg)?,
            None => {
                code.emit(OpCode::Yield, pos);
                code.emit(OpCode::Jmp { label: start }, pos);
            }
        }
        code.emit(OpCode::Label { label: end }, pos);
        code.emit(OpCode::Free { reg: reg + 1 }, pos);
        Ok(())
    }

    /// Lowers single and multiple assignment.
    ///
    /// - One value, several targets: a slice value is spread over the
    ///   targets by position, any other value is assigned to each of them.
    /// - Equal counts: every value is computed into its own register before
    ///   the first store, so `a, b = b, a` swaps.
    pub(super) fn assign_statement(
        &mut self,
        code: &mut Bytecode,
        stmt: &AssignStatement,
        reg: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let targets = &stmt.targets;
        let values = &stmt.values;

        if values.len() == 1 && targets.len() > 1 {
            self.expression(code, &values[0], reg)?;

            let end = self.label();
            let scalar = self.label();
            code.emit(
                OpCode::IsSlice {
                    reg,
                    result: reg + 1,
                },
                pos,
            );
            code.emit(
                OpCode::JFalse {
                    reg: reg + 1,
                    label: scalar,
                },
                pos,
            );

            for (index, target) in targets.iter().enumerate() {
                code.emit(
                    OpCode::Move {
                        from: reg,
                        to: reg + 1,
                    },
                    target.pos,
                );
                code.emit(
                    OpCode::Load {
                        reg: reg + 2,
                        value: Constant::Int(index as i64),
                    },
                    target.pos,
                );
                code.emit(
                    OpCode::GetIdx {
                        reg: reg + 1,
                        index: reg + 2,
                    },
                    target.pos,
                );
                self.assign(code, target, reg + 1, reg + 2)?;
            }
            code.emit(OpCode::Jmp { label: end }, pos);

            code.emit(OpCode::Label { label: scalar }, pos);
            for target in targets {
                self.assign(code, target, reg, reg + 1)?;
            }
            code.emit(OpCode::Label { label: end }, pos);
        } else if !values.is_empty() && targets.len() == values.len() {
            for (i, value) in values.iter().enumerate() {
                self.expression(code, value, reg + i)?;
            }
            let scratch = reg + values.len();
            for (i, target) in targets.iter().enumerate() {
                self.assign(code, target, reg + i, scratch)?;
            }
        } else {
            return Err(CompileError::new(
                format!(
                    "cannot assign {} values to {} targets",
                    values.len(),
                    targets.len()
                ),
                pos,
            ));
        }
        Ok(())
    }

    /// Emits `container[index] = val` for a container already held in
    /// `object` and an index in `object + 1`. Registers from `object + 2`
    /// up are used as scratch.
    pub(super) fn store_item(
        &mut self,
        code: &mut Bytecode,
        container: &Expression,
        object: usize,
        val: usize,
        pos: Position,
    ) -> Result<(), CompileError> {
        let end = self.label();
        code.emit(
            OpCode::SetItem {
                reg: object,
                index: object + 1,
                val,
                need_let: object + 2,
            },
            pos,
        );
        code.emit(
            OpCode::JFalse {
                reg: object + 2,
                label: end,
            },
            pos,
        );
        // immutable containers come back as a new value to store
        self.assign(code, container, object, object + 1)?;
        code.emit(OpCode::Label { label: end }, pos);
        Ok(())
    }

    /// Stores the value in `val` into `target`, using registers from
    /// `scratch` upwards. `scratch` must be above `val`.
    pub(super) fn assign(
        &mut self,
        code: &mut Bytecode,
        target: &Expression,
        val: usize,
        scratch: usize,
    ) -> Result<(), CompileError> {
        let pos = target.pos;
        match &target.kind {
            ExpressionKind::Ident(id) => {
                code.emit(OpCode::Set { reg: val, id: *id }, pos);
            }
            ExpressionKind::Paren(inner) => self.assign(code, inner, val, scratch)?,
            ExpressionKind::Member { object, name } => {
                self.expression(code, object, scratch)?;
                code.emit(
                    OpCode::SetMember {
                        reg: scratch,
                        id: *name,
                        val,
                    },
                    pos,
                );
            }
            ExpressionKind::Item { value, index } => {
                self.expression(code, value, scratch)?;
                self.expression(code, index, scratch + 1)?;
                self.store_item(code, value, scratch, val, pos)?;
            }
            ExpressionKind::Slice { value, begin, end } => {
                let done = self.label();
                self.expression(code, value, scratch)?;
                self.optional(code, begin.as_deref(), scratch + 1, pos)?;
                self.optional(code, end.as_deref(), scratch + 2, pos)?;
                code.emit(
                    OpCode::SetSlice {
                        reg: scratch,
                        begin: scratch + 1,
                        end: scratch + 2,
                        val,
                        need_let: scratch + 3,
                    },
                    pos,
                );
                code.emit(
                    OpCode::JFalse {
                        reg: scratch + 3,
                        label: done,
                    },
                    pos,
                );
                self.assign(code, value, scratch, scratch + 1)?;
                code.emit(OpCode::Label { label: done }, pos);
            }
            _ => return Err(CompileError::new("invalid assignment target", pos)),
        }
        Ok(())
    }
}
