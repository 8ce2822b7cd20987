//! Bytecode definitions.
//!
//! An instruction names registers (`r0`, `r1`, ...) relative to the frame of
//! the function that runs it and labels that mark positions in the same flat
//! sequence. Function and module bodies are embedded as their own sequences.

use crate::ast::{BinaryOp, Constant, Position, UnaryOp};
use crate::runtime::interner::{Ident, Interner};
use crate::runtime::value::ValueKind;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use thiserror::Error;

/// A flat instruction sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bytecode {
    /// The instructions
    pub instructions: Vec<Instruction>,
}

/// Output of the compiler: the top-level sequence plus the label counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Top-level code
    pub code: Bytecode,
    /// Number of labels allocated across the unit, nested bodies included
    pub label_count: usize,
}

/// Label consistency problems found by [`Bytecode::verify_labels`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    /// A label marked more than once in one sequence
    #[error("label L{0} is defined more than once")]
    Duplicate(usize),
    /// A label referenced but never marked in the same sequence
    #[error("label L{0} is referenced but never defined")]
    Missing(usize),
}

impl Bytecode {
    /// Creates a new empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction and returns its index.
    pub fn emit(&mut self, op: OpCode, pos: Position) -> usize {
        let index = self.instructions.len();
        self.instructions.push(Instruction { op, pos });
        index
    }

    /// Number of instructions in this sequence, nested bodies excluded.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Iterates over the opcodes of this sequence.
    pub fn ops(&self) -> impl Iterator<Item = &OpCode> {
        self.instructions.iter().map(|i| &i.op)
    }

    /// Rewrites every identifier in the sequence and in nested bodies.
    pub fn remap_identifiers(&mut self, f: &mut impl FnMut(Ident) -> Ident) {
        for instruction in &mut self.instructions {
            instruction.remap_identifiers(f);
        }
    }

    /// Collects every identifier used by the sequence and its nested bodies.
    pub fn all_identifiers(&self) -> Vec<Ident> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut Vec<Ident>) {
        for instruction in &self.instructions {
            out.extend(instruction.op.identifiers());
            if let Some(body) = instruction.op.body() {
                body.collect_identifiers(out);
            }
        }
    }

    /// Maps each label of this sequence to the index of its `LABEL`.
    pub fn label_positions(&self) -> Result<FxHashMap<usize, usize>, LabelError> {
        let mut positions = FxHashMap::default();
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let OpCode::Label { label } = instruction.op {
                if positions.insert(label, index).is_some() {
                    return Err(LabelError::Duplicate(label));
                }
            }
        }
        Ok(positions)
    }

    /// Checks that every referenced label is marked exactly once in the
    /// sequence that references it, recursing into nested bodies.
    pub fn verify_labels(&self) -> Result<(), LabelError> {
        let positions = self.label_positions()?;
        for instruction in &self.instructions {
            for label in instruction.op.label_refs() {
                if !positions.contains_key(&label) {
                    return Err(LabelError::Missing(label));
                }
            }
            if let Some(body) = instruction.op.body() {
                body.verify_labels()?;
            }
        }
        Ok(())
    }

    /// Renders the sequence one instruction per line, nested bodies indented.
    pub fn disassemble(&self, names: &Interner) -> String {
        let mut out = String::new();
        self.write_listing(names, 0, &mut out);
        out
    }

    fn write_listing(&self, names: &Interner, depth: usize, out: &mut String) {
        let indent = "    ".repeat(depth);
        for instruction in &self.instructions {
            let text = instruction.display(names);
            if matches!(instruction.op, OpCode::Label { .. }) {
                let _ = writeln!(out, "{}{}", indent, text);
            } else {
                let _ = writeln!(out, "{}  {}", indent, text);
            }
            if let Some(body) = instruction.op.body() {
                let _ = writeln!(out, "{}  {{", indent);
                body.write_listing(names, depth + 1, out);
                let _ = writeln!(out, "{}  }}", indent);
            }
        }
    }
}

/// A single instruction with the source position it was lowered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// The operation
    pub op: OpCode,
    /// Source position for diagnostics
    pub pos: Position,
}

impl Instruction {
    /// Rewrites identifier fields, including those in nested bodies.
    pub fn remap_identifiers(&mut self, f: &mut impl FnMut(Ident) -> Ident) {
        self.op.remap_identifiers(f);
    }

    /// Human-readable form, names resolved through `names`.
    pub fn display(&self, names: &Interner) -> String {
        self.op.display(names)
    }
}

/// Operation codes.
///
/// Register fields are plain `usize` slots; `label` fields name `LABEL`
/// instructions of the same sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpCode {
    // Values
    /// `reg = value`
    Load { reg: usize, value: Constant },
    /// `to = from`
    Move { from: usize, to: usize },
    /// `reg = lhs == rhs`
    Equal { reg: usize, lhs: usize, rhs: usize },
    /// Convert the numeric text in `reg` to a number
    CastNum { reg: usize },

    // Containers
    /// `reg = new slice(len, cap)`
    MakeSlice { reg: usize, len: usize, cap: usize },
    /// `reg[index] = val` with a constant index
    SetIdx { reg: usize, index: usize, val: usize },
    /// `reg = new map(len)`
    MakeMap { reg: usize, len: usize },
    /// `reg[key] = val` with a constant key
    SetKey { reg: usize, key: String, val: usize },

    // Bindings
    /// `reg = id`
    Get { reg: usize, id: Ident },
    /// `id = reg`
    Set { reg: usize, id: Ident },
    /// `reg.id = val`
    SetMember { reg: usize, id: Ident, val: usize },
    /// `reg[index] = val`; `need_let` is true when `reg` must be stored back
    SetItem {
        reg: usize,
        index: usize,
        val: usize,
        need_let: usize,
    },
    /// `reg[begin:end] = val`; `need_let` as for [`OpCode::SetItem`]
    SetSlice {
        reg: usize,
        begin: usize,
        end: usize,
        val: usize,
        need_let: usize,
    },

    // Operators
    /// `reg = op reg`
    Unary { reg: usize, op: UnaryOp },
    /// `reg = &id`
    AddrId { reg: usize, id: Ident },
    /// `reg = &reg.id`
    AddrMember { reg: usize, id: Ident },
    /// `reg = *id`
    UnrefId { reg: usize, id: Ident },
    /// `reg = *reg.id`
    UnrefMember { reg: usize, id: Ident },
    /// `lhs = lhs op rhs`
    Oper { lhs: usize, rhs: usize, op: BinaryOp },
    /// `reg = reg + 1`
    Inc { reg: usize },
    /// `reg = reg - 1`
    Dec { reg: usize },

    // Control flow
    /// Marks a jump target
    Label { label: usize },
    /// Unconditional jump
    Jmp { label: usize },
    /// Jump when `reg` is true
    JTrue { reg: usize, label: usize },
    /// Jump when `reg` is false
    JFalse { reg: usize, label: usize },

    // Calls and functions
    /// Call `name`, or the function value in `reg` when `name` is absent.
    ///
    /// Arguments are the first `argc` items of the slice in `args`; the
    /// result lands in `reg`.
    Call {
        name: Option<Ident>,
        reg: usize,
        args: usize,
        argc: usize,
        variadic: bool,
        launch: bool,
    },
    /// `reg = new function`; also bound to `name` when present
    Func {
        reg: usize,
        name: Option<Ident>,
        code: Bytecode,
        params: Vec<Ident>,
        variadic: bool,
    },
    /// Return the value in `reg`
    Ret { reg: usize },

    // Member access
    /// `reg = reg.id`
    GetMember { reg: usize, id: Ident },
    /// `reg = reg[index]`
    GetIdx { reg: usize, index: usize },
    /// `reg = reg[begin:end]`
    GetSubSlice { reg: usize, begin: usize, end: usize },

    // Types
    /// `reg = type named id`
    LoadType { reg: usize, id: Ident },
    /// `reg = type named by the string in reg`
    ResolveType { reg: usize },
    /// `reg = reg as ty`
    CastType { reg: usize, ty: usize },
    /// `reg = new value of the type in reg`
    Make { reg: usize },
    /// `reg = new slice of length reg, capacity cap`
    MakeArr { reg: usize, cap: usize },
    /// `reg = kind(reg) == kind`
    IsKind { reg: usize, kind: ValueKind },
    /// `result = reg is a slice`
    IsSlice { reg: usize, result: usize },

    // Channels
    /// `reg = new channel, buffer size reg`
    MakeChan { reg: usize },
    /// `val = <- reg`, blocking
    ChanRecv { reg: usize, val: usize },
    /// `reg <- val`, blocking
    ChanSend { reg: usize, val: usize },
    /// Non-blocking receive from `reg`
    TryRecv {
        reg: usize,
        val: usize,
        ok: usize,
        closed: usize,
    },
    /// Non-blocking send of `val` to `reg`
    TrySend { reg: usize, val: usize, ok: usize },
    /// Cooperative yield
    Yield,

    // Exceptions
    /// Push a try frame delivering errors to `reg` at `label`
    Try { reg: usize, label: usize },
    /// Jump to `label` when `reg` holds no error
    Catch { reg: usize, label: usize },
    /// Pop the try frame whose catch label is `label`
    PopTry { label: usize },
    /// Raise the value in `reg` as an error
    Throw { reg: usize },
    /// Raise a fixed message
    Error { message: String },

    // Loops
    /// Start iterating `reg`, iterator state in `iter`
    ForEach {
        reg: usize,
        iter: usize,
        break_label: usize,
        continue_label: usize,
    },
    /// `val = next item`, or jump to `label` when exhausted
    Next {
        reg: usize,
        iter: usize,
        val: usize,
        label: usize,
    },
    /// Start counting from `from` to `to` in `reg`
    ForNum {
        reg: usize,
        from: usize,
        to: usize,
        break_label: usize,
        continue_label: usize,
    },
    /// Advance `reg`, or jump to `label` once it passes `to`
    NextNum {
        reg: usize,
        from: usize,
        to: usize,
        label: usize,
    },
    /// Start a condition-driven loop
    While {
        break_label: usize,
        continue_label: usize,
    },
    /// Jump to the break label of the innermost loop
    Break,
    /// Jump to the continue label of the innermost loop
    Continue,
    /// Pop the loop frame whose continue label is `label`
    PopFor { label: usize },

    // Modules
    /// Run `code` inside the module scope `name`
    Module { name: Ident, code: Bytecode },

    /// Registers above `reg` are no longer needed
    Free { reg: usize },
}

impl OpCode {
    /// Short mnemonic used in listings.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpCode::Load { .. } => "LOAD",
            OpCode::Move { .. } => "MV",
            OpCode::Equal { .. } => "EQUAL",
            OpCode::CastNum { .. } => "CASTNUM",
            OpCode::MakeSlice { .. } => "MAKESLICE",
            OpCode::SetIdx { .. } => "SETIDX",
            OpCode::MakeMap { .. } => "MAKEMAP",
            OpCode::SetKey { .. } => "SETKEY",
            OpCode::Get { .. } => "GET",
            OpCode::Set { .. } => "SET",
            OpCode::SetMember { .. } => "SETMEMBER",
            OpCode::SetItem { .. } => "SETITEM",
            OpCode::SetSlice { .. } => "SETSLICE",
            OpCode::Unary { .. } => "UNARY",
            OpCode::AddrId { .. } => "ADDRID",
            OpCode::AddrMember { .. } => "ADDRMBR",
            OpCode::UnrefId { .. } => "UNREFID",
            OpCode::UnrefMember { .. } => "UNREFMBR",
            OpCode::Oper { .. } => "OPER",
            OpCode::Inc { .. } => "INC",
            OpCode::Dec { .. } => "DEC",
            OpCode::Label { .. } => "LABEL",
            OpCode::Jmp { .. } => "JMP",
            OpCode::JTrue { .. } => "JTRUE",
            OpCode::JFalse { .. } => "JFALSE",
            OpCode::Call { .. } => "CALL",
            OpCode::Func { .. } => "FUNC",
            OpCode::Ret { .. } => "RET",
            OpCode::GetMember { .. } => "GETMEMBER",
            OpCode::GetIdx { .. } => "GETIDX",
            OpCode::GetSubSlice { .. } => "GETSUBSLICE",
            OpCode::LoadType { .. } => "LOADTYPE",
            OpCode::ResolveType { .. } => "RESOLVETYPE",
            OpCode::CastType { .. } => "CASTTYPE",
            OpCode::Make { .. } => "MAKE",
            OpCode::MakeArr { .. } => "MAKEARR",
            OpCode::IsKind { .. } => "ISKIND",
            OpCode::IsSlice { .. } => "ISSLICE",
            OpCode::MakeChan { .. } => "MAKECHAN",
            OpCode::ChanRecv { .. } => "CHANRECV",
            OpCode::ChanSend { .. } => "CHANSEND",
            OpCode::TryRecv { .. } => "TRYRECV",
            OpCode::TrySend { .. } => "TRYSEND",
            OpCode::Yield => "YIELD",
            OpCode::Try { .. } => "TRY",
            OpCode::Catch { .. } => "CATCH",
            OpCode::PopTry { .. } => "POPTRY",
            OpCode::Throw { .. } => "THROW",
            OpCode::Error { .. } => "ERROR",
            OpCode::ForEach { .. } => "FOREACH",
            OpCode::Next { .. } => "NEXT",
            OpCode::ForNum { .. } => "FORNUM",
            OpCode::NextNum { .. } => "NEXTNUM",
            OpCode::While { .. } => "WHILE",
            OpCode::Break => "BREAK",
            OpCode::Continue => "CONTINUE",
            OpCode::PopFor { .. } => "POPFOR",
            OpCode::Module { .. } => "MODULE",
            OpCode::Free { .. } => "FREE",
        }
    }

    /// Identifier-typed fields of this instruction, nested bodies excluded.
    pub fn identifiers(&self) -> Vec<Ident> {
        match self {
            OpCode::Get { id, .. }
            | OpCode::Set { id, .. }
            | OpCode::SetMember { id, .. }
            | OpCode::AddrId { id, .. }
            | OpCode::AddrMember { id, .. }
            | OpCode::UnrefId { id, .. }
            | OpCode::UnrefMember { id, .. }
            | OpCode::GetMember { id, .. }
            | OpCode::LoadType { id, .. } => vec![*id],
            OpCode::Call { name, .. } => name.iter().copied().collect(),
            OpCode::Func { name, params, .. } => {
                name.iter().chain(params.iter()).copied().collect()
            }
            OpCode::Module { name, .. } => vec![*name],
            _ => Vec::new(),
        }
    }

    /// Rewrites identifier fields through `f`, recursing into nested bodies.
    pub fn remap_identifiers(&mut self, f: &mut impl FnMut(Ident) -> Ident) {
        match self {
            OpCode::Get { id, .. }
            | OpCode::Set { id, .. }
            | OpCode::SetMember { id, .. }
            | OpCode::AddrId { id, .. }
            | OpCode::AddrMember { id, .. }
            | OpCode::UnrefId { id, .. }
            | OpCode::UnrefMember { id, .. }
            | OpCode::GetMember { id, .. }
            | OpCode::LoadType { id, .. } => *id = f(*id),
            OpCode::Call { name, .. } => {
                if let Some(name) = name {
                    *name = f(*name);
                }
            }
            OpCode::Func {
                name, params, code, ..
            } => {
                if let Some(name) = name {
                    *name = f(*name);
                }
                for param in params.iter_mut() {
                    *param = f(*param);
                }
                code.remap_identifiers(f);
            }
            OpCode::Module { name, code } => {
                *name = f(*name);
                code.remap_identifiers(f);
            }
            _ => {}
        }
    }

    /// The embedded body of a `FUNC` or `MODULE`.
    pub fn body(&self) -> Option<&Bytecode> {
        match self {
            OpCode::Func { code, .. } | OpCode::Module { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Labels this instruction refers to without defining them.
    pub fn label_refs(&self) -> Vec<usize> {
        match self {
            OpCode::Jmp { label }
            | OpCode::JTrue { label, .. }
            | OpCode::JFalse { label, .. }
            | OpCode::Try { label, .. }
            | OpCode::Catch { label, .. }
            | OpCode::PopTry { label }
            | OpCode::Next { label, .. }
            | OpCode::NextNum { label, .. }
            | OpCode::PopFor { label } => vec![*label],
            OpCode::ForEach {
                break_label,
                continue_label,
                ..
            }
            | OpCode::ForNum {
                break_label,
                continue_label,
                ..
            }
            | OpCode::While {
                break_label,
                continue_label,
            } => vec![*break_label, *continue_label],
            _ => Vec::new(),
        }
    }

    /// Human-readable form, names resolved through `names`.
    pub fn display(&self, names: &Interner) -> String {
        let name = |id: &Ident| format!("{:?}", names.name(*id));
        let m = self.mnemonic();
        match self {
            OpCode::Load { reg, value } => format!("{} r{}, {}", m, reg, value),
            OpCode::Move { from, to } => format!("{} r{}, r{}", m, from, to),
            OpCode::Equal { reg, lhs, rhs } => format!("{} r{}, r{} == r{}", m, reg, lhs, rhs),
            OpCode::CastNum { reg }
            | OpCode::Ret { reg }
            | OpCode::ResolveType { reg }
            | OpCode::Make { reg }
            | OpCode::MakeChan { reg }
            | OpCode::Throw { reg }
            | OpCode::Inc { reg }
            | OpCode::Dec { reg }
            | OpCode::Free { reg } => format!("{} r{}", m, reg),
            OpCode::MakeSlice { reg, len, cap } => format!("{} r{}, len {}, cap {}", m, reg, len, cap),
            OpCode::SetIdx { reg, index, val } => format!("{} r{}[{}], r{}", m, reg, index, val),
            OpCode::MakeMap { reg, len } => format!("{} r{}, len {}", m, reg, len),
            OpCode::SetKey { reg, key, val } => format!("{} r{}[{:?}], r{}", m, reg, key, val),
            OpCode::Get { reg, id } => format!("{} r{}, {}", m, reg, name(id)),
            OpCode::Set { reg, id } => format!("{} {}, r{}", m, name(id), reg),
            OpCode::SetMember { reg, id, val } => {
                format!("{} r{}.{}, r{}", m, reg, name(id), val)
            }
            OpCode::SetItem {
                reg,
                index,
                val,
                need_let,
            } => format!("{} r{}[r{}], r{}, let r{}", m, reg, index, val, need_let),
            OpCode::SetSlice {
                reg,
                begin,
                end,
                val,
                need_let,
            } => format!(
                "{} r{}[r{}:r{}], r{}, let r{}",
                m, reg, begin, end, val, need_let
            ),
            OpCode::Unary { reg, op } => format!("{} {}r{}", m, op.symbol(), reg),
            OpCode::AddrId { reg, id } | OpCode::UnrefId { reg, id } => {
                format!("{} r{}, {}", m, reg, name(id))
            }
            OpCode::AddrMember { reg, id }
            | OpCode::UnrefMember { reg, id }
            | OpCode::GetMember { reg, id } => format!("{} r{}, r{}.{}", m, reg, reg, name(id)),
            OpCode::Oper { lhs, rhs, op } => format!("{} r{}, r{} {} r{}", m, lhs, lhs, op.symbol(), rhs),
            OpCode::Label { label } => format!("L{}:", label),
            OpCode::Jmp { label } | OpCode::PopTry { label } | OpCode::PopFor { label } => {
                format!("{} L{}", m, label)
            }
            OpCode::JTrue { reg, label }
            | OpCode::JFalse { reg, label }
            | OpCode::Try { reg, label }
            | OpCode::Catch { reg, label } => format!("{} r{}, L{}", m, reg, label),
            OpCode::Call {
                name: callee,
                reg,
                args,
                argc,
                variadic,
                launch,
            } => {
                let target = match callee {
                    Some(id) => name(id),
                    None => format!("r{}", reg),
                };
                format!(
                    "{} {}, args r{} ({}){}{}, ret r{}",
                    m,
                    target,
                    args,
                    argc,
                    if *variadic { ", variadic" } else { "" },
                    if *launch { ", launch" } else { "" },
                    reg
                )
            }
            OpCode::Func {
                reg,
                name: fname,
                params,
                variadic,
                ..
            } => {
                let params: Vec<String> = params.iter().map(|p| names.name(*p)).collect();
                format!(
                    "{} r{}, {}, ({}{})",
                    m,
                    reg,
                    fname.as_ref().map(name).unwrap_or_else(|| "<anonymous>".to_string()),
                    params.join(", "),
                    if *variadic { "..." } else { "" }
                )
            }
            OpCode::GetIdx { reg, index } => format!("{} r{}, r{}[r{}]", m, reg, reg, index),
            OpCode::GetSubSlice { reg, begin, end } => {
                format!("{} r{}, r{}[r{}:r{}]", m, reg, reg, begin, end)
            }
            OpCode::LoadType { reg, id } => format!("{} r{}, {}", m, reg, name(id)),
            OpCode::CastType { reg, ty } => format!("{} r{}, type r{}", m, reg, ty),
            OpCode::MakeArr { reg, cap } => format!("{} r{}, cap r{}", m, reg, cap),
            OpCode::IsKind { reg, kind } => format!("{} r{}, {}", m, reg, kind),
            OpCode::IsSlice { reg, result } => format!("{} r{}, r{}", m, result, reg),
            OpCode::ChanRecv { reg, val } => format!("{} r{} <- r{}", m, val, reg),
            OpCode::ChanSend { reg, val } => format!("{} r{} <- r{}", m, reg, val),
            OpCode::TryRecv {
                reg,
                val,
                ok,
                closed,
            } => format!("{} r{} <- r{}, ok r{}, closed r{}", m, val, reg, ok, closed),
            OpCode::TrySend { reg, val, ok } => format!("{} r{} <- r{}, ok r{}", m, reg, val, ok),
            OpCode::Error { message } => format!("{} {:?}", m, message),
            OpCode::ForEach {
                reg,
                iter,
                break_label,
                continue_label,
            } => format!(
                "{} r{}, iter r{}, break L{}, continue L{}",
                m, reg, iter, break_label, continue_label
            ),
            OpCode::Next {
                reg,
                iter,
                val,
                label,
            } => format!("{} r{}, r{}, iter r{}, done L{}", m, val, reg, iter, label),
            OpCode::ForNum {
                reg,
                from,
                to,
                break_label,
                continue_label,
            } => format!(
                "{} r{}, r{}..r{}, break L{}, continue L{}",
                m, reg, from, to, break_label, continue_label
            ),
            OpCode::NextNum {
                reg,
                from,
                to,
                label,
            } => format!("{} r{}, r{}..r{}, done L{}", m, reg, from, to, label),
            OpCode::While {
                break_label,
                continue_label,
            } => format!("{} break L{}, continue L{}", m, break_label, continue_label),
            OpCode::Yield | OpCode::Break | OpCode::Continue => m.to_string(),
            OpCode::Module { name: module, .. } => format!("{} {}", m, name(module)),
        }
    }
}
