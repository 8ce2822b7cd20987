//! The bytecode interpreter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::operators;
use super::{RuntimeError, VmOptions};
use crate::ast::{BinaryOp, Position, parse_number};
use crate::compiler::bytecode::{Bytecode, Instruction, LabelError, OpCode, Unit};
use crate::runtime::environment::Environment;
use crate::runtime::interner::Ident;
use crate::runtime::value::{Channel, Function, Reference, TryRecv, Value};

static NIL: Value = Value::Nil;

/// An active `try`.
struct TryFrame {
    /// Register receiving the error
    reg: usize,
    /// Catch label
    label: usize,
    /// Loop frames open when the `try` started
    loops: usize,
}

/// Source of `for x in v` items.
enum Cursor {
    Items(std::vec::IntoIter<Value>),
    Range(std::ops::Range<i64>),
    Channel(Arc<Channel>),
}

impl Cursor {
    fn next(&mut self) -> Option<Value> {
        match self {
            Cursor::Items(items) => items.next(),
            Cursor::Range(range) => range.next().map(Value::Int),
            Cursor::Channel(ch) => ch.recv(),
        }
    }
}

/// An active loop.
struct LoopFrame {
    break_label: usize,
    continue_label: usize,
    /// Try frames open when the loop started
    tries: usize,
    /// Item source for `for x in v`; numeric and `while` loops have none
    cursor: Option<Cursor>,
}

/// Per-call execution state. Never shared between tasks.
struct Frame {
    labels: FxHashMap<usize, usize>,
    env: Environment,
    regs: Vec<Value>,
    tries: Vec<TryFrame>,
    loops: Vec<LoopFrame>,
    ip: usize,
}

impl Frame {
    fn new(code: &Bytecode, env: Environment) -> Result<Self, LabelError> {
        Ok(Self {
            labels: code.label_positions()?,
            env,
            regs: Vec::with_capacity(16),
            tries: Vec::new(),
            loops: Vec::new(),
            ip: 0,
        })
    }

    fn get(&self, reg: usize) -> &Value {
        self.regs.get(reg).unwrap_or(&NIL)
    }

    fn set(&mut self, reg: usize, value: Value) {
        if reg >= self.regs.len() {
            self.regs.resize(reg + 1, Value::Nil);
        }
        self.regs[reg] = value;
    }

    fn position(&self, label: usize) -> Result<usize, RuntimeError> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(RuntimeError::Label(LabelError::Missing(label)))
    }

    /// Moves to `label`. Backward jumps observe the interrupt flag.
    fn jump(&mut self, label: usize) -> Result<(), RuntimeError> {
        let target = self.position(label)?;
        if target < self.ip && self.env.check_interrupt() {
            return Err(RuntimeError::Interrupted);
        }
        self.ip = target;
        Ok(())
    }

    fn innermost_loop(&self, pos: Position) -> Result<&LoopFrame, RuntimeError> {
        self.loops
            .last()
            .ok_or_else(|| RuntimeError::failed("break or continue outside a loop", pos))
    }
}

enum Flow {
    Next,
    Return(Value),
}

/// The virtual machine that executes bytecode.
///
/// Cloning is cheap; clones share the yield counter and the list of
/// launched tasks.
#[derive(Clone, Default)]
pub struct Vm {
    options: VmOptions,
    /// `YIELD` instructions executed, launched tasks included
    yields: Arc<AtomicUsize>,
    /// Tasks started by launch calls and not yet joined
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Vm {
    /// Creates a VM with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a VM with the given options.
    pub fn with_options(options: VmOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// The options this VM runs with.
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Number of `YIELD` instructions executed so far.
    pub fn yield_count(&self) -> usize {
        self.yields.load(Ordering::Relaxed)
    }

    /// Runs a compiled unit in `env`.
    pub fn run_unit(&self, unit: &Unit, env: &Environment) -> Result<Value, RuntimeError> {
        self.run(&unit.code, env)
    }

    /// Runs a sequence in `env` and returns the value of its `return`, or
    /// nil when it runs off the end.
    pub fn run(&self, code: &Bytecode, env: &Environment) -> Result<Value, RuntimeError> {
        self.execute(code, env.clone(), 0)
    }

    /// Calls a function value from the host.
    pub fn call(&self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.call_value(callee, args, 0, Position::default())
    }

    /// Joins every launched task, including tasks launched while waiting.
    /// Returns how many were joined.
    pub fn wait(&self) -> usize {
        let mut joined = 0;
        loop {
            let handles = std::mem::take(&mut *self.tasks.lock());
            if handles.is_empty() {
                return joined;
            }
            for handle in handles {
                if handle.join().is_err() {
                    tracing::warn!("task panicked");
                }
                joined += 1;
            }
        }
    }

    fn execute(
        &self,
        code: &Bytecode,
        env: Environment,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        let mut frame = Frame::new(code, env)?;
        while let Some(instruction) = code.instructions.get(frame.ip) {
            frame.ip += 1;
            if self.options.trace {
                tracing::trace!(
                    depth,
                    ip = frame.ip - 1,
                    "{}",
                    instruction.display(frame.env.names())
                );
            }
            match self.step(&mut frame, instruction, depth) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(err) => {
                    let Some(value) = err.to_value() else {
                        return Err(err);
                    };
                    let Some(handler) = frame.tries.pop() else {
                        return Err(err);
                    };
                    frame.loops.truncate(handler.loops);
                    frame.set(handler.reg, value);
                    frame.ip = frame.position(handler.label)?;
                }
            }
        }
        Ok(Value::Nil)
    }

    fn step(
        &self,
        frame: &mut Frame,
        instruction: &Instruction,
        depth: usize,
    ) -> Result<Flow, RuntimeError> {
        let pos = instruction.pos;
        let fail = |message: String| RuntimeError::failed(message, pos);

        match &instruction.op {
            OpCode::Load { reg, value } => frame.set(*reg, Value::from(value)),
            OpCode::Move { from, to } => frame.set(*to, frame.get(*from).clone()),
            OpCode::Equal { reg, lhs, rhs } => {
                let equal = frame.get(*lhs) == frame.get(*rhs);
                frame.set(*reg, Value::Bool(equal));
            }
            OpCode::CastNum { reg } => {
                let number = match frame.get(*reg) {
                    Value::Str(text) => parse_number(text)
                        .map(|c| Value::from(&c))
                        .ok_or_else(|| fail(format!("invalid number literal {:?}", text)))?,
                    Value::Int(_) | Value::Float(_) => frame.get(*reg).clone(),
                    other => return Err(fail(format!("cannot convert {} to a number", other.type_name()))),
                };
                frame.set(*reg, number);
            }

            OpCode::MakeSlice { reg, len, cap } => {
                let mut items = Vec::with_capacity((*cap).max(*len));
                items.resize(*len, Value::Nil);
                frame.set(*reg, Value::slice(items));
            }
            OpCode::SetIdx { reg, index, val } => {
                let value = frame.get(*val).clone();
                let Value::Slice(items) = frame.get(*reg) else {
                    return Err(fail("SETIDX on a non-slice".to_string()));
                };
                let mut items = items.write();
                if *index >= items.len() {
                    items.resize(*index + 1, Value::Nil);
                }
                items[*index] = value;
            }
            OpCode::MakeMap { reg, .. } => frame.set(*reg, Value::map(BTreeMap::new())),
            OpCode::SetKey { reg, key, val } => {
                let value = frame.get(*val).clone();
                let Value::Map(map) = frame.get(*reg) else {
                    return Err(fail("SETKEY on a non-map".to_string()));
                };
                map.write().insert(key.clone(), value);
            }

            OpCode::Get { reg, id } => {
                let value = frame.env.get(*id).map_err(|e| fail(e.to_string()))?;
                frame.set(*reg, value);
            }
            OpCode::Set { reg, id } => {
                let value = frame.get(*reg).clone();
                // assignment to an unbound name declares it in the current scope
                if frame.env.set(*id, value.clone()).is_err() {
                    frame.env.define(*id, value);
                }
            }
            OpCode::SetMember { reg, id, val } => {
                let value = frame.get(*val).clone();
                set_member(&frame.env, frame.get(*reg), *id, value).map_err(fail)?;
            }
            OpCode::SetItem {
                reg,
                index,
                val,
                need_let,
            } => {
                let value = frame.get(*val).clone();
                let replaced = set_item(frame.get(*reg), frame.get(*index), value).map_err(fail)?;
                frame.set(*need_let, Value::Bool(replaced.is_some()));
                if let Some(container) = replaced {
                    frame.set(*reg, container);
                }
            }
            OpCode::SetSlice {
                reg,
                begin,
                end,
                val,
                need_let,
            } => {
                let value = frame.get(*val).clone();
                let replaced =
                    set_slice(frame.get(*reg), frame.get(*begin), frame.get(*end), value)
                        .map_err(fail)?;
                frame.set(*need_let, Value::Bool(replaced.is_some()));
                if let Some(container) = replaced {
                    frame.set(*reg, container);
                }
            }

            OpCode::Unary { reg, op } => {
                let value = operators::unary(*op, frame.get(*reg)).map_err(fail)?;
                frame.set(*reg, value);
            }
            OpCode::AddrId { reg, id } => {
                frame.env.get(*id).map_err(|e| fail(e.to_string()))?;
                let reference = Reference::Binding {
                    env: frame.env.clone(),
                    id: *id,
                };
                frame.set(*reg, Value::Ref(Arc::new(reference)));
            }
            OpCode::AddrMember { reg, id } => {
                let reference = match frame.get(*reg) {
                    Value::Map(map) => Reference::Member {
                        map: map.clone(),
                        key: member_key(&frame.env, &map.read(), *id),
                    },
                    Value::Module(module) => Reference::Binding {
                        env: module.clone(),
                        id: *id,
                    },
                    other => {
                        return Err(fail(format!("cannot take a member address of {}", other.type_name())));
                    }
                };
                frame.set(*reg, Value::Ref(Arc::new(reference)));
            }
            OpCode::UnrefId { reg, id } => {
                let value = frame.env.get(*id).map_err(|e| fail(e.to_string()))?;
                frame.set(*reg, deref(&value).map_err(fail)?);
            }
            OpCode::UnrefMember { reg, id } => {
                let value = get_member(&frame.env, frame.get(*reg), *id).map_err(fail)?;
                frame.set(*reg, deref(&value).map_err(fail)?);
            }
            OpCode::Oper { lhs, rhs, op } => {
                let value = operators::binary(*op, frame.get(*lhs), frame.get(*rhs)).map_err(fail)?;
                frame.set(*lhs, value);
            }
            OpCode::Inc { reg } => {
                let value = operators::binary(BinaryOp::Add, frame.get(*reg), &Value::Int(1)).map_err(fail)?;
                frame.set(*reg, value);
            }
            OpCode::Dec { reg } => {
                let value = operators::binary(BinaryOp::Sub, frame.get(*reg), &Value::Int(1)).map_err(fail)?;
                frame.set(*reg, value);
            }

            OpCode::Label { .. } => {}
            OpCode::Jmp { label } => frame.jump(*label)?,
            OpCode::JTrue { reg, label } => {
                if frame.get(*reg).is_truthy() {
                    frame.jump(*label)?;
                }
            }
            OpCode::JFalse { reg, label } => {
                if !frame.get(*reg).is_truthy() {
                    frame.jump(*label)?;
                }
            }

            OpCode::Call {
                name,
                reg,
                args,
                argc,
                variadic,
                launch,
            } => {
                let callee = match name {
                    Some(id) => frame.env.get(*id).map_err(|e| fail(e.to_string()))?,
                    None => frame.get(*reg).clone(),
                };
                let mut argv: Vec<Value> = match frame.get(*args) {
                    Value::Slice(items) => items.read().iter().take(*argc).cloned().collect(),
                    _ => Vec::new(),
                };
                if *variadic {
                    match argv.pop() {
                        Some(Value::Slice(rest)) => argv.extend(rest.read().iter().cloned()),
                        Some(other) => {
                            return Err(fail(format!("cannot spread {} as arguments", other.type_name())));
                        }
                        None => {}
                    }
                }
                if *launch {
                    self.launch(&frame.env, callee, argv, pos)?;
                    frame.set(*reg, Value::Nil);
                } else {
                    let result = self.call_value(&callee, argv, depth, pos)?;
                    frame.set(*reg, result);
                }
            }
            OpCode::Func {
                reg,
                name,
                code,
                params,
                variadic,
            } => {
                let func = Value::Function(Arc::new(Function {
                    name: *name,
                    params: params.clone(),
                    variadic: *variadic,
                    code: Arc::new(code.clone()),
                    env: frame.env.clone(),
                }));
                if let Some(id) = name {
                    frame.env.define(*id, func.clone());
                }
                frame.set(*reg, func);
            }
            OpCode::Ret { reg } => return Ok(Flow::Return(frame.get(*reg).clone())),

            OpCode::GetMember { reg, id } => {
                let value = get_member(&frame.env, frame.get(*reg), *id).map_err(fail)?;
                frame.set(*reg, value);
            }
            OpCode::GetIdx { reg, index } => {
                let value = get_item(frame.get(*reg), frame.get(*index)).map_err(fail)?;
                frame.set(*reg, value);
            }
            OpCode::GetSubSlice { reg, begin, end } => {
                let value =
                    get_sub_slice(frame.get(*reg), frame.get(*begin), frame.get(*end)).map_err(fail)?;
                frame.set(*reg, value);
            }

            OpCode::LoadType { reg, id } => {
                let ty = frame.env.type_of(*id).map_err(|e| fail(e.to_string()))?;
                frame.set(*reg, Value::Type(ty));
            }
            OpCode::ResolveType { reg } => {
                let ty = match frame.get(*reg) {
                    Value::Type(ty) => ty.clone(),
                    Value::Str(name) => {
                        let id = frame
                            .env
                            .names()
                            .lookup(name)
                            .ok_or_else(|| fail(format!("undefined type '{}'", name)))?;
                        frame.env.type_of(id).map_err(|e| fail(e.to_string()))?
                    }
                    other => return Err(fail(format!("{} does not name a type", other.type_name()))),
                };
                frame.set(*reg, Value::Type(ty));
            }
            OpCode::CastType { reg, ty } => {
                let Value::Type(ty) = frame.get(*ty) else {
                    return Err(fail("cast target is not a type".to_string()));
                };
                let value = frame.get(*reg).cast(ty.kind).map_err(fail)?;
                frame.set(*reg, value);
            }
            OpCode::Make { reg } => {
                let Value::Type(ty) = frame.get(*reg) else {
                    return Err(fail("make needs a type".to_string()));
                };
                let value = ty.zero();
                frame.set(*reg, value);
            }
            OpCode::MakeArr { reg, cap } => {
                let limit = self.options.max_len;
                let len = size(frame.get(*reg), limit).map_err(fail)?;
                let cap = size(frame.get(*cap), limit).map_err(fail)?;
                let mut items = Vec::new();
                items
                    .try_reserve_exact(cap.max(len))
                    .map_err(|e| fail(format!("cannot allocate slice of {}: {}", cap.max(len), e)))?;
                items.resize(len, Value::Nil);
                frame.set(*reg, Value::slice(items));
            }
            OpCode::IsKind { reg, kind } => {
                let matches = frame.get(*reg).kind() == *kind;
                frame.set(*reg, Value::Bool(matches));
            }
            OpCode::IsSlice { reg, result } => {
                let is_slice = matches!(frame.get(*reg), Value::Slice(_));
                frame.set(*result, Value::Bool(is_slice));
            }

            OpCode::MakeChan { reg } => {
                let capacity = size(frame.get(*reg), self.options.max_len).map_err(fail)?;
                frame.set(*reg, Value::Channel(Arc::new(Channel::new(capacity))));
            }
            OpCode::ChanRecv { reg, val } => {
                let ch = channel(frame.get(*reg)).map_err(fail)?;
                frame.set(*val, ch.recv().unwrap_or_default());
            }
            OpCode::ChanSend { reg, val } => {
                let ch = channel(frame.get(*reg)).map_err(fail)?;
                ch.send(frame.get(*val).clone()).map_err(fail)?;
            }
            OpCode::TryRecv {
                reg,
                val,
                ok,
                closed,
            } => {
                let ch = channel(frame.get(*reg)).map_err(fail)?;
                let (value, ready, is_closed) = match ch.try_recv() {
                    TryRecv::Value(value) => (value, true, false),
                    TryRecv::Empty => (Value::Nil, false, false),
                    // a closed channel is always ready and yields nil
                    TryRecv::Closed => (Value::Nil, true, true),
                };
                frame.set(*val, value);
                frame.set(*ok, Value::Bool(ready));
                frame.set(*closed, Value::Bool(is_closed));
            }
            OpCode::TrySend { reg, val, ok } => {
                let ch = channel(frame.get(*reg)).map_err(fail)?;
                let sent = ch.try_send(frame.get(*val).clone()).map_err(fail)?;
                frame.set(*ok, Value::Bool(sent));
            }
            OpCode::Yield => {
                self.yields.fetch_add(1, Ordering::Relaxed);
                if frame.env.check_interrupt() {
                    return Err(RuntimeError::Interrupted);
                }
                std::thread::yield_now();
            }

            OpCode::Try { reg, label } => {
                frame.set(*reg, Value::Nil);
                let loops = frame.loops.len();
                frame.tries.push(TryFrame {
                    reg: *reg,
                    label: *label,
                    loops,
                });
            }
            OpCode::Catch { reg, label } => {
                if !frame.get(*reg).is_error() {
                    frame.jump(*label)?;
                }
            }
            OpCode::PopTry { label } => {
                if frame.tries.last().is_some_and(|t| t.label == *label) {
                    frame.tries.pop();
                }
            }
            OpCode::Throw { reg } => {
                return Err(RuntimeError::Uncaught {
                    value: Value::thrown(frame.get(*reg).clone()),
                    pos,
                });
            }
            OpCode::Error { message } => return Err(fail(message.clone())),

            OpCode::ForEach {
                reg,
                iter,
                break_label,
                continue_label,
            } => {
                let cursor = cursor(frame.get(*reg)).map_err(fail)?;
                frame.set(*iter, Value::Int(0));
                let tries = frame.tries.len();
                frame.loops.push(LoopFrame {
                    break_label: *break_label,
                    continue_label: *continue_label,
                    tries,
                    cursor: Some(cursor),
                });
            }
            OpCode::Next {
                iter, val, label, ..
            } => {
                let item = frame
                    .loops
                    .iter_mut()
                    .rev()
                    .find(|l| l.break_label == *label)
                    .and_then(|l| l.cursor.as_mut())
                    .ok_or_else(|| fail("NEXT outside its loop".to_string()))?
                    .next();
                match item {
                    Some(value) => {
                        let count = frame.get(*iter).as_int().unwrap_or(0);
                        frame.set(*iter, Value::Int(count + 1));
                        frame.set(*val, value);
                    }
                    None => frame.jump(*label)?,
                }
            }
            OpCode::ForNum {
                reg,
                from,
                break_label,
                continue_label,
                ..
            } => {
                let start = operators::binary(BinaryOp::Sub, frame.get(*from), &Value::Int(1))
                    .map_err(fail)?;
                frame.set(*reg, start);
                let tries = frame.tries.len();
                frame.loops.push(LoopFrame {
                    break_label: *break_label,
                    continue_label: *continue_label,
                    tries,
                    cursor: None,
                });
            }
            OpCode::NextNum { reg, to, label, .. } => {
                let value = operators::binary(BinaryOp::Add, frame.get(*reg), &Value::Int(1))
                    .map_err(fail)?;
                let past = operators::compare(&value, frame.get(*to)).ok_or_else(|| {
                    fail(format!("for range bound must be a number, not {}", frame.get(*to).type_name()))
                })?;
                frame.set(*reg, value);
                if past == std::cmp::Ordering::Greater {
                    frame.jump(*label)?;
                }
            }
            OpCode::While {
                break_label,
                continue_label,
            } => {
                let tries = frame.tries.len();
                frame.loops.push(LoopFrame {
                    break_label: *break_label,
                    continue_label: *continue_label,
                    tries,
                    cursor: None,
                });
            }
            OpCode::Break => {
                let (tries, label) = {
                    let current = frame.innermost_loop(pos)?;
                    (current.tries, current.break_label)
                };
                frame.tries.truncate(tries);
                frame.jump(label)?;
            }
            OpCode::Continue => {
                let (tries, label) = {
                    let current = frame.innermost_loop(pos)?;
                    (current.tries, current.continue_label)
                };
                frame.tries.truncate(tries);
                frame.jump(label)?;
            }
            OpCode::PopFor { label } => {
                if frame.loops.last().is_some_and(|l| l.continue_label == *label) {
                    frame.loops.pop();
                }
            }

            OpCode::Module { name, code } => {
                let module = frame.env.new_module(&frame.env.names().name(*name));
                self.execute(code, module, depth)?;
            }
            OpCode::Free { reg } => frame.regs.truncate(*reg),
        }
        Ok(Flow::Next)
    }

    fn call_value(
        &self,
        callee: &Value,
        args: Vec<Value>,
        depth: usize,
        pos: Position,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(func) => self.call_function(func, args, depth + 1),
            Value::Native(native) => (native.func)(&args).map_err(|m| RuntimeError::failed(m, pos)),
            Value::Type(ty) => {
                let value = args.into_iter().next().unwrap_or_default();
                value.cast(ty.kind).map_err(|m| RuntimeError::failed(m, pos))
            }
            other => Err(RuntimeError::failed(
                format!("{} is not callable", other.type_name()),
                pos,
            )),
        }
    }

    fn call_function(
        &self,
        func: &Function,
        mut args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        if depth > self.options.max_call_depth {
            return Err(RuntimeError::CallDepth {
                limit: self.options.max_call_depth,
            });
        }
        let env = func.env.new_sub_env();
        let fixed = if func.variadic {
            func.params.len().saturating_sub(1)
        } else {
            func.params.len()
        };
        let rest = if args.len() > fixed {
            args.split_off(fixed)
        } else {
            Vec::new()
        };
        let mut args = args.into_iter();
        for param in &func.params[..fixed] {
            env.define(*param, args.next().unwrap_or_default());
        }
        if func.variadic {
            if let Some(last) = func.params.last() {
                env.define(*last, Value::slice(rest));
            }
        }
        self.execute(&func.code, env, depth)
    }

    fn launch(
        &self,
        env: &Environment,
        callee: Value,
        args: Vec<Value>,
        pos: Position,
    ) -> Result<(), RuntimeError> {
        if !matches!(callee, Value::Function(_) | Value::Native(_)) {
            return Err(RuntimeError::failed(
                format!("cannot launch {}", callee.type_name()),
                pos,
            ));
        }
        env.mark_shared();
        let vm = self.clone();
        let handle = std::thread::Builder::new()
            .name("tessera-task".to_string())
            .spawn(move || {
                if let Err(err) = vm.call_value(&callee, args, 0, pos) {
                    tracing::warn!(error = %err, "task ended with an uncaught error");
                }
            })
            .map_err(|e| RuntimeError::failed(format!("cannot start task: {}", e), pos))?;
        tracing::debug!(at = %pos, "launched task");
        self.tasks.lock().push(handle);
        Ok(())
    }
}

/// Key under which member `id` is stored, matching names case-insensitively.
fn member_key(env: &Environment, map: &BTreeMap<String, Value>, id: Ident) -> String {
    let spelling = env.names().name(id);
    if map.contains_key(&spelling) {
        return spelling;
    }
    let lower = spelling.to_lowercase();
    map.keys()
        .find(|key| key.to_lowercase() == lower)
        .cloned()
        .unwrap_or(spelling)
}

fn get_member(env: &Environment, object: &Value, id: Ident) -> Result<Value, String> {
    match object {
        Value::Map(map) => {
            let map = map.read();
            let key = member_key(env, &map, id);
            Ok(map.get(&key).cloned().unwrap_or_default())
        }
        Value::Module(module) => module.get(id).map_err(|e| e.to_string()),
        Value::Error(err) if env.names().lowercase_at(id).as_deref() == Some("message") => {
            Ok(Value::Str(err.message.clone()))
        }
        other => Err(format!(
            "{} has no member '{}'",
            other.type_name(),
            env.names().name(id)
        )),
    }
}

fn set_member(env: &Environment, object: &Value, id: Ident, value: Value) -> Result<(), String> {
    match object {
        Value::Map(map) => {
            let mut map = map.write();
            let key = member_key(env, &map, id);
            map.insert(key, value);
            Ok(())
        }
        Value::Module(module) => {
            if module.set(id, value.clone()).is_err() {
                module.define(id, value);
            }
            Ok(())
        }
        other => Err(format!(
            "cannot set member '{}' of {}",
            env.names().name(id),
            other.type_name()
        )),
    }
}

fn deref(value: &Value) -> Result<Value, String> {
    match value {
        Value::Ref(reference) => match reference.as_ref() {
            Reference::Binding { env, id } => env.get(*id).map_err(|e| e.to_string()),
            Reference::Member { map, key } => Ok(map.read().get(key).cloned().unwrap_or_default()),
        },
        other => Err(format!("cannot dereference {}", other.type_name())),
    }
}

fn key_of(index: &Value) -> String {
    match index {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn index_of(index: &Value, len: usize) -> Result<usize, String> {
    let n = index
        .as_int()
        .ok_or_else(|| format!("index must be an integer, not {}", index.type_name()))?;
    usize::try_from(n)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| format!("index {} out of range (length {})", n, len))
}

fn bounds(begin: &Value, end: &Value, len: usize) -> Result<(usize, usize), String> {
    let bound = |value: &Value, default: usize| -> Result<usize, String> {
        if value.is_nil() {
            return Ok(default);
        }
        let n = value
            .as_int()
            .ok_or_else(|| format!("slice bound must be an integer, not {}", value.type_name()))?;
        usize::try_from(n)
            .ok()
            .filter(|i| *i <= len)
            .ok_or_else(|| format!("slice bound {} out of range (length {})", n, len))
    };
    let (b, e) = (bound(begin, 0)?, bound(end, len)?);
    if b > e {
        return Err(format!("invalid slice range {}:{}", b, e));
    }
    Ok((b, e))
}

fn text_of(value: Value) -> String {
    match value {
        Value::Str(s) => s,
        other => other.to_string(),
    }
}

fn get_item(container: &Value, index: &Value) -> Result<Value, String> {
    match container {
        Value::Slice(items) => {
            let items = items.read();
            Ok(items[index_of(index, items.len())?].clone())
        }
        Value::Map(map) => Ok(map.read().get(&key_of(index)).cloned().unwrap_or_default()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[index_of(index, chars.len())?].to_string()))
        }
        other => Err(format!("cannot index {}", other.type_name())),
    }
}

/// Stores `container[index] = value`. Returns the replacement container
/// when the container is immutable.
fn set_item(container: &Value, index: &Value, value: Value) -> Result<Option<Value>, String> {
    match container {
        Value::Slice(items) => {
            let mut items = items.write();
            let i = index_of(index, items.len())?;
            items[i] = value;
            Ok(None)
        }
        Value::Map(map) => {
            map.write().insert(key_of(index), value);
            Ok(None)
        }
        Value::Str(s) => {
            let mut chars: Vec<String> = s.chars().map(String::from).collect();
            let i = index_of(index, chars.len())?;
            chars[i] = text_of(value);
            Ok(Some(Value::Str(chars.concat())))
        }
        other => Err(format!("cannot index {}", other.type_name())),
    }
}

fn get_sub_slice(container: &Value, begin: &Value, end: &Value) -> Result<Value, String> {
    match container {
        Value::Slice(items) => {
            let items = items.read();
            let (b, e) = bounds(begin, end, items.len())?;
            Ok(Value::slice(items[b..e].to_vec()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (b, e) = bounds(begin, end, chars.len())?;
            Ok(Value::Str(chars[b..e].iter().collect()))
        }
        other => Err(format!("cannot slice {}", other.type_name())),
    }
}

/// Stores `container[begin:end] = value`, with the same replacement rule as
/// [`set_item`].
fn set_slice(
    container: &Value,
    begin: &Value,
    end: &Value,
    value: Value,
) -> Result<Option<Value>, String> {
    match container {
        Value::Slice(items) => {
            let replacement = match value {
                Value::Slice(source) => source.read().clone(),
                other => {
                    return Err(format!("cannot assign {} to a slice range", other.type_name()));
                }
            };
            let mut items = items.write();
            let (b, e) = bounds(begin, end, items.len())?;
            items.splice(b..e, replacement);
            Ok(None)
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (b, e) = bounds(begin, end, chars.len())?;
            let mut out: String = chars[..b].iter().collect();
            out.push_str(&text_of(value));
            out.extend(&chars[e..]);
            Ok(Some(Value::Str(out)))
        }
        other => Err(format!("cannot slice {}", other.type_name())),
    }
}

/// Reads a script-supplied length, rejecting anything above `limit`.
fn size(value: &Value, limit: usize) -> Result<usize, String> {
    if value.is_nil() {
        return Ok(0);
    }
    let n = value
        .as_int()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| format!("invalid size {}", value))?;
    if n > limit {
        return Err(format!("size {} exceeds the limit of {}", n, limit));
    }
    Ok(n)
}

fn channel(value: &Value) -> Result<Arc<Channel>, String> {
    match value {
        Value::Channel(ch) => Ok(ch.clone()),
        other => Err(format!("{} is not a channel", other.type_name())),
    }
}

/// Snapshot of the items `for x in value` visits. Maps yield their keys in
/// order; channels are read until closed; integers count up from zero.
fn cursor(value: &Value) -> Result<Cursor, String> {
    let items: Vec<Value> = match value {
        Value::Channel(ch) => return Ok(Cursor::Channel(ch.clone())),
        Value::Int(n) => return Ok(Cursor::Range(0..*n)),
        Value::Nil => Vec::new(),
        Value::Slice(items) => items.read().clone(),
        Value::Map(map) => map.read().keys().map(|k| Value::Str(k.clone())).collect(),
        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
        other => return Err(format!("cannot iterate over {}", other.type_name())),
    };
    Ok(Cursor::Items(items.into_iter()))
}
