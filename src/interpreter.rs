use std::{cell::RefCell, path::PathBuf, rc::Rc};

use indexmap::IndexMap;

use crate::{
    array::LiteralArray,
    bytecode::{Chunk, Constant, Opcode, Reader},
    compiler,
    diagnostics::{Diagnostic, HyacinthError, Result},
    dictionary::{self, LiteralDictionary},
    drive::DriveTable,
    literal::{
        FunctionLiteral, Literal, LiteralKind, NativeFn, NativeStatus, ScriptFunction, TypeLiteral,
    },
    runner::RunnerArena,
    scope::{Scope, ScopeRef},
};

/// Consumer of one kind of interpreter output.
pub type Sink = Rc<dyn Fn(&str)>;

/// Installs a library into the interpreter. Receives the hook name and the alias (an
/// identifier, or `Null` when the import has none).
pub type HookFn = fn(&mut Interpreter, &Literal, &Literal) -> std::result::Result<(), Diagnostic>;

pub type HookTable = Rc<RefCell<IndexMap<String, HookFn>>>;
pub type DriveTableRef = Rc<RefCell<DriveTable>>;

/// Limit on nested script calls plus nested runners.
pub const MAX_CALL_DEPTH: usize = 256;

// keep this much stack free before entering another `execute` frame
const RED_ZONE: usize = 128 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

pub struct Interpreter {
    globals: ScopeRef,
    scope: ScopeRef,
    stack: LiteralArray,
    print_sink: Sink,
    assert_sink: Sink,
    error_sink: Sink,
    hooks: HookTable,
    drives: DriveTableRef,
    runners: RunnerArena,
    depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Scope::new();
        Self {
            scope: Rc::clone(&globals),
            globals,
            stack: LiteralArray::new(),
            print_sink: Rc::new(|message| println!("{message}")),
            assert_sink: Rc::new(|message| eprintln!("{message}")),
            error_sink: Rc::new(|message| eprintln!("{message}")),
            hooks: Rc::new(RefCell::new(IndexMap::new())),
            drives: Rc::new(RefCell::new(DriveTable::new())),
            runners: RunnerArena::new(),
            depth: 0,
        }
    }

    /// A fresh interpreter that shares `host`'s output sinks, hook table and drive table.
    /// It starts one level below `host`, so runner nesting counts toward the call limit.
    pub fn nested(host: &Interpreter) -> Self {
        Self {
            print_sink: Rc::clone(&host.print_sink),
            assert_sink: Rc::clone(&host.assert_sink),
            error_sink: Rc::clone(&host.error_sink),
            hooks: Rc::clone(&host.hooks),
            drives: Rc::clone(&host.drives),
            depth: host.depth + 1,
            ..Self::new()
        }
    }

    /// Current nesting level: active script calls plus enclosing runners.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn set_print_sink(&mut self, sink: impl Fn(&str) + 'static) {
        self.print_sink = Rc::new(sink);
    }

    pub fn set_assert_sink(&mut self, sink: impl Fn(&str) + 'static) {
        self.assert_sink = Rc::new(sink);
    }

    pub fn set_error_sink(&mut self, sink: impl Fn(&str) + 'static) {
        self.error_sink = Rc::new(sink);
    }

    pub fn report_error(&self, message: &str) {
        (self.error_sink)(message);
    }

    pub fn drives(&self) -> &DriveTableRef {
        &self.drives
    }

    pub fn mount(&self, name: impl Into<String>, root: impl Into<PathBuf>) {
        self.drives.borrow_mut().insert(name, root);
    }

    pub fn inject_native_hook(&mut self, name: impl Into<String>, hook: HookFn) {
        self.hooks.borrow_mut().insert(name.into(), hook);
    }

    /// Declares a native function as a constant in the current scope.
    pub fn inject_native_fn(
        &mut self,
        name: &'static str,
        callback: NativeFn,
    ) -> std::result::Result<(), Diagnostic> {
        let key = Literal::identifier(name);
        let ty = TypeLiteral::new(LiteralKind::Function).constant();
        if !Scope::declare(&self.scope, &key, &ty) {
            return Err(Diagnostic::runtime(format!(
                "can't override an existing variable `{name}`"
            )));
        }
        Scope::set(&self.scope, &key, &Literal::native(name, callback), false)
    }

    /// The innermost active scope.
    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn global(&self, name: &str) -> Option<Literal> {
        Scope::get(&self.globals, &Literal::identifier(name))
    }

    pub fn push(&mut self, literal: Literal) {
        self.stack.push(literal);
    }

    pub fn pop(&mut self) -> Literal {
        self.stack.pop()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Replaces a declared identifier by its value. Anything else, including an undeclared
    /// identifier, is returned unchanged.
    pub fn resolve_identifier(&self, literal: Literal) -> Literal {
        if literal.is_identifier() {
            if let Some(value) = Scope::get(&self.scope, &literal) {
                return value;
            }
        }
        literal
    }

    pub(crate) fn runners_mut(&mut self) -> &mut RunnerArena {
        &mut self.runners
    }

    /// Drops all script state: globals, the value stack and every runner this interpreter
    /// created. Sinks, hooks and drives are kept.
    pub fn reset(&mut self) {
        self.globals = Scope::new();
        self.scope = Rc::clone(&self.globals);
        self.stack.clear();
        self.runners.clear();
    }

    pub fn eval_source(&mut self, source: &str) -> Result<()> {
        let bytecode = compiler::compile(source).map_err(|diag| self.fail(diag.into()))?;
        self.run(bytecode)
    }

    /// Executes a bytecode buffer against the global scope, consuming it. Errors are sent to
    /// the error sink before `Halted` is returned.
    pub fn run(&mut self, bytecode: Vec<u8>) -> Result<()> {
        tracing::trace!(bytes = bytecode.len(), "running bytecode");
        let result = Chunk::decode(&bytecode)
            .map_err(HyacinthError::from)
            .and_then(|chunk| {
                stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.execute(&chunk))
            });
        drop(bytecode);
        self.scope = Rc::clone(&self.globals);
        self.stack.clear();
        result.map(|_| ()).map_err(|err| self.fail(err))
    }

    /// Calls `function` with already resolved arguments and returns every value it produced.
    pub fn call_literal_fn(&mut self, function: &Literal, args: LiteralArray) -> Result<LiteralArray> {
        let base = self.stack.len();
        let result = match function {
            Literal::Function(FunctionLiteral::Script(script)) => self.call_script(script, args),
            Literal::Function(FunctionLiteral::Native(native)) => {
                let mut args = args;
                match (native.callback)(self, &mut args) {
                    NativeStatus::Failed => Err(HyacinthError::Halted),
                    NativeStatus::Done | NativeStatus::Returned => Ok(self
                        .stack
                        .split_tail(self.stack.len().saturating_sub(base))
                        .unwrap_or_default()),
                }
            }
            other => Err(Diagnostic::runtime(format!("can't call a {} value", other.kind())).into()),
        };
        self.stack.truncate(base);
        result.map_err(|err| self.fail(err))
    }

    fn fail(&self, err: HyacinthError) -> HyacinthError {
        match &err {
            HyacinthError::Halted => {}
            other => {
                tracing::debug!(error = %other, "script halted");
                self.report_error(&other.to_string());
            }
        }
        HyacinthError::Halted
    }

    fn execute(&mut self, chunk: &Chunk) -> Result<Option<LiteralArray>> {
        let mut reader = Reader::new(&chunk.code);
        while !reader.is_at_end() {
            match reader.opcode()? {
                Opcode::Constant => {
                    let literal = chunk.constant(reader.u16()?)?.to_literal(&self.scope);
                    self.push(literal);
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Declare => {
                    let name = self.name_operand(chunk, &mut reader)?;
                    let ty = match chunk.constant(reader.u16()?)? {
                        Constant::Type(ty) => ty.clone(),
                        _ => TypeLiteral::any(),
                    };
                    let value = self.pop_value()?;
                    if !Scope::declare(&self.scope, &name, &ty) {
                        return Err(
                            Diagnostic::runtime(format!("can't redefine the variable `{name}`"))
                                .into(),
                        );
                    }
                    Scope::set(&self.scope, &name, &value, false)?;
                }
                Opcode::Assign => {
                    let name = self.name_operand(chunk, &mut reader)?;
                    let value = self.pop_value()?;
                    Scope::set(&self.scope, &name, &value, true)?;
                    self.push(value);
                }
                Opcode::AssignIndex => {
                    let name = self.name_operand(chunk, &mut reader)?;
                    let value = self.pop_value()?;
                    let key = self.pop_value()?;
                    let container = self.resolve(name.clone())?;
                    let updated = store_index(container, &key, &value)?;
                    Scope::set(&self.scope, &name, &updated, true)?;
                    self.push(value);
                }
                Opcode::Import => {
                    let name = self.name_operand(chunk, &mut reader)?;
                    let alias = chunk.constant(reader.u16()?)?.to_literal(&self.scope);
                    self.import(&name, &alias)?;
                }
                Opcode::Index => {
                    let key = self.pop_value()?;
                    let target = self.pop_value()?;
                    self.push(load_index(&target, &key)?);
                }
                Opcode::Negate => match self.pop_value()? {
                    Literal::Number(n) => self.push(Literal::Number(-n)),
                    other => {
                        return Err(Diagnostic::runtime(format!(
                            "can't negate a {} value",
                            other.kind()
                        ))
                        .into());
                    }
                },
                Opcode::Not => {
                    let value = self.pop_value()?;
                    self.push(Literal::Boolean(!value.is_truthy()));
                }
                op @ (Opcode::Equal | Opcode::NotEqual) => {
                    let right = self.pop_value()?;
                    let left = self.pop_value()?;
                    self.push(Literal::Boolean((left == right) == (op == Opcode::Equal)));
                }
                op @ (Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Modulo
                | Opcode::Less
                | Opcode::LessEqual
                | Opcode::Greater
                | Opcode::GreaterEqual) => {
                    let right = self.pop_value()?;
                    let left = self.pop_value()?;
                    self.push(binary(op, &left, &right)?);
                }
                Opcode::Array => {
                    let count = usize::from(reader.u16()?);
                    let elements = self.pop_values(count)?;
                    self.push(Literal::array(elements));
                }
                Opcode::Dictionary => {
                    let count = usize::from(reader.u16()?);
                    let entries = self.pop_values(count * 2)?.into_vec();
                    let mut dictionary = LiteralDictionary::new();
                    for pair in entries.chunks_exact(2) {
                        dictionary
                            .set(&pair[0], &pair[1])
                            .map_err(|err| Diagnostic::runtime(err.to_string()))?;
                    }
                    self.push(Literal::dictionary(dictionary));
                }
                Opcode::Call => {
                    let argc = usize::from(reader.u8()?);
                    let args = self.split_stack(argc)?;
                    let callee = self.pop_value()?;
                    self.call(callee, args)?;
                }
                Opcode::Return => {
                    let count = usize::from(reader.u8()?);
                    return Ok(Some(self.pop_values(count)?));
                }
                Opcode::Jump => {
                    reader.position = reader.u32()? as usize;
                }
                Opcode::JumpIfFalse => {
                    let target = reader.u32()? as usize;
                    if !self.pop_value()?.is_truthy() {
                        reader.position = target;
                    }
                }
                Opcode::ScopeBegin => self.scope = Scope::push(&self.scope),
                Opcode::ScopeEnd => self.scope = Scope::pop(&self.scope),
                Opcode::Print => {
                    let value = self.pop_value()?;
                    (self.print_sink)(&value.to_string());
                }
                Opcode::Assert => {
                    let message = if reader.u8()? != 0 {
                        Some(self.pop_value()?)
                    } else {
                        None
                    };
                    if !self.pop_value()?.is_truthy() {
                        let message = message
                            .map(|message| message.to_string())
                            .unwrap_or_else(|| "assertion failed".to_string());
                        (self.assert_sink)(&message);
                        return Err(HyacinthError::Halted);
                    }
                }
            }
        }
        Ok(None)
    }

    fn import(&mut self, name: &Literal, alias: &Literal) -> Result<()> {
        let key = name.as_identifier().unwrap_or_default();
        let hook = self.hooks.borrow().get(key).copied();
        let hook = hook.ok_or_else(|| Diagnostic::runtime(format!("unknown library `{key}`")))?;
        hook(self, name, alias)?;
        Ok(())
    }

    fn call(&mut self, callee: Literal, mut args: LiteralArray) -> Result<()> {
        match callee {
            Literal::Function(FunctionLiteral::Native(native)) => {
                let base = self.stack.len();
                let status = (native.callback)(self, &mut args);
                tracing::trace!(native = native.name, code = status.code(), "native returned");
                match status {
                    NativeStatus::Failed => {
                        self.stack.truncate(base);
                        Err(HyacinthError::Halted)
                    }
                    NativeStatus::Done => {
                        self.stack.truncate(base);
                        self.push(Literal::Null);
                        Ok(())
                    }
                    NativeStatus::Returned => {
                        let result = if self.stack.len() > base {
                            self.pop()
                        } else {
                            Literal::Null
                        };
                        self.stack.truncate(base);
                        self.push(result);
                        Ok(())
                    }
                }
            }
            Literal::Function(FunctionLiteral::Script(function)) => {
                let args = args
                    .into_vec()
                    .into_iter()
                    .map(|arg| self.resolve(arg))
                    .collect::<Result<LiteralArray>>()?;
                let values = self.call_script(&function, args)?;
                self.push(values.first().cloned().unwrap_or_default());
                Ok(())
            }
            other => Err(Diagnostic::runtime(format!("can't call a {} value", other.kind())).into()),
        }
    }

    fn call_script(&mut self, function: &ScriptFunction, args: LiteralArray) -> Result<LiteralArray> {
        let captured = function.scope.upgrade().ok_or_else(|| {
            Diagnostic::runtime("can't call a function whose scope has been released")
        })?;
        let chunk = Chunk::decode(&function.bytecode)?;
        if chunk.params.len() != args.len() {
            return Err(Diagnostic::runtime(format!(
                "function expected {} arguments but received {}",
                chunk.params.len(),
                args.len()
            ))
            .into());
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Diagnostic::runtime("call stack overflow")
                .with_note(format!("scripts may nest at most {MAX_CALL_DEPTH} calls"))
                .into());
        }

        let frame = Scope::push(&captured);
        for (param, arg) in chunk.params.iter().zip(args.into_vec()) {
            let name = Literal::Identifier(Rc::clone(param));
            Scope::declare(&frame, &name, &TypeLiteral::any());
            Scope::set(&frame, &name, &arg, false)?;
        }

        let previous = std::mem::replace(&mut self.scope, frame);
        let base = self.stack.len();
        self.depth += 1;
        let result = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.execute(&chunk));
        self.depth -= 1;
        self.scope = previous;
        self.stack.truncate(base);
        Ok(result?.unwrap_or_default())
    }

    fn name_operand(&self, chunk: &Chunk, reader: &mut Reader<'_>) -> Result<Literal> {
        Ok(chunk.constant(reader.u16()?)?.to_literal(&self.scope))
    }

    fn resolve(&self, literal: Literal) -> Result<Literal> {
        match literal {
            Literal::Identifier(name) => {
                let key = Literal::Identifier(Rc::clone(&name));
                Scope::get(&self.scope, &key).ok_or_else(|| {
                    Diagnostic::runtime(format!("undeclared variable `{name}`")).into()
                })
            }
            other => Ok(other),
        }
    }

    fn pop_value(&mut self) -> Result<Literal> {
        let literal = self.pop();
        self.resolve(literal)
    }

    fn split_stack(&mut self, count: usize) -> Result<LiteralArray> {
        self.stack
            .split_tail(count)
            .ok_or_else(|| Diagnostic::runtime("value stack underflow").into())
    }

    fn pop_values(&mut self, count: usize) -> Result<LiteralArray> {
        self.split_stack(count)?
            .into_vec()
            .into_iter()
            .map(|literal| self.resolve(literal))
            .collect()
    }
}

fn binary(op: Opcode, left: &Literal, right: &Literal) -> Result<Literal> {
    let result = match (left, right) {
        (Literal::Number(a), Literal::Number(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Opcode::Add => Literal::Number(a + b),
                Opcode::Subtract => Literal::Number(a - b),
                Opcode::Multiply => Literal::Number(a * b),
                Opcode::Divide | Opcode::Modulo if b == 0.0 => {
                    return Err(Diagnostic::runtime("can't divide by zero").into());
                }
                Opcode::Divide => Literal::Number(a / b),
                Opcode::Modulo => Literal::Number(a % b),
                Opcode::Less => Literal::Boolean(a < b),
                Opcode::LessEqual => Literal::Boolean(a <= b),
                Opcode::Greater => Literal::Boolean(a > b),
                Opcode::GreaterEqual => Literal::Boolean(a >= b),
                _ => return Err(mismatch(op, left, right)),
            }
        }
        (Literal::String(a), Literal::String(b)) => match op {
            Opcode::Add => Literal::string(format!("{a}{b}")),
            Opcode::Less => Literal::Boolean(a < b),
            Opcode::LessEqual => Literal::Boolean(a <= b),
            Opcode::Greater => Literal::Boolean(a > b),
            Opcode::GreaterEqual => Literal::Boolean(a >= b),
            _ => return Err(mismatch(op, left, right)),
        },
        _ => return Err(mismatch(op, left, right)),
    };
    Ok(result)
}

fn mismatch(op: Opcode, left: &Literal, right: &Literal) -> HyacinthError {
    let symbol = match op {
        Opcode::Add => "+",
        Opcode::Subtract => "-",
        Opcode::Multiply => "*",
        Opcode::Divide => "/",
        Opcode::Modulo => "%",
        Opcode::Less => "<",
        Opcode::LessEqual => "<=",
        Opcode::Greater => ">",
        Opcode::GreaterEqual => ">=",
        _ => "?",
    };
    Diagnostic::runtime(format!(
        "can't apply `{symbol}` to {} and {}",
        left.kind(),
        right.kind()
    ))
    .into()
}

fn array_index(len: usize, key: &Literal) -> Result<usize> {
    match key {
        Literal::Number(n) if n.fract() == 0.0 && *n >= 0.0 && (*n as usize) < len => {
            Ok(*n as usize)
        }
        Literal::Number(n) => Err(Diagnostic::runtime(format!("index {n} out of bounds")).into()),
        other => Err(Diagnostic::runtime(format!("can't index with a {} value", other.kind())).into()),
    }
}

fn load_index(target: &Literal, key: &Literal) -> Result<Literal> {
    match target {
        Literal::Array(values) => {
            let index = array_index(values.len(), key)?;
            Ok(values.get(index).cloned().unwrap_or_default())
        }
        Literal::String(text) => {
            let index = array_index(text.chars().count(), key)?;
            Ok(text
                .chars()
                .nth(index)
                .map(|ch| Literal::string(ch.to_string()))
                .unwrap_or_default())
        }
        Literal::Dictionary(entries) => {
            dictionary::check_key(key).map_err(|err| Diagnostic::runtime(err.to_string()))?;
            Ok(entries.get(key))
        }
        other => Err(Diagnostic::runtime(format!("can't index into a {} value", other.kind())).into()),
    }
}

fn store_index(container: Literal, key: &Literal, value: &Literal) -> Result<Literal> {
    match container {
        Literal::Array(values) => {
            let mut values = Rc::unwrap_or_clone(values);
            let index = array_index(values.len(), key)?;
            values.set(index, value.clone());
            Ok(Literal::array(values))
        }
        Literal::Dictionary(dictionary) => {
            let mut dictionary = Rc::unwrap_or_clone(dictionary);
            dictionary
                .set(key, value)
                .map_err(|err| Diagnostic::runtime(err.to_string()))?;
            Ok(Literal::dictionary(dictionary))
        }
        other => Err(Diagnostic::runtime(format!("can't index into a {} value", other.kind())).into()),
    }
}
