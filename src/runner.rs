//! Nested script runners.
//!
//! A runner owns an isolated interpreter plus the immutable bytecode of one script. Scripts
//! reach runners through opaque handles into the arena of the interpreter that loaded them;
//! the lifecycle (loaded, executed, reset, freed) is enforced by [`Runner`]'s typestate.

use std::{
    io,
    marker::PhantomData,
    path::PathBuf,
    rc::Rc,
    sync::atomic::{AtomicU32, Ordering},
};

use thiserror::Error;

use crate::{
    array::LiteralArray,
    bytecode::{self, DecodeError},
    compiler,
    diagnostics::Diagnostic,
    dictionary::LiteralDictionary,
    drive::{self, DriveError},
    interpreter::{Interpreter, MAX_CALL_DEPTH},
    literal::{
        Literal, LiteralKind, NativeFn, NativeStatus, OPAQUE_TAG_RUNNER, Opaque, OpaqueHandle,
        TypeLiteral,
    },
    scope::Scope,
};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("expected {expected} argument(s), found {found}")]
    ArgumentCount { expected: usize, found: usize },
    #[error("expected at least {minimum} arguments, found {found}")]
    TooFewArguments { minimum: usize, found: usize },
    #[error("undeclared variable `{0}`")]
    Unresolved(String),
    #[error("expected {expected}, found {found}")]
    ArgumentType {
        expected: &'static str,
        found: LiteralKind,
    },
    #[error("unrecognized opaque literal (tag {0})")]
    ForeignOpaque(u32),
    #[error("the runner handle is stale or belongs to another interpreter")]
    StaleHandle,
    #[error("the runner is already executing")]
    Busy,
    #[error("runners are nested too deeply (limit {limit})")]
    TooDeep { limit: usize },
    #[error(transparent)]
    Drive(#[from] DriveError),
    #[error("can't read `{}`: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("can't compile `{}`: {diagnostic}", .path.display())]
    Compile { path: PathBuf, diagnostic: Diagnostic },
    #[error("invalid bytecode in `{}`: {source}", .path.display())]
    Bytecode { path: PathBuf, source: DecodeError },
    #[error("can't re-run a dirty script (try resetting it first)")]
    AlreadyRun,
    #[error("can't {action} a non-dirty script (try running it first)")]
    NotRun { action: &'static str },
    #[error("`{0}` is not a function")]
    NotAFunction(String),
    #[error("call to `{0}` failed")]
    CallFailed(String),
}

/// Runner state: bytecode loaded (or reset), not yet executed.
#[derive(Debug)]
pub struct Loaded;

/// Runner state: the script ran and its globals can be inspected.
#[derive(Debug)]
pub struct Executed;

pub struct Runner<S> {
    interpreter: Interpreter,
    bytecode: Box<[u8]>,
    _state: PhantomData<S>,
}

impl<S> Runner<S> {
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Releases the nested interpreter and the bytecode.
    pub fn free(self) {
        tracing::debug!(bytes = self.bytecode.len(), "runner freed");
    }

    fn into_state<T>(self) -> Runner<T> {
        Runner {
            interpreter: self.interpreter,
            bytecode: self.bytecode,
            _state: PhantomData,
        }
    }
}

impl Runner<Loaded> {
    /// Creates a runner whose interpreter shares `host`'s sinks, hooks and drives.
    pub fn new(host: &Interpreter, bytecode: Vec<u8>) -> Self {
        tracing::debug!(bytes = bytecode.len(), "runner loaded");
        Self {
            interpreter: Interpreter::nested(host),
            bytecode: bytecode.into_boxed_slice(),
            _state: PhantomData,
        }
    }

    pub fn from_source(host: &Interpreter, source: &str) -> Result<Self, Diagnostic> {
        Ok(Self::new(host, compiler::compile(source)?))
    }

    /// Accepts precompiled bytecode after checking its header.
    pub fn from_bytecode(host: &Interpreter, bytecode: Vec<u8>) -> Result<Self, DecodeError> {
        bytecode::check_header(&bytecode)?;
        Ok(Self::new(host, bytecode))
    }

    /// Executes a private copy of the bytecode. Script errors have already been reported
    /// through the shared error sink; the runner is executed either way.
    pub fn run(mut self) -> Runner<Executed> {
        if self.interpreter.run(self.bytecode.to_vec()).is_err() {
            tracing::debug!("runner script halted");
        }
        tracing::debug!("runner executed");
        self.into_state()
    }
}

impl Runner<Executed> {
    /// Reads a global of the executed script, `Null` when it is not declared.
    pub fn variable(&self, name: &str) -> Literal {
        self.interpreter.global(name).unwrap_or_default()
    }

    /// Calls a global function of the executed script and returns its first result.
    pub fn call(&mut self, name: &str, args: LiteralArray) -> Result<Literal, RunnerError> {
        let function = self.variable(name);
        if !function.is_function() {
            return Err(RunnerError::NotAFunction(name.to_string()));
        }
        let values = self
            .interpreter
            .call_literal_fn(&function, args)
            .map_err(|_| RunnerError::CallFailed(name.to_string()))?;
        Ok(values.first().cloned().unwrap_or_default())
    }

    /// Clears the nested interpreter but keeps the bytecode.
    pub fn reset(mut self) -> Runner<Loaded> {
        self.interpreter.reset();
        tracing::debug!("runner reset");
        self.into_state()
    }
}

/// A runner in either live state, as stored in an arena.
pub enum ScriptRunner {
    Loaded(Runner<Loaded>),
    Executed(Runner<Executed>),
}

impl ScriptRunner {
    pub fn is_dirty(&self) -> bool {
        matches!(self, ScriptRunner::Executed(_))
    }

    pub fn free(self) {
        match self {
            ScriptRunner::Loaded(runner) => runner.free(),
            ScriptRunner::Executed(runner) => runner.free(),
        }
    }

    fn run(self) -> (Self, Result<(), RunnerError>) {
        match self {
            ScriptRunner::Loaded(runner) => (ScriptRunner::Executed(runner.run()), Ok(())),
            executed => (executed, Err(RunnerError::AlreadyRun)),
        }
    }

    fn reset(self) -> (Self, Result<(), RunnerError>) {
        match self {
            ScriptRunner::Executed(runner) => (ScriptRunner::Loaded(runner.reset()), Ok(())),
            loaded => (loaded, Err(RunnerError::NotRun { action: "reset" })),
        }
    }
}

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

enum ArenaSlot {
    Vacant { generation: u32 },
    CheckedOut { generation: u32 },
    Occupied { generation: u32, runner: ScriptRunner },
}

impl ArenaSlot {
    fn generation(&self) -> u32 {
        match self {
            ArenaSlot::Vacant { generation }
            | ArenaSlot::CheckedOut { generation }
            | ArenaSlot::Occupied { generation, .. } => *generation,
        }
    }
}

/// Generational storage for the runners an interpreter created. Handles carry the arena id,
/// so a handle from another interpreter is rejected like a stale one.
pub struct RunnerArena {
    id: u32,
    slots: Vec<ArenaSlot>,
}

impl Default for RunnerArena {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerArena {
    pub fn new() -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
        }
    }

    /// Number of live runners.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !matches!(slot, ArenaSlot::Vacant { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, runner: ScriptRunner) -> OpaqueHandle {
        let vacant = self
            .slots
            .iter()
            .position(|slot| matches!(slot, ArenaSlot::Vacant { .. }));
        let index = match vacant {
            Some(index) => index,
            None => {
                self.slots.push(ArenaSlot::Vacant { generation: 0 });
                self.slots.len() - 1
            }
        };
        let generation = self.slots[index].generation();
        self.slots[index] = ArenaSlot::Occupied { generation, runner };
        OpaqueHandle {
            store: self.id,
            index: u32::try_from(index).unwrap_or(u32::MAX),
            generation,
        }
    }

    pub fn get(&self, handle: OpaqueHandle) -> Result<&ScriptRunner, RunnerError> {
        match self.slot(handle)? {
            ArenaSlot::Occupied { runner, .. } => Ok(runner),
            ArenaSlot::CheckedOut { .. } => Err(RunnerError::Busy),
            ArenaSlot::Vacant { .. } => Err(RunnerError::StaleHandle),
        }
    }

    pub fn get_mut(&mut self, handle: OpaqueHandle) -> Result<&mut ScriptRunner, RunnerError> {
        let index = self.index(handle)?;
        match &mut self.slots[index] {
            ArenaSlot::Occupied { runner, .. } => Ok(runner),
            ArenaSlot::CheckedOut { .. } => Err(RunnerError::Busy),
            ArenaSlot::Vacant { .. } => Err(RunnerError::StaleHandle),
        }
    }

    /// Moves the runner out for a state transition and puts the result back.
    pub fn transition<T>(
        &mut self,
        handle: OpaqueHandle,
        step: impl FnOnce(ScriptRunner) -> (ScriptRunner, Result<T, RunnerError>),
    ) -> Result<T, RunnerError> {
        let index = self.index(handle)?;
        let generation = handle.generation;
        let slot = std::mem::replace(&mut self.slots[index], ArenaSlot::CheckedOut { generation });
        let runner = match slot {
            ArenaSlot::Occupied { runner, .. } => runner,
            other => {
                let err = match other {
                    ArenaSlot::CheckedOut { .. } => RunnerError::Busy,
                    _ => RunnerError::StaleHandle,
                };
                self.slots[index] = other;
                return Err(err);
            }
        };
        let (runner, result) = step(runner);
        self.slots[index] = ArenaSlot::Occupied { generation, runner };
        result
    }

    /// Removes the runner and invalidates every handle to it.
    pub fn remove(&mut self, handle: OpaqueHandle) -> Result<ScriptRunner, RunnerError> {
        self.get(handle)?;
        let index = self.index(handle)?;
        let next = ArenaSlot::Vacant {
            generation: handle.generation.wrapping_add(1),
        };
        match std::mem::replace(&mut self.slots[index], next) {
            ArenaSlot::Occupied { runner, .. } => Ok(runner),
            _ => Err(RunnerError::StaleHandle),
        }
    }

    /// Drops every runner and invalidates all outstanding handles.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            let generation = slot.generation().wrapping_add(1);
            *slot = ArenaSlot::Vacant { generation };
        }
    }

    fn index(&self, handle: OpaqueHandle) -> Result<usize, RunnerError> {
        let index = handle.index as usize;
        let live = handle.store == self.id
            && self
                .slots
                .get(index)
                .is_some_and(|slot| slot.generation() == handle.generation);
        if live {
            Ok(index)
        } else {
            Err(RunnerError::StaleHandle)
        }
    }

    fn slot(&self, handle: OpaqueHandle) -> Result<&ArenaSlot, RunnerError> {
        self.index(handle).map(|index| &self.slots[index])
    }
}

const RUNNER_NATIVES: [(&str, NativeFn); 8] = [
    ("loadScript", native_load_script),
    ("loadScriptBytecode", native_load_script_bytecode),
    ("runScript", native_run_script),
    ("getScriptVar", native_get_script_var),
    ("callScriptFn", native_call_script_fn),
    ("resetScript", native_reset_script),
    ("freeScript", native_free_script),
    ("checkScriptDirty", native_check_script_dirty),
];

/// Installs the runner natives: directly into the current scope when `alias` is `Null`,
/// otherwise as a constant `dictionary<string, function>` named by `alias`.
pub fn hook_runner(
    interpreter: &mut Interpreter,
    identifier: &Literal,
    alias: &Literal,
) -> Result<(), Diagnostic> {
    tracing::debug!(library = %identifier, alias = %alias, "installing runner natives");
    match alias {
        Literal::Null => {
            for (name, callback) in RUNNER_NATIVES {
                interpreter.inject_native_fn(name, callback)?;
            }
            Ok(())
        }
        Literal::Identifier(_) => {
            if Scope::is_declared(interpreter.scope(), alias) {
                return Err(Diagnostic::runtime(format!(
                    "can't override an existing variable `{alias}`"
                )));
            }
            let mut natives = LiteralDictionary::new();
            for (name, callback) in RUNNER_NATIVES {
                natives
                    .set(&Literal::string(name), &Literal::native(name, callback))
                    .map_err(|err| Diagnostic::runtime(err.to_string()))?;
            }
            let ty = TypeLiteral::new(LiteralKind::Dictionary)
                .with_subtype(TypeLiteral::new(LiteralKind::String).constant())
                .with_subtype(TypeLiteral::new(LiteralKind::Function).constant())
                .constant();
            Scope::declare(interpreter.scope(), alias, &ty);
            Scope::set(interpreter.scope(), alias, &Literal::dictionary(natives), false)
        }
        other => Err(Diagnostic::runtime(format!(
            "library alias must be an identifier, found {}",
            other.kind()
        ))),
    }
}

/// Runs a native body and translates its outcome into a status, reporting failures to the
/// error sink.
fn report(
    interpreter: &mut Interpreter,
    name: &'static str,
    body: impl FnOnce(&mut Interpreter) -> Result<Option<Literal>, RunnerError>,
) -> NativeStatus {
    match body(interpreter) {
        Ok(Some(result)) => {
            interpreter.push(result);
            NativeStatus::Returned
        }
        Ok(None) => NativeStatus::Done,
        Err(err) => {
            tracing::debug!(native = name, error = %err, "runner native failed");
            interpreter.report_error(&format!("{name}: {err}"));
            NativeStatus::Failed
        }
    }
}

fn expect_arguments(arguments: &LiteralArray, expected: usize) -> Result<(), RunnerError> {
    if arguments.len() == expected {
        Ok(())
    } else {
        Err(RunnerError::ArgumentCount {
            expected,
            found: arguments.len(),
        })
    }
}

fn resolved(interpreter: &Interpreter, literal: Literal) -> Result<Literal, RunnerError> {
    match interpreter.resolve_identifier(literal) {
        Literal::Identifier(name) => Err(RunnerError::Unresolved(name.to_string())),
        other => Ok(other),
    }
}

fn string_argument(interpreter: &Interpreter, literal: Literal) -> Result<Rc<str>, RunnerError> {
    match resolved(interpreter, literal)? {
        Literal::String(text) => Ok(text),
        other => Err(RunnerError::ArgumentType {
            expected: "a string",
            found: other.kind(),
        }),
    }
}

fn runner_handle(interpreter: &Interpreter, literal: Literal) -> Result<OpaqueHandle, RunnerError> {
    match resolved(interpreter, literal)? {
        Literal::Opaque(opaque) if opaque.tag == OPAQUE_TAG_RUNNER => Ok(opaque.handle),
        Literal::Opaque(opaque) => Err(RunnerError::ForeignOpaque(opaque.tag)),
        other => Err(RunnerError::ArgumentType {
            expected: "a script runner",
            found: other.kind(),
        }),
    }
}

/// Resolves a drive path argument and reads the file behind it.
fn read_drive_file(
    interpreter: &Interpreter,
    literal: Literal,
) -> Result<(PathBuf, Vec<u8>), RunnerError> {
    let drive_path = string_argument(interpreter, literal)?;
    let path = interpreter.drives().borrow().resolve(&drive_path)?;
    match drive::read_file(&path) {
        Ok(bytes) => Ok((path, bytes)),
        Err(source) => Err(RunnerError::Io { path, source }),
    }
}

/// Refuses to create another nested interpreter once the call limit is reached.
fn check_nesting(interpreter: &Interpreter) -> Result<(), RunnerError> {
    if interpreter.depth() >= MAX_CALL_DEPTH {
        return Err(RunnerError::TooDeep {
            limit: MAX_CALL_DEPTH,
        });
    }
    Ok(())
}

fn adopt(interpreter: &mut Interpreter, runner: Runner<Loaded>) -> Literal {
    let handle = interpreter.runners_mut().insert(ScriptRunner::Loaded(runner));
    Literal::Opaque(Opaque {
        tag: OPAQUE_TAG_RUNNER,
        handle,
    })
}

fn native_load_script(interpreter: &mut Interpreter, arguments: &mut LiteralArray) -> NativeStatus {
    report(interpreter, "loadScript", |interpreter| {
        expect_arguments(arguments, 1)?;
        check_nesting(interpreter)?;
        let (path, bytes) = read_drive_file(interpreter, arguments.pop())?;
        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(err) => {
                let source = io::Error::new(io::ErrorKind::InvalidData, err);
                return Err(RunnerError::Io { path, source });
            }
        };
        let runner = Runner::from_source(interpreter, &source)
            .map_err(|diagnostic| RunnerError::Compile { path, diagnostic })?;
        Ok(Some(adopt(interpreter, runner)))
    })
}

fn native_load_script_bytecode(
    interpreter: &mut Interpreter,
    arguments: &mut LiteralArray,
) -> NativeStatus {
    report(interpreter, "loadScriptBytecode", |interpreter| {
        expect_arguments(arguments, 1)?;
        check_nesting(interpreter)?;
        let (path, bytes) = read_drive_file(interpreter, arguments.pop())?;
        let runner = Runner::from_bytecode(interpreter, bytes)
            .map_err(|source| RunnerError::Bytecode { path, source })?;
        Ok(Some(adopt(interpreter, runner)))
    })
}

fn native_run_script(interpreter: &mut Interpreter, arguments: &mut LiteralArray) -> NativeStatus {
    report(interpreter, "runScript", |interpreter| {
        expect_arguments(arguments, 1)?;
        let handle = runner_handle(interpreter, arguments.pop())?;
        interpreter
            .runners_mut()
            .transition(handle, ScriptRunner::run)?;
        Ok(None)
    })
}

fn native_get_script_var(
    interpreter: &mut Interpreter,
    arguments: &mut LiteralArray,
) -> NativeStatus {
    report(interpreter, "getScriptVar", |interpreter| {
        expect_arguments(arguments, 2)?;
        let name = string_argument(interpreter, arguments.pop())?;
        let handle = runner_handle(interpreter, arguments.pop())?;
        match interpreter.runners_mut().get(handle)? {
            ScriptRunner::Executed(runner) => Ok(Some(runner.variable(&name))),
            ScriptRunner::Loaded(_) => Err(RunnerError::NotRun {
                action: "access a variable from",
            }),
        }
    })
}

fn native_call_script_fn(
    interpreter: &mut Interpreter,
    arguments: &mut LiteralArray,
) -> NativeStatus {
    report(interpreter, "callScriptFn", |interpreter| {
        if arguments.len() < 2 {
            return Err(RunnerError::TooFewArguments {
                minimum: 2,
                found: arguments.len(),
            });
        }
        let extra = arguments.len() - 2;
        let trailing = arguments.split_tail(extra).unwrap_or_default();
        let call_args = trailing
            .into_vec()
            .into_iter()
            .map(|arg| resolved(interpreter, arg))
            .collect::<Result<LiteralArray, _>>()?;
        let name = string_argument(interpreter, arguments.pop())?;
        let handle = runner_handle(interpreter, arguments.pop())?;
        interpreter
            .runners_mut()
            .transition(handle, |runner| match runner {
                ScriptRunner::Executed(mut executed) => {
                    let result = executed.call(&name, call_args).map(Some);
                    (ScriptRunner::Executed(executed), result)
                }
                loaded => {
                    let action = "call a function from";
                    (loaded, Err(RunnerError::NotRun { action }))
                }
            })
    })
}

fn native_reset_script(interpreter: &mut Interpreter, arguments: &mut LiteralArray) -> NativeStatus {
    report(interpreter, "resetScript", |interpreter| {
        expect_arguments(arguments, 1)?;
        let handle = runner_handle(interpreter, arguments.pop())?;
        interpreter
            .runners_mut()
            .transition(handle, ScriptRunner::reset)?;
        Ok(None)
    })
}

fn native_free_script(interpreter: &mut Interpreter, arguments: &mut LiteralArray) -> NativeStatus {
    report(interpreter, "freeScript", |interpreter| {
        expect_arguments(arguments, 1)?;
        let handle = runner_handle(interpreter, arguments.pop())?;
        interpreter.runners_mut().remove(handle)?.free();
        Ok(None)
    })
}

fn native_check_script_dirty(
    interpreter: &mut Interpreter,
    arguments: &mut LiteralArray,
) -> NativeStatus {
    report(interpreter, "checkScriptDirty", |interpreter| {
        expect_arguments(arguments, 1)?;
        let handle = runner_handle(interpreter, arguments.pop())?;
        let dirty = interpreter.runners_mut().get(handle)?.is_dirty();
        Ok(Some(Literal::Boolean(dirty)))
    })
}
