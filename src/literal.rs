use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    array::LiteralArray, dictionary::LiteralDictionary, interpreter::Interpreter, scope::Scope,
};

/// Opaque tag identifying a script runner handle.
pub const OPAQUE_TAG_RUNNER: u32 = 100;

/// The runtime's tagged value.
///
/// Heap-backed variants are reference counted, so cloning a literal hands out an independent
/// owned handle while the underlying buffer stays immutable.
#[derive(Debug, Clone, Default)]
pub enum Literal {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Identifier(Rc<str>),
    Array(Rc<LiteralArray>),
    Dictionary(Rc<LiteralDictionary>),
    Function(FunctionLiteral),
    Opaque(Opaque),
    Type(Rc<TypeLiteral>),
}

impl Literal {
    pub fn boolean(value: bool) -> Self {
        Self::Boolean(value)
    }

    pub fn number(value: f64) -> Self {
        Self::Number(value)
    }

    pub fn string(value: impl Into<Rc<str>>) -> Self {
        Self::String(value.into())
    }

    pub fn identifier(name: impl Into<Rc<str>>) -> Self {
        Self::Identifier(name.into())
    }

    pub fn array(values: LiteralArray) -> Self {
        Self::Array(Rc::new(values))
    }

    pub fn dictionary(dictionary: LiteralDictionary) -> Self {
        Self::Dictionary(Rc::new(dictionary))
    }

    pub fn native(name: &'static str, callback: NativeFn) -> Self {
        Self::Function(FunctionLiteral::Native(NativeFunction { name, callback }))
    }

    pub fn type_of(ty: TypeLiteral) -> Self {
        Self::Type(Rc::new(ty))
    }

    pub fn kind(&self) -> LiteralKind {
        match self {
            Literal::Null => LiteralKind::Null,
            Literal::Boolean(_) => LiteralKind::Boolean,
            Literal::Number(_) => LiteralKind::Number,
            Literal::String(_) => LiteralKind::String,
            Literal::Identifier(_) => LiteralKind::Identifier,
            Literal::Array(_) => LiteralKind::Array,
            Literal::Dictionary(_) => LiteralKind::Dictionary,
            Literal::Function(_) => LiteralKind::Function,
            Literal::Opaque(_) => LiteralKind::Opaque,
            Literal::Type(_) => LiteralKind::Type,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self, Literal::Identifier(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Literal::Function(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Literal::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Literal::Null => false,
            Literal::Boolean(b) => *b,
            Literal::Number(n) => *n != 0.0,
            _ => true,
        }
    }

    /// Hash used by [`LiteralDictionary`] probing. Equal literals hash equally.
    pub fn hash_value(&self) -> u32 {
        match self {
            Literal::Null => 0,
            Literal::Boolean(b) => u32::from(*b) + 1,
            Literal::Number(n) => {
                // -0.0 == 0.0, so both must land in the same bucket
                let normalized = if *n == 0.0 { 0.0_f64 } else { *n };
                fnv1a(&normalized.to_bits().to_le_bytes())
            }
            Literal::String(text) | Literal::Identifier(text) => fnv1a(text.as_bytes()),
            Literal::Array(values) => values
                .iter()
                .fold(FNV_OFFSET, |acc, value| {
                    (acc ^ value.hash_value()).wrapping_mul(FNV_PRIME)
                }),
            Literal::Dictionary(dictionary) => dictionary
                .entries()
                .fold(0_u32, |acc, (key, value)| {
                    acc.wrapping_add(key.hash_value() ^ value.hash_value().rotate_left(16))
                }),
            Literal::Function(function) => fnv1a(&function.address().to_le_bytes()),
            Literal::Opaque(opaque) => {
                let mut bytes = [0_u8; 16];
                bytes[..4].copy_from_slice(&opaque.tag.to_le_bytes());
                bytes[4..8].copy_from_slice(&opaque.handle.store.to_le_bytes());
                bytes[8..12].copy_from_slice(&opaque.handle.index.to_le_bytes());
                bytes[12..].copy_from_slice(&opaque.handle.generation.to_le_bytes());
                fnv1a(&bytes)
            }
            Literal::Type(ty) => fnv1a(ty.kind.name().as_bytes()),
        }
    }

    /// Formats the literal as an element of an array or dictionary, quoting strings.
    pub(crate) fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(text) => write!(f, "\"{text}\""),
            other => write!(f, "{other}"),
        }
    }
}

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Boolean(a), Literal::Boolean(b)) => a == b,
            (Literal::Number(a), Literal::Number(b)) => a == b,
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::Identifier(a), Literal::Identifier(b)) => a == b,
            (Literal::Array(a), Literal::Array(b)) => a == b,
            (Literal::Dictionary(a), Literal::Dictionary(b)) => {
                a.len() == b.len()
                    && a
                        .entries()
                        .all(|(key, value)| b.exists(key) && b.get(key) == *value)
            }
            (Literal::Function(a), Literal::Function(b)) => a == b,
            (Literal::Opaque(a), Literal::Opaque(b)) => a == b,
            (Literal::Type(a), Literal::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Literal::String(text) => write!(f, "{text}"),
            Literal::Identifier(name) => write!(f, "{name}"),
            Literal::Array(values) => write!(f, "{values}"),
            Literal::Dictionary(dictionary) => write!(f, "{dictionary}"),
            Literal::Function(FunctionLiteral::Native(native)) => {
                write!(f, "<native fn {}>", native.name)
            }
            Literal::Function(FunctionLiteral::Script(_)) => write!(f, "<fn>"),
            Literal::Opaque(opaque) => write!(f, "<opaque {}>", opaque.tag),
            Literal::Type(ty) => write!(f, "<type {ty}>"),
        }
    }
}

/// Discriminant of a [`Literal`], also used as the base of type descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    Null,
    Boolean,
    Number,
    String,
    Identifier,
    Array,
    Dictionary,
    Function,
    Opaque,
    Type,
    Any,
}

impl LiteralKind {
    pub fn name(self) -> &'static str {
        match self {
            LiteralKind::Null => "null",
            LiteralKind::Boolean => "bool",
            LiteralKind::Number => "number",
            LiteralKind::String => "string",
            LiteralKind::Identifier => "identifier",
            LiteralKind::Array => "array",
            LiteralKind::Dictionary => "dictionary",
            LiteralKind::Function => "function",
            LiteralKind::Opaque => "opaque",
            LiteralKind::Type => "type",
            LiteralKind::Any => "any",
        }
    }

    /// Kinds a script may name in a type annotation.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "bool" => LiteralKind::Boolean,
            "number" => LiteralKind::Number,
            "string" => LiteralKind::String,
            "array" => LiteralKind::Array,
            "dictionary" => LiteralKind::Dictionary,
            "function" => LiteralKind::Function,
            "opaque" => LiteralKind::Opaque,
            "type" => LiteralKind::Type,
            "any" => LiteralKind::Any,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for LiteralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type descriptor attached to declared variables.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeLiteral {
    pub kind: LiteralKind,
    pub constant: bool,
    pub subtypes: Vec<TypeLiteral>,
}

impl TypeLiteral {
    pub fn new(kind: LiteralKind) -> Self {
        Self {
            kind,
            constant: false,
            subtypes: Vec::new(),
        }
    }

    pub fn any() -> Self {
        Self::new(LiteralKind::Any)
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn with_subtype(mut self, subtype: TypeLiteral) -> Self {
        self.subtypes.push(subtype);
        self
    }

    /// Null is accepted by every type; otherwise the kinds must agree.
    pub fn accepts(&self, value: &Literal) -> bool {
        self.kind == LiteralKind::Any || value.is_null() || value.kind() == self.kind
    }
}

impl fmt::Display for TypeLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.subtypes.is_empty() {
            write!(f, "<")?;
            for (idx, subtype) in self.subtypes.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{subtype}")?;
            }
            write!(f, ">")?;
        }
        if self.constant {
            write!(f, " const")?;
        }
        Ok(())
    }
}

/// Outcome of a native call: `Failed` (-1) means the message went to the error sink and
/// nothing was pushed, `Done` (0) pushed nothing, `Returned` (1) pushed exactly one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    Failed,
    Done,
    Returned,
}

impl NativeStatus {
    pub const fn code(self) -> i32 {
        match self {
            NativeStatus::Failed => -1,
            NativeStatus::Done => 0,
            NativeStatus::Returned => 1,
        }
    }
}

pub type NativeFn = fn(&mut Interpreter, &mut LiteralArray) -> NativeStatus;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub callback: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A compiled script function. The captured scope is held weakly so that a scope which
/// stores its own functions does not keep itself alive.
#[derive(Clone)]
pub struct ScriptFunction {
    pub bytecode: Rc<[u8]>,
    pub scope: Weak<RefCell<Scope>>,
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("bytecode_len", &self.bytecode.len())
            .field("scope_alive", &(self.scope.strong_count() > 0))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum FunctionLiteral {
    Native(NativeFunction),
    Script(ScriptFunction),
}

impl FunctionLiteral {
    fn address(&self) -> usize {
        match self {
            FunctionLiteral::Native(native) => native.callback as usize,
            FunctionLiteral::Script(script) => Rc::as_ptr(&script.bytecode) as *const u8 as usize,
        }
    }
}

impl PartialEq for FunctionLiteral {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FunctionLiteral::Native(a), FunctionLiteral::Native(b)) => {
                std::ptr::fn_addr_eq(a.callback, b.callback)
            }
            (FunctionLiteral::Script(a), FunctionLiteral::Script(b)) => {
                Rc::ptr_eq(&a.bytecode, &b.bytecode) && Weak::ptr_eq(&a.scope, &b.scope)
            }
            _ => false,
        }
    }
}

/// Generational handle into an interpreter-owned arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueHandle {
    pub store: u32,
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opaque {
    pub tag: u32,
    pub handle: OpaqueHandle,
}
