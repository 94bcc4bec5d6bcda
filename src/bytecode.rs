//! Self-describing bytecode chunks.
//!
//! Layout: the magic bytes `HYCB`, a format version byte, the parameter names, the constant
//! table and finally the code. Integers are little-endian; strings are a `u32` byte length
//! followed by UTF-8.

use std::rc::Rc;

use thiserror::Error;

use crate::{
    literal::{FunctionLiteral, Literal, LiteralKind, ScriptFunction, TypeLiteral},
    scope::ScopeRef,
};

pub const MAGIC: &[u8; 4] = b"HYCB";
pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing `HYCB` header")]
    BadMagic,
    #[error("unsupported format version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u8),
    #[error("unexpected end of bytecode at offset {0}")]
    UnexpectedEof(usize),
    #[error("invalid UTF-8 in string constant at offset {0}")]
    InvalidUtf8(usize),
    #[error("unknown constant tag {0}")]
    UnknownConstant(u8),
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unknown type kind {0}")]
    InvalidType(u8),
    #[error("constant index {0} out of range")]
    ConstantOutOfRange(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// `u16` constant index.
    Constant = 0,
    Pop,
    /// `u16` name constant, `u16` type constant. Pops the initial value.
    Declare,
    /// `u16` name constant. Peeks the value.
    Assign,
    /// `u16` name constant. Pops value and key, stores into the named container.
    AssignIndex,
    /// `u16` hook name constant, `u16` alias constant.
    Import,
    Index,
    Negate,
    Not,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    /// `u16` element count.
    Array,
    /// `u16` entry count.
    Dictionary,
    /// `u8` argument count.
    Call,
    /// `u8` value count.
    Return,
    /// `u32` absolute target.
    Jump,
    /// `u32` absolute target. Pops the condition.
    JumpIfFalse,
    ScopeBegin,
    ScopeEnd,
    Print,
    /// `u8` flag: a message follows the condition.
    Assert,
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        const TABLE: [Opcode; 30] = [
            Constant,
            Pop,
            Declare,
            Assign,
            AssignIndex,
            Import,
            Index,
            Negate,
            Not,
            Add,
            Subtract,
            Multiply,
            Divide,
            Modulo,
            Equal,
            NotEqual,
            Less,
            LessEqual,
            Greater,
            GreaterEqual,
            Array,
            Dictionary,
            Call,
            Return,
            Jump,
            JumpIfFalse,
            ScopeBegin,
            ScopeEnd,
            Print,
            Assert,
        ];
        TABLE
            .get(usize::from(byte))
            .copied()
            .ok_or(DecodeError::UnknownOpcode(byte))
    }
}

/// Entry of a chunk's constant table.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Identifier(Rc<str>),
    /// A complete nested chunk holding a function body.
    Function(Rc<[u8]>),
    Type(TypeLiteral),
}

impl Constant {
    /// Materializes the constant. Functions capture `scope` weakly.
    pub fn to_literal(&self, scope: &ScopeRef) -> Literal {
        match self {
            Constant::Null => Literal::Null,
            Constant::Boolean(b) => Literal::Boolean(*b),
            Constant::Number(n) => Literal::Number(*n),
            Constant::String(text) => Literal::String(Rc::clone(text)),
            Constant::Identifier(name) => Literal::Identifier(Rc::clone(name)),
            Constant::Function(bytecode) => {
                Literal::Function(FunctionLiteral::Script(ScriptFunction {
                    bytecode: Rc::clone(bytecode),
                    scope: Rc::downgrade(scope),
                }))
            }
            Constant::Type(ty) => Literal::type_of(ty.clone()),
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Constant::Null => 0,
            Constant::Boolean(_) => 1,
            Constant::Number(_) => 2,
            Constant::String(_) => 3,
            Constant::Identifier(_) => 4,
            Constant::Function(_) => 5,
            Constant::Type(_) => 6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub params: Vec<Rc<str>>,
    pub constants: Vec<Constant>,
    pub code: Vec<u8>,
}

impl Chunk {
    pub fn constant(&self, index: u16) -> Result<&Constant, DecodeError> {
        self.constants
            .get(usize::from(index))
            .ok_or(DecodeError::ConstantOutOfRange(index))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code.len() + 64);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        write_u16(&mut out, self.params.len());
        for param in &self.params {
            write_str(&mut out, param);
        }
        write_u16(&mut out, self.constants.len());
        for constant in &self.constants {
            out.push(constant.tag());
            match constant {
                Constant::Null => {}
                Constant::Boolean(b) => out.push(u8::from(*b)),
                Constant::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
                Constant::String(text) | Constant::Identifier(text) => write_str(&mut out, text),
                Constant::Function(bytes) => {
                    write_u32(&mut out, bytes.len());
                    out.extend_from_slice(bytes);
                }
                Constant::Type(ty) => write_type(&mut out, ty),
            }
        }
        write_u32(&mut out, self.code.len());
        out.extend_from_slice(&self.code);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        reader.header()?;
        let param_count = reader.u16()?;
        let mut params = Vec::with_capacity(usize::from(param_count));
        for _ in 0..param_count {
            params.push(reader.string()?);
        }
        let constant_count = reader.u16()?;
        let mut constants = Vec::with_capacity(usize::from(constant_count));
        for _ in 0..constant_count {
            constants.push(reader.constant()?);
        }
        let code_len = reader.u32()? as usize;
        let code = reader.take(code_len)?.to_vec();
        Ok(Self {
            params,
            constants,
            code,
        })
    }
}

/// Validates the magic bytes and format version without decoding the rest.
pub fn check_header(bytes: &[u8]) -> Result<(), DecodeError> {
    Reader::new(bytes).header()
}

fn write_u16(out: &mut Vec<u8>, value: usize) {
    let value = u16::try_from(value).unwrap_or(u16::MAX);
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: usize) {
    let value = u32::try_from(value).unwrap_or(u32::MAX);
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, text: &str) {
    write_u32(out, text.len());
    out.extend_from_slice(text.as_bytes());
}

fn write_type(out: &mut Vec<u8>, ty: &TypeLiteral) {
    out.push(kind_code(ty.kind));
    out.push(u8::from(ty.constant));
    out.push(u8::try_from(ty.subtypes.len()).unwrap_or(u8::MAX));
    for subtype in &ty.subtypes {
        write_type(out, subtype);
    }
}

const KINDS: [LiteralKind; 11] = [
    LiteralKind::Null,
    LiteralKind::Boolean,
    LiteralKind::Number,
    LiteralKind::String,
    LiteralKind::Identifier,
    LiteralKind::Array,
    LiteralKind::Dictionary,
    LiteralKind::Function,
    LiteralKind::Opaque,
    LiteralKind::Type,
    LiteralKind::Any,
];

fn kind_code(kind: LiteralKind) -> u8 {
    KINDS
        .iter()
        .position(|candidate| *candidate == kind)
        .and_then(|index| u8::try_from(index).ok())
        .unwrap_or(u8::MAX)
}

/// Cursor over an encoded chunk; also used by the interpreter to read operands.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pub position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn header(&mut self) -> Result<(), DecodeError> {
        if self.take(MAGIC.len()).map_err(|_| DecodeError::BadMagic)? != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        match self.u8()? {
            FORMAT_VERSION => Ok(()),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::UnexpectedEof(self.position))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0_u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn opcode(&mut self) -> Result<Opcode, DecodeError> {
        Opcode::try_from(self.u8()?)
    }

    fn string(&mut self) -> Result<Rc<str>, DecodeError> {
        let len = self.u32()? as usize;
        let start = self.position;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(Rc::from)
            .map_err(|_| DecodeError::InvalidUtf8(start))
    }

    fn constant(&mut self) -> Result<Constant, DecodeError> {
        let constant = match self.u8()? {
            0 => Constant::Null,
            1 => Constant::Boolean(self.u8()? != 0),
            2 => Constant::Number(f64::from_le_bytes(self.array()?)),
            3 => Constant::String(self.string()?),
            4 => Constant::Identifier(self.string()?),
            5 => {
                let len = self.u32()? as usize;
                let body = self.take(len)?;
                check_header(body)?;
                Constant::Function(Rc::from(body))
            }
            6 => Constant::Type(self.type_literal()?),
            tag => return Err(DecodeError::UnknownConstant(tag)),
        };
        Ok(constant)
    }

    fn type_literal(&mut self) -> Result<TypeLiteral, DecodeError> {
        let code = self.u8()?;
        let kind = KINDS
            .get(usize::from(code))
            .copied()
            .ok_or(DecodeError::InvalidType(code))?;
        let mut ty = TypeLiteral::new(kind);
        ty.constant = self.u8()? != 0;
        let subtypes = self.u8()?;
        for _ in 0..subtypes {
            ty.subtypes.push(self.type_literal()?);
        }
        Ok(ty)
    }
}

