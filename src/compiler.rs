use std::rc::Rc;

use crate::{
    ast::{Atom, BinaryOp, Expr, ExprKind, Stmt, StmtKind, TypeExpr, UnaryOp},
    bytecode::{Chunk, Constant, Opcode},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    literal::{LiteralKind, TypeLiteral},
    parser::parse_program,
};

/// Compiles source text into an encoded bytecode chunk.
pub fn compile(source: &str) -> Result<Vec<u8>, Diagnostic> {
    let program = parse_program(source)?;
    let mut compiler = Compiler::default();
    compiler.compile_statements(&program.items)?;
    Ok(compiler.chunk.encode())
}

#[derive(Debug, Default)]
struct LoopContext {
    /// Scope depth outside the loop body.
    depth: usize,
    start: usize,
    breaks: Vec<usize>,
}

#[derive(Default)]
struct Compiler {
    chunk: Chunk,
    loops: Vec<LoopContext>,
    depth: usize,
}

impl Compiler {
    fn compile_statements(&mut self, statements: &[Stmt]) -> Result<(), Diagnostic> {
        for stmt in statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_scoped(&mut self, statements: &[Stmt]) -> Result<(), Diagnostic> {
        self.emit(Opcode::ScopeBegin);
        self.depth += 1;
        self.compile_statements(statements)?;
        self.depth -= 1;
        self.emit(Opcode::ScopeEnd);
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), Diagnostic> {
        match &stmt.kind {
            StmtKind::VarDecl {
                name,
                constant,
                annotation,
                initializer,
            } => {
                match initializer {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_constant(Constant::Null, stmt.span)?,
                }
                let mut ty = match annotation {
                    Some(annotation) => type_literal(annotation)?,
                    None => TypeLiteral::any(),
                };
                if *constant {
                    ty = ty.constant();
                }
                self.emit_declare(name, ty, stmt.span)?;
            }
            StmtKind::Function { name, params, body } => {
                let mut function = Compiler::default();
                function.chunk.params = params.iter().map(|param| Rc::from(param.as_str())).collect();
                function.compile_statements(body)?;
                function.emit(Opcode::Return);
                function.chunk.code.push(0);
                let bytecode = function.chunk.encode();
                self.emit_constant(Constant::Function(Rc::from(bytecode)), stmt.span)?;
                self.emit_declare(name, TypeLiteral::new(LiteralKind::Function), stmt.span)?;
            }
            StmtKind::Import { name, alias } => {
                let name = self.constant(Constant::Identifier(Rc::from(name.as_str())), stmt.span)?;
                let alias = match alias {
                    Some(alias) => Constant::Identifier(Rc::from(alias.as_str())),
                    None => Constant::Null,
                };
                let alias = self.constant(alias, stmt.span)?;
                self.emit(Opcode::Import);
                self.emit_u16(name);
                self.emit_u16(alias);
            }
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop);
            }
            StmtKind::Block(items) => self.compile_scoped(items)?,
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(condition)?;
                let jump_if_false = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_scoped(then_branch)?;
                let jump_to_end = self.emit_jump(Opcode::Jump);
                self.patch_jump(jump_if_false);
                if let Some(else_branch) = else_branch {
                    self.compile_scoped(else_branch)?;
                }
                self.patch_jump(jump_to_end);
            }
            StmtKind::While { condition, body } => {
                let start = self.chunk.code.len();
                self.loops.push(LoopContext {
                    depth: self.depth,
                    start,
                    breaks: Vec::new(),
                });
                self.compile_expr(condition)?;
                let jump_if_false = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_scoped(body)?;
                self.emit_jump_to(Opcode::Jump, start);
                self.patch_jump(jump_if_false);
                if let Some(context) = self.loops.pop() {
                    for jump in context.breaks {
                        self.patch_jump(jump);
                    }
                }
            }
            StmtKind::Return(values) => {
                let count = u8::try_from(values.len())
                    .map_err(|_| compile_error("too many return values", stmt.span))?;
                for value in values {
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::Return);
                self.chunk.code.push(count);
            }
            StmtKind::Break => {
                let depth = self.unwind_to_loop("break", stmt.span)?;
                self.close_scopes(depth);
                let jump = self.emit_jump(Opcode::Jump);
                if let Some(context) = self.loops.last_mut() {
                    context.breaks.push(jump);
                }
            }
            StmtKind::Continue => {
                let depth = self.unwind_to_loop("continue", stmt.span)?;
                self.close_scopes(depth);
                let start = self.loops.last().map(|context| context.start).unwrap_or(0);
                self.emit_jump_to(Opcode::Jump, start);
            }
            StmtKind::Print(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Print);
            }
            StmtKind::Assert { condition, message } => {
                self.compile_expr(condition)?;
                if let Some(message) = message {
                    self.compile_expr(message)?;
                }
                self.emit(Opcode::Assert);
                self.chunk.code.push(u8::from(message.is_some()));
            }
        }
        Ok(())
    }

    /// Number of scopes opened since the innermost loop was entered.
    fn unwind_to_loop(&self, keyword: &str, span: SourceSpan) -> Result<usize, Diagnostic> {
        self.loops
            .last()
            .map(|context| self.depth - context.depth)
            .ok_or_else(|| compile_error(format!("`{keyword}` used outside of a loop"), span))
    }

    fn close_scopes(&mut self, count: usize) {
        for _ in 0..count {
            self.emit(Opcode::ScopeEnd);
        }
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        match &expr.kind {
            ExprKind::Atom(atom) => {
                let constant = match atom {
                    Atom::Number(n) => Constant::Number(*n),
                    Atom::Bool(b) => Constant::Boolean(*b),
                    Atom::String(text) => Constant::String(Rc::from(text.as_str())),
                    Atom::Null => Constant::Null,
                };
                self.emit_constant(constant, expr.span)?;
            }
            ExprKind::Variable(name) => {
                self.emit_constant(Constant::Identifier(Rc::from(name.as_str())), expr.span)?;
            }
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                // a && b  ==>  a ? (b ? true : false) : false
                self.compile_expr(left)?;
                let left_false = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(right)?;
                let right_false = self.emit_jump(Opcode::JumpIfFalse);
                self.emit_constant(Constant::Boolean(true), expr.span)?;
                let end = self.emit_jump(Opcode::Jump);
                self.patch_jump(left_false);
                self.patch_jump(right_false);
                self.emit_constant(Constant::Boolean(false), expr.span)?;
                self.patch_jump(end);
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                self.compile_expr(left)?;
                let try_right = self.emit_jump(Opcode::JumpIfFalse);
                self.emit_constant(Constant::Boolean(true), expr.span)?;
                let left_true = self.emit_jump(Opcode::Jump);
                self.patch_jump(try_right);
                self.compile_expr(right)?;
                let right_false = self.emit_jump(Opcode::JumpIfFalse);
                self.emit_constant(Constant::Boolean(true), expr.span)?;
                let right_true = self.emit_jump(Opcode::Jump);
                self.patch_jump(right_false);
                self.emit_constant(Constant::Boolean(false), expr.span)?;
                self.patch_jump(left_true);
                self.patch_jump(right_true);
            }
            ExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(match op {
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Subtract,
                    BinaryOp::Mul => Opcode::Multiply,
                    BinaryOp::Div => Opcode::Divide,
                    BinaryOp::Mod => Opcode::Modulo,
                    BinaryOp::Equal => Opcode::Equal,
                    BinaryOp::NotEqual => Opcode::NotEqual,
                    BinaryOp::Less => Opcode::Less,
                    BinaryOp::LessEqual => Opcode::LessEqual,
                    BinaryOp::Greater => Opcode::Greater,
                    BinaryOp::GreaterEqual => Opcode::GreaterEqual,
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                });
            }
            ExprKind::Unary { op, expr: inner } => {
                self.compile_expr(inner)?;
                self.emit(match op {
                    UnaryOp::Negate => Opcode::Negate,
                    UnaryOp::Not => Opcode::Not,
                });
            }
            ExprKind::Assign { target, value } => self.compile_assign(target, value)?,
            ExprKind::Call { callee, args } => {
                let argc = u8::try_from(args.len())
                    .map_err(|_| compile_error("too many call arguments", expr.span))?;
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Opcode::Call);
                self.chunk.code.push(argc);
            }
            ExprKind::ArrayLiteral(elements) => {
                let count = count_operand(elements.len(), expr.span)?;
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(Opcode::Array);
                self.emit_u16(count);
            }
            ExprKind::MapLiteral(entries) => {
                let count = count_operand(entries.len(), expr.span)?;
                for (key, value) in entries {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::Dictionary);
                self.emit_u16(count);
            }
            ExprKind::Group(inner) => self.compile_expr(inner)?,
            ExprKind::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit(Opcode::Index);
            }
            ExprKind::Field { target, field } => {
                self.compile_expr(target)?;
                self.emit_constant(Constant::String(Rc::from(field.as_str())), expr.span)?;
                self.emit(Opcode::Index);
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), Diagnostic> {
        match &target.kind {
            ExprKind::Variable(name) => {
                self.compile_expr(value)?;
                let name = self.identifier(name, target.span)?;
                self.emit(Opcode::Assign);
                self.emit_u16(name);
            }
            ExprKind::Index {
                target: container,
                index,
            } => {
                let name = assignable_container(container)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                let name = self.identifier(name, container.span)?;
                self.emit(Opcode::AssignIndex);
                self.emit_u16(name);
            }
            ExprKind::Field {
                target: container,
                field,
            } => {
                let name = assignable_container(container)?;
                self.emit_constant(Constant::String(Rc::from(field.as_str())), target.span)?;
                self.compile_expr(value)?;
                let name = self.identifier(name, container.span)?;
                self.emit(Opcode::AssignIndex);
                self.emit_u16(name);
            }
            _ => return Err(compile_error("invalid assignment target", target.span)),
        }
        Ok(())
    }

    fn emit(&mut self, opcode: Opcode) {
        self.chunk.code.push(opcode as u8);
    }

    fn emit_u16(&mut self, value: u16) {
        self.chunk.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_constant(&mut self, constant: Constant, span: SourceSpan) -> Result<(), Diagnostic> {
        let index = self.constant(constant, span)?;
        self.emit(Opcode::Constant);
        self.emit_u16(index);
        Ok(())
    }

    fn emit_declare(&mut self, name: &str, ty: TypeLiteral, span: SourceSpan) -> Result<(), Diagnostic> {
        let name = self.identifier(name, span)?;
        let ty = self.constant(Constant::Type(ty), span)?;
        self.emit(Opcode::Declare);
        self.emit_u16(name);
        self.emit_u16(ty);
        Ok(())
    }

    /// Emits a jump with a placeholder target and returns the operand offset.
    fn emit_jump(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode);
        let operand = self.chunk.code.len();
        self.chunk.code.extend_from_slice(&u32::MAX.to_le_bytes());
        operand
    }

    fn emit_jump_to(&mut self, opcode: Opcode, target: usize) {
        let operand = self.emit_jump(opcode);
        self.write_target(operand, target);
    }

    /// Points the jump at `operand` to the current end of the code.
    fn patch_jump(&mut self, operand: usize) {
        let target = self.chunk.code.len();
        self.write_target(operand, target);
    }

    fn write_target(&mut self, operand: usize, target: usize) {
        let target = u32::try_from(target).unwrap_or(u32::MAX);
        self.chunk.code[operand..operand + 4].copy_from_slice(&target.to_le_bytes());
    }

    fn identifier(&mut self, name: &str, span: SourceSpan) -> Result<u16, Diagnostic> {
        self.constant(Constant::Identifier(Rc::from(name)), span)
    }

    fn constant(&mut self, constant: Constant, span: SourceSpan) -> Result<u16, Diagnostic> {
        let index = match self
            .chunk
            .constants
            .iter()
            .position(|existing| *existing == constant)
        {
            Some(index) => index,
            None => {
                self.chunk.constants.push(constant);
                self.chunk.constants.len() - 1
            }
        };
        u16::try_from(index).map_err(|_| compile_error("too many constants in one chunk", span))
    }
}

fn assignable_container(expr: &Expr) -> Result<&str, Diagnostic> {
    match &expr.kind {
        ExprKind::Variable(name) => Ok(name),
        _ => Err(compile_error(
            "only variables can be assigned through an index",
            expr.span,
        )),
    }
}

fn count_operand(len: usize, span: SourceSpan) -> Result<u16, Diagnostic> {
    u16::try_from(len).map_err(|_| compile_error("too many elements in literal", span))
}

fn type_literal(expr: &TypeExpr) -> Result<TypeLiteral, Diagnostic> {
    let kind = LiteralKind::from_name(&expr.name)
        .ok_or_else(|| compile_error(format!("unknown type `{}`", expr.name), expr.span))?;
    let mut ty = TypeLiteral::new(kind);
    for generic in &expr.generics {
        ty = ty.with_subtype(type_literal(generic)?);
    }
    Ok(ty)
}

fn compile_error(message: impl Into<String>, span: SourceSpan) -> Diagnostic {
    Diagnostic::new(DiagnosticKind::Compiler, message).with_span(span)
}
