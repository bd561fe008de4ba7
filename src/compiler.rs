//! Lowers a syntax tree to stack bytecode.

use std::{collections::HashSet, rc::Rc};

use crate::{
    ast::{Expr, ExprKind, FunctionDecl, Literal, LogicalOp, Stmt, StmtKind, UnaryOp},
    bytecode::{FunctionProto, Op},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    parser::SyntaxTree,
};

/// Upper bound on parameters and call arguments of a single function.
pub const MAX_ARGUMENTS: usize = 255;

/// Compiles a whole script into a unit ready to be bound to an environment.
pub fn compile(tree: &SyntaxTree, strict: bool) -> Result<Rc<FunctionProto>, Diagnostic> {
    let compiler = Compiler {
        file: Rc::from(tree.name.as_str()),
        strict,
    };
    let mut unit = Unit::new(true);
    compiler
        .compile_body(&mut unit, &tree.script.items)
        .map_err(|diag| diag.with_file(tree.name.clone()))?;
    Ok(Rc::new(unit.finish(Rc::from("script"), Rc::clone(&compiler.file), 1, Vec::new(), strict)))
}

struct Compiler {
    file: Rc<str>,
    strict: bool,
}

/// Code being emitted for one function or script body.
struct Unit {
    code: Vec<Op>,
    lines: Vec<u32>,
    functions: Vec<Rc<FunctionProto>>,
    is_script: bool,
}

impl Unit {
    fn new(is_script: bool) -> Self {
        Self {
            code: Vec::new(),
            lines: Vec::new(),
            functions: Vec::new(),
            is_script,
        }
    }

    fn emit(&mut self, op: Op, line: u32) -> usize {
        self.code.push(op);
        self.lines.push(line);
        self.code.len() - 1
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn patch_jump(&mut self, at: usize) {
        let target = self.here();
        match &mut self.code[at] {
            Op::Jump(to) | Op::JumpIfFalse(to) | Op::JumpIfFalseKeep(to) | Op::JumpIfTrueKeep(to) => {
                *to = target;
            }
            Op::Try { exit, .. } => *exit = target,
            _ => {}
        }
    }

    fn finish(
        self,
        name: Rc<str>,
        file: Rc<str>,
        line: u32,
        params: Vec<Rc<str>>,
        strict: bool,
    ) -> FunctionProto {
        FunctionProto {
            name,
            file,
            line,
            params,
            code: self.code,
            lines: self.lines,
            functions: self.functions,
            is_script: self.is_script,
            strict,
        }
    }
}

impl Compiler {
    /// Function declarations are hoisted to the top of their body.
    fn compile_body(&self, unit: &mut Unit, items: &[Stmt]) -> Result<(), Diagnostic> {
        for stmt in items {
            if let StmtKind::Function(decl) = &stmt.kind {
                self.emit_function_binding(unit, decl, stmt.span)?;
            }
        }
        for stmt in items {
            if !matches!(stmt.kind, StmtKind::Function(_)) {
                self.compile_statement(unit, stmt)?;
            }
        }
        Ok(())
    }

    fn emit_function_binding(
        &self,
        unit: &mut Unit,
        decl: &Rc<FunctionDecl>,
        span: SourceSpan,
    ) -> Result<(), Diagnostic> {
        let name = decl.name.as_deref().unwrap_or("anonymous");
        self.check_binding(name, span)?;
        self.emit_closure(unit, decl)?;
        unit.emit(Op::DefineVar(Rc::from(name)), span.line);
        Ok(())
    }

    fn emit_closure(&self, unit: &mut Unit, decl: &Rc<FunctionDecl>) -> Result<(), Diagnostic> {
        let proto = self.compile_function(decl)?;
        unit.functions.push(Rc::new(proto));
        unit.emit(Op::Closure(unit.functions.len() - 1), decl.span.line);
        Ok(())
    }

    fn compile_function(&self, decl: &FunctionDecl) -> Result<FunctionProto, Diagnostic> {
        if decl.params.len() > MAX_ARGUMENTS {
            return Err(self.error("too many parameters", decl.span));
        }
        let mut seen = HashSet::new();
        for param in &decl.params {
            self.check_binding(param, decl.span)?;
            if !seen.insert(param.as_str()) && self.strict {
                return Err(self.error(
                    format!("duplicate formal parameter '{param}'"),
                    decl.span,
                ));
            }
        }

        let mut unit = Unit::new(false);
        self.compile_body(&mut unit, &decl.body)?;
        let end = decl.span.line;
        unit.emit(Op::Undefined, end);
        unit.emit(Op::Return, end);

        let name = decl.name.as_deref().unwrap_or("");
        Ok(unit.finish(
            Rc::from(name),
            Rc::clone(&self.file),
            decl.span.line,
            decl.params.iter().map(|p| Rc::from(p.as_str())).collect(),
            self.strict,
        ))
    }

    fn compile_statement(&self, unit: &mut Unit, stmt: &Stmt) -> Result<(), Diagnostic> {
        let line = stmt.span.line;
        match &stmt.kind {
            StmtKind::Var(bindings) => {
                for (name, init) in bindings {
                    self.check_binding(name, stmt.span)?;
                    match init {
                        Some(expr) => {
                            self.compile_expr(unit, expr)?;
                            unit.emit(Op::DefineVar(Rc::from(name.as_str())), line);
                        }
                        None => {
                            unit.emit(Op::DeclareVar(Rc::from(name.as_str())), line);
                        }
                    }
                }
            }
            StmtKind::Function(decl) => self.emit_function_binding(unit, decl, stmt.span)?,
            StmtKind::Expr(expr) => {
                self.compile_expr(unit, expr)?;
                let op = if unit.is_script { Op::SetCompletion } else { Op::Pop };
                unit.emit(op, line);
            }
            StmtKind::Block(items) => {
                for item in items {
                    self.compile_statement(unit, item)?;
                }
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(unit, condition)?;
                let skip_then = unit.emit(Op::JumpIfFalse(0), line);
                self.compile_statement(unit, then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip_else = unit.emit(Op::Jump(0), line);
                        unit.patch_jump(skip_then);
                        self.compile_statement(unit, else_branch)?;
                        unit.patch_jump(skip_else);
                    }
                    None => unit.patch_jump(skip_then),
                }
            }
            StmtKind::While { condition, body } => {
                let start = unit.here();
                self.compile_expr(unit, condition)?;
                let exit = unit.emit(Op::JumpIfFalse(0), line);
                self.compile_statement(unit, body)?;
                unit.emit(Op::Jump(start), line);
                unit.patch_jump(exit);
            }
            StmtKind::Return(value) => {
                if unit.is_script {
                    return Err(self.error("return not in function", stmt.span));
                }
                match value {
                    Some(expr) => self.compile_expr(unit, expr)?,
                    None => {
                        unit.emit(Op::Undefined, line);
                    }
                }
                unit.emit(Op::Return, line);
            }
            StmtKind::Throw(expr) => {
                self.compile_expr(unit, expr)?;
                unit.emit(Op::Throw, line);
            }
            StmtKind::Try {
                body,
                binding,
                handler,
            } => {
                self.check_binding(binding, stmt.span)?;
                let enter = unit.emit(Op::Try { handler: 0, exit: 0 }, line);
                for item in body {
                    self.compile_statement(unit, item)?;
                }
                unit.emit(Op::Leave, line);
                let handler_at = unit.here();
                if let Op::Try { handler, .. } = &mut unit.code[enter] {
                    *handler = handler_at;
                }
                unit.emit(Op::EnterCatch(Rc::from(binding.as_str())), line);
                for item in handler {
                    self.compile_statement(unit, item)?;
                }
                unit.emit(Op::ExitCatch, line);
                unit.patch_jump(enter);
            }
            StmtKind::Empty => {}
        }
        Ok(())
    }

    fn compile_expr(&self, unit: &mut Unit, expr: &Expr) -> Result<(), Diagnostic> {
        let line = expr.span.line;
        match &expr.kind {
            ExprKind::Literal(literal) => {
                let op = match literal {
                    Literal::Number(n) => Op::Number(*n),
                    Literal::String(s) => Op::String(Rc::from(s.as_str())),
                    Literal::Bool(b) => Op::Bool(*b),
                    Literal::Null => Op::Null,
                };
                unit.emit(op, line);
            }
            ExprKind::Variable(name) => {
                unit.emit(Op::GetVar(Rc::from(name.as_str())), line);
            }
            ExprKind::This => {
                unit.emit(Op::This, line);
            }
            ExprKind::Binary { op, left, right } => {
                self.compile_expr(unit, left)?;
                self.compile_expr(unit, right)?;
                unit.emit(Op::Binary(*op), line);
            }
            ExprKind::Logical { op, left, right } => {
                self.compile_expr(unit, left)?;
                let jump = match op {
                    LogicalOp::And => Op::JumpIfFalseKeep(0),
                    LogicalOp::Or => Op::JumpIfTrueKeep(0),
                };
                let end = unit.emit(jump, line);
                self.compile_expr(unit, right)?;
                unit.patch_jump(end);
            }
            ExprKind::Unary { op, expr: operand } => {
                self.compile_expr(unit, operand)?;
                let op = match op {
                    UnaryOp::Negate => Op::Negate,
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Typeof => Op::Typeof,
                };
                unit.emit(op, line);
            }
            ExprKind::Assign { target, value } => match &target.kind {
                ExprKind::Variable(name) => {
                    self.check_binding(name, target.span)?;
                    self.compile_expr(unit, value)?;
                    unit.emit(Op::SetVar(Rc::from(name.as_str())), line);
                }
                ExprKind::Field { target, field } => {
                    self.compile_expr(unit, target)?;
                    self.compile_expr(unit, value)?;
                    unit.emit(Op::SetProp(Rc::from(field.as_str())), line);
                }
                ExprKind::Index { target, index } => {
                    self.compile_expr(unit, target)?;
                    self.compile_expr(unit, index)?;
                    self.compile_expr(unit, value)?;
                    unit.emit(Op::SetIndex, line);
                }
                _ => return Err(self.error("invalid assignment target", target.span)),
            },
            ExprKind::Call { callee, args } => {
                if args.len() > MAX_ARGUMENTS {
                    return Err(self.error("too many arguments", expr.span));
                }
                match &callee.kind {
                    ExprKind::Field { target, field } => {
                        self.compile_expr(unit, target)?;
                        unit.emit(Op::GetMethod(Rc::from(field.as_str())), line);
                    }
                    _ => {
                        self.compile_expr(unit, callee)?;
                        unit.emit(Op::Undefined, line);
                    }
                }
                for arg in args {
                    self.compile_expr(unit, arg)?;
                }
                unit.emit(Op::Call(args.len()), line);
            }
            ExprKind::ObjectLiteral(entries) => {
                unit.emit(Op::NewObject, line);
                for (key, value) in entries {
                    self.compile_expr(unit, value)?;
                    unit.emit(Op::InitProp(Rc::from(key.as_str())), value.span.line);
                }
            }
            ExprKind::Group(inner) => self.compile_expr(unit, inner)?,
            ExprKind::Index { target, index } => {
                self.compile_expr(unit, target)?;
                self.compile_expr(unit, index)?;
                unit.emit(Op::GetIndex, line);
            }
            ExprKind::Field { target, field } => {
                self.compile_expr(unit, target)?;
                unit.emit(Op::GetProp(Rc::from(field.as_str())), line);
            }
            ExprKind::Function(decl) => self.emit_closure(unit, decl)?,
        }
        Ok(())
    }

    /// Strict code may not bind or assign `eval` and `arguments`.
    fn check_binding(&self, name: &str, span: SourceSpan) -> Result<(), Diagnostic> {
        if self.strict && (name == "eval" || name == "arguments") {
            return Err(self.error(format!("invalid use of '{name}' in strict mode"), span));
        }
        Ok(())
    }

    fn error(&self, message: impl Into<String>, span: SourceSpan) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Compiler, message).with_span(span)
    }
}
