use std::rc::Rc;

use crate::ast::BinaryOp;

/// Stack machine instructions. Comments give the stack effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    This,
    /// `[] -> [value]`
    GetVar(Rc<str>),
    /// `[value] -> [value]`, assigns through the scope chain.
    SetVar(Rc<str>),
    /// `[value] -> []`, binds in the function (or script) scope.
    DefineVar(Rc<str>),
    /// `var name;` without initializer.
    DeclareVar(Rc<str>),
    /// `[] -> [closure]` over the current environment.
    Closure(usize),
    NewObject,
    /// `[object, value] -> [object]`
    InitProp(Rc<str>),
    /// `[object] -> [value]`
    GetProp(Rc<str>),
    /// `[object, value] -> [value]`
    SetProp(Rc<str>),
    /// `[object, key] -> [value]`
    GetIndex,
    /// `[object, key, value] -> [value]`
    SetIndex,
    /// `[object] -> [function, object]`
    GetMethod(Rc<str>),
    /// `[callee, this, args..] -> [result]`
    Call(usize),
    Pop,
    /// Script code only: `[value] -> []`, records the completion value.
    SetCompletion,
    Negate,
    Not,
    Typeof,
    Binary(BinaryOp),
    Jump(usize),
    JumpIfFalse(usize),
    /// Short-circuit helpers: jump keeping the operand, or pop it and fall
    /// through.
    JumpIfFalseKeep(usize),
    JumpIfTrueKeep(usize),
    Return,
    Throw,
    /// Runs the code after this instruction as a protected body up to the
    /// matching `Leave`; resumes at `handler` with the thrown value on the
    /// stack, or at `exit` on normal completion.
    Try { handler: usize, exit: usize },
    Leave,
    /// `[thrown] -> []`, opens a scope binding the catch parameter.
    EnterCatch(Rc<str>),
    ExitCatch,
}

/// A compiled unit: the executable form of a script or function body.
#[derive(Debug, Clone)]
pub struct FunctionProto {
    pub name: Rc<str>,
    pub file: Rc<str>,
    pub line: u32,
    pub params: Vec<Rc<str>>,
    pub code: Vec<Op>,
    /// Source line for each instruction in `code`.
    pub lines: Vec<u32>,
    pub functions: Vec<Rc<FunctionProto>>,
    /// Script units bind directly into the environment they are closed
    /// over instead of opening a fresh call scope.
    pub is_script: bool,
    pub strict: bool,
}
