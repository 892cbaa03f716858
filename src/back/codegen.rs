//! Code generation: one depth-first walk over the tree.
//!
//! Every expression walk hands back a `(Value, Vec<Instruction>)` pair.  A
//! register atom inside the value is owned by whoever receives the pair and
//! must be released exactly once; the pool has only 20 temporaries, so a leak
//! exhausts it quickly.  Statement walks consume the values of their
//! subexpressions and hand back instructions only.
//!
//! All compile state lives in a [CodeGen] context created fresh per
//! invocation, so compiles are re-entrant and independently testable.

use derive_more::derive::Display;

use crate::common::*;
use crate::front::ast::*;
use super::asm::{self, ArithOp, Condition, Imm, Instruction, Mem, Target, WORD_SIZE};
use super::asm::Register::{self, *};

/// Registers handed out to expression evaluation, in allocation scan order.
const POOL: [Register; 20] = [
    T0, T1, T2, T3, T4, T5, T6, T7, S0, S1, S2, S3, S4, S5, S6, S7, T8, T9, K0, K1,
];

/// Errors that abort a compile.
#[derive(Display)]
pub enum CodeGenError {
    #[display("out of registers")]
    OutOfRegisters,
    #[display("malformed character constant: {_0}")]
    BadCharLiteral(String),
    #[display("unknown variable: {_0}")]
    UnknownVariable(Id),
    #[display("condition or sequence used as a value")]
    ConditionAsValue,
    #[display("global initializer for {_0} must be a literal")]
    BadGlobalInit(Id),
    #[display("no main function")]
    MissingMain,
}

impl std::fmt::Debug for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// What an expression walk leaves behind, alongside its instructions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// No value; statements and void calls produce this.
    None,
    /// A compile-time integer.
    Imm(i32),
    /// A register holding the value at run time.
    Reg(Register),
    /// The exit label of a jump-if-false condition.  Not a register: a
    /// condition cannot take part in arithmetic.
    Label(Id),
    /// The values of a comma-composed expression sequence.
    Tuple(Vec<Value>),
}

type Emitted = (Value, Vec<Instruction>);

/// The fixed pool of caller-save temporaries.
struct RegisterPool {
    in_use: [bool; POOL.len()],
}

impl RegisterPool {
    fn new() -> Self {
        RegisterPool {
            in_use: [false; POOL.len()],
        }
    }

    /// Check out the first free register, scanning in pool order.
    fn alloc(&mut self) -> Result<Register, CodeGenError> {
        for (slot, reg) in self.in_use.iter_mut().zip(POOL) {
            if !*slot {
                *slot = true;
                return Ok(reg);
            }
        }
        Err(CodeGenError::OutOfRegisters)
    }

    /// Check a register back in.  Registers outside the pool (`$v0` from a
    /// call, `$sp` used as an array base) are ignored, so any register handle
    /// can be released through here.
    fn release(&mut self, reg: Register) {
        if let Some(index) = POOL.iter().position(|r| *r == reg) {
            self.in_use[index] = false;
        }
    }

    fn is_idle(&self) -> bool {
        self.in_use.iter().all(|slot| !*slot)
    }
}

/// One function's stack layout: declaration-ordered slots above the saved
/// return address.
#[derive(Default)]
struct Frame {
    slots: Vec<(Id, Type, i32)>,
}

impl Frame {
    /// Add a slot of `words` words, or re-size an existing one on
    /// redeclaration.
    fn declare(&mut self, name: Id, ty: Type, words: i32) {
        match self.slots.iter_mut().find(|slot| slot.0 == name) {
            Some(slot) => {
                slot.1 = ty;
                slot.2 = words;
            }
            None => self.slots.push((name, ty, words)),
        }
    }

    /// Byte offset of `name` from `$sp`.  Slot 0 belongs to `$ra`.
    fn offset_of(&self, name: Id) -> Option<i32> {
        let mut words = 0;
        for (slot, _, width) in &self.slots {
            if *slot == name {
                return Some((words + 1) * WORD_SIZE);
            }
            words += width;
        }
        None
    }

    /// Total frame size in words, including the `$ra` slot.
    fn words(&self) -> i32 {
        1 + self.slots.iter().map(|slot| slot.2).sum::<i32>()
    }
}

/// All state for one compile invocation.
pub struct CodeGen {
    pool: RegisterPool,
    label_count: u32,
    globals: Map<Id, (Type, String)>,
    locals: Map<Id, Frame>,
    strings: Vec<(Id, String)>,
    functions: Map<Id, Vec<Instruction>>,
    /// Instructions emitted at top level, outside any function.
    preamble: Vec<Instruction>,
    /// The function being compiled; `None` while walking top-level
    /// declarations.
    current_fn: Option<Id>,
    warnings: Vec<String>,
}

/// Compile a parsed program down to a serializable [asm::Program].
pub fn compile(program: &Program) -> Result<asm::Program, CodeGenError> {
    let mut codegen = CodeGen::new();
    codegen.gen_program(program)?;
    codegen.finish()
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen {
            pool: RegisterPool::new(),
            label_count: 0,
            globals: Map::new(),
            locals: Map::new(),
            strings: Vec::new(),
            functions: Map::new(),
            preamble: Vec::new(),
            current_fn: None,
            warnings: Vec::new(),
        }
    }

    /// Walk every top-level item, filling the function and symbol tables.
    pub fn gen_program(&mut self, program: &Program) -> Result<(), CodeGenError> {
        for item in &program.items {
            match item {
                Item::Global(decl) => {
                    self.current_fn = None;
                    let ins = self.gen_decl(decl)?;
                    self.preamble.extend(ins);
                }
                Item::Function(function) => self.gen_function(function)?,
            }
        }
        Ok(())
    }

    /// Hand the tables over to the serializer.  The program must have a
    /// `main` to start from.
    pub fn finish(self) -> Result<asm::Program, CodeGenError> {
        if !self.functions.contains_key(&main_id()) {
            return Err(CodeGenError::MissingMain);
        }
        Ok(asm::Program {
            preamble: self.preamble,
            strings: self.strings,
            globals: self
                .globals
                .into_iter()
                .map(|(name, (_, init))| (name, init))
                .collect(),
            functions: self.functions,
        })
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// True when every temporary register is checked back in.  Holds after
    /// any complete walk; a failure means some consumer leaked a handle.
    pub fn registers_idle(&self) -> bool {
        self.pool.is_idle()
    }

    fn fresh_label(&mut self) -> Id {
        self.label_count += 1;
        Id::new(format!("lbl{}", self.label_count))
    }

    /// Release every register atom in a result, transitively.
    fn release_value(&mut self, value: &Value) {
        match value {
            Value::Reg(reg) => self.pool.release(*reg),
            Value::Tuple(values) => {
                for value in values {
                    self.release_value(value);
                }
            }
            Value::None | Value::Imm(_) | Value::Label(_) => {}
        }
    }

    /// The canonical address of a variable: its global symbol, or its slot in
    /// the current frame.  Globals shadow locals of the same name.
    fn home(&self, name: Id) -> Result<Mem, CodeGenError> {
        if self.globals.contains_key(&name) {
            Ok(Mem::Global(name))
        } else {
            Ok(Mem::Offset(Sp, self.local_offset(name)?))
        }
    }

    fn local_offset(&self, name: Id) -> Result<i32, CodeGenError> {
        self.current_fn
            .and_then(|f| self.locals.get(&f))
            .and_then(|frame| frame.offset_of(name))
            .ok_or(CodeGenError::UnknownVariable(name))
    }

    /// Get the value into a register, loading immediates with `li`.
    fn materialize(
        &mut self,
        value: Value,
        ins: &mut Vec<Instruction>,
    ) -> Result<Register, CodeGenError> {
        match value {
            Value::Reg(reg) => Ok(reg),
            Value::Imm(n) => {
                let reg = self.pool.alloc()?;
                ins.push(Instruction::Li {
                    dst: reg,
                    imm: Imm::Int(n),
                });
                Ok(reg)
            }
            Value::None | Value::Label(_) | Value::Tuple(_) => Err(CodeGenError::ConditionAsValue),
        }
    }

    /// Turn any result into a jump-if-false condition and return the label
    /// jumped to when it fails.  Condition results pass through; arithmetic
    /// results are tested against zero.
    fn as_condition(
        &mut self,
        value: Value,
        ins: &mut Vec<Instruction>,
    ) -> Result<Id, CodeGenError> {
        match value {
            Value::Label(label) => Ok(label),
            value => {
                let reg = self.materialize(value, ins)?;
                let exit = self.fresh_label();
                ins.push(Instruction::Branch {
                    cond: Condition::Equal,
                    lhs: reg,
                    rhs: Zero,
                    target: Target::Label(exit),
                });
                self.pool.release(reg);
                Ok(exit)
            }
        }
    }

    // ----- expressions -----

    fn gen_expr(&mut self, expr: &Expr) -> Result<Emitted, CodeGenError> {
        match expr {
            Expr::Num(n) => Ok((Value::Imm(*n), Vec::new())),
            Expr::Char(text) => Ok((Value::Imm(char_value(text)?), Vec::new())),
            Expr::Id(name) => {
                let reg = self.pool.alloc()?;
                let ins = vec![Instruction::Lw {
                    dst: reg,
                    src: self.home(*name)?,
                }];
                Ok((Value::Reg(reg), ins))
            }
            Expr::Neg(inner) => {
                let (value, mut ins) = self.gen_expr(inner)?;
                match value {
                    Value::Imm(n) => Ok((Value::Imm(-n), ins)),
                    Value::Reg(reg) => {
                        ins.push(Instruction::Arith {
                            op: ArithOp::Sub,
                            dst: reg,
                            lhs: Zero,
                            rhs: reg,
                        });
                        Ok((Value::Reg(reg), ins))
                    }
                    other => Ok((other, ins)),
                }
            }
            Expr::BitNot(inner) => {
                let (value, mut ins) = self.gen_expr(inner)?;
                match value {
                    Value::Imm(n) => Ok((Value::Imm(!n), ins)),
                    Value::Reg(reg) => {
                        ins.push(Instruction::Not { dst: reg, src: reg });
                        Ok((Value::Reg(reg), ins))
                    }
                    other => Ok((other, ins)),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let (lhs, mut ins) = self.gen_expr(lhs)?;
                let (rhs, rhs_ins) = self.gen_expr(rhs)?;
                ins.extend(rhs_ins);
                let (value, op_ins) = self.gen_binop(*op, lhs, rhs)?;
                ins.extend(op_ins);
                Ok((value, ins))
            }
            Expr::Cond { op, lhs, rhs } => self.gen_cond(*op, lhs, rhs),
            Expr::AddrOf(name) => {
                let reg = self.pool.alloc()?;
                let ins = if self.globals.contains_key(name) {
                    vec![Instruction::La {
                        dst: reg,
                        src: *name,
                    }]
                } else {
                    vec![Instruction::ArithI {
                        op: ArithOp::Add,
                        dst: reg,
                        lhs: Sp,
                        rhs: Imm::Int(self.local_offset(*name)?),
                    }]
                };
                Ok((Value::Reg(reg), ins))
            }
            Expr::AddrOfIndex { name, index } => {
                let (reg, ins) = self.gen_element_addr(*name, index)?;
                Ok((Value::Reg(reg), ins))
            }
            Expr::Index { name, index } => {
                let (reg, mut ins) = self.gen_element_addr(*name, index)?;
                ins.push(Instruction::Lw {
                    dst: reg,
                    src: Mem::Deref(reg),
                });
                Ok((Value::Reg(reg), ins))
            }
            Expr::Deref(name) => {
                let reg = self.pool.alloc()?;
                let ins = vec![
                    Instruction::Lw {
                        dst: reg,
                        src: self.home(*name)?,
                    },
                    Instruction::Lw {
                        dst: reg,
                        src: Mem::Deref(reg),
                    },
                ];
                Ok((Value::Reg(reg), ins))
            }
            Expr::Assign { name, value } => {
                let (value, mut ins) = self.gen_expr(value)?;
                let reg = self.materialize(value, &mut ins)?;
                ins.push(Instruction::Sw {
                    src: reg,
                    dst: self.home(*name)?,
                });
                self.pool.release(reg);
                Ok((Value::None, ins))
            }
            Expr::IndexAssign { name, index, value } => {
                let (addr, mut ins) = self.gen_element_addr(*name, index)?;
                let (value, value_ins) = self.gen_expr(value)?;
                ins.extend(value_ins);
                let reg = self.materialize(value, &mut ins)?;
                ins.push(Instruction::Sw {
                    src: reg,
                    dst: Mem::Deref(addr),
                });
                self.pool.release(addr);
                self.pool.release(reg);
                Ok((Value::None, ins))
            }
            Expr::DerefAssign { name, value } => {
                let (value, mut ins) = self.gen_expr(value)?;
                let reg = self.materialize(value, &mut ins)?;
                let ptr = self.pool.alloc()?;
                ins.push(Instruction::Lw {
                    dst: ptr,
                    src: self.home(*name)?,
                });
                ins.push(Instruction::Sw {
                    src: reg,
                    dst: Mem::Deref(ptr),
                });
                self.pool.release(ptr);
                self.pool.release(reg);
                Ok((Value::None, ins))
            }
            Expr::Call { name, args } => self.gen_call(*name, args),
            Expr::Asm(text) => Ok((Value::None, vec![Instruction::Verbatim(text.clone())])),
            Expr::PrintStr(text) => {
                let label = self.fresh_label();
                self.strings.push((label, text.clone()));
                let ins = vec![
                    Instruction::La {
                        dst: A0,
                        src: label,
                    },
                    Instruction::Li {
                        dst: V0,
                        imm: Imm::Int(4),
                    },
                    Instruction::Syscall,
                ];
                Ok((Value::None, ins))
            }
            Expr::Seq(exprs) => {
                let mut ins = Vec::new();
                let mut values = Vec::new();
                for expr in exprs {
                    let (value, expr_ins) = self.gen_expr(expr)?;
                    ins.extend(expr_ins);
                    if value != Value::None {
                        values.push(value);
                    }
                }
                let value = match values.len() {
                    0 => Value::None,
                    1 => values.remove(0),
                    _ => Value::Tuple(values),
                };
                Ok((value, ins))
            }
        }
    }

    fn gen_binop(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Result<Emitted, CodeGenError> {
        let mut ins = Vec::new();

        // One side immediate: fold it into the register operand in place,
        // except for mul/div which have no immediate form here.
        if op != BinOp::Mul && op != BinOp::Div {
            if let (Value::Reg(reg), Value::Imm(n)) = (&lhs, &rhs) {
                ins.push(Instruction::ArithI {
                    op: arith_op(op),
                    dst: *reg,
                    lhs: *reg,
                    rhs: Imm::Int(*n),
                });
                return Ok((lhs, ins));
            }
            if let (Value::Imm(n), Value::Reg(reg)) = (&lhs, &rhs) {
                if op == BinOp::Sub {
                    // lit - reg is not commutative: materialize the literal
                    let dst = self.pool.alloc()?;
                    ins.push(Instruction::Li {
                        dst,
                        imm: Imm::Int(*n),
                    });
                    ins.push(Instruction::Arith {
                        op: ArithOp::Sub,
                        dst,
                        lhs: dst,
                        rhs: *reg,
                    });
                    self.pool.release(*reg);
                    return Ok((Value::Reg(dst), ins));
                }
                ins.push(Instruction::ArithI {
                    op: arith_op(op),
                    dst: *reg,
                    lhs: *reg,
                    rhs: Imm::Int(*n),
                });
                return Ok((rhs, ins));
            }
        }

        let dst = self.pool.alloc()?;
        let lhs = self.materialize(lhs, &mut ins)?;
        let rhs = self.materialize(rhs, &mut ins)?;
        ins.push(Instruction::Arith {
            op: arith_op(op),
            dst,
            lhs,
            rhs,
        });
        self.pool.release(lhs);
        self.pool.release(rhs);
        Ok((Value::Reg(dst), ins))
    }

    /// A comparison compiles to a jump-if-false: the inverted branch goes to
    /// a fresh exit label and the true path falls through.  The label is the
    /// result; the consumer decides where to define it.
    fn gen_cond(&mut self, op: CondOp, lhs: &Expr, rhs: &Expr) -> Result<Emitted, CodeGenError> {
        let cond = match op {
            CondOp::Eq => Condition::NotEqual,
            CondOp::Ne => Condition::Equal,
            CondOp::Lt => Condition::GreaterEq,
            CondOp::Gt => Condition::LessEq,
            CondOp::Le => Condition::Greater,
            CondOp::Ge => Condition::Less,
            CondOp::And | CondOp::Or => return self.gen_logical(op, lhs, rhs),
        };
        let (lhs, mut ins) = self.gen_expr(lhs)?;
        let (rhs, rhs_ins) = self.gen_expr(rhs)?;
        ins.extend(rhs_ins);
        let exit = self.fresh_label();
        let lhs = self.materialize(lhs, &mut ins)?;
        let rhs = self.materialize(rhs, &mut ins)?;
        ins.push(Instruction::Branch {
            cond,
            lhs,
            rhs,
            target: Target::Label(exit),
        });
        self.pool.release(lhs);
        self.pool.release(rhs);
        Ok((Value::Label(exit), ins))
    }

    /// Short-circuit `&&` and `||`, still in jump-if-false shape.
    fn gen_logical(&mut self, op: CondOp, lhs: &Expr, rhs: &Expr) -> Result<Emitted, CodeGenError> {
        let (lhs, mut ins) = self.gen_expr(lhs)?;
        let left_exit = self.as_condition(lhs, &mut ins)?;
        let (rhs, mut rhs_ins) = self.gen_expr(rhs)?;
        let right_exit = self.as_condition(rhs, &mut rhs_ins)?;
        match op {
            CondOp::And => {
                // either side failing exits the whole condition
                retarget(&mut ins, left_exit, right_exit);
                ins.extend(rhs_ins);
            }
            _ => {
                // the left side succeeding skips the right side entirely
                let taken = self.fresh_label();
                ins.push(Instruction::Jump(Target::Label(taken)));
                ins.push(Instruction::Label(left_exit));
                ins.extend(rhs_ins);
                ins.push(Instruction::Label(taken));
            }
        }
        Ok((Value::Label(right_exit), ins))
    }

    /// The address of `name[index]`, left in the returned register.
    ///
    /// Elements are one word wide; the index is scaled by two self-adds.
    fn gen_element_addr(
        &mut self,
        name: Id,
        index: &Expr,
    ) -> Result<(Register, Vec<Instruction>), CodeGenError> {
        let mut ins = Vec::new();
        let global = self.globals.contains_key(&name);
        let base = if global {
            let base = self.pool.alloc()?;
            ins.push(Instruction::La {
                dst: base,
                src: name,
            });
            base
        } else {
            Sp
        };
        let (index, index_ins) = self.gen_expr(index)?;
        ins.extend(index_ins);
        let reg = self.materialize(index, &mut ins)?;
        ins.push(Instruction::Arith {
            op: ArithOp::Add,
            dst: reg,
            lhs: reg,
            rhs: reg,
        });
        ins.push(Instruction::Arith {
            op: ArithOp::Add,
            dst: reg,
            lhs: reg,
            rhs: reg,
        });
        ins.push(Instruction::Arith {
            op: ArithOp::Add,
            dst: reg,
            lhs: base,
            rhs: reg,
        });
        if !global {
            ins.push(Instruction::ArithI {
                op: ArithOp::Add,
                dst: reg,
                lhs: reg,
                rhs: Imm::Int(self.local_offset(name)?),
            });
        }
        self.pool.release(base);
        Ok((reg, ins))
    }

    fn gen_call(&mut self, name: Id, args: &[Expr]) -> Result<Emitted, CodeGenError> {
        let mut ins = Vec::new();
        let mut atoms = Vec::new();
        for arg in args {
            let (value, arg_ins) = self.gen_expr(arg)?;
            ins.extend(arg_ins);
            flatten(value, &mut atoms);
        }
        for (n, atom) in atoms.into_iter().enumerate() {
            // the calling convention has four argument registers; the rest
            // of the atoms are dropped
            match atom {
                Value::Reg(reg) => {
                    if n < 4 {
                        ins.push(Instruction::mov(Register::arg(n), reg));
                    }
                    self.pool.release(reg);
                }
                Value::Imm(imm) => {
                    if n < 4 {
                        ins.push(Instruction::Li {
                            dst: Register::arg(n),
                            imm: Imm::Int(imm),
                        });
                    }
                }
                _ => return Err(CodeGenError::ConditionAsValue),
            }
        }
        ins.push(Instruction::Jal(name));
        Ok((Value::Reg(V0), ins))
    }

    // ----- statements -----

    fn gen_stmts(&mut self, stmts: &[Stmt]) -> Result<Vec<Instruction>, CodeGenError> {
        let mut ins = Vec::new();
        for stmt in stmts {
            ins.extend(self.gen_stmt(stmt)?);
        }
        Ok(ins)
    }

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<Vec<Instruction>, CodeGenError> {
        match stmt {
            Stmt::Decl(decl) => self.gen_decl(decl),
            Stmt::Expr(expr) => {
                let (value, ins) = self.gen_expr(expr)?;
                self.release_value(&value);
                Ok(ins)
            }
            Stmt::Block(stmts) => self.gen_stmts(stmts),
            Stmt::Return(value) => self.gen_return(value.as_ref()),
            Stmt::Break => Ok(vec![Instruction::Jump(Target::LoopEnd)]),
            Stmt::Continue => Ok(vec![Instruction::Jump(Target::LoopStart)]),
            Stmt::If { cond, tt, ff: None } => {
                let (cond, mut ins) = self.gen_expr(cond)?;
                let exit = self.as_condition(cond, &mut ins)?;
                ins.extend(self.gen_stmts(tt)?);
                ins.push(Instruction::Label(exit));
                Ok(ins)
            }
            Stmt::If {
                cond,
                tt,
                ff: Some(ff),
            } => {
                let end = self.fresh_label();
                let (cond, mut ins) = self.gen_expr(cond)?;
                let else_label = self.as_condition(cond, &mut ins)?;
                ins.extend(self.gen_stmts(tt)?);
                ins.push(Instruction::Jump(Target::Label(end)));
                ins.push(Instruction::Label(else_label));
                ins.extend(self.gen_stmts(ff)?);
                ins.push(Instruction::Label(end));
                Ok(ins)
            }
            Stmt::While { cond, body } => {
                let (cond, mut cond_ins) = self.gen_expr(cond)?;
                let exit = self.as_condition(cond, &mut cond_ins)?;
                let mut body_ins = self.gen_stmts(body)?;
                let start = self.fresh_label();
                patch_loop(&mut body_ins, start, exit);
                let mut ins = vec![Instruction::Label(start)];
                ins.extend(cond_ins);
                ins.extend(body_ins);
                ins.push(Instruction::Jump(Target::Label(start)));
                ins.push(Instruction::Label(exit));
                Ok(ins)
            }
            Stmt::DoWhile { cond, body } => {
                let (cond, mut cond_ins) = self.gen_expr(cond)?;
                let exit = self.as_condition(cond, &mut cond_ins)?;
                let mut body_ins = self.gen_stmts(body)?;
                let start = self.fresh_label();
                patch_loop(&mut body_ins, start, exit);
                let mut ins = vec![Instruction::Label(start)];
                ins.extend(body_ins);
                ins.extend(cond_ins);
                ins.push(Instruction::Jump(Target::Label(start)));
                ins.push(Instruction::Label(exit));
                Ok(ins)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                let (init, mut ins) = self.gen_expr(init)?;
                self.release_value(&init);
                let (cond, mut cond_ins) = self.gen_expr(cond)?;
                let exit = self.as_condition(cond, &mut cond_ins)?;
                let (step, step_ins) = self.gen_expr(step)?;
                self.release_value(&step);
                let mut body_ins = self.gen_stmts(body)?;
                let start = self.fresh_label();
                // continue re-runs the condition, not the step
                patch_loop(&mut body_ins, start, exit);
                ins.push(Instruction::Label(start));
                ins.extend(cond_ins);
                ins.extend(body_ins);
                ins.extend(step_ins);
                ins.push(Instruction::Jump(Target::Label(start)));
                ins.push(Instruction::Label(exit));
                Ok(ins)
            }
        }
    }

    fn gen_return(&mut self, value: Option<&Expr>) -> Result<Vec<Instruction>, CodeGenError> {
        let mut ins = Vec::new();
        if let Some(expr) = value {
            let (value, expr_ins) = self.gen_expr(expr)?;
            ins.extend(expr_ins);
            match value {
                Value::Reg(reg) => {
                    ins.push(Instruction::mov(V0, reg));
                    self.pool.release(reg);
                }
                Value::Imm(n) => ins.push(Instruction::Li {
                    dst: V0,
                    imm: Imm::Int(n),
                }),
                Value::None => {}
                Value::Label(_) | Value::Tuple(_) => return Err(CodeGenError::ConditionAsValue),
            }
        }
        ins.push(Instruction::Lw {
            dst: Ra,
            src: Mem::Offset(Sp, 0),
        });
        ins.push(Instruction::ArithI {
            op: ArithOp::Add,
            dst: Sp,
            lhs: Sp,
            rhs: Imm::FrameSize,
        });
        if self.current_fn != Some(main_id()) {
            ins.push(Instruction::Jr(Ra));
        }
        Ok(ins)
    }

    // ----- declarations -----

    fn gen_decl(&mut self, decl: &Decl) -> Result<Vec<Instruction>, CodeGenError> {
        match self.current_fn {
            None => self.gen_global_decl(decl),
            Some(function) => self.gen_local_decl(function, decl),
        }
    }

    fn gen_global_decl(&mut self, decl: &Decl) -> Result<Vec<Instruction>, CodeGenError> {
        match decl {
            Decl::Scalar { ty, name, init } => match init {
                // a literal initializer goes straight into .data
                Some(Expr::Num(n)) => {
                    self.globals.insert(*name, (ty.clone(), n.to_string()));
                    Ok(Vec::new())
                }
                // anything else is evaluated at the top of the output
                Some(expr) => {
                    self.globals.insert(*name, (ty.clone(), "0".to_string()));
                    let (value, mut ins) = self.gen_expr(expr)?;
                    let reg = self.materialize(value, &mut ins)?;
                    ins.push(Instruction::Sw {
                        src: reg,
                        dst: Mem::Global(*name),
                    });
                    self.pool.release(reg);
                    Ok(ins)
                }
                None => {
                    self.globals.insert(*name, (ty.clone(), "0".to_string()));
                    Ok(Vec::new())
                }
            },
            Decl::Array {
                ty,
                name,
                len,
                init,
            } => {
                let init = match init {
                    None => vec!["0".to_string(); *len as usize].join(", "),
                    Some(exprs) => exprs
                        .iter()
                        .map(|expr| match expr {
                            Expr::Num(n) => Ok(n.to_string()),
                            _ => Err(CodeGenError::BadGlobalInit(*name)),
                        })
                        .collect::<Result<Vec<_>, _>>()?
                        .join(", "),
                };
                self.globals.insert(*name, (ty.clone(), init));
                Ok(Vec::new())
            }
        }
    }

    fn gen_local_decl(
        &mut self,
        function: Id,
        decl: &Decl,
    ) -> Result<Vec<Instruction>, CodeGenError> {
        match decl {
            Decl::Scalar { ty, name, init } => {
                self.locals
                    .entry(function)
                    .or_default()
                    .declare(*name, ty.clone(), 1);
                let offset = self.local_offset(*name)?;
                match init {
                    Some(expr) => {
                        let (value, mut ins) = self.gen_expr(expr)?;
                        let reg = self.materialize(value, &mut ins)?;
                        ins.push(Instruction::Sw {
                            src: reg,
                            dst: Mem::Offset(Sp, offset),
                        });
                        self.pool.release(reg);
                        Ok(ins)
                    }
                    None => Ok(vec![Instruction::Sw {
                        src: Zero,
                        dst: Mem::Offset(Sp, offset),
                    }]),
                }
            }
            Decl::Array {
                ty,
                name,
                len,
                init,
            } => {
                self.locals
                    .entry(function)
                    .or_default()
                    .declare(*name, ty.clone(), *len as i32);
                let offset = self.local_offset(*name)?;
                match init {
                    None => Ok((0..*len as i32)
                        .map(|i| Instruction::Sw {
                            src: Zero,
                            dst: Mem::Offset(Sp, offset + i * WORD_SIZE),
                        })
                        .collect()),
                    Some(exprs) => {
                        // evaluate the whole list first; the element values
                        // are all live at once
                        let mut ins = Vec::new();
                        let mut values = Vec::new();
                        for expr in exprs {
                            let (value, expr_ins) = self.gen_expr(expr)?;
                            ins.extend(expr_ins);
                            flatten(value, &mut values);
                        }
                        for (i, value) in values.into_iter().enumerate() {
                            let reg = self.materialize(value, &mut ins)?;
                            ins.push(Instruction::Sw {
                                src: reg,
                                dst: Mem::Offset(Sp, offset + i as i32 * WORD_SIZE),
                            });
                            self.pool.release(reg);
                        }
                        Ok(ins)
                    }
                }
            }
        }
    }

    // ----- functions -----

    fn gen_function(&mut self, function: &Function) -> Result<(), CodeGenError> {
        self.current_fn = Some(function.name);

        // parameters are ordinary width-1 locals; declaring them zero-stores
        // their slots, and the argument registers overwrite that below
        let mut arg_ins = Vec::new();
        for param in &function.params {
            let decl = Decl::Scalar {
                ty: param.ty.clone(),
                name: param.name,
                init: None,
            };
            arg_ins.extend(self.gen_decl(&decl)?);
        }
        let arg_count = function.params.len();
        if arg_count > 4 {
            self.warnings
                .push(format!("too many arguments in function: {}", function.name));
        }
        for n in 0..arg_count.min(4) {
            arg_ins.push(Instruction::Sw {
                src: Register::arg(n),
                dst: Mem::Offset(Sp, WORD_SIZE + n as i32 * WORD_SIZE),
            });
        }

        let mut body = self.gen_stmts(&function.body)?;

        // the frame is fully known only now
        let bytes = self
            .locals
            .get(&function.name)
            .map(|frame| frame.words())
            .unwrap_or(1)
            * WORD_SIZE;
        for ins in &mut body {
            ins.patch_frame_size(bytes);
        }

        let mut ins = vec![Instruction::Label(function.name)];
        ins.push(Instruction::ArithI {
            op: ArithOp::Add,
            dst: Sp,
            lhs: Sp,
            rhs: Imm::Int(-bytes),
        });
        ins.push(Instruction::Sw {
            src: Ra,
            dst: Mem::Offset(Sp, 0),
        });
        ins.extend(arg_ins);
        ins.extend(body);
        ins.push(Instruction::Lw {
            dst: Ra,
            src: Mem::Offset(Sp, 0),
        });
        ins.push(Instruction::ArithI {
            op: ArithOp::Add,
            dst: Sp,
            lhs: Sp,
            rhs: Imm::Int(bytes),
        });
        if function.name == main_id() {
            ins.push(Instruction::Li {
                dst: V0,
                imm: Imm::Int(10),
            });
            ins.push(Instruction::Syscall);
        } else {
            ins.push(Instruction::Jr(Ra));
        }

        self.functions.insert(function.name, ins);
        self.current_fn = None;
        Ok(())
    }
}

fn arith_op(op: BinOp) -> ArithOp {
    match op {
        BinOp::Add => ArithOp::Add,
        BinOp::Sub => ArithOp::Sub,
        BinOp::Mul => ArithOp::Mul,
        BinOp::Div => ArithOp::Div,
        BinOp::And => ArithOp::And,
        BinOp::Or => ArithOp::Or,
        BinOp::Xor => ArithOp::Xor,
    }
}

/// Decode a character constant, quotes included, into its ordinal value.
fn char_value(text: &str) -> Result<i32, CodeGenError> {
    if !text.contains('\'') {
        return Err(CodeGenError::BadCharLiteral(text.to_string()));
    }
    let bare: String = text.chars().filter(|c| *c != '\'').collect();
    let mut chars = bare.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c as i32),
        _ => Err(CodeGenError::BadCharLiteral(text.to_string())),
    }
}

/// Flatten a result into its atoms, dropping empty ones.
fn flatten(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::None => {}
        Value::Tuple(values) => {
            for value in values {
                flatten(value, out);
            }
        }
        atom => out.push(atom),
    }
}

fn patch_loop(ins: &mut [Instruction], start: Id, end: Id) {
    for ins in ins {
        ins.patch_loop(start, end);
    }
}

fn retarget(ins: &mut [Instruction], from: Id, to: Id) {
    for ins in ins {
        ins.retarget(from, to);
    }
}
