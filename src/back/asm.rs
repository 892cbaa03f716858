//! The MIPS backend's instruction set.
//!
//! The backend fuses register allocation into code generation (there is no
//! separate register allocator): expression evaluation checks temporaries out
//! of a fixed pool and checks them back in as subexpressions are consumed.
//!
//! # Call stack frame
//!
//! `$sp` grows down.  Each function owns a frame of `4 × (1 + Σ widths of its
//! locals)` bytes; slot 0 (offset 0 from `$sp`) holds the saved return
//! address, and every local sits at `4 × (1 + Σ widths of the locals declared
//! before it)`:
//!
//! ```txt
//!   High memory addresses
//!
//!   +-------------------------+
//!   | Caller's frame          |
//!   +-------------------------+
//!   | Last local              |
//!   +-------------------------+
//!   |       ...               |
//!   +-------------------------+
//!   | First local / first arg |
//!   +-------------------------+
//!   | Saved return address    | <- Stack Pointer (sp)
//!   +-------------------------+
//!
//!   Low memory addresses
//! ```
//!
//! # Calling convention
//!
//! Arguments travel in `$a0`–`$a3` and are stored by the callee into its own
//! frame right after the prologue, so inside a body an argument is just a
//! local.  Return values travel in `$v0`.  Everything past the fourth
//! argument is dropped at the call site.
//!
//! # Placeholders
//!
//! Three operand values cannot be known while a statement is being emitted:
//! the enclosing function's frame size (`return` restores `$sp` before the
//! body has finished declaring locals) and the nearest enclosing loop's entry
//! and exit labels (`continue`/`break`).  These are first-class operand
//! variants ([Imm::FrameSize], [Target::LoopStart], [Target::LoopEnd]) and
//! get rewritten in place by the function emitter or the enclosing loop once
//! the real values exist.  Unresolved placeholders print as `STACK`, `START`
//! and `END`, which no generated label or immediate can ever look like.
//!
//! The output dialect is SPIM/MARS assembly; pseudo-instructions (`li`, `la`,
//! `subi`, `bge`, `not`, ...) are left to the downstream simulator to expand.

use derive_more::Display;

use crate::common::*;

use Register::*;

/// Word and pointer size for this processor
pub const WORD_SIZE: i32 = 4;

// Argument registers, in argument order
static ARG_REGISTERS: [Register; 4] = [A0, A1, A2, A3];

/// Registers for the MIPS machine, in the order in the register file.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Register {
    #[display("$zero")]
    Zero,
    #[display("$at")]
    At,
    #[display("$v0")]
    V0,
    #[display("$v1")]
    V1,
    #[display("$a0")]
    A0,
    #[display("$a1")]
    A1,
    #[display("$a2")]
    A2,
    #[display("$a3")]
    A3,
    #[display("$t0")]
    T0,
    #[display("$t1")]
    T1,
    #[display("$t2")]
    T2,
    #[display("$t3")]
    T3,
    #[display("$t4")]
    T4,
    #[display("$t5")]
    T5,
    #[display("$t6")]
    T6,
    #[display("$t7")]
    T7,
    #[display("$s0")]
    S0,
    #[display("$s1")]
    S1,
    #[display("$s2")]
    S2,
    #[display("$s3")]
    S3,
    #[display("$s4")]
    S4,
    #[display("$s5")]
    S5,
    #[display("$s6")]
    S6,
    #[display("$s7")]
    S7,
    #[display("$t8")]
    T8,
    #[display("$t9")]
    T9,
    #[display("$k0")]
    K0,
    #[display("$k1")]
    K1,
    #[display("$gp")]
    Gp,
    #[display("$sp")]
    Sp,
    #[display("$fp")]
    Fp,
    #[display("$ra")]
    Ra,
}

impl Register {
    /// The register carrying argument `n` of a call.
    pub fn arg(n: usize) -> Register {
        ARG_REGISTERS[n]
    }
}

/// Memory locations that MIPS loads and stores can access.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Mem {
    /// A named location in the `.data` segment.
    #[display("{_0}")]
    Global(Id),
    /// `offset($reg)`
    #[display("{_1}({_0})")]
    Offset(Register, i32),
    /// `($reg)`: the address held in a register.
    #[display("({_0})")]
    Deref(Register),
}

/// Immediate operands.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Imm {
    #[display("{_0}")]
    Int(i32),
    /// The enclosing function's frame size in bytes; resolved by the function
    /// emitter once the whole body has been walked.
    #[display("STACK")]
    FrameSize,
}

/// Jump targets.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Target {
    #[display("{_0}")]
    Label(Id),
    /// Entry of the nearest enclosing loop; resolved by that loop.
    #[display("START")]
    LoopStart,
    /// Exit of the nearest enclosing loop; resolved by that loop.
    #[display("END")]
    LoopEnd,
}

/// Conditions for branching
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum Condition {
    #[display("eq")]
    Equal,
    #[display("ne")]
    NotEqual,
    #[display("lt")]
    Less,
    #[display("le")]
    LessEq,
    #[display("gt")]
    Greater,
    #[display("ge")]
    GreaterEq,
}

/// Arithmetic operations used in the `Arith` family of instructions.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ArithOp {
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("mul")]
    Mul,
    #[display("div")]
    Div,
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("xor")]
    Xor,
}

/// A MIPS instruction, or a label definition in the instruction stream.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Instruction {
    /// `lbl:` — a branch target defined at this point of the stream.
    Label(Id),
    La {
        dst: Register,
        src: Id,
    },
    Li {
        dst: Register,
        imm: Imm,
    },
    Lw {
        dst: Register,
        src: Mem,
    },
    Sw {
        src: Register,
        dst: Mem,
    },
    /// Three-register arithmetic.  See [ArithOp] for supported operations.
    Arith {
        op: ArithOp,
        dst: Register,
        lhs: Register,
        rhs: Register,
    },
    /// Register-immediate arithmetic, printed as the `i`-suffixed
    /// pseudo-instruction (`addi`, `subi`, ...).
    ArithI {
        op: ArithOp,
        dst: Register,
        lhs: Register,
        rhs: Imm,
    },
    Not {
        dst: Register,
        src: Register,
    },
    Branch {
        cond: Condition,
        lhs: Register,
        rhs: Register,
        target: Target,
    },
    Jump(Target),
    /// Call: jump and link.
    Jal(Id),
    /// Return: jump through the return-address register.
    Jr(Register),
    Syscall,
    /// An inline-assembly line passed through untouched.
    Verbatim(String),
}

impl Instruction {
    /// Create an instruction that moves values between registers.
    pub fn mov(dst: Register, src: Register) -> Instruction {
        Instruction::Arith {
            op: ArithOp::Add,
            dst,
            lhs: Zero,
            rhs: src,
        }
    }

    /// Resolve a [Imm::FrameSize] placeholder, if this instruction has one.
    pub fn patch_frame_size(&mut self, bytes: i32) {
        match self {
            Instruction::Li { imm, .. } | Instruction::ArithI { rhs: imm, .. } => {
                if *imm == Imm::FrameSize {
                    *imm = Imm::Int(bytes);
                }
            }
            _ => {}
        }
    }

    /// Resolve [Target::LoopStart] and [Target::LoopEnd] placeholders.
    /// Targets already resolved by an inner loop are left alone.
    pub fn patch_loop(&mut self, start: Id, end: Id) {
        match self.target_mut() {
            Some(target @ Target::LoopStart) => *target = Target::Label(start),
            Some(target @ Target::LoopEnd) => *target = Target::Label(end),
            _ => {}
        }
    }

    /// Redirect a jump or branch from one label to another.
    pub fn retarget(&mut self, from: Id, to: Id) {
        if let Some(target) = self.target_mut() {
            if *target == Target::Label(from) {
                *target = Target::Label(to);
            }
        }
    }

    fn target_mut(&mut self) -> Option<&mut Target> {
        match self {
            Instruction::Jump(target) | Instruction::Branch { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Instruction::*;

        match self {
            Label(id) => write!(f, "{id}:"),
            La { dst, src } => write!(f, "la {dst}, {src}"),
            Li { dst, imm } => write!(f, "li {dst}, {imm}"),
            Lw { dst, src } => write!(f, "lw {dst}, {src}"),
            Sw { src, dst } => write!(f, "sw {src}, {dst}"),
            Arith { op, dst, lhs, rhs } => write!(f, "{op} {dst}, {lhs}, {rhs}"),
            ArithI { op, dst, lhs, rhs } => write!(f, "{op}i {dst}, {lhs}, {rhs}"),
            Not { dst, src } => write!(f, "not {dst}, {src}"),
            Branch {
                cond,
                lhs,
                rhs,
                target,
            } => write!(f, "b{cond} {lhs}, {rhs}, {target}"),
            Jump(target) => write!(f, "j {target}"),
            Jal(target) => write!(f, "jal {target}"),
            Jr(rs) => write!(f, "jr {rs}"),
            Syscall => write!(f, "syscall"),
            Verbatim(line) => write!(f, "{line}"),
        }
    }
}

/// A backend program, ready to serialize.
#[derive(Debug)]
pub struct Program {
    /// Instructions emitted at top level, outside any function (global
    /// initializer side effects).
    pub preamble: Vec<Instruction>,
    /// String literals for `.asciiz` emission, in first-use order.  The
    /// literal text keeps its surrounding quotes.
    pub strings: Vec<(Id, String)>,
    /// Global variables: name to `.word` initializer text.
    pub globals: Map<Id, String>,
    /// Function bodies.  `main` is printed first, the rest in name order.
    pub functions: Map<Id, Vec<Instruction>>,
}

impl Program {
    pub fn asm_code(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for ins in &self.preamble {
            writeln!(f, "{ins}")?;
        }
        writeln!(f, ".data")?;
        for (label, text) in &self.strings {
            writeln!(f, "{label}: .asciiz {text}")?;
        }
        for (name, init) in &self.globals {
            writeln!(f, "{name}: .word {init}")?;
        }
        writeln!(f, ".text")?;
        writeln!(f)?;
        if let Some(body) = self.functions.get(&main_id()) {
            for ins in body {
                writeln!(f, "{ins}")?;
            }
            writeln!(f)?;
        }
        for (name, body) in &self.functions {
            if *name == main_id() {
                continue;
            }
            for ins in body {
                writeln!(f, "{ins}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
