use crate::common::Id;
use crate::front::ast::*;
use crate::front::parse;

use super::codegen::{compile, CodeGen, CodeGenError};

fn assemble(src: &str) -> String {
    compile(&parse(src).unwrap()).unwrap().asm_code()
}

/// Index of the first line equal to `line`, for order assertions.
fn line_index(text: &str, line: &str) -> usize {
    text.lines()
        .position(|l| l == line)
        .unwrap_or_else(|| panic!("line {line:?} not found in:\n{text}"))
}

fn count(text: &str, needle: &str) -> usize {
    text.matches(needle).count()
}

#[test]
fn main_exits_with_syscall() {
    let out = assemble("int main() { return 0; }");
    assert!(out.contains("main:"));
    assert!(out.contains("li $v0, 0"));
    assert!(out.contains("li $v0, 10"));
    assert!(out.contains("syscall"));
    // main terminates, it does not return to a caller
    assert!(!out.contains("jr $ra"));
}

#[test]
fn global_store_and_load() {
    let out = assemble("int x; int main() { x = 42; return x; }");
    assert!(out.contains("x: .word 0"));
    assert!(out.contains("li $t0, 42"));
    assert!(out.contains("sw $t0, x"));
    assert!(out.contains("lw $t0, x"));
    assert!(out.contains("add $v0, $zero, $t0"));
}

#[test]
fn local_array_layout() {
    let out = assemble("int main() { int a[3] = {1, 2, 3}; return a[1]; }");
    // 3 words of locals plus the saved return address
    assert!(out.contains("addi $sp, $sp, -16"));
    assert_eq!(count(&out, "addi $sp, $sp, 16"), 2); // return + epilogue
    assert!(out.contains("sw $t0, 4($sp)"));
    assert!(out.contains("sw $t0, 8($sp)"));
    assert!(out.contains("sw $t0, 12($sp)"));
    // indexing scales by two self-adds, then offsets into the frame
    assert!(out.contains("add $t0, $t0, $t0"));
    assert!(out.contains("add $t0, $sp, $t0"));
    assert!(out.contains("addi $t0, $t0, 4"));
    assert!(out.contains("lw $t0, ($t0)"));
}

#[test]
fn zeroed_local_array() {
    let out = assemble("int main() { int a[2]; return 0; }");
    assert!(out.contains("sw $zero, 4($sp)"));
    assert!(out.contains("sw $zero, 8($sp)"));
}

#[test]
fn for_loop_with_printstr() {
    let out = assemble(
        r#"int main() { int i; for (i = 0; i < 3; i = i + 1) printstr("hi"); return 0; }"#,
    );
    assert_eq!(count(&out, ".asciiz"), 1);
    assert!(out.contains(r#"lbl2: .asciiz "hi""#));
    assert!(out.contains("la $a0, lbl2"));
    assert!(out.contains("li $v0, 4"));
    // lbl1 exits, lbl3 restarts; condition sits between the start label and
    // the body, the step after the body
    let start = line_index(&out, "lbl3:");
    let cond = line_index(&out, "bge $t0, $t1, lbl1");
    let print = line_index(&out, "syscall");
    let step = line_index(&out, "addi $t0, $t0, 1");
    let back = line_index(&out, "j lbl3");
    let exit = line_index(&out, "lbl1:");
    assert!(start < cond && cond < print && print < step && step < back && back < exit);
}

#[test]
fn call_passes_arguments_and_returns() {
    let out = assemble("int f(int x) { return x + 1; } int main() { return f(41); }");
    assert!(out.contains("li $a0, 41"));
    assert!(out.contains("jal f"));
    // the callee stores its argument register into the frame slot
    assert!(out.contains("sw $a0, 4($sp)"));
    assert!(out.contains("addi $t0, $t0, 1"));
    assert!(out.contains("jr $ra"));
    // the call result travels through $v0
    assert!(out.contains("add $v0, $zero, $v0"));
    // main comes first in .text
    assert!(line_index(&out, "main:") < line_index(&out, "f:"));
}

#[test]
fn address_of_local() {
    let out = assemble("int main() { int a; int b; &b; return 0; }");
    // slot 0 is ra, a sits at 4, b at 8
    assert!(out.contains("addi $t0, $sp, 8"));
}

#[test]
fn pointer_round_trip() {
    let out = assemble("int main() { int x; int p; p = &x; *p = 7; return *p; }");
    assert!(out.contains("addi $t0, $sp, 4"));
    assert!(out.contains("sw $t0, 8($sp)"));
    // store through the pointer
    assert!(out.contains("li $t0, 7"));
    assert!(out.contains("lw $t1, 8($sp)"));
    assert!(out.contains("sw $t0, ($t1)"));
    // read back through it
    assert!(out.contains("lw $t0, ($t0)"));
}

#[test]
fn global_array_indexing() {
    let out = assemble("int a[3]; int main() { a[2] = 9; return a[0]; }");
    assert!(out.contains("a: .word 0, 0, 0"));
    assert!(out.contains("la $t0, a"));
    // base address held in $t0, scaled index in $t1
    assert!(out.contains("add $t1, $t0, $t1"));
    assert!(out.contains("sw $t0, ($t1)"));
    assert!(out.contains("lw $t1, ($t1)"));
}

#[test]
fn literal_minus_register_is_not_commuted() {
    let out = assemble("int main() { int x; x = 2; return 10 - x; }");
    assert!(out.contains("li $t1, 10"));
    assert!(out.contains("sub $t1, $t1, $t0"));
    assert!(!out.contains("subi"));
}

#[test]
fn register_minus_literal_uses_immediate_form() {
    let out = assemble("int main() { int x; x = 2; return x - 1; }");
    assert!(out.contains("subi $t0, $t0, 1"));
}

#[test]
fn unary_folding() {
    let out = assemble("int main() { return -(5); }");
    assert!(out.contains("li $v0, -5"));
    let out = assemble("int main() { return ~0; }");
    assert!(out.contains("li $v0, -1"));
}

#[test]
fn char_constant_is_its_ordinal() {
    let out = assemble("int main() { return 'a'; }");
    assert!(out.contains("li $v0, 97"));
}

#[test]
fn malformed_char_constant_is_rejected() {
    let main = Function {
        ty: Type::Int,
        name: Id::from_ref("main"),
        params: Vec::new(),
        body: vec![Stmt::Return(Some(Expr::Char("ab".to_string())))],
    };
    let program = Program {
        items: vec![Item::Function(main)],
    };
    let mut codegen = CodeGen::new();
    let err = codegen.gen_program(&program).unwrap_err();
    assert!(matches!(err, CodeGenError::BadCharLiteral(_)));
}

#[test]
fn increment_decrement_pairs() {
    let out = assemble("int main() { int x; x = 5; x++; --x; return x; }");
    assert!(out.contains("addi $t1, $t1, 1"));
    assert!(out.contains("subi $t0, $t0, 1"));
}

#[test]
fn break_exits_the_loop() {
    let out = assemble("int main() { while (1 < 2) { break; } return 0; }");
    let start = line_index(&out, "lbl2:");
    let cond = line_index(&out, "bge $t0, $t1, lbl1");
    let back = line_index(&out, "j lbl2");
    let exit = line_index(&out, "lbl1:");
    assert!(start < cond && cond < back && back < exit);
    // the break jumps straight to the exit label
    assert!(out.contains("j lbl1"));
    assert!(line_index(&out, "j lbl1") < exit);
}

#[test]
fn continue_restarts_the_loop() {
    let out = assemble("int main() { while (1 < 2) { continue; } return 0; }");
    // once from the body, once as the loop back-edge
    assert_eq!(count(&out, "j lbl2"), 2);
}

#[test]
fn if_else_layout() {
    let out = assemble("int main() { int x; if (x == 1) x = 2; else x = 3; return x; }");
    let branch = line_index(&out, "bne $t0, $t1, lbl2");
    let skip_else = line_index(&out, "j lbl1");
    let else_label = line_index(&out, "lbl2:");
    let end_label = line_index(&out, "lbl1:");
    assert!(branch < skip_else && skip_else < else_label && else_label < end_label);
}

#[test]
fn do_while_runs_body_before_condition() {
    let out = assemble("int main() { int i; i = 0; do i = i + 1; while (i < 3); return i; }");
    let start = line_index(&out, "lbl2:");
    let body = line_index(&out, "addi $t0, $t0, 1");
    let cond = line_index(&out, "bge $t0, $t1, lbl1");
    let back = line_index(&out, "j lbl2");
    assert!(start < body && body < cond && cond < back);
}

#[test]
fn logical_and_shares_one_exit() {
    let out = assemble("int main() { int a; int b; if (a < 1 && b < 2) a = 3; return 0; }");
    // both branches bail to the right-hand side's exit label
    assert!(out.contains("bge $t0, $t1, lbl2"));
    assert_eq!(count(&out, ", lbl2"), 2);
    assert_eq!(count(&out, "lbl1"), 0);
    assert_eq!(count(&out, "lbl2:"), 1);
}

#[test]
fn logical_or_skips_the_second_test() {
    let out = assemble("int main() { int a; int b; if (a < 1 || b < 2) a = 3; return 0; }");
    let first = line_index(&out, "bge $t0, $t1, lbl1");
    let skip = line_index(&out, "j lbl3");
    let second_chance = line_index(&out, "lbl1:");
    let second = line_index(&out, "bge $t0, $t1, lbl2");
    let taken = line_index(&out, "lbl3:");
    let exit = line_index(&out, "lbl2:");
    assert!(first < skip && skip < second_chance && second_chance < second);
    assert!(second < taken && taken < exit);
}

#[test]
fn truthiness_condition_tests_against_zero() {
    let out = assemble("int main() { int x; x = 1; while (x) { x = 0; } return 0; }");
    assert!(out.contains("beq $t0, $zero, lbl1"));
}

#[test]
fn inline_asm_is_verbatim() {
    let out = assemble(r#"int main() { asm("li $v0, 5"); return 0; }"#);
    assert!(out.lines().any(|line| line == "li $v0, 5"));
}

#[test]
fn global_initializers() {
    let out = assemble("int x = 7; int y; int main() { return x; }");
    assert!(out.contains("x: .word 7"));
    assert!(out.contains("y: .word 0"));
}

#[test]
fn computed_global_initializer_runs_in_preamble() {
    let out = assemble("int z = 1 + 2; int main() { return z; }");
    assert!(out.contains("z: .word 0"));
    // the evaluation lands before the .data section
    assert!(line_index(&out, "sw $t0, z") < line_index(&out, ".data"));
}

#[test]
fn non_literal_global_array_initializer_is_rejected() {
    let program = parse("int a[1] = {1 + 2}; int main() { return 0; }").unwrap();
    let err = compile(&program).unwrap_err();
    assert!(matches!(err, CodeGenError::BadGlobalInit(_)));
}

#[test]
fn condition_cannot_be_a_value() {
    let program = parse("int main() { int a; a = (1 < 2) + 1; return 0; }").unwrap();
    let err = compile(&program).unwrap_err();
    assert!(matches!(err, CodeGenError::ConditionAsValue));
}

#[test]
fn unknown_variable_is_rejected() {
    let program = parse("int main() { return nope; }").unwrap();
    let err = compile(&program).unwrap_err();
    assert!(matches!(err, CodeGenError::UnknownVariable(_)));
}

#[test]
fn missing_main_is_rejected() {
    let program = parse("int f() { return 1; }").unwrap();
    let err = compile(&program).unwrap_err();
    assert!(matches!(err, CodeGenError::MissingMain));
    assert_eq!(err.to_string(), "no main function");
}

#[test]
fn four_arguments_are_fine_five_warn() {
    let four = parse(
        "int f(int a, int b, int c, int d) { return a; } int main() { return f(1, 2, 3, 4); }",
    )
    .unwrap();
    let mut codegen = CodeGen::new();
    codegen.gen_program(&four).unwrap();
    assert!(codegen.warnings().is_empty());
    let out = codegen.finish().unwrap().asm_code();
    assert!(out.contains("li $a3, 4"));
    assert!(out.contains("sw $a3, 16($sp)"));

    let five = parse(
        "int f(int a, int b, int c, int d, int e) { return a; } \
         int main() { return f(1, 2, 3, 4, 5); }",
    )
    .unwrap();
    let mut codegen = CodeGen::new();
    codegen.gen_program(&five).unwrap();
    assert_eq!(codegen.warnings().len(), 1);
    assert_eq!(codegen.warnings()[0], "too many arguments in function: f");
    // the fifth argument is dropped at the call site and only four argument
    // registers are saved by the callee
    let out = codegen.finish().unwrap().asm_code();
    assert!(!out.contains(", 5\njal"));
    assert_eq!(count(&out, "sw $a"), 4);
}

const TOUR: &str = r#"
int g;
int a[2] = {3, 4};

int sum(int x, int y) { return x + y; }

int main() {
    int i;
    int b[2];
    int p;
    g = sum(a[0], a[1]);
    p = &g;
    *p = *p + 1;
    for (i = 0; i < 2; i = i + 1) {
        b[i] = a[i] * 2;
        if (b[i] == 6 && i < 1) continue;
        if (b[i] > 7 || g > 100) break;
    }
    while (i > 0) {
        do i = i - 1; while (i > 3);
        printstr("tick");
    }
    return b[0] + b[1] - g;
}
"#;

#[test]
fn registers_all_returned_after_a_compile() {
    let program = parse(TOUR).unwrap();
    let mut codegen = CodeGen::new();
    codegen.gen_program(&program).unwrap();
    assert!(codegen.registers_idle());
}

#[test]
fn no_placeholder_survives() {
    let out = assemble(TOUR);
    assert!(!out.contains("STACK"));
    assert!(!out.contains("START"));
    assert!(!out.contains("END"));
}

#[test]
fn branch_targets_are_defined_exactly_once() {
    let out = assemble(TOUR);
    let mut defined = std::collections::BTreeMap::new();
    for line in out.lines() {
        if let Some(label) = line.strip_suffix(':') {
            if label.starts_with("lbl") {
                *defined.entry(label.to_string()).or_insert(0) += 1;
            }
        }
    }
    for (label, count) in &defined {
        assert_eq!(*count, 1, "label {label} defined {count} times");
    }
    for line in out.lines() {
        let target = if let Some(rest) = line.strip_prefix("j ") {
            Some(rest)
        } else if line.starts_with('b') {
            line.rsplit_once(", ").map(|(_, target)| target)
        } else {
            None
        };
        if let Some(target) = target {
            if target.starts_with("lbl") {
                assert!(defined.contains_key(target), "undefined target {target}");
            }
        }
    }
}

#[test]
fn data_section_is_complete() {
    let out = assemble(TOUR);
    assert_eq!(count(&out, ".asciiz"), 1);
    assert!(out.contains("g: .word 0"));
    assert!(out.contains("a: .word 3, 4"));
    assert_eq!(count(&out, ".data"), 1);
    assert_eq!(count(&out, ".text"), 1);
}

#[test]
fn compilation_is_deterministic() {
    assert_eq!(assemble(TOUR), assemble(TOUR));
}

#[test]
fn prologue_and_returns_agree_on_frame_size() {
    let out = assemble(
        "int f(int n) { int x; if (n < 1) { return 0; } return x; } int main() { return f(2); }",
    );
    // f's frame: ra + n + x = 12 bytes; both returns and the epilogue
    // unwind exactly what the prologue reserved
    assert_eq!(count(&out, "addi $sp, $sp, -12"), 1);
    assert_eq!(count(&out, "addi $sp, $sp, 12"), 3);
}
