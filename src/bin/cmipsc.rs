//! the compiler binary. takes a C source file and writes MIPS assembly that a
//! SPIM or MARS style simulator can run.  a debug dump of the parse tree goes
//! to an `ast` file next to the compiler.
//!
//! run with `--help` for more info.

use cmips::{back::codegen::CodeGen, front};

use chrono::Local;
use clap::{Parser, ValueEnum};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output assembly file
    output: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Emit::Asm)]
    emit: Emit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Emit {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// the resulting assembly code
    Asm,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let input = std::fs::read_to_string(&args.file)
        .map_err(|e| format!("reading input file \"{}\" failed: {e}", args.file))?;

    match args.emit {
        Emit::Tokens => {
            let mut lexer = front::lex::Lexer::new(&input);
            while let Some(token) = lexer.next().map_err(|e| e.to_string())? {
                println!("{token}");
            }
            Ok(())
        }
        Emit::Ast => {
            println!("{:?}", front::parse(&input).map_err(|e| e.to_string())?);
            Ok(())
        }
        Emit::Asm => {
            let ast = front::parse(&input).map_err(|e| e.to_string())?;
            // diagnostic parse-tree dump; nothing consumes it
            std::fs::write("ast", format!("{ast:?}"))
                .map_err(|e| format!("writing ast dump failed: {e}"))?;

            let mut codegen = CodeGen::new();
            codegen.gen_program(&ast).map_err(|e| e.to_string())?;
            for warning in codegen.take_warnings() {
                eprintln!("warning: {warning}");
            }
            let program = codegen.finish().map_err(|e| e.to_string())?;

            let mut out = String::new();
            out.push_str(&format!("# Generated from: {}\n", args.file));
            out.push_str(&format!("# Generated at: {}\n", Local::now()));
            out.push_str(&program.asm_code());
            std::fs::write(&args.output, out)
                .map_err(|e| format!("writing output file \"{}\" failed: {e}", args.output))
        }
    }
}
