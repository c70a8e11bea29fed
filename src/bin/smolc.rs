//! the main compiler binary. takes a source file and an optional output
//! format (assembly by default), and an optimization flag.
//!
//! run with `--help` for more info.

use std::process::ExitCode;

use smolc::{back, front, middle, Error};

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Asm)]
    out: Output,
    /// turn on optimizations
    #[arg(short = 'O', default_value_t = false)]
    optimize: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// tiny IR, after optimizations
    Tir,
    /// the basic-block partition of the IR
    Blocks,
    /// the resulting assembly code
    Asm,
}

fn get_ir(input: &str, optimize: bool) -> Result<middle::Lowered, Error> {
    let program = front::parse(input)?;
    let lowered = front::lower(&program)?;
    Ok(if optimize { middle::optimize(lowered) } else { lowered })
}

fn run(args: &Args) -> Result<(), Error> {
    let input = std::fs::read_to_string(&args.file).expect("file should be readable");

    match args.out {
        Output::Tokens => {
            let mut lexer = front::lex::Lexer::new(&input);
            while let Some(token) = lexer.next()? {
                println!("{token}");
            }
        }
        Output::Ast => {
            println!("{:?}", front::parse(&input)?);
        }
        Output::Tir => {
            let lowered = get_ir(&input, args.optimize)?;
            print!("{}", lowered.table);
        }
        Output::Blocks => {
            let lowered = get_ir(&input, args.optimize)?;
            let partition = middle::partition(&lowered.table);
            for block in &partition.blocks {
                println!("L{}: [{}, {})", block.id, block.start, block.end);
            }
        }
        Output::Asm => {
            let lowered = get_ir(&input, args.optimize)?;
            for line in back::codegen::generate(&lowered)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
