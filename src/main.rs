use std::io::{self, BufRead, Read, Write};

use anyhow::{bail, Context, Result};
use ruleval::Value;

fn main() -> Result<()> {
    let mut ast = false;
    let mut bytecode = false;
    let mut run = false;
    let mut repl = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--ast" => ast = true,
            "--bytecode" => bytecode = true,
            "--run" => run = true,
            "--repl" => repl = true,
            other => bail!("Unknown flag '{other}'"),
        }
    }

    if ast {
        print_ast()
    } else if bytecode {
        print_disassembly()
    } else if run {
        run_program()
    } else if repl {
        start_repl()
    } else {
        eprintln!("usage: ruleval --ast | --bytecode | --run | --repl");
        eprintln!("reads an expression from stdin (one per line in --repl)");
        std::process::exit(2)
    }
}

fn input() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Reading stdin")?;
    Ok(buffer)
}

fn print_ast() -> Result<()> {
    let node = ruleval::parse(input()?.trim())?;
    println!("{node:#?}");
    Ok(())
}

fn print_disassembly() -> Result<()> {
    let node = ruleval::parse(input()?.trim())?;
    let program = ruleval::compile(&node)?;
    print!("{}", program.disassemble());
    Ok(())
}

fn run_program() -> Result<()> {
    let value = ruleval::eval(input()?.trim(), &Value::Nil)?;
    println!("{value}");
    Ok(())
}

fn start_repl() -> Result<()> {
    let stdin = io::stdin();
    prompt()?;

    for line in stdin.lock().lines() {
        let line = line.context("Reading stdin")?;
        if !line.trim().is_empty() {
            match ruleval::eval(line.trim(), &Value::Nil) {
                Ok(value) => println!("{value}"),
                Err(err) => println!("{err}"),
            }
        }
        prompt()?;
    }

    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush().context("Flushing stdout")?;
    Ok(())
}
