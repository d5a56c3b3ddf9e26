use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser as ClapParser;
use colored::Colorize;

use rexion::bytecode::disasm::{hex_dump, listing};
use rexion::bytecode::verify::verify;
use rexion::frontend::{Lexer, MacroEngine};
use rexion::frontend::token_dumper::TokenDumper;
use rexion::ir::IrInstr;
use rexion::ir::instr::render;
use rexion::ir::text::parse_ir;
use rexion::ir::verify::Severity;
use rexion::{Program, Vm, VmConfig, assemble, compile};

#[derive(ClapParser)]
#[command(name = "rexion")]
#[command(version)]
#[command(about = "Compile and run Rexion programs on an 8-register VM", long_about = None)]
struct Cli {
    /// Source (.rex), textual IR (.ir) or compiled program (.rxb)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Print the token stream after macro expansion and stop
    #[arg(long)]
    tokens: bool,

    /// Print the syntax tree
    #[arg(long)]
    ast: bool,

    /// Print the IR
    #[arg(long)]
    ir: bool,

    /// Print a disassembly listing
    #[arg(long)]
    disasm: bool,

    /// Print a hex dump of the bytecode
    #[arg(long)]
    hex: bool,

    /// Trace every executed instruction to stderr
    #[arg(long)]
    trace: bool,

    /// Statically check the bytecode before running it
    #[arg(long)]
    verify: bool,

    /// Write the program instead of running it (.rxb container, .bin raw bytes)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Abort after this many executed instructions
    #[arg(long, value_name = "N")]
    max_steps: Option<usize>,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,
}

fn main() {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    let program = match extension(&cli.input) {
        "rex" => from_source(&cli),
        "ir" => from_ir(&cli),
        "rxb" | "bin" => Program::load(&cli.input).unwrap_or_else(|e| fail(e)),
        other => fail(format!(
            "expected a .rex, .ir or .rxb file, got '.{}' ({})",
            other,
            cli.input.display()
        )),
    };

    if cli.disasm {
        println!("{}", listing(&program).unwrap_or_else(|e| fail(e)));
    }
    if cli.hex {
        print!("{}", hex_dump(&program.code));
    }
    if cli.verify {
        match verify(&program.code) {
            Ok(()) => note("bytecode verified"),
            Err(e) => fail(e),
        }
    }

    if let Some(path) = &cli.output {
        program.save(path).unwrap_or_else(|e| fail(e));
        note(&format!("wrote {} bytes to {}", program.len(), path.display()));
        return;
    }

    run(&program, &cli);
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

fn read(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|e| fail(format!("failed to read '{}': {}", path.display(), e)))
}

fn from_source(cli: &Cli) -> Program {
    let source = read(&cli.input);

    if cli.tokens {
        let tokens = Lexer::new(&source)
            .tokenize()
            .and_then(|tokens| MacroEngine::new().process(tokens))
            .unwrap_or_else(|e| fail(e));
        let mut dumper = TokenDumper::new().pretty();
        if cli.no_color {
            dumper = dumper.no_color();
        }
        print!("{}", dumper.dump(&tokens));
        process::exit(0);
    }

    let compilation = compile(&source).unwrap_or_else(|e| fail(e));

    for trace in &compilation.expansions {
        note(&format!("expanded {}", trace));
    }
    for lint in &compilation.lints {
        eprintln!("{}", lint.to_string().yellow());
    }
    for diagnostic in &compilation.diagnostics {
        match diagnostic.severity() {
            Severity::Warning => eprintln!("{}", diagnostic.to_string().yellow()),
            Severity::Note => note(&diagnostic.to_string()),
        }
    }

    if cli.ast {
        println!("{:#?}", compilation.ast);
    }
    build(&compilation.ir, cli)
}

fn from_ir(cli: &Cli) -> Program {
    let instrs = parse_ir(&read(&cli.input)).unwrap_or_else(|e| fail(e));
    if cli.tokens || cli.ast {
        note("--tokens and --ast need a .rex source; ignored");
    }
    build(&instrs, cli)
}

fn build(instrs: &[IrInstr], cli: &Cli) -> Program {
    if cli.ir {
        print!("{}", render(instrs));
    }
    assemble(instrs).unwrap_or_else(|e| fail(e))
}

fn run(program: &Program, cli: &Cli) {
    let config = VmConfig {
        max_steps: cli.max_steps,
        trace: cli.trace,
        ..VmConfig::default()
    };
    let mut vm = Vm::with_config(config);
    let result = vm.run(&program.code);

    for event in vm.trace() {
        eprintln!("{}", event.to_string().dimmed());
    }

    match result {
        Ok(execution) => print!("{}", execution),
        Err(e) => {
            for value in vm.output() {
                println!("{}", value);
            }
            eprintln!("{}", vm.show_state().dimmed());
            fail(e)
        }
    }
}

fn note(message: &str) {
    eprintln!("{}", format!("note: {}", message).dimmed());
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("{}", err.to_string().red().bold());
    process::exit(1);
}
