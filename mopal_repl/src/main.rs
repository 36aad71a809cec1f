use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use codesnake::{Block, CodeWidth, Label, LineIndex};
use mopal::{
    ast::{Expr, Type, UserDefinition},
    check,
    compiler::{assemble, bytecode::ObjectCode},
    lexer::{LexerError, Token},
    runtime::{
        treewalk::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT},
        EvalConfig,
    },
    syntax::parse_definitions,
    table::ENTRY_POINT,
    CheckError, CompileOptions, FunctionTable, LoadError, MachineConfig, Span, Word,
    DEFAULT_BUDGET,
};
use rustyline::error::ReadlineError;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, EnvFilter};
use yansi::Paint;

#[derive(Parser, Debug)]
#[command(name = "mopal", version)]
#[command(about = "Compile µ-Opal programs to UEBB stack machine code and run them")]
struct Cli {
    /// More logging: -v for debug, -vv for every executed instruction
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct CompileArgs {
    /// Compile `eq(x, 0)` conditions as written
    #[arg(long)]
    no_peephole: bool,
}

impl CompileArgs {
    fn options(self) -> CompileOptions {
        CompileOptions {
            peephole: !self.no_peephole,
        }
    }
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct MachineArgs {
    /// Instructions executed before the program is assumed not to terminate
    #[arg(long, default_value_t = DEFAULT_BUDGET)]
    budget: u64,
}

impl MachineArgs {
    fn config(self) -> MachineConfig {
        MachineConfig {
            budget: self.budget,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a program and run it on the stack machine
    Run {
        file: PathBuf,
        #[command(flatten)]
        compile: CompileArgs,
        #[command(flatten)]
        machine: MachineArgs,
    },
    /// Evaluate a program with the tree-walking evaluator
    Eval {
        file: PathBuf,
        /// Expressions evaluated before giving up
        #[arg(long, default_value_t = DEFAULT_BUDGET)]
        fuel: u64,
        /// Nested calls allowed before giving up, at most 4096
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },
    /// Print the object code of a program
    Compile {
        file: PathBuf,
        /// Print the assembly before label resolution
        #[arg(long)]
        symbolic: bool,
        /// Write the listing to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        compile: CompileArgs,
    },
    /// Run a stored object code listing
    Exec {
        listing: PathBuf,
        #[command(flatten)]
        machine: MachineArgs,
    },
    /// Show how a source file is tokenized
    Tokens { file: PathBuf },
    /// Interactive session: `DEF` lines add definitions, anything else is evaluated
    Repl {
        #[command(flatten)]
        compile: CompileArgs,
        #[command(flatten)]
        machine: MachineArgs,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,mopal=debug",
        _ => "warn,mopal=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn make_block<'a>(
    idx: &'a LineIndex,
    labels: impl IntoIterator<Item = (Span, Result<Token, LexerError>)>,
) -> Option<Block<&'a str, String>> {
    Block::new(
        idx,
        labels.into_iter().map(|(range, tok)| {
            let text = format!("{tok:?}");
            Label::new(range)
                .with_text(if tok.is_ok() {
                    text.green().to_string()
                } else {
                    text.red().to_string()
                })
                .with_style(move |s| match tok {
                    Ok(Token::Identifier(_)) => s.blue().to_string(),
                    Ok(Token::Natural(_) | Token::Boolean(_)) => s.yellow().to_string(),
                    Ok(Token::Type(_)) => s.cyan().to_string(),
                    Ok(Token::Comment) => s.dim().to_string(),
                    Ok(_) => s,
                    Err(_) => s.red().to_string(),
                })
        }),
    )
}

fn print_block(name: &str, block: Block<&str, String>) {
    let block = block.map_code(|c| CodeWidth::new(c, c.len()));
    eprintln!("{}[{name}]", block.prologue());
    eprint!("{block}");
    eprintln!("{}", block.epilogue());
}

fn show_tokens(name: &str, src: &str) {
    let idx = LineIndex::new(src);
    let mut blocks = vec![];
    let mut line_labels = vec![];
    for (token, span) in Token::lexer(src).spanned() {
        match token {
            Ok(Token::LineEnding) => blocks.push(make_block(&idx, line_labels.drain(..))),
            Ok(Token::Whitespace) => {}
            tok => line_labels.push((span, tok)),
        }
    }
    if !line_labels.is_empty() {
        blocks.push(make_block(&idx, line_labels.drain(..)));
    }

    for block in blocks.into_iter().flatten() {
        let block = block.map_code(|c| CodeWidth::new(c, c.len()));
        println!("{}[{name}]", block.prologue());
        print!("{block}");
        println!("{}", block.epilogue());
    }
}

/// Prints `message`, pointing into `src` when the error has a location.
fn report(name: &str, src: &str, message: &str, span: Option<Span>) {
    let idx = LineIndex::new(src);
    let block = span.clone().filter(|span| !span.is_empty()).and_then(|span| {
        Block::new(
            &idx,
            [Label::new(span)
                .with_text(message.red().to_string())
                .with_style(|s| s.red().bold().to_string())],
        )
    });
    match block {
        Some(block) => print_block(name, block),
        None => {
            let position = span.map(|span| format!(" at {}", span.start)).unwrap_or_default();
            eprintln!("{}{position}: {message}", name.bold());
        }
    }
}

fn report_load_error(name: &str, src: &str, error: &LoadError) {
    for (message, span) in error.diagnostics() {
        report(name, src, &message, span);
    }
}

fn display_result(value: Word, ty: Type) -> String {
    match ty {
        Type::Bool => (value != 0).to_string(),
        Type::Nat => value.to_string(),
    }
}

fn main_type(table: &FunctionTable) -> Type {
    table
        .entry_point()
        .map(|main| main.return_type)
        .unwrap_or(Type::Nat)
}

fn load_file(path: &Path) -> anyhow::Result<(String, FunctionTable)> {
    let src = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    match mopal::load(&src) {
        Ok(table) => Ok((src, table)),
        Err(error) => {
            report_load_error(&path.display().to_string(), &src, &error);
            bail!("{}: {error}", path.display())
        }
    }
}

fn compile_table(
    name: &str,
    src: &str,
    table: &FunctionTable,
    options: CompileOptions,
) -> anyhow::Result<ObjectCode> {
    mopal::compile(table, options).or_else(|error| {
        report(name, src, &error.to_string(), error.span());
        bail!("compilation failed")
    })
}

fn run(file: PathBuf, options: CompileOptions, config: MachineConfig) -> anyhow::Result<()> {
    let (src, table) = load_file(&file)?;
    let code = compile_table(&file.display().to_string(), &src, &table, options)?;
    debug!(instructions = code.len(), "compiled");
    let value = mopal::execute(&code, config)?;
    println!("{}", display_result(value, main_type(&table)));
    Ok(())
}

/// Enough native stack for the evaluator to recurse to [`MAX_DEPTH_LIMIT`].
const EVAL_STACK_SIZE: usize = 256 << 20;

fn eval(file: PathBuf, config: EvalConfig) -> anyhow::Result<()> {
    let (_, table) = load_file(&file)?;
    if config.max_depth > MAX_DEPTH_LIMIT {
        warn!(max_depth = config.max_depth, limit = MAX_DEPTH_LIMIT, "call depth clamped");
    }
    let result = thread::scope(|scope| {
        thread::Builder::new()
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, || mopal::evaluate(&table, config))?
            .join()
            .map_err(|_| anyhow!("the evaluator panicked"))
    })?;
    let value = result?;
    println!("{}", display_result(value, main_type(&table)));
    Ok(())
}

fn compile(
    file: PathBuf,
    symbolic: bool,
    output: Option<PathBuf>,
    options: CompileOptions,
) -> anyhow::Result<()> {
    let (src, table) = load_file(&file)?;
    let name = file.display().to_string();
    let listing = if symbolic {
        assemble(&table, options)
            .or_else(|error| {
                report(&name, &src, &error.to_string(), error.span());
                bail!("compilation failed")
            })?
            .to_string()
    } else {
        compile_table(&name, &src, &table, options)?.to_string()
    };
    match output {
        Some(path) => {
            fs::write(&path, listing).with_context(|| format!("writing {}", path.display()))?
        }
        None => print!("{listing}"),
    }
    Ok(())
}

fn exec(listing: PathBuf, config: MachineConfig) -> anyhow::Result<()> {
    let text =
        fs::read_to_string(&listing).with_context(|| format!("reading {}", listing.display()))?;
    let code = ObjectCode::from_listing(&text)
        .with_context(|| format!("parsing {}", listing.display()))?;
    println!("{}", mopal::execute(&code, config)?);
    Ok(())
}

/// Definitions entered so far in a REPL session.
struct Session {
    definitions: Vec<UserDefinition>,
    options: CompileOptions,
    config: MachineConfig,
}

impl Session {
    fn define(&mut self, line: &str) -> Result<(), LoadError> {
        let new = parse_definitions(line).map_err(LoadError::Syntax)?;
        // stands in for the entry point so the new definitions can be checked
        let placeholder = UserDefinition::new(ENTRY_POINT, [], Type::Nat, Expr::nat(0));
        check(
            self.definitions
                .iter()
                .chain(&new)
                .cloned()
                .chain([placeholder]),
        )
        .map_err(LoadError::Check)?;
        self.definitions.extend(new);
        Ok(())
    }

    /// Checks `src`, a definition of `MAIN` assumed to return `nat`, along
    /// with the session. If it turns out to be `bool`, that is fine too.
    fn table_with_main(&self, src: &str) -> Result<FunctionTable, LoadError> {
        let mut main = parse_definitions(src)
            .map_err(LoadError::Syntax)?
            .pop()
            .ok_or(LoadError::Check(vec![CheckError::MissingEntryPoint]))?;
        let with_main = |main: &UserDefinition| {
            check(self.definitions.iter().cloned().chain([main.clone()]))
        };
        match with_main(&main) {
            Err(errors) => match errors.as_slice() {
                [CheckError::ReturnType { name, found, .. }] if name.as_ref() == ENTRY_POINT => {
                    main.return_type = *found;
                    with_main(&main).map_err(LoadError::Check)
                }
                _ => Err(LoadError::Check(errors)),
            },
            ok => ok.map_err(LoadError::Check),
        }
    }

    fn evaluate(&self, line: &str) -> anyhow::Result<()> {
        let src = format!("DEF {ENTRY_POINT}:nat == {line}");
        let table = match self.table_with_main(&src) {
            Ok(table) => table,
            Err(error) => {
                report_load_error("repl", &src, &error);
                return Ok(());
            }
        };
        let code = compile_table("repl", &src, &table, self.options)?;
        let value = mopal::execute(&code, self.config)?;
        println!("{}", display_result(value, main_type(&table)));
        Ok(())
    }
}

fn repl(options: CompileOptions, config: MachineConfig) -> anyhow::Result<()> {
    let mut readline = rustyline::DefaultEditor::new()?;
    let mut session = Session {
        definitions: vec![],
        options,
        config,
    };

    loop {
        let input = match readline.readline(">> ") {
            Ok(input) => input,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(error) => return Err(error.into()),
        };
        let line = input.trim();
        if line.is_empty() {
            continue;
        }
        readline.add_history_entry(line)?;

        if line.starts_with("DEF") {
            match session.define(line) {
                Ok(()) => println!("{}", "defined".green()),
                Err(error) => report_load_error("repl", line, &error),
            }
        } else if let Err(error) = session.evaluate(line) {
            eprintln!("{}", error.red());
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run {
            file,
            compile,
            machine,
        } => run(file, compile.options(), machine.config()),
        Command::Eval {
            file,
            fuel,
            max_depth,
        } => eval(file, EvalConfig { fuel, max_depth }),
        Command::Compile {
            file,
            symbolic,
            output,
            compile: args,
        } => compile(file, symbolic, output, args.options()),
        Command::Exec { listing, machine } => exec(listing, machine.config()),
        Command::Tokens { file } => {
            let src =
                fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            show_tokens(&file.display().to_string(), &src);
            Ok(())
        }
        Command::Repl { compile, machine } => repl(compile.options(), machine.config()),
    }
}
