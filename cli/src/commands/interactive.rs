//! Interactive session: load the pipeline once, generate per input line

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use thiserror::Error;
use zimage_core::device::check_pixel_limit;
use zimage_core::prompts::load_prompts;
use zimage_core::resolution::{ratio_dimensions, ratio_names, DEFAULT_RATIO};
use zimage_core::InterruptFlag;

use super::generate::{target_resolution, BatchJob, Generator};

const PROMPT: &str = "z-image> ";

/// Options accepted on a generation line
#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct LineArgs {
    #[arg(short, long, conflicts_with_all = ["prompts_file", "words"])]
    prompt: Option<String>,

    #[arg(short = 'f', long, conflicts_with = "words")]
    prompts_file: Option<PathBuf>,

    #[arg(short, long, default_value = DEFAULT_RATIO)]
    ratio: String,

    #[arg(long)]
    resolution: Option<String>,

    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    count: u32,

    #[arg(short, long)]
    seed: Option<u64>,

    #[arg(long)]
    force_mps: bool,

    /// Bare prompt text
    words: Vec<String>,
}

/// A validated generation line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateArgs {
    pub prompt: Option<String>,
    pub prompts_file: Option<PathBuf>,
    pub ratio: String,
    pub resolution: Option<String>,
    pub count: u32,
    pub seed: Option<u64>,
    pub force_mps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractiveError {
    #[error("Invalid aspect ratio '{0}', choose one of: {list}", list = ratio_names().join(", "))]
    InvalidRatio(String),

    #[error("Option {0} needs a value")]
    MissingValue(String),

    #[error("Unknown option {0}, type 'help' for usage")]
    UnknownOption(String),

    #[error("Missing prompt: use -p \"text\", -f <file> or type the prompt directly")]
    MissingPrompt,

    #[error("-p and -f cannot be used together (nor with a bare prompt)")]
    Conflict,

    #[error("Unclosed quote")]
    UnclosedQuote,

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveCommand {
    Empty,
    Quit,
    Help,
    Status,
    Generate(GenerateArgs),
    Error(InteractiveError),
}

/// Split a line into words, honouring single and double quotes
fn split_words(line: &str) -> Result<Vec<String>, InteractiveError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err(InteractiveError::UnclosedQuote);
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Name of the offending option in a clap error, e.g. `--unknown`
fn error_arg(err: &clap::Error) -> String {
    use clap::error::{ContextKind, ContextValue};

    match err.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(arg)) => arg
            .split_whitespace()
            .next()
            .unwrap_or(arg.as_str())
            .to_string(),
        _ => "option".to_string(),
    }
}

fn first_line(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string()
}

fn map_clap_error(err: clap::Error) -> InteractiveError {
    match err.kind() {
        ErrorKind::UnknownArgument => InteractiveError::UnknownOption(error_arg(&err)),
        ErrorKind::ArgumentConflict => InteractiveError::Conflict,
        ErrorKind::InvalidValue | ErrorKind::TooFewValues | ErrorKind::NoEquals => {
            InteractiveError::MissingValue(error_arg(&err))
        }
        _ => InteractiveError::Invalid(first_line(&err)),
    }
}

fn parse_generate(words: Vec<String>) -> Result<GenerateArgs, InteractiveError> {
    let args = LineArgs::try_parse_from(words).map_err(map_clap_error)?;

    if ratio_dimensions(&args.ratio).is_none() {
        return Err(InteractiveError::InvalidRatio(args.ratio));
    }

    let prompt = match (args.prompt, args.words.is_empty()) {
        (Some(prompt), _) => Some(prompt),
        (None, false) => Some(args.words.join(" ")),
        (None, true) => None,
    };

    if prompt.as_deref().map_or(true, |p| p.trim().is_empty()) && args.prompts_file.is_none() {
        return Err(InteractiveError::MissingPrompt);
    }

    Ok(GenerateArgs {
        prompt,
        prompts_file: args.prompts_file,
        ratio: args.ratio,
        resolution: args.resolution,
        count: args.count,
        seed: args.seed,
        force_mps: args.force_mps,
    })
}

/// Interpret one line typed in the session
pub fn parse_interactive_input(line: &str) -> InteractiveCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return InteractiveCommand::Empty;
    }

    match trimmed.to_lowercase().as_str() {
        "quit" | "exit" => return InteractiveCommand::Quit,
        "help" => return InteractiveCommand::Help,
        "status" => return InteractiveCommand::Status,
        _ => {}
    }

    let parsed = split_words(trimmed).and_then(parse_generate);
    match parsed {
        Ok(args) => InteractiveCommand::Generate(args),
        Err(e) => InteractiveCommand::Error(e),
    }
}

pub fn interactive_help() -> String {
    format!(
        "\
Commands:
  help                  Show this help
  status                Show device, model and session info
  quit, exit            Leave the session (Ctrl+D works too)

Generate by typing a prompt, or use options:
  -p, --prompt TEXT     Prompt text (quote it if it has spaces)
  -f, --prompts-file F  Read prompts from a .json or .txt file
  -r, --ratio RATIO     Aspect ratio: {} (default {})
  --resolution WxH      Explicit size, overrides --ratio
  -n, --count N         Images per prompt (default 1)
  -s, --seed SEED       Seed, incremented for each image
  --force-mps           Allow resolutions above the MPS limit

Examples:
  a cat floating in space
  -p \"mountain landscape at dawn\" -r 16:9
  -p \"portrait photo\" --resolution 768x1344 -s 42
  -f input/prompts/prompts.json -n 2

Press Ctrl+C during generation to stop after the current image.",
        ratio_names().join(", "),
        DEFAULT_RATIO
    )
}

struct SessionStats {
    images: usize,
}

fn print_status(generator: &Generator, stats: &SessionStats) {
    println!("Model:      {}", generator.model_name());
    println!("Device:     {}", generator.device());
    println!("Output dir: {}", generator.output_dir().display());
    println!("Generated:  {} image(s) this session", stats.images);
}

async fn run_generate(
    generator: &Generator,
    args: GenerateArgs,
    force_mps: bool,
    interrupt: &InterruptFlag,
) -> Result<usize> {
    let (width, height) = target_resolution(Some(&args.ratio), args.resolution.as_deref())?;
    check_pixel_limit(generator.device(), width, height, force_mps || args.force_mps)?;

    let prompts = match (&args.prompt, &args.prompts_file) {
        (_, Some(file)) => load_prompts(file)?,
        (Some(prompt), None) => vec![prompt.clone()],
        (None, None) => Vec::new(),
    };
    if prompts.is_empty() {
        println!("No prompts to generate");
        return Ok(0);
    }

    let job = BatchJob {
        prompts,
        count: args.count,
        seed: args.seed,
        width,
        height,
    };

    interrupt.reset();
    let outcome = generator.run(&job, interrupt).await?;
    outcome.print_summary();
    interrupt.reset();
    Ok(outcome.completed())
}

/// Read lines until `quit`, Ctrl+D or a terminal error
pub async fn execute(generator: Generator, force_mps: bool, interrupt: InterruptFlag) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut stats = SessionStats { images: 0 };

    println!("\nInteractive mode. Type 'help' for usage, 'quit' to exit.");

    loop {
        let line = tokio::task::block_in_place(|| editor.readline(PROMPT));
        let line = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("Type 'quit' or press Ctrl+D to exit");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }

        match parse_interactive_input(&line) {
            InteractiveCommand::Empty => {}
            InteractiveCommand::Quit => break,
            InteractiveCommand::Help => println!("{}", interactive_help()),
            InteractiveCommand::Status => print_status(&generator, &stats),
            InteractiveCommand::Error(e) => println!("Error: {}", e),
            InteractiveCommand::Generate(args) => {
                match run_generate(&generator, args, force_mps, &interrupt).await {
                    Ok(count) => stats.images += count,
                    Err(e) => println!("Error: {:#}", e),
                }
            }
        }
    }

    println!("Bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(line: &str) -> GenerateArgs {
        match parse_interactive_input(line) {
            InteractiveCommand::Generate(args) => args,
            other => panic!("expected generate for {:?}, got {:?}", line, other),
        }
    }

    fn error(line: &str) -> InteractiveError {
        match parse_interactive_input(line) {
            InteractiveCommand::Error(e) => e,
            other => panic!("expected error for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_interactive_input(""), InteractiveCommand::Empty);
        assert_eq!(parse_interactive_input("   "), InteractiveCommand::Empty);
    }

    #[test]
    fn test_session_commands() {
        for line in ["quit", "QUIT", "exit", "EXIT"] {
            assert_eq!(parse_interactive_input(line), InteractiveCommand::Quit);
        }
        assert_eq!(parse_interactive_input("help"), InteractiveCommand::Help);
        assert_eq!(parse_interactive_input("HELP"), InteractiveCommand::Help);
        assert_eq!(parse_interactive_input("status"), InteractiveCommand::Status);
        assert_eq!(parse_interactive_input(" Status "), InteractiveCommand::Status);
    }

    #[test]
    fn test_bare_prompt_uses_defaults() {
        let args = generate("一只猫在太空中");
        assert_eq!(args.prompt.as_deref(), Some("一只猫在太空中"));
        assert_eq!(args.ratio, "1:1");
        assert_eq!(args.count, 1);
        assert_eq!(args.seed, None);
        assert!(!args.force_mps);
    }

    #[test]
    fn test_quoted_and_unquoted_prompts() {
        assert_eq!(generate("\"a cat in space\"").prompt.as_deref(), Some("a cat in space"));
        assert_eq!(generate("a cat in space").prompt.as_deref(), Some("a cat in space"));
        assert_eq!(generate("-p '山水风景'").prompt.as_deref(), Some("山水风景"));
    }

    #[test]
    fn test_all_options() {
        let args = generate("-p \"风景画\" -r 16:9 -n 2 -s 123");
        assert_eq!(args.prompt.as_deref(), Some("风景画"));
        assert_eq!(args.ratio, "16:9");
        assert_eq!(args.count, 2);
        assert_eq!(args.seed, Some(123));

        let args = generate("-p \"test\" --resolution 1920x1080 --force-mps");
        assert_eq!(args.resolution.as_deref(), Some("1920x1080"));
        assert!(args.force_mps);
    }

    #[test]
    fn test_prompts_file() {
        let args = generate("-f prompts.txt -r 16:9 -n 2");
        assert_eq!(args.prompts_file, Some(PathBuf::from("prompts.txt")));
        assert_eq!(args.prompt, None);
        assert_eq!(args.ratio, "16:9");
        assert_eq!(args.count, 2);

        let args = generate("--prompts-file input/prompts.json");
        assert_eq!(args.prompts_file, Some(PathBuf::from("input/prompts.json")));
    }

    #[test]
    fn test_invalid_ratio() {
        assert_eq!(
            error("-p \"test\" -r invalid"),
            InteractiveError::InvalidRatio("invalid".to_string())
        );
        assert!(InteractiveError::InvalidRatio("invalid".to_string())
            .to_string()
            .starts_with("Invalid aspect ratio 'invalid', choose one of: 1:1, 16:9"));
    }

    #[test]
    fn test_missing_values() {
        assert!(matches!(error("-p"), InteractiveError::MissingValue(_)));
        assert!(matches!(error("-f"), InteractiveError::MissingValue(_)));
    }

    #[test]
    fn test_missing_prompt() {
        assert_eq!(error("-r 16:9"), InteractiveError::MissingPrompt);
    }

    #[test]
    fn test_unknown_option() {
        match error("-p test --unknown value") {
            InteractiveError::UnknownOption(arg) => assert_eq!(arg, "--unknown"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_prompt_and_file_conflict() {
        assert_eq!(error("-p \"test\" -f prompts.json"), InteractiveError::Conflict);
        assert!(InteractiveError::Conflict.to_string().contains("-p and -f"));
    }

    #[test]
    fn test_unclosed_quote() {
        assert_eq!(error("-p \"a cat"), InteractiveError::UnclosedQuote);
    }

    #[test]
    fn test_invalid_count() {
        assert!(matches!(error("-p test -n 0"), InteractiveError::Invalid(_)));
        assert!(matches!(error("-p test -s abc"), InteractiveError::Invalid(_)));
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("-p \"a b\"  -r 16:9").unwrap(),
            vec!["-p", "a b", "-r", "16:9"]
        );
        assert_eq!(split_words("-p \"\"").unwrap(), vec!["-p", ""]);
    }

    #[test]
    fn test_help_text() {
        let help = interactive_help();
        for needle in ["help", "quit", "exit", "status", "-p", "-f", "-r", "-n", "-s", "--force-mps", "Examples"] {
            assert!(help.contains(needle), "help is missing {}", needle);
        }
    }
}
