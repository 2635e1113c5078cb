mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Confirm, Input};
use std::path::PathBuf;
use std::time::Duration;
use zimage_core::prompts::{
    default_template, load_existing_prompts, load_instruction, load_template, save_prompts,
    DEFAULT_INSTRUCTION,
};
use zimage_core::template::{Template, ALTERNATIVES_SEPARATOR};
use zimage_core::{Config, InterruptFlag};
use zimage_runtime_llm::{OpenAiCompatible, PromptEnhancer, RetryPolicy};

use pipeline::{append_records, generate_records, plan_templates, print_preview, VariationPlan, DEFAULT_VARIATIONS};

/// Pause between consecutive LLM requests
const REQUEST_PAUSE: Duration = Duration::from_secs(1);

const EXAMPLES: &str = "\
Examples:
  generate-prompts                          # Ask whether to generate variations
  generate-prompts -n 5                     # Template plus 4 random variations
  generate-prompts -t custom.json           # Use a custom template
  generate-prompts -o output/prompts.json   # Custom output file
  generate-prompts -i instruction.txt -y    # Custom instruction, no questions";

#[derive(Parser, Debug)]
#[command(name = "generate-prompts")]
#[command(author, version, about = "Generate detailed image prompts from templates using an LLM", long_about = None)]
#[command(after_help = EXAMPLES)]
struct Cli {
    /// Template file (default: output.template_file from config, else built-in)
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Output file; new prompts are appended (default: output.prompts_file from config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of variations to generate (0 asks interactively)
    #[arg(short, long, default_value_t = 0)]
    num_variations: usize,

    /// Skip questions and process the template once
    #[arg(short = 'y', long)]
    yes: bool,

    /// Instruction file containing {template_description}
    #[arg(short, long)]
    instruction: Option<PathBuf>,
}

fn ask_variations() -> Result<VariationPlan> {
    let wanted = Confirm::new()
        .with_prompt("Generate variations of the template?")
        .default(false)
        .interact()?;
    if !wanted {
        return Ok(VariationPlan::Single);
    }

    let count: usize = Input::new()
        .with_prompt("How many variations to generate?")
        .default(DEFAULT_VARIATIONS)
        .interact_text()?;
    Ok(VariationPlan::Variations(count))
}

fn resolve_template(cli: &Cli, config: &Config) -> Result<Template> {
    let template = match cli.template.as_ref().or(config.output.template_file.as_ref()) {
        Some(path) => load_template(path)?,
        None => default_template()?,
    };
    Ok(template)
}

fn resolve_instruction(cli: &Cli, config: &Config) -> Result<String> {
    let instruction = match cli.instruction.as_ref().or(config.output.instruction_file.as_ref()) {
        Some(path) => load_instruction(path)?,
        None => DEFAULT_INSTRUCTION.to_string(),
    };
    Ok(instruction)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    // Provider errors are fatal before any work is done
    let provider = config.llm.active_provider()?;
    let backend = OpenAiCompatible::new(
        &provider,
        Duration::from_secs(config.llm.request_timeout_secs),
    )?;
    let enhancer = PromptEnhancer::new(
        Box::new(backend),
        resolve_instruction(&cli, &config)?,
        RetryPolicy::from_config(&config.llm),
    );
    println!(
        "Using {} provider with model: {}",
        enhancer.backend_name(),
        enhancer.model()
    );

    println!(
        "Random selection: separate options with '{}', e.g. \"ethnicity\": \"English {} Russian\"",
        ALTERNATIVES_SEPARATOR, ALTERNATIVES_SEPARATOR
    );

    let template = resolve_template(&cli, &config)?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| config.output.prompts_file.clone());
    // An unreadable prompts file stops the run before any LLM work
    let existing = load_existing_prompts(&output)?;

    let plan = match VariationPlan::from_flags(cli.num_variations, cli.yes) {
        VariationPlan::Ask => ask_variations()?,
        plan => plan,
    };

    let mut rng = rand::thread_rng();
    let templates = plan_templates(&template, plan, &mut rng);
    if let VariationPlan::Variations(_) = plan {
        println!("Generated {} template variations", templates.len());
        print_preview(&templates, &mut rng);
    }

    let interrupt = InterruptFlag::install();
    let outcome = generate_records(&enhancer, &templates, REQUEST_PAUSE, &interrupt, &mut rng).await;

    if outcome.interrupted {
        println!("\nInterrupted by user, saving the prompts generated so far.");
    }
    if outcome.fallbacks > 0 {
        println!(
            "{} prompt(s) used the fallback template because {} was unreachable",
            outcome.fallbacks,
            enhancer.backend_name()
        );
    }

    let new_count = outcome.records.len();
    let all = append_records(existing, &outcome.records);
    if new_count > 0 {
        save_prompts(&output, &all)
            .with_context(|| format!("Failed to save prompts to {}", output.display()))?;
    }

    println!("\nGenerated {} new prompt(s)", new_count);
    println!("Total prompts in {}: {}", output.display(), all.len());
    Ok(())
}
