use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use decomprag::config::Config;
use decomprag::context::{ContextBuilder, NoHistory};
use decomprag::correlate::DirBuildCorrelator;
use decomprag::db::{Registry, function_id};
use decomprag::embedder::Embedder;
use decomprag::embedder::remote::RemoteEmbedder;
use decomprag::indexer::Indexer;
use decomprag::matcher::RegexSourceMatcher;

#[derive(Parser)]
#[command(name = "decomprag", version, about = "Index a decompilation workspace and retrieve similar functions")]
struct Cli {
    /// Config file path (defaults to ./decomprag.json)
    #[arg(short, long, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full indexing pass over the workspace
    Index,
    /// Print registry statistics
    Stats,
    /// List translated functions most similar to a stored function
    Search {
        /// Function name as it appears in assembly
        name: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the translation context assembled for a function
    Context {
        /// Function name as it appears in assembly
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Command::Index => cmd_index(config).await,
        Command::Stats => cmd_stats(&config),
        Command::Search { name, limit } => cmd_search(&config, &name, limit),
        Command::Context { name } => cmd_context(&config, &name),
    }
}

async fn cmd_index(config: Config) -> Result<()> {
    let mut registry =
        Registry::open(&config.snapshot_path).context("failed to open registry snapshot")?;

    let arch = config.arch()?;
    let embedder = RemoteEmbedder::from_config(&config.embedding)?
        .map(|e| Arc::new(e) as Arc<dyn Embedder>);

    let bar = ProgressBar::hidden();
    let progress_bar = bar.clone();
    let indexer = Indexer::new(
        config.clone(),
        Arc::new(RegexSourceMatcher::new()),
        Arc::new(DirBuildCorrelator::new(config.build_dir.clone(), arch)),
        embedder,
    )?
    .on_progress(Box::new(move |done, total| {
        if progress_bar.length().is_none() {
            progress_bar.set_length(total as u64);
            progress_bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} batch {pos}/{len}")
                    .expect("valid template"),
            );
            progress_bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        }
        progress_bar.set_position(done as u64);
    }));

    let report = indexer.run(&mut registry).await?;
    bar.finish_and_clear();

    println!("Indexing pass complete");
    println!("  source files scanned: {}", report.source_files);
    println!("  matched functions:    {}", report.matched_functions);
    println!("  unmatched functions:  {}", report.unmatched_functions);
    if report.embedding_skipped {
        println!("  embedding:            skipped (no provider configured)");
    } else {
        println!("  embedding batches:    {}", report.embedded_batches);
    }
    print_stats(&report.stats);
    if !report.failures.is_empty() {
        println!("  failures ({}):", report.failures.len());
        for failure in &report.failures {
            println!("    {failure}");
        }
    }
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let registry =
        Registry::open(&config.snapshot_path).context("failed to open registry snapshot")?;
    print_stats(&registry.stats());
    Ok(())
}

fn cmd_search(config: &Config, name: &str, limit: Option<usize>) -> Result<()> {
    let registry =
        Registry::open(&config.snapshot_path).context("failed to open registry snapshot")?;

    let id = function_id(name);
    let Some(query) = registry.vector_of(&id) else {
        bail!("{name} has no stored embedding; run `decomprag index` with a provider configured");
    };

    let limit = limit.unwrap_or(config.search.limit);
    let mut results = registry.search_similar(query, config.search.similarity_threshold, limit + 1);
    results.retain(|m| m.record.id != id);
    results.truncate(limit);

    if results.is_empty() {
        println!("No translated functions above the similarity threshold");
        return Ok(());
    }
    for m in results {
        println!(
            "{:.4}  {}  ({})",
            m.similarity, m.record.name, m.record.assembly_module_path
        );
    }
    Ok(())
}

fn cmd_context(config: &Config, name: &str) -> Result<()> {
    let registry =
        Registry::open(&config.snapshot_path).context("failed to open registry snapshot")?;

    let matcher = RegexSourceMatcher::new();
    let builder = ContextBuilder::new(&registry, &matcher, &NoHistory, config);
    let context = builder.build_for_name(name)?;

    println!("Target: {} ({})", context.target.name, context.target.assembly_module_path);

    if !context.callee_declarations.is_empty() {
        println!("\nCallee declarations:");
        for declaration in &context.callee_declarations {
            println!("  {}", declaration.text);
        }
    }
    if !context.type_definitions.is_empty() {
        println!("\nType definitions:");
        for definition in &context.type_definitions {
            println!("{}", definition.text);
        }
    }
    if !context.caller_examples.is_empty() {
        println!("\nTranslated callers:");
        for example in &context.caller_examples {
            let history = if example.previous_assembly.is_some() {
                " [has historical assembly]"
            } else {
                ""
            };
            println!("  {}{history}", example.record.name);
        }
    }
    if !context.similar_examples.is_empty() {
        println!("\nSimilar translated functions:");
        for m in &context.similar_examples {
            println!("  {:.4}  {}", m.similarity, m.record.name);
        }
    }
    Ok(())
}

fn print_stats(stats: &decomprag::db::RegistryStats) {
    println!("  total functions:      {}", stats.total_functions);
    println!("  translated:           {}", stats.translated);
    println!("  untranslated:         {}", stats.untranslated);
    println!("  embedding vectors:    {}", stats.total_vectors);
}
