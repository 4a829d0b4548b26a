//! relay CLI - chat-completion API client.
//!
//! Run `relay --help` for usage information.

use anyhow::Result;
use console::style;
use relay::config::{BatchArgs, ChatArgs, GenerateArgs, ModelsArgs};
use relay::{
    output, Args, BatchConfig, ChatClient, ChatSession, Command, Conversation, Dispatcher,
    GenerateOptions, OllamaClient, RelayError, Settings,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse_args();

    // Setup logging
    setup_logging(&args);

    // Load configuration
    let settings = match Settings::from_args(&args) {
        Ok(s) => s,
        Err(e) => fail(&e),
    };

    let client = match OllamaClient::new(&settings, settings.batch.timeout) {
        Ok(c) => Arc::new(c),
        Err(e) => fail(&e),
    };

    let outcome = match &args.command {
        Command::Models(cmd) => list_models(client, cmd).await,
        Command::Generate(cmd) => generate(client, &settings, cmd).await,
        Command::Chat(cmd) => chat(client, &settings, cmd).await,
        Command::Batch(cmd) => batch(client, &settings, cmd, args.json_logs).await,
    };

    if let Err(e) = outcome {
        fail(&e);
    }

    Ok(())
}

fn fail(e: &RelayError) -> ! {
    error!("{}", e);
    eprintln!("{} {}", style("Error:").red().bold(), e);
    std::process::exit(1);
}

fn setup_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::WARN };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relay={}", level)));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}

async fn list_models(client: Arc<OllamaClient>, cmd: &ModelsArgs) -> relay::Result<()> {
    let models = client.list_models().await?;
    if models.is_empty() {
        return Err(RelayError::Connectivity(
            "server reported no available models".to_string(),
        ));
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    println!(
        "{:<40} {:>10}  {}",
        style("NAME").bold(),
        style("SIZE").bold(),
        style("MODIFIED").bold()
    );
    for model in &models {
        let modified = model
            .modified_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<40} {:>10}  {}", model.name, model.display_size(), modified);
    }
    Ok(())
}

async fn generate(
    client: Arc<OllamaClient>,
    settings: &Settings,
    cmd: &GenerateArgs,
) -> relay::Result<()> {
    let options = GenerateOptions::new(settings.require_model()?)
        .with_system_prompt(cmd.system.clone())
        .with_max_tokens(cmd.max_tokens)
        .with_temperature(cmd.temperature);

    info!(model = %options.model, "Generating completion");
    let completion = client.complete(&cmd.prompt, &options).await?;

    if cmd.full {
        println!("{}", serde_json::to_string_pretty(&completion.raw)?);
    } else {
        println!("{}", completion.response);
    }
    Ok(())
}

async fn chat(client: Arc<OllamaClient>, settings: &Settings, cmd: &ChatArgs) -> relay::Result<()> {
    let model = settings.require_model()?;
    let conversation = match &cmd.conversation {
        Some(path) => Conversation::load_or_new(path, model, cmd.system.clone()).await?,
        None => Conversation::new(model, cmd.system.clone()),
    };

    // A saved conversation keeps its own model and system prompt.
    for setting in conversation.ignored_overrides(model, cmd.system.as_deref()) {
        warn!("Saved conversation overrides the requested {}", setting);
    }

    let options = GenerateOptions::new(conversation.model.clone())
        .with_system_prompt(conversation.system_prompt.clone())
        .with_temperature(cmd.temperature);

    let mut session = ChatSession::new(client, options, conversation, cmd.conversation.clone());
    session
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    if let Some(path) = &cmd.conversation {
        eprintln!(
            "{} Conversation saved to: {}",
            style("✓").green().bold(),
            path.display()
        );
    }
    Ok(())
}

async fn batch(
    client: Arc<OllamaClient>,
    settings: &Settings,
    cmd: &BatchArgs,
    json_logs: bool,
) -> relay::Result<()> {
    let config = BatchConfig::from_args(settings, cmd)?;
    let prompts = cmd.collect_prompts().await?;
    if prompts.is_empty() {
        return Err(RelayError::Configuration(
            "no prompts given (pass them as arguments or with --input)".to_string(),
        ));
    }

    let dispatcher = Dispatcher::new(client, config.with_progress(cmd.progress && !json_logs))?;

    match dispatcher.run(&prompts).await {
        Ok(outcome) => {
            println!("{}", output::render(&outcome.results, cmd.format)?);
            report(&outcome.summary, json_logs);
            Ok(())
        }
        Err(RelayError::BatchAborted {
            index,
            message,
            partial,
        }) => {
            println!("{}", output::render(&partial.results, cmd.format)?);
            report(&partial.summary, json_logs);
            Err(RelayError::BatchAborted {
                index,
                message,
                partial,
            })
        }
        Err(e) => Err(e),
    }
}

fn report(summary: &relay::BatchSummary, json_logs: bool) {
    if json_logs {
        if let Ok(line) = serde_json::to_string(summary) {
            eprintln!("{}", line);
        }
    } else {
        summary.print_summary();
    }
}
