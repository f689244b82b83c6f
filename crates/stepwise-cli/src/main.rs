use clap::{ArgAction, Parser};
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use stepwise_agent::mcp::McpServerSpec;
use stepwise_agent::{AgentConfig, AgentError, AgentRole, DEFAULT_MODEL, FileAuditSink, Workflow};
use stepwise_llm::{Client, DEFAULT_OPENAI_BASE_URL, OpenAiCompatibleAdapter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(about = "Decompose a goal into tasks and work them against a local repository")]
struct Cli {
    /// Goal to run. Without one, goals are read from stdin one line at a time.
    goal: Option<String>,
    #[arg(long, env = "STEPWISE_REPO", default_value = ".")]
    repo: PathBuf,
    #[arg(long, env = "STEPWISE_MODEL", default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    base_url: String,
    /// Tool server command line, e.g. "npx some-server --flag". Repeatable.
    #[arg(long = "mcp-server")]
    mcp_servers: Vec<String>,
    #[arg(long)]
    max_iterations: Option<usize>,
    #[arg(long)]
    max_tasks: Option<usize>,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    #[arg(long)]
    command_timeout_secs: Option<u64>,
    /// Append every loop event to this JSON lines file.
    #[arg(long)]
    audit_log: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    enable_context_refine: bool,
    /// Print the worker's tools as a tool server `tools/list` result and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    list_tools: bool,
}

enum CliError {
    Config(String),
    Run(AgentError),
}

impl From<AgentError> for CliError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::InvalidConfiguration(message) => CliError::Config(message),
            other => CliError::Run(other),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Config(message)) => {
            eprintln!("error: {message}");
            ExitCode::from(2)
        }
        Err(CliError::Run(error)) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = build_config(&cli);
    let repo = std::fs::canonicalize(&cli.repo).map_err(|error| {
        CliError::Config(format!("repository '{}': {error}", cli.repo.display()))
    })?;
    if !repo.is_dir() {
        return Err(CliError::Config(format!(
            "repository '{}' is not a directory",
            repo.display()
        )));
    }

    let client = if cli.list_tools {
        Arc::new(Client::default())
    } else {
        let api_key = cli
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CliError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let adapter = OpenAiCompatibleAdapter::new("openai", api_key, &cli.base_url, None)
            .map_err(|error| CliError::Config(error.to_string()))?;
        Arc::new(Client::with_provider(Arc::new(adapter)))
    };

    let mut workflow = Workflow::new(repo, client, config);
    if let Some(path) = &cli.audit_log {
        let sink = FileAuditSink::open(path)?;
        workflow = workflow.with_audit(Arc::new(sink));
    }
    for command_line in &cli.mcp_servers {
        let spec = McpServerSpec::parse(command_line).ok_or_else(|| {
            CliError::Config(format!("empty tool server command '{command_line}'"))
        })?;
        workflow.connect_tool_server(&spec).await?;
    }

    let result = match &cli.goal {
        _ if cli.list_tools => workflow
            .tool_listing(AgentRole::Worker)
            .await
            .map(|listing| println!("{listing:#}")),
        Some(goal) => run_goal(&mut workflow, goal).await.map(|answer| {
            println!("{answer}");
        }),
        None => repl(&mut workflow).await,
    };
    let shutdown = workflow.shutdown().await;
    result?;
    shutdown.map_err(CliError::from)
}

fn build_config(cli: &Cli) -> AgentConfig {
    let mut config = AgentConfig {
        model: cli.model.clone(),
        enable_context_refine: cli.enable_context_refine,
        ..AgentConfig::default()
    };
    if let Some(max_iterations) = cli.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(max_tasks) = cli.max_tasks {
        config.max_tasks = max_tasks;
    }
    if let Some(secs) = cli.request_timeout_secs {
        config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(secs) = cli.command_timeout_secs {
        config.command_timeout = Duration::from_secs(secs);
    }
    config
}

/// Runs one goal; Ctrl-C aborts it instead of killing the process.
async fn run_goal(workflow: &mut Workflow, goal: &str) -> Result<String, AgentError> {
    let abort = workflow.abort_handle();
    let run = workflow.run_goal(goal);
    tokio::pin!(run);
    loop {
        tokio::select! {
            result = &mut run => return result,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupt received, aborting goal");
                abort.request_abort();
            }
        }
    }
}

async fn repl(workflow: &mut Workflow) -> Result<(), AgentError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let goal = line.trim();
        match goal {
            "" => continue,
            "exit" | "quit" => return Ok(()),
            _ => {}
        }
        match run_goal(workflow, goal).await {
            Ok(answer) => println!("{answer}"),
            Err(error) => eprintln!("error: {error}"),
        }
    }
}
