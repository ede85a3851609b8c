use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use bd_workflow::config::Config;
use bd_workflow::state::{AgentType, WorkflowStatus, WorkflowType};

mod commands;

use commands::migrate::Store;
use commands::workflow::StartArgs;
use commands::{Context, OutputFormat};

#[derive(Parser)]
#[command(name = "bd-workflow")]
#[command(about = "Coordinate multi-step agent workflows for tracked issues")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/bd-workflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Coordination store to use instead of the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a workflow without running it
    Start(StartArgs),

    /// Create a workflow and run it to completion, printing step progress
    Execute {
        #[command(flatten)]
        start: StartArgs,

        /// Agent instance id (default: generated)
        #[arg(long)]
        agent_id: Option<String>,
    },

    /// Show a workflow and its results
    Status {
        workflow_id: String,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// List workflows, newest first
    List {
        /// Filter by status: active, completed, failed, cancelled, paused
        #[arg(long)]
        status: Option<WorkflowStatus>,

        /// Filter by workflow type
        #[arg(long = "type")]
        workflow_type: Option<WorkflowType>,

        /// Filter by agent type
        #[arg(long)]
        agent_type: Option<AgentType>,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Cancel an active or paused workflow
    Cancel {
        workflow_id: String,

        #[arg(long, default_value = "User request")]
        reason: String,
    },

    /// Pause an active workflow
    Pause { workflow_id: String },

    /// Resume a paused workflow
    Resume { workflow_id: String },

    /// Show the results stored for a workflow
    Results {
        workflow_id: String,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Workflow templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Agent registration and recovery
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Schema migrations
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },

    /// Performance and workload reports
    Analytics {
        #[command(subcommand)]
        command: AnalyticsCommands,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// List available templates
    List {
        /// Only templates for this workflow type
        #[arg(long = "type")]
        workflow_type: Option<WorkflowType>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one template in detail
    Show {
        template_id: String,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Register an agent instance, or reactivate it
    Register {
        agent_id: String,

        #[arg(long = "type")]
        agent_type: AgentType,

        /// Concurrent assignments allowed (default from config)
        #[arg(long)]
        max_workload: Option<i64>,

        /// Capability names, comma-separated
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },

    /// Mark an agent instance inactive
    Unregister { agent_type: AgentType, agent_id: String },

    /// Show one agent instance
    Status {
        agent_type: AgentType,
        agent_id: String,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Record a heartbeat for an agent instance
    Heartbeat { agent_type: AgentType, agent_id: String },

    /// List registered agents
    List {
        #[arg(long = "type")]
        agent_type: Option<AgentType>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Fail steps left running by a crashed process and release their workload
    Recover,

    /// Pick the best agent of a type for new work
    Select {
        #[arg(long = "type")]
        agent_type: AgentType,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Pick the agent a workflow should be handed to
    PlanHandoff {
        workflow_id: String,

        /// Agent currently holding the workflow
        #[arg(long = "from")]
        from_agent_id: String,

        /// Agent type to hand to
        #[arg(long = "to-type")]
        to_agent_type: AgentType,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Suggest moving work off overloaded agents
    Rebalance {
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply pending migrations
    Run {
        #[arg(long, value_enum, default_value = "all")]
        store: Store,
    },

    /// Show applied, pending, and failed migrations
    Status {
        #[arg(long, value_enum, default_value = "coordination")]
        store: Store,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Create a new, empty migration file in the migrations directory
    Create { name: String },

    /// Clear a failed migration so the next run attempts it again
    Retry {
        version: String,

        #[arg(long, value_enum, default_value = "coordination")]
        store: Store,
    },
}

#[derive(Subcommand)]
enum AnalyticsCommands {
    /// Per agent type performance over a window
    Performance {
        /// Window such as 1d, 7d, 30d, or 12h
        #[arg(long, default_value = "7d")]
        period: String,

        #[arg(long)]
        agent_type: Option<AgentType>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Workflow counts, success rate, and agent workload
    Summary {
        /// Window such as 7d; all history when omitted
        #[arg(long)]
        period: Option<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    // Logs go to stderr; stdout carries command output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> anyhow::Result<u8> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database.coordination_path = db;
    }
    init_logging(&config.logging.level, cli.verbose);
    let ctx = Context::new(config);

    match cli.command {
        Commands::Start(args) => commands::workflow::start(&ctx, args),

        Commands::Execute { start, agent_id } => commands::workflow::execute(&ctx, start, agent_id.as_deref()),

        Commands::Status { workflow_id, format } => commands::workflow::status(&ctx, &workflow_id, format),

        Commands::List {
            status,
            workflow_type,
            agent_type,
            limit,
            format,
        } => commands::workflow::list(&ctx, status, workflow_type, agent_type, limit, format),

        Commands::Cancel { workflow_id, reason } => commands::workflow::cancel(&ctx, &workflow_id, &reason),

        Commands::Pause { workflow_id } => commands::workflow::set_status(&ctx, &workflow_id, WorkflowStatus::Paused),

        Commands::Resume { workflow_id } => commands::workflow::set_status(&ctx, &workflow_id, WorkflowStatus::Active),

        Commands::Results { workflow_id, format } => commands::workflow::results(&ctx, &workflow_id, format),

        Commands::Template { command } => match command {
            TemplateCommands::List { workflow_type, format } => commands::template::list(workflow_type, format),
            TemplateCommands::Show { template_id, format } => commands::template::show(&template_id, format),
        },

        Commands::Agent { command } => match command {
            AgentCommands::Register {
                agent_id,
                agent_type,
                max_workload,
                capabilities,
            } => commands::agent::register(&ctx, agent_type, &agent_id, max_workload, &capabilities),

            AgentCommands::Unregister { agent_type, agent_id } => {
                commands::agent::unregister(&ctx, agent_type, &agent_id)
            }

            AgentCommands::Status {
                agent_type,
                agent_id,
                format,
            } => commands::agent::status(&ctx, agent_type, &agent_id, format),

            AgentCommands::Heartbeat { agent_type, agent_id } => {
                commands::agent::heartbeat(&ctx, agent_type, &agent_id)
            }

            AgentCommands::List { agent_type, format } => commands::agent::list(&ctx, agent_type, format),

            AgentCommands::Recover => commands::agent::recover(&ctx),

            AgentCommands::Select { agent_type, format } => commands::agent::select(&ctx, agent_type, format),

            AgentCommands::PlanHandoff {
                workflow_id,
                from_agent_id,
                to_agent_type,
                format,
            } => commands::agent::plan_handoff(&ctx, &workflow_id, &from_agent_id, to_agent_type, format),

            AgentCommands::Rebalance { format } => commands::agent::rebalance(&ctx, format),
        },

        Commands::Migrate { command } => match command {
            MigrateCommands::Run { store } => commands::migrate::run(&ctx, store),
            MigrateCommands::Status { store, format } => commands::migrate::status(&ctx, store, format),
            MigrateCommands::Create { name } => commands::migrate::create(&ctx, &name),
            MigrateCommands::Retry { version, store } => commands::migrate::retry(&ctx, &version, store),
        },

        Commands::Analytics { command } => match command {
            AnalyticsCommands::Performance {
                period,
                agent_type,
                format,
            } => commands::analytics::performance(&ctx, &period, agent_type, format),

            AnalyticsCommands::Summary { period, format } => {
                commands::analytics::summary(&ctx, period.as_deref(), format)
            }
        },
    }
}
