//! Achilles CLI - characterize an OMOP CDM database
//!
//! Usage:
//!   achilles run [--config achilles.toml] [--concurrency N] [--analyses 1,2,3]
//!   achilles render analysis <id> [--dialect <dialect>]
//!   achilles list
//!   achilles names
//!
//! Examples:
//!   achilles run --config achilles.toml
//!   achilles run --generate-only --output-folder out/
//!   achilles render rule 11 --dialect postgres

use achilles::analysis;
use achilles::catalog::{Catalog, RuleKind};
use achilles::config::{ConnectionConfig, Driver, Settings};
use achilles::heel;
use achilles::run::{FailurePolicy, Orchestrator, RunContext, ScratchNaming};
use achilles::session::{
    ScriptSessionFactory, SessionFactory, SqliteSessionFactory, SqliteTarget, WorkerSessionFactory,
};
use achilles::sql::Dialect;
use achilles::worker::WorkerClient;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "achilles")]
#[command(about = "Achilles - descriptive statistics and data quality checks for OMOP CDM databases")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run analyses, merges and heel rules
    Run(RunArgs),

    /// Print the translated SQL of one analysis or rule
    Render {
        kind: TemplateKind,

        id: i64,

        /// SQL dialect to generate (defaults to the configured one)
        #[arg(short, long)]
        dialect: Option<String>,
    },

    /// List the catalog's analyses and rules
    List,

    /// Print the scratch tables a run would create
    Names,
}

#[derive(Args)]
struct RunArgs {
    /// Number of concurrent sessions
    #[arg(long)]
    concurrency: Option<usize>,

    /// Comma-separated analysis ids to run
    #[arg(long, value_delimiter = ',')]
    analyses: Option<Vec<i64>>,

    /// Comma-separated analysis ids to skip
    #[arg(long, value_delimiter = ',')]
    exclude: Option<Vec<i64>>,

    /// Write the SQL script instead of executing it
    #[arg(long)]
    generate_only: bool,

    /// Folder for the generated script
    #[arg(long)]
    output_folder: Option<PathBuf>,

    /// Skip the heel rules
    #[arg(long)]
    no_heel: bool,

    /// Stop queued steps after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Keep scratch tables after the run
    #[arg(long)]
    keep_scratch: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum TemplateKind {
    Analysis,
    Rule,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let catalog = match settings
        .catalog_dir()
        .map_err(|e| e.to_string())
        .and_then(|dir| Catalog::load(&dir).map_err(|e| e.to_string()))
    {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Error loading catalog: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Run(args) => cmd_run(settings, catalog, args).await,
        Commands::Render { kind, id, dialect } => cmd_render(&settings, &catalog, kind, id, dialect),
        Commands::List => cmd_list(&catalog),
        Commands::Names => cmd_names(&settings, &catalog),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("achilles=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn apply_overrides(settings: &mut Settings, args: &RunArgs) {
    let run = &mut settings.run;
    if let Some(n) = args.concurrency {
        run.concurrency = n;
    }
    if let Some(ids) = &args.analyses {
        run.analysis_ids = Some(ids.clone());
    }
    if let Some(ids) = &args.exclude {
        run.exclude_analysis_ids = ids.clone();
    }
    if args.generate_only {
        run.generate_only = true;
    }
    if let Some(folder) = &args.output_folder {
        run.output_folder = folder.to_string_lossy().into_owned();
    }
    if args.no_heel {
        run.run_heel = false;
    }
    if args.fail_fast {
        run.failure_policy = FailurePolicy::FailFast;
    }
    if args.keep_scratch {
        run.drop_scratch_tables = false;
    }
}

async fn cmd_run(mut settings: Settings, catalog: Arc<Catalog>, args: RunArgs) -> ExitCode {
    apply_overrides(&mut settings, &args);
    let options = match settings.validate() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let connection = match settings.connection.resolve() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error in connection settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let script = options
        .generate_only
        .then(|| Arc::new(ScriptSessionFactory::new(options.dialect)));
    let factory: Arc<dyn SessionFactory> = match &script {
        Some(script) => script.clone(),
        None => match connect(&connection).await {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Error connecting: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };

    let output_folder = options.output_folder.clone();
    let orchestrator = match Orchestrator::new(options, catalog, factory) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling after the current steps");
            token.cancel();
        }
    });

    let report = orchestrator.run().await;
    print!("{}", report);

    if let Some(script) = script {
        match script.write_to(&output_folder) {
            Ok(path) => println!("SQL script written to {}", path.display()),
            Err(e) => {
                eprintln!("Error writing script: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn connect(connection: &ConnectionConfig) -> Result<Arc<dyn SessionFactory>, String> {
    match connection.driver {
        Driver::Sqlite => {
            let factory = SqliteSessionFactory::open(
                SqliteTarget::parse(&connection.connection_string),
                connection.attach.clone(),
            )
            .map_err(|e| e.to_string())?;
            Ok(Arc::new(factory))
        }
        _ => {
            let path = WorkerClient::resolve_worker_path(connection.worker_path.as_deref())
                .map_err(|e| e.to_string())?;
            let client = WorkerClient::spawn(&path).await.map_err(|e| e.to_string())?;
            Ok(Arc::new(WorkerSessionFactory::new(
                Arc::new(client),
                connection.driver_name(),
                connection.connection_string.clone(),
                connection.dialect,
            )))
        }
    }
}

fn cmd_render(
    settings: &Settings,
    catalog: &Catalog,
    kind: TemplateKind,
    id: i64,
    dialect: Option<String>,
) -> ExitCode {
    let mut options = match settings.validate() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(name) = dialect {
        match Dialect::parse(&name) {
            Some(d) => options.dialect = d,
            None => {
                eprintln!("Unknown dialect: {}", name);
                return ExitCode::FAILURE;
            }
        }
    }

    let factory = Arc::new(ScriptSessionFactory::new(options.dialect));
    let ctx = RunContext::new(options, factory);
    let result = match kind {
        TemplateKind::Analysis => match catalog.analysis(id) {
            Some(a) => analysis::analysis_statements(
                catalog,
                a,
                ctx.base_params(),
                ctx.naming(),
                ctx.dialect(),
            ),
            None => {
                eprintln!("Analysis {} not found", id);
                return ExitCode::FAILURE;
            }
        },
        TemplateKind::Rule => match catalog.rule(id) {
            Some(r) if r.kind == RuleKind::Dependent => heel::phase_b_statements(
                catalog,
                r,
                ctx.base_params(),
                ctx.naming(),
                ctx.options(),
            ),
            Some(r) => heel::phase_a_statements(
                catalog,
                r,
                ctx.base_params(),
                ctx.naming(),
                ctx.options(),
            ),
            None => {
                eprintln!("Rule {} not found", id);
                return ExitCode::FAILURE;
            }
        },
    };

    match result {
        Ok(statements) => {
            for stmt in statements {
                println!("{};", stmt);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error rendering template: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_list(catalog: &Catalog) -> ExitCode {
    println!("Analyses:");
    for a in catalog.analyses() {
        let mut flags = Vec::new();
        if a.cost {
            flags.push("cost");
        }
        if !a.is_default {
            flags.push("optional");
        }
        if flags.is_empty() {
            println!("  {:>5}  {}", a.id, a.name);
        } else {
            println!("  {:>5}  {} [{}]", a.id, a.name, flags.join(", "));
        }
    }

    if !catalog.rules().is_empty() {
        println!();
        println!("Heel rules:");
        for r in catalog.rules() {
            println!(
                "  {:>5}  {:?} {} ({})",
                r.id,
                r.kind,
                r.name,
                r.severity.label()
            );
        }
    }

    ExitCode::SUCCESS
}

fn cmd_names(settings: &Settings, catalog: &Catalog) -> ExitCode {
    let options = match settings.validate() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let naming = ScratchNaming::new(
        options.storage_mode(),
        options.scratch_schema.clone(),
        options.analysis_prefix.clone(),
        options.heel_prefix.clone(),
    );

    let selected = match analysis::select_analyses(catalog, &options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    for a in selected {
        for kind in analysis::scratch_kinds(a) {
            let handle = naming.handle(kind, a.id);
            println!("{:<40} {}", handle.qualified(), handle.logical_name);
        }
    }
    if options.run_heel {
        for r in catalog.rules() {
            let handle = naming.handle(heel::scratch_kind(r.kind), r.id);
            println!("{:<40} {}", handle.qualified(), handle.logical_name);
        }
    }

    ExitCode::SUCCESS
}
