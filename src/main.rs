use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use cognition_dispatch::config::{expand_tilde, Config};
use cognition_dispatch::core::{compile_recommendation_dag, CompileOptions, TaskDag};
use cognition_dispatch::dispatch::{dispatch_artifacts, DispatchPaths, ProtocolTaskRequestBuilder};
use cognition_dispatch::{clog, clog_error, Error, Result, SystemClock};

/// Cognition dispatch - compile recommendations into a task DAG and
/// reconcile it against the approval gate
#[derive(Parser, Debug)]
#[command(name = "cognition-dispatch")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    COGNITION_DEBUG=1     Enable debug logging (alternative to --debug)\n    COGNITION_LOG=<level> Log level: error, warn, info, debug or trace")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.cognition/dispatch.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.cognition/dispatch.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Normalize recommendations and write the compiled task DAG
    Compile {
        /// Recommendations JSON array
        #[arg(long)]
        recommendations: PathBuf,

        /// DAG output path (default: configured task_dag_path)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Drop self/unknown dependencies instead of failing
        #[arg(long)]
        allow_invalid_dependencies: bool,
    },

    /// Validate a task DAG artifact
    Validate {
        #[arg(long)]
        task_dag: Option<PathBuf>,
    },

    /// Reconcile the DAG with the task package, append the journal and write the report
    Dispatch {
        #[arg(long)]
        task_dag: Option<PathBuf>,

        #[arg(long)]
        package: Option<PathBuf>,

        #[arg(long)]
        journal: Option<PathBuf>,

        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    cognition_dispatch::log::init_with_debug(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            clog_error!("command failed: {}", err);
            eprintln!("[cognition-dispatch] failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(&expand_tilde(&path.to_string_lossy()))?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Compile {
            recommendations,
            out,
            allow_invalid_dependencies,
        } => run_compile(&config, &recommendations, out, allow_invalid_dependencies),
        Command::Validate { task_dag } => run_validate(&config, task_dag),
        Command::Dispatch {
            task_dag,
            package,
            journal,
            report,
        } => {
            let paths = DispatchPaths {
                task_dag: or_configured(task_dag, config.task_dag_path())?,
                task_package: or_configured(package, config.task_package_path())?,
                journal: or_configured(journal, config.journal_path())?,
                report: or_configured(report, config.report_path())?,
            };
            run_dispatch(&config, &paths)
        }
    }
}

fn or_configured(flag: Option<PathBuf>, configured: Result<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(path),
        None => configured,
    }
}

fn run_compile(
    config: &Config,
    recommendations: &Path,
    out: Option<PathBuf>,
    allow_invalid_dependencies: bool,
) -> Result<()> {
    let out = or_configured(out, config.task_dag_path())?;
    clog!(
        "Compile command: recommendations={}, out={}",
        recommendations.display(),
        out.display()
    );

    if !recommendations.exists() {
        return Err(Error::ArtifactNotFound(recommendations.to_path_buf()));
    }
    let raw: Value = serde_json::from_str(&fs::read_to_string(recommendations)?)?;

    let options = CompileOptions {
        generated_at: None,
        fail_on_invalid_dependencies: config.fail_on_invalid_dependencies
            && !allow_invalid_dependencies,
    };
    let dag = compile_recommendation_dag(&raw, &options, &SystemClock)?;
    dag.save(&out)?;

    let summary = json!({
        "taskDagPath": out.display().to_string(),
        "summary": dag.summary,
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn run_validate(config: &Config, task_dag: Option<PathBuf>) -> Result<()> {
    let path = or_configured(task_dag, config.task_dag_path())?;
    clog!("Validate command: task_dag={}", path.display());

    let dag = TaskDag::load(&path)?;
    dag.assert_valid()?;
    clog!("DAG valid: tasks={} max_depth={}", dag.tasks.len(), dag.max_depth());
    println!("valid");
    Ok(())
}

fn run_dispatch(config: &Config, paths: &DispatchPaths) -> Result<()> {
    clog!(
        "Dispatch command: task_dag={}, package={}, journal={}, report={}",
        paths.task_dag.display(),
        paths.task_package.display(),
        paths.journal.display(),
        paths.report.display()
    );

    let result = dispatch_artifacts(
        paths,
        config.effective_from_agent(),
        &SystemClock,
        &ProtocolTaskRequestBuilder,
    )?;

    println!(
        "[cognition-dispatch] dispatched={} blocked={} follow_ups={} released={} appended={}",
        result.dispatch_count,
        result.blocked_count,
        result.follow_up_count,
        result.released_count,
        result.appended_entries
    );
    Ok(())
}
