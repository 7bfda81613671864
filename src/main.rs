use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use fpmerge::config::{DEFAULT_CONFIG_FILE, EngineConfig};
use fpmerge::format::{OutputFormat, Preview, Render, RuleCheck, to_json};
use fpmerge::model::finding::{Finding, parse_findings};
use fpmerge::pipeline::{self, PassError};
use fpmerge::rules::RuleSet;
use fpmerge::store::{FsStore, RegistryStore};
use fpmerge::telemetry;

/// Fingerprint classification and non-regression merge engine
///
/// Validates Zigbee fingerprint findings, classifies each into a driver
/// category, and merges them into a per-category registry. A merge never
/// reduces coverage: if any category would lose a manufacturer or model
/// identity, the whole pass is aborted and nothing is written.
///
/// WORKFLOW:
///
///   1. Check a batch:      fpmerge validate --input findings.json --strict
///   2. Preview placement:  fpmerge classify --input findings.json --registry-dir drivers
///   3. Dry run:            fpmerge merge --input findings.json --registry-dir drivers --dry-run
///   4. Commit:             fpmerge merge --input findings.json --registry-dir drivers
///
/// Set FPMERGE_LOG=debug (or pass -v) to see every decision on stderr.
#[derive(Parser)]
#[command(name = "fpmerge")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(
    after_help = "See 'fpmerge <command> --help' for more information on a specific command."
)]
struct Cli {
    /// Engine configuration file [default: ./fpmerge.toml if present]
    #[arg(long, global = true, env = "FPMERGE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Rule set file [default: `rules.path` from config, else built-in rules]
    #[arg(long, global = true, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Log debug events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a batch of findings
    ///
    /// Exits 1 in strict mode if any finding has a critical error.
    Validate(ValidateArgs),

    /// Validate, classify and merge findings into a registry
    ///
    /// Exits 1, with the registry untouched, if any category count would
    /// decrease or the registry cannot be read or written.
    Merge(MergeArgs),

    /// Show where each finding would be classified, without merging
    Classify(ClassifyArgs),

    /// Inspect rule sets
    #[command(subcommand)]
    Rules(RulesCommands),
}

#[derive(Args)]
struct OutputArgs {
    /// Also write the JSON report to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Output format for stdout: json or text
    #[arg(long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Args)]
struct ValidateArgs {
    /// Findings file (JSON array, or an object with a `findings` array)
    #[arg(long, short, value_name = "PATH")]
    input: PathBuf,

    /// Fail if any finding has a critical error
    #[arg(long)]
    strict: bool,

    /// Write the findings that passed to this path
    #[arg(long, value_name = "PATH")]
    accepted: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct MergeArgs {
    /// Findings file (JSON array, or an object with a `findings` array)
    #[arg(long, short, value_name = "PATH")]
    input: PathBuf,

    /// Registry root: one directory per category [default: `registry.dir`]
    #[arg(long, value_name = "PATH")]
    registry_dir: Option<PathBuf>,

    /// Compute and report the merge without writing anything
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct ClassifyArgs {
    /// Findings file (JSON array, or an object with a `findings` array)
    #[arg(long, short, value_name = "PATH")]
    input: PathBuf,

    /// Registry root: one directory per category [default: `registry.dir`]
    #[arg(long, value_name = "PATH")]
    registry_dir: Option<PathBuf>,

    /// Output format for stdout: json or text
    #[arg(long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum RulesCommands {
    /// Load a rule set and report problems
    ///
    /// Hard errors (bad regex, an identity both corrected into and excluded
    /// from a category) fail with exit 1. Other problems are listed as
    /// warnings.
    Check {
        /// Output format for stdout: json or text
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let rules = load_rules(cli.rules.as_deref(), &config)?;

    match cli.command {
        Commands::Validate(args) => validate(&args, &config, &rules),
        Commands::Merge(args) => merge(&args, &config, &rules),
        Commands::Classify(args) => classify(&args, &config, &rules),
        Commands::Rules(RulesCommands::Check { format }) => rules_check(&rules, format),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn validate(args: &ValidateArgs, config: &EngineConfig, rules: &RuleSet) -> Result<ExitCode> {
    let findings = read_findings(&args.input)?;
    let pass = pipeline::validate_findings(&findings, &config.validation, rules, args.strict)?;

    if let Some(path) = &args.accepted {
        let accepted = pass.accepted(&findings);
        fs::write(path, to_json(&accepted)?)
            .with_context(|| format!("Failed to write accepted findings to {}", path.display()))?;
    }
    emit(&pass.report, &args.output)?;

    Ok(if pass.report.passes() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn merge(args: &MergeArgs, config: &EngineConfig, rules: &RuleSet) -> Result<ExitCode> {
    let findings = read_findings(&args.input)?;
    let mut store = open_store(args.registry_dir.as_deref(), config)?;

    match pipeline::run_pass(
        &mut store,
        &findings,
        &config.validation,
        rules,
        args.dry_run,
    ) {
        Ok(report) => {
            emit(&report, &args.output)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ (PassError::Merge(_) | PassError::Commit { .. })) => {
            if let Some(report) = e.report() {
                emit(report, &args.output)?;
            }
            eprintln!("error: {e}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("Merge pass failed"),
    }
}

fn classify(args: &ClassifyArgs, config: &EngineConfig, rules: &RuleSet) -> Result<ExitCode> {
    let findings = read_findings(&args.input)?;
    let store = open_store(args.registry_dir.as_deref(), config)?;
    let registry = store
        .load_registry()
        .with_context(|| format!("Failed to load registry at {}", store.root().display()))?;
    let rows = pipeline::preview(&findings, &registry, &config.validation, rules)?;
    print!("{}", Preview(rows).render(args.format)?);
    Ok(ExitCode::SUCCESS)
}

fn rules_check(rules: &RuleSet, format: OutputFormat) -> Result<ExitCode> {
    let check = RuleCheck {
        summary: rules.summary(),
        problems: rules.check(),
    };
    print!("{}", check.render(format)?);
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    match explicit {
        Some(path) => {
            if !path.is_file() {
                bail!("Config file {} does not exist", path.display());
            }
            Ok(EngineConfig::load(path)?)
        }
        None => Ok(EngineConfig::load(Path::new(DEFAULT_CONFIG_FILE))?),
    }
}

fn load_rules(explicit: Option<&Path>, config: &EngineConfig) -> Result<RuleSet> {
    let path = explicit.or(config.rules.path.as_deref());
    let rules = RuleSet::load_or_builtin(path).context("Failed to load rule set")?;
    tracing::debug!(version = rules.version(), "rules loaded");
    Ok(rules)
}

fn read_findings(path: &Path) -> Result<Vec<Finding>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read findings from {}", path.display()))?;
    parse_findings(&text).with_context(|| format!("Invalid findings file {}", path.display()))
}

fn open_store(registry_dir: Option<&Path>, config: &EngineConfig) -> Result<FsStore> {
    let Some(root) = registry_dir.or(config.registry.dir.as_deref()) else {
        bail!("No registry directory\n  To fix: pass --registry-dir or set registry.dir in fpmerge.toml");
    };
    FsStore::open(root, &config.registry.document)
        .with_context(|| format!("Failed to open registry at {}", root.display()))
}

fn emit<T: Render>(value: &T, output: &OutputArgs) -> Result<()> {
    if let Some(path) = &output.report {
        fs::write(path, to_json(value)?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }
    print!("{}", value.render(output.format)?);
    Ok(())
}
