//! Halldyll CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll-stacks command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use halldyll_deploy_stacks::cli::{
    Cli, Commands, HotswapArg, MethodArg, OutputFormatter, ProgressArg, parse_parameters,
};
use halldyll_deploy_stacks::cloud::{ApiClient, HttpControlPlane, HttpHotswapServices};
use halldyll_deploy_stacks::config::{
    ConfigParser, ConfigValidator, MethodConfig, StackFile, find_stack_file,
};
use halldyll_deploy_stacks::deployer::{
    DEFAULT_CHANGE_SET_NAME, DeployStackOptions, DeploymentMethod, DeploymentResult,
    DestroyStackOptions, HotswapMode, StackDeployer,
};
use halldyll_deploy_stacks::error::Result;
use halldyll_deploy_stacks::monitor::ProgressStyle;
use halldyll_deploy_stacks::report::TracingReporter;
use halldyll_deploy_stacks::stack::StackArtifact;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Flags of the deploy command.
struct DeployFlags {
    method: Option<MethodArg>,
    change_set_name: Option<String>,
    no_execute: bool,
    force: bool,
    hotswap: Option<HotswapArg>,
    no_rollback: bool,
    previous_parameters: bool,
    parameters: Vec<String>,
    progress: Option<ProgressArg>,
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config = cli.config.as_ref();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config, warnings, formatter),
        Commands::Diff => cmd_diff(config, formatter).await,
        Commands::Deploy {
            method,
            change_set_name,
            no_execute,
            force,
            hotswap,
            no_rollback,
            previous_parameters,
            parameters,
            progress,
        } => {
            let flags = DeployFlags {
                method,
                change_set_name,
                no_execute,
                force,
                hotswap,
                no_rollback,
                previous_parameters,
                parameters,
                progress,
            };
            cmd_deploy(config, flags, verbose, formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config, yes, verbose, formatter).await,
    }
}

/// Validate the stack file and its templates.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (parser, file) = load_stack_file(config_path)?;
    let validator = ConfigValidator::new();

    let mut result = validator.check(&file);
    if result.is_valid() {
        let artifact = parser.load_artifact(&file)?;
        result.merge(validator.check_artifact(&artifact));
    }

    println!("{}", formatter.format_validation(&result, show_warnings));
    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show which changes could be hotswapped.
async fn cmd_diff(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (file, artifact) = load_validated(config_path)?;
    let deployer = create_deployer(&file)?;

    let mut options = DeployStackOptions::new(artifact);
    options.parameters = file.stack.parameters.clone();

    let classification = deployer.classify(&options).await?;
    println!("{}", formatter.format_classification(&classification));
    Ok(ExitCode::SUCCESS)
}

/// Deploy the stack.
async fn cmd_deploy(
    config_path: Option<&PathBuf>,
    flags: DeployFlags,
    verbose: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (file, artifact) = load_validated(config_path)?;
    let deployer = create_deployer(&file)?;
    let options = deploy_options(&file, artifact, flags, verbose)?;

    if options.hotswap != HotswapMode::FullDeployment {
        eprintln!(
            "{}",
            formatter.warning(
                "The --hotswap flag deliberately introduces drift in the stack. Use it for development only."
            )
        );
    }

    let result = deployer.deploy(&options).await?;
    println!("{}", formatter.format_result(options.stack_name(), &result));

    Ok(match result {
        DeploymentResult::Deployed { .. } => ExitCode::SUCCESS,
        DeploymentResult::NeedsRollbackFirst { .. }
        | DeploymentResult::ReplacementRequiresRollback => ExitCode::FAILURE,
    })
}

/// Merges the stack file's deployment settings with command line flags.
fn deploy_options(
    file: &StackFile,
    artifact: StackArtifact,
    flags: DeployFlags,
    verbose: bool,
) -> Result<DeployStackOptions> {
    let settings = &file.deploy;

    let method = flags.method.map_or(settings.method, MethodConfig::from);
    let deployment_method = match method {
        MethodConfig::ChangeSet => DeploymentMethod::ChangeSet {
            name: flags
                .change_set_name
                .or_else(|| settings.change_set_name.clone())
                .unwrap_or_else(|| DEFAULT_CHANGE_SET_NAME.to_string()),
            execute: !flags.no_execute,
            import_existing_resources: false,
        },
        MethodConfig::Direct => DeploymentMethod::Direct,
    };

    let progress = flags
        .progress
        .map(ProgressStyle::from)
        .or(settings.progress)
        .unwrap_or_else(|| ProgressStyle::detect(verbose));

    let mut options = DeployStackOptions::new(artifact)
        .with_method(deployment_method)
        .with_previous_parameters(flags.previous_parameters)
        .with_force(flags.force)
        .with_hotswap(flags.hotswap.map_or(settings.hotswap, HotswapMode::from))
        .with_rollback(settings.rollback && !flags.no_rollback)
        .with_progress(progress);

    if let Some(role_arn) = &file.stack.role_arn {
        options = options.with_role_arn(role_arn.clone());
    }
    if let Some(capabilities) = &settings.capabilities {
        options.capabilities.clone_from(capabilities);
    }
    options.parameters = file.stack.parameters.clone();
    for (key, value) in parse_parameters(&flags.parameters)? {
        options = options.with_parameter(key, value);
    }

    debug!(
        "Deploying with method {:?}, hotswap {}",
        options.deployment_method, options.hotswap
    );
    Ok(options)
}

/// Delete the stack.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    verbose: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_, file) = load_stack_file(config_path)?;
    ConfigValidator::new().validate(&file)?;
    let stack_name = file.stack.name.clone();

    // Confirm
    if !auto_approve {
        eprint!("Stack {stack_name} will be deleted. Type the stack name to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != stack_name {
            eprintln!("Destruction cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let deployer = create_deployer(&file)?;
    let progress = file
        .deploy
        .progress
        .unwrap_or_else(|| ProgressStyle::detect(verbose));
    let mut options = DestroyStackOptions::new(stack_name.clone()).with_progress(progress);
    if let Some(role_arn) = &file.stack.role_arn {
        options = options.with_role_arn(role_arn.clone());
    }

    deployer.destroy(&options).await?;
    println!("{}", formatter.success(&format!("{stack_name}: destroyed")));
    Ok(ExitCode::SUCCESS)
}

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_stack_file("."), |p| Ok(p.clone()))
}

/// Loads `.env` and the stack file with its environment overrides.
fn load_stack_file(config_path: Option<&PathBuf>) -> Result<(ConfigParser, StackFile)> {
    let config_file = resolve_config_path(config_path)?;
    info!("Using stack file: {}", config_file.display());

    let parser =
        ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;

    let file = parser.load_with_env(&config_file)?;
    Ok((parser, file))
}

/// Loads and validates the stack file and its templates.
fn load_validated(config_path: Option<&PathBuf>) -> Result<(StackFile, StackArtifact)> {
    let (parser, file) = load_stack_file(config_path)?;
    let validator = ConfigValidator::new();
    validator.validate(&file)?;

    let artifact = parser.load_artifact(&file)?;
    validator.validate_artifact(&artifact)?;
    Ok((file, artifact))
}

/// Builds a deployer talking to the configured control plane.
fn create_deployer(file: &StackFile) -> Result<StackDeployer> {
    let endpoint = ConfigParser::endpoint(file)?;
    let token = ConfigParser::api_token()?;
    let api = ApiClient::with_timeout(&endpoint, &token, file.control_plane.timeout_secs)?;

    Ok(StackDeployer::new(
        Arc::new(HttpControlPlane::new(api.clone())),
        Arc::new(HttpHotswapServices::new(api)),
        Arc::new(TracingReporter),
    )
    .with_poll_interval(Duration::from_secs(file.control_plane.poll_interval_secs)))
}
