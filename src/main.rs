//! mxcp-deploy CLI 入口
//!
//! Usage:
//! - `mxcp-deploy setup --name demo --region eu-west-1 --type data`
//! - `mxcp-deploy deploy --image-tag abc123`
//! - `mxcp-deploy validate-env --type remote-data --strict`
//! - `mxcp-deploy merge-from-raw`

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use mxcp_deploy::config::ProjectType;
use mxcp_deploy::error::{Error, Result};
use mxcp_deploy::services::{deploy, merge, setup, validate};

#[derive(Parser)]
#[command(name = "mxcp-deploy")]
#[command(version)]
#[command(about = "Deployment toolkit for MXCP server projects on AWS App Runner")]
struct Cli {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root directory
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render *.template files and scaffold the project
    Setup {
        /// Project name (embedded into AWS resource names)
        #[arg(long)]
        name: String,

        /// AWS region
        #[arg(long, default_value = "us-east-1")]
        region: String,

        /// Project type: data, remote-data or api
        #[arg(long = "type", default_value = "data")]
        project_type: ProjectType,

        /// Overwrite existing files without asking
        #[arg(long)]
        force: bool,
    },

    /// Create or update the App Runner service
    Deploy {
        /// Path to config.env (default: deployment/config.env)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Image tag to deploy (overrides IMAGE_TAG)
        #[arg(long)]
        image_tag: Option<String>,

        /// Do not wait for the service to become RUNNING and healthy
        #[arg(long)]
        no_wait: bool,
    },

    /// Check required variables and deployment file consistency
    ValidateEnv {
        /// Project type: data, remote-data or api
        #[arg(long = "type", default_value = "data")]
        project_type: ProjectType,

        /// Treat warnings as failures
        #[arg(long)]
        strict: bool,
    },

    /// Merge template updates from the raw upstream remote
    MergeFromRaw {
        /// Upstream remote name
        #[arg(long, default_value = "raw")]
        remote: String,

        /// Upstream branch
        #[arg(long, default_value = "main")]
        branch: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Setup {
            name,
            region,
            project_type,
            force,
        } => {
            let outcome = setup::run(&setup::SetupOptions {
                name,
                region,
                project_type,
                force,
                root: cli.dir,
            })?;
            info!(
                written = outcome.written.len(),
                skipped = outcome.skipped.len(),
                templates_removed = outcome.removed_templates.len(),
                gitignore_added = outcome.gitignore_added.len(),
                "setup finished"
            );
            Ok(())
        }

        Commands::Deploy {
            config,
            image_tag,
            no_wait,
        } => {
            let report = deploy::run(deploy::DeployOptions {
                root: cli.dir,
                config_path: config,
                image_tag,
                wait: !no_wait,
            })
            .await?;

            println!("deployment {} ({})", report.status.as_str(), report.deploy_id);
            print!("{}", report.render_summary());
            if let Some(url) = &report.service_url {
                println!("service URL: https://{}", url);
            }
            if let Some(arn) = &report.service_arn {
                println!("service ARN: {}", arn);
            }
            Ok(())
        }

        Commands::ValidateEnv {
            project_type,
            strict,
        } => {
            let report = validate::run(&validate::ValidateOptions {
                project_type,
                strict,
                root: cli.dir,
            });
            for warning in &report.warnings {
                warn!("{}", warning);
            }
            for err in &report.errors {
                error!("{}", err);
            }
            if report.passed(strict) {
                info!(warnings = report.warnings.len(), "environment validation passed");
                Ok(())
            } else {
                Err(Error::Validation {
                    errors: report.errors.len().max(1),
                })
            }
        }

        Commands::MergeFromRaw { remote, branch } => {
            let outcome = merge::run(&merge::MergeOptions {
                remote,
                branch,
                root: cli.dir,
            })
            .await?;
            for path in &outcome.kept_local_workflows {
                info!(path = %path, "kept local workflow");
            }
            if outcome.profile_restored {
                info!("profile line restored, review and commit the change");
            }
            Ok(())
        }
    }
}
