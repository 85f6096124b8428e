//! psachecker CLI entry point.
//!
//! Provides `inspect-workloads` and `inspect-cluster` subcommands that print
//! the strictest Pod Security level each namespace could enforce.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use psachecker::admission::{EvalContext, EvaluateError, OrderedLevelMap};
use psachecker::cluster::client::{ClusterConnection, ConnectionOptions, KubeCluster};
use psachecker::cluster::NamespaceLister;
use psachecker::config::{load_or_default, Config};
use psachecker::inspect::{
    inspect_cluster, inspect_workloads, render, render_breakdown, ClusterOptions, OutputFormat,
    WorkloadsOptions,
};
use psachecker::policy::checks::PodSecurityChecks;
use psachecker::policy::PolicyEvaluator;
use psachecker::scheme::ResourceScheme;
use psachecker::source::live::LiveSource;
use psachecker::source::manifest::ManifestSource;
use psachecker::source::ResourceSource;
use psachecker::types::PolicyVersion;

/// psachecker: find the least privileged Pod Security level your workloads
/// and namespaces can run under.
#[derive(Parser)]
#[command(name = "psachecker", version, about)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Flags shared by every subcommand.
#[derive(clap::Args)]
struct GlobalArgs {
    /// Path to the kubeconfig file.
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use.
    #[arg(long, global = true)]
    context: Option<String>,

    /// Namespace to inspect.
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Only list namespaces whose recommended level differs from their
    /// current enforce label.
    #[arg(long, global = true)]
    updates_only: bool,

    /// Configuration file (default: ~/.psachecker/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pod Security version to evaluate at, e.g. `latest` or `v1.25`.
    #[arg(long, global = true)]
    policy_version: Option<PolicyVersion>,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Output::Text)]
    output: Output,

    /// Increase log verbosity; also prints the per-resource breakdown.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    Text,
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Recommend a level per namespace from workload manifests or live
    /// workloads.
    InspectWorkloads {
        /// Resource type to read from the cluster, e.g. `deployments`.
        resource_type: Option<String>,

        /// Names of the resources to read; all when omitted.
        names: Vec<String>,

        /// Manifest file or directory. May be repeated.
        #[arg(short = 'f', long = "filename")]
        files: Vec<PathBuf>,

        /// Descend into subdirectories of manifest directories.
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Put manifests without a namespace into --namespace.
        #[arg(long)]
        default_namespaces: bool,

        /// Read workloads from every namespace.
        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },
    /// Recommend a level per namespace from the pods running in it.
    InspectCluster,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_or_default(cli.global.config.as_deref())?;
    if let Some(version) = cli.global.policy_version {
        config.policy.version = version;
    }
    psachecker::logging::init_cli(&config.logging, cli.global.verbose);
    debug!(?config, "configuration loaded");

    let (ctx, cancel) = EvalContext::new();
    let ctx = match config.evaluation.timeout_secs {
        0 => ctx,
        secs => ctx.with_timeout(Duration::from_secs(secs)),
    };
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling evaluation");
            cancel.cancel();
        }
    });

    let policy: Arc<dyn PolicyEvaluator> = Arc::new(
        PodSecurityChecks::with_defaults().context("failed to build pod security checks")?,
    );

    let mut recommendation = match cli.command {
        Command::InspectWorkloads {
            resource_type,
            names,
            files,
            recursive,
            default_namespaces,
            all_namespaces,
        } => {
            let options = WorkloadsOptions {
                namespace: cli.global.namespace.clone(),
                default_namespaces,
                all_namespaces,
                files,
                recursive,
                resource_type,
                names,
                updates_only: cli.global.updates_only,
                version: config.policy.version,
                max_concurrent: config.evaluation.max_concurrent_resources,
            };
            handle_workloads(&ctx, &cli.global, &config, options, policy).await?
        }
        Command::InspectCluster => handle_cluster(&ctx, &cli.global, &config, policy).await?,
    };

    let format = match cli.global.output {
        Output::Text => OutputFormat::Text,
        Output::Json => OutputFormat::Json,
    };
    let rendered = render(&mut recommendation, format)?;
    std::io::stdout()
        .lock()
        .write_all(rendered.as_bytes())
        .context("failed to write output")?;
    Ok(())
}

/// Connect to the cluster unless the run is cancelled first.
async fn connect(ctx: &EvalContext, global: &GlobalArgs) -> anyhow::Result<ClusterConnection> {
    let options = ConnectionOptions {
        kubeconfig: global.kubeconfig.clone(),
        context: global.context.clone(),
    };
    let connection = ctx
        .run(options.connect())
        .await
        .map_err(EvaluateError::from)?
        .context("failed to connect to the cluster")?;
    Ok(connection)
}

/// Run `inspect-workloads`. Local manifests never touch the cluster.
async fn handle_workloads(
    ctx: &EvalContext,
    global: &GlobalArgs,
    config: &Config,
    options: WorkloadsOptions,
    policy: Arc<dyn PolicyEvaluator>,
) -> anyhow::Result<OrderedLevelMap> {
    options.validate()?;
    let scheme = ResourceScheme::workloads();

    let report = if options.is_local() {
        let source =
            ManifestSource::new(options.files.clone(), scheme).recursive(options.recursive);
        inspect_workloads(ctx, &options, &source, policy, None).await?
    } else {
        let connection = connect(ctx, global).await?;
        let resource_type = options.resource_type.clone().unwrap_or_default();
        let source: Box<dyn ResourceSource> = Box::new(LiveSource::new(
            connection.client.clone(),
            scheme,
            resource_type,
            options.names.clone(),
            options.scope(&connection.default_namespace),
        ));
        let cluster = KubeCluster::new(connection.client);
        let labels: &dyn NamespaceLister = &cluster;
        inspect_workloads(ctx, &options, source.as_ref(), policy, Some(labels)).await?
    };

    if global.verbose > 0 {
        eprint!("{}", render_breakdown(&report.results));
    }
    debug!(
        max_concurrent = config.evaluation.max_concurrent_resources,
        namespaces = report.recommendation.len(),
        "workloads inspected"
    );
    Ok(report.recommendation)
}

/// Run `inspect-cluster`.
async fn handle_cluster(
    ctx: &EvalContext,
    global: &GlobalArgs,
    config: &Config,
    policy: Arc<dyn PolicyEvaluator>,
) -> anyhow::Result<OrderedLevelMap> {
    let connection = connect(ctx, global).await?;
    let cluster = Arc::new(KubeCluster::new(connection.client));
    let options = ClusterOptions {
        namespace: global.namespace.clone(),
        updates_only: global.updates_only,
        version: config.policy.version,
    };
    let recommendation =
        inspect_cluster(ctx, &options, policy, cluster.as_ref(), cluster.clone()).await?;
    Ok(recommendation)
}
