//! Lattice Rollout - rolling instance replacement for Kubernetes clusters

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lattice_rollout::cloud::{create_cloud, CloudInstanceGroup, CloudProvider};
use lattice_rollout::config::{parse_duration, ClusterBundle, RollingUpdateOptions};
use lattice_rollout::crd::{Cluster, InstanceGroup, InstanceGroupRole};
use lattice_rollout::kube_client::create_client;
use lattice_rollout::orchestrator::{GroupSelector, KubeCollaborators, RollingUpdateCluster};
use lattice_rollout::plan::{
    needs_update, plan_rows, print_table, report_rows, PLAN_HEADERS, REPORT_HEADERS,
};
use lattice_rollout::{Error, Result};

/// Lattice Rollout - replace the instances of a cluster one group at a time
#[derive(Parser, Debug)]
#[command(name = "lattice-rollout", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Roll the instances of a cluster onto their current configuration
    ///
    /// Without --yes, prints which instance groups need updating and exits.
    /// With --yes, replaces stale instances: bastions first, then masters,
    /// then nodes, draining and validating around every termination.
    RollingUpdate(RollingUpdateArgs),

    /// Delete an instance group and all of its instances
    DeleteInstanceGroup(DeleteGroupArgs),
}

/// Where the cluster is described and how to reach it
#[derive(Args, Debug)]
struct ClusterArgs {
    /// Path to the cluster bundle (one Cluster plus its InstanceGroups)
    #[arg(short = 'f', long = "config", env = "LATTICE_ROLLOUT_CONFIG")]
    config_file: PathBuf,

    /// Kubeconfig for the cluster holding the Cluster API resources
    #[arg(long, env = "LATTICE_ROLLOUT_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
}

/// Rolling update arguments
#[derive(Args, Debug)]
struct RollingUpdateArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Kubeconfig for the workload cluster; defaults to --kubeconfig
    #[arg(long, env = "LATTICE_ROLLOUT_WORKLOAD_KUBECONFIG")]
    workload_kubeconfig: Option<PathBuf>,

    /// Perform the update; without it only the preview is printed
    #[arg(long, short = 'y')]
    yes: bool,

    /// Replace instances even when they are already current
    #[arg(long)]
    force: bool,

    /// Ask before moving past each replaced instance
    #[arg(long, env = "LATTICE_ROLLOUT_INTERACTIVE")]
    interactive: bool,

    /// Skip every Kubernetes API interaction (no drain, no validation)
    #[arg(long)]
    cloud_only: bool,

    /// Abort when a node fails to drain
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "LATTICE_ROLLOUT_FAIL_ON_DRAIN_ERROR")]
    fail_on_drain_error: bool,

    /// Abort when the cluster fails validation
    #[arg(long, default_value_t = false, action = ArgAction::Set, env = "LATTICE_ROLLOUT_FAIL_ON_VALIDATE_ERROR")]
    fail_on_validate_error: bool,

    /// Keep going with later instance groups after one fails
    #[arg(long)]
    continue_on_error: bool,

    /// Wait after terminating a master instance
    #[arg(long, value_parser = duration_arg, env = "LATTICE_ROLLOUT_MASTER_INTERVAL")]
    master_interval: Option<Duration>,

    /// Wait after terminating a node instance
    #[arg(long, value_parser = duration_arg, env = "LATTICE_ROLLOUT_NODE_INTERVAL")]
    node_interval: Option<Duration>,

    /// Wait after terminating a bastion instance
    #[arg(long, value_parser = duration_arg, env = "LATTICE_ROLLOUT_BASTION_INTERVAL")]
    bastion_interval: Option<Duration>,

    /// Wait after a successful drain for pods to stabilize
    #[arg(long, value_parser = duration_arg, env = "LATTICE_ROLLOUT_POST_DRAIN_DELAY")]
    post_drain_delay: Option<Duration>,

    /// Maximum time to wait for the cluster to validate after each termination
    #[arg(long, value_parser = duration_arg, env = "LATTICE_ROLLOUT_VALIDATION_TIMEOUT")]
    validation_timeout: Option<Duration>,

    /// Only update these instance groups
    #[arg(long = "instance-group", value_delimiter = ',')]
    instance_groups: Vec<String>,

    /// Only update instance groups with these roles (bastion, master, node)
    #[arg(long = "instance-group-roles", value_delimiter = ',', value_parser = role_arg)]
    instance_group_roles: Vec<InstanceGroupRole>,
}

impl RollingUpdateArgs {
    fn options(&self) -> RollingUpdateOptions {
        let defaults = RollingUpdateOptions::default();
        RollingUpdateOptions {
            force: self.force,
            interactive: self.interactive,
            fail_on_validate: self.fail_on_validate_error,
            fail_on_drain_error: self.fail_on_drain_error,
            cloud_only: self.cloud_only,
            post_drain_delay: self.post_drain_delay.unwrap_or(defaults.post_drain_delay),
            validation_timeout: self.validation_timeout.unwrap_or(defaults.validation_timeout),
            master_interval: self.master_interval.unwrap_or(defaults.master_interval),
            node_interval: self.node_interval.unwrap_or(defaults.node_interval),
            bastion_interval: self.bastion_interval.unwrap_or(defaults.bastion_interval),
            fail_fast: !self.continue_on_error,
        }
    }
}

/// Delete instance group arguments
#[derive(Args, Debug)]
struct DeleteGroupArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Name of the instance group to delete
    name: String,

    /// Perform the deletion; without it only the target is printed
    #[arg(long, short = 'y')]
    yes: bool,
}

fn duration_arg(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn role_arg(s: &str) -> std::result::Result<InstanceGroupRole, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Failed to install TLS crypto provider: {e:?}");
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let cluster = serde_yaml::to_string(&Cluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize Cluster CRD: {}", e))?;
        let instance_group = serde_yaml::to_string(&InstanceGroup::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize InstanceGroup CRD: {}", e))?;
        println!("{cluster}---\n{instance_group}");
        return Ok(());
    }

    let result = match cli.command {
        Some(Commands::RollingUpdate(args)) => run_rolling_update(args).await,
        Some(Commands::DeleteInstanceGroup(args)) => run_delete_group(args).await,
        None => {
            eprintln!("No command given, see --help");
            return Ok(());
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
    Ok(())
}

/// Load the bundle and build the cloud provider for it
async fn connect(args: &ClusterArgs) -> Result<(ClusterBundle, Client, Arc<dyn CloudProvider>)> {
    let bundle = ClusterBundle::load(&args.config_file)?;
    let client = create_client(args.kubeconfig.as_deref()).await?;
    let cloud = create_cloud(
        bundle.cluster.spec.provider,
        client.clone(),
        bundle.cluster.capi_namespace(),
    );
    Ok((bundle, client, cloud))
}

async fn run_rolling_update(args: RollingUpdateArgs) -> Result<()> {
    let options = args.options();
    let (bundle, client, cloud) = connect(&args.cluster).await?;
    let ClusterBundle {
        cluster,
        instance_groups,
    } = bundle;

    let kube = if options.cloud_only {
        None
    } else {
        let workload = match &args.workload_kubeconfig {
            Some(path) => create_client(Some(path)).await?,
            None => client,
        };
        Some(workload)
    };

    let nodes: Vec<Node> = match &kube {
        Some(workload) => Api::<Node>::all(workload.clone())
            .list(&ListParams::default())
            .await?
            .items,
        None => Vec::new(),
    };

    let groups = cloud
        .list_instance_groups(&cluster, &instance_groups, &nodes)
        .await?;
    let selector = GroupSelector {
        names: args.instance_groups.clone(),
        roles: args.instance_group_roles.clone(),
    };
    let groups = selector.select(groups, &instance_groups)?;

    print_table(&PLAN_HEADERS, &plan_rows(&groups, options.force));

    if !needs_update(&groups, options.force) {
        println!("\nNo rolling-update required.");
        return Ok(());
    }
    if !args.yes {
        println!("\nMust specify --yes to rolling-update.");
        return Ok(());
    }

    let mut builder = RollingUpdateCluster::builder(cloud).options(options);
    if let Some(workload) = kube {
        builder = builder.kube(KubeCollaborators::from_client(workload));
    }
    let ctx = builder.build();

    info!(cluster = %cluster.name_any(), groups = groups.len(), "Starting rolling update");
    let report = ctx
        .rolling_update(&groups, &cluster, &instance_groups)
        .await?;

    println!();
    print_table(&REPORT_HEADERS, &report_rows(&report));
    println!(
        "\nRolling update completed for cluster {:?}: {} instances replaced in {:?}",
        cluster.name_any(),
        report.updated_instances(),
        report.elapsed
    );
    Ok(())
}

async fn run_delete_group(args: DeleteGroupArgs) -> Result<()> {
    let (bundle, _client, cloud) = connect(&args.cluster).await?;

    let mut groups = cloud
        .list_instance_groups(&bundle.cluster, &bundle.instance_groups, &[])
        .await?;
    let group: CloudInstanceGroup = groups.remove(&args.name).ok_or_else(|| {
        Error::config(format!(
            "instance group {:?} not found in cluster {:?}",
            args.name,
            bundle.cluster.name_any()
        ))
    })?;

    if !args.yes {
        println!(
            "InstanceGroup {:?} ({}) with {} instances would be deleted.\n\nMust specify --yes to delete.",
            group.name(),
            group.scaling_group,
            group.members().count()
        );
        return Ok(());
    }

    let ctx = RollingUpdateCluster::builder(cloud).build();
    ctx.delete_group(group).await?;
    println!("InstanceGroup {:?} deleted", args.name);
    Ok(())
}
