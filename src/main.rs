use clap::{Parser, Subcommand};
use kube::api::Api;
use kube::ResourceExt;
use pg_snapshot_operator::config::OperatorConfig;
use pg_snapshot_operator::controller::{
    find_job, finalizers, mark_invalid, patch_snapshot_status, snapshotter_job_name, submit_job,
    SnapshotOrchestrator,
};
use pg_snapshot_operator::crd::{Snapshot, SnapshotPhase};
use pg_snapshot_operator::{telemetry, Error};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a Snapshot against its Postgres and record the result
    Validate(TargetArgs),
    /// Validate a Snapshot, provision its volume and print its backup Job
    Job(JobArgs),
    /// Print the Postgres a Snapshot refers to
    Database(TargetArgs),
    /// Delete a Snapshot's data and release its finalizer
    Wipe(TargetArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct TargetArgs {
    /// Snapshot name
    snapshot: String,

    /// Snapshot namespace
    #[arg(short, long, env = "SNAPSHOT_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[derive(Parser, Debug)]
struct JobArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Submit the Job and track the Snapshot's phase
    #[arg(long)]
    apply: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let target = match args.command {
        Commands::Version => {
            println!("pg-snapshot-operator v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Job(ref j) => &j.target,
        Commands::Validate(ref t)
        | Commands::Database(ref t)
        | Commands::Wipe(ref t) => t,
    };

    telemetry::init_tracing(args.config.log_format);

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    let orchestrator = SnapshotOrchestrator::for_cluster(client.clone(), &args.config)?;

    let snapshots: Api<Snapshot> = Api::namespaced(client.clone(), &target.namespace);
    let mut snapshot = snapshots
        .get(&target.snapshot)
        .await
        .map_err(Error::KubeError)?;

    match args.command {
        Commands::Validate(_) => {
            if let Err(e) = orchestrator.validate(&snapshot).await {
                return reject(&client, &mut snapshot, e).await;
            }
            patch_snapshot_status(&client, &mut snapshot, SnapshotPhase::Validated, None).await?;
            println!("Snapshot {} is valid", snapshot.name_any());
        }
        Commands::Job(ref job_args) if !job_args.apply => {
            let job = orchestrator.preview_backing_job(&snapshot).await?;
            print!("{}", serde_yaml::to_string(&job)?);
        }
        Commands::Job(_) => {
            if let Err(e) = orchestrator.validate(&snapshot).await {
                return reject(&client, &mut snapshot, e).await;
            }

            let job_name = snapshotter_job_name(&snapshot);
            let job = match find_job(&client, &target.namespace, &job_name).await? {
                Some(job) => {
                    info!("Job {} was already submitted", job_name);
                    job
                }
                None => {
                    patch_snapshot_status(&client, &mut snapshot, SnapshotPhase::Validated, None)
                        .await?;
                    finalizers::add_finalizer(&client, &snapshot).await?;
                    patch_snapshot_status(
                        &client,
                        &mut snapshot,
                        SnapshotPhase::Provisioning,
                        None,
                    )
                    .await?;

                    let job = match orchestrator.ensure_backing_job(&snapshot).await {
                        Ok(job) => job,
                        Err(e) => return fail(&client, &mut snapshot, e).await,
                    };
                    if let Err(e) = submit_job(&client, &job).await {
                        return fail(&client, &mut snapshot, e).await;
                    }
                    job
                }
            };
            patch_snapshot_status(
                &client,
                &mut snapshot,
                SnapshotPhase::Running,
                Some(&format!("Job {job_name} submitted")),
            )
            .await?;
            print!("{}", serde_yaml::to_string(&job)?);
        }
        Commands::Database(_) => {
            let postgres = orchestrator.resolve_database(&snapshot).await?;
            print!("{}", serde_yaml::to_string(&postgres)?);
        }
        Commands::Wipe(_) => {
            orchestrator.wipe_data(&snapshot).await?;
            patch_snapshot_status(&client, &mut snapshot, SnapshotPhase::Wiped, None).await?;
            finalizers::remove_finalizer(&client, &snapshot).await?;
            info!("Wiped data of snapshot {}", snapshot.name_any());
        }
        Commands::Version => {}
    }

    Ok(())
}

/// Record a snapshot that failed validation before handing the error back
async fn reject(client: &kube::Client, snapshot: &mut Snapshot, err: Error) -> Result<(), Error> {
    error!("Snapshot {} is invalid: {}", snapshot.name_any(), err);
    mark_invalid(client, snapshot, &err.to_string()).await?;
    Err(err)
}

/// Record a failed snapshot before handing the error back
async fn fail(client: &kube::Client, snapshot: &mut Snapshot, err: Error) -> Result<(), Error> {
    error!("Snapshot {} failed: {}", snapshot.name_any(), err);
    let reason = err.to_string();
    patch_snapshot_status(client, snapshot, SnapshotPhase::Failed, Some(&reason)).await?;
    Err(err)
}
