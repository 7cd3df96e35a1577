//! endpoint-scaler operator binary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use endpoint_scaler::compiler::{BuildContext, ChildKind, EndpointCompiler};
use endpoint_scaler::config::{ControllerConfig, DEFAULT_FIELD_MANAGER};
use endpoint_scaler::controller::{error_policy, reconcile, Context};
use endpoint_scaler::crd::EndpointPolicy;
use endpoint_scaler::metrics::OtelMetrics;
use endpoint_scaler::retry::RetryConfig;

/// endpoint-scaler - split application endpoints into independently scaled deployments
#[derive(Parser, Debug)]
#[command(name = "endpoint-scaler", version, about, long_about = None)]
struct Cli {
    /// Print the EndpointPolicy CRD and exit
    #[arg(long)]
    crd: bool,

    /// Emit logs as JSON
    #[arg(long, env = "ENDPOINTSCALER_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the EndpointPolicy controller (default mode)
    Controller(ControllerArgs),

    /// Validate a policy file and print the children it would produce
    ///
    /// Runs offline: the canary main-service check is skipped.
    Render(RenderArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "ENDPOINTSCALER_NAMESPACE")]
    namespace: Option<String>,

    /// Requeue interval after a successful pass, in seconds
    #[arg(long, default_value = "300")]
    resync_secs: u64,

    /// Requeue interval after a failed pass, in seconds
    #[arg(long, default_value = "30")]
    error_requeue_secs: u64,

    /// Field manager for writes
    #[arg(long, default_value = DEFAULT_FIELD_MANAGER)]
    field_manager: String,

    /// Attempts per child write when it conflicts with another writer
    #[arg(long, default_value = "3")]
    conflict_retries: u32,

    /// Server-side apply the CRD before starting
    #[arg(long)]
    install_crd: bool,
}

/// Render mode arguments
#[derive(Parser, Debug)]
struct RenderArgs {
    /// Path to an EndpointPolicy YAML file
    #[arg(short = 'f', long = "file")]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let fmt_layer = if cli.log_json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .init();

    if cli.crd {
        let crd = serde_yaml::to_string(&EndpointPolicy::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Render(args)) => run_render(args).await,
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::parse_from(["controller"])).await,
    }
}

/// Validate a policy file and print its desired children as a YAML stream
async fn run_render(args: RenderArgs) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read policy file {:?}: {}", args.file, e))?;

    let mut policy: EndpointPolicy = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse EndpointPolicy: {}", e))?;
    if policy.metadata.namespace.is_none() {
        policy.metadata.namespace = Some("default".to_string());
    }

    policy
        .spec
        .validate()
        .map_err(|e| anyhow::anyhow!("EndpointPolicy is invalid: {}", e))?;

    let config = ControllerConfig::default();
    let build = BuildContext::for_policy(&policy, &config.labels)?;

    let mut documents = Vec::new();
    for (endpoint, compiled) in policy.spec.endpoints.iter().zip(EndpointCompiler::compile_all(&build)) {
        let compiled = compiled
            .map_err(|e| anyhow::anyhow!("endpoint {}: {}", endpoint.id, e))?;
        for child in compiled.children()? {
            documents.push(serde_yaml::to_string(&child.object)?);
        }
    }
    print!("{}", documents.join("---\n"));
    Ok(())
}

/// Install or update the EndpointPolicy CRD with server-side apply
async fn ensure_crd_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    tracing::info!("Installing EndpointPolicy CRD...");
    crds.patch(
        "endpointpolicies.endpointscaler.io",
        &params,
        &Patch::Apply(&EndpointPolicy::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install EndpointPolicy CRD: {}", e))?;

    Ok(())
}

/// Route kinds the API server serves
///
/// Gateway API CRDs are optional and releases before v1.1 lack GRPCRoute v1,
/// so a kind missing from discovery is skipped instead of watched.
async fn served_route_kinds(client: &Client) -> Vec<ApiResource> {
    let mut served = Vec::new();
    for kind in ChildKind::ALL.into_iter().filter(|k| k.is_route()) {
        let ar = kind.api_resource();
        let gvk = kube::core::GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
        match kube::discovery::pinned_kind(client, &gvk).await {
            Ok(_) => served.push(ar),
            Err(e) => {
                tracing::warn!(%kind, error = %e, "Route kind not served, not watching it");
            }
        }
    }
    served
}

/// Run the EndpointPolicy controller until a shutdown signal arrives
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.install_crd {
        ensure_crd_installed(&client, &args.field_manager).await?;
    }

    let config = ControllerConfig {
        resync_interval: Duration::from_secs(args.resync_secs),
        error_requeue: Duration::from_secs(args.error_requeue_secs),
        field_manager: args.field_manager,
        conflict_retry: RetryConfig::with_max_attempts(args.conflict_retries),
        ..Default::default()
    };
    let managed_by = format!(
        "{}={}",
        config.labels.managed_by_key, config.labels.managed_by_value
    );

    let meter = opentelemetry::global::meter("endpoint-scaler");
    let metrics = Arc::new(OtelMetrics::new(&meter));
    let ctx = Arc::new(Context::new(client.clone(), metrics, config));

    let (policies, deployments, services, autoscalers) = match &args.namespace {
        Some(ns) => (
            Api::<EndpointPolicy>::namespaced(client.clone(), ns),
            Api::<Deployment>::namespaced(client.clone(), ns),
            Api::<Service>::namespaced(client.clone(), ns),
            Api::<HorizontalPodAutoscaler>::namespaced(client.clone(), ns),
        ),
        None => (
            Api::all(client.clone()),
            Api::all(client.clone()),
            Api::all(client.clone()),
            Api::all(client.clone()),
        ),
    };
    let owned = || WatcherConfig::default().labels(&managed_by);

    let mut controller = Controller::new(policies, WatcherConfig::default())
        .owns(deployments, owned())
        .owns(services, owned())
        .owns(autoscalers, owned());
    for ar in served_route_kinds(&client).await {
        let routes = match &args.namespace {
            Some(ns) => Api::<DynamicObject>::namespaced_with(client.clone(), ns, &ar),
            None => Api::<DynamicObject>::all_with(client.clone(), &ar),
        };
        controller = controller.owns_with(routes, ar, owned());
    }

    tracing::info!(namespace = ?args.namespace, "Starting EndpointPolicy controller...");

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Policy reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Policy reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("endpoint-scaler controller shutting down");
    Ok(())
}
