use clap::Parser;
use containerization_assist::{
    build_registry,
    common::CommandRunner,
    config,
    policy::PolicyEngine,
    rpc::{self, PeerHandle, RpcServer, ServeOutcome},
    sampling::{SamplingClient, TemplateStore},
    session::SessionManager,
    store::KvStore,
    tools::ToolExecutor,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Containerization assistant server speaking newline-delimited JSON-RPC on
/// stdin/stdout.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file directory (looks for .containerization-assist.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prompt template directory overriding the embedded set
    #[arg(long, default_value = "templates")]
    templates: PathBuf,
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {}", e);
            1
        }
    };
    process::exit(exit_code);
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    // stdout carries the wire protocol; logging goes to stderr
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stderr);
    builder.init();

    let config = config::load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;
    log::info!(
        "starting containerization-assist {} (workspace root {})",
        containerization_assist::VERSION,
        config.session.workspace_root.display()
    );

    std::fs::create_dir_all(&config.session.workspace_root).map_err(|e| {
        anyhow::anyhow!(
            "cannot create workspace root {}: {}",
            config.session.workspace_root.display(),
            e
        )
    })?;
    let store = KvStore::open(config.session.workspace_root.join("store"))
        .map_err(|e| anyhow::anyhow!("store error: {}", e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, store, cli.templates))
}

async fn serve(
    config: containerization_assist::Config,
    store: KvStore,
    template_dir: PathBuf,
) -> anyhow::Result<i32> {
    let sessions = SessionManager::new(config.session.clone(), store)
        .map_err(|e| anyhow::anyhow!("session manager: {}", e))?;

    let policy = PolicyEngine::new(config.policy.clone())
        .map_err(|e| anyhow::anyhow!("policy load: {}", e))?;

    let templates = TemplateStore::load(Some(template_dir.as_path()))
        .map_err(|e| anyhow::anyhow!("template load: {}", e))?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let peer = PeerHandle::new(outbound_tx.clone());
    let sampling = Arc::new(SamplingClient::new(
        Arc::clone(&peer),
        config.sampling.clone(),
        Arc::new(templates),
    ));

    let registry = build_registry(&sessions).map_err(|e| anyhow::anyhow!("registry: {}", e))?;
    log::info!("registered {} tool(s)", registry.len());

    let max_protocol_errors = config.server.max_protocol_errors;
    let executor = ToolExecutor::new(
        registry,
        Arc::clone(&sessions),
        Arc::new(CommandRunner::new()),
        Arc::new(policy),
        sampling,
        Arc::new(config),
    );

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(Arc::clone(&sessions).run_sweeper(shutdown.clone()));

    let server = RpcServer::new(executor, peer, outbound_tx, max_protocol_errors);
    let outcome = tokio::select! {
        outcome = rpc::serve_stdio(server, outbound_rx) => {
            outcome.map_err(|e| anyhow::anyhow!("wire failure: {}", e))?
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupt received, shutting down");
            ServeOutcome::Clean
        }
    };

    shutdown.cancel();
    let _ = sweeper.await;

    Ok(match outcome {
        ServeOutcome::Clean => 0,
        ServeOutcome::ProtocolFailure => 2,
    })
}
