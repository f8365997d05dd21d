//! Compute Chain - node and submit client

use anyhow::{bail, Context};
use clap::Parser;
use compute_chain::{
    config::{Cli, Command, NodeConfig, SubmitArgs},
    http,
    logging::init_logging,
    node::Node,
    storage::IpfsStore,
    submit::Submitter,
    APP_NAME, APP_VERSION,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        NodeConfig::load(cli.config_file.as_deref()).context("failed to load configuration")?;
    config.apply_cli(&cli);
    match &cli.command {
        Command::Node(args) => config.apply_node_args(args),
        Command::Submit(args) => config.apply_submit_args(args),
    }
    config.validate().context("invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging)?;
    info!("Starting {} v{}", APP_NAME, APP_VERSION);

    match cli.command {
        Command::Node(_) => run_node(config).await,
        Command::Submit(args) => run_submit(config, args).await,
    }
}

async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    let node = Node::from_config(&config)?;

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received interrupt, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for interrupt"),
            }
            shutdown.cancel();
        });
    }

    node.run(listener, shutdown).await?;
    Ok(())
}

async fn run_submit(config: NodeConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let timeout = config.http_timeout()?;
    let store = IpfsStore::new(&config.api_url()?, &config.gateway_url()?, timeout)?;
    let submitter = Submitter::new(
        store,
        http::build_client(timeout)?,
        config.broadcast.peers.clone(),
        config.broadcast.peer_port,
    );

    let report = submitter.submit(&args.program, &args.input).await?;

    println!("program: {}", report.program);
    println!("input:   {}", report.input);
    for reply in &report.replies {
        let verdict = if reply.accepted { "ok" } else { "failed" };
        println!("{:<8} {} {}", verdict, reply.peer, reply.message.trim());
    }

    if report.accepted() == 0 {
        bail!("no peer accepted the computation");
    }
    Ok(())
}
