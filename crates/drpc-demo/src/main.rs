//! drpc demo - Greeter providers and a consumer in one process.
//!
//! Starts `--providers` Greeter servers against an in-process registry,
//! subscribes a client to the Greeter service and issues `--calls` calls.

mod greeter;

use anyhow::{anyhow, Result};
use clap::Parser;
use drpc_core::{MemoryRegistry, RouterKind, RpcClient, RpcServer, SubscribedService};
use greeter::GreeterService;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "drpc-demo")]
#[command(about = "Greeter provider and consumer over drpc")]
struct Args {
    /// Number of greet calls to issue
    #[arg(short, long, default_value = "5")]
    calls: usize,

    /// Number of Greeter providers to start
    #[arg(long, default_value = "2")]
    providers: usize,

    /// Send calls without waiting for responses
    #[arg(long)]
    fire_and_forget: bool,

    /// Request timeout for synchronous calls, in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Selection policy: round_robin or random
    #[arg(long, default_value = "round_robin")]
    router: String,

    /// Host providers bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Keep providers running until Ctrl+C
    #[arg(long)]
    serve: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let router = RouterKind::from_str(&args.router).ok_or_else(|| {
        anyhow!(
            "Unknown router '{}', expected round_robin or random",
            args.router
        )
    })?;

    info!("Starting drpc demo");

    let registry = Arc::new(MemoryRegistry::new());

    let mut servers = Vec::with_capacity(args.providers);
    let mut greeters = Vec::with_capacity(args.providers);
    for index in 0..args.providers {
        let server = RpcServer::builder(registry.clone())
            .host(args.host.clone())
            .application_name(format!("greeter-{}", index))
            .start()
            .await?;
        let greeter = Arc::new(GreeterService::new(format!("greeter-{}", index)));
        server.register_service(greeter.clone()).await?;
        servers.push(server);
        greeters.push(greeter);
    }
    for server in &servers {
        server.wait_idle().await;
        info!("Provider listening on {}", server.address());
    }

    let client = RpcClient::builder(registry.clone())
        .request_timeout(Duration::from_millis(args.timeout_ms))
        .router(router)
        .build()?;
    let service = if args.fire_and_forget {
        SubscribedService::fire_and_forget(greeter::interface())
    } else {
        SubscribedService::sync(greeter::interface())
    };
    let stub = client.subscribe_service(service).await?;

    for i in 0..args.calls {
        let name = format!("caller-{}", i);
        match stub.invoke("greet", vec![json!(name.as_str())]).await {
            Ok(Some(reply)) => info!("Reply: {}", reply),
            Ok(None) => info!("Sent greeting for {}", name),
            Err(e) => warn!("Call {} failed: {}", i, e),
        }
    }

    if args.fire_and_forget {
        // Give providers a moment to drain what was sent.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    for greeter in &greeters {
        info!("{} handled {} greeting(s)", greeter.label(), greeter.greetings());
    }

    if args.serve {
        info!("Serving until Ctrl+C");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received, exiting");
    }

    client.shutdown().await;
    for mut server in servers {
        server.shutdown();
    }

    Ok(())
}
