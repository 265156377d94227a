use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use squalldb_common::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SNAPSHOT_INTERVAL_SECS, MAX_CONNECTIONS,
};
use squalldb_core::{Core, StorageHash};
use squalldb_keeper::{Keeper, SyncPolicy};
use squalldb_server::{Connection, Dispatcher, handle_connection, http};

/// Intervalo entre passadas do coletor de expiração (um shard por vez).
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(
    name = "squalldb-server",
    about = "SqualldB — armazém chave-valor em memória com persistência"
)]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Porta do front-end HTTP (desligado se omitida)
    #[arg(long)]
    http_port: Option<u16>,
    /// Diretório de dados (snapshot + segmentos de WAL)
    #[arg(long, default_value = "data", value_name = "DIR")]
    data_dir: PathBuf,
    #[arg(long, default_value = "sometimes", value_parser = parse_sync_policy)]
    sync: SyncPolicy,
    /// Intervalo entre rotações de snapshot, em segundos
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_INTERVAL_SECS)]
    snapshot_interval: u64,
    #[arg(long, default_value_t = MAX_CONNECTIONS)]
    max_connections: usize,
}

fn parse_sync_policy(s: &str) -> Result<SyncPolicy, String> {
    match s.to_lowercase().as_str() {
        "never" => Ok(SyncPolicy::Never),
        "sometimes" => Ok(SyncPolicy::Sometimes),
        "always" => Ok(SyncPolicy::Always),
        _ => Err(format!("valor inválido: '{s}'. Use: never, sometimes, always")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "squalldb=info".into()),
        )
        .init();

    let args = Args::parse();

    let engine = Arc::new(StorageHash::new());
    let core = Core::new(engine);
    let keeper = Arc::new(Keeper::new(
        core.clone(),
        &args.data_dir,
        args.sync,
        Duration::from_secs(args.snapshot_interval),
    ));
    keeper.start().await?;

    let dispatcher = Dispatcher::new(keeper.clone());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // coletor de expiração: cicla um shard por passada
    {
        let core = core.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(COLLECT_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => { core.collect_expired(); }
                    _ = shutdown_rx.recv() => return,
                }
            }
        });
    }

    // rotação periódica de snapshot
    {
        let keeper = keeper.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { keeper.run_snapshot_loop(shutdown_rx).await });
    }

    // front-end HTTP opcional
    if let Some(http_port) = args.http_port {
        let router = http::router(dispatcher.clone());
        let addr = format!("{}:{}", args.host, http_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP escutando em {addr}");

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let wait_shutdown = async move {
                let _ = shutdown_rx.recv().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(wait_shutdown)
                .await
            {
                error!("servidor HTTP: {e}");
            }
        });
    }

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("SqualldB escutando em {addr}");

    let semaphore = Arc::new(tokio::sync::Semaphore::new(args.max_connections));

    loop {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit.unwrap(),
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
        };

        let (socket, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("erro ao aceitar conexão: {e}");
                        continue;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
        };

        info!("nova conexão: {peer}");
        let dispatcher = dispatcher.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let conn = Connection::new(socket);
            if let Err(e) = handle_connection(conn, dispatcher, &mut shutdown_rx).await {
                error!("erro na conexão {peer}: {e}");
            }
            info!("conexão encerrada: {peer}");
            drop(permit);
        });
    }

    // avisa conexões e tarefas de fundo, depois persiste e encerra
    drop(shutdown_tx);
    keeper.shutdown().await?;
    info!("estado persistido; até logo");

    Ok(())
}
