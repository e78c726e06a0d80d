use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use liquid_lpd::application::{
    AppContext, OperatorService, TradeService, WalletService, spawn_trade_sweeper,
};
use liquid_lpd::config::Config;
use liquid_lpd::crawler::Crawler;
use liquid_lpd::explorer::EsploraClient;
use liquid_lpd::grpc::{OperatorHandler, TradeHandler, WalletHandler};
use liquid_lpd::proto::v1::operator_service_server::OperatorServiceServer;
use liquid_lpd::proto::v1::trade_service_server::TradeServiceServer;
use liquid_lpd::proto::v1::wallet_service_server::WalletServiceServer;
use liquid_lpd::storage::DbManager;
use lwk_wollet::ElementsNetwork;
use tokio::sync::watch;
use tonic::transport::Server;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9945")]
    listen_addr: String,

    #[arg(long, default_value = "http://127.0.0.1:3001")]
    explorer_endpoint: String,

    #[arg(long, default_value = "lpd-datadir")]
    datadir: PathBuf,

    /// Base asset every market trades against; defaults to the network
    /// policy asset.
    #[arg(long)]
    base_asset: Option<String>,

    /// Seed words used to restore the vault on first unlock.
    #[arg(long)]
    mnemonic: Option<String>,

    #[arg(long, default_value_t = 1_000)]
    crawler_interval_ms: u64,

    #[arg(long, default_value_t = 300)]
    trade_expiry_secs: u64,

    #[arg(long, default_value_t = 25)]
    default_fee_bps: u32,

    #[arg(long, default_value_t = 50)]
    slippage_bps: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    liquid_lpd::logging::init().ok();

    let args = Args::parse();
    let listen_addr: SocketAddr = args.listen_addr.parse().context("parse listen_addr")?;

    let network = ElementsNetwork::default_regtest();
    let config = Arc::new(Config {
        base_asset: args
            .base_asset
            .unwrap_or_else(|| network.policy_asset().to_string()),
        explorer_endpoint: args.explorer_endpoint.clone(),
        mnemonic: args.mnemonic,
        crawler_interval_ms: args.crawler_interval_ms,
        trade_expiry_secs: args.trade_expiry_secs,
        default_fee_bps: args.default_fee_bps,
        slippage_bps: args.slippage_bps,
        datadir: args.datadir.clone(),
        network,
    });

    let db = Arc::new(DbManager::open(&config.datadir).context("open stores")?);
    let explorer = Arc::new(EsploraClient::new(&config.explorer_endpoint));

    let (stop_tx, stop_rx) = watch::channel(false);
    let crawler = Crawler::new(
        db.clone(),
        explorer.clone(),
        Duration::from_millis(config.crawler_interval_ms),
        stop_rx.clone(),
    );

    let ctx = AppContext::load(db, explorer, crawler, config.clone())
        .map_err(|e| anyhow::anyhow!("load app context: {e}"))?;
    ctx.observe_known_addresses();
    spawn_trade_sweeper(ctx.clone(), stop_rx);

    let wallet_svc = WalletService::new(ctx.clone());
    let trade_svc = TradeService::new(ctx.clone());
    let operator_svc = OperatorService::new(ctx);

    tracing::info!(%listen_addr, datadir = %args.datadir.display(), "starting daemon");

    Server::builder()
        .add_service(TradeServiceServer::new(TradeHandler::new(trade_svc)))
        .add_service(OperatorServiceServer::new(OperatorHandler::new(
            operator_svc,
        )))
        .add_service(WalletServiceServer::new(WalletHandler::new(wallet_svc)))
        .serve_with_shutdown(listen_addr, async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
        })
        .await
        .context("serve gRPC")?;

    // Stop crawler tasks and the sweeper cooperatively.
    stop_tx.send(true).ok();

    Ok(())
}
