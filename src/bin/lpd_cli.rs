use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use liquid_lpd::proto::v1 as pb;
use liquid_lpd::proto::v1::operator_service_client::OperatorServiceClient;
use liquid_lpd::proto::v1::wallet_service_client::WalletServiceClient;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:9945")]
    rpc_addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or restore the vault from seed words.
    Init {
        #[arg(long)]
        mnemonic: String,
        #[arg(long)]
        passphrase: String,
    },
    Unlock {
        #[arg(long)]
        passphrase: String,
    },
    Lock,
    /// Derive a deposit address for the fee account.
    DepositFee,
    /// Derive a deposit address for a market; with no pair a new market is
    /// created.
    DepositMarket {
        #[arg(long, default_value = "")]
        base_asset: String,
        #[arg(long, default_value = "")]
        quote_asset: String,
    },
    OpenMarket {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
    },
    CloseMarket {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
    },
    UpdatePrice {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
        #[arg(long)]
        base_price: String,
        #[arg(long)]
        quote_price: String,
    },
    UpdateStrategy {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
        /// balanced | pluggable
        #[arg(long)]
        strategy: String,
    },
    UpdateFee {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
        #[arg(long)]
        fee_bps: u32,
    },
    ListMarkets,
    ListSwaps,
    FeeBalance,
    ExternalAddresses {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
    },
    Withdraw {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
        #[arg(long, default_value_t = 0)]
        base_amount: u64,
        #[arg(long, default_value_t = 0)]
        quote_amount: u64,
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = 100)]
        millisat_per_byte: u64,
        #[arg(long, default_value_t = false)]
        push: bool,
    },
    CollectedFees {
        #[arg(long)]
        base_asset: String,
        #[arg(long)]
        quote_asset: String,
    },
}

fn market(base_asset: String, quote_asset: String) -> Option<pb::Market> {
    Some(pb::Market {
        base_asset,
        quote_asset,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Init {
            mnemonic,
            passphrase,
        } => {
            let mut client = WalletServiceClient::connect(args.rpc_addr)
                .await
                .context("connect wallet service")?;
            client
                .init_wallet(pb::InitWalletRequest {
                    mnemonic,
                    passphrase,
                })
                .await
                .context("InitWallet")?;
            println!("vault initialized");
        }
        Command::Unlock { passphrase } => {
            let mut client = WalletServiceClient::connect(args.rpc_addr)
                .await
                .context("connect wallet service")?;
            client
                .unlock_wallet(pb::UnlockWalletRequest { passphrase })
                .await
                .context("UnlockWallet")?;
            println!("vault unlocked");
        }
        Command::Lock => {
            let mut client = WalletServiceClient::connect(args.rpc_addr)
                .await
                .context("connect wallet service")?;
            client
                .lock_wallet(pb::LockWalletRequest {})
                .await
                .context("LockWallet")?;
            println!("vault locked");
        }
        Command::DepositFee => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .deposit_fee_account(pb::DepositFeeAccountRequest {})
                .await
                .context("DepositFeeAccount")?
                .into_inner();
            println!("address: {}", reply.address);
            println!("blinding_key: {}", reply.blinding_key);
        }
        Command::DepositMarket {
            base_asset,
            quote_asset,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .deposit_market(pb::DepositMarketRequest {
                    market: market(base_asset, quote_asset),
                })
                .await
                .context("DepositMarket")?
                .into_inner();
            println!("address: {}", reply.address);
            println!("blinding_key: {}", reply.blinding_key);
        }
        Command::OpenMarket {
            base_asset,
            quote_asset,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            client
                .open_market(pb::OpenMarketRequest {
                    market: market(base_asset, quote_asset),
                })
                .await
                .context("OpenMarket")?;
            println!("market opened");
        }
        Command::CloseMarket {
            base_asset,
            quote_asset,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            client
                .close_market(pb::CloseMarketRequest {
                    market: market(base_asset, quote_asset),
                })
                .await
                .context("CloseMarket")?;
            println!("market closed");
        }
        Command::UpdatePrice {
            base_asset,
            quote_asset,
            base_price,
            quote_price,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            client
                .update_market_price(pb::UpdateMarketPriceRequest {
                    market: market(base_asset, quote_asset),
                    price: Some(pb::Price {
                        base_price,
                        quote_price,
                    }),
                })
                .await
                .context("UpdateMarketPrice")?;
            println!("price updated");
        }
        Command::UpdateStrategy {
            base_asset,
            quote_asset,
            strategy,
        } => {
            let strategy_type = match strategy.as_str() {
                "balanced" => pb::StrategyType::Balanced,
                "pluggable" => pb::StrategyType::Pluggable,
                other => anyhow::bail!("unknown strategy: {other}"),
            };
            let mut client = operator(args.rpc_addr).await?;
            client
                .update_market_strategy(pb::UpdateMarketStrategyRequest {
                    market: market(base_asset, quote_asset),
                    strategy_type: strategy_type as i32,
                })
                .await
                .context("UpdateMarketStrategy")?;
            println!("strategy updated");
        }
        Command::UpdateFee {
            base_asset,
            quote_asset,
            fee_bps,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .update_market_fee(pb::UpdateMarketFeeRequest {
                    market: market(base_asset, quote_asset),
                    fee_bps,
                })
                .await
                .context("UpdateMarketFee")?
                .into_inner();
            println!("fee_bps: {}", reply.fee_bps);
        }
        Command::ListMarkets => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .list_market(pb::ListMarketRequest {})
                .await
                .context("ListMarket")?
                .into_inner();
            for info in reply.markets {
                let pair = info.market.unwrap_or_default();
                println!(
                    "{} / {} fee_bps={} tradable={}",
                    pair.base_asset, pair.quote_asset, info.fee_bps, info.tradable
                );
            }
        }
        Command::ListSwaps => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .list_swaps(pb::ListSwapsRequest {})
                .await
                .context("ListSwaps")?
                .into_inner();
            for swap in reply.swaps {
                println!(
                    "{} {} sends {} {} for {} {}",
                    swap.trade_id, swap.status, swap.amount_p, swap.asset_p, swap.amount_r,
                    swap.asset_r
                );
            }
        }
        Command::FeeBalance => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .fee_account_balance(pb::FeeAccountBalanceRequest {})
                .await
                .context("FeeAccountBalance")?
                .into_inner();
            println!("{}", reply.balance);
        }
        Command::ExternalAddresses {
            base_asset,
            quote_asset,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .list_market_external_addresses(pb::ListMarketExternalAddressesRequest {
                    market: market(base_asset, quote_asset),
                })
                .await
                .context("ListMarketExternalAddresses")?
                .into_inner();
            for address in reply.addresses {
                println!("{address}");
            }
        }
        Command::Withdraw {
            base_asset,
            quote_asset,
            base_amount,
            quote_amount,
            address,
            millisat_per_byte,
            push,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .withdraw_market(pb::WithdrawMarketRequest {
                    market: market(base_asset, quote_asset),
                    balance_to_withdraw: Some(pb::Balance {
                        base_amount,
                        quote_amount,
                    }),
                    millisat_per_byte,
                    address,
                    push,
                })
                .await
                .context("WithdrawMarket")?
                .into_inner();
            println!("tx_hex: {}", reply.tx_hex);
            if !reply.txid.is_empty() {
                println!("txid: {}", reply.txid);
            }
        }
        Command::CollectedFees {
            base_asset,
            quote_asset,
        } => {
            let mut client = operator(args.rpc_addr).await?;
            let reply = client
                .get_collected_market_fee(pb::GetCollectedMarketFeeRequest {
                    market: market(base_asset, quote_asset),
                })
                .await
                .context("GetCollectedMarketFee")?
                .into_inner();
            for fee in reply.collected_fees {
                println!("{} {} {} ({} bps)", fee.trade_id, fee.amount, fee.asset, fee.fee_bps);
            }
        }
    }

    Ok(())
}

async fn operator(
    rpc_addr: String,
) -> Result<OperatorServiceClient<tonic::transport::Channel>> {
    OperatorServiceClient::connect(rpc_addr)
        .await
        .context("connect operator service")
}
