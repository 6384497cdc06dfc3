use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use serde_json::json;

use chime_client::ConnectOptions;
use chime_core::config::EnvConfig;
use chime_core::{Account, Message, Transfer};
use chime_factory::{FactoryOptions, PluginFactory};
use chime_telemetry::TelemetryConfig;

/// Exercise a ledger end to end: connect a plugin factory, move a transfer
/// and a message between two managed accounts, and wait for the routed
/// events to come back on the notification stream.
#[derive(Debug, Parser)]
#[command(name = "chime", version)]
struct Args {
    /// Transfer amount, as a decimal string.
    #[arg(long, default_value = "1")]
    amount: String,

    /// Per-request timeout for ledger calls, in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// How long to wait for each routed event, in seconds.
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,

    /// Emit JSON logs.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    chime_telemetry::init_telemetry(&TelemetryConfig {
        json: args.json,
        ..TelemetryConfig::default()
    });

    let config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let admin = Account {
        uri: config.base_uri.clone(),
        username: config.admin_username.clone(),
        password: config.admin_password.clone(),
        prefix: config.prefix.clone(),
    };
    let factory = PluginFactory::new(FactoryOptions {
        admin,
        connect: ConnectOptions {
            request_timeout: Duration::from_secs(args.timeout_secs),
        },
    });

    factory.connect().await?;
    tracing::info!(prefix = %config.prefix, "factory connected");

    let sender = factory.create(&config.account_1).await?;
    let receiver = factory.create(&config.account_2).await?;
    let mut transfers = receiver.subscribe_transfers();
    let mut messages = receiver.subscribe_messages();

    let wait = Duration::from_secs(args.wait_secs);

    let transfer = Transfer::new(
        receiver.address(),
        args.amount.clone(),
        Utc::now() + chrono::Duration::seconds(10),
    );
    let transfer_id = transfer.id;
    sender.send_transfer(transfer).await?;

    let routed = tokio::time::timeout(wait, async {
        loop {
            let t = transfers.recv().await?;
            if t.id == transfer_id {
                return anyhow::Ok(t);
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for the routed transfer"))??;
    tracing::info!(id = %routed.id, amount = %routed.amount, "transfer routed to receiver");

    let message = Message::new(
        config.prefix.clone(),
        receiver.address(),
        json!({ "sent_at": Utc::now().to_rfc3339() }),
    );
    sender.send_message(message).await?;

    let routed = tokio::time::timeout(wait, async {
        loop {
            let m = messages.recv().await?;
            if m.sender() == Some(sender.address()) {
                return anyhow::Ok(m);
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for the routed message"))??;
    tracing::info!(from = %routed.sender().unwrap_or("?"), "message routed to receiver");

    factory.disconnect().await?;
    tracing::info!("done");
    Ok(())
}
