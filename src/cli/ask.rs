//! `aegis ask`: one request through the full pipeline, printed to stdout

use crate::server::{build_components, load_config, wait_for_shutdown_signal};
use aegis_core::{format_error_for_cli, InboundMessage, Outcome};
use tokio_util::sync::CancellationToken;

pub async fn run(tenant: Option<String>, text: String) -> anyhow::Result<()> {
    let config = load_config()?;
    let components = build_components(&config).await?;

    let message = match tenant {
        Some(tenant) => InboundMessage::new(tenant, text),
        None => InboundMessage::anonymous(text),
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        interrupt.cancel();
    });

    match components.pipeline.handle(&message, &cancel).await {
        Ok(outcome) => {
            println!("{}", outcome.text());
            if let Outcome::Fallback { cause, .. } = &outcome {
                eprintln!("\n{}", format_error_for_cli(cause));
            }
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(format_error_for_cli(&e))),
    }
}
