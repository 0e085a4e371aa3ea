//! Livesync client - command line entry point
//!
//! Connects to the server, loads the kinds listed in `LIVESYNC_KINDS` and
//! keeps them current until interrupted, logging a summary whenever the
//! collections change size.

use std::time::Duration;

use anyhow::Context;
use livesync_client::{ClientConfig, ClientContext, FacetField, ManagerOptions};
use livesync_shared::ObjectKind;

fn kinds_from_env() -> anyhow::Result<Vec<ObjectKind>> {
    let kinds = std::env::var("LIVESYNC_KINDS").unwrap_or_else(|_| "node".to_string());
    kinds
        .split(',')
        .map(str::trim)
        .filter(|kind| !kind.is_empty())
        .map(|kind| kind.parse::<ObjectKind>().with_context(|| format!("LIVESYNC_KINDS: {}", kind)))
        .collect()
}

fn facets_from_env() -> Vec<FacetField> {
    std::env::var("LIVESYNC_FACETS")
        .unwrap_or_else(|_| "status".to_string())
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(FacetField::new)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("livesync_client=debug")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let kinds = kinds_from_env()?;
    let facets = facets_from_env();
    tracing::info!("connecting to {}", config.websocket_url()?);

    let context = ClientContext::new(config);
    context.connect().await?;

    let mut managers = Vec::new();
    for kind in kinds {
        let mut options = ManagerOptions::new(kind)
            .with_pk_field(kind.default_pk_field())
            .with_auto_reload(true);
        for facet in &facets {
            options = options.with_facet(facet.clone());
        }
        let manager = context.manager_with(options);
        let items = manager.load_items().await?;
        tracing::info!("loaded {} {} items", items.len(), kind);
        managers.push((manager, items.len()));
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (manager, last) in managers.iter_mut() {
                    let len = manager.len();
                    if len == *last {
                        continue;
                    }
                    *last = len;
                    tracing::info!("{}: {} items", manager.kind(), len);
                    for (field, entries) in manager.facets().iter() {
                        let summary: Vec<String> = entries
                            .iter()
                            .map(|entry| format!("{}={}", entry.value, entry.count))
                            .collect();
                        tracing::info!("  {}: {}", field, summary.join(", "));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    context.shutdown();
    Ok(())
}
