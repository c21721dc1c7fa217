//! # Demo: one wallet session across three sandboxes
//!
//! Two pages on different origins talk to one backend hub, each
//! through its own relay bridge over in-process endpoints.
//!
//! Demonstrates:
//! - Correlated request/response calls from the page sandbox
//! - Handler errors surfacing as call rejections
//! - Allowlist-gated broadcast (only the authorized origin sees it)
//! - Origin-targeted broadcast bypassing the allowlist

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crossbus_core::mem::{page_pair, MemHubLink, MemPeerDirectory};
use crossbus_core::{EventType, HubInbound, PeerRef, RequestType};
use crossbus_hub::{BackendHub, BroadcastOptions, MemoryStores};
use crossbus_page::PageClient;
use crossbus_relay::RelayBridge;

fn separator(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {title}");
    println!("{}\n", "=".repeat(60));
}

/// Connect one page to the hub through its own relay bridge.
fn connect_page(
    directory: &MemPeerDirectory,
    hub_tx: &mpsc::UnboundedSender<HubInbound>,
    peer: PeerRef,
) -> PageClient {
    let (page, relay) = page_pair();
    let from_hub = directory.connect(peer.clone());
    let link = MemHubLink::new(peer, hub_tx.clone());
    let bridge = RelayBridge::new(Arc::new(relay.post), Arc::new(link));
    tokio::spawn(bridge.run(relay.inbound, from_hub));
    PageClient::new(Arc::new(page.post), page.inbound)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    separator("Backend: stores, directory, hub");

    let directory = MemPeerDirectory::new();
    let stores = MemoryStores::new();
    stores.authorize("https://dapp.example", "acc1");
    stores.select(Some("acc1".into()));
    println!("allowlist: https://dapp.example -> {{acc1}}, selected: acc1");

    let hub = BackendHub::new(
        Arc::new(directory.clone()),
        Arc::new(stores.clone()),
        Arc::new(stores.clone()),
    );
    let (hub_tx, hub_rx) = mpsc::unbounded_channel();
    let _pump = hub.attach(hub_rx);

    hub.handle_request(
        |m| {
            matches!(
                m,
                crossbus_core::Message::Request {
                    request_type: RequestType::GetAccounts,
                    ..
                }
            )
        },
        |_, peer, reply| {
            info!(origin = %peer.origin, "answering account list");
            reply.send(Ok(json!(["acc1", "acc2"])));
            Ok(())
        },
    );
    hub.handle_request(
        |m| {
            matches!(
                m,
                crossbus_core::Message::Request {
                    request_type: RequestType::SignPayload,
                    ..
                }
            )
        },
        |_, _, reply| {
            reply.send(Err("signing is locked".into()));
            Ok(())
        },
    );

    separator("Pages: two origins, one hub");

    let dapp = connect_page(&directory, &hub_tx, PeerRef::new(1, "https://dapp.example"));
    let other = connect_page(&directory, &hub_tx, PeerRef::new(2, "https://other.example"));

    let accounts = dapp.call(RequestType::GetAccounts, json!(null)).await?;
    println!("dapp.example call(GetAccounts)   -> {accounts}");

    match dapp.call(RequestType::SignPayload, json!({"data": "0xff"})).await {
        Ok(_) => println!("dapp.example call(SignPayload)   -> unexpectedly succeeded"),
        Err(e) => println!("dapp.example call(SignPayload)   -> rejected: {e}"),
    }

    separator("Broadcast: allowlist-gated fan-out");

    dapp.on(EventType::AccountsChanged, |payload| {
        println!("dapp.example  event AccountsChanged <- {payload}");
        Ok(())
    });
    other.on(EventType::AccountsChanged, |payload| {
        println!("other.example event AccountsChanged <- {payload}");
        Ok(())
    });

    hub.broadcast(
        EventType::AccountsChanged,
        json!(["acc1", "acc3"]),
        BroadcastOptions {
            skip_allowlist: false,
            on_excluded: Some(Box::new(|peer| {
                println!("excluded from broadcast: {} ({})", peer.origin, peer.id);
            })),
        },
    )
    .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    separator("Broadcast: origin-targeted, allowlist bypassed");

    other.on(EventType::PermissionRevoked, |payload| {
        println!("other.example event PermissionRevoked <- {payload}");
        Ok(())
    });
    hub.broadcast_to_origin(EventType::PermissionRevoked, "https://other.example", json!(null))
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\ndone.");
    Ok(())
}
