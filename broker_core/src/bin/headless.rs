use std::io::{self, BufRead};

use tracing::{info, warn};

use broker_core::collaborators::{MemoryLedger, RecordingAcquisition};
use broker_core::{
    accept_premium_offer, build_headless_app, cancel_search, decline_premium_offer,
    purchase_listing, run_hours, submit_search, AcquisitionHandle, CeilingRegistry, ClientId,
    ItemRef, LedgerHandle, MarketMetrics, SearchId, SearchRequest,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = build_headless_app();
    app.insert_resource(LedgerHandle(Box::new(MemoryLedger::default())));
    app.insert_resource(AcquisitionHandle(Box::new(RecordingAcquisition::default())));

    info!("brokerage headless server ready; commands on stdin");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("stdin read error: {}", err);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_command(trimmed) {
            Some(Command::Quit) => break,
            Some(command) => apply_command(&mut app, command),
            None => warn!("invalid command: {}", trimmed),
        }
    }
}

#[derive(Debug)]
enum Command {
    Deposit {
        client: ClientId,
        amount: i64,
    },
    Submit {
        client: ClientId,
        tier: String,
        band: String,
        catalog_key: String,
        base_price: i64,
    },
    Cancel {
        id: SearchId,
    },
    Buy {
        id: SearchId,
    },
    Ceiling {
        client: ClientId,
        conditions: Vec<f32>,
    },
    Accept {
        client: ClientId,
    },
    Decline {
        client: ClientId,
    },
    Tick {
        hours: u64,
    },
    Status,
    Quit,
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "deposit" => {
            let client: u32 = parts.next()?.parse().ok()?;
            let amount: i64 = parts.next()?.parse().ok()?;
            Some(Command::Deposit {
                client: ClientId(client),
                amount,
            })
        }
        "submit" => {
            let client: u32 = parts.next()?.parse().ok()?;
            let tier = parts.next()?.to_owned();
            let band = parts.next()?.to_owned();
            let catalog_key = parts.next()?.to_owned();
            let base_price: i64 = parts.next()?.parse().ok()?;
            Some(Command::Submit {
                client: ClientId(client),
                tier,
                band,
                catalog_key,
                base_price,
            })
        }
        "cancel" => {
            let id: u64 = parts.next()?.parse().ok()?;
            Some(Command::Cancel { id: SearchId(id) })
        }
        "buy" => {
            let id: u64 = parts.next()?.parse().ok()?;
            Some(Command::Buy { id: SearchId(id) })
        }
        "ceiling" => {
            let client: u32 = parts.next()?.parse().ok()?;
            let conditions: Vec<f32> = parts.filter_map(|raw| raw.parse().ok()).collect();
            Some(Command::Ceiling {
                client: ClientId(client),
                conditions,
            })
        }
        "accept" => {
            let client: u32 = parts.next()?.parse().ok()?;
            Some(Command::Accept {
                client: ClientId(client),
            })
        }
        "decline" => {
            let client: u32 = parts.next()?.parse().ok()?;
            Some(Command::Decline {
                client: ClientId(client),
            })
        }
        "tick" => {
            let hours: u64 = parts.next().unwrap_or("1").parse().ok()?;
            Some(Command::Tick { hours })
        }
        "status" => Some(Command::Status),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn apply_command(app: &mut bevy::prelude::App, command: Command) {
    match command {
        Command::Deposit { client, amount } => {
            let mut ledger = app.world.resource_mut::<LedgerHandle>();
            ledger.0.credit(client, amount);
            info!(target: "brokerage::server", %client, amount, "deposit.applied");
        }
        Command::Submit {
            client,
            tier,
            band,
            catalog_key,
            base_price,
        } => {
            let request = SearchRequest {
                client,
                item: ItemRef {
                    display_name: catalog_key.clone(),
                    catalog_key,
                    base_price,
                },
                tier,
                band,
                requested_configs: Default::default(),
            };
            match submit_search(&mut app.world, request) {
                Ok(id) => info!(target: "brokerage::server", search = %id, "submit.accepted"),
                Err(err) => warn!(target: "brokerage::server", %err, "submit.rejected"),
            }
        }
        Command::Cancel { id } => match cancel_search(&mut app.world, id) {
            Ok(()) => info!(target: "brokerage::server", search = %id, "cancel.applied"),
            Err(err) => warn!(target: "brokerage::server", search = %id, %err, "cancel.rejected"),
        },
        Command::Buy { id } => match purchase_listing(&mut app.world, id) {
            Ok(listing) => info!(
                target: "brokerage::server",
                search = %id,
                price = listing.price,
                "purchase.completed"
            ),
            Err(err) => warn!(target: "brokerage::server", search = %id, %err, "purchase.rejected"),
        },
        Command::Ceiling { client, conditions } => {
            app.world
                .resource_mut::<CeilingRegistry>()
                .set_owned(client, conditions);
            info!(target: "brokerage::server", %client, "ceiling.updated");
        }
        Command::Accept { client } => match accept_premium_offer(&mut app.world, client) {
            Ok(()) => info!(target: "brokerage::server", %client, "offer.accepted"),
            Err(err) => warn!(target: "brokerage::server", %client, %err, "offer.rejected"),
        },
        Command::Decline { client } => {
            decline_premium_offer(&app.world, client);
        }
        Command::Tick { hours } => {
            run_hours(app, hours);
            let metrics = app.world.resource::<MarketMetrics>();
            info!(
                target: "brokerage::server",
                day = metrics.day,
                hour = metrics.hours,
                active = metrics.active_searches,
                listings = metrics.open_listings,
                "tick.completed"
            );
        }
        Command::Status => {
            let metrics = app.world.resource::<MarketMetrics>().clone();
            info!(
                target: "brokerage::server",
                day = metrics.day,
                active = metrics.active_searches,
                listings = metrics.open_listings,
                submitted = metrics.searches_submitted,
                succeeded = metrics.searches_succeeded,
                failed = metrics.searches_failed,
                delivered = metrics.deliveries,
                premium_offers = metrics.premium_offers_triggered,
                "status"
            );
        }
        Command::Quit => {}
    }
}
