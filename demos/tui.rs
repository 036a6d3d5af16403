//! Simple TUI example for nostr-frontier

use nostr_frontier::protocol::ChatScope;
use nostr_frontier::{Frontier, FrontierEvent, StructurePermissions, WorldConfig};
use std::io::{self, Write};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("nostr-frontier TUI Example");
    println!("==========================\n");

    let config = WorldConfig::new("tui-example")
        .region_size(500.0)
        .view_radius(750.0);

    let frontier = Frontier::new(config).await?;

    println!("Connecting to relays...");
    frontier.connect().await?;
    println!("Connected! Public key: {}\n", frontier.public_key());

    frontier.enter_world(5000.0, 5000.0).await?;

    println!("Commands:");
    println!("  m <dx> <dy> - Move");
    println!("  b - Build a cabin here");
    println!("  c <name> - Claim this region");
    println!("  s <message> - Chat (global)");
    println!("  g <name> - Create guild");
    println!("  p - List nearby players");
    println!("  q - Quit\n");

    loop {
        // Check for events
        while let Some(event) = frontier.try_recv().await {
            match event {
                FrontierEvent::WorldSynced => {
                    println!("[Event] World state replayed");
                }
                FrontierEvent::PlayerAppeared { pubkey, position } => {
                    println!(
                        "[Event] {} appeared at ({:.0}, {:.0})",
                        &pubkey[..8],
                        position.x,
                        position.y
                    );
                }
                FrontierEvent::PlayerLeft(pubkey) => {
                    println!("[Event] {} left", &pubkey[..8]);
                }
                FrontierEvent::StructurePlaced { region_id, structure } => {
                    println!("[Event] {} built in {}", structure.kind, region_id);
                }
                FrontierEvent::RegionClaimed(claim) => {
                    println!("[Event] {} claimed as \"{}\"", claim.region_id, claim.name);
                }
                FrontierEvent::TradeOffered(trade) => {
                    println!("[Event] Trade offer: {}", trade.trade_id);
                }
                FrontierEvent::Chat { sender, text, .. } => {
                    println!("[Chat] {}: {}", &sender[..8], text);
                }
                FrontierEvent::Notice(msg) => {
                    println!("[Notice] {}", msg);
                }
                _ => {}
            }
        }

        // Read input
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.splitn(2, ' ').collect();
        let cmd = parts[0];
        let arg = parts.get(1).copied().unwrap_or("");

        match cmd {
            "m" => {
                let mut nums = arg.split_whitespace().filter_map(|s| s.parse::<f64>().ok());
                match (nums.next(), nums.next()) {
                    (Some(dx), Some(dy)) => match frontier.move_player(dx, dy, 1.0).await {
                        Ok(outcome) => {
                            println!(
                                "Moved to ({:.0}, {:.0})",
                                outcome.position.x, outcome.position.y
                            );
                            if let Some((old, new)) = outcome.region_changed {
                                println!("Crossed {} -> {}", old, new);
                            }
                        }
                        Err(e) => println!("Failed to move: {}", e),
                    },
                    _ => println!("Usage: m <dx> <dy>"),
                }
            }
            "b" => {
                let pos = frontier.local_player().await.position;
                match frontier
                    .place_structure("cabin", pos.x, pos.y, 10.0, 10.0, StructurePermissions::Owner)
                    .await
                {
                    Ok(structure) => println!("Built {}", structure.id),
                    Err(e) => println!("Failed to build: {}", e),
                }
            }
            "c" => {
                if arg.is_empty() {
                    println!("Usage: c <name>");
                    continue;
                }
                match frontier.claim_region(arg).await {
                    Ok(claim) => println!("Claimed {} as \"{}\"", claim.region_id, claim.name),
                    Err(e) => println!("Failed to claim: {}", e),
                }
            }
            "s" => {
                match frontier.send_chat(ChatScope::Global, arg).await {
                    Ok(()) => println!("Sent"),
                    Err(e) => println!("Failed to send: {}", e),
                }
            }
            "g" => {
                if arg.is_empty() {
                    println!("Usage: g <name>");
                    continue;
                }
                match frontier.create_guild(arg).await {
                    Ok(guild_id) => println!("Guild created: {}", guild_id),
                    Err(e) => println!("Failed to create guild: {}", e),
                }
            }
            "p" => {
                let remotes = frontier.remote_players().await;
                if remotes.is_empty() {
                    println!("Nobody around");
                } else {
                    for remote in remotes {
                        println!(
                            "  {} at ({:.0}, {:.0})",
                            &remote.pubkey[..8],
                            remote.position.x,
                            remote.position.y
                        );
                    }
                }
            }
            "q" => {
                println!("Goodbye!");
                break;
            }
            _ => {
                println!("Unknown command: {}", cmd);
            }
        }
    }

    frontier.leave_world().await?;
    frontier.disconnect().await?;
    Ok(())
}
