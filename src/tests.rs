//! Unit tests for nostr-frontier

#[cfg(test)]
mod tests {
    use crate::error::FrontierError;
    use crate::player::PlayerSync;
    use crate::protocol::{self, GamePayload, TradeAction, TradePayload, kinds};
    use crate::quest::{QuestOutcome, QuestTracker};
    use crate::region::{RegionMap, region_for, visible_regions};
    use crate::trade::{TradeBook, TradeEffect};
    use crate::types::*;
    use crate::world::World;
    use nostr_sdk::{EventBuilder, Keys, Kind};

    const WORLD: f64 = 10_000.0;
    const REGION: f64 = 500.0;

    fn sync(pubkey: &str) -> PlayerSync {
        PlayerSync::new(pubkey.to_string(), WORLD, REGION, 120.0, 1500, 30_000)
    }

    fn item(template: &str, instance: &str) -> Item {
        Item {
            template_id: template.to_string(),
            instance_id: instance.to_string(),
            rarity: Rarity::Common,
            quantity: 1,
        }
    }

    fn structure(id: &str, owner: &str, x: f64, y: f64, w: f64, h: f64) -> Structure {
        Structure {
            id: id.to_string(),
            owner_pubkey: owner.to_string(),
            kind: "cabin".to_string(),
            position: Position::new(x, y),
            width: w,
            height: h,
            health: 100,
            permissions: StructurePermissions::Owner,
        }
    }

    #[test]
    fn test_world_config_defaults() {
        let config = WorldConfig::new("test-world");
        assert_eq!(config.game_id, "test-world");
        assert_eq!(config.region_size, 500.0);
        assert_eq!(config.world_size, 10_000.0);
        assert_eq!(config.position_broadcast_interval, 1500);
        assert_eq!(config.heartbeat_interval, 10_000);
        assert_eq!(config.inactivity_timeout, 30_000);
    }

    #[test]
    fn test_world_config_builder() {
        let config = WorldConfig::new("test-world")
            .region_size(250.0)
            .view_radius(400.0)
            .move_speed(60.0)
            .claim_duration(3600);

        assert_eq!(config.region_size, 250.0);
        assert_eq!(config.view_radius, 400.0);
        assert_eq!(config.move_speed, 60.0);
        assert_eq!(config.claim_duration, 3600);
    }

    #[test]
    fn test_kind_taxonomy_is_distinct() {
        let all = protocol::supported_kinds();
        let unique: std::collections::HashSet<u16> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_region_for_deterministic_and_total() {
        // Same cell, same id
        assert_eq!(region_for(0.0, 0.0, WORLD, REGION), "0:0");
        assert_eq!(region_for(499.9, 499.9, WORLD, REGION), "0:0");
        assert_eq!(region_for(500.0, 0.0, WORLD, REGION), "1:0");
        assert_eq!(region_for(501.0, 10.0, WORLD, REGION), "1:0");
        assert_eq!(region_for(4200.0, 1337.0, WORLD, REGION), "8:2");

        // Total: out-of-range input clamps to an edge cell
        assert_eq!(region_for(-50.0, -50.0, WORLD, REGION), "0:0");
        assert_eq!(region_for(WORLD, WORLD, WORLD, REGION), "19:19");
        assert_eq!(region_for(WORLD + 1.0, 0.0, WORLD, REGION), "19:0");
    }

    #[test]
    fn test_visible_regions_cover_radius() {
        let visible = visible_regions(750.0, 750.0, 750.0, WORLD, REGION);
        // Square from (0, 0) to (1500, 1500): cells 0..=3 on both axes
        assert_eq!(visible.len(), 16);
        assert!(visible.contains(&"0:0".to_string()));
        assert!(visible.contains(&"3:3".to_string()));
        assert!(!visible.contains(&"4:0".to_string()));

        // A corner position never yields cells outside the world
        let corner = visible_regions(0.0, 0.0, 750.0, WORLD, REGION);
        assert!(corner.iter().all(|id| !id.contains('-')));
    }

    #[test]
    fn test_encode_decode_reproduces_payload_and_tags() {
        let keys = Keys::generate();
        let cases = vec![
            (
                GamePayload::Position(protocol::PositionPayload {
                    x: 42.0,
                    y: 99.5,
                    ts: 123_456,
                }),
                Some("0:0"),
                None,
            ),
            (
                GamePayload::Structure(protocol::StructurePayload::Place {
                    structure: structure("s1", &keys.public_key().to_hex(), 10.0, 10.0, 4.0, 4.0),
                }),
                Some("0:0"),
                None,
            ),
            (
                GamePayload::Trade(TradePayload {
                    trade_id: "t-1".to_string(),
                    recipient_pubkey: "bob".to_string(),
                    action: TradeAction::Offer,
                    offered_items: vec![item("wood", "wood-1")],
                    requested_items: vec![item("stone", "stone-1")],
                }),
                None,
                Some("bob"),
            ),
            (
                GamePayload::LandClaim(protocol::LandClaimPayload {
                    region_id: "3:4".to_string(),
                    name: "Homestead".to_string(),
                    expires_at: 2_000_000_000,
                }),
                Some("3:4"),
                None,
            ),
            (
                GamePayload::Chat(protocol::ChatPayload {
                    scope: protocol::ChatScope::Guild,
                    guild_id: Some("g-1".to_string()),
                    text: "hello".to_string(),
                }),
                None,
                None,
            ),
            (
                GamePayload::Stats(protocol::StatsPayload {
                    stats: PlayerStats {
                        trades_completed: 1,
                        resources_gathered: 2,
                        structures_built: 3,
                    },
                    profile: Some(PlayerProfile {
                        name: "alice".to_string(),
                        avatar: None,
                    }),
                }),
                None,
                None,
            ),
            (
                GamePayload::Inventory(protocol::InventoryPayload {
                    items: vec![item("wood", "wood-7")],
                }),
                None,
                None,
            ),
            (
                GamePayload::ResourceNode(protocol::ResourceNodePayload {
                    node: ResourceNode {
                        id: "n-1".to_string(),
                        kind: "iron".to_string(),
                        position: Position::new(77.0, 88.0),
                        remaining: 12,
                    },
                }),
                Some("0:0"),
                None,
            ),
            (
                GamePayload::ResourceCollection(protocol::ResourceCollectionPayload {
                    node_id: "n-1".to_string(),
                    amount: 3,
                }),
                Some("0:0"),
                None,
            ),
            (
                GamePayload::GuildCreation(protocol::GuildCreationPayload {
                    guild_id: "g-1".to_string(),
                    name: "Pioneers".to_string(),
                }),
                None,
                None,
            ),
            (
                GamePayload::GuildInvite(protocol::GuildInvitePayload {
                    guild_id: "g-1".to_string(),
                    invitee_pubkey: "bob".to_string(),
                }),
                None,
                Some("bob"),
            ),
            (
                GamePayload::GuildJoin(protocol::GuildJoinPayload {
                    guild_id: "g-1".to_string(),
                }),
                None,
                None,
            ),
            (
                GamePayload::GuildRank(protocol::GuildRankPayload {
                    guild_id: "g-1".to_string(),
                    member_pubkey: "bob".to_string(),
                    rank: GuildRank::Officer,
                }),
                None,
                Some("bob"),
            ),
            (
                GamePayload::GuildAlliance(protocol::GuildAlliancePayload {
                    guild_id: "g-1".to_string(),
                    other_guild_id: "g-2".to_string(),
                    action: protocol::AllianceAction::Propose,
                }),
                None,
                None,
            ),
            (
                GamePayload::Quest(protocol::QuestProgressPayload {
                    quest_id: "gather-wood".to_string(),
                    counter: 4,
                    target: 10,
                }),
                None,
                None,
            ),
        ];

        for (payload, region, recipient) in cases {
            let envelope =
                protocol::encode_event(&payload, "test-world", region, recipient).unwrap();
            let event = EventBuilder::new(Kind::Custom(envelope.kind), envelope.content)
                .tags(envelope.tags)
                .sign_with_keys(&keys)
                .unwrap();

            let decoded = protocol::decode_event(&event).unwrap();
            assert_eq!(decoded.payload, payload);
            assert_eq!(decoded.game.as_deref(), Some("test-world"));
            assert_eq!(decoded.region.as_deref(), region);
            assert_eq!(decoded.recipient.as_deref(), recipient);
        }
    }

    #[test]
    fn test_decode_unknown_kind_is_protocol_error() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::Custom(1), "{}")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(matches!(
            protocol::decode_event(&event),
            Err(FrontierError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_malformed_json_is_protocol_error() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::Custom(kinds::TRADE_ACTION), "not json")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(matches!(
            protocol::decode_event(&event),
            Err(FrontierError::Protocol(_))
        ));
    }

    #[test]
    fn test_remote_position_last_write_wins() {
        let mut players = sync("me");
        let mut regions = RegionMap::new();

        // t2 delivered first, then the stale t1
        players
            .on_remote_position(&mut regions, "alice", 200.0, 200.0, 2000, 10)
            .unwrap();
        let stale = players.on_remote_position(&mut regions, "alice", 100.0, 100.0, 1000, 20);
        assert!(stale.is_none());

        let remote = players.remote("alice").unwrap();
        assert_eq!(remote.position, Position::new(200.0, 200.0));
    }

    #[test]
    fn test_remote_position_out_of_bounds_dropped() {
        let mut players = sync("me");
        let mut regions = RegionMap::new();
        let dropped = players.on_remote_position(&mut regions, "alice", -5.0, 20.0, 1000, 10);
        assert!(dropped.is_none());
        assert!(players.remote("alice").is_none());
    }

    #[test]
    fn test_region_transition_moves_player_between_sets() {
        let mut players = sync("me");
        let mut regions = RegionMap::new();

        players
            .on_remote_position(&mut regions, "alice", 0.0, 0.0, 1000, 10)
            .unwrap();
        assert!(regions.region("0:0").unwrap().players.contains("alice"));

        players
            .on_remote_position(&mut regions, "alice", 501.0, 10.0, 2000, 20)
            .unwrap();
        assert!(!regions.region("0:0").unwrap().players.contains("alice"));
        assert!(regions.region("1:0").unwrap().players.contains("alice"));
    }

    #[test]
    fn test_local_movement_broadcast_throttle() {
        let mut players = sync("me");
        let mut regions = RegionMap::new();
        players.spawn_local(&mut regions, 100.0, 100.0);

        // First step broadcasts, the immediate second one is throttled
        let first = players.update_local_movement(&mut regions, 1.0, 0.0, 0.016, 10_000);
        assert!(first.broadcast);
        let second = players.update_local_movement(&mut regions, 1.0, 0.0, 0.016, 10_100);
        assert!(!second.broadcast);
        // Past the interval it broadcasts again
        let third = players.update_local_movement(&mut regions, 1.0, 0.0, 0.016, 11_600);
        assert!(third.broadcast);
    }

    #[test]
    fn test_local_movement_region_change_broadcasts_immediately() {
        let mut players = sync("me");
        let mut regions = RegionMap::new();
        players.spawn_local(&mut regions, 498.0, 10.0);

        let first = players.update_local_movement(&mut regions, 1.0, 0.0, 0.016, 10_000);
        assert!(first.broadcast);

        // Crossing into "1:0" right after: throttle is bypassed
        let crossing = players.update_local_movement(&mut regions, 1.0, 0.0, 0.05, 10_050);
        let (old, new) = crossing.region_changed.expect("should cross the boundary");
        assert_eq!(old, "0:0");
        assert_eq!(new, "1:0");
        assert!(crossing.broadcast);
        assert!(!regions.region("0:0").unwrap().players.contains("me"));
        assert!(regions.region("1:0").unwrap().players.contains("me"));
    }

    #[test]
    fn test_local_movement_clamped_to_world_bounds() {
        let mut players = sync("me");
        let mut regions = RegionMap::new();
        players.spawn_local(&mut regions, 10.0, 10.0);
        players.update_local_movement(&mut regions, -1.0, -1.0, 100.0, 10_000);
        let pos = players.local().position;
        assert_eq!(pos, Position::new(0.0, 0.0));
    }

    #[test]
    fn test_inactivity_eviction() {
        let mut players = sync("me");
        let mut regions = RegionMap::new();
        players
            .on_remote_position(&mut regions, "alice", 10.0, 10.0, 1000, 1_000)
            .unwrap();
        players
            .on_remote_position(&mut regions, "bob", 20.0, 20.0, 1000, 25_000)
            .unwrap();

        let evicted = players.reconcile_inactivity(&mut regions, 40_000);
        assert_eq!(evicted, vec!["alice".to_string()]);
        assert!(players.remote("alice").is_none());
        assert!(players.remote("bob").is_some());
        assert!(!regions.region("0:0").unwrap().players.contains("alice"));
    }

    #[test]
    fn test_structure_conflict_earlier_created_at_wins() {
        let mut world = World::new(WORLD, REGION);
        let mut regions = RegionMap::new();

        let first = structure("s-first", "alice", 100.0, 100.0, 10.0, 10.0);
        let second = structure("s-second", "bob", 105.0, 105.0, 10.0, 10.0);

        world
            .apply_structure_event(
                &mut regions,
                protocol::StructurePayload::Place { structure: first },
                "alice",
                100,
                "aa",
            )
            .unwrap();

        let rejected = world.apply_structure_event(
            &mut regions,
            protocol::StructurePayload::Place { structure: second },
            "bob",
            101,
            "bb",
        );
        assert!(matches!(rejected, Err(FrontierError::Consistency(_))));

        let region = regions.region("0:0").unwrap();
        assert!(region.structures.contains_key("s-first"));
        assert!(!region.structures.contains_key("s-second"));
    }

    #[test]
    fn test_structure_conflict_out_of_order_evicts_later_placement() {
        let mut world = World::new(WORLD, REGION);
        let mut regions = RegionMap::new();

        // The created_at=101 placement arrives first...
        world
            .apply_structure_event(
                &mut regions,
                protocol::StructurePayload::Place {
                    structure: structure("s-late", "bob", 105.0, 105.0, 10.0, 10.0),
                },
                "bob",
                101,
                "bb",
            )
            .unwrap();

        // ...then the created_at=100 one; the older event wins occupancy.
        world
            .apply_structure_event(
                &mut regions,
                protocol::StructurePayload::Place {
                    structure: structure("s-early", "alice", 100.0, 100.0, 10.0, 10.0),
                },
                "alice",
                100,
                "aa",
            )
            .unwrap();

        let region = regions.region("0:0").unwrap();
        assert!(region.structures.contains_key("s-early"));
        assert!(!region.structures.contains_key("s-late"));
    }

    #[test]
    fn test_structure_update_requires_permission() {
        let mut world = World::new(WORLD, REGION);
        let mut regions = RegionMap::new();
        world
            .apply_structure_event(
                &mut regions,
                protocol::StructurePayload::Place {
                    structure: structure("s1", "alice", 50.0, 50.0, 5.0, 5.0),
                },
                "alice",
                100,
                "aa",
            )
            .unwrap();

        let denied = world.apply_structure_event(
            &mut regions,
            protocol::StructurePayload::Remove {
                id: "s1".to_string(),
            },
            "mallory",
            101,
            "bb",
        );
        assert!(matches!(denied, Err(FrontierError::NotAuthorized(_))));
        assert!(regions.region("0:0").unwrap().structures.contains_key("s1"));
    }

    #[test]
    fn test_resource_collection_depletes_node() {
        let mut world = World::new(WORLD, REGION);
        let mut regions = RegionMap::new();
        world
            .apply_resource_event(
                &mut regions,
                protocol::ResourceNodePayload {
                    node: ResourceNode {
                        id: "n1".to_string(),
                        kind: "wood".to_string(),
                        position: Position::new(30.0, 30.0),
                        remaining: 5,
                    },
                },
            )
            .unwrap();

        world
            .apply_collection_event(
                &mut regions,
                protocol::ResourceCollectionPayload {
                    node_id: "n1".to_string(),
                    amount: 3,
                },
            )
            .unwrap();
        assert_eq!(
            regions.region("0:0").unwrap().resources["n1"].remaining,
            2
        );

        world
            .apply_collection_event(
                &mut regions,
                protocol::ResourceCollectionPayload {
                    node_id: "n1".to_string(),
                    amount: 9,
                },
            )
            .unwrap();
        assert!(!regions.region("0:0").unwrap().resources.contains_key("n1"));
    }

    #[test]
    fn test_expired_claim_absent_after_tick_and_tick_is_idempotent() {
        let mut world = World::new(WORLD, REGION);
        let mut regions = RegionMap::new();
        let now = 1_000_000;

        world
            .apply_land_claim_event(
                &mut regions,
                protocol::LandClaimPayload {
                    region_id: "2:2".to_string(),
                    name: "Outpost".to_string(),
                    expires_at: now - 1,
                },
                "alice",
                now - 100,
                "aa",
                now - 100,
            )
            .unwrap();
        assert!(world.is_region_claimed(&regions, "2:2", now - 50));

        let expired = world.tick(&mut regions, now);
        assert_eq!(expired.len(), 1);
        assert!(!world.is_region_claimed(&regions, "2:2", now));

        // No time advance: nothing further changes
        let again = world.tick(&mut regions, now);
        assert!(again.is_empty());
    }

    #[test]
    fn test_live_claim_rejects_other_owner_and_renews_for_same() {
        let mut world = World::new(WORLD, REGION);
        let mut regions = RegionMap::new();
        let now = 1_000;

        world
            .apply_land_claim_event(
                &mut regions,
                protocol::LandClaimPayload {
                    region_id: "1:1".to_string(),
                    name: "Keep".to_string(),
                    expires_at: now + 100,
                },
                "alice",
                now,
                "aa",
                now,
            )
            .unwrap();

        let rejected = world.apply_land_claim_event(
            &mut regions,
            protocol::LandClaimPayload {
                region_id: "1:1".to_string(),
                name: "Invasion".to_string(),
                expires_at: now + 500,
            },
            "bob",
            now + 10,
            "bb",
            now + 10,
        );
        assert!(matches!(rejected, Err(FrontierError::Consistency(_))));

        world
            .apply_land_claim_event(
                &mut regions,
                protocol::LandClaimPayload {
                    region_id: "1:1".to_string(),
                    name: "Keep".to_string(),
                    expires_at: now + 900,
                },
                "alice",
                now + 20,
                "cc",
                now + 20,
            )
            .unwrap();
        let claim = regions.claim("1:1").unwrap();
        assert_eq!(claim.owner_pubkey, "alice");
        assert_eq!(claim.expires_at, now + 900);
    }

    #[test]
    fn test_trade_accept_requires_prior_negotiation() {
        let mut book = TradeBook::new("me".to_string());
        let accept = TradePayload {
            trade_id: "ghost".to_string(),
            recipient_pubkey: "me".to_string(),
            action: TradeAction::Accept,
            offered_items: vec![],
            requested_items: vec![],
        };
        assert!(matches!(
            book.apply_event(&accept, "alice", 100),
            Err(FrontierError::UnknownTrade(_))
        ));
    }

    #[test]
    fn test_trade_accept_only_from_countered() {
        let mut book = TradeBook::new("carol".to_string());
        let offer = TradePayload {
            trade_id: "t-1".to_string(),
            recipient_pubkey: "bob".to_string(),
            action: TradeAction::Offer,
            offered_items: vec![item("wood", "wood-1")],
            requested_items: vec![item("stone", "stone-1")],
        };
        book.apply_event(&offer, "alice", 100).unwrap();

        // Straight from Offered: invalid
        let premature = TradePayload {
            trade_id: "t-1".to_string(),
            recipient_pubkey: "bob".to_string(),
            action: TradeAction::Accept,
            offered_items: vec![],
            requested_items: vec![],
        };
        assert!(matches!(
            book.apply_event(&premature, "alice", 101),
            Err(FrontierError::Consistency(_))
        ));

        // Counter by the recipient, then accept by the offerer
        let counter = TradePayload {
            trade_id: "t-1".to_string(),
            recipient_pubkey: "alice".to_string(),
            action: TradeAction::Counter,
            offered_items: vec![item("wood", "wood-1")],
            requested_items: vec![item("stone", "stone-1"), item("stone", "stone-2")],
        };
        book.apply_event(&counter, "bob", 102).unwrap();

        let effect = book.apply_event(&premature, "alice", 103).unwrap();
        assert!(matches!(effect, Some(TradeEffect::Finalized(_))));
        assert_eq!(book.get("t-1").unwrap().status, TradeStatus::Accepted);

        // Duplicate delivery of the accept is a no-op
        let dup = book.apply_event(&premature, "alice", 104).unwrap();
        assert!(dup.is_none());
    }

    #[test]
    fn test_trade_counter_rejected_from_non_recipient() {
        let mut book = TradeBook::new("carol".to_string());
        let offer = TradePayload {
            trade_id: "t-2".to_string(),
            recipient_pubkey: "bob".to_string(),
            action: TradeAction::Offer,
            offered_items: vec![],
            requested_items: vec![],
        };
        book.apply_event(&offer, "alice", 100).unwrap();

        let counter = TradePayload {
            trade_id: "t-2".to_string(),
            recipient_pubkey: "alice".to_string(),
            action: TradeAction::Counter,
            offered_items: vec![],
            requested_items: vec![],
        };
        assert!(matches!(
            book.apply_event(&counter, "mallory", 101),
            Err(FrontierError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_trade_obligation_and_inventory_movement() {
        let mut players = sync("me");
        players.add_item(item("wood", "wood-1"));
        players.add_item(item("wood", "wood-2"));

        let book = TradeBook::new("me".to_string());
        let trade = Trade {
            trade_id: "t-3".to_string(),
            sender_pubkey: "me".to_string(),
            recipient_pubkey: "bob".to_string(),
            offered_items: vec![item("wood", "wood-1")],
            requested_items: vec![item("stone", "stone-1")],
            status: TradeStatus::Countered,
            updated_at: 0,
        };

        let obligation = book.local_obligation(&trade);
        assert!(players.holds_all(obligation));
        let taken = players.take_items(obligation).unwrap();
        assert_eq!(taken.len(), 1);
        assert!(!players.holds_all(obligation));
        for entitled in book.local_entitlement(&trade) {
            players.add_item(entitled.clone());
        }
        assert!(players.holds_all(&[item("stone", "stone-1")]));
        assert_eq!(players.local().inventory.len(), 2);
    }

    #[test]
    fn test_take_items_missing_instance_leaves_inventory_untouched() {
        let mut players = sync("me");
        players.add_item(item("wood", "wood-1"));
        let missing = [item("wood", "wood-1"), item("iron", "iron-9")];
        assert!(players.take_items(&missing).is_none());
        assert_eq!(players.local().inventory.len(), 1);
    }

    #[test]
    fn test_guild_join_requires_observed_invite() {
        let mut registry = crate::guild::GuildRegistry::new("me".to_string());
        registry.apply_creation(
            &protocol::GuildCreationPayload {
                guild_id: "g-1".to_string(),
                name: "Pioneers".to_string(),
            },
            "alice",
        );

        // Join with no invite observed: rejected, members unchanged
        let join = protocol::GuildJoinPayload {
            guild_id: "g-1".to_string(),
        };
        assert!(matches!(
            registry.apply_join(&join, "bob"),
            Err(FrontierError::NotAuthorized(_))
        ));
        assert!(!registry.guild("g-1").unwrap().members.contains("bob"));

        registry
            .apply_invite(
                &protocol::GuildInvitePayload {
                    guild_id: "g-1".to_string(),
                    invitee_pubkey: "bob".to_string(),
                },
                "alice",
            )
            .unwrap();
        registry.apply_join(&join, "bob").unwrap();
        assert!(registry.guild("g-1").unwrap().members.contains("bob"));
    }

    #[test]
    fn test_rank_update_rejected_from_non_leader() {
        let mut registry = crate::guild::GuildRegistry::new("me".to_string());
        registry.apply_creation(
            &protocol::GuildCreationPayload {
                guild_id: "g-2".to_string(),
                name: "Miners".to_string(),
            },
            "alice",
        );
        registry
            .apply_invite(
                &protocol::GuildInvitePayload {
                    guild_id: "g-2".to_string(),
                    invitee_pubkey: "bob".to_string(),
                },
                "alice",
            )
            .unwrap();
        registry
            .apply_join(
                &protocol::GuildJoinPayload {
                    guild_id: "g-2".to_string(),
                },
                "bob",
            )
            .unwrap();

        let update = protocol::GuildRankPayload {
            guild_id: "g-2".to_string(),
            member_pubkey: "bob".to_string(),
            rank: GuildRank::Officer,
        };
        assert!(matches!(
            registry.apply_rank_update(&update, "bob"),
            Err(FrontierError::NotAuthorized(_))
        ));

        registry.apply_rank_update(&update, "alice").unwrap();
        assert_eq!(
            registry.guild("g-2").unwrap().ranks["bob"],
            GuildRank::Officer
        );
    }

    #[test]
    fn test_alliance_requires_matching_leaders() {
        let mut registry = crate::guild::GuildRegistry::new("me".to_string());
        registry.apply_creation(
            &protocol::GuildCreationPayload {
                guild_id: "g-a".to_string(),
                name: "A".to_string(),
            },
            "alice",
        );
        registry.apply_creation(
            &protocol::GuildCreationPayload {
                guild_id: "g-b".to_string(),
                name: "B".to_string(),
            },
            "bob",
        );

        // Proposal from a non-leader is rejected
        let bogus = protocol::GuildAlliancePayload {
            guild_id: "g-a".to_string(),
            other_guild_id: "g-b".to_string(),
            action: protocol::AllianceAction::Propose,
        };
        assert!(matches!(
            registry.apply_alliance(&bogus, "mallory"),
            Err(FrontierError::NotAuthorized(_))
        ));

        // Acceptance without a recorded proposal is rejected
        let accept = protocol::GuildAlliancePayload {
            guild_id: "g-b".to_string(),
            other_guild_id: "g-a".to_string(),
            action: protocol::AllianceAction::Accept,
        };
        assert!(matches!(
            registry.apply_alliance(&accept, "bob"),
            Err(FrontierError::Consistency(_))
        ));

        registry.apply_alliance(&bogus, "alice").unwrap();
        registry.apply_alliance(&accept, "bob").unwrap();
        assert!(registry.guild("g-a").unwrap().allies.contains("g-b"));
        assert!(registry.guild("g-b").unwrap().allies.contains("g-a"));
    }

    #[test]
    fn test_quest_progress_is_monotonic_and_completes_locally() {
        let mut quests = QuestTracker::new();
        quests.track("gather-wood", 10);

        let first = quests.apply_progress(&protocol::QuestProgressPayload {
            quest_id: "gather-wood".to_string(),
            counter: 4,
            target: 10,
        });
        assert_eq!(first, QuestOutcome::Progressed);

        // Stale counter: ignored
        let stale = quests.apply_progress(&protocol::QuestProgressPayload {
            quest_id: "gather-wood".to_string(),
            counter: 2,
            target: 10,
        });
        assert_eq!(stale, QuestOutcome::Ignored);
        assert_eq!(quests.quest("gather-wood").unwrap().counter, 4);

        let done = quests.apply_progress(&protocol::QuestProgressPayload {
            quest_id: "gather-wood".to_string(),
            counter: 10,
            target: 10,
        });
        assert_eq!(done, QuestOutcome::Completed);
        assert!(quests.quest("gather-wood").unwrap().completed);
    }

    #[test]
    fn test_item_mint_is_unique_and_single_quantity() {
        let a = Item::mint("wood", Rarity::Common);
        let b = Item::mint("wood", Rarity::Common);
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(a.quantity, 1);
        assert!(a.instance_id.starts_with("wood-"));
    }

    #[test]
    fn test_structure_permissions() {
        let owner_only = StructurePermissions::Owner;
        assert!(owner_only.allows("alice", "alice"));
        assert!(!owner_only.allows("bob", "alice"));

        let public = StructurePermissions::Public;
        assert!(public.allows("bob", "alice"));

        let whitelist = StructurePermissions::Whitelist {
            pubkeys: ["bob".to_string()].into_iter().collect(),
        };
        assert!(whitelist.allows("bob", "alice"));
        assert!(!whitelist.allows("carol", "alice"));
    }

    #[test]
    fn test_reputation_derived_from_stats() {
        let stats = PlayerStats {
            trades_completed: 2,
            resources_gathered: 7,
            structures_built: 1,
        };
        assert_eq!(stats.reputation(), 32);
    }
}
