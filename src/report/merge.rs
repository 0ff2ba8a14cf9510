use std::collections::HashMap;

use super::{Actor, Fight, ReportSnapshot};

/// Merge snapshots from several reports into one virtual snapshot.
///
/// Event streams are concatenated in report-admission order and fights are
/// re-identified; pull indexes are renumbered globally per fight name while
/// preserving each report's internal pull order. Player identity across
/// reports is by name, with the first occurrence winning class/role
/// conflicts. NPCs keep per-report identity under fresh ids.
pub fn merge_snapshots(snapshots: &[ReportSnapshot]) -> ReportSnapshot {
    if snapshots.len() == 1 {
        return snapshots[0].clone();
    }

    let mut actors: HashMap<i64, Actor> = HashMap::new();
    let mut player_ids: HashMap<String, i64> = HashMap::new();
    let mut ability_names: HashMap<u32, String> = HashMap::new();
    let mut fights: Vec<Fight> = Vec::new();
    let mut events = Vec::new();
    let mut source_reports = Vec::new();
    let mut dropped_events = 0;

    let mut next_actor_id: i64 = 1;
    let mut next_fight_id: u32 = 1;
    let mut next_seq: u64 = 0;
    let mut pull_counters: HashMap<String, u32> = HashMap::new();

    for snapshot in snapshots {
        source_reports.extend(snapshot.source_reports.iter().cloned());
        dropped_events += snapshot.dropped_events;
        for (id, name) in &snapshot.ability_names {
            ability_names.entry(*id).or_insert_with(|| name.clone());
        }

        // Actor remap for this report.
        let mut actor_remap: HashMap<i64, i64> = HashMap::new();
        let mut remap = |old_id: i64,
                         snapshot: &ReportSnapshot,
                         actors: &mut HashMap<i64, Actor>,
                         player_ids: &mut HashMap<String, i64>,
                         next_actor_id: &mut i64|
         -> i64 {
            if let Some(mapped) = actor_remap.get(&old_id) {
                return *mapped;
            }
            let source = snapshot.actors.get(&old_id);
            let new_id = match source {
                Some(actor) if actor.is_player() => {
                    if let Some(existing) = player_ids.get(&actor.name) {
                        *existing
                    } else {
                        let id = *next_actor_id;
                        *next_actor_id += 1;
                        player_ids.insert(actor.name.clone(), id);
                        // Pet ownership was already resolved during
                        // normalization; old-report owner ids must not leak.
                        actors.insert(
                            id,
                            Actor {
                                id,
                                owner_id: None,
                                ..actor.clone()
                            },
                        );
                        id
                    }
                }
                Some(actor) => {
                    let id = *next_actor_id;
                    *next_actor_id += 1;
                    actors.insert(
                        id,
                        Actor {
                            id,
                            owner_id: None,
                            ..actor.clone()
                        },
                    );
                    id
                }
                None => {
                    let id = *next_actor_id;
                    *next_actor_id += 1;
                    actors.insert(id, Actor::unknown(id));
                    id
                }
            };
            actor_remap.insert(old_id, new_id);
            new_id
        };

        // Fights keep their metadata but take fresh ids and global pull order.
        let mut fight_remap: HashMap<u32, (u32, u32)> = HashMap::new();
        for fight in &snapshot.fights {
            let counter = pull_counters.entry(fight.name.clone()).or_insert(0);
            *counter += 1;
            let new_id = next_fight_id;
            next_fight_id += 1;
            fight_remap.insert(fight.id, (new_id, *counter));
            fights.push(Fight {
                id: new_id,
                ..fight.clone()
            });
        }

        for ev in &snapshot.events {
            let Some(&(fight_id, pull_index)) = fight_remap.get(&ev.fight_id) else {
                dropped_events += 1;
                continue;
            };
            let mut merged = ev.clone();
            merged.fight_id = fight_id;
            merged.pull_index = pull_index;
            merged.source_id = remap(
                ev.source_id,
                snapshot,
                &mut actors,
                &mut player_ids,
                &mut next_actor_id,
            );
            merged.target_id = remap(
                ev.target_id,
                snapshot,
                &mut actors,
                &mut player_ids,
                &mut next_actor_id,
            );
            merged.seq = next_seq;
            next_seq += 1;
            events.push(merged);
        }
    }

    ReportSnapshot {
        source_reports,
        title: snapshots
            .first()
            .map(|s| s.title.clone())
            .unwrap_or_default(),
        fights,
        actors,
        events,
        ability_names,
        dropped_events,
    }
}
