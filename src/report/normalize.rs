use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{Actor, Event, Fight};

/// Map each retained fight to its 1-based pull index, numbering fights that
/// share a name in ascending `start_ms` order.
pub fn pull_indexes(fights: &[Fight]) -> HashMap<u32, u32> {
    let mut ordered: Vec<&Fight> = fights.iter().collect();
    ordered.sort_by_key(|f| f.start_ms);

    let mut counters: HashMap<&str, u32> = HashMap::new();
    let mut indexes = HashMap::new();
    for fight in ordered {
        let counter = counters.entry(fight.name.as_str()).or_insert(0);
        *counter += 1;
        indexes.insert(fight.id, *counter);
    }
    indexes
}

/// Resolve an actor id through its pet-owner chain to the owning actor.
/// Guards against ownership cycles in malformed master data.
pub fn resolve_owner(actors: &HashMap<i64, Actor>, id: i64) -> i64 {
    let mut current = id;
    let mut seen = HashSet::new();
    while let Some(owner) = actors.get(&current).and_then(|a| a.owner_id) {
        if owner == 0 || !seen.insert(current) {
            break;
        }
        current = owner;
    }
    current
}

/// Annotate raw events with fight, pull, phase and offset, resolve actor ids,
/// and produce the snapshot's stable event ordering.
///
/// Events outside every retained fight window are dropped and counted.
/// Unknown source/target ids get synthetic `Unknown-<id>` roster entries so
/// every id in the stream resolves.
pub fn normalize_events(
    fights: &[Fight],
    actors: &mut HashMap<i64, Actor>,
    ability_names: &HashMap<u32, String>,
    raw_events: Vec<Event>,
) -> (Vec<Event>, u64) {
    let indexes = pull_indexes(fights);
    let mut dropped: u64 = 0;
    let mut events = Vec::with_capacity(raw_events.len());

    for (seq, mut ev) in raw_events.into_iter().enumerate() {
        let fight = match fights.iter().find(|f| f.contains(ev.timestamp_ms)) {
            Some(f) => f,
            None => {
                dropped += 1;
                continue;
            }
        };

        ev.seq = seq as u64;
        ev.fight_id = fight.id;
        ev.pull_index = indexes.get(&fight.id).copied().unwrap_or(0);
        ev.phase_id = fight.phase_at(ev.timestamp_ms);
        ev.offset_ms = ev.timestamp_ms - fight.start_ms;

        ev.source_id = resolve_owner(actors, ev.source_id);
        for id in [ev.source_id, ev.target_id] {
            actors.entry(id).or_insert_with(|| Actor::unknown(id));
        }

        if ev.ability_name.is_none() {
            if let Some(id) = ev.ability_id {
                ev.ability_name = ability_names.get(&id).cloned();
            }
        }

        events.push(ev);
    }

    events.sort_by(|a, b| {
        (a.timestamp_ms, a.source_id, a.seq).cmp(&(b.timestamp_ms, b.source_id, b.seq))
    });

    if dropped > 0 {
        debug!(dropped, "events outside retained fight windows were dropped");
    }
    (events, dropped)
}
