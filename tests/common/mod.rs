#![allow(dead_code)]

use std::collections::HashMap;

use raidlens::report::normalize::normalize_events;
use raidlens::report::{
    role_for, Actor, ActorKind, Event, EventKind, Fight, PhaseTransition, ReportSnapshot, Role,
};

/// Predictable test roster and fights: fixed ids, no randomness.
pub fn player(id: i64, name: &str, class: &str, spec: &str) -> Actor {
    Actor {
        id,
        name: name.to_string(),
        kind: ActorKind::Player,
        class_name: Some(class.to_string()),
        spec: Some(spec.to_string()),
        role: role_for(Some(class), Some(spec)),
        owner_id: None,
    }
}

pub fn npc(id: i64, name: &str) -> Actor {
    Actor {
        id,
        name: name.to_string(),
        kind: ActorKind::Npc,
        class_name: None,
        spec: None,
        role: Role::Unknown,
        owner_id: None,
    }
}

pub fn boss_fight(id: u32, name: &str, start_ms: i64, end_ms: i64) -> Fight {
    Fight {
        id,
        name: name.to_string(),
        boss_id: Some(3000 + id),
        start_ms,
        end_ms,
        kill: false,
        phase_transitions: vec![],
    }
}

pub fn with_transitions(mut fight: Fight, transitions: &[(u32, i64)]) -> Fight {
    fight.phase_transitions = transitions
        .iter()
        .map(|(id, start_ms)| PhaseTransition {
            id: *id,
            start_ms: *start_ms,
        })
        .collect();
    fight
}

fn base_event(ts: i64, source: i64, target: i64, kind: EventKind) -> Event {
    Event {
        timestamp_ms: ts,
        source_id: source,
        target_id: target,
        ability_id: None,
        ability_name: None,
        kind,
        fight_id: 0,
        pull_index: 0,
        phase_id: 1,
        offset_ms: 0,
        seq: 0,
    }
}

pub fn damage(ts: i64, source: i64, target: i64, ability: u32, amount: f64) -> Event {
    let mut ev = base_event(
        ts,
        source,
        target,
        EventKind::Damage {
            amount,
            mitigated: 0.0,
            overkill: 0.0,
            hit_type: None,
        },
    );
    ev.ability_id = Some(ability);
    ev
}

pub fn heal(ts: i64, source: i64, target: i64, amount: f64) -> Event {
    base_event(
        ts,
        source,
        target,
        EventKind::Heal {
            amount,
            overheal: 0.0,
        },
    )
}

pub fn named_heal(ts: i64, source: i64, target: i64, amount: f64, ability: &str) -> Event {
    let mut ev = heal(ts, source, target, amount);
    ev.ability_name = Some(ability.to_string());
    ev
}

pub fn named_damage(
    ts: i64,
    source: i64,
    target: i64,
    ability: u32,
    ability_name: &str,
    amount: f64,
) -> Event {
    let mut ev = damage(ts, source, target, ability, amount);
    ev.ability_name = Some(ability_name.to_string());
    ev
}

pub fn death(ts: i64, target: i64, killing_ability: Option<u32>) -> Event {
    base_event(
        ts,
        -1,
        target,
        EventKind::Death {
            killing_ability_id: killing_ability,
        },
    )
}

pub fn debuff_apply(ts: i64, target: i64, ability: u32) -> Event {
    let mut ev = base_event(ts, -1, target, EventKind::ApplyDebuff { stack: false });
    ev.ability_id = Some(ability);
    ev
}

pub fn debuff_remove(ts: i64, target: i64, ability: u32) -> Event {
    let mut ev = base_event(ts, -1, target, EventKind::RemoveDebuff);
    ev.ability_id = Some(ability);
    ev
}

/// Assemble a normalized snapshot from raw pieces, the same way the fetcher
/// does after paging.
pub fn snapshot(
    code: &str,
    fights: Vec<Fight>,
    roster: Vec<Actor>,
    raw_events: Vec<Event>,
) -> ReportSnapshot {
    let mut actors: HashMap<i64, Actor> = roster.into_iter().map(|a| (a.id, a)).collect();
    let (events, dropped) = normalize_events(&fights, &mut actors, &HashMap::new(), raw_events);
    ReportSnapshot {
        source_reports: vec![code.to_string()],
        title: format!("Report {}", code),
        fights,
        actors,
        events,
        ability_names: HashMap::new(),
        dropped_events: dropped,
    }
}
