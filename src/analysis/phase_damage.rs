use std::collections::{BTreeMap, HashMap};

use crate::report::{EventKind, ReportSnapshot};

use super::common::{self, normalize_phase_ids, player_meta};
use super::{AnalyzerResult, MetricValue, PhaseDamageConfig};

/// Per-phase damage or healing totals per player. Healers are scored on
/// healing done, every other role on damage done. `pull_count` divides by all
/// retained pulls regardless of whether the player was alive in a phase.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &PhaseDamageConfig) -> AnalyzerResult {
    let phases = normalize_phase_ids(&cfg.phases, cfg.profile);
    let pull_count = snapshot.pull_count();
    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    // (player id, index into `phases`) -> amount
    let mut totals_by_player: HashMap<(i64, usize), f64> = HashMap::new();

    for ev in &snapshot.events {
        let Some(source) = snapshot.actor(ev.source_id) else {
            continue;
        };
        if !source.is_player() {
            continue;
        }
        let amount = if source.role.uses_healing_metric() {
            match &ev.kind {
                EventKind::Heal { amount, .. } => *amount,
                _ => continue,
            }
        } else {
            match &ev.kind {
                EventKind::Damage { amount, .. } => *amount,
                _ => continue,
            }
        };
        if amount <= 0.0 {
            continue;
        }
        let event_phase = ev.phase_id.to_string();
        for (idx, phase) in phases.iter().enumerate() {
            if phase == "full" || *phase == event_phase {
                *totals_by_player.entry((ev.source_id, idx)).or_default() += amount;
            }
        }
    }

    let mut entries = Vec::with_capacity(participants.len());
    for actor in &participants {
        let mut row = common::roster_row(actor, pull_count);
        for (idx, phase) in phases.iter().enumerate() {
            let total = totals_by_player
                .get(&(actor.id, idx))
                .copied()
                .unwrap_or(0.0);
            row.metrics
                .insert(phase.clone(), MetricValue::new(total, pull_count));
        }
        entries.push(row);
    }
    // Phase tables keep roster order within role groups rather than ranking
    // by any single phase column.
    entries.sort_by(|a, b| {
        a.role
            .priority()
            .cmp(&b.role.priority())
            .then_with(|| a.player.to_lowercase().cmp(&b.player.to_lowercase()))
    });

    let mut totals = BTreeMap::new();
    for (idx, phase) in phases.iter().enumerate() {
        let sum: f64 = totals_by_player
            .iter()
            .filter(|((_, p), _)| *p == idx)
            .map(|(_, amount)| *amount)
            .sum();
        totals.insert(format!("phase_{}_total", phase), sum);
    }

    let mut filters = BTreeMap::new();
    filters.insert(
        "phase_profile".into(),
        format!("{:?}", cfg.profile).to_ascii_lowercase(),
    );

    let phase_labels: BTreeMap<String, String> = phases
        .iter()
        .map(|p| {
            (
                p.clone(),
                cfg.profile
                    .label_for(p)
                    .unwrap_or("Unknown Phase")
                    .to_string(),
            )
        })
        .collect();

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "phase_damage".into(),
        pull_count,
        entries,
        totals,
        filters,
        phases: Some(phases),
        phase_labels: Some(phase_labels),
        ability_ids: None,
        fight_totals: None,
        player_classes: meta.classes,
        player_roles: meta.roles,
        player_specs: meta.specs,
        player_events: None,
    }
}
