use std::collections::{BTreeMap, HashMap, HashSet};

use crate::report::{EventKind, ReportSnapshot};

use super::common::{self, player_meta};
use super::{AnalyzerResult, MetricValue, PriorityDamageConfig};

/// Damage dealt to the priority target during one encounter phase, excluding
/// Shooting Star contributions.
///
/// `pull_count` is the number of retained fights in which the phase
/// occurred; a player's `pulls` and per-pull average only count fights where
/// they dealt positive priority damage. Players with no qualifying damage
/// are omitted.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &PriorityDamageConfig) -> AnalyzerResult {
    let qualifying: HashSet<u32> = snapshot
        .fights
        .iter()
        .filter(|f| f.phase_window(cfg.phase_id).is_some())
        .map(|f| f.id)
        .collect();
    let pull_count = qualifying.len() as u32;

    // (player, fight) -> damage dealt to the target during the phase.
    let mut damage: HashMap<(i64, u32), f64> = HashMap::new();

    for ev in &snapshot.events {
        let EventKind::Damage {
            amount,
            mitigated,
            overkill,
            ..
        } = &ev.kind
        else {
            continue;
        };
        if ev.phase_id != cfg.phase_id || !qualifying.contains(&ev.fight_id) {
            continue;
        }
        let Some(target) = snapshot.actor(ev.target_id) else {
            continue;
        };
        if target.name != cfg.target_name {
            continue;
        }
        let Some(source) = snapshot.actor(ev.source_id) else {
            continue;
        };
        if !source.is_player() || source.name == cfg.ignored_source {
            continue;
        }
        if ev.ability_id == Some(cfg.ignored_ability_id) {
            continue;
        }
        if ev
            .ability_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(&cfg.ignored_source))
        {
            continue;
        }
        let total = amount + mitigated + overkill;
        if total <= 0.0 {
            continue;
        }
        *damage.entry((ev.source_id, ev.fight_id)).or_default() += total;
    }

    let mut totals_by_player: HashMap<i64, f64> = HashMap::new();
    let mut pulls_by_player: HashMap<i64, u32> = HashMap::new();
    for ((player, _fight), total) in &damage {
        *totals_by_player.entry(*player).or_default() += total;
        *pulls_by_player.entry(*player).or_default() += 1;
    }

    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    let mut entries = Vec::new();
    for actor in &participants {
        let Some(&pulls) = pulls_by_player.get(&actor.id) else {
            continue;
        };
        let total = totals_by_player.get(&actor.id).copied().unwrap_or(0.0);
        let mut row = common::roster_row(actor, pulls);
        row.metrics.insert(
            "priority_damage".into(),
            MetricValue {
                total,
                per_pull: common::per_pull(total, pulls),
            },
        );
        entries.push(row);
    }
    entries.sort_by(|a, b| {
        a.role
            .priority()
            .cmp(&b.role.priority())
            .then_with(|| a.player.to_lowercase().cmp(&b.player.to_lowercase()))
    });

    let total_damage: f64 = totals_by_player.values().sum();
    let mut totals = BTreeMap::new();
    totals.insert("total_damage".into(), total_damage);
    totals.insert(
        "average_damage_per_pull".into(),
        common::per_pull(total_damage, pull_count),
    );

    let mut filters = BTreeMap::new();
    filters.insert("target_name".into(), cfg.target_name.clone());
    filters.insert("ignored_source".into(), cfg.ignored_source.clone());
    filters.insert("phase".into(), cfg.phase_id.to_string());

    let mut ability_ids = BTreeMap::new();
    ability_ids.insert("shooting_star".into(), cfg.ignored_ability_id);

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "priority_damage".into(),
        pull_count,
        entries,
        totals,
        filters,
        phases: None,
        phase_labels: None,
        ability_ids: Some(ability_ids),
        fight_totals: None,
        player_classes: meta.classes,
        player_roles: meta.roles,
        player_specs: meta.specs,
        player_events: None,
    }
}
