use std::collections::{BTreeMap, HashMap};

use crate::report::{EventKind, ReportSnapshot};

use super::common::{
    self, ability_label, collect_event_times, death_cutoffs, has_recent_event, player_meta,
    sort_rows, AIRBORNE_ID, DEVOUR_ID, FISTS_OF_VOIDLORD_ID, OBLIVION_ID,
};
use super::{AnalyzerResult, DeathConfig, EventTrace, MetricValue, OblivionFilter};

/// Count deaths per player per pull.
///
/// Oblivion deaths are environmental soaks: with `ExcludeWithoutRecent` they
/// only count when a flagged ability (Airborne, Fists of the Voidlord,
/// Devour) touched the player within `recent_window_ms` before the death.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &DeathConfig) -> AnalyzerResult {
    let cutoffs = death_cutoffs(snapshot, cfg.ignore_after_deaths);
    let pull_count = snapshot.pull_count();

    let flagged = match cfg.oblivion_filter {
        OblivionFilter::ExcludeWithoutRecent => {
            let airborne = collect_event_times(snapshot, |ev| {
                matches!(
                    ev.kind,
                    EventKind::ApplyDebuff { .. } | EventKind::RefreshDebuff
                ) && ev.ability_id == Some(AIRBORNE_ID)
            });
            let fists = collect_event_times(snapshot, |ev| {
                ev.is_damage() && ev.ability_id == Some(FISTS_OF_VOIDLORD_ID)
            });
            let devour = collect_event_times(snapshot, |ev| {
                ev.is_damage() && ev.ability_id == Some(DEVOUR_ID)
            });
            Some((airborne, fists, devour))
        }
        _ => None,
    };

    let mut counts: HashMap<i64, u64> = HashMap::new();
    let mut traces: BTreeMap<String, Vec<EventTrace>> = BTreeMap::new();

    for ev in &snapshot.events {
        let EventKind::Death { killing_ability_id } = ev.kind else {
            continue;
        };
        if !snapshot.actor(ev.target_id).is_some_and(|a| a.is_player()) {
            continue;
        }
        // The nth death itself still counts under the cut-off.
        if let Some(&cutoff) = cutoffs.get(&ev.fight_id) {
            if ev.timestamp_ms > cutoff {
                continue;
            }
        }

        if killing_ability_id == Some(OBLIVION_ID) {
            match cfg.oblivion_filter {
                OblivionFilter::IncludeAll => {}
                OblivionFilter::ExcludeAll => continue,
                OblivionFilter::ExcludeWithoutRecent => {
                    let recent = flagged
                        .as_ref()
                        .map(|(airborne, fists, devour)| {
                            [airborne, fists, devour].iter().any(|times| {
                                has_recent_event(
                                    times,
                                    ev.fight_id,
                                    ev.target_id,
                                    ev.timestamp_ms,
                                    cfg.recent_window_ms,
                                )
                            })
                        })
                        .unwrap_or(false);
                    if !recent {
                        continue;
                    }
                }
            }
        }

        *counts.entry(ev.target_id).or_default() += 1;
        let player = snapshot.actor_name(ev.target_id).to_string();
        let label = killing_ability_id.and_then(|id| ability_label(snapshot, id));
        traces
            .entry(player.clone())
            .or_default()
            .push(common::trace_for(&player, ev, label));
    }

    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    let mut entries = Vec::with_capacity(participants.len());
    for actor in &participants {
        let deaths = counts.get(&actor.id).copied().unwrap_or(0) as f64;
        let mut row = common::roster_row(actor, pull_count);
        row.metrics
            .insert("deaths".into(), MetricValue::new(deaths, pull_count));
        entries.push(row);
    }
    sort_rows(&mut entries, "deaths");

    let total_deaths: f64 = counts.values().map(|c| *c as f64).sum();
    let mut totals = BTreeMap::new();
    totals.insert("total_deaths".into(), total_deaths);
    totals.insert(
        "average_deaths_per_pull".into(),
        common::per_pull(total_deaths, pull_count),
    );

    let mut filters = BTreeMap::new();
    filters.insert(
        "oblivion_filter".into(),
        match cfg.oblivion_filter {
            OblivionFilter::IncludeAll => "include_all",
            OblivionFilter::ExcludeWithoutRecent => "exclude_without_recent",
            OblivionFilter::ExcludeAll => "exclude_all",
        }
        .to_string(),
    );
    filters.insert("recent_window_ms".into(), cfg.recent_window_ms.to_string());
    if let Some(limit) = cfg.ignore_after_deaths {
        filters.insert("ignore_after_deaths".into(), limit.to_string());
    }

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "deaths".into(),
        pull_count,
        entries,
        totals,
        filters,
        phases: None,
        phase_labels: None,
        ability_ids: None,
        fight_totals: None,
        player_classes: meta.classes,
        player_roles: meta.roles,
        player_specs: meta.specs,
        player_events: Some(traces),
    }
}
