use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::exception::{EngineError, EngineResult};
use crate::report::normalize::normalize_events;
use crate::report::{
    role_for, Actor, ActorKind, DataType, Event, Fight, PhaseTransition, ReportSnapshot, Role,
};

use super::queries::{EVENTS_PAGE_QUERY, REPORT_OVERVIEW_QUERY};
use super::transport::GraphQlTransport;

/// Consecutive identical `nextPageTimestamp` observations before a paging
/// loop is declared stalled.
const STALL_LIMIT: u32 = 3;

/// What to materialize for one report code.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub code: String,
    /// Case-insensitive substring match on fight name; `None` keeps every
    /// fight with a boss id.
    pub fight_filter: Option<String>,
    /// Event feeds to page, optionally filtered server-side by ability.
    pub streams: Vec<(DataType, Option<u32>)>,
}

/// Pages master data and event streams into a complete [`ReportSnapshot`].
pub struct ReportFetcher {
    transport: Arc<dyn GraphQlTransport>,
    page_limit: u32,
    max_inflight: usize,
}

impl ReportFetcher {
    pub fn new(transport: Arc<dyn GraphQlTransport>, page_limit: u32, max_inflight: usize) -> Self {
        Self {
            transport,
            page_limit,
            max_inflight: max_inflight.max(1),
        }
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<ReportSnapshot> {
        let data = self
            .transport
            .execute(REPORT_OVERVIEW_QUERY, json!({ "code": request.code }))
            .await?;
        let report = match data.pointer("/reportData/report") {
            Some(report) if !report.is_null() => report,
            _ => return Err(EngineError::report_not_found(&request.code)),
        };

        let title = report
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut actors = parse_actors(report);
        let ability_names = parse_abilities(report);
        let fights = select_fights(parse_fights(report), request.fight_filter.as_deref());

        info!(
            code = %request.code,
            fights = fights.len(),
            streams = request.streams.len(),
            "fetching report events"
        );

        let mut raw_events = Vec::new();
        if !fights.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.max_inflight));
            let mut tasks = Vec::new();
            for fight in &fights {
                for stream in &request.streams {
                    tasks.push(self.page_stream(
                        &request.code,
                        fight,
                        *stream,
                        Arc::clone(&semaphore),
                        cancel,
                    ));
                }
            }
            // Results arrive in task order regardless of completion order, so
            // the seq tie-break below stays deterministic.
            let pages = futures::future::try_join_all(tasks).await?;
            for page in pages {
                raw_events.extend(page);
            }
        }

        let (events, dropped) = normalize_events(&fights, &mut actors, &ability_names, raw_events);

        Ok(ReportSnapshot {
            source_reports: vec![request.code.clone()],
            title,
            fights,
            actors,
            events,
            ability_names,
            dropped_events: dropped,
        })
    }

    /// Page one (fight, data type, ability) stream, following
    /// `nextPageTimestamp` until it reaches the fight end or goes null.
    async fn page_stream(
        &self,
        code: &str,
        fight: &Fight,
        (data_type, ability_id): (DataType, Option<u32>),
        semaphore: Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Event>> {
        let mut events = Vec::new();
        let mut start = fight.start_ms;
        let end = fight.end_ms;
        let mut last_next: Option<i64> = None;
        let mut stall_count: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }

            let page = {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| EngineError::internal("paging semaphore closed"))?;
                self.transport
                    .execute(
                        EVENTS_PAGE_QUERY,
                        json!({
                            "code": code,
                            "dataType": data_type.as_str(),
                            "startTime": start,
                            "endTime": end,
                            "limit": self.page_limit,
                            "abilityID": ability_id,
                        }),
                    )
                    .await?
            };

            let container = page
                .pointer("/reportData/report/events")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    EngineError::internal("events page response missing reportData.report.events")
                })?;

            if let Some(rows) = container.get("data").and_then(Value::as_array) {
                events.extend(rows.iter().filter_map(Event::from_raw));
            }

            let next = container
                .get("nextPageTimestamp")
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));
            match next {
                None => break,
                Some(next_ts) if next_ts >= end => break,
                Some(next_ts) => {
                    if last_next == Some(next_ts) {
                        stall_count += 1;
                        if stall_count >= STALL_LIMIT {
                            return Err(EngineError::PaginationStalled {
                                data_type: data_type.as_str().to_string(),
                                at_ms: next_ts,
                            });
                        }
                    } else {
                        last_next = Some(next_ts);
                        stall_count = 1;
                    }
                    start = next_ts;
                }
            }
        }

        debug!(
            %data_type,
            fight_id = fight.id,
            count = events.len(),
            "stream paged"
        );
        Ok(events)
    }
}

fn parse_actors(report: &Value) -> HashMap<i64, Actor> {
    let mut actors = HashMap::new();
    let entries = report
        .pointer("/masterData/actors")
        .and_then(Value::as_array);
    for raw in entries.into_iter().flatten() {
        let Some(id) = raw.get("id").and_then(Value::as_i64) else {
            continue;
        };
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let kind = match raw.get("type").and_then(Value::as_str) {
            Some("Player") => ActorKind::Player,
            Some("Pet") => ActorKind::Pet,
            _ => ActorKind::Npc,
        };
        let class_name = raw
            .get("subType")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let spec = parse_spec(raw);
        let role = if kind == ActorKind::Player {
            role_for(class_name.as_deref(), spec.as_deref())
        } else {
            Role::Unknown
        };
        let owner_id = raw
            .get("petOwner")
            .and_then(Value::as_i64)
            .filter(|owner| *owner > 0);
        actors.insert(
            id,
            Actor {
                id,
                name,
                kind,
                class_name,
                spec,
                role,
                owner_id,
            },
        );
    }
    actors
}

/// Spec from the actor entry: a specs list of strings or objects, falling
/// back to the `icon` field's `Class-Spec_Name` form.
fn parse_spec(raw: &Value) -> Option<String> {
    if let Some(specs) = raw.get("specs").and_then(Value::as_array) {
        for entry in specs {
            match entry {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Object(obj) => {
                    if let Some(spec) = obj.get("spec").and_then(Value::as_str) {
                        if !spec.is_empty() {
                            return Some(spec.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }
    let icon = raw.get("icon").and_then(Value::as_str)?;
    let (_, spec) = icon.split_once('-')?;
    Some(spec.replace('_', " "))
}

fn parse_abilities(report: &Value) -> HashMap<u32, String> {
    let mut abilities = HashMap::new();
    let entries = report
        .pointer("/masterData/abilities")
        .and_then(Value::as_array);
    for raw in entries.into_iter().flatten() {
        let Some(id) = raw.get("gameID").and_then(Value::as_u64) else {
            continue;
        };
        let Some(name) = raw.get("name").and_then(Value::as_str) else {
            continue;
        };
        abilities.insert(id as u32, name.to_string());
    }
    abilities
}

fn parse_fights(report: &Value) -> Vec<Fight> {
    let mut fights = Vec::new();
    let entries = report.get("fights").and_then(Value::as_array);
    for raw in entries.into_iter().flatten() {
        let (Some(id), Some(start_ms), Some(end_ms)) = (
            raw.get("id").and_then(Value::as_u64),
            raw.get("startTime").and_then(Value::as_i64),
            raw.get("endTime").and_then(Value::as_i64),
        ) else {
            continue;
        };
        if end_ms < start_ms {
            continue;
        }
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Fight {}", id));
        let boss_id = raw
            .get("boss")
            .and_then(Value::as_u64)
            .filter(|b| *b > 0)
            .map(|b| b as u32);

        let mut transitions: Vec<PhaseTransition> = raw
            .get("phaseTransitions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|t| {
                let id = t.get("id").and_then(Value::as_u64)? as u32;
                let ts = t.get("startTime").and_then(Value::as_i64)?;
                (ts >= start_ms && ts <= end_ms).then_some(PhaseTransition { id, start_ms: ts })
            })
            .collect();
        transitions.sort_by_key(|t| t.start_ms);
        transitions.dedup_by_key(|t| t.start_ms);

        fights.push(Fight {
            id: id as u32,
            name,
            boss_id,
            start_ms,
            end_ms,
            kill: raw.get("kill").and_then(Value::as_bool).unwrap_or(false),
            phase_transitions: transitions,
        });
    }
    fights.sort_by_key(|f| f.start_ms);
    fights
}

/// Keep fights matching the filter, or every boss fight when no filter is
/// given.
fn select_fights(fights: Vec<Fight>, fight_filter: Option<&str>) -> Vec<Fight> {
    match fight_filter {
        Some(needle) if !needle.trim().is_empty() => {
            let needle = needle.trim().to_lowercase();
            fights
                .into_iter()
                .filter(|f| f.name.to_lowercase().contains(&needle))
                .collect()
        }
        _ => fights.into_iter().filter(|f| f.boss_id.is_some()).collect(),
    }
}
