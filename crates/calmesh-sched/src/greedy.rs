//! The in-process greedy solver

use calmesh_types::{ConstraintKind, Interval};

use crate::configs::{
    self, BufferConfig, BufferType, NoMeetingsAfterConfig, VipOverrideConfig, WorkingHoursConfig,
};
use crate::fairness::fairness_adjustment;
use crate::types::{ScoredCandidate, SolverInput};
use crate::SLOT_STEP_MILLIS;

const MILLIS_PER_DAY: i64 = 86_400_000;
const MILLIS_PER_MINUTE: i64 = 60_000;

const MORNING_BONUS: f64 = 20.0;
const AFTERNOON_BONUS: f64 = 10.0;
const ADJACENCY_PENALTY: f64 = 5.0;
const WORKING_HOURS_BONUS: f64 = 15.0;
const WORKING_HOURS_PENALTY: f64 = 10.0;
const BUFFER_BONUS: f64 = 5.0;
const BUFFER_PENALTY: f64 = 5.0;
const AFTER_CUTOFF_PENALTY: f64 = 10.0;

/// Weekday (Mon=1..Sun=7) and minute-of-day at a fixed UTC offset
fn local_parts(ts_millis: i64, offset_minutes: i64) -> (u32, i64) {
    let local = ts_millis + offset_minutes * MILLIS_PER_MINUTE;
    let days = local.div_euclid(MILLIS_PER_DAY);
    let minute_of_day = local.rem_euclid(MILLIS_PER_DAY) / MILLIS_PER_MINUTE;
    // The epoch fell on a Thursday
    let weekday = (days + 3).rem_euclid(7) as u32 + 1;
    (weekday, minute_of_day)
}

struct ActiveVip {
    display_name: String,
    priority_weight: f64,
    allow_after_hours: bool,
}

fn active_vips(input: &SolverInput) -> Vec<ActiveVip> {
    let mut vips = Vec::new();
    for vip in &input.vip_policies {
        if !input.participant_hashes.contains(&vip.participant_hash) {
            continue;
        }
        let conditions: configs::VipConditions =
            serde_json::from_value(vip.conditions.clone()).unwrap_or_default();
        vips.push(ActiveVip {
            display_name: vip.display_name.clone(),
            priority_weight: vip.priority_weight.max(1.0),
            allow_after_hours: conditions.allow_after_hours,
        });
    }
    for (config, _) in
        configs::configs_of_kind::<VipOverrideConfig>(&input.constraints, ConstraintKind::VipOverride)
    {
        if !input.participant_hashes.contains(&config.participant_hash) {
            continue;
        }
        vips.push(ActiveVip {
            display_name: config.display_name,
            priority_weight: config.priority_weight.max(1.0),
            allow_after_hours: config.conditions.allow_after_hours,
        });
    }
    vips
}

enum WorkingHoursFit {
    Inside,
    Partial,
    Outside,
}

fn working_hours_fit(slot: Interval, config: &WorkingHoursConfig) -> Option<WorkingHoursFit> {
    let offset = configs::tz_offset_minutes(&config.timezone);
    let (weekday, start_minute) = local_parts(slot.start, offset);
    let end_minute = start_minute + (slot.end - slot.start) / MILLIS_PER_MINUTE;
    let window_start = configs::parse_hhmm(&config.start_time)?;
    let window_end = configs::parse_hhmm(&config.end_time)?;

    if !config.days.contains(&weekday) {
        return Some(WorkingHoursFit::Outside);
    }
    if start_minute >= window_start && end_minute <= window_end {
        return Some(WorkingHoursFit::Inside);
    }
    let overlap = end_minute.min(window_end) - start_minute.max(window_start);
    if overlap > 0 {
        Some(WorkingHoursFit::Partial)
    } else {
        Some(WorkingHoursFit::Outside)
    }
}

/// Gap in minutes from the slot to the nearest busy block in the given
/// direction; `None` when the day is clear in that direction.
fn gap_minutes(slot: Interval, busy: &[Interval], buffer_type: BufferType) -> Option<i64> {
    match buffer_type {
        BufferType::Prep => busy
            .iter()
            .filter(|b| b.end <= slot.start)
            .map(|b| (slot.start - b.end) / MILLIS_PER_MINUTE)
            .min(),
        BufferType::Cooldown => busy
            .iter()
            .filter(|b| b.start >= slot.end)
            .map(|b| (b.start - slot.end) / MILLIS_PER_MINUTE)
            .min(),
    }
}

/// Enumerate, filter, and score 30-minute-aligned slots.
///
/// Guarantees: output sorted by score descending (ties by start), no
/// candidate overlaps a busy interval or an active trip, and every
/// candidate is exactly `duration_minutes` long.
pub fn greedy_solver(input: &SolverInput, max_candidates: usize) -> Vec<ScoredCandidate> {
    let duration = input.duration_millis();
    if duration <= 0 || input.window_end - input.window_start < duration {
        return Vec::new();
    }

    let vips = active_vips(input);
    let vip_weight = vips
        .iter()
        .map(|v| v.priority_weight)
        .fold(1.0_f64, f64::max);
    let allow_after_hours = vips.iter().any(|v| v.allow_after_hours);
    let after_hours_vip_name = vips
        .iter()
        .find(|v| v.allow_after_hours)
        .map(|v| v.display_name.clone());

    let (fairness, fairness_hash) = fairness_adjustment(&input.participant_stats);

    let working_hours = configs::configs_of_kind::<WorkingHoursConfig>(
        &input.constraints,
        ConstraintKind::WorkingHours,
    );
    let buffers =
        configs::configs_of_kind::<BufferConfig>(&input.constraints, ConstraintKind::Buffer);
    let cutoffs = configs::configs_of_kind::<NoMeetingsAfterConfig>(
        &input.constraints,
        ConstraintKind::NoMeetingsAfter,
    );
    let trips: Vec<_> = input
        .constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::Trip)
        .collect();

    let mut candidates = Vec::new();
    let first_slot = input.window_start.div_euclid(SLOT_STEP_MILLIS) * SLOT_STEP_MILLIS;
    let first_slot = if first_slot < input.window_start {
        first_slot + SLOT_STEP_MILLIS
    } else {
        first_slot
    };

    let mut slot_start = first_slot;
    while slot_start + duration <= input.window_end {
        let slot = Interval::new(slot_start, slot_start + duration);
        slot_start += SLOT_STEP_MILLIS;

        // Hard exclusions: busy overlap, then active trips
        if input.busy_intervals.iter().any(|b| b.overlaps(&slot)) {
            continue;
        }
        if trips.iter().any(|t| t.active_in(slot.start, slot.end)) {
            continue;
        }

        let mut notes = Vec::new();
        let mut score = 0.0;

        // Time-of-day preference: mornings beat afternoons beat evenings
        let (_, start_minute_utc) = local_parts(slot.start, 0);
        if start_minute_utc < 12 * 60 {
            score += MORNING_BONUS;
            notes.push("morning slot".to_string());
        } else if start_minute_utc < 17 * 60 {
            score += AFTERNOON_BONUS;
            notes.push("afternoon slot".to_string());
        }

        if input
            .busy_intervals
            .iter()
            .any(|b| b.end == slot.start || b.start == slot.end)
        {
            score -= ADJACENCY_PENALTY;
            notes.push("directly adjacent to another meeting".to_string());
        }

        let mut excluded = false;
        for (config, constraint) in &working_hours {
            if !constraint.active_in(slot.start, slot.end) {
                continue;
            }
            match working_hours_fit(slot, config) {
                Some(WorkingHoursFit::Inside) => {
                    score += WORKING_HOURS_BONUS;
                    notes.push("within working hours".to_string());
                }
                Some(WorkingHoursFit::Partial) => {
                    if allow_after_hours {
                        notes.push(vip_override_note(&after_hours_vip_name));
                    } else {
                        score -= WORKING_HOURS_PENALTY;
                        notes.push("partially outside working hours".to_string());
                    }
                }
                Some(WorkingHoursFit::Outside) => {
                    if allow_after_hours {
                        notes.push(vip_override_note(&after_hours_vip_name));
                    } else {
                        excluded = true;
                        break;
                    }
                }
                None => {}
            }
        }
        if excluded {
            continue;
        }

        for (config, constraint) in &cutoffs {
            if !constraint.active_in(slot.start, slot.end) {
                continue;
            }
            let Some(cutoff) = configs::parse_hhmm(&config.time) else {
                continue;
            };
            let offset = configs::tz_offset_minutes(&config.timezone);
            let (_, start_minute) = local_parts(slot.start, offset);
            if start_minute >= cutoff {
                if allow_after_hours {
                    notes.push(vip_override_note(&after_hours_vip_name));
                } else {
                    score -= AFTER_CUTOFF_PENALTY;
                    notes.push(format!("starts after the {} cutoff", config.time));
                }
            }
        }

        for (config, constraint) in &buffers {
            if !constraint.active_in(slot.start, slot.end) {
                continue;
            }
            match gap_minutes(slot, &input.busy_intervals, config.buffer_type) {
                Some(gap) if gap < config.minutes => {
                    score -= BUFFER_PENALTY;
                    notes.push(format!(
                        "only {gap} min {} buffer (wanted {})",
                        buffer_word(config.buffer_type),
                        config.minutes
                    ));
                }
                _ => {
                    score += BUFFER_BONUS;
                    notes.push(format!(
                        "comfortable {} buffer",
                        buffer_word(config.buffer_type)
                    ));
                }
            }
        }

        if vip_weight > 1.0 {
            notes.push(format!("VIP priority weight {vip_weight:.1}x"));
        }
        if (fairness - 1.0).abs() > f64::EPSILON {
            match &fairness_hash {
                Some(hash) => notes.push(format!(
                    "fairness adjustment {fairness:.2} for participant {hash}"
                )),
                None => notes.push(format!("fairness adjustment {fairness:.2}")),
            }
        }

        let final_score = (score * fairness * vip_weight).round() as i64;
        candidates.push(ScoredCandidate {
            start: slot.start,
            end: slot.end,
            score: final_score,
            explanation: notes.join("; "),
        });
    }

    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.start.cmp(&b.start)));
    candidates.truncate(max_candidates);
    candidates
}

fn vip_override_note(display_name: &Option<String>) -> String {
    match display_name {
        Some(name) if !name.is_empty() => {
            format!("VIP override: after-hours slot allowed for {name}")
        }
        _ => "VIP override: after-hours slot allowed".to_string(),
    }
}

fn buffer_word(buffer_type: BufferType) -> &'static str {
    match buffer_type {
        BufferType::Prep => "prep",
        BufferType::Cooldown => "cooldown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmesh_types::{time, Constraint, ConstraintId, ConstraintKind, UserId, VipId, VipPolicy};
    use serde_json::json;

    fn ts(s: &str) -> i64 {
        time::parse_rfc3339(s).unwrap()
    }

    fn constraint(kind: ConstraintKind, config: serde_json::Value) -> Constraint {
        Constraint {
            constraint_id: ConstraintId::new(),
            user_id: UserId::new(),
            kind,
            config,
            active_from: None,
            active_to: None,
        }
    }

    fn working_hours_mon_fri() -> Constraint {
        constraint(
            ConstraintKind::WorkingHours,
            json!({
                "days": [1, 2, 3, 4, 5],
                "start_time": "09:00",
                "end_time": "17:00",
                "timezone": "UTC"
            }),
        )
    }

    fn base_input() -> SolverInput {
        SolverInput {
            window_start: ts("2026-03-02T08:00:00Z"),
            window_end: ts("2026-03-02T22:00:00Z"),
            duration_minutes: 60,
            busy_intervals: Vec::new(),
            required_account_ids: Vec::new(),
            constraints: Vec::new(),
            participant_hashes: Vec::new(),
            vip_policies: Vec::new(),
            participant_stats: Vec::new(),
        }
    }

    #[test]
    fn test_candidates_avoid_busy_and_are_sorted() {
        let mut input = base_input();
        input.busy_intervals = vec![
            Interval::new(ts("2026-03-02T09:00:00Z"), ts("2026-03-02T10:00:00Z")),
            Interval::new(ts("2026-03-02T13:00:00Z"), ts("2026-03-02T15:30:00Z")),
        ];
        let candidates = greedy_solver(&input, 50);
        assert!(!candidates.is_empty());
        for c in &candidates {
            assert_eq!(c.end - c.start, 60 * 60 * 1000);
            for b in &input.busy_intervals {
                assert!(!b.overlaps(&Interval::new(c.start, c.end)));
            }
        }
        for pair in candidates.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_trip_hard_excludes() {
        let mut input = base_input();
        let mut trip = constraint(ConstraintKind::Trip, json!({ "name": "Lisbon" }));
        trip.active_from = Some(ts("2026-03-02T00:00:00Z"));
        trip.active_to = Some(ts("2026-03-02T12:00:00Z"));
        input.constraints = vec![trip];
        let candidates = greedy_solver(&input, 100);
        assert!(candidates.iter().all(|c| c.start >= ts("2026-03-02T12:00:00Z")));
    }

    #[test]
    fn test_morning_preferred_over_afternoon() {
        let input = base_input();
        let candidates = greedy_solver(&input, 100);
        let morning = candidates
            .iter()
            .find(|c| c.start == ts("2026-03-02T09:00:00Z"))
            .unwrap();
        let evening = candidates
            .iter()
            .find(|c| c.start == ts("2026-03-02T19:00:00Z"))
            .unwrap();
        assert!(morning.score > evening.score);
        assert!(morning.explanation.contains("morning"));
    }

    #[test]
    fn test_working_hours_hard_exclusion_without_vip() {
        // Same window starting at 17:00Z: every slot is entirely outside
        // Mon-Fri 09:00-17:00 and is excluded
        let mut input = base_input();
        input.window_start = ts("2026-03-02T17:00:00Z");
        input.constraints = vec![working_hours_mon_fri()];
        let candidates = greedy_solver(&input, 100);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_vip_override_allows_after_hours() {
        let mut input = base_input();
        input.constraints = vec![working_hours_mon_fri()];
        input.participant_hashes = vec!["abc".to_string()];
        input.vip_policies = vec![VipPolicy {
            vip_id: VipId::new(),
            user_id: UserId::new(),
            participant_hash: "abc".to_string(),
            display_name: "The CEO".to_string(),
            priority_weight: 2.0,
            conditions: json!({ "allow_after_hours": true }),
        }];

        let candidates = greedy_solver(&input, 100);
        let evening = candidates
            .iter()
            .find(|c| c.start == ts("2026-03-02T18:00:00Z"))
            .expect("18:00Z slot must survive via VIP override");
        assert!(evening.explanation.contains("VIP override"));
        assert!(evening.explanation.contains("VIP priority weight"));

        // Without the participant, the override does not activate
        input.participant_hashes.clear();
        input.window_start = ts("2026-03-02T17:00:00Z");
        assert!(greedy_solver(&input, 100).is_empty());
    }

    #[test]
    fn test_buffer_scoring() {
        let mut input = base_input();
        input.busy_intervals = vec![Interval::new(
            ts("2026-03-02T09:00:00Z"),
            ts("2026-03-02T10:00:00Z"),
        )];
        input.constraints = vec![constraint(
            ConstraintKind::Buffer,
            json!({ "type": "prep", "minutes": 30 }),
        )];
        let candidates = greedy_solver(&input, 100);
        let tight = candidates
            .iter()
            .find(|c| c.start == ts("2026-03-02T10:00:00Z"))
            .unwrap();
        let roomy = candidates
            .iter()
            .find(|c| c.start == ts("2026-03-02T11:00:00Z"))
            .unwrap();
        assert!(tight.explanation.contains("prep buffer"));
        assert!(roomy.score > tight.score);
    }

    #[test]
    fn test_no_meetings_after_penalty() {
        let mut input = base_input();
        input.constraints = vec![constraint(
            ConstraintKind::NoMeetingsAfter,
            json!({ "time": "18:00", "timezone": "UTC" }),
        )];
        let candidates = greedy_solver(&input, 100);
        let before = candidates
            .iter()
            .find(|c| c.start == ts("2026-03-02T17:30:00Z"))
            .unwrap();
        let after = candidates
            .iter()
            .find(|c| c.start == ts("2026-03-02T18:30:00Z"))
            .unwrap();
        assert!(before.score > after.score);
        assert!(after.explanation.contains("cutoff"));
    }

    #[test]
    fn test_fairness_multiplies_scores() {
        let mut input = base_input();
        input.participant_hashes = vec!["a".to_string(), "b".to_string()];
        input.participant_stats = vec![
            calmesh_types::ParticipantStats {
                participant_hash: "a".to_string(),
                sessions_participated: 4,
                sessions_preferred: 0,
                last_session_ts: 0,
            },
            calmesh_types::ParticipantStats {
                participant_hash: "b".to_string(),
                sessions_participated: 4,
                sessions_preferred: 4,
                last_session_ts: 0,
            },
        ];
        let boosted = greedy_solver(&input, 1);
        input.participant_stats.clear();
        let neutral = greedy_solver(&input, 1);
        assert!(boosted[0].score > neutral[0].score);
        assert!(boosted[0].explanation.contains("fairness adjustment"));
    }

    #[test]
    fn test_week_window_under_two_seconds() {
        let mut input = base_input();
        input.window_end = input.window_start + 7 * 86_400_000;
        input.busy_intervals = (0..48)
            .map(|i| {
                let start = input.window_start + i * 3 * 3_600_000;
                Interval::new(start, start + 3_600_000)
            })
            .collect();
        input.constraints = vec![
            working_hours_mon_fri(),
            constraint(ConstraintKind::Buffer, json!({ "type": "prep", "minutes": 15 })),
            constraint(
                ConstraintKind::Buffer,
                json!({ "type": "cooldown", "minutes": 15 }),
            ),
            constraint(
                ConstraintKind::NoMeetingsAfter,
                json!({ "time": "18:00", "timezone": "UTC" }),
            ),
            {
                let mut trip = constraint(ConstraintKind::Trip, json!({ "name": "offsite" }));
                trip.active_from = Some(input.window_start + 86_400_000);
                trip.active_to = Some(input.window_start + 2 * 86_400_000);
                trip
            },
        ];
        let started = std::time::Instant::now();
        let candidates = greedy_solver(&input, 5);
        assert!(!candidates.is_empty());
        assert!(started.elapsed().as_secs() < 2);
    }
}
