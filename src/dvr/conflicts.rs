//! Conflict detection and priority based resolution
//!
//! The appliance marks airings it cannot record as `conflict`. Detection pairs
//! each of them with the scheduled airings it overlaps; resolution walks the
//! result in time order and unschedules the least important airing of every
//! overlapping window.

use tracing::{debug, info, warn};

use crate::dvr::client::ApplianceClient;
use crate::dvr::database::CacheDatabase;
use crate::dvr::error::{Result, SyncError};
use crate::dvr::models::{
    AiringRecord, Conflict, RankedConflict, ScheduleState, ShowType, UnscheduleOutcome,
    UnscheduleTarget,
};

/// True when the half-open intervals `[a1, e1)` and `[a2, e2)` overlap
///
/// Shared starts and shared ends count as overlap even for empty intervals.
pub fn overlaps(a1: i64, e1: i64, a2: i64, e2: i64) -> bool {
    a1 == a2
        || e1 == e2
        || (a1 > a2 && a1 < e2)
        || (e1 > a2 && e1 < e2)
        || (a1 < a2 && e1 > e2)
}

/// Build the conflict set from the appliance's conflicted and scheduled airings
///
/// Every conflicted airing is included. A scheduled airing joins the set the
/// first time it overlaps a conflicted one and is not considered again.
pub fn detect_conflicts(conflicted: &[Conflict], scheduled: &[Conflict]) -> Vec<Conflict> {
    let mut matched = vec![false; scheduled.len()];
    let mut conflicts = Vec::with_capacity(conflicted.len());

    for c in conflicted {
        conflicts.push(*c);
        for (s, taken) in scheduled.iter().zip(matched.iter_mut()) {
            if *taken {
                continue;
            }
            if overlaps(c.air_date, c.end_date, s.air_date, s.end_date) {
                *taken = true;
                conflicts.push(*s);
            }
        }
    }

    conflicts
}

/// Replace the stored conflict table with a freshly detected set
pub fn rebuild_conflicts(db: &CacheDatabase) -> Result<usize> {
    let conflicted = db.get_airing_intervals(&ScheduleState::Conflict)?;
    let scheduled = db.get_airing_intervals(&ScheduleState::Scheduled)?;
    let conflicts = detect_conflicts(&conflicted, &scheduled);
    db.replace_conflicts(&conflicts)?;
    info!(
        "{} conflicted airings, {} conflict entries",
        conflicted.len(),
        conflicts.len()
    );
    Ok(conflicts.len())
}

/// Attach show type and effective priority to stored conflicts, in resolution order
///
/// Movies always rank 0. A non-movie show without a priority is an error.
pub fn rank_conflicts(
    rows: Vec<(Conflict, Option<String>, Option<i64>)>,
) -> Result<Vec<RankedConflict>> {
    let mut ranked = Vec::with_capacity(rows.len());
    for (c, show_type, priority) in rows {
        let show_type: ShowType = show_type
            .ok_or_else(|| SyncError::InvalidShowType(format!("unknown show {}", c.show_id)))?
            .parse()?;
        let priority = match show_type {
            ShowType::Movie => 0,
            _ => priority.ok_or(SyncError::MissingPriority { show_id: c.show_id })?,
        };
        ranked.push(RankedConflict {
            airing_id: c.airing_id,
            show_id: c.show_id,
            show_type,
            air_date: c.air_date,
            end_date: c.end_date,
            priority,
        });
    }

    ranked.sort_by_key(|c| {
        (
            c.air_date,
            c.end_date,
            c.priority,
            c.show_type != ShowType::Movie,
            c.airing_id,
        )
    });
    Ok(ranked)
}

/// Eviction order key: larger priority value first, then non-movies before movies
fn eviction_rank(c: &RankedConflict) -> (i64, bool) {
    (c.priority, c.show_type != ShowType::Movie)
}

/// Pick the airings to evict from a time-ordered conflict list
///
/// The head opens a window ending at its end date; following entries that start
/// before the window end join it and may shrink it. A window holding only the
/// head is dropped without eviction, otherwise its largest priority value is
/// evicted and the scan restarts. On equal priority a movie is kept over a
/// series or sport. The final two entries are never examined.
pub fn select_evictions(mut working: Vec<RankedConflict>) -> Vec<RankedConflict> {
    let mut evicted = Vec::new();

    while working.len() > 2 {
        let mut window_end = working[0].end_date;
        let mut worst = 0;
        let mut idx = 1;

        while idx < working.len() && working[idx].air_date < window_end {
            window_end = window_end.min(working[idx].end_date);
            if eviction_rank(&working[idx]) > eviction_rank(&working[worst]) {
                worst = idx;
            }
            idx += 1;
        }

        if idx < 2 {
            working.remove(0);
            continue;
        }

        evicted.push(working.remove(worst));
    }

    if working.len() == 2
        && overlaps(
            working[0].air_date,
            working[0].end_date,
            working[1].air_date,
            working[1].end_date,
        )
    {
        debug!(
            "Airings {} and {} still overlap after resolution",
            working[0].airing_id, working[1].airing_id
        );
    }

    evicted
}

/// Unschedule the least important airing of every overlapping window
pub async fn autoresolve_conflicts(
    db: &CacheDatabase,
    client: &ApplianceClient,
) -> Result<UnscheduleOutcome> {
    let ranked = rank_conflicts(db.get_conflicts_with_priority()?)?;
    let evictions = select_evictions(ranked);
    if evictions.is_empty() {
        debug!("No conflicts to resolve");
        return Ok(UnscheduleOutcome::default());
    }

    info!("Evicting {} conflicted airings", evictions.len());
    let targets: Vec<UnscheduleTarget> = evictions
        .iter()
        .map(|c| UnscheduleTarget {
            airing_id: c.airing_id,
            show_type: c.show_type,
        })
        .collect();
    unschedule_airings(db, client, &targets).await
}

/// Ask the appliance to drop each target from its schedule
///
/// Airings the appliance no longer knows are deleted locally and counted as
/// `not_found`. Any other state than `unscheduled`/`none` aborts the batch.
pub async fn unschedule_airings(
    db: &CacheDatabase,
    client: &ApplianceClient,
    targets: &[UnscheduleTarget],
) -> Result<UnscheduleOutcome> {
    info!("Unscheduling {} airings", targets.len());
    let mut outcome = UnscheduleOutcome::default();

    for target in targets {
        let airing = client.unschedule(target.show_type, target.airing_id).await?;

        if airing.is_not_found() {
            info!("Airing {} not found on appliance", target.airing_id);
            db.delete_airing(target.airing_id)?;
            outcome.not_found += 1;
            continue;
        }

        let state = ScheduleState::from(airing.schedule.state.as_str());
        if !state.is_unscheduled() {
            return Err(SyncError::UnscheduleFailed {
                airing_id: target.airing_id,
                state: state.as_str().to_string(),
            });
        }

        let path = format!("/guide/airings/{}", target.airing_id);
        match AiringRecord::from_api(&path, &airing) {
            Ok(record) => {
                db.upsert_airings(&[record])?;
            }
            Err(e) => {
                warn!("Could not store returned airing {}: {}", target.airing_id, e);
                db.set_airing_state(target.airing_id, &state)?;
            }
        }
        outcome.unscheduled += 1;
    }

    info!(
        "{} airings unscheduled, {} already gone",
        outcome.unscheduled, outcome.not_found
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::dvr::models::{ShowRecord, SystemInfo};

    fn ranked(airing_id: i64, air_date: i64, end_date: i64, priority: i64) -> RankedConflict {
        RankedConflict {
            airing_id,
            show_id: airing_id * 10,
            show_type: ShowType::Series,
            air_date,
            end_date,
            priority,
        }
    }

    fn interval(airing_id: i64, air_date: i64, end_date: i64) -> Conflict {
        Conflict {
            airing_id,
            show_id: 1,
            air_date,
            end_date,
        }
    }

    fn db() -> CacheDatabase {
        CacheDatabase::open_in_memory(&SystemInfo {
            server_id: "SID_TEST".to_string(),
            name: "Den".to_string(),
            private_ip: "127.0.0.1".to_string(),
        })
        .unwrap()
    }

    fn show(show_id: i64, show_type: ShowType) -> ShowRecord {
        ShowRecord {
            show_id,
            parent_show_id: None,
            show_type,
            rule: None,
            channel_id: None,
            keep_rule: "none".to_string(),
            keep_count: None,
            title: format!("Show {}", show_id),
            description: None,
            release_date: None,
            runtime: None,
            rating: None,
            stars: None,
            genres: vec![],
            cast: vec![],
            directors: vec![],
            awards: vec![],
        }
    }

    fn airing(airing_id: i64, show_id: i64, air_date: i64, duration: i64, state: ScheduleState) -> AiringRecord {
        AiringRecord {
            airing_id,
            show_id,
            air_date,
            duration,
            channel_id: 1,
            state,
            episode: None,
        }
    }

    #[test]
    fn test_overlap_is_symmetric_and_reflexive() {
        let intervals = [(0, 100), (50, 150), (100, 200), (0, 0), (10, 90), (200, 300)];
        for &(a1, e1) in &intervals {
            assert!(overlaps(a1, e1, a1, e1));
            for &(a2, e2) in &intervals {
                assert_eq!(overlaps(a1, e1, a2, e2), overlaps(a2, e2, a1, e1));
            }
        }
        assert!(overlaps(0, 100, 50, 150));
        assert!(overlaps(0, 100, 10, 90));
        assert!(!overlaps(0, 100, 100, 200));
        assert!(!overlaps(0, 100, 200, 300));
    }

    #[test]
    fn test_scheduled_airing_matches_first_conflict_only() {
        let conflicted = vec![interval(1, 0, 100), interval(2, 50, 150)];
        let scheduled = vec![interval(3, 60, 120), interval(4, 500, 600)];
        let conflicts = detect_conflicts(&conflicted, &scheduled);
        let ids: Vec<i64> = conflicts.iter().map(|c| c.airing_id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn test_lowest_importance_in_window_is_evicted() {
        let working = vec![ranked(1, 0, 100, 2), ranked(2, 50, 150, 1), ranked(3, 200, 300, 0)];
        let evicted = select_evictions(working);
        let ids: Vec<i64> = evicted.iter().map(|c| c.airing_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_non_overlapping_head_is_dropped_without_eviction() {
        let working = vec![
            ranked(1, 0, 10, 9),
            ranked(2, 20, 30, 9),
            ranked(3, 40, 50, 9),
            ranked(4, 60, 70, 9),
        ];
        assert!(select_evictions(working).is_empty());
    }

    #[test]
    fn test_each_eviction_shrinks_the_set() {
        let working = vec![
            ranked(1, 0, 100, 1),
            ranked(2, 0, 100, 3),
            ranked(3, 0, 100, 2),
            ranked(4, 0, 100, 5),
            ranked(5, 0, 100, 4),
        ];
        let evicted = select_evictions(working);
        let ids: Vec<i64> = evicted.iter().map(|c| c.airing_id).collect();
        assert_eq!(ids, vec![4, 5, 2]);
    }

    #[test]
    fn test_last_two_entries_are_left_alone() {
        // Known boundary case: a remaining overlapping pair is not resolved
        let working = vec![ranked(1, 0, 100, 1), ranked(2, 50, 150, 7)];
        assert!(select_evictions(working).is_empty());
    }

    #[test]
    fn test_movie_priority_is_forced_to_zero() {
        let rows = vec![
            (interval(1, 0, 100), Some("movie".to_string()), Some(5)),
            (interval(2, 0, 100), Some("series".to_string()), Some(0)),
            (interval(3, 10, 100), Some("sport".to_string()), Some(1)),
        ];
        let ranked = rank_conflicts(rows).unwrap();
        assert_eq!(ranked[0].airing_id, 1);
        assert_eq!(ranked[0].priority, 0);

        let evicted = select_evictions(ranked);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].airing_id, 3);
    }

    #[test]
    fn test_movie_kept_over_series_with_equal_priority() {
        let rows = vec![
            (interval(1, 0, 100), Some("movie".to_string()), Some(5)),
            (interval(2, 0, 100), Some("series".to_string()), Some(0)),
            (interval(3, 200, 300), Some("series".to_string()), Some(0)),
        ];
        let evicted = select_evictions(rank_conflicts(rows).unwrap());
        let ids: Vec<i64> = evicted.iter().map(|c| c.airing_id).collect();
        assert_eq!(ids, vec![2]);

        // Order of the rows does not matter
        let rows = vec![
            (interval(1, 0, 100), Some("series".to_string()), Some(0)),
            (interval(2, 0, 100), Some("movie".to_string()), None),
            (interval(3, 200, 300), Some("series".to_string()), Some(0)),
        ];
        let evicted = select_evictions(rank_conflicts(rows).unwrap());
        let ids: Vec<i64> = evicted.iter().map(|c| c.airing_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_missing_priority_is_fatal() {
        let rows = vec![(interval(1, 0, 100), Some("series".to_string()), None)];
        let err = rank_conflicts(rows).unwrap_err();
        assert!(matches!(err, SyncError::MissingPriority { show_id: 1 }));
    }

    #[test]
    fn test_rebuild_conflicts_from_cache() {
        let db = db();
        db.upsert_airings(&[
            airing(1, 10, 1_000, 3_600, ScheduleState::Conflict),
            airing(2, 20, 1_000, 1_800, ScheduleState::Scheduled),
            airing(3, 30, 9_000, 1_800, ScheduleState::Scheduled),
            airing(4, 40, 1_500, 600, ScheduleState::None),
        ])
        .unwrap();

        assert_eq!(rebuild_conflicts(&db).unwrap(), 2);
        let ids: Vec<i64> = db.get_conflicts().unwrap().iter().map(|c| c.airing_id).collect();
        assert_eq!(ids, vec![2, 1]);

        // Rebuilding replaces rather than accumulates
        assert_eq!(rebuild_conflicts(&db).unwrap(), 2);
        assert_eq!(db.get_conflicts().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_not_found_deletes_local_airing() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guide/series/episodes/42"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "object_not_found", "details": "42"}
            })))
            .mount(&server)
            .await;

        let db = db();
        db.upsert_airings(&[airing(42, 10, 1_000, 1_800, ScheduleState::Scheduled)]).unwrap();
        let client = ApplianceClient::with_base_url(server.uri());

        let outcome = unschedule_airings(
            &db,
            &client,
            &[UnscheduleTarget {
                airing_id: 42,
                show_type: ShowType::Series,
            }],
        )
        .await
        .unwrap();

        assert_eq!(outcome.unscheduled, 0);
        assert_eq!(outcome.resolved(), 1);
        assert_eq!(db.get_airing_state(42).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unexpected_state_aborts_batch() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guide/movies/airings/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object_id": 7,
                "movie_path": "/guide/movies/70",
                "airing_details": {"datetime": "2030-01-01T10:00Z", "duration": 3600,
                                   "channel": {"object_id": 1}},
                "schedule": {"state": "scheduled"}
            })))
            .mount(&server)
            .await;

        let db = db();
        let client = ApplianceClient::with_base_url(server.uri());
        let err = unschedule_airings(
            &db,
            &client,
            &[
                UnscheduleTarget {
                    airing_id: 7,
                    show_type: ShowType::Movie,
                },
                UnscheduleTarget {
                    airing_id: 8,
                    show_type: ShowType::Movie,
                },
            ],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::UnscheduleFailed { airing_id: 7, .. }));
    }

    #[tokio::test]
    async fn test_autoresolve_evicts_through_appliance() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guide/series/episodes/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object_id": 1,
                "series_path": "/guide/series/10",
                "episode": {"number": 1, "season_number": 1},
                "airing_details": {"datetime": "2030-01-01T10:00Z", "duration": 3600,
                                   "channel": {"object_id": 1}},
                "schedule": {"state": "none"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let db = db();
        db.upsert_shows(&[
            show(10, ShowType::Series),
            show(20, ShowType::Series),
            show(30, ShowType::Series),
        ])
        .unwrap();
        db.set_show_priority(10, 2).unwrap();
        db.set_show_priority(20, 1).unwrap();
        db.set_show_priority(30, 0).unwrap();
        db.upsert_airings(&[
            airing(1, 10, 0, 100, ScheduleState::Conflict),
            airing(2, 20, 50, 100, ScheduleState::Scheduled),
            airing(3, 30, 200, 100, ScheduleState::Conflict),
        ])
        .unwrap();
        rebuild_conflicts(&db).unwrap();

        let client = ApplianceClient::with_base_url(server.uri());
        let outcome = autoresolve_conflicts(&db, &client).await.unwrap();
        assert_eq!(outcome.unscheduled, 1);
        assert_eq!(db.get_airing_state(1).unwrap(), Some(ScheduleState::None));
        assert_eq!(db.get_airing_state(2).unwrap(), Some(ScheduleState::Scheduled));
    }
}
