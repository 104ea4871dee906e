//! Freshness scheduler and work queue processor
//!
//! Stale guide, schedule or recordings data turns into queue tasks. Tasks run
//! in key order; a task is deleted only after it succeeds.

use tracing::{error, info, warn};

use crate::dvr::database::CacheDatabase;
use crate::dvr::error::Result;
use crate::dvr::models::{LastUpdated, QueueAction, QueueTask};
use crate::dvr::refresh::{refresh_guide, refresh_recordings, RefreshMode};
use crate::dvr::Appliance;

/// Guide data older than this triggers a full refresh (24 hours)
pub const GUIDE_MAX_AGE_SECONDS: i64 = 24 * 60 * 60;

/// Schedule states older than this trigger a schedule refresh (6 hours)
pub const SCHEDULE_MAX_AGE_SECONDS: i64 = 6 * 60 * 60;

/// Recordings older than this trigger a recordings refresh (6 hours)
pub const RECORDINGS_MAX_AGE_SECONDS: i64 = 6 * 60 * 60;

/// Carries out EXPORT tasks
pub trait RecordingExporter: Send + Sync {
    fn export(&self, details: &str, export_path: Option<&str>) -> Result<()>;
}

/// Exporter that only records the request
#[derive(Debug, Default)]
pub struct LoggingExporter;

impl RecordingExporter for LoggingExporter {
    fn export(&self, details: &str, export_path: Option<&str>) -> Result<()> {
        warn!(
            "Export of {} to {:?} requested; no exporter configured",
            details, export_path
        );
        Ok(())
    }
}

fn guide_stale(last: &LastUpdated, now: i64) -> bool {
    now > last.guide + GUIDE_MAX_AGE_SECONDS
}

fn schedule_stale(last: &LastUpdated, now: i64) -> bool {
    now > last.scheduled + SCHEDULE_MAX_AGE_SECONDS
}

fn recordings_stale(last: &LastUpdated, now: i64) -> bool {
    now > last.recordings + RECORDINGS_MAX_AGE_SECONDS
}

/// True when any category is past its threshold
pub fn needs_refresh(last: &LastUpdated, now: i64) -> bool {
    guide_stale(last, now) || schedule_stale(last, now) || recordings_stale(last, now)
}

/// Refresh actions whose categories are past their thresholds
///
/// At most one of UPDATEGUIDE and UPDATESCHEDULED is returned, the guide
/// refresh covering the schedule. UPDATERECORDINGS comes first so that a
/// head insert of the list leaves the guide task in front.
pub fn due_actions(last: &LastUpdated, now: i64) -> Vec<QueueAction> {
    let mut due = Vec::new();
    if recordings_stale(last, now) {
        due.push(QueueAction::UpdateRecordings);
    }
    if guide_stale(last, now) {
        due.push(QueueAction::UpdateGuide);
    } else if schedule_stale(last, now) {
        due.push(QueueAction::UpdateScheduled);
    }
    due
}

/// Queue refresh work for every stale category
///
/// Categories with a task already pending are skipped. Returns the actions
/// actually queued.
pub fn enqueue_due(db: &CacheDatabase, now: i64) -> Result<Vec<QueueAction>> {
    let due = due_actions(&db.get_last_updated()?, now);
    enqueue_actions(db, due)
}

fn enqueue_actions(db: &CacheDatabase, due: Vec<QueueAction>) -> Result<Vec<QueueAction>> {
    let mut queued = Vec::new();
    for action in due {
        if db.count_pending(&action)? > 0 {
            info!("{} already pending", action.as_str());
            continue;
        }
        db.enqueue_priority(&action, "", None)?;
        info!("Enqueued {}", action.as_str());
        queued.push(action);
    }
    Ok(queued)
}

/// Pending tasks in execution order
pub fn load_queue(db: &CacheDatabase) -> Result<Vec<QueueTask>> {
    let queue = db.get_queue()?;
    info!("Loaded {} queue records", queue.len());
    Ok(queue)
}

/// Result of one queue run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueRun {
    /// Tasks that completed
    pub processed: usize,
    /// Actions of tasks that failed and were dropped
    pub failed: Vec<QueueAction>,
    /// Processing stopped because a category went stale
    pub stopped_early: bool,
}

/// Run pending tasks in order
///
/// Every task is deleted once it has run, whether it succeeded or not; stale
/// refresh work is queued again from the freshness stamps. After each task the
/// run stops early if a category has gone stale, ignoring the actions listed in
/// `exempt` and those that failed during this run.
pub async fn process_queue(app: &Appliance, exempt: &[QueueAction]) -> Result<QueueRun> {
    let mut run = QueueRun::default();

    for task in load_queue(&app.db)? {
        match dispatch(app, &task).await {
            Ok(()) => run.processed += 1,
            Err(e) => {
                error!(
                    "Queue record {} {} failed: {}",
                    task.task_id,
                    task.action.as_str(),
                    e
                );
                run.failed.push(task.action.clone());
            }
        }

        info!(
            "Deleting queue record {} {} {}",
            task.task_id,
            task.action.as_str(),
            task.details
        );
        app.db.delete_queue_task(task.task_id)?;

        let stale = due_actions(&app.db.get_last_updated()?, app.now());
        if stale
            .iter()
            .any(|a| !exempt.contains(a) && !run.failed.contains(a))
        {
            info!("Stopping queue processing to queue an update");
            run.stopped_early = true;
            break;
        }
    }

    Ok(run)
}

async fn dispatch(app: &Appliance, task: &QueueTask) -> Result<()> {
    match &task.action {
        QueueAction::UpdateGuide => {
            refresh_guide(app, RefreshMode::Full).await?;
            Ok(())
        }
        QueueAction::UpdateScheduled => {
            refresh_guide(app, RefreshMode::ScheduleOnly).await?;
            Ok(())
        }
        QueueAction::UpdateRecordings => refresh_recordings(app).await,
        QueueAction::Export => {
            info!("Exporting {}", task.details);
            let default_path = app.db.get_default_export_path()?;
            let path = task.export_path.as_deref().or(default_path.as_deref());
            app.exporter.export(&task.details, path)
        }
        QueueAction::Unknown(action) => {
            error!("Invalid action: {}", action);
            Ok(())
        }
    }
}

/// Outcome of one worker cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub failed: Vec<QueueAction>,
}

/// One worker cycle: queue whatever is stale, then work the queue
///
/// Re-checks staleness whenever the queue run stopped early. A refresh that
/// failed is not queued again within the same cycle.
pub async fn run_cycle(app: &Appliance) -> Result<CycleReport> {
    let mut report = CycleReport::default();
    loop {
        let due: Vec<QueueAction> = due_actions(&app.db.get_last_updated()?, app.now())
            .into_iter()
            .filter(|a| !report.failed.contains(a))
            .collect();
        if !due.is_empty() {
            enqueue_actions(&app.db, due)?;
        }

        let run = process_queue(app, &report.failed).await?;
        report.processed += run.processed;
        report.failed.extend(run.failed);
        if !run.stopped_early {
            break;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wiremock::MockServer;

    use crate::dvr::client::ApplianceClient;
    use crate::dvr::models::SystemInfo;

    const HOUR: i64 = 60 * 60;
    const NOW: i64 = 1_893_456_000;

    fn info() -> SystemInfo {
        SystemInfo {
            server_id: "SID_TEST".to_string(),
            name: "Den".to_string(),
            private_ip: "127.0.0.1".to_string(),
        }
    }

    fn db() -> CacheDatabase {
        CacheDatabase::open_in_memory(&info()).unwrap()
    }

    #[derive(Default)]
    struct RecordingExports(Mutex<Vec<(String, Option<String>)>>);

    impl RecordingExporter for RecordingExports {
        fn export(&self, details: &str, export_path: Option<&str>) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((details.to_string(), export_path.map(str::to_string)));
            Ok(())
        }
    }

    #[test]
    fn test_needs_refresh_thresholds() {
        let fresh = LastUpdated {
            guide: NOW,
            scheduled: NOW,
            recordings: NOW,
        };
        assert!(!needs_refresh(&fresh, NOW + 6 * HOUR));
        assert!(needs_refresh(&fresh, NOW + 6 * HOUR + 1));

        let schedule_fresh = LastUpdated {
            guide: NOW - 24 * HOUR - 1,
            ..fresh
        };
        assert!(needs_refresh(&schedule_fresh, NOW));
    }

    #[test]
    fn test_guide_takes_precedence_over_schedule() {
        let db = db();
        let queued = enqueue_due(&db, NOW).unwrap();
        assert_eq!(queued, vec![QueueAction::UpdateRecordings, QueueAction::UpdateGuide]);
        assert_eq!(db.count_pending(&QueueAction::UpdateScheduled).unwrap(), 0);

        // Guide runs first
        let queue = db.get_queue().unwrap();
        assert_eq!(queue[0].action, QueueAction::UpdateGuide);
    }

    #[test]
    fn test_schedule_only_when_guide_is_fresh() {
        let db = db();
        db.set_guide_last_updated(NOW - HOUR).unwrap();
        db.set_recordings_last_updated(NOW - HOUR).unwrap();
        let queued = enqueue_due(&db, NOW).unwrap();
        assert_eq!(queued, vec![QueueAction::UpdateScheduled]);
    }

    #[test]
    fn test_at_most_one_pending_task_per_category() {
        let db = db();
        for _ in 0..5 {
            enqueue_due(&db, NOW).unwrap();
        }
        assert_eq!(db.count_pending(&QueueAction::UpdateGuide).unwrap(), 1);
        assert_eq!(db.count_pending(&QueueAction::UpdateRecordings).unwrap(), 1);
        assert_eq!(db.get_queue().unwrap().len(), 2);
    }

    #[test]
    fn test_freshness_tasks_precede_exports() {
        let db = db();
        for i in 0..3 {
            db.enqueue(&QueueAction::Export, &format!("/recordings/airings/{}", i), None)
                .unwrap();
        }
        enqueue_due(&db, NOW).unwrap();

        let queue = db.get_queue().unwrap();
        let first_export = queue
            .iter()
            .position(|t| t.action == QueueAction::Export)
            .unwrap();
        assert_eq!(first_export, 2);
    }

    #[tokio::test]
    async fn test_export_and_unknown_tasks_are_consumed() {
        let server = MockServer::start().await;
        let exports = Arc::new(RecordingExports::default());
        let db = db();
        db.set_guide_last_updated(NOW).unwrap();
        db.set_scheduled_last_updated(NOW).unwrap();
        db.set_recordings_last_updated(NOW).unwrap();
        db.set_default_export_path(Some("/mnt/media")).unwrap();
        db.enqueue(&QueueAction::Export, "/recordings/airings/1", None).unwrap();
        db.enqueue(&QueueAction::Unknown("REINDEX".to_string()), "", None).unwrap();
        db.enqueue(&QueueAction::Export, "/recordings/airings/2", Some("/mnt/other"))
            .unwrap();

        let app = Appliance::new(info(), db, ApplianceClient::with_base_url(server.uri()))
            .with_clock(Arc::new(|| NOW))
            .with_exporter(exports.clone());

        let report = run_cycle(&app).await.unwrap();
        assert_eq!(report.processed, 3);
        assert!(report.failed.is_empty());
        assert!(app.db.get_queue().unwrap().is_empty());

        let seen = exports.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("/recordings/airings/1".to_string(), Some("/mnt/media".to_string())),
                ("/recordings/airings/2".to_string(), Some("/mnt/other".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_is_dropped_and_later_tasks_run() {
        // No mocks mounted: every appliance call answers 404 with an empty body
        let server = MockServer::start().await;
        let exports = Arc::new(RecordingExports::default());
        let db = db();
        db.set_guide_last_updated(NOW).unwrap();
        db.set_scheduled_last_updated(NOW - 7 * HOUR).unwrap();
        db.set_recordings_last_updated(NOW).unwrap();
        db.enqueue(&QueueAction::Export, "/recordings/airings/1", Some("/mnt/media"))
            .unwrap();

        let app = Appliance::new(info(), db, ApplianceClient::with_base_url(server.uri()))
            .with_clock(Arc::new(|| NOW))
            .with_exporter(exports.clone());

        let report = run_cycle(&app).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, vec![QueueAction::UpdateScheduled]);
        assert!(app.db.get_queue().unwrap().is_empty());
        assert_eq!(exports.0.lock().unwrap().len(), 1);

        // The next cycle derives the refresh again from the stale stamp
        let report = run_cycle(&app).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, vec![QueueAction::UpdateScheduled]);
        assert!(app.db.get_queue().unwrap().is_empty());
        assert_eq!(exports.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_due_actions_orders_recordings_before_guide() {
        let stale = LastUpdated::default();
        assert_eq!(
            due_actions(&stale, NOW),
            vec![QueueAction::UpdateRecordings, QueueAction::UpdateGuide]
        );
        let fresh = LastUpdated {
            guide: NOW,
            scheduled: NOW,
            recordings: NOW,
        };
        assert!(due_actions(&fresh, NOW).is_empty());
    }
}
