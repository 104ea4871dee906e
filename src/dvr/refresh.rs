//! Guide, schedule and recordings refresh
//!
//! A guide refresh is a fixed-point loop: every pass re-reads the appliance,
//! rebuilds conflicts and reconciles the export tree. Export matches unschedule
//! airings, which changes what the appliance reports, so passes repeat until
//! one unschedules nothing. Only then are remaining conflicts resolved by priority.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::dvr::api;
use crate::dvr::conflicts::{autoresolve_conflicts, rebuild_conflicts};
use crate::dvr::error::Result;
use crate::dvr::exports::reconcile_exports;
use crate::dvr::models::{AiringRecord, ChannelRecord, RecordingRecord, ShowRecord};
use crate::dvr::Appliance;

/// Which airings a guide refresh re-reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Every guide airing
    Full,
    /// Only airings the appliance reports as scheduled or conflicted
    ScheduleOnly,
}

/// What one refresh pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub expired: usize,
    pub channels: usize,
    pub shows: usize,
    pub airings: usize,
    pub conflicts: usize,
    pub exports_unscheduled: usize,
}

/// Refresh the guide until export reconciliation stops unscheduling, then resolve conflicts
///
/// Returns the number of passes run.
pub async fn refresh_guide(app: &Appliance, mode: RefreshMode) -> Result<usize> {
    info!("Updating guide ({:?})", mode);

    let mut passes = 0;
    loop {
        passes += 1;
        let stats = run_pass(app, mode).await?;
        debug!("Refresh pass {}: {:?}", passes, stats);

        if stats.exports_unscheduled == 0 {
            let outcome = autoresolve_conflicts(&app.db, &app.client).await?;
            if outcome.resolved() > 0 {
                info!("Resolved {} conflicts by priority", outcome.resolved());
            }
            break;
        }

        info!(
            "{} airings unscheduled from exports, refreshing again",
            stats.exports_unscheduled
        );
    }

    let now = app.now();
    if mode == RefreshMode::Full {
        app.db.set_guide_last_updated(now)?;
    }
    app.db.set_scheduled_last_updated(now)?;

    info!("Guide updated after {} pass(es)", passes);
    Ok(passes)
}

/// One pass of the refresh pipeline
pub async fn run_pass(app: &Appliance, mode: RefreshMode) -> Result<PassStats> {
    let mut stats = PassStats {
        expired: app.db.purge_expired_airings(app.now())?,
        ..Default::default()
    };

    stats.channels = refresh_channels(app, "/guide/channels").await?;
    stats.shows = refresh_shows(app, "/guide/shows").await?;

    stats.airings = match mode {
        RefreshMode::Full => refresh_airings(app, "/guide/airings").await?,
        RefreshMode::ScheduleOnly => {
            app.db.reset_scheduled()?;
            let scheduled = tolerate_empty(refresh_airings(app, "/guide/airings?state=scheduled").await)?;
            let conflicted = tolerate_empty(refresh_airings(app, "/guide/airings?state=conflicted").await)?;
            scheduled + conflicted
        }
    };

    stats.conflicts = rebuild_conflicts(&app.db)?;
    refresh_space(app).await?;

    if app.db.get_default_export_path()?.is_some() {
        stats.exports_unscheduled = reconcile_exports(&app.db, &app.client, None).await?;
    }

    Ok(stats)
}

fn tolerate_empty(result: Result<usize>) -> Result<usize> {
    match result {
        Err(e) if e.is_empty_result() => {
            debug!("{}", e);
            Ok(0)
        }
        other => other,
    }
}

/// Refresh the recordings snapshot and drop recordings the appliance no longer has
pub async fn refresh_recordings(app: &Appliance) -> Result<()> {
    info!("Updating recordings");
    refresh_channels(app, "/recordings/channels").await?;
    refresh_shows(app, "/recordings/shows").await?;

    let details: BTreeMap<String, api::Recording> =
        app.client.fetch_all("/recordings/airings", "recording airings").await?;
    let records = details
        .values()
        .map(RecordingRecord::from_api)
        .collect::<Result<Vec<_>>>()?;
    app.db.upsert_recordings(&records)?;

    let keep: HashSet<i64> = records.iter().map(|r| r.recording_id).collect();
    app.db.delete_recordings_except(&keep)?;

    app.db.set_recordings_last_updated(app.now())?;
    info!("{} recordings updated", records.len());
    Ok(())
}

async fn refresh_channels(app: &Appliance, path: &str) -> Result<usize> {
    let details: BTreeMap<String, api::Channel> = app.client.fetch_all(path, "channels").await?;
    let records: Vec<ChannelRecord> = details
        .iter()
        .map(|(p, c)| ChannelRecord::from_api(p, c))
        .collect();
    app.db.upsert_channels(&records)
}

async fn refresh_shows(app: &Appliance, path: &str) -> Result<usize> {
    let details: BTreeMap<String, api::Show> = app.client.fetch_all(path, "shows").await?;
    let records = details
        .iter()
        .map(|(p, s)| ShowRecord::from_api(p, s))
        .collect::<Result<Vec<_>>>()?;
    app.db.upsert_shows(&records)
}

async fn refresh_airings(app: &Appliance, path: &str) -> Result<usize> {
    let details: BTreeMap<String, api::Airing> = app.client.fetch_all(path, "airings").await?;
    let mut records = Vec::with_capacity(details.len());
    for (p, a) in &details {
        if let Some(err) = &a.error {
            warn!("Skipping airing {}: {}", p, err.code);
            continue;
        }
        records.push(AiringRecord::from_api(p, a)?);
    }
    app.db.upsert_airings(&records)
}

async fn refresh_space(app: &Appliance) -> Result<()> {
    let drives = app.client.get_drives().await?;
    let total = drives.iter().map(|d| d.size).sum();
    let free = drives.iter().map(|d| d.free).sum();
    app.db.update_space(total, free)?;
    debug!("Appliance storage: {} free of {}", free, total);
    Ok(())
}
