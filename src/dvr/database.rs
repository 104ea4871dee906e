//! Cache database for one appliance
//!
//! Uses rusqlite with connection pooling (r2d2). WAL mode is enabled for file
//! backed caches. Every statement binds its values; nothing is spliced into SQL.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

use crate::dvr::error::{Result, SyncError};
use crate::dvr::models::*;

/// Schema version written to `system_info.db_ver`
pub const CACHE_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS system_info (
    server_id              TEXT NOT NULL PRIMARY KEY,
    server_name            TEXT NOT NULL,
    private_ip             TEXT NOT NULL,
    db_ver                 INTEGER NOT NULL,
    guide_last_updated     INTEGER NOT NULL DEFAULT 0,
    recordings_last_updated INTEGER NOT NULL DEFAULT 0,
    scheduled_last_updated INTEGER NOT NULL DEFAULT 0,
    export_path            TEXT,
    total_size             INTEGER,
    free_size              INTEGER
);

CREATE TABLE IF NOT EXISTS channel (
    channel_id INTEGER NOT NULL PRIMARY KEY,
    call_sign  TEXT NOT NULL,
    major      INTEGER NOT NULL,
    minor      INTEGER NOT NULL,
    network    TEXT
);

CREATE TABLE IF NOT EXISTS show (
    show_id        INTEGER NOT NULL PRIMARY KEY,
    parent_show_id INTEGER,
    rule           TEXT,
    channel_id     INTEGER,
    keep_recording TEXT NOT NULL,
    keep_count     INTEGER,
    show_type      TEXT NOT NULL,
    title          TEXT NOT NULL,
    descript       TEXT,
    release_date   INTEGER,
    orig_run_time  INTEGER,
    rating         TEXT,
    stars          INTEGER
);

CREATE TABLE IF NOT EXISTS show_award (
    show_id        INTEGER NOT NULL,
    won            INTEGER NOT NULL,
    award_name     TEXT NOT NULL,
    award_category TEXT NOT NULL,
    award_year     INTEGER NOT NULL,
    nominee        TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (show_id, award_name, award_category, award_year, nominee)
);

CREATE TABLE IF NOT EXISTS show_genre (
    show_id INTEGER NOT NULL,
    genre   TEXT NOT NULL,
    PRIMARY KEY (show_id, genre)
);

CREATE TABLE IF NOT EXISTS show_cast_member (
    show_id     INTEGER NOT NULL,
    cast_member TEXT NOT NULL,
    PRIMARY KEY (show_id, cast_member)
);

CREATE TABLE IF NOT EXISTS show_director (
    show_id  INTEGER NOT NULL,
    director TEXT NOT NULL,
    PRIMARY KEY (show_id, director)
);

CREATE TABLE IF NOT EXISTS show_priority (
    show_id  INTEGER NOT NULL PRIMARY KEY,
    priority INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS team (
    team_id INTEGER NOT NULL PRIMARY KEY,
    team    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS episode (
    episode_id        TEXT NOT NULL PRIMARY KEY,
    show_id           INTEGER NOT NULL,
    title             TEXT,
    descript          TEXT,
    episode           INTEGER,
    season            TEXT,
    season_type       TEXT,
    original_air_date INTEGER,
    home_team_id      INTEGER
);

CREATE TABLE IF NOT EXISTS episode_team (
    episode_id TEXT NOT NULL,
    team_id    INTEGER NOT NULL,
    PRIMARY KEY (episode_id, team_id)
);

CREATE TABLE IF NOT EXISTS airing (
    airing_id  INTEGER NOT NULL PRIMARY KEY,
    show_id    INTEGER NOT NULL,
    air_date   INTEGER NOT NULL,
    duration   INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    scheduled  TEXT NOT NULL,
    episode_id TEXT
);

CREATE TABLE IF NOT EXISTS recording (
    recording_id       INTEGER NOT NULL PRIMARY KEY,
    show_id            INTEGER NOT NULL,
    air_date           INTEGER NOT NULL,
    airing_duration    INTEGER NOT NULL,
    channel_id         INTEGER NOT NULL,
    recording_state    TEXT NOT NULL,
    clean              INTEGER NOT NULL,
    recording_duration INTEGER NOT NULL,
    recording_size     INTEGER NOT NULL,
    com_skip_state     TEXT NOT NULL,
    episode_id         TEXT
);

CREATE TABLE IF NOT EXISTS recording_error (
    recording_id      INTEGER NOT NULL PRIMARY KEY,
    show_id           INTEGER NOT NULL,
    episode_id        TEXT,
    channel_id        INTEGER NOT NULL,
    air_date          INTEGER NOT NULL,
    airing_duration   INTEGER NOT NULL,
    recording_duration INTEGER NOT NULL,
    recording_size    INTEGER NOT NULL,
    recording_state   TEXT NOT NULL,
    clean             INTEGER NOT NULL,
    com_skip_state    TEXT NOT NULL,
    com_skip_error    TEXT,
    error_code        TEXT,
    error_details     TEXT,
    error_description TEXT
);

CREATE TABLE IF NOT EXISTS queue (
    queue_id    INTEGER PRIMARY KEY,
    action      TEXT NOT NULL,
    details     TEXT NOT NULL,
    export_path TEXT
);

CREATE TABLE IF NOT EXISTS conflict (
    airing_id INTEGER NOT NULL PRIMARY KEY,
    show_id   INTEGER NOT NULL,
    air_date  INTEGER NOT NULL,
    end_date  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS exported_file (
    path TEXT NOT NULL PRIMARY KEY
);

CREATE INDEX IF NOT EXISTS idx_airing_scheduled ON airing(scheduled);
CREATE INDEX IF NOT EXISTS idx_airing_air_date ON airing(air_date);
CREATE INDEX IF NOT EXISTS idx_queue_action ON queue(action);
";

/// Database connection pool for one appliance cache
pub struct CacheDatabase {
    pool: Pool<SqliteConnectionManager>,
}

impl CacheDatabase {
    /// Open (or create) the cache file for an appliance
    pub fn open(db_path: &Path, info: &SystemInfo) -> Result<Self> {
        let db = Self::connect(db_path)?;
        db.upsert_system_info(info)?;
        info!("Appliance cache ready: {}", info.server_id);
        Ok(db)
    }

    /// Open a cache file that must already exist, without refreshing its system info
    pub fn open_existing(db_path: &Path) -> Result<Self> {
        if !db_path.is_file() {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no cache at {}", db_path.display()),
            )));
        }
        Self::connect(db_path)
    }

    fn connect(db_path: &Path) -> Result<Self> {
        info!("Opening appliance cache at: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(Duration::from_secs(10))
            .build(manager)?;

        let db = Self { pool };
        db.initialize_schema()?;
        db.configure_wal_mode()?;
        db.check_version()?;
        Ok(db)
    }

    /// Open a private in-memory cache
    ///
    /// Every pooled connection to `:memory:` would be its own database, so the
    /// pool holds exactly one connection.
    pub fn open_in_memory(info: &SystemInfo) -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)?;

        let db = Self { pool };
        db.initialize_schema()?;
        db.upsert_system_info(info)?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(SCHEMA)?;
        debug!("Cache schema initialized");
        Ok(())
    }

    fn configure_wal_mode(&self) -> Result<()> {
        let conn = self.get_conn()?;
        // PRAGMA journal_mode returns the new mode, so we use query_row
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        if journal_mode != "wal" {
            warn!("WAL mode not enabled, got: {}", journal_mode);
        } else {
            debug!("Cache journal mode: {}", journal_mode);
        }
        Ok(())
    }

    fn check_version(&self) -> Result<()> {
        let conn = self.get_conn()?;
        let stored: Option<i64> = conn
            .query_row("SELECT MAX(db_ver) FROM system_info", [], |row| row.get(0))?;

        match stored {
            Some(found) if found > CACHE_VERSION => Err(SyncError::IncompatibleCache {
                found,
                supported: CACHE_VERSION,
            }),
            Some(found) if found < CACHE_VERSION => {
                info!("Upgrading cache from version {} to {}", found, CACHE_VERSION);
                conn.execute(
                    "UPDATE system_info SET db_ver = ?1",
                    params![CACHE_VERSION],
                )?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // System info
    // ------------------------------------------------------------------

    /// Insert the single system info row, or refresh its name and address
    pub fn upsert_system_info(&self, info: &SystemInfo) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO system_info (server_id, server_name, private_ip, db_ver)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(server_id) DO UPDATE SET
                server_name = excluded.server_name,
                private_ip = excluded.private_ip",
            params![info.server_id, info.name, info.private_ip, CACHE_VERSION],
        )?;
        conn.execute(
            "DELETE FROM system_info WHERE server_id <> ?1",
            params![info.server_id],
        )?;
        Ok(())
    }

    pub fn get_last_updated(&self) -> Result<LastUpdated> {
        let conn = self.get_conn()?;
        let last = conn.query_row(
            "SELECT guide_last_updated, scheduled_last_updated, recordings_last_updated
             FROM system_info",
            [],
            |row| {
                Ok(LastUpdated {
                    guide: row.get(0)?,
                    scheduled: row.get(1)?,
                    recordings: row.get(2)?,
                })
            },
        )?;
        Ok(last)
    }

    pub fn set_guide_last_updated(&self, at: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("UPDATE system_info SET guide_last_updated = ?1", params![at])?;
        Ok(())
    }

    pub fn set_scheduled_last_updated(&self, at: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("UPDATE system_info SET scheduled_last_updated = ?1", params![at])?;
        Ok(())
    }

    pub fn set_recordings_last_updated(&self, at: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("UPDATE system_info SET recordings_last_updated = ?1", params![at])?;
        Ok(())
    }

    /// Default export root, if one has been configured
    pub fn get_default_export_path(&self) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let path: Option<String> =
            conn.query_row("SELECT export_path FROM system_info", [], |row| row.get(0))?;
        Ok(path.filter(|p| !p.is_empty()))
    }

    pub fn set_default_export_path(&self, path: Option<&str>) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("UPDATE system_info SET export_path = ?1", params![path])?;
        info!("Default export path set to {:?}", path);
        Ok(())
    }

    pub fn update_space(&self, total: i64, free: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE system_info SET total_size = ?1, free_size = ?2",
            params![total, free],
        )?;
        Ok(())
    }

    pub fn get_space(&self) -> Result<(Option<i64>, Option<i64>)> {
        let conn = self.get_conn()?;
        let space = conn.query_row(
            "SELECT total_size, free_size FROM system_info",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(space)
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Append a task after everything already queued
    pub fn enqueue(&self, action: &QueueAction, details: &str, export_path: Option<&str>) -> Result<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO queue (action, details, export_path) VALUES (?1, ?2, ?3)",
            params![action.as_str(), details, export_path],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Enqueued {} as task {}", action.as_str(), id);
        Ok(id)
    }

    /// Insert a task ahead of everything already queued
    pub fn enqueue_priority(
        &self,
        action: &QueueAction,
        details: &str,
        export_path: Option<&str>,
    ) -> Result<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO queue (queue_id, action, details, export_path)
             SELECT COALESCE(MIN(queue_id), 1) - 1, ?1, ?2, ?3 FROM queue",
            params![action.as_str(), details, export_path],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Enqueued {} ahead of queue as task {}", action.as_str(), id);
        Ok(id)
    }

    pub fn count_pending(&self, action: &QueueAction) -> Result<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE action = ?1",
            params![action.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// All pending tasks in execution order
    pub fn get_queue(&self) -> Result<Vec<QueueTask>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT queue_id, action, details, export_path FROM queue ORDER BY queue_id ASC",
        )?;
        let tasks = stmt
            .query_map([], |row| {
                let action: String = row.get(1)?;
                Ok(QueueTask {
                    task_id: row.get(0)?,
                    action: QueueAction::from(action.as_str()),
                    details: row.get(2)?,
                    export_path: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Remove a task; removing an absent id is not an error
    pub fn delete_queue_task(&self, task_id: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM queue WHERE queue_id = ?1", params![task_id])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Guide and recording upserts
    // ------------------------------------------------------------------

    pub fn upsert_channels(&self, channels: &[ChannelRecord]) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO channel (channel_id, call_sign, major, minor, network)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(channel_id) DO UPDATE SET
                    call_sign = excluded.call_sign,
                    major = excluded.major,
                    minor = excluded.minor,
                    network = excluded.network",
            )?;
            for c in channels {
                stmt.execute(params![c.channel_id, c.call_sign, c.major, c.minor, c.network])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} channels", channels.len());
        Ok(channels.len())
    }

    pub fn upsert_shows(&self, shows: &[ShowRecord]) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut show_stmt = tx.prepare(
                "INSERT INTO show (
                    show_id, parent_show_id, rule, channel_id, keep_recording, keep_count,
                    show_type, title, descript, release_date, orig_run_time, rating, stars
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(show_id) DO UPDATE SET
                    parent_show_id = excluded.parent_show_id,
                    rule = excluded.rule,
                    channel_id = excluded.channel_id,
                    keep_recording = excluded.keep_recording,
                    keep_count = excluded.keep_count,
                    show_type = excluded.show_type,
                    title = excluded.title,
                    descript = excluded.descript,
                    release_date = excluded.release_date,
                    orig_run_time = excluded.orig_run_time,
                    rating = excluded.rating,
                    stars = excluded.stars",
            )?;
            let mut genre_stmt = tx.prepare(
                "INSERT INTO show_genre (show_id, genre) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
            )?;
            let mut cast_stmt = tx.prepare(
                "INSERT INTO show_cast_member (show_id, cast_member) VALUES (?1, ?2)
                 ON CONFLICT DO NOTHING",
            )?;
            let mut director_stmt = tx.prepare(
                "INSERT INTO show_director (show_id, director) VALUES (?1, ?2)
                 ON CONFLICT DO NOTHING",
            )?;
            let mut award_stmt = tx.prepare(
                "INSERT INTO show_award (show_id, won, award_name, award_category, award_year, nominee)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT DO UPDATE SET won = excluded.won",
            )?;

            for s in shows {
                show_stmt.execute(params![
                    s.show_id,
                    s.parent_show_id,
                    s.rule,
                    s.channel_id,
                    s.keep_rule,
                    s.keep_count,
                    s.show_type.as_str(),
                    s.title,
                    s.description,
                    s.release_date,
                    s.runtime,
                    s.rating,
                    s.stars,
                ])?;
                for genre in &s.genres {
                    genre_stmt.execute(params![s.show_id, genre])?;
                }
                for member in &s.cast {
                    cast_stmt.execute(params![s.show_id, member])?;
                }
                for director in &s.directors {
                    director_stmt.execute(params![s.show_id, director])?;
                }
                for a in &s.awards {
                    award_stmt.execute(params![
                        s.show_id,
                        a.won,
                        a.name,
                        a.category,
                        a.year,
                        a.nominee.as_deref().unwrap_or(""),
                    ])?;
                }
            }
        }
        tx.commit()?;
        debug!("Upserted {} shows", shows.len());
        Ok(shows.len())
    }

    pub fn upsert_airings(&self, airings: &[AiringRecord]) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            for a in airings {
                if let Some(episode) = &a.episode {
                    write_episode(&tx, episode)?;
                }
            }
            let mut stmt = tx.prepare(
                "INSERT INTO airing (airing_id, show_id, air_date, duration, channel_id, scheduled, episode_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(airing_id) DO UPDATE SET
                    show_id = excluded.show_id,
                    air_date = excluded.air_date,
                    duration = excluded.duration,
                    channel_id = excluded.channel_id,
                    scheduled = excluded.scheduled,
                    episode_id = excluded.episode_id",
            )?;
            for a in airings {
                stmt.execute(params![
                    a.airing_id,
                    a.show_id,
                    a.air_date,
                    a.duration,
                    a.channel_id,
                    a.state.as_str(),
                    a.episode.as_ref().map(|e| e.episode_id.as_str()),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} airings", airings.len());
        Ok(airings.len())
    }

    pub fn upsert_recordings(&self, recordings: &[RecordingRecord]) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            for r in recordings {
                if let Some(episode) = &r.episode {
                    write_episode(&tx, episode)?;
                }
            }
            let mut stmt = tx.prepare(
                "INSERT INTO recording (
                    recording_id, show_id, air_date, airing_duration, channel_id, recording_state,
                    clean, recording_duration, recording_size, com_skip_state, episode_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(recording_id) DO UPDATE SET
                    show_id = excluded.show_id,
                    air_date = excluded.air_date,
                    airing_duration = excluded.airing_duration,
                    channel_id = excluded.channel_id,
                    recording_state = excluded.recording_state,
                    clean = excluded.clean,
                    recording_duration = excluded.recording_duration,
                    recording_size = excluded.recording_size,
                    com_skip_state = excluded.com_skip_state,
                    episode_id = excluded.episode_id",
            )?;
            let mut error_stmt = tx.prepare(
                "INSERT INTO recording_error (
                    recording_id, show_id, episode_id, channel_id, air_date, airing_duration,
                    recording_duration, recording_size, recording_state, clean, com_skip_state,
                    com_skip_error, error_code, error_details, error_description
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(recording_id) DO UPDATE SET
                    recording_duration = excluded.recording_duration,
                    recording_size = excluded.recording_size,
                    recording_state = excluded.recording_state,
                    clean = excluded.clean,
                    com_skip_state = excluded.com_skip_state,
                    com_skip_error = excluded.com_skip_error,
                    error_code = excluded.error_code,
                    error_details = excluded.error_details,
                    error_description = excluded.error_description",
            )?;
            for r in recordings {
                let episode_id = r.episode.as_ref().map(|e| e.episode_id.as_str());
                stmt.execute(params![
                    r.recording_id,
                    r.show_id,
                    r.air_date,
                    r.airing_duration,
                    r.channel_id,
                    r.recording_state,
                    r.clean,
                    r.recording_duration,
                    r.recording_size,
                    r.comskip_state,
                    episode_id,
                ])?;
                if let Some(e) = &r.error {
                    error_stmt.execute(params![
                        r.recording_id,
                        r.show_id,
                        episode_id,
                        r.channel_id,
                        r.air_date,
                        r.airing_duration,
                        r.recording_duration,
                        r.recording_size,
                        r.recording_state,
                        r.clean,
                        r.comskip_state,
                        e.comskip_error,
                        e.error_code,
                        e.error_details,
                        e.error_description,
                    ])?;
                }
            }
        }
        tx.commit()?;
        debug!("Upserted {} recordings", recordings.len());
        Ok(recordings.len())
    }

    /// Delete every recording whose id is not in `keep`
    pub fn delete_recordings_except(&self, keep: &HashSet<i64>) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let stale: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT recording_id FROM recording")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().filter(|id| !keep.contains(id)).collect()
        };
        for id in &stale {
            tx.execute("DELETE FROM recording WHERE recording_id = ?1", params![id])?;
            tx.execute("DELETE FROM recording_error WHERE recording_id = ?1", params![id])?;
        }
        tx.commit()?;
        if !stale.is_empty() {
            info!("Purged {} recordings no longer on the appliance", stale.len());
        }
        Ok(stale.len())
    }

    /// Delete airings that already started before `now`
    pub fn purge_expired_airings(&self, now: i64) -> Result<usize> {
        let conn = self.get_conn()?;
        let purged = conn.execute("DELETE FROM airing WHERE air_date < ?1", params![now])?;
        debug!("Purged {} expired airings", purged);
        Ok(purged)
    }

    /// Forget scheduled/conflict state before a schedule-only refresh re-reads it
    pub fn reset_scheduled(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let reset = conn.execute(
            "UPDATE airing SET scheduled = 'none' WHERE scheduled IN ('scheduled', 'conflict')",
            [],
        )?;
        debug!("Reset schedule state of {} airings", reset);
        Ok(reset)
    }

    pub fn delete_airing(&self, airing_id: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM airing WHERE airing_id = ?1", params![airing_id])?;
        conn.execute("DELETE FROM conflict WHERE airing_id = ?1", params![airing_id])?;
        info!("Deleted airing {} from cache", airing_id);
        Ok(())
    }

    pub fn set_airing_state(&self, airing_id: i64, state: &ScheduleState) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE airing SET scheduled = ?1 WHERE airing_id = ?2",
            params![state.as_str(), airing_id],
        )?;
        Ok(())
    }

    pub fn get_airing_state(&self, airing_id: i64) -> Result<Option<ScheduleState>> {
        let conn = self.get_conn()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT scheduled FROM airing WHERE airing_id = ?1",
                params![airing_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.map(|s| ScheduleState::from(s.as_str())))
    }

    // ------------------------------------------------------------------
    // Conflicts and priorities
    // ------------------------------------------------------------------

    /// Airings in `state` as intervals, ordered by air date
    pub fn get_airing_intervals(&self, state: &ScheduleState) -> Result<Vec<Conflict>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT airing_id, show_id, air_date, air_date + duration FROM airing
             WHERE scheduled = ?1
             ORDER BY air_date ASC, airing_id ASC",
        )?;
        let rows = stmt
            .query_map(params![state.as_str()], |row| {
                Ok(Conflict {
                    airing_id: row.get(0)?,
                    show_id: row.get(1)?,
                    air_date: row.get(2)?,
                    end_date: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace the whole conflict table
    pub fn replace_conflicts(&self, conflicts: &[Conflict]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM conflict", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO conflict (airing_id, show_id, air_date, end_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(airing_id) DO NOTHING",
            )?;
            for c in conflicts {
                stmt.execute(params![c.airing_id, c.show_id, c.air_date, c.end_date])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_conflicts(&self) -> Result<Vec<Conflict>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT airing_id, show_id, air_date, end_date FROM conflict
             ORDER BY air_date ASC, end_date ASC, airing_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Conflict {
                    airing_id: row.get(0)?,
                    show_id: row.get(1)?,
                    air_date: row.get(2)?,
                    end_date: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Conflict rows with their show type and stored priority
    ///
    /// The show type is `None` when the conflict references an unknown show.
    pub fn get_conflicts_with_priority(
        &self,
    ) -> Result<Vec<(Conflict, Option<String>, Option<i64>)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.airing_id, c.show_id, c.air_date, c.end_date, s.show_type, p.priority
             FROM conflict c
             LEFT JOIN show s ON s.show_id = c.show_id
             LEFT JOIN show_priority p ON p.show_id = c.show_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    Conflict {
                        airing_id: row.get(0)?,
                        show_id: row.get(1)?,
                        air_date: row.get(2)?,
                        end_date: row.get(3)?,
                    },
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_show_priority(&self, show_id: i64, priority: i64) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO show_priority (show_id, priority) VALUES (?1, ?2)
             ON CONFLICT(show_id) DO UPDATE SET priority = excluded.priority",
            params![show_id, priority],
        )?;
        info!("Priority of show {} set to {}", show_id, priority);
        Ok(())
    }

    /// Scheduled and conflicted airings with the fields their export name needs
    pub fn get_scheduled_airings(&self) -> Result<Vec<ScheduledAiring>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.airing_id, s.show_type, s.title, e.season, e.episode, e.title,
                    a.air_date, s.release_date
             FROM airing a
             JOIN show s ON s.show_id = a.show_id
             LEFT JOIN episode e ON e.episode_id = a.episode_id
             WHERE a.scheduled IN ('scheduled', 'conflict')
             ORDER BY a.air_date ASC, a.airing_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut airings = Vec::with_capacity(rows.len());
        for (airing_id, show_type, show_title, season, episode, episode_title, air_date, release) in rows {
            airings.push(ScheduledAiring {
                airing_id,
                show_type: show_type.parse()?,
                show_title,
                season: season.unwrap_or_default(),
                episode: episode.unwrap_or(0),
                episode_title: episode_title.unwrap_or_default(),
                air_date,
                release_year: release
                    .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                    .map(|dt| chrono::Datelike::year(&dt)),
            });
        }
        Ok(airings)
    }

    // ------------------------------------------------------------------
    // Exported file index
    // ------------------------------------------------------------------

    pub fn get_exported(&self) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT path FROM exported_file ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    pub fn insert_exported(&self, paths: &[String]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO exported_file (path) VALUES (?1) ON CONFLICT DO NOTHING")?;
            for p in paths {
                stmt.execute(params![p])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_exported(&self, paths: &[String]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM exported_file WHERE path = ?1")?;
            for p in paths {
                stmt.execute(params![p])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn write_episode(tx: &rusqlite::Transaction<'_>, e: &EpisodeRecord) -> Result<()> {
    for t in &e.teams {
        tx.execute(
            "INSERT INTO team (team_id, team) VALUES (?1, ?2)
             ON CONFLICT(team_id) DO UPDATE SET team = excluded.team",
            params![t.team_id, t.name],
        )?;
        tx.execute(
            "INSERT INTO episode_team (episode_id, team_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
            params![e.episode_id, t.team_id],
        )?;
    }
    tx.execute(
        "INSERT INTO episode (
            episode_id, show_id, title, descript, episode, season, season_type,
            original_air_date, home_team_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(episode_id) DO UPDATE SET
            show_id = excluded.show_id,
            title = excluded.title,
            descript = excluded.descript,
            episode = excluded.episode,
            season = excluded.season,
            season_type = excluded.season_type,
            original_air_date = excluded.original_air_date,
            home_team_id = excluded.home_team_id",
        params![
            e.episode_id,
            e.show_id,
            e.title,
            e.description,
            e.episode,
            e.season,
            e.season_type,
            e.original_air_date,
            e.home_team_id,
        ],
    )?;
    Ok(())
}
