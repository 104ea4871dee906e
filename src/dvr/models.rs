//! Data models for the DVR cache

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::dvr::api;
use crate::dvr::error::{Result, SyncError};

/// Kind of programme a show describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowType {
    Series,
    Movie,
    Sport,
}

impl ShowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShowType::Series => "series",
            ShowType::Movie => "movie",
            ShowType::Sport => "sport",
        }
    }

    /// Parse the type segment of an object path (`/guide/<segment>/<id>`)
    pub fn from_path_segment(segment: &str) -> Result<Self> {
        match segment {
            "series" => Ok(ShowType::Series),
            "movies" => Ok(ShowType::Movie),
            "sports" => Ok(ShowType::Sport),
            other => Err(SyncError::InvalidShowType(other.to_string())),
        }
    }

    /// Sub-path under `/guide` that addresses a single airing of this type
    pub fn airing_subpath(&self) -> &'static str {
        match self {
            ShowType::Series => "series/episodes",
            ShowType::Movie => "movies/airings",
            ShowType::Sport => "sports/events",
        }
    }
}

impl std::str::FromStr for ShowType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "series" => Ok(ShowType::Series),
            "movie" => Ok(ShowType::Movie),
            "sport" => Ok(ShowType::Sport),
            other => Err(SyncError::InvalidShowType(other.to_string())),
        }
    }
}

/// Schedule state of an airing as negotiated with the appliance
///
/// States the engine does not act on are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleState {
    None,
    Scheduled,
    Conflict,
    Unscheduled,
    Cancelled,
    Other(String),
}

impl ScheduleState {
    pub fn as_str(&self) -> &str {
        match self {
            ScheduleState::None => "none",
            ScheduleState::Scheduled => "scheduled",
            ScheduleState::Conflict => "conflict",
            ScheduleState::Unscheduled => "unscheduled",
            ScheduleState::Cancelled => "cancelled",
            ScheduleState::Other(s) => s,
        }
    }

    /// States a PATCH `{"scheduled": false}` is allowed to leave behind
    pub fn is_unscheduled(&self) -> bool {
        matches!(self, ScheduleState::None | ScheduleState::Unscheduled)
    }
}

impl From<&str> for ScheduleState {
    fn from(s: &str) -> Self {
        match s {
            "none" | "" => ScheduleState::None,
            "scheduled" => ScheduleState::Scheduled,
            "conflict" => ScheduleState::Conflict,
            "unscheduled" => ScheduleState::Unscheduled,
            "cancelled" => ScheduleState::Cancelled,
            other => ScheduleState::Other(other.to_string()),
        }
    }
}

/// Which side of the cache an object belongs to
///
/// Recording snapshots use the negated id of the guide object so both can
/// coexist in the same tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    Guide,
    Recordings,
}

impl IdSpace {
    pub fn from_path(path: &str) -> Self {
        if path_segment(path, 1) == Some("recordings") {
            IdSpace::Recordings
        } else {
            IdSpace::Guide
        }
    }

    pub fn apply(&self, id: i64) -> i64 {
        match self {
            IdSpace::Guide => id,
            IdSpace::Recordings => -id,
        }
    }
}

/// Action stored in the work queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    UpdateGuide,
    UpdateScheduled,
    UpdateRecordings,
    Export,
    /// Written by a newer version; skipped rather than treated as fatal
    Unknown(String),
}

impl QueueAction {
    pub fn as_str(&self) -> &str {
        match self {
            QueueAction::UpdateGuide => "UPDATEGUIDE",
            QueueAction::UpdateScheduled => "UPDATESCHEDULED",
            QueueAction::UpdateRecordings => "UPDATERECORDINGS",
            QueueAction::Export => "EXPORT",
            QueueAction::Unknown(s) => s,
        }
    }
}

impl From<&str> for QueueAction {
    fn from(s: &str) -> Self {
        match s {
            "UPDATEGUIDE" => QueueAction::UpdateGuide,
            "UPDATESCHEDULED" => QueueAction::UpdateScheduled,
            "UPDATERECORDINGS" => QueueAction::UpdateRecordings,
            "EXPORT" => QueueAction::Export,
            other => QueueAction::Unknown(other.to_string()),
        }
    }
}

/// A pending unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTask {
    /// Ordering key; lower runs first
    pub task_id: i64,
    pub action: QueueAction,
    pub details: String,
    pub export_path: Option<String>,
}

/// Identity and name of the appliance a cache mirrors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub server_id: String,
    pub name: String,
    pub private_ip: String,
}

impl From<api::ApplianceInfo> for SystemInfo {
    fn from(a: api::ApplianceInfo) -> Self {
        Self {
            server_id: a.server_id,
            name: a.name,
            private_ip: a.private_ip,
        }
    }
}

/// Last successful refresh per category, Unix seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastUpdated {
    pub guide: i64,
    pub scheduled: i64,
    pub recordings: i64,
}

/// An airing that takes part in a conflict this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub airing_id: i64,
    pub show_id: i64,
    pub air_date: i64,
    pub end_date: i64,
}

/// A conflict row joined with what resolution needs to rank and evict it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedConflict {
    pub airing_id: i64,
    pub show_id: i64,
    pub show_type: ShowType,
    pub air_date: i64,
    pub end_date: i64,
    pub priority: i64,
}

/// A scheduled or conflicted airing with the fields its export filename needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledAiring {
    pub airing_id: i64,
    pub show_type: ShowType,
    pub show_title: String,
    pub season: String,
    pub episode: i64,
    pub episode_title: String,
    pub air_date: i64,
    pub release_year: Option<i32>,
}

/// Airing selected for a PATCH `{"scheduled": false}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnscheduleTarget {
    pub airing_id: i64,
    pub show_type: ShowType,
}

/// Result of an unschedule batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnscheduleOutcome {
    /// Airings the appliance confirmed as unscheduled
    pub unscheduled: usize,
    /// Airings the appliance no longer knew about; removed locally
    pub not_found: usize,
}

impl UnscheduleOutcome {
    pub fn resolved(&self) -> usize {
        self.unscheduled + self.not_found
    }
}

// Rows written to the cache

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub channel_id: i64,
    pub call_sign: String,
    pub major: i64,
    pub minor: i64,
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardRecord {
    pub won: bool,
    pub name: String,
    pub category: String,
    pub year: i64,
    pub nominee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowRecord {
    pub show_id: i64,
    pub parent_show_id: Option<i64>,
    pub show_type: ShowType,
    pub rule: Option<String>,
    pub channel_id: Option<i64>,
    pub keep_rule: String,
    pub keep_count: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub release_date: Option<i64>,
    pub runtime: Option<i64>,
    pub rating: Option<String>,
    pub stars: Option<i64>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
    pub directors: Vec<String>,
    pub awards: Vec<AwardRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRecord {
    pub team_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRecord {
    pub episode_id: String,
    pub show_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub episode: Option<i64>,
    pub season: Option<String>,
    pub season_type: Option<String>,
    pub original_air_date: Option<i64>,
    pub home_team_id: Option<i64>,
    pub teams: Vec<TeamRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiringRecord {
    pub airing_id: i64,
    pub show_id: i64,
    pub air_date: i64,
    pub duration: i64,
    pub channel_id: i64,
    pub state: ScheduleState,
    pub episode: Option<EpisodeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub comskip_error: Option<String>,
    pub error_code: Option<String>,
    pub error_details: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRecord {
    pub recording_id: i64,
    pub show_id: i64,
    pub air_date: i64,
    pub airing_duration: i64,
    pub channel_id: i64,
    pub recording_state: String,
    pub clean: bool,
    pub recording_duration: i64,
    pub recording_size: i64,
    pub comskip_state: String,
    pub episode: Option<EpisodeRecord>,
    /// Present when the capture failed, is unclean, or commercial skip had trouble
    pub error: Option<ErrorRecord>,
}

impl ChannelRecord {
    pub fn from_api(path: &str, channel: &api::Channel) -> Self {
        let space = IdSpace::from_path(path);
        Self {
            channel_id: space.apply(channel.object_id),
            call_sign: channel.channel.call_sign.clone(),
            major: channel.channel.major,
            minor: channel.channel.minor,
            network: channel.channel.network.clone(),
        }
    }
}

impl ShowRecord {
    pub fn from_api(path: &str, show: &api::Show) -> Result<Self> {
        let space = IdSpace::from_path(path);
        let type_segment = path_segment(&show.path, 2)
            .ok_or_else(|| SyncError::MalformedPath(show.path.clone()))?;
        let show_type = ShowType::from_path_segment(type_segment)?;

        let parent_show_id = match show.guide_path.as_deref().filter(|p| !p.is_empty()) {
            Some(p) => Some(path_id(p)?),
            None => None,
        };
        let channel_id = match show.schedule.channel_path.as_deref().filter(|p| !p.is_empty()) {
            Some(p) => Some(space.apply(path_id(p)?)),
            None => None,
        };

        let mut record = Self {
            show_id: space.apply(show.object_id),
            parent_show_id,
            show_type,
            rule: show.schedule.rule.clone().filter(|r| !r.is_empty()),
            channel_id,
            keep_rule: show.keep.rule.clone(),
            keep_count: show.keep.count,
            title: String::new(),
            description: None,
            release_date: None,
            runtime: None,
            rating: None,
            stars: None,
            genres: Vec::new(),
            cast: Vec::new(),
            directors: Vec::new(),
            awards: Vec::new(),
        };

        match show_type {
            ShowType::Series => {
                let series = show.series.clone().unwrap_or_default();
                record.title = series.title;
                record.description = series.description;
                record.release_date = series
                    .orig_air_date
                    .as_deref()
                    .map(parse_remote_date)
                    .transpose()?;
                record.runtime = Some(series.episode_runtime);
                record.rating = series.series_rating;
                record.genres = series.genres;
                record.cast = series.cast;
                record.awards = series.awards.iter().map(AwardRecord::from_api).collect();
            }
            ShowType::Movie => {
                let movie = show.movie.clone().unwrap_or_default();
                record.title = movie.title;
                record.description = movie.plot;
                record.release_date = movie.release_year.and_then(year_to_timestamp);
                record.runtime = Some(movie.original_runtime);
                record.rating = movie.film_rating;
                record.stars = movie.quality_rating;
                record.genres = movie.genres;
                record.cast = movie.cast;
                record.directors = movie.directors;
                record.awards = movie.awards.iter().map(AwardRecord::from_api).collect();
            }
            ShowType::Sport => {
                let sport = show.sport.clone().unwrap_or_default();
                record.title = sport.title;
                record.description = sport.description;
                record.genres = sport.genres;
            }
        }

        Ok(record)
    }
}

impl AwardRecord {
    fn from_api(award: &api::Award) -> Self {
        Self {
            won: award.won,
            name: award.name.clone(),
            category: award.category.clone(),
            year: award.year,
            nominee: award.nominee.clone().filter(|n| !n.is_empty()),
        }
    }
}

impl AiringRecord {
    pub fn from_api(path: &str, airing: &api::Airing) -> Result<Self> {
        let space = IdSpace::from_path(path);
        let air_date = parse_remote_date(&airing.airing_details.datetime)?;
        let (show_id, episode) = resolve_programme(
            space,
            airing.object_id,
            [&airing.series_path, &airing.movie_path, &airing.sport_path],
            &airing.episode,
            &airing.event,
            air_date,
        )?;

        Ok(Self {
            airing_id: airing.object_id,
            show_id,
            air_date,
            duration: airing.airing_details.duration,
            channel_id: space.apply(airing.airing_details.channel.object_id),
            state: ScheduleState::from(airing.schedule.state.as_str()),
            episode,
        })
    }
}

impl RecordingRecord {
    pub fn from_api(recording: &api::Recording) -> Result<Self> {
        let space = IdSpace::Recordings;
        let air_date = parse_remote_date(&recording.airing_details.datetime)?;
        let (show_id, episode) = resolve_programme(
            space,
            recording.object_id,
            [&recording.series_path, &recording.movie_path, &recording.sport_path],
            &recording.episode,
            &recording.event,
            air_date,
        )?;

        let video = &recording.video_details;
        let failed = video.state == "failed" || !video.clean || video.comskip.state != "none";
        let error = failed.then(|| {
            let details = video.error.clone().unwrap_or_default();
            ErrorRecord {
                comskip_error: video.comskip.error.clone(),
                error_code: details.code,
                error_details: details.details,
                error_description: details.description,
            }
        });

        Ok(Self {
            recording_id: recording.object_id,
            show_id,
            air_date,
            airing_duration: recording.airing_details.duration,
            channel_id: space.apply(recording.airing_details.channel.object_id),
            recording_state: video.state.clone(),
            clean: video.clean,
            recording_duration: video.duration,
            recording_size: video.size,
            comskip_state: video.comskip.state.clone(),
            episode,
            error,
        })
    }
}

/// Work out which show an airing belongs to and build its episode row
///
/// Exactly one of the series/movie/sport paths is expected; the first
/// non-empty one wins. Movies have no episode row.
fn resolve_programme(
    space: IdSpace,
    object_id: i64,
    paths: [&Option<String>; 3],
    episode: &api::EpisodeDetails,
    event: &api::EventDetails,
    air_date: i64,
) -> Result<(i64, Option<EpisodeRecord>)> {
    let [series_path, movie_path, sport_path] = paths.map(|p| p.as_deref().filter(|p| !p.is_empty()));

    if let Some(path) = series_path {
        let show_id = space.apply(path_id(path)?);
        let season = episode.season_number.to_string();
        let record = EpisodeRecord {
            episode_id: episode_id(show_id, &season, episode.number, air_date),
            show_id,
            title: episode.title.clone().filter(|t| !t.is_empty()),
            description: episode.description.clone().filter(|d| !d.is_empty()),
            episode: Some(episode.number),
            season: Some(season),
            season_type: None,
            original_air_date: episode
                .orig_air_date
                .as_deref()
                .map(parse_remote_date)
                .transpose()?,
            home_team_id: None,
            teams: Vec::new(),
        };
        return Ok((show_id, Some(record)));
    }

    if let Some(path) = movie_path {
        return Ok((space.apply(path_id(path)?), None));
    }

    if let Some(path) = sport_path {
        let show_id = space.apply(path_id(path)?);
        let season = event.season.clone().filter(|s| !s.is_empty());
        let record = EpisodeRecord {
            episode_id: episode_id(show_id, season.as_deref().unwrap_or(""), 0, air_date),
            show_id,
            title: event.title.clone(),
            description: event.description.clone(),
            episode: None,
            season,
            season_type: event.season_type.clone().filter(|s| !s.is_empty()),
            original_air_date: None,
            home_team_id: event.home_team_id,
            teams: event
                .teams
                .iter()
                .map(|t| TeamRecord {
                    team_id: t.team_id,
                    name: t.name.clone(),
                })
                .collect(),
        };
        return Ok((show_id, Some(record)));
    }

    Err(SyncError::MissingShowPath(object_id))
}

/// Build the composite `showID.season.discriminator` episode key
///
/// The discriminator is the episode number, or the air date when the number
/// is unknown, so date-based editions stay unique.
pub fn episode_id(show_id: i64, season: &str, episode: i64, air_date: i64) -> String {
    let season = if season.is_empty() { "0" } else { season };
    if episode == 0 {
        format!("{}.{}.{}", show_id, season, air_date)
    } else {
        format!("{}.{}.{}", show_id, season, episode)
    }
}

/// Return the `index`-th `/`-separated segment of an object path
pub fn path_segment(path: &str, index: usize) -> Option<&str> {
    path.split('/').nth(index).filter(|s| !s.is_empty())
}

/// Parse the numeric id from `/<space>/<kind>/<id>`
pub fn path_id(path: &str) -> Result<i64> {
    path_segment(path, 3)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SyncError::MalformedPath(path.to_string()))
}

/// Parse the two datetime formats the appliance emits into Unix seconds (UTC)
///
/// `YYYY-MM-DD` maps to midnight; `YYYY-MM-DDTHH:MMZ` to the given minute.
pub fn parse_remote_date(s: &str) -> Result<i64> {
    match s.len() {
        10 => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
            .ok_or_else(|| SyncError::UnsupportedDate(s.to_string())),
        17 => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
            .map_err(|_| SyncError::UnsupportedDate(s.to_string())),
        _ => Err(SyncError::UnsupportedDate(s.to_string())),
    }
}

fn year_to_timestamp(year: i32) -> Option<i64> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_airing(state: &str) -> api::Airing {
        api::Airing {
            object_id: 501,
            series_path: Some("/guide/series/100".to_string()),
            episode: api::EpisodeDetails {
                title: Some("Pilot".to_string()),
                number: 3,
                season_number: 2,
                ..Default::default()
            },
            airing_details: api::AiringDetails {
                datetime: "2023-05-01T20:00Z".to_string(),
                duration: 1800,
                channel: api::Channel {
                    object_id: 7,
                    ..Default::default()
                },
            },
            schedule: api::AiringSchedule {
                state: state.to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_remote_date() {
        assert_eq!(parse_remote_date("2023-05-01T20:00Z").unwrap(), 1_682_971_200);
        assert_eq!(parse_remote_date("2023-05-01").unwrap(), 1_682_899_200);
        assert!(matches!(
            parse_remote_date("May 1st"),
            Err(SyncError::UnsupportedDate(_))
        ));
    }

    #[test]
    fn test_episode_id_falls_back_to_air_date() {
        assert_eq!(episode_id(100, "2", 3, 1_000), "100.2.3");
        assert_eq!(episode_id(100, "", 0, 1_000), "100.0.1000");
        assert_eq!(episode_id(-100, "2021", 0, 55), "-100.2021.55");
    }

    #[test]
    fn test_guide_airing_keeps_positive_ids() {
        let record = AiringRecord::from_api("/guide/airings/501", &series_airing("scheduled")).unwrap();
        assert_eq!(record.airing_id, 501);
        assert_eq!(record.show_id, 100);
        assert_eq!(record.channel_id, 7);
        assert_eq!(record.state, ScheduleState::Scheduled);
        let episode = record.episode.unwrap();
        assert_eq!(episode.episode_id, "100.2.3");
        assert_eq!(episode.season.as_deref(), Some("2"));
    }

    #[test]
    fn test_airing_without_show_path_is_rejected() {
        let mut airing = series_airing("scheduled");
        airing.series_path = None;
        let err = AiringRecord::from_api("/guide/airings/501", &airing).unwrap_err();
        assert!(matches!(err, SyncError::MissingShowPath(501)));
    }

    #[test]
    fn test_recording_lives_in_negative_space() {
        let recording = api::Recording {
            object_id: 900,
            movie_path: Some("/recordings/movies/12".to_string()),
            airing_details: api::AiringDetails {
                datetime: "2023-05-01T20:00Z".to_string(),
                duration: 7200,
                channel: api::Channel {
                    object_id: 7,
                    ..Default::default()
                },
            },
            video_details: api::VideoDetails {
                state: "finished".to_string(),
                clean: false,
                comskip: api::ComSkipDetails {
                    state: "none".to_string(),
                    error: None,
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let record = RecordingRecord::from_api(&recording).unwrap();
        assert_eq!(record.show_id, -12);
        assert_eq!(record.channel_id, -7);
        assert!(record.episode.is_none());
        assert!(record.error.is_some(), "unclean capture keeps an error row");
    }

    #[test]
    fn test_show_type_from_show_path() {
        let show = api::Show {
            object_id: 12,
            path: "/recordings/movies/12".to_string(),
            schedule: api::ShowSchedule {
                rule: Some("none".to_string()),
                channel_path: Some("/recordings/channels/7".to_string()),
            },
            movie: Some(api::MovieDetails {
                title: "Alpha".to_string(),
                release_year: Some(2020),
                ..Default::default()
            }),
            guide_path: Some("/guide/movies/12".to_string()),
            ..Default::default()
        };
        let record = ShowRecord::from_api("/recordings/shows/12", &show).unwrap();
        assert_eq!(record.show_type, ShowType::Movie);
        assert_eq!(record.show_id, -12);
        assert_eq!(record.parent_show_id, Some(12));
        assert_eq!(record.channel_id, Some(-7));
        assert_eq!(record.release_date, Some(1_577_836_800));
    }

    #[test]
    fn test_queue_action_passthrough() {
        assert_eq!(QueueAction::from("EXPORT"), QueueAction::Export);
        assert_eq!(
            QueueAction::from("REINDEX"),
            QueueAction::Unknown("REINDEX".to_string())
        );
        assert_eq!(QueueAction::from("REINDEX").as_str(), "REINDEX");
    }
}
