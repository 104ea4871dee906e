//! Wire types returned by the appliance and the discovery service
//!
//! Every object fetched through `/batch` is keyed by its object path, e.g.
//! `/guide/series/1234` or `/recordings/airings/987`.

use serde::{Deserialize, Serialize};

/// Response of the discovery web service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default)]
    pub cpes: Vec<ApplianceInfo>,
}

/// One appliance known to the discovery service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceInfo {
    #[serde(rename = "serverid")]
    pub server_id: String,
    pub name: String,
    pub private_ip: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub object_id: i64,
    #[serde(default)]
    pub channel: ChannelDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelDetails {
    #[serde(default)]
    pub call_sign: String,
    #[serde(default)]
    pub major: i64,
    #[serde(default)]
    pub minor: i64,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Show {
    #[serde(default)]
    pub object_id: i64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub schedule: ShowSchedule,
    #[serde(default)]
    pub series: Option<SeriesDetails>,
    #[serde(default)]
    pub movie: Option<MovieDetails>,
    #[serde(default)]
    pub sport: Option<SportDetails>,
    #[serde(default)]
    pub keep: KeepDetails,
    #[serde(default)]
    pub guide_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShowSchedule {
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub channel_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesDetails {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub orig_air_date: Option<String>,
    #[serde(default)]
    pub episode_runtime: i64,
    #[serde(default)]
    pub series_rating: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub awards: Vec<Award>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieDetails {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub plot: Option<String>,
    #[serde(default)]
    pub original_runtime: i64,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub film_rating: Option<String>,
    #[serde(default)]
    pub quality_rating: Option<i64>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub directors: Vec<String>,
    #[serde(default)]
    pub awards: Vec<Award>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportDetails {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Award {
    #[serde(default)]
    pub won: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub year: i64,
    #[serde(default)]
    pub nominee: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeepDetails {
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub count: Option<i64>,
}

/// A guide airing, also the body returned by an unschedule PATCH
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Airing {
    #[serde(default)]
    pub object_id: i64,
    #[serde(default)]
    pub series_path: Option<String>,
    #[serde(default)]
    pub movie_path: Option<String>,
    #[serde(default)]
    pub sport_path: Option<String>,
    #[serde(default)]
    pub episode: EpisodeDetails,
    #[serde(default)]
    pub airing_details: AiringDetails,
    #[serde(default)]
    pub schedule: AiringSchedule,
    #[serde(default)]
    pub event: EventDetails,
    #[serde(default)]
    pub error: Option<RequestError>,
}

impl Airing {
    pub fn is_not_found(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.code == "object_not_found")
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpisodeDetails {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub season_number: i64,
    #[serde(default)]
    pub orig_air_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiringDetails {
    #[serde(default)]
    pub datetime: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub channel: Channel,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiringSchedule {
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventDetails {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub season_type: Option<String>,
    #[serde(default)]
    pub home_team_id: Option<i64>,
    #[serde(default)]
    pub teams: Vec<Team>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Team {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub team_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub object_id: i64,
    #[serde(default)]
    pub series_path: Option<String>,
    #[serde(default)]
    pub movie_path: Option<String>,
    #[serde(default)]
    pub sport_path: Option<String>,
    #[serde(default)]
    pub episode: EpisodeDetails,
    #[serde(default)]
    pub airing_details: AiringDetails,
    #[serde(default)]
    pub event: EventDetails,
    #[serde(default)]
    pub video_details: VideoDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoDetails {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub comskip: ComSkipDetails,
    #[serde(default)]
    pub error: Option<VideoError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComSkipDetails {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A storage device attached to the appliance
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Drive {
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub free: i64,
}

/// Error envelope the appliance returns in place of an object
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}
