//! Export directory reconciliation
//!
//! An export root holds `Movies/`, `Sports/` and `TV/` trees. Files that appear
//! there under the name an upcoming airing would be exported as mean the
//! content already exists, so the airing is unscheduled on the appliance.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::dvr::client::ApplianceClient;
use crate::dvr::conflicts::unschedule_airings;
use crate::dvr::database::CacheDatabase;
use crate::dvr::error::{Result, SyncError};
use crate::dvr::models::{ScheduledAiring, ShowType, UnscheduleTarget};

/// Category directories scanned under an export root
pub const EXPORT_CATEGORIES: [&str; 3] = ["Movies", "Sports", "TV"];

/// Replace characters most filesystems reject with `_`
pub fn sanitize_file(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

/// Path, relative to the export root, an airing would be exported to
pub fn export_filename(airing: &ScheduledAiring) -> PathBuf {
    let show = sanitize_file(&airing.show_title);
    match airing.show_type {
        ShowType::Series => {
            let season = match airing.season.chars().count() {
                0 => "00".to_string(),
                1 => format!("0{}", sanitize_file(&airing.season)),
                _ => sanitize_file(&airing.season),
            };
            let mut episode = format!("{:02}", airing.episode);
            if episode == "00" {
                episode = DateTime::from_timestamp(airing.air_date, 0)
                    .map(|dt| dt.format("%Y%m%d%H%M").to_string())
                    .unwrap_or(episode);
            }
            let title = sanitize_file(&airing.episode_title);
            PathBuf::from("TV")
                .join(&show)
                .join(format!("Season {}", season))
                .join(format!("{} - s{}e{} - {}.mp4", show, season, episode, title))
        }
        ShowType::Movie => {
            let year = airing.release_year.unwrap_or(0);
            PathBuf::from("Movies").join(format!("{} - {}.mp4", show, year))
        }
        ShowType::Sport => {
            let season = if airing.season.is_empty() {
                "00".to_string()
            } else {
                sanitize_file(&airing.season)
            };
            let title = sanitize_file(&airing.episode_title);
            PathBuf::from("Sports")
                .join(&show)
                .join(format!("{} - {} - {}.mp4", show, season, title))
        }
    }
}

/// Every file under the category trees of `root`
///
/// A category directory that does not exist contributes nothing.
pub fn scan_export_tree(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for category in EXPORT_CATEGORIES {
        let dir = root.join(category);
        if !dir.is_dir() {
            debug!("Export category {:?} not present", dir);
            continue;
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.path().to_string_lossy().into_owned());
            }
        }
    }
    Ok(files)
}

/// Split the known index into files that vanished and files that are new
pub fn check_exported(known: &[String], root: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let mut missing = Vec::new();
    for path in known {
        if !Path::new(path).try_exists()? {
            missing.push(path.clone());
        }
    }

    let known: HashSet<&str> = known.iter().map(String::as_str).collect();
    let found = scan_export_tree(root)?
        .into_iter()
        .filter(|p| !known.contains(p.as_str()))
        .collect();

    Ok((missing, found))
}

/// Bring the exported-file index up to date and unschedule airings already on disk
///
/// Uses `path_override` when given, otherwise the cache's default export path.
/// Returns how many airings the appliance confirmed as unscheduled.
pub async fn reconcile_exports(
    db: &CacheDatabase,
    client: &ApplianceClient,
    path_override: Option<&str>,
) -> Result<usize> {
    let root = match path_override.filter(|p| !p.is_empty()) {
        Some(p) => p.to_string(),
        None => db.get_default_export_path()?.ok_or(SyncError::NoExportPath)?,
    };
    let root = Path::new(&root);
    info!("Updating exported records under {:?}", root);

    let known = db.get_exported()?;
    let (missing, found) = check_exported(&known, root)?;
    if !missing.is_empty() {
        info!("{} exported files no longer on disk", missing.len());
        db.delete_exported(&missing)?;
    }
    if found.is_empty() {
        return Ok(0);
    }

    info!("{} new exported files found", found.len());
    db.insert_exported(&found)?;

    let found: HashSet<String> = found.into_iter().collect();
    let targets: Vec<UnscheduleTarget> = db
        .get_scheduled_airings()?
        .iter()
        .filter(|a| {
            let file = root.join(export_filename(a));
            found.contains(&*file.to_string_lossy())
        })
        .map(|a| UnscheduleTarget {
            airing_id: a.airing_id,
            show_type: a.show_type,
        })
        .collect();

    if targets.is_empty() {
        return Ok(0);
    }

    let outcome = unschedule_airings(db, client, &targets).await?;
    Ok(outcome.unscheduled)
}
