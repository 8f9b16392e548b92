use anyhow::{anyhow, Context};
use chrono::{TimeZone, Utc};
use std::path::Path;

use crate::models::{CatalogItem, Catalogue, Rating};

pub const RATINGS_FILE: &str = "u.data";
pub const ITEMS_FILE: &str = "u.item";

/// Genre flag columns of `u.item`, in file order
const GENRES: [&str; 19] = [
    "unknown",
    "Action",
    "Adventure",
    "Animation",
    "Children's",
    "Comedy",
    "Crime",
    "Documentary",
    "Drama",
    "Fantasy",
    "Film-Noir",
    "Horror",
    "Musical",
    "Mystery",
    "Romance",
    "Sci-Fi",
    "Thriller",
    "War",
    "Western",
];

/// Index of the first genre flag in a `u.item` record
const FIRST_GENRE_FIELD: usize = 5;

/// Parses tab-separated `user item rating unix_ts` lines
pub fn parse_ratings(contents: &str) -> anyhow::Result<Vec<Rating>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_rating_line(line).with_context(|| format!("line {}", idx + 1)))
        .collect()
}

fn parse_rating_line(line: &str) -> anyhow::Result<Rating> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [user, item, value, timestamp] = fields.as_slice() else {
        return Err(anyhow!("expected 4 fields, found {}", fields.len()));
    };
    let observed_at = Utc
        .timestamp_opt(timestamp.parse()?, 0)
        .single()
        .ok_or_else(|| anyhow!("invalid timestamp {}", timestamp))?;
    let rating = Rating::new(user.parse()?, item.parse()?, value.parse()?, observed_at)?;
    Ok(rating)
}

/// Parses pipe-separated `u.item` records into a catalogue with genre tags.
///
/// The file is Latin-1 encoded. Records without genre columns are tagged
/// `unknown`; records without a numeric id are skipped.
pub fn parse_catalogue(bytes: &[u8]) -> Catalogue {
    let contents: String = bytes.iter().map(|&b| b as char).collect();
    let mut catalogue = Catalogue::new();

    for line in contents.lines() {
        let fields: Vec<&str> = line.trim().split('|').collect();
        if fields.len() < 2 {
            continue;
        }
        let Ok(item_id) = fields[0].parse() else {
            tracing::warn!(record = %fields[0], "Skipping catalogue record without numeric id");
            continue;
        };

        let mut tags: Vec<String> = fields
            .iter()
            .skip(FIRST_GENRE_FIELD)
            .zip(GENRES)
            .filter(|(flag, _)| **flag == "1")
            .map(|(_, genre)| genre.to_string())
            .collect();
        if tags.is_empty() {
            tags.push(GENRES[0].to_string());
        }

        catalogue.insert(
            item_id,
            CatalogItem {
                title: fields[1].to_string(),
                tags,
            },
        );
    }

    catalogue
}

/// Reads `u.data` from the dataset directory
pub async fn load_ratings(data_dir: &Path) -> anyhow::Result<Vec<Rating>> {
    let path = data_dir.join(RATINGS_FILE);
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let ratings = parse_ratings(&contents).with_context(|| format!("Malformed {}", path.display()))?;
    tracing::info!(count = ratings.len(), path = %path.display(), "Loaded ratings");
    Ok(ratings)
}

/// Reads `u.item` from the dataset directory; a missing file gives an empty catalogue
pub async fn load_catalogue(data_dir: &Path) -> anyhow::Result<Catalogue> {
    let path = data_dir.join(ITEMS_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::warn!(path = %path.display(), "Catalogue file not found, titles and content model unavailable");
        return Ok(Catalogue::new());
    }

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let catalogue = parse_catalogue(&bytes);
    tracing::info!(count = catalogue.len(), path = %path.display(), "Loaded catalogue");
    Ok(catalogue)
}
