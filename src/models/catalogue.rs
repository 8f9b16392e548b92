use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::LazyLock};

use super::ItemId;

/// A four-digit year in parentheses, as in `Heat (1995)`
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d{4})\)").unwrap());

/// Release year embedded in a title, if any
pub fn extract_year(title: &str) -> Option<i32> {
    YEAR_RE
        .captures(title)
        .and_then(|caps| caps.get(1))
        .and_then(|year| year.as_str().parse().ok())
}

/// Display and content data for one catalogue item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub title: String,
    /// Categorical labels (genres) used by the content model
    pub tags: Vec<String>,
}

impl CatalogItem {
    pub fn year(&self) -> Option<i32> {
        extract_year(&self.title)
    }
}

/// Item catalogue supplied by the host
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    items: HashMap<ItemId, CatalogItem>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item_id: ItemId, item: CatalogItem) {
        self.items.insert(item_id, item);
    }

    pub fn get(&self, item_id: ItemId) -> Option<&CatalogItem> {
        self.items.get(&item_id)
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.items.contains_key(&item_id)
    }

    /// Every item in id order
    pub fn items(&self) -> Vec<(ItemId, &CatalogItem)> {
        let mut items: Vec<(ItemId, &CatalogItem)> =
            self.items.iter().map(|(id, item)| (*id, item)).collect();
        items.sort_by_key(|(id, _)| *id);
        items
    }

    /// Items whose title contains `query`, ignoring case, in id order
    pub fn search(&self, query: &str) -> Vec<(ItemId, &CatalogItem)> {
        let needle = query.to_lowercase();
        self.items()
            .into_iter()
            .filter(|(_, item)| item.title.to_lowercase().contains(&needle))
            .collect()
    }

    /// Title for display, falling back to a generic label
    pub fn title(&self, item_id: ItemId) -> String {
        self.items
            .get(&item_id)
            .map(|item| item.title.clone())
            .unwrap_or_else(|| format!("Movie {}", item_id))
    }

    /// Tag sets keyed by item, for fitting the content model
    pub fn tag_sets(&self) -> HashMap<ItemId, Vec<String>> {
        self.items
            .iter()
            .map(|(id, item)| (*id, item.tags.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<(ItemId, CatalogItem)> for Catalogue {
    fn from_iter<I: IntoIterator<Item = (ItemId, CatalogItem)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_fallback() {
        let mut catalogue = Catalogue::new();
        catalogue.insert(
            1,
            CatalogItem {
                title: "Toy Story (1995)".to_string(),
                tags: vec!["Animation".to_string()],
            },
        );
        assert_eq!(catalogue.title(1), "Toy Story (1995)");
        assert_eq!(catalogue.title(99), "Movie 99");
    }

    #[test]
    fn test_year_extraction() {
        assert_eq!(extract_year("Toy Story (1995)"), Some(1995));
        assert_eq!(extract_year("Nadja (1994) (V)"), Some(1994));
        assert_eq!(extract_year("unknown"), None);
        assert_eq!(extract_year("Movie (95)"), None);
    }

    #[test]
    fn test_search_is_case_insensitive_in_id_order() {
        let item = |title: &str| CatalogItem {
            title: title.to_string(),
            tags: Vec::new(),
        };
        let catalogue: Catalogue = [
            (3, item("Aliens (1986)")),
            (1, item("Alien (1979)")),
            (2, item("Clerks (1994)")),
        ]
        .into_iter()
        .collect();

        let ids: Vec<ItemId> = catalogue.search("ALIEN").into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(catalogue.search("zzz").is_empty());
        assert_eq!(catalogue.items().first().map(|(id, _)| *id), Some(1));
        assert!(catalogue.contains(2));
        assert!(!catalogue.contains(4));
    }
}
