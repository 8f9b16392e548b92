use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{cosine, Scorer};
use crate::{
    error::RecResult,
    models::{ItemId, ModelKind, UserId, MAX_RATING},
    services::matrix::DatasetSplit,
};

/// Prediction used when the user has no usable history or the item has no vector
const NEUTRAL_RATING: f64 = 2.5;

/// English stop words, sorted for binary search
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst",
    "amoungst", "amount", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
    "anywhere", "are", "around", "as", "at", "back", "be", "became", "because", "become",
    "becomes", "becoming", "been", "before", "beforehand", "behind", "being", "below", "beside",
    "besides", "between", "beyond", "bill", "both", "bottom", "but", "by", "call", "can", "cannot",
    "cant", "co", "con", "could", "couldnt", "cry", "de", "describe", "detail", "do", "done",
    "down", "due", "during", "each", "eg", "eight", "either", "eleven", "else", "elsewhere",
    "empty", "enough", "etc", "even", "ever", "every", "everyone", "everything", "everywhere",
    "except", "few", "fifteen", "fifty", "fill", "find", "fire", "first", "five", "for", "former",
    "formerly", "forty", "found", "four", "from", "front", "full", "further", "get", "give", "go",
    "had", "has", "hasnt", "have", "he", "hence", "her", "here", "hereafter", "hereby", "herein",
    "hereupon", "hers", "herself", "him", "himself", "his", "how", "however", "hundred", "i", "ie",
    "if", "in", "inc", "indeed", "interest", "into", "is", "it", "its", "itself", "keep", "last",
    "latter", "latterly", "least", "less", "ltd", "made", "many", "may", "me", "meanwhile",
    "might", "mill", "mine", "more", "moreover", "most", "mostly", "move", "much", "must", "my",
    "myself", "name", "namely", "neither", "never", "nevertheless", "next", "nine", "no", "nobody",
    "none", "noone", "nor", "not", "nothing", "now", "nowhere", "of", "off", "often", "on", "once",
    "one", "only", "onto", "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out",
    "over", "own", "part", "per", "perhaps", "please", "put", "rather", "re", "same", "see",
    "seem", "seemed", "seeming", "seems", "serious", "several", "she", "should", "show", "side",
    "since", "sincere", "six", "sixty", "so", "some", "somehow", "someone", "something",
    "sometime", "sometimes", "somewhere", "still", "such", "system", "take", "ten", "than", "that",
    "the", "their", "them", "themselves", "then", "thence", "there", "thereafter", "thereby",
    "therefore", "therein", "thereupon", "these", "they", "thick", "thin", "third", "this",
    "those", "though", "three", "through", "throughout", "thru", "thus", "to", "together", "too",
    "top", "toward", "towards", "twelve", "twenty", "two", "un", "under", "until", "up", "upon",
    "us", "very", "via", "was", "we", "well", "were", "what", "whatever", "when", "whence",
    "whenever", "where", "whereafter", "whereas", "whereby", "wherein", "whereupon", "wherever",
    "whether", "which", "while", "whither", "who", "whoever", "whole", "whom", "whose", "why",
    "will", "with", "within", "without", "would", "yet", "you", "your", "yours", "yourself",
    "yourselves",
];

/// TF-IDF over tag tokens with a capped vocabulary
#[derive(Debug, Clone)]
pub struct TagVectorizer {
    max_features: usize,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TagVectorizer {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            vocabulary: BTreeMap::new(),
            idf: Vec::new(),
        }
    }

    /// Lowercased alphanumeric runs of two or more characters, minus stop words
    pub fn tokenize(tags: &[String]) -> Vec<String> {
        tags.iter()
            .flat_map(|tag| {
                tag.split(|c: char| !c.is_alphanumeric())
                    .map(str::to_lowercase)
                    .collect::<Vec<_>>()
            })
            .filter(|token| {
                token.chars().count() >= 2 && STOP_WORDS.binary_search(&token.as_str()).is_err()
            })
            .collect()
    }

    /// Learns the vocabulary and IDF weights, returning one L2-normalized
    /// vector per document
    pub fn fit_transform(&mut self, documents: &[Vec<String>]) -> Vec<Vec<f64>> {
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| Self::tokenize(d)).collect();

        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for tokens in &tokenized {
            let mut seen: Vec<&str> = Vec::new();
            for token in tokens {
                *term_freq.entry(token.as_str()).or_insert(0) += 1;
                if !seen.contains(&token.as_str()) {
                    seen.push(token.as_str());
                    *doc_freq.entry(token.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(&str, usize)> = term_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked.truncate(self.max_features);

        let mut kept: Vec<&str> = ranked.into_iter().map(|(term, _)| term).collect();
        kept.sort_unstable();

        let n_docs = documents.len() as f64;
        self.vocabulary = kept
            .iter()
            .enumerate()
            .map(|(idx, term)| (term.to_string(), idx))
            .collect();
        self.idf = kept
            .iter()
            .map(|term| ((1.0 + n_docs) / (1.0 + doc_freq[term] as f64)).ln() + 1.0)
            .collect();

        tokenized.iter().map(|tokens| self.transform(tokens)).collect()
    }

    fn transform(&self, tokens: &[String]) -> Vec<f64> {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for token in tokens {
            if let Some(&idx) = self.vocabulary.get(token) {
                vector[idx] += self.idf[idx];
            }
        }
        let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Scores items by similarity between tag vectors and the user's taste profile
pub struct ContentScorer {
    data: Arc<DatasetSplit>,
    vectorizer: TagVectorizer,
    /// Feature vector per train-matrix column, for items with tags
    vectors: HashMap<usize, Vec<f64>>,
}

impl ContentScorer {
    /// Builds vectors for every tagged item present in the train matrix.
    /// Returns `None` when no such item exists.
    pub fn fit(
        data: Arc<DatasetSplit>,
        item_tags: &HashMap<ItemId, Vec<String>>,
        max_features: usize,
    ) -> Option<Self> {
        let mut columns: Vec<(usize, &Vec<String>)> = item_tags
            .iter()
            .filter_map(|(item_id, tags)| data.train.item_col(*item_id).ok().map(|col| (col, tags)))
            .collect();
        if columns.is_empty() {
            return None;
        }
        columns.sort_by_key(|(col, _)| *col);

        let documents: Vec<Vec<String>> = columns.iter().map(|(_, tags)| (*tags).clone()).collect();
        let mut vectorizer = TagVectorizer::new(max_features);
        let matrix = vectorizer.fit_transform(&documents);
        let vectors = columns
            .into_iter()
            .map(|(col, _)| col)
            .zip(matrix)
            .collect();

        tracing::info!(
            items = documents.len(),
            vocabulary = vectorizer.vocabulary_size(),
            "Fitted content model"
        );

        Some(Self {
            data,
            vectorizer,
            vectors,
        })
    }

    /// Rating-weighted centroid of the vectors of the user's rated items, with
    /// the total weight that went into it
    fn user_profile(&self, row: usize) -> (Vec<f64>, f64) {
        let mut profile = vec![0.0; self.vectorizer.vocabulary_size()];
        let mut total_weight = 0.0;
        for (col, rating) in self.data.train.rated_items(row) {
            if let Some(vector) = self.vectors.get(&col) {
                for (p, x) in profile.iter_mut().zip(vector) {
                    *p += rating * x;
                }
                total_weight += rating;
            }
        }
        if total_weight > 0.0 {
            profile.iter_mut().for_each(|p| *p /= total_weight);
        }
        (profile, total_weight)
    }
}

impl Scorer for ContentScorer {
    fn kind(&self) -> ModelKind {
        ModelKind::Content
    }

    fn score_items(&self, user_id: UserId) -> RecResult<Vec<(ItemId, f64)>> {
        let full = &self.data.full;
        let row = full.user_row(user_id)?;
        let (profile, _) = self.user_profile(row);
        Ok(full
            .unrated_items(row)
            .filter_map(|col| {
                self.vectors
                    .get(&col)
                    .map(|vector| (full.item_id(col), cosine(&profile, vector) * MAX_RATING))
            })
            .collect())
    }

    fn predict(&self, user_id: UserId, item_id: ItemId) -> RecResult<f64> {
        let full = &self.data.full;
        let row = full.user_row(user_id)?;
        let col = full.item_col(item_id)?;
        let (profile, total_weight) = self.user_profile(row);
        match self.vectors.get(&col) {
            Some(vector) if total_weight > 0.0 => Ok(cosine(&profile, vector) * MAX_RATING),
            _ => Ok(NEUTRAL_RATING),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matrix::{build, tests::rating};
    use proptest::prelude::*;

    fn tags(items: &[(ItemId, &[&str])]) -> HashMap<ItemId, Vec<String>> {
        items
            .iter()
            .map(|(id, tags)| (*id, tags.iter().map(|t| t.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_tokenize_splits_and_filters() {
        let tokens = TagVectorizer::tokenize(&[
            "Children's".to_string(),
            "Sci-Fi".to_string(),
            "Film-Noir".to_string(),
            "The".to_string(),
        ]);
        assert_eq!(tokens, vec!["children", "sci", "fi", "film", "noir"]);
    }

    #[test]
    fn test_stop_words_are_sorted_and_dropped() {
        assert!(STOP_WORDS.windows(2).all(|w| w[0] < w[1]));
        let tokens = TagVectorizer::tokenize(&[
            "Whereupon Fire System".to_string(),
            "War".to_string(),
            "Sci-Fi".to_string(),
            "Film-Noir".to_string(),
            "Something".to_string(),
        ]);
        assert_eq!(tokens, vec!["war", "sci", "fi", "film", "noir"]);
    }

    #[test]
    fn test_vectors_are_normalized_and_capped() {
        let mut vectorizer = TagVectorizer::new(2);
        let docs = vec![
            vec!["Action".to_string(), "Comedy".to_string()],
            vec!["Action".to_string(), "Drama".to_string()],
            vec!["Action".to_string()],
        ];
        let vectors = vectorizer.fit_transform(&docs);
        assert_eq!(vectorizer.vocabulary_size(), 2);
        for vector in &vectors {
            let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_profile_prefers_matching_tags() {
        let ratings = vec![
            rating(1, 1, 5.0),
            rating(2, 2, 4.0),
            rating(2, 3, 4.0),
        ];
        let data = Arc::new(build(&ratings, 0.0, 42).unwrap());
        let item_tags = tags(&[(1, &["Action"]), (2, &["Action"]), (3, &["Romance"])]);
        let scorer = ContentScorer::fit(data, &item_tags, 100).unwrap();

        let scores: HashMap<ItemId, f64> = scorer.score_items(1).unwrap().into_iter().collect();
        assert!((scores[&2] - 5.0).abs() < 1e-9);
        assert!(scores[&3].abs() < 1e-9);
    }

    #[test]
    fn test_items_without_vectors_are_skipped() {
        let ratings = vec![rating(1, 1, 5.0), rating(2, 2, 4.0), rating(2, 3, 4.0)];
        let data = Arc::new(build(&ratings, 0.0, 42).unwrap());
        let scorer = ContentScorer::fit(data, &tags(&[(1, &["Action"]), (2, &["Action"])]), 100)
            .unwrap();
        let items: Vec<ItemId> = scorer.score_items(1).unwrap().into_iter().map(|(i, _)| i).collect();
        assert_eq!(items, vec![2]);
        assert_eq!(scorer.predict(1, 3).unwrap(), NEUTRAL_RATING);
    }

    #[test]
    fn test_fit_without_overlapping_items() {
        let data = Arc::new(build(&[rating(1, 1, 5.0)], 0.0, 42).unwrap());
        assert!(ContentScorer::fit(data, &tags(&[(9, &["Drama"])]), 100).is_none());
    }

    proptest! {
        #[test]
        fn prop_content_scores_within_rating_scale(
            cells in proptest::collection::vec((1i64..6, 1i64..9, 1u8..=5), 1..30),
            genre_flags in proptest::collection::vec(0u8..8, 8),
        ) {
            let genres = ["Action", "Comedy", "Drama", "Horror", "Romance", "Sci-Fi", "War", "Western"];
            let ratings: Vec<_> = cells
                .iter()
                .map(|(u, i, v)| rating(*u, *i, f64::from(*v)))
                .collect();
            let data = Arc::new(build(&ratings, 0.0, 42).unwrap());
            let item_tags: HashMap<ItemId, Vec<String>> = (1i64..9)
                .map(|item| {
                    let flag = genre_flags[(item - 1) as usize] as usize;
                    (item, vec![genres[flag].to_string(), genres[(flag + item as usize) % 8].to_string()])
                })
                .collect();
            let scorer = ContentScorer::fit(data.clone(), &item_tags, 100).unwrap();
            for user_id in data.full.user_ids() {
                for (_, score) in scorer.score_items(*user_id).unwrap() {
                    prop_assert!((0.0..=5.0 + 1e-9).contains(&score));
                }
            }
        }
    }
}
