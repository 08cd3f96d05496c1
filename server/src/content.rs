//! Content collaborator seam: quiz questions and race words.
//!
//! The real question/word bank is an external service. Sessions receive an
//! immutable content set at creation time and never reach back out. The
//! full [`ContentItem`] keeps the stored correct answer server-side only;
//! [`ContentItem::view`] is the projection that goes over the wire.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use shared::{ContentItemView, Difficulty, GameMode};

use crate::error::EngineError;

/// One quiz question or race word, answer included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub id: String,
    pub prompt: String,
    /// Multiple-choice options; empty for race words.
    pub options: Vec<String>,
    /// Stored correct answer. For quiz items this is the exact option
    /// text; for race words it is the target word itself.
    pub answer: String,
    pub category: Option<String>,
}

impl ContentItem {
    /// Client-facing projection with the answer withheld.
    pub fn view(&self) -> ContentItemView {
        ContentItemView {
            id: self.id.clone(),
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            category: self.category.clone(),
        }
    }
}

/// Selection parameters carried from the join request into the fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentFilter {
    pub difficulty: Difficulty,
    pub category: Option<String>,
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetches `count` distinct items for a session. A failure here aborts
    /// the pairing or room start that requested it.
    async fn fetch(
        &self,
        mode: GameMode,
        filter: &ContentFilter,
        count: usize,
    ) -> Result<Vec<ContentItem>, EngineError>;
}

/// Built-in bank so the server runs standalone and tests stay hermetic.
pub struct SampleContentProvider {
    questions: Vec<ContentItem>,
    words: Vec<ContentItem>,
}

impl SampleContentProvider {
    pub fn new() -> Self {
        Self {
            questions: sample_questions(),
            words: sample_words(),
        }
    }
}

impl Default for SampleContentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentProvider for SampleContentProvider {
    async fn fetch(
        &self,
        mode: GameMode,
        filter: &ContentFilter,
        count: usize,
    ) -> Result<Vec<ContentItem>, EngineError> {
        let bank = match mode {
            GameMode::Quiz => &self.questions,
            GameMode::TypingRace => &self.words,
        };

        let pool: Vec<&ContentItem> = match &filter.category {
            Some(category) => {
                let filtered: Vec<&ContentItem> = bank
                    .iter()
                    .filter(|item| item.category.as_deref() == Some(category.as_str()))
                    .collect();
                // An over-narrow filter falls back to the whole bank rather
                // than producing a session with too few items.
                if filtered.len() >= count {
                    filtered
                } else {
                    bank.iter().collect()
                }
            }
            None => bank.iter().collect(),
        };

        if pool.is_empty() {
            return Err(EngineError::Collaborator(
                "content bank is empty".to_string(),
            ));
        }

        let picked: Vec<ContentItem> = pool
            .choose_multiple(&mut rand::thread_rng(), count.min(pool.len()))
            .map(|item| (*item).clone())
            .collect();

        if picked.is_empty() {
            return Err(EngineError::Collaborator(
                "content selection returned nothing".to_string(),
            ));
        }

        Ok(picked)
    }
}

fn quiz_item(id: &str, prompt: &str, options: &[&str], answer: &str, category: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        prompt: prompt.to_string(),
        options: options.iter().map(|s| s.to_string()).collect(),
        answer: answer.to_string(),
        category: Some(category.to_string()),
    }
}

fn word_item(id: &str, word: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        prompt: word.to_string(),
        options: Vec::new(),
        answer: word.to_string(),
        category: None,
    }
}

fn sample_questions() -> Vec<ContentItem> {
    vec![
        quiz_item("q01", "Pick the article: __ Haus", &["der", "die", "das"], "das", "articles"),
        quiz_item("q02", "Pick the article: __ Katze", &["der", "die", "das"], "die", "articles"),
        quiz_item("q03", "Pick the article: __ Hund", &["der", "die", "das"], "der", "articles"),
        quiz_item("q04", "Plural of 'child'", &["childs", "children", "childes"], "children", "plurals"),
        quiz_item("q05", "Plural of 'mouse'", &["mouses", "mice", "mouse"], "mice", "plurals"),
        quiz_item("q06", "Past tense of 'go'", &["goed", "gone", "went"], "went", "verbs"),
        quiz_item("q07", "Past tense of 'eat'", &["ate", "eaten", "eated"], "ate", "verbs"),
        quiz_item("q08", "Synonym of 'rapid'", &["slow", "fast", "late"], "fast", "vocabulary"),
        quiz_item("q09", "Synonym of 'begin'", &["start", "stop", "stay"], "start", "vocabulary"),
        quiz_item("q10", "Antonym of 'ancient'", &["old", "modern", "aged"], "modern", "vocabulary"),
        quiz_item("q11", "Correct spelling", &["recieve", "receive", "receeve"], "receive", "spelling"),
        quiz_item("q12", "Correct spelling", &["definately", "definitely", "definitly"], "definitely", "spelling"),
    ]
}

fn sample_words() -> Vec<ContentItem> {
    [
        "keyboard", "language", "practice", "grammar", "victory", "session", "journey",
        "rhythm", "balance", "whisper", "thunder", "library", "horizon", "lantern",
        "crystal", "harvest", "voyage", "miracle", "compass", "blossom",
    ]
    .iter()
    .enumerate()
    .map(|(i, word)| word_item(&format!("w{:02}", i + 1), word))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_returns_distinct_items() {
        let provider = SampleContentProvider::new();
        let items = provider
            .fetch(GameMode::Quiz, &ContentFilter::default(), 10)
            .await
            .unwrap();

        assert_eq!(items.len(), 10);
        let mut ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn test_fetch_words_carry_target_as_answer() {
        let provider = SampleContentProvider::new();
        let items = provider
            .fetch(GameMode::TypingRace, &ContentFilter::default(), 10)
            .await
            .unwrap();

        assert_eq!(items.len(), 10);
        for item in &items {
            assert!(item.options.is_empty());
            assert_eq!(item.prompt, item.answer);
        }
    }

    #[tokio::test]
    async fn test_category_filter_narrows_pool() {
        let provider = SampleContentProvider::new();
        let filter = ContentFilter {
            difficulty: Difficulty::Random,
            category: Some("articles".to_string()),
        };
        let items = provider.fetch(GameMode::Quiz, &filter, 3).await.unwrap();

        assert_eq!(items.len(), 3);
        for item in &items {
            assert_eq!(item.category.as_deref(), Some("articles"));
        }
    }

    #[tokio::test]
    async fn test_narrow_category_falls_back_to_full_bank() {
        let provider = SampleContentProvider::new();
        let filter = ContentFilter {
            difficulty: Difficulty::Random,
            category: Some("articles".to_string()),
        };
        // Only 3 article questions exist; asking for 10 must still succeed.
        let items = provider.fetch(GameMode::Quiz, &filter, 10).await.unwrap();
        assert_eq!(items.len(), 10);
    }

    #[test]
    fn test_view_strips_answer() {
        let item = quiz_item("q1", "prompt", &["a", "b"], "a", "misc");
        let view = item.view();

        assert_eq!(view.id, "q1");
        assert_eq!(view.options, vec!["a", "b"]);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("\"answer\""));
    }
}
