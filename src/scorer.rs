use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{JobRecord, ReferenceProfile};

const TITLE_KEYWORDS: &[&str] = &[
    "machine learning", "ml ", "ml/", "deep learning", "ai ", "artificial intelligence",
    "data scientist", "data science", "researcher", "research scientist", "applied scientist",
    "nlp", "natural language", "computer vision", "cv engineer", "ml engineer", "mle",
    "neural", "llm",
];

const KNOWN_SKILLS: &[&str] = &[
    "python", "java", "sql", "matlab", "r", "c++", "javascript", "rust",
    "machine learning", "deep learning", "nlp", "natural language processing",
    "computer vision", "reinforcement learning", "llm", "llms",
    "rag", "retrieval augmented generation",
    "pytorch", "tensorflow", "scikit-learn", "keras", "transformers",
    "docker", "kubernetes", "aws", "gcp", "azure",
    "flask", "django", "fastapi", "tableau", "power bi", "git", "github",
    "pandas", "numpy", "scipy", "signal processing", "time-series", "time series",
    "cnn", "lstm", "rnn", "bert", "gpt", "transformer", "xgboost", "random forest",
    "data science", "data engineering", "data analysis", "api", "rest", "microservices",
];

const TITLE_WEIGHT: f64 = 0.5;
const SKILL_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreInput {
    pub title: String,
    pub description: String,
}

impl From<&JobRecord> for ScoreInput {
    fn from(job: &JobRecord) -> Self {
        ScoreInput {
            title: job.title.clone(),
            description: job.jd_text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub rationale: String,
}

/// Rates a whole employer batch against the reference profile in one call, so
/// an implementation backed by a model loads it once per batch.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(
        &self,
        batch: &[ScoreInput],
        profile: &ReferenceProfile,
    ) -> anyhow::Result<Vec<ScoreResult>>;
}

/// Title keyword hits plus overlap between the profile's skills and the posting.
#[derive(Debug, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    fn title_score(title: &str) -> (f64, Vec<&'static str>) {
        // trailing space lets "ml " and "ai " match at the end of a title
        let title = format!("{} ", title.to_lowercase());
        let matches: Vec<&'static str> = TITLE_KEYWORDS
            .iter()
            .copied()
            .filter(|kw| title.contains(kw))
            .collect();
        ((matches.len() as f64 / 3.0).min(1.0), matches)
    }

    fn skill_score<'a>(skills: &'a [String], text: &str) -> (f64, Vec<&'a str>) {
        if skills.is_empty() {
            return (0.0, vec![]);
        }
        let text = text.to_lowercase();
        let matches: Vec<&str> = skills
            .iter()
            .map(String::as_str)
            .filter(|s| text.contains(&s.to_lowercase()))
            .collect();
        ((matches.len() as f64 / skills.len() as f64).min(1.0), matches)
    }

    pub fn score_one(input: &ScoreInput, profile: &ReferenceProfile) -> ScoreResult {
        let (t_score, t_matches) = Self::title_score(&input.title);
        let text = format!("{}\n{}", input.title, input.description);
        let (s_score, s_matches) = Self::skill_score(&profile.skills, &text);

        let combined = TITLE_WEIGHT * t_score + SKILL_WEIGHT * s_score;

        let mut why = vec![];
        if !t_matches.is_empty() {
            let shown: Vec<&str> = t_matches.iter().take(3).map(|m| m.trim()).collect();
            why.push(format!("title: {}", shown.join(", ")));
        }
        if !s_matches.is_empty() {
            let shown: Vec<&str> = s_matches.into_iter().take(5).collect();
            why.push(format!("skills: {}", shown.join(", ")));
        }

        ScoreResult {
            score: (combined * 10_000.0).round() / 10_000.0,
            rationale: if why.is_empty() {
                "no keyword overlap".into()
            } else {
                why.join("; ")
            },
        }
    }
}

#[async_trait]
impl Scorer for KeywordScorer {
    async fn score(
        &self,
        batch: &[ScoreInput],
        profile: &ReferenceProfile,
    ) -> anyhow::Result<Vec<ScoreResult>> {
        Ok(batch
            .iter()
            .map(|input| Self::score_one(input, profile))
            .collect())
    }
}

/// Known skills mentioned in a free-text profile, sorted and deduplicated.
pub fn extract_skills(text: &str) -> Vec<String> {
    let padded = format!(" {} ", text.to_lowercase());
    let mut found: Vec<String> = KNOWN_SKILLS
        .iter()
        .filter(|skill| {
            // single letters and short tokens only count as whole words
            if skill.len() <= 2 {
                padded
                    .split(|c: char| !c.is_alphanumeric() && c != '+')
                    .any(|w| w == **skill)
            } else {
                padded.contains(*skill)
            }
        })
        .map(|s| s.to_string())
        .collect();
    found.sort();
    found.dedup();
    found
}
