//! In-process exercise knowledge base.
//!
//! A keyword-overlap index over a JSON exercise catalogue. It implements
//! [`ExerciseSearch`] so the coach can run without an external vector store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::agent::profile::LooseNumber;
use crate::capabilities::{ExerciseSearch, SearchHit};

/// One catalogue row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExerciseRecord {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub exercise_type: String,
    #[serde(default)]
    pub body_part: String,
    #[serde(default)]
    pub equipment: String,
    #[serde(default)]
    pub level: String,
    /// Numeric or textual; blank in many catalogue rows.
    #[serde(default)]
    pub rating: Option<LooseNumber>,
}

impl ExerciseRecord {
    /// Searchable document text for this exercise.
    pub fn document(&self) -> String {
        format!(
            "Exercise: {}\nDescription: {}\nType: {}\nBody Part: {}\nEquipment: {}\nLevel: {}",
            self.title,
            self.description,
            self.exercise_type,
            self.body_part,
            self.equipment,
            self.level
        )
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        [
            ("title", &self.title),
            ("description", &self.description),
            ("type", &self.exercise_type),
            ("body_part", &self.body_part),
            ("equipment", &self.equipment),
            ("level", &self.level),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .chain(
            self.rating
                .as_ref()
                .and_then(LooseNumber::as_f64)
                .map(|r| ("rating".to_string(), r.to_string())),
        )
        .collect()
    }
}

struct IndexedExercise {
    document: String,
    metadata: BTreeMap<String, String>,
    tokens: HashSet<String>,
}

pub struct ExerciseIndex {
    entries: Vec<IndexedExercise>,
}

impl ExerciseIndex {
    pub fn new(records: Vec<ExerciseRecord>) -> Self {
        let entries = records
            .into_iter()
            .filter(|r| !r.title.trim().is_empty())
            .map(|record| {
                let document = record.document();
                let tokens = tokenize(&document).into_iter().collect();
                IndexedExercise {
                    document,
                    metadata: record.metadata(),
                    tokens,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Load a catalogue from a JSON array of [`ExerciseRecord`].
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read exercise catalogue {:?}", path))?;
        let records: Vec<ExerciseRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse exercise catalogue {:?}", path))?;
        let index = Self::new(records);
        tracing::info!("Exercise catalogue: {} exercises available", index.len());
        Ok(index)
    }

    /// Like [`from_path`](Self::from_path) but never fails; a missing or broken
    /// catalogue yields an empty index so the coach can still answer.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::from_path(path) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("{:#} - continuing with an empty knowledge base", e);
                Self::empty()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matches_filters(
        entry: &IndexedExercise,
        filters: Option<&BTreeMap<String, String>>,
    ) -> bool {
        let Some(filters) = filters else {
            return true;
        };
        filters.iter().all(|(key, wanted)| {
            wanted.trim().is_empty()
                || entry
                    .metadata
                    .get(key)
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case(wanted.trim()))
        })
    }

    fn rank(
        &self,
        query: &str,
        filters: Option<&BTreeMap<String, String>>,
        top_k: usize,
    ) -> Vec<SearchHit> {
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| Self::matches_filters(entry, filters))
            .filter_map(|(i, entry)| {
                let matched = query_tokens
                    .iter()
                    .filter(|t| entry.tokens.contains(*t))
                    .count();
                if matched == 0 {
                    return None;
                }
                Some((i, matched as f64 / query_tokens.len() as f64))
            })
            .collect();

        // Stable sort keeps catalogue order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let entry = &self.entries[i];
                SearchHit {
                    content: entry.document.clone(),
                    metadata: entry.metadata.clone(),
                    distance: Some(1.0 - score),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ExerciseSearch for ExerciseIndex {
    async fn search(
        &self,
        query: &str,
        filters: Option<&BTreeMap<String, String>>,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let hits = self.rank(query, filters, top_k);
        tracing::debug!("Found {} exercises for query: '{}'", hits.len(), query);
        Ok(hits)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
