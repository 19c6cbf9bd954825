//! JSONL-backed embeddings index with brute-force cosine search.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use mnemos_llm::SharedBackend;

use crate::error::Result;
use crate::record::{EmbeddingMetadata, EmbeddingRecord};

/// Cosine similarity between two vectors. Zero-norm inputs score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A search result: the matched record plus its similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub record: EmbeddingRecord,
}

/// Append-only vector store.
///
/// Records live in memory and in a JSONL file; `add` appends to both under
/// one lock so concurrent writers cannot interleave partial lines. Records
/// are never deduplicated and never mutated.
pub struct EmbeddingsIndex {
    path: PathBuf,
    embedder: SharedBackend,
    records: Mutex<Vec<EmbeddingRecord>>,
}

impl EmbeddingsIndex {
    /// Open the index at `path`, loading any existing records.
    pub fn open(path: impl Into<PathBuf>, embedder: SharedBackend) -> Result<Self> {
        let index = Self {
            path: path.into(),
            embedder,
            records: Mutex::new(Vec::new()),
        };
        index.load()?;
        Ok(index)
    }

    /// Reload all records from the JSONL file, replacing the in-memory set.
    ///
    /// Lines that fail to parse are skipped with a warning rather than
    /// poisoning the whole index; a truncated final line after a crash is
    /// the expected case.
    pub fn load(&self) -> Result<()> {
        let mut loaded = Vec::new();
        if self.path.exists() {
            let reader = BufReader::new(std::fs::File::open(&self.path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EmbeddingRecord>(&line) {
                    Ok(record) => loaded.push(record),
                    Err(error) => {
                        warn!(
                            path = %self.path.display(),
                            line = lineno + 1,
                            %error,
                            "skipping unparseable embedding record"
                        );
                    }
                }
            }
        }
        debug!(count = loaded.len(), "loaded embeddings index");
        *self.records.lock() = loaded;
        Ok(())
    }

    /// Rewrite the whole file from the in-memory records.
    pub fn flush(&self) -> Result<()> {
        let records = self.records.lock();
        let mut out = String::new();
        for record in records.iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }

    /// Embed `text` and append the record. Embedder failures surface to the
    /// caller; nothing is written in that case.
    pub async fn add(&self, text: &str, metadata: EmbeddingMetadata) -> Result<()> {
        let vector = self.embedder.embed(text).await?;
        let record = EmbeddingRecord {
            text: text.to_string(),
            vector,
            metadata,
        };

        let mut records = self.records.lock();
        self.append_line(&record)?;
        records.push(record);
        Ok(())
    }

    fn append_line(&self, record: &EmbeddingRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Top-`k` records by cosine similarity to `query_text`.
    ///
    /// Ties keep insertion order, older records first. An empty index
    /// returns an empty list without calling the embedder's search path.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.search_filtered(query_text, k, |_| true).await
    }

    /// `search` restricted to records whose metadata passes `filter`.
    pub async fn search_filtered<F>(
        &self,
        query_text: &str,
        k: usize,
        filter: F,
    ) -> Result<Vec<SearchHit>>
    where
        F: Fn(&EmbeddingMetadata) -> bool,
    {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query_text).await?;

        let records = self.records.lock();
        let mut hits: Vec<SearchHit> = records
            .iter()
            .filter(|r| filter(&r.metadata))
            .map(|r| SearchHit {
                score: cosine_similarity(&query, &r.vector),
                record: r.clone(),
            })
            .collect();
        // Stable sort keeps insertion order for equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Path of the backing JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
