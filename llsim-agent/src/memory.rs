//! # Agent Memory
//!
//! Two tiers per agent:
//! - **short-term**: the most recent N entries, FIFO eviction
//! - **long-term**: entries promoted from short-term by a [`Consolidator`]
//!
//! Retrieval ranks both tiers with a [`Relevance`] strategy. Both strategies
//! are pluggable; the defaults are recency-based.
//!
//! Every appended entry gets a sequence number. Short-term always holds a
//! contiguous range of sequence numbers, which is how retrieval recognizes a
//! long-term copy of an entry that is still in short-term.

use llsim_error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::trace;

/// Default short-term bound
pub const DEFAULT_SHORT_TERM_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Observation,
    Reasoning,
    Action,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Observation => "observation",
            MemoryKind::Reasoning => "reasoning",
            MemoryKind::Action => "action",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single remembered event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Step index the event happened at
    pub step: u64,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salience: Option<f32>,
}

impl MemoryEntry {
    pub fn new(step: u64, kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            content: content.into(),
            salience: None,
        }
    }

    pub fn observation(step: u64, content: impl Into<String>) -> Self {
        Self::new(step, MemoryKind::Observation, content)
    }

    pub fn reasoning(step: u64, content: impl Into<String>) -> Self {
        Self::new(step, MemoryKind::Reasoning, content)
    }

    pub fn action(step: u64, content: impl Into<String>) -> Self {
        Self::new(step, MemoryKind::Action, content)
    }

    pub fn with_salience(mut self, salience: f32) -> Self {
        self.salience = Some(salience);
        self
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Scores an entry against a query. Higher is more relevant.
pub trait Relevance: Send + Sync {
    fn score(&self, query: &str, entry: &MemoryEntry) -> f64;
}

/// Newer entries win. The query is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recency;

impl Relevance for Recency {
    fn score(&self, _query: &str, entry: &MemoryEntry) -> f64 {
        entry.step as f64
    }
}

/// Counts query words (3+ chars) that also appear in the entry. Salience
/// adds up to one extra point; recency breaks ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordOverlap;

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

impl Relevance for KeywordOverlap {
    fn score(&self, query: &str, entry: &MemoryEntry) -> f64 {
        let query = words(query);
        if query.is_empty() {
            return entry.salience.unwrap_or(0.0) as f64;
        }
        let content = words(&entry.content);
        let overlap = query.intersection(&content).count() as f64;
        overlap + entry.salience.unwrap_or(0.0).clamp(0.0, 1.0) as f64
    }
}

/// What a consolidator wants promoted into long-term memory
#[derive(Debug, Clone, PartialEq)]
pub enum Promotion {
    /// Copy the pending entry at this index
    Keep(usize),
    /// Store a new entry (e.g. a summary of several pending ones)
    Summary(MemoryEntry),
}

/// Decides which short-term entries survive into long-term memory.
///
/// `pending` holds the short-term entries appended since the previous
/// consolidation, oldest first.
pub trait Consolidator: Send + Sync {
    fn consolidate(&self, pending: &[MemoryEntry], step: u64) -> Vec<Promotion>;
}

/// Promote the newest `keep` pending entries
#[derive(Debug, Clone, Copy)]
pub struct KeepRecent {
    pub keep: usize,
}

impl Default for KeepRecent {
    fn default() -> Self {
        Self { keep: 3 }
    }
}

impl Consolidator for KeepRecent {
    fn consolidate(&self, pending: &[MemoryEntry], _step: u64) -> Vec<Promotion> {
        let start = pending.len().saturating_sub(self.keep);
        (start..pending.len()).map(Promotion::Keep).collect()
    }
}

/// Promote entries whose salience reaches the threshold
#[derive(Debug, Clone, Copy)]
pub struct SalienceThreshold {
    pub threshold: f32,
}

impl Consolidator for SalienceThreshold {
    fn consolidate(&self, pending: &[MemoryEntry], _step: u64) -> Vec<Promotion> {
        pending
            .iter()
            .enumerate()
            .filter(|(_, e)| e.salience.is_some_and(|s| s >= self.threshold))
            .map(|(i, _)| Promotion::Keep(i))
            .collect()
    }
}

/// Fold all pending entries into one summary entry
#[derive(Debug, Clone, Copy)]
pub struct Digest {
    pub max_chars: usize,
}

impl Consolidator for Digest {
    fn consolidate(&self, pending: &[MemoryEntry], step: u64) -> Vec<Promotion> {
        let (Some(first), Some(last)) = (pending.first(), pending.last()) else {
            return Vec::new();
        };

        let mut text = format!("Summary of steps {}-{}:", first.step, last.step);
        for entry in pending {
            let line = format!(" [{}] {};", entry.kind, entry.content.replace('\n', " "));
            if text.chars().count() + line.chars().count() > self.max_chars {
                text.push_str(" ...");
                break;
            }
            text.push_str(&line);
        }

        let salience = pending
            .iter()
            .filter_map(|e| e.salience)
            .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))));

        let mut summary = MemoryEntry::reasoning(step.max(last.step), text);
        summary.salience = salience;
        vec![Promotion::Summary(summary)]
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceConfig {
    #[default]
    Recency,
    KeywordOverlap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ConsolidationConfig {
    KeepRecent { keep: usize },
    SalienceThreshold { threshold: f32 },
    Digest { max_chars: usize },
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        ConsolidationConfig::KeepRecent { keep: 3 }
    }
}

/// Per-agent memory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub short_term_capacity: usize,
    /// How many entries the reasoning engine sees each step
    pub retrieve_k: usize,
    /// Consolidate after every K-th step (`None` disables the hook)
    pub consolidate_every: Option<u64>,
    pub relevance: RelevanceConfig,
    pub consolidation: ConsolidationConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: DEFAULT_SHORT_TERM_CAPACITY,
            retrieve_k: 5,
            consolidate_every: Some(5),
            relevance: RelevanceConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// One agent's memory. Exclusively owned by that agent.
pub struct Memory {
    capacity: usize,
    retrieve_k: usize,
    consolidate_every: Option<u64>,
    short_term: VecDeque<(u64, MemoryEntry)>,
    /// Sequence number of promoted copies, `None` for summaries
    long_term: Vec<(Option<u64>, MemoryEntry)>,
    next_seq: u64,
    /// Short-term entries not yet offered to the consolidator
    pending: usize,
    last_step: u64,
    relevance: Box<dyn Relevance>,
    consolidator: Box<dyn Consolidator>,
}

impl Memory {
    /// Create memory with a short-term bound and the default strategies
    pub fn new(capacity: usize) -> Self {
        Self::from_config(&MemoryConfig {
            short_term_capacity: capacity,
            ..MemoryConfig::default()
        })
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        let relevance: Box<dyn Relevance> = match config.relevance {
            RelevanceConfig::Recency => Box::new(Recency),
            RelevanceConfig::KeywordOverlap => Box::new(KeywordOverlap),
        };
        let consolidator: Box<dyn Consolidator> = match config.consolidation {
            ConsolidationConfig::KeepRecent { keep } => Box::new(KeepRecent { keep }),
            ConsolidationConfig::SalienceThreshold { threshold } => {
                Box::new(SalienceThreshold { threshold })
            }
            ConsolidationConfig::Digest { max_chars } => Box::new(Digest { max_chars }),
        };

        Self {
            capacity: config.short_term_capacity.max(1),
            retrieve_k: config.retrieve_k,
            consolidate_every: config.consolidate_every,
            short_term: VecDeque::new(),
            long_term: Vec::new(),
            next_seq: 0,
            pending: 0,
            last_step: 0,
            relevance,
            consolidator,
        }
    }

    pub fn with_relevance(mut self, relevance: impl Relevance + 'static) -> Self {
        self.relevance = Box::new(relevance);
        self
    }

    pub fn with_consolidator(mut self, consolidator: impl Consolidator + 'static) -> Self {
        self.consolidator = Box::new(consolidator);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn retrieve_k(&self) -> usize {
        self.retrieve_k
    }

    /// Step of the newest entry
    pub fn last_step(&self) -> u64 {
        self.last_step
    }

    /// Append an entry to short-term memory, evicting the oldest entry when
    /// the bound is exceeded.
    ///
    /// Entries must arrive in step order; an entry older than the newest one
    /// stored is rejected.
    pub fn append(&mut self, entry: MemoryEntry) -> Result<()> {
        if entry.step < self.last_step {
            return Err(Error::invalid_argument("memory entries must not go back in time")
                .with_operation("memory::append")
                .with_context("entry_step", entry.step.to_string())
                .with_context("last_step", self.last_step.to_string()));
        }

        self.last_step = entry.step;
        self.short_term.push_back((self.next_seq, entry));
        self.next_seq += 1;
        self.pending += 1;

        while self.short_term.len() > self.capacity {
            if let Some((seq, evicted)) = self.short_term.pop_front() {
                trace!(seq, step = evicted.step, kind = %evicted.kind, "short-term eviction");
            }
        }
        self.pending = self.pending.min(self.short_term.len());
        Ok(())
    }

    /// Whether the consolidation hook should run after `step`
    pub fn consolidation_due(&self, step: u64) -> bool {
        match self.consolidate_every {
            Some(every) if every > 0 => step > 0 && step % every == 0,
            _ => false,
        }
    }

    /// Offer the entries appended since the last consolidation to the
    /// consolidator and store what it promotes. Returns the number of
    /// long-term entries added.
    pub fn consolidate(&mut self) -> usize {
        if self.pending == 0 {
            return 0;
        }

        let start = self.short_term.len() - self.pending;
        let (seqs, pending): (Vec<u64>, Vec<MemoryEntry>) = self
            .short_term
            .iter()
            .skip(start)
            .map(|(seq, entry)| (*seq, entry.clone()))
            .unzip();

        let mut added = 0;
        for promotion in self.consolidator.consolidate(&pending, self.last_step) {
            match promotion {
                Promotion::Keep(i) => {
                    if let (Some(seq), Some(entry)) = (seqs.get(i), pending.get(i)) {
                        self.long_term.push((Some(*seq), entry.clone()));
                        added += 1;
                    }
                }
                Promotion::Summary(entry) => {
                    self.long_term.push((None, entry));
                    added += 1;
                }
            }
        }

        self.pending = 0;
        added
    }

    /// The `k` most relevant entries across both tiers, best first.
    pub fn retrieve<'a>(&'a self, query: &str, k: usize) -> impl Iterator<Item = &'a MemoryEntry> + 'a {
        let oldest_short = self.short_term.front().map(|(seq, _)| *seq);
        let still_short = move |seq: &Option<u64>| match (seq, oldest_short) {
            (Some(seq), Some(oldest)) => *seq >= oldest,
            _ => false,
        };

        let mut scored: Vec<(f64, usize, &MemoryEntry)> = self
            .long_term
            .iter()
            .filter(|(seq, _)| !still_short(seq))
            .map(|(_, entry)| entry)
            .chain(self.short_term.iter().map(|(_, entry)| entry))
            .enumerate()
            .map(|(i, entry)| (self.relevance.score(query, entry), i, entry))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(b.2.step.cmp(&a.2.step))
                .then(b.1.cmp(&a.1))
        });

        scored.into_iter().take(k).map(|(_, _, entry)| entry)
    }

    /// Newest `n` short-term entries of a kind (any kind for `None`), oldest first
    pub fn recent(&self, kind: Option<MemoryKind>, n: usize) -> Vec<&MemoryEntry> {
        let mut found: Vec<&MemoryEntry> = self
            .short_term
            .iter()
            .rev()
            .map(|(_, entry)| entry)
            .filter(|entry| kind.map_or(true, |k| entry.kind == k))
            .take(n)
            .collect();
        found.reverse();
        found
    }

    pub fn short_term(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.short_term.iter().map(|(_, entry)| entry)
    }

    pub fn long_term(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.long_term.iter().map(|(_, entry)| entry)
    }

    pub fn short_term_len(&self) -> usize {
        self.short_term.len()
    }

    pub fn long_term_len(&self) -> usize {
        self.long_term.len()
    }

    /// Distinct entries currently retrievable
    pub fn len(&self) -> usize {
        let oldest_short = self.short_term.front().map(|(seq, _)| *seq);
        let duplicated = self
            .long_term
            .iter()
            .filter(|(seq, _)| matches!((seq, oldest_short), (Some(s), Some(o)) if *s >= o))
            .count();
        self.short_term.len() + self.long_term.len() - duplicated
    }

    pub fn is_empty(&self) -> bool {
        self.short_term.is_empty() && self.long_term.is_empty()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("capacity", &self.capacity)
            .field("short_term", &self.short_term.len())
            .field("long_term", &self.long_term.len())
            .field("pending", &self.pending)
            .field("last_step", &self.last_step)
            .finish()
    }
}
