//! Drain-style online log template clustering with novelty comparison.
//! Content-hash template ids use the same `Sha256::new()` / `.update()` /
//! `.finalize()`, hex-formatted idiom as any other stable-id hash in this
//! codebase; storage is namespace-sharded (`dashmap::DashMap` wrapping a
//! `parking_lot::Mutex` per key) to keep ingestion lock-free across
//! namespaces.

pub mod token;

pub use token::Token;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One clustered pattern within a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTemplate {
    pub id: String,
    pub tokens: Vec<Token>,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub example: String,
}

impl LogTemplate {
    fn recompute_id(&mut self) {
        self.id = hash_tokens(&self.tokens);
    }
}

fn hash_tokens(tokens: &[Token]) -> String {
    let mut hasher = Sha256::new();
    for token in tokens {
        hasher.update(token.canonical().as_bytes());
        hasher.update([0x1f]); // unit separator; keeps adjacent tokens from colliding
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct TemplateStoreConfig {
    pub depth: usize,
    pub similarity_threshold: f64,
    pub max_clusters_per_leaf: usize,
    pub merge_similarity: f64,
    pub sample_threshold: usize,
    pub target_sample_size: usize,
    pub prune_count_floor: u64,
}

impl Default for TemplateStoreConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            similarity_threshold: 0.4,
            max_clusters_per_leaf: 32,
            merge_similarity: 0.7,
            sample_threshold: 10_000,
            target_sample_size: 1_000,
            prune_count_floor: 1,
        }
    }
}

type LeafKey = (usize, Vec<String>);

fn leaf_key(tokens: &[Token], depth: usize) -> LeafKey {
    let prefix = tokens.iter().take(depth).map(|t| t.canonical().to_string()).collect();
    (tokens.len(), prefix)
}

fn similarity(candidate: &[Token], input: &[Token]) -> f64 {
    if candidate.len() != input.len() || candidate.is_empty() {
        return 0.0;
    }
    let matches = candidate
        .iter()
        .zip(input.iter())
        .filter(|(c, i)| c.is_wildcard() || c.canonical() == i.canonical())
        .count();
    matches as f64 / candidate.len() as f64
}

/// All clusters sharing one `(tokenCount, firstDepthTokens)` leaf.
#[derive(Debug, Default)]
struct Shard {
    leaves: HashMap<LeafKey, Vec<LogTemplate>>,
}

impl Shard {
    fn ingest_line(&mut self, tokens: Vec<Token>, raw_line: &str, config: &TemplateStoreConfig) -> LogTemplate {
        let key = leaf_key(&tokens, config.depth);
        let now = Utc::now();
        let bucket = self.leaves.entry(key).or_default();

        let mut best_idx: Option<usize> = None;
        let mut best_score = -1.0f64;
        for (idx, cluster) in bucket.iter().enumerate() {
            let score = similarity(&cluster.tokens, &tokens);
            let is_better = match best_idx {
                None => true,
                Some(b) => {
                    let incumbent = &bucket[b];
                    score > best_score
                        || (score == best_score && cluster.count > incumbent.count)
                        || (score == best_score
                            && cluster.count == incumbent.count
                            && cluster.first_seen < incumbent.first_seen)
                }
            };
            if is_better {
                best_idx = Some(idx);
                best_score = score;
            }
        }

        if let Some(idx) = best_idx {
            if best_score >= config.similarity_threshold {
                let cluster = &mut bucket[idx];
                absorb(cluster, &tokens);
                cluster.count += 1;
                cluster.last_seen = now;
                if cluster.example.is_empty() {
                    cluster.example = raw_line.to_string();
                }
                cluster.recompute_id();
                let result = cluster.clone();
                drop(bucket);
                if self.leaves.get(&leaf_key(&result.tokens, config.depth)).map(Vec::len).unwrap_or(0)
                    > config.max_clusters_per_leaf
                {
                    self.rebalance_leaf(&leaf_key(&result.tokens, config.depth), config);
                }
                return result;
            }
        }

        let mut new_cluster = LogTemplate {
            id: String::new(),
            tokens,
            count: 1,
            first_seen: now,
            last_seen: now,
            example: raw_line.to_string(),
        };
        new_cluster.recompute_id();
        bucket.push(new_cluster.clone());
        let overflowed = bucket.len() > config.max_clusters_per_leaf;
        let key_for_rebalance = leaf_key(&new_cluster.tokens, config.depth);
        if overflowed {
            self.rebalance_leaf(&key_for_rebalance, config);
        }
        new_cluster
    }

    fn rebalance_leaf(&mut self, key: &LeafKey, config: &TemplateStoreConfig) {
        let Some(bucket) = self.leaves.get_mut(key) else { return };
        let mut i = 0;
        while i < bucket.len() {
            let mut j = i + 1;
            while j < bucket.len() {
                let score = similarity(&bucket[i].tokens, &bucket[j].tokens);
                if score >= config.merge_similarity {
                    let other = bucket.remove(j);
                    absorb(&mut bucket[i], &other.tokens);
                    bucket[i].count += other.count;
                    bucket[i].first_seen = bucket[i].first_seen.min(other.first_seen);
                    bucket[i].last_seen = bucket[i].last_seen.max(other.last_seen);
                    bucket[i].recompute_id();
                    continue;
                }
                j += 1;
            }
            i += 1;
        }
        bucket.retain(|c| c.count >= config.prune_count_floor);
    }

    fn snapshot(&self) -> Vec<LogTemplate> {
        self.leaves.values().flatten().cloned().collect()
    }
}

/// Turns wildcard every position where `cluster` and `tokens` disagree.
fn absorb(cluster: &mut LogTemplate, tokens: &[Token]) {
    for (pos, input_tok) in tokens.iter().enumerate() {
        if !cluster.tokens[pos].is_wildcard() && cluster.tokens[pos].canonical() != input_tok.canonical() {
            cluster.tokens[pos] = Token::Wildcard;
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct StoreSnapshot {
    namespaces: HashMap<String, Vec<LogTemplate>>,
}

/// Namespace-sharded online clusterer. One `Mutex<Shard>` guards each
/// namespace so ingestion for `app-a` never blocks ingestion for `app-b`.
pub struct TemplateStore {
    shards: DashMap<String, Mutex<Shard>>,
    config: TemplateStoreConfig,
    snapshot_path: Option<PathBuf>,
}

impl TemplateStore {
    pub fn new(config: TemplateStoreConfig) -> Self {
        Self { shards: DashMap::new(), config, snapshot_path: None }
    }

    /// Load a persisted snapshot if present at `path`; a missing file is
    /// not an error, matching `ConfigStore`'s auto-materialise stance but
    /// without writing anything back until the first `persist`.
    pub async fn load(path: impl Into<PathBuf>, config: TemplateStoreConfig) -> std::io::Result<Self> {
        let path = path.into();
        let store = Self { shards: DashMap::new(), config, snapshot_path: Some(path.clone()) };
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let loaded: StoreSnapshot = serde_json::from_str(&raw)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                for (namespace, templates) in loaded.namespaces {
                    let mut shard = Shard::default();
                    for template in templates {
                        let key = leaf_key(&template.tokens, store.config.depth);
                        shard.leaves.entry(key).or_default().push(template);
                    }
                    store.shards.insert(namespace, Mutex::new(shard));
                }
                Ok(store)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(store),
            Err(err) => Err(err),
        }
    }

    pub async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = self.snapshot_path.clone() else { return Ok(()) };
        let mut namespaces = HashMap::new();
        for entry in self.shards.iter() {
            namespaces.insert(entry.key().clone(), entry.value().lock().snapshot());
        }
        let bytes = serde_json::to_vec_pretty(&StoreSnapshot { namespaces })?;
        tokio::fs::write(&path, bytes).await
    }

    /// Ingest one line into the persistent, namespace-scoped store.
    pub fn ingest(&self, namespace: &str, line: &str) -> LogTemplate {
        let tokens = token::normalize(line);
        let shard_entry = self.shards.entry(namespace.to_string()).or_default();
        let mut shard = shard_entry.lock();
        shard.ingest_line(tokens, line, &self.config)
    }

    /// All current clusters for a namespace.
    pub fn snapshot(&self, namespace: &str) -> Vec<LogTemplate> {
        self.shards.get(namespace).map(|s| s.lock().snapshot()).unwrap_or_default()
    }

    /// Process an isolated batch of lines (e.g. one comparison window) into
    /// a throwaway shard, without touching the persistent namespace state.
    /// Lines beyond `sampleThreshold` are uniformly sub-sampled and counts
    /// scaled back up.
    pub fn ingest_window<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> Vec<LogTemplate> {
        let lines: Vec<&str> = lines.into_iter().collect();
        let total = lines.len();

        let sampled: Vec<&str> = if total > self.config.sample_threshold && self.config.target_sample_size > 0 {
            let stride = (total as f64 / self.config.target_sample_size as f64).ceil().max(1.0) as usize;
            lines.iter().step_by(stride).copied().collect()
        } else {
            lines
        };

        let scale = if sampled.is_empty() { 1.0 } else { total as f64 / sampled.len() as f64 };

        let mut shard = Shard::default();
        for line in &sampled {
            shard.ingest_line(token::normalize(line), line, &self.config);
        }

        let mut templates = shard.snapshot();
        if scale > 1.0 {
            for template in &mut templates {
                template.count = (template.count as f64 * scale).round() as u64;
            }
        }
        templates
    }
}

/// A template in `current` is novel iff no template in `previous` shares its
/// canonical token sequence. Compared by tokens, not by `id`, so the
/// relation survives a rare re-hash.
pub fn compare_windows(current: &[LogTemplate], previous: &[LogTemplate]) -> HashMap<String, bool> {
    let previous_sequences: HashSet<&Vec<Token>> = previous.iter().map(|t| &t.tokens).collect();
    current
        .iter()
        .map(|t| (t.id.clone(), !previous_sequences.contains(&t.tokens)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TemplateStore {
        TemplateStore::new(TemplateStoreConfig::default())
    }

    #[test]
    fn similar_lines_merge_into_one_template() {
        let store = store();
        store.ingest("app", "connection refused to host 10.0.0.1");
        store.ingest("app", "connection refused to host 10.0.0.2");

        let snapshot = store.snapshot("app");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].count, 2);
        assert_eq!(snapshot[0].tokens[4], Token::Wildcard);
    }

    #[test]
    fn dissimilar_lines_stay_distinct_templates() {
        let store = store();
        store.ingest("app", "connection refused to host 10.0.0.1");
        store.ingest("app", "disk usage at 91 percent on volume data");

        assert_eq!(store.snapshot("app").len(), 2);
    }

    #[test]
    fn namespaces_do_not_share_clusters() {
        let store = store();
        store.ingest("app-a", "connection refused to host 10.0.0.1");
        store.ingest("app-b", "connection refused to host 10.0.0.1");

        assert_eq!(store.snapshot("app-a").len(), 1);
        assert_eq!(store.snapshot("app-b").len(), 1);
    }

    #[test]
    fn id_is_a_pure_function_of_tokens() {
        let store = store();
        let first = store.ingest("app", "connection refused to host 10.0.0.1");
        let second = store.ingest("app", "connection refused to host 10.0.0.2");
        assert_eq!(first.id, second.id);
        assert_eq!(second.id, hash_tokens(&second.tokens));
    }

    #[test]
    fn novelty_is_by_token_sequence_not_id() {
        let previous = vec![LogTemplate {
            id: "stale-id".into(),
            tokens: vec![Token::Literal("disk".into()), Token::Wildcard],
            count: 3,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            example: "disk 91".into(),
        }];
        let current = vec![
            LogTemplate {
                id: "fresh-id".into(),
                tokens: vec![Token::Literal("disk".into()), Token::Wildcard],
                count: 1,
                first_seen: Utc::now(),
                last_seen: Utc::now(),
                example: "disk 50".into(),
            },
            LogTemplate {
                id: "new-pattern".into(),
                tokens: vec![Token::Literal("memory".into()), Token::Wildcard],
                count: 1,
                first_seen: Utc::now(),
                last_seen: Utc::now(),
                example: "memory 80".into(),
            },
        ];

        let novelty = compare_windows(&current, &previous);
        assert!(!novelty["fresh-id"]);
        assert!(novelty["new-pattern"]);
    }

    #[test]
    fn sampling_scales_counts_back_up() {
        let lines: Vec<String> = (0..50).map(|i| format!("request {i} completed")).collect();
        let config = TemplateStoreConfig { sample_threshold: 10, target_sample_size: 5, ..TemplateStoreConfig::default() };
        let sampled_store = TemplateStore::new(config);
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let templates = sampled_store.ingest_window(refs);

        let total: u64 = templates.iter().map(|t| t.count).sum();
        assert!(total >= 40, "expected scaled count near 50, got {total}");
    }

    #[tokio::test]
    async fn persists_and_reloads_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");

        let store = TemplateStore::load(&path, TemplateStoreConfig::default()).await.unwrap();
        store.ingest("app", "connection refused to host 10.0.0.1");
        store.persist().await.unwrap();

        let reloaded = TemplateStore::load(&path, TemplateStoreConfig::default()).await.unwrap();
        assert_eq!(reloaded.snapshot("app").len(), 1);
    }
}
