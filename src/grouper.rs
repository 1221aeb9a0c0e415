use std::collections::BTreeMap;

use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::disjoint_set::DisjointSet;
use crate::fingerprint::{is_similar, FingerprintRecord, SimilarityThresholds};
use crate::media_file::{MediaFile, MediaKind};

/// A file together with its fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEntry {
    pub file: MediaFile,
    pub record: FingerprintRecord,
}

/// Files judged mutually similar, ordered by path. Always at least two members.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCluster {
    pub members: Vec<MediaEntry>,
}

impl DuplicateCluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupingOptions {
    pub thresholds: SimilarityThresholds,
    /// Width of a duration band for videos whose length is known
    pub duration_bucket_secs: f64,
    /// Width of an aspect-ratio band for files whose dimensions are known
    pub aspect_bucket_step: f64,
    /// Files whose sizes share `floor(log_base(size))` land in the same band
    pub size_bucket_base: u64,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            thresholds: SimilarityThresholds::default(),
            duration_bucket_secs: 2.0,
            aspect_bucket_step: 0.05,
            size_bucket_base: 8,
        }
    }
}

/// Coarse property used to partition entries before any fingerprint
/// comparison. Entries with different keys are never compared.
///
/// Videos of known length go by duration. Anything else with known
/// dimensions goes by aspect ratio, which survives resizing and
/// re-compression where the byte size does not. The size band is the
/// fallback when neither is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Duration { kind: MediaKind, band: u64 },
    Aspect { kind: MediaKind, band: u32 },
    Size { kind: MediaKind, band: u32 },
}

fn aspect_band(record: &FingerprintRecord, step: f64) -> Option<u32> {
    match (record.width, record.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 && step > 0.0 => {
            Some((f64::from(w) / f64::from(h) / step).round() as u32)
        }
        _ => None,
    }
}

pub fn bucket_key(entry: &MediaEntry, options: &GroupingOptions) -> BucketKey {
    let kind = entry.file.kind;
    if let Some(duration) = entry.record.duration_secs {
        if kind == MediaKind::Video && options.duration_bucket_secs > 0.0 {
            return BucketKey::Duration {
                kind,
                band: (duration / options.duration_bucket_secs).floor() as u64,
            };
        }
    }
    match aspect_band(&entry.record, options.aspect_bucket_step) {
        Some(band) => BucketKey::Aspect { kind, band },
        None => BucketKey::Size {
            kind,
            band: entry
                .file
                .size
                .checked_ilog(options.size_bucket_base.max(2))
                .unwrap_or(0),
        },
    }
}

/// Partition entries into duplicate clusters.
///
/// Similarity is an edge between two files in the same bucket and clusters
/// are the connected components, so A~B and B~C put A, B and C together even
/// when A and C are not similar themselves.
pub fn group(entries: Vec<MediaEntry>, options: &GroupingOptions) -> Vec<DuplicateCluster> {
    let thresholds = options.thresholds;
    group_with(entries, options, |a, b| {
        is_similar(&a.record.fingerprint, &b.record.fingerprint, &thresholds)
    })
}

/// `group` with a caller supplied similarity predicate
pub fn group_with<F>(
    entries: Vec<MediaEntry>,
    options: &GroupingOptions,
    similar: F,
) -> Vec<DuplicateCluster>
where
    F: Fn(&MediaEntry, &MediaEntry) -> bool + Sync,
{
    // path order makes the result independent of enumeration order
    let mut entries = entries;
    entries.sort_by(|a, b| a.file.path.cmp(&b.file.path));
    entries.dedup_by(|a, b| a.file.path == b.file.path);

    let mut buckets: BTreeMap<BucketKey, Vec<usize>> = BTreeMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        buckets.entry(bucket_key(entry, options)).or_default().push(idx);
    }

    let comparisons: usize = buckets.values().map(|b| b.len() * b.len().saturating_sub(1) / 2).sum();
    log::debug!(
        "Comparing {} entries in {} buckets ({} comparisons)",
        entries.len(),
        buckets.len(),
        comparisons
    );

    let (similar, items) = (&similar, &entries);
    let edges: Vec<(usize, usize)> = buckets
        .par_iter()
        .flat_map_iter(move |(_, members)| {
            members
                .iter()
                .copied()
                .tuple_combinations()
                .filter(move |&(a, b)| similar(&items[a], &items[b]))
        })
        .collect();

    let mut set = DisjointSet::<usize>::default();
    for (a, b) in edges {
        set.insert(a, b);
    }

    let mut clusters: Vec<Vec<usize>> = set
        .into_sets()
        .into_iter()
        .map(|members| members.into_iter().collect())
        .collect();
    clusters.sort();

    let mut slots: Vec<Option<MediaEntry>> = entries.into_iter().map(Some).collect();
    let clusters: Vec<DuplicateCluster> = clusters
        .into_iter()
        .map(|indices| DuplicateCluster {
            members: indices
                .into_iter()
                .filter_map(|idx| slots[idx].take())
                .collect(),
        })
        .filter(|cluster| cluster.len() >= 2)
        .collect();

    log::info!("Found {} duplicate clusters", clusters.len());
    clusters
}
