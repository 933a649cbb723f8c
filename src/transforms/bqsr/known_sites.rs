use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors raised while reading a known-sites file.
#[derive(Debug, Error)]
pub enum KnownSitesError {
    /// File could not be read.
    #[error("failed to read known sites: {0}")]
    Io(#[from] io::Error),

    /// A line is not a valid interval.
    #[error("known sites line {line}: {reason}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
}

/// Reference positions of known variation, excluded from mismatch counting.
///
/// Intervals are 0-based half-open and merged per contig, so lookups are a
/// binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownSites {
    intervals: FxHashMap<Arc<str>, Vec<(u32, u32)>>,
}

impl KnownSites {
    /// Build from `(contig, start, end)` intervals.
    pub fn from_intervals<I, S>(intervals: I) -> Self
    where
        I: IntoIterator<Item = (S, u32, u32)>,
        S: Into<Arc<str>>,
    {
        let mut by_contig: FxHashMap<Arc<str>, Vec<(u32, u32)>> = FxHashMap::default();
        for (contig, start, end) in intervals {
            if end > start {
                by_contig.entry(contig.into()).or_default().push((start, end));
            }
        }
        for spans in by_contig.values_mut() {
            spans.sort_unstable();
            let mut merged: Vec<(u32, u32)> = Vec::with_capacity(spans.len());
            for &(start, end) in spans.iter() {
                match merged.last_mut() {
                    Some(last) if start <= last.1 => last.1 = last.1.max(end),
                    _ => merged.push((start, end)),
                }
            }
            *spans = merged;
        }
        Self {
            intervals: by_contig,
        }
    }

    /// Parse BED-style text: `contig<TAB>start<TAB>end[...]`.
    ///
    /// Blank lines, `#` comments and `track`/`browser` headers are skipped.
    pub fn from_bed<R: BufRead>(reader: R) -> Result<Self, KnownSitesError> {
        let mut intervals = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty()
                || trimmed.starts_with('#')
                || trimmed.starts_with("track")
                || trimmed.starts_with("browser")
            {
                continue;
            }
            let malformed = |reason: &str| KnownSitesError::Malformed {
                line: idx + 1,
                reason: reason.to_string(),
            };
            let mut fields = trimmed.split('\t');
            let contig = fields.next().ok_or_else(|| malformed("missing contig"))?;
            let start: u32 = fields
                .next()
                .ok_or_else(|| malformed("missing start"))?
                .trim()
                .parse()
                .map_err(|_| malformed("start is not a number"))?;
            let end: u32 = fields
                .next()
                .ok_or_else(|| malformed("missing end"))?
                .trim()
                .parse()
                .map_err(|_| malformed("end is not a number"))?;
            if end < start {
                return Err(malformed("end before start"));
            }
            intervals.push((contig.to_string(), start, end));
        }
        Ok(Self::from_intervals(intervals))
    }

    /// Read a BED file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, KnownSitesError> {
        let file = File::open(path)?;
        Self::from_bed(BufReader::new(file))
    }

    /// Whether `position` on `contig` is a known site.
    pub fn contains(&self, contig: &str, position: u32) -> bool {
        let Some(spans) = self.intervals.get(contig) else {
            return false;
        };
        let idx = spans.partition_point(|&(start, _)| start <= position);
        idx > 0 && position < spans[idx - 1].1
    }

    /// Number of merged intervals.
    pub fn len(&self) -> usize {
        self.intervals.values().map(Vec::len).sum()
    }

    /// Whether no site is known.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}
