//! # Comparators
//!
//! String similarity functions used by the scorer. Every comparator returns a
//! similarity in `[0, 1]`; inputs a comparator cannot interpret surface as
//! [`Error::Capability`](crate::error::Error::Capability) so the caller can
//! skip the pair instead of guessing.

use crate::error::{Error, Result};
use std::fmt;

pub trait Comparator: Send + Sync + fmt::Debug {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64>;

    /// Tokenized comparators split values on whitespace before comparing.
    fn is_tokenized(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// 1.0 for identical strings, 0.0 otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exact;

impl Comparator for Exact {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64> {
        Ok(if v1 == v2 { 1.0 } else { 0.0 })
    }

    fn name(&self) -> &str {
        "exact"
    }
}

/// Inverse of [`Exact`]: used for properties whose equality is evidence
/// against a match.
#[derive(Debug, Clone, Copy, Default)]
pub struct Different;

impl Comparator for Different {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64> {
        Ok(if v1 == v2 { 0.0 } else { 1.0 })
    }

    fn name(&self) -> &str {
        "different"
    }
}

/// Edit distance normalized by the shorter string:
/// `1 - min(distance, shortest) / shortest`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Levenshtein;

impl Levenshtein {
    pub fn distance(s1: &str, s2: &str) -> usize {
        let a: Vec<char> = s1.chars().collect();
        let b: Vec<char> = s2.chars().collect();
        if a.is_empty() {
            return b.len();
        }
        if b.is_empty() {
            return a.len();
        }

        let mut prev: Vec<usize> = (0..=b.len()).collect();
        let mut row = vec![0usize; b.len() + 1];
        for (i, ca) in a.iter().enumerate() {
            row[0] = i + 1;
            for (j, cb) in b.iter().enumerate() {
                let cost = usize::from(ca != cb);
                row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
            }
            std::mem::swap(&mut prev, &mut row);
        }
        prev[b.len()]
    }
}

impl Comparator for Levenshtein {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64> {
        if v1 == v2 {
            return Ok(1.0);
        }
        let shortest = v1.chars().count().min(v2.chars().count());
        if shortest == 0 {
            return Ok(0.0);
        }
        let dist = Self::distance(v1, v2).min(shortest);
        Ok(1.0 - dist as f64 / shortest as f64)
    }

    fn is_tokenized(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "levenshtein"
    }
}

/// Jaro similarity with the Winkler common-prefix boost.
#[derive(Debug, Clone, Copy)]
pub struct JaroWinkler {
    pub prefix_scale: f64,
}

impl Default for JaroWinkler {
    fn default() -> Self {
        Self { prefix_scale: 0.1 }
    }
}

impl JaroWinkler {
    const MAX_PREFIX: usize = 4;

    pub fn jaro(s1: &str, s2: &str) -> f64 {
        let a: Vec<char> = s1.chars().collect();
        let b: Vec<char> = s2.chars().collect();
        if a == b {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let window = (a.len().max(b.len()) / 2).saturating_sub(1);
        let mut a_matched = vec![false; a.len()];
        let mut b_matched = vec![false; b.len()];
        let mut matches = 0usize;
        for (i, ca) in a.iter().enumerate() {
            let start = i.saturating_sub(window);
            let end = (i + window + 1).min(b.len());
            for j in start..end {
                if !b_matched[j] && b[j] == *ca {
                    a_matched[i] = true;
                    b_matched[j] = true;
                    matches += 1;
                    break;
                }
            }
        }
        if matches == 0 {
            return 0.0;
        }

        let a_seq = a.iter().zip(&a_matched).filter(|(_, m)| **m).map(|(c, _)| c);
        let b_seq = b.iter().zip(&b_matched).filter(|(_, m)| **m).map(|(c, _)| c);
        let transpositions = a_seq.zip(b_seq).filter(|(x, y)| x != y).count() / 2;

        let m = matches as f64;
        (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64) / m) / 3.0
    }
}

impl Comparator for JaroWinkler {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64> {
        let jaro = Self::jaro(v1, v2);
        let prefix = v1
            .chars()
            .zip(v2.chars())
            .take(Self::MAX_PREFIX)
            .take_while(|(a, b)| a == b)
            .count();
        Ok((jaro + prefix as f64 * self.prefix_scale * (1.0 - jaro)).min(1.0))
    }

    fn name(&self) -> &str {
        "jaro-winkler"
    }
}

/// Ratio of the smaller to the larger number. Ratios under `min_ratio` score
/// zero. Values that do not parse as numbers are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Numeric {
    pub min_ratio: f64,
}

impl Numeric {
    pub fn with_min_ratio(min_ratio: f64) -> Self {
        Self { min_ratio }
    }

    fn parse(&self, value: &str) -> Result<f64> {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| Error::capability(self.name(), format!("'{value}' is not a number")))
    }
}

impl Comparator for Numeric {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64> {
        let mut d1 = self.parse(v1)?;
        let mut d2 = self.parse(v2)?;
        if d1 == d2 {
            return Ok(1.0);
        }
        if d1 < 0.0 && d2 < 0.0 {
            d1 = -d1;
            d2 = -d2;
        }
        if d2 < d1 {
            std::mem::swap(&mut d1, &mut d2);
        }
        if d2 == 0.0 || d1 < 0.0 {
            return Ok(0.0);
        }
        let ratio = d1 / d2;
        Ok(if ratio < self.min_ratio { 0.0 } else { ratio })
    }

    fn name(&self) -> &str {
        "numeric"
    }
}

/// Shared token matching for the set-overlap comparators: for every token of
/// the shorter side, the best sub-comparator score against the longer side.
fn best_token_scores(
    sub: &dyn Comparator,
    v1: &str,
    v2: &str,
) -> Result<(Vec<f64>, usize, usize)> {
    let mut t1: Vec<&str> = v1.split_whitespace().collect();
    let mut t2: Vec<&str> = v2.split_whitespace().collect();
    if t1.len() > t2.len() {
        std::mem::swap(&mut t1, &mut t2);
    }
    let mut best = Vec::with_capacity(t1.len());
    for token in &t1 {
        let mut highest = 0.0f64;
        for other in &t2 {
            highest = highest.max(sub.compare(token, other)?);
        }
        best.push(highest);
    }
    Ok((best, t1.len(), t2.len()))
}

/// Dice coefficient over whitespace tokens: `2|A∩B| / (|A| + |B|)`, where
/// token overlap is graded by a sub-comparator.
#[derive(Debug)]
pub struct DiceCoefficient {
    sub: Box<dyn Comparator>,
}

impl DiceCoefficient {
    pub fn new() -> Self {
        Self::with_sub_comparator(Box::new(Exact))
    }

    pub fn with_sub_comparator(sub: Box<dyn Comparator>) -> Self {
        Self { sub }
    }
}

impl Default for DiceCoefficient {
    fn default() -> Self {
        Self::new()
    }
}

impl Comparator for DiceCoefficient {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64> {
        if v1 == v2 {
            return Ok(1.0);
        }
        let (best, n1, n2) = best_token_scores(self.sub.as_ref(), v1, v2)?;
        if n1 + n2 == 0 {
            return Ok(0.0);
        }
        Ok(best.iter().sum::<f64>() * 2.0 / (n1 + n2) as f64)
    }

    fn is_tokenized(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "dice"
    }
}

/// Jaccard index over whitespace tokens: `|A∩B| / |A∪B|`, with graded overlap.
#[derive(Debug)]
pub struct JaccardIndex {
    sub: Box<dyn Comparator>,
}

impl JaccardIndex {
    pub fn new() -> Self {
        Self::with_sub_comparator(Box::new(Exact))
    }

    pub fn with_sub_comparator(sub: Box<dyn Comparator>) -> Self {
        Self { sub }
    }
}

impl Default for JaccardIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Comparator for JaccardIndex {
    fn compare(&self, v1: &str, v2: &str) -> Result<f64> {
        if v1 == v2 {
            return Ok(1.0);
        }
        let (best, n1, n2) = best_token_scores(self.sub.as_ref(), v1, v2)?;
        let intersection: f64 = best.iter().sum();
        let union = (n1 + n2) as f64 - intersection;
        if union <= 0.0 {
            return Ok(0.0);
        }
        Ok(intersection / union)
    }

    fn is_tokenized(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "jaccard"
    }
}
