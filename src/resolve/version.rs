//! Kernel version tokens and release ordering.

use std::cmp::Ordering;

/// One run of a release string: digits or everything else
#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Num(u64),
    Text(String),
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Chunk::Num(a), Chunk::Num(b)) => a.cmp(b),
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            // 6.12.3 sorts after 6.12-rc7
            (Chunk::Num(_), Chunk::Text(_)) => Ordering::Greater,
            (Chunk::Text(_), Chunk::Num(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Natural-order sort key for a release name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionKey(Vec<Chunk>);

impl VersionKey {
    pub fn new(release: &str) -> Self {
        let mut chunks = Vec::new();
        let mut digits = String::new();
        let mut text = String::new();

        for c in release.chars() {
            if matches!(c, '.' | '-' | '_' | '+') {
                flush(&mut chunks, &mut digits, &mut text);
            } else if c.is_ascii_digit() {
                if !text.is_empty() {
                    chunks.push(Chunk::Text(std::mem::take(&mut text)));
                }
                digits.push(c);
            } else {
                if !digits.is_empty() {
                    chunks.push(number(&std::mem::take(&mut digits)));
                }
                text.push(c);
            }
        }
        flush(&mut chunks, &mut digits, &mut text);
        VersionKey(chunks)
    }
}

fn flush(chunks: &mut Vec<Chunk>, digits: &mut String, text: &mut String) {
    if !digits.is_empty() {
        chunks.push(number(&std::mem::take(digits)));
    }
    if !text.is_empty() {
        chunks.push(Chunk::Text(std::mem::take(text)));
    }
}

fn number(digits: &str) -> Chunk {
    // Runs too long for u64 still need a total order
    digits
        .parse()
        .map(Chunk::Num)
        .unwrap_or_else(|_| Chunk::Text(digits.to_string()))
}

/// How a requested kernel is named
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionToken {
    /// The running kernel
    Host,
    /// Version prefix such as `v6.12`
    Symbolic(Vec<u64>),
    /// Exact release name
    Literal(String),
}

impl VersionToken {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if token == "host" {
            return VersionToken::Host;
        }

        let digits = token.strip_prefix('v').unwrap_or(token);
        let components: Option<Vec<u64>> = digits
            .split('.')
            .map(|part| {
                if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
                    part.parse().ok()
                } else {
                    None
                }
            })
            .collect();

        match components {
            Some(components) if !components.is_empty() => VersionToken::Symbolic(components),
            _ => VersionToken::Literal(token.to_string()),
        }
    }
}

/// Text of a release before its first `-`
pub fn version_portion(release: &str) -> &str {
    release.split('-').next().unwrap_or(release)
}

/// Whether `prefix` equals the leading components of the release's version
/// portion (`6.12` matches `6.12.3-x`, not `6.1.2` or `6.120`)
pub fn matches_prefix(prefix: &[u64], release: &str) -> bool {
    let components: Vec<&str> = version_portion(release).split('.').collect();
    if components.len() < prefix.len() {
        return false;
    }
    prefix
        .iter()
        .zip(components)
        .all(|(want, have)| have.parse::<u64>().map_or(false, |have| have == *want))
}
