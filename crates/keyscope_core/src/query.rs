//! Fuzzy key search over the key index cache.
//!
//! A glob pattern is compiled once into an anchored, case-insensitive regex
//! and evaluated against the lower-cased keys of one database snapshot. The
//! snapshot is split into one chunk per available CPU and the chunks are
//! matched on the blocking pool.

use crate::config::{EngineConfig, GlobSyntax};
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexEntry, KeyIndex, KeyIndexCache};
use crate::DatabaseId;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

/// Entries below this count are matched in a single chunk.
const MIN_CHUNK_LEN: usize = 256;

/// The pattern that selects a whole database.
pub const MATCH_ALL: &str = "*";

/// Returns `*` for an empty or blank pattern, otherwise `pattern` unchanged.
pub fn normalize(pattern: &str) -> &str {
    if pattern.trim().is_empty() {
        MATCH_ALL
    } else {
        pattern
    }
}

/// Returns true if `pattern` selects every key of a database.
pub fn is_match_all(pattern: &str) -> bool {
    normalize(pattern).trim() == MATCH_ALL
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
    case_sensitive: bool,
}

impl GlobPattern {
    /// Compiles `pattern` under `syntax`. An empty or blank pattern matches
    /// every key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPattern`] if the translated pattern does
    /// not compile. Only [`GlobSyntax::Legacy`] can produce one.
    pub fn compile(pattern: &str, syntax: GlobSyntax) -> CoreResult<Self> {
        Self::compile_with(pattern, syntax, false)
    }

    /// Like [`compile`](Self::compile), but matches keys exactly as stored
    /// when `case_sensitive` is set.
    pub fn compile_with(
        pattern: &str,
        syntax: GlobSyntax,
        case_sensitive: bool,
    ) -> CoreResult<Self> {
        let source = normalize(pattern);
        let body = translate(source, syntax, case_sensitive);

        let regex = RegexBuilder::new(&format!("^(?:{body})$"))
            .case_insensitive(!case_sensitive)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| CoreError::invalid_pattern(source, e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            regex,
            case_sensitive,
        })
    }

    /// Returns the pattern as given, or `*` for a blank one.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if this pattern tells case apart.
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Returns true if `key` matches. Case-insensitive patterns expect the
    /// lower-cased key.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

fn translate(pattern: &str, syntax: GlobSyntax, case_sensitive: bool) -> String {
    match syntax {
        GlobSyntax::Literal if case_sensitive => pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*"),
        GlobSyntax::Literal => pattern
            .to_lowercase()
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*"),
        GlobSyntax::Legacy => pattern.replace('.', r"\.").replace('*', ".*"),
    }
}

/// Returns every original-case key of `db` matching `pattern`, sorted.
///
/// Keys are compared by their lower-cased form unless
/// `config.case_sensitive` is set.
///
/// Waits for the database's index if it is still loading, bounded by
/// `config.ready_timeout`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidPattern`] before waiting if the pattern does
/// not compile, and [`CoreError::NotReady`] if the wait times out.
pub async fn search(
    cache: &KeyIndexCache,
    db: DatabaseId,
    pattern: &str,
    config: &EngineConfig,
) -> CoreResult<Vec<String>> {
    let glob = GlobPattern::compile_with(pattern, config.glob_syntax, config.case_sensitive)?;
    let index = cache.wait_ready(db, config.ready_timeout).await?;
    let matched = match_index(index, glob).await?;
    debug!(db, pattern, matched = matched.len(), "query.searched");
    Ok(matched)
}

/// Matches `glob` against every entry of `index` and flattens the variants.
pub async fn match_index(index: Arc<KeyIndex>, glob: GlobPattern) -> CoreResult<Vec<String>> {
    let len = index.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let chunk_len = len.div_ceil(workers).max(MIN_CHUNK_LEN);
    let glob = Arc::new(glob);

    let mut tasks = JoinSet::new();
    for start in (0..len).step_by(chunk_len) {
        let end = (start + chunk_len).min(len);
        let index = Arc::clone(&index);
        let glob = Arc::clone(&glob);
        tasks.spawn_blocking(move || match_entries(&index.entries()[start..end], &glob));
    }

    let mut matched = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        matched.extend(joined?);
    }
    matched.sort_unstable();
    Ok(matched)
}

fn match_entries(entries: &[IndexEntry], glob: &GlobPattern) -> Vec<String> {
    let mut matched = Vec::new();
    for entry in entries {
        if glob.is_case_sensitive() {
            matched.extend(entry.variants.iter().filter(|key| glob.matches(key)).cloned());
        } else if glob.matches(&entry.lower) {
            matched.extend(entry.variants.iter().cloned());
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn literal(pattern: &str) -> GlobPattern {
        GlobPattern::compile(pattern, GlobSyntax::Literal).unwrap()
    }

    fn index(keys: &[&str]) -> Arc<KeyIndex> {
        Arc::new(KeyIndex::from_keys(keys.iter().map(|k| k.to_string())))
    }

    #[test]
    fn glob_star_matches_any_run() {
        let glob = literal("user:*");
        assert!(glob.matches("user:"));
        assert!(glob.matches("user:1"));
        assert!(glob.matches("user:1:profile"));
        assert!(!glob.matches("admin:user:1"));
    }

    #[test]
    fn blank_patterns_select_everything() {
        assert!(is_match_all(""));
        assert!(is_match_all("  "));
        assert!(is_match_all(" * "));
        assert!(!is_match_all("a*"));
        assert!(!is_match_all("**"));
        assert_eq!(literal(" ").as_str(), "*");
        assert!(literal("").matches("anything"));
    }

    #[test]
    fn glob_is_anchored() {
        let glob = literal("foo");
        assert!(glob.matches("foo"));
        assert!(!glob.matches("foobar"));
        assert!(!glob.matches("xfoo"));
    }

    #[test]
    fn glob_is_case_insensitive() {
        let glob = literal("FOO*");
        assert!(glob.matches("foo"));
        assert!(glob.matches("foobar"));
    }

    #[test]
    fn glob_empty_pattern_matches_everything() {
        let glob = literal("");
        assert_eq!(glob.as_str(), "*");
        assert!(glob.matches(""));
        assert!(glob.matches("anything"));
    }

    #[test]
    fn glob_dot_is_literal() {
        let glob = literal("a.b");
        assert!(glob.matches("a.b"));
        assert!(!glob.matches("axb"));

        let glob = GlobPattern::compile("a.b", GlobSyntax::Legacy).unwrap();
        assert!(!glob.matches("axb"));
    }

    #[test]
    fn glob_literal_escapes_metacharacters() {
        let glob = literal("cache[1]+(x)?");
        assert!(glob.matches("cache[1]+(x)?"));
        assert!(!glob.matches("cache1x"));
    }

    #[test]
    fn glob_legacy_keeps_regex_meaning() {
        let glob = GlobPattern::compile("user:[0-9]", GlobSyntax::Legacy).unwrap();
        assert!(glob.matches("user:7"));
        assert!(!glob.matches("user:[0-9]"));
    }

    #[test]
    fn glob_legacy_rejects_broken_regex() {
        let result = GlobPattern::compile("user:[", GlobSyntax::Legacy);
        assert!(matches!(result, Err(CoreError::InvalidPattern { .. })));

        assert!(GlobPattern::compile("user:[", GlobSyntax::Literal).is_ok());
    }

    #[tokio::test]
    async fn match_returns_all_case_variants() {
        let index = index(&["User:1", "user:2", "USER:3", "session:1"]);
        let matched = match_index(index, literal("user:*")).await.unwrap();
        assert_eq!(matched, vec!["USER:3", "User:1", "user:2"]);
    }

    #[tokio::test]
    async fn match_flattens_variants_once() {
        let index = index(&["FOO", "foo", "bar"]);
        let matched = match_index(index, literal("foo")).await.unwrap();
        assert_eq!(matched, vec!["FOO", "foo"]);
    }

    #[test]
    fn glob_case_sensitive_tells_case_apart() {
        let glob = GlobPattern::compile_with("User:*", GlobSyntax::Literal, true).unwrap();
        assert!(glob.is_case_sensitive());
        assert!(glob.matches("User:1"));
        assert!(!glob.matches("user:1"));

        let glob = GlobPattern::compile_with("U.[0-9]", GlobSyntax::Legacy, true).unwrap();
        assert!(glob.matches("U.7"));
        assert!(!glob.matches("u.7"));
    }

    #[tokio::test]
    async fn match_case_sensitive_keeps_exact_variants() {
        let index = index(&["User:1", "user:2", "USER:3", "User:4"]);
        let glob = GlobPattern::compile_with("User:*", GlobSyntax::Literal, true).unwrap();
        let matched = match_index(index, glob).await.unwrap();
        assert_eq!(matched, vec!["User:1", "User:4"]);
    }

    #[tokio::test]
    async fn match_empty_index() {
        let matched = match_index(Arc::new(KeyIndex::new()), literal("*"))
            .await
            .unwrap();
        assert!(matched.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn match_large_index_spans_chunks() {
        let keys: Vec<String> = (0..10_000).map(|i| format!("Key:{i:05}")).collect();
        let index = Arc::new(KeyIndex::from_keys(keys.clone()));

        let mut expected = keys;
        expected.sort();
        let matched = match_index(index, literal("key:*")).await.unwrap();
        assert_eq!(matched, expected);
    }

    #[tokio::test]
    async fn search_times_out_when_not_loaded() {
        let cache = KeyIndexCache::new();
        let config = EngineConfig::new().with_ready_timeout(Duration::from_millis(10));

        let result = search(&cache, 0, "*", &config).await;
        assert!(matches!(result, Err(CoreError::NotReady { db: 0, .. })));
    }

    #[tokio::test]
    async fn search_rejects_pattern_before_waiting() {
        let cache = KeyIndexCache::new();
        let config = EngineConfig::new().with_glob_syntax(GlobSyntax::Legacy);

        let result = search(&cache, 0, "(", &config).await;
        assert!(matches!(result, Err(CoreError::InvalidPattern { .. })));
    }

    proptest! {
        #[test]
        fn glob_without_star_is_exact(key in "[a-zA-Z0-9:._\\[\\]()+?|^$-]{1,16}", other in "[a-z0-9:]{1,16}") {
            let glob = GlobPattern::compile(&key, GlobSyntax::Literal).unwrap();
            let lower = key.to_lowercase();
            prop_assert!(glob.matches(&lower));
            if other != lower {
                prop_assert!(!glob.matches(&other));
            }
        }

        #[test]
        fn glob_star_covers_removed_middle(key in "[a-zA-Z0-9:._]{2,24}", cut in 0usize..24, len in 0usize..24) {
            let chars: Vec<char> = key.chars().collect();
            let start = cut.min(chars.len());
            let end = (start + len).min(chars.len());
            let pattern: String = chars[..start]
                .iter()
                .chain(std::iter::once(&'*'))
                .chain(chars[end..].iter())
                .collect();

            let glob = GlobPattern::compile(&pattern, GlobSyntax::Literal).unwrap();
            prop_assert!(glob.matches(&key.to_lowercase()));
        }
    }
}
