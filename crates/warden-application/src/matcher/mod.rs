//! Subject-to-list pattern resolution.
//!
//! One matcher is compiled per entry class (executable / URL). Lookup
//! dispatches on pattern kind: a case-folded hash map for exact patterns,
//! a compiled glob list for wildcards and a reverse-label trie for domain
//! patterns. The hot path never allocates beyond the result vector.

mod normalize;
mod trie;

use std::collections::HashMap;

use globset::{GlobBuilder, GlobMatcher};
use warden_domain::entities::{EntryId, EntryType, PatternType};
use warden_domain::value_objects::Subject;

pub use normalize::{NormalizedUrl, normalize_host, normalize_url};
pub use trie::DomainTrie;

/// One entry handed to [`PatternMatcher::compile`].
#[derive(Debug, Clone)]
pub struct PatternSpec {
    /// Originating entry, for audit records
    pub entry_id: EntryId,
    /// Index of the owning list in the rule set's list arena
    pub list: usize,
    /// Match semantics
    pub pattern_type: PatternType,
    /// Pattern text
    pub pattern: String,
}

/// An entry dropped during compilation, with the reason.
#[derive(Debug, Clone)]
pub struct RejectedPattern {
    /// The offending entry
    pub spec: PatternSpec,
    /// Why it was rejected
    pub reason: String,
}

/// Result of compiling an entry set.
#[derive(Debug)]
pub struct MatcherBuild {
    /// The usable matcher (malformed entries excluded)
    pub matcher: PatternMatcher,
    /// Entries dropped with an audit-worthy reason
    pub rejected: Vec<RejectedPattern>,
}

#[derive(Debug)]
struct WildcardPattern {
    matcher: GlobMatcher,
    list: usize,
    /// Patterns without a path separator match the short form only
    /// (basename for executables, host for URLs).
    short_form_only: bool,
}

/// Compiled pattern lookup for one entry class.
///
/// `match_subject` returns the indices of every matched list,
/// deduplicated, ascending. An empty matcher matches nothing.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    /// Case-folded short-form patterns (basename / host)
    exact_short: HashMap<String, Vec<usize>>,
    /// Case-folded long-form patterns (full path / host+path)
    exact_long: HashMap<String, Vec<usize>>,
    wildcards: Vec<WildcardPattern>,
    domains: DomainTrie,
    len: usize,
}

impl PatternMatcher {
    /// Compile an entry set for the given class. Malformed entries are
    /// dropped into `rejected` and compilation continues; the build never
    /// fails as a whole.
    #[must_use]
    pub fn compile(kind: EntryType, specs: Vec<PatternSpec>) -> MatcherBuild {
        let mut matcher = Self::default();
        let mut rejected = Vec::new();

        for spec in specs {
            match matcher.add(kind, &spec) {
                Ok(()) => matcher.len += 1,
                Err(reason) => rejected.push(RejectedPattern { spec, reason }),
            }
        }

        MatcherBuild { matcher, rejected }
    }

    fn add(&mut self, kind: EntryType, spec: &PatternSpec) -> Result<(), String> {
        if spec.pattern.trim().is_empty() {
            return Err("empty pattern".to_owned());
        }
        match spec.pattern_type {
            PatternType::Exact => {
                let (key, long_form) = Self::fold_pattern(kind, &spec.pattern);
                let map = if long_form {
                    &mut self.exact_long
                } else {
                    &mut self.exact_short
                };
                map.entry(key).or_default().push(spec.list);
                Ok(())
            }
            PatternType::Wildcard => {
                let (folded, long_form) = Self::fold_pattern(kind, &spec.pattern);
                let glob = GlobBuilder::new(&folded)
                    .case_insensitive(true)
                    .backslash_escape(true)
                    .build()
                    .map_err(|e| format!("invalid wildcard: {e}"))?;
                self.wildcards.push(WildcardPattern {
                    matcher: glob.compile_matcher(),
                    list: spec.list,
                    short_form_only: !long_form,
                });
                Ok(())
            }
            PatternType::Domain => {
                if kind != EntryType::Url {
                    return Err("domain patterns apply to url entries only".to_owned());
                }
                self.domains.insert(&normalize_host(&spec.pattern), spec.list);
                Ok(())
            }
        }
    }

    /// Normalize a pattern for its entry class and report whether it is a
    /// long-form (path-qualified) pattern.
    fn fold_pattern(kind: EntryType, pattern: &str) -> (String, bool) {
        match kind {
            EntryType::Executable => {
                let long_form = pattern.contains('/');
                (pattern.to_lowercase(), long_form)
            }
            EntryType::Url => {
                let normalized = normalize_url(pattern);
                let long_form = normalized.host_path != normalized.host;
                let key = if long_form {
                    normalized.host_path
                } else {
                    normalized.host
                };
                (key, long_form)
            }
        }
    }

    /// Resolve a subject to the lists whose entries match it.
    #[must_use]
    pub fn match_subject(&self, subject: &Subject) -> Vec<usize> {
        let mut out = Vec::new();
        match subject {
            Subject::Executable {
                basename,
                full_path,
            } => {
                let basename = basename.to_lowercase();
                let full_path = full_path.to_lowercase();
                self.collect(&basename, &full_path, &mut out);
            }
            Subject::Host { hostname, full_url } => {
                let host = normalize_host(hostname);
                let long = full_url
                    .as_deref()
                    .map_or_else(|| host.clone(), |u| normalize_url(u).host_path);
                self.collect(&host, &long, &mut out);
                self.domains.collect_matches(&host, &mut out);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect(&self, short: &str, long: &str, out: &mut Vec<usize>) {
        if let Some(lists) = self.exact_short.get(short) {
            out.extend_from_slice(lists);
        }
        if !long.is_empty()
            && let Some(lists) = self.exact_long.get(long)
        {
            out.extend_from_slice(lists);
        }
        for wc in &self.wildcards {
            let candidate = if wc.short_form_only { short } else { long };
            if !candidate.is_empty() && wc.matcher.is_match(candidate) {
                out.push(wc.list);
            }
        }
    }

    /// Number of compiled patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the matcher holds no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
