//! Reverse-label trie for domain patterns.
//!
//! A pattern `example.com` is stored as the label path `com → example`;
//! a host matches when its reversed labels pass through a terminal node,
//! so `example.com` and `a.b.example.com` match but `notexample.com` and
//! `example.com.evil` do not.

use std::collections::HashMap;

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    /// List indices terminating at this label depth
    lists: Vec<usize>,
}

/// Suffix-by-label matcher over registered domain patterns.
#[derive(Debug, Default)]
pub struct DomainTrie {
    root: Node,
    len: usize,
}

impl DomainTrie {
    /// Register a domain pattern for a list. The pattern is expected to be
    /// a normalized hostname (lowercase, no trailing dot).
    pub fn insert(&mut self, domain: &str, list: usize) {
        let mut node = &mut self.root;
        for label in domain.split('.').rev().filter(|l| !l.is_empty()) {
            node = node.children.entry(label.to_owned()).or_default();
        }
        node.lists.push(list);
        self.len += 1;
    }

    /// Collect the lists of every registered pattern the host falls under.
    pub fn collect_matches(&self, host: &str, out: &mut Vec<usize>) {
        let mut node = &self.root;
        for label in host.split('.').rev().filter(|l| !l.is_empty()) {
            match node.children.get(label) {
                Some(child) => {
                    out.extend_from_slice(&child.lists);
                    node = child;
                }
                None => return,
            }
        }
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no patterns are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
