//! Prefix trie over symbol handles.
//!
//! Maps rule left-hand sides to rule indices. Children are kept in a
//! `BTreeMap` so every traversal visits keys in handle order.

use crate::arena::SymbolId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct Node {
    children: BTreeMap<SymbolId, usize>,
    rule: Option<usize>,
}

/// Arena-backed prefix trie.
#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<Node>,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    fn node_for(&mut self, key: &[SymbolId]) -> usize {
        let mut node = 0;
        for sym in key {
            node = match self.nodes[node].children.get(sym) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(*sym, child);
                    child
                }
            };
        }
        node
    }

    fn lookup(&self, key: &[SymbolId]) -> Option<usize> {
        let mut node = 0;
        for sym in key {
            node = *self.nodes[node].children.get(sym)?;
        }
        Some(node)
    }

    /// Inserts `key -> rule`. On a duplicate key the existing rule is kept
    /// and returned.
    pub fn insert(&mut self, key: &[SymbolId], rule: usize) -> Option<usize> {
        let node = self.node_for(key);
        match self.nodes[node].rule {
            Some(existing) => Some(existing),
            None => {
                self.nodes[node].rule = Some(rule);
                None
            }
        }
    }

    /// Points `key` at `rule`, returning the previous rule.
    pub fn replace(&mut self, key: &[SymbolId], rule: usize) -> Option<usize> {
        let node = self.node_for(key);
        self.nodes[node].rule.replace(rule)
    }

    /// Unmaps `key`. Nodes are left in place.
    pub fn remove(&mut self, key: &[SymbolId]) -> Option<usize> {
        let node = self.lookup(key)?;
        self.nodes[node].rule.take()
    }

    /// Rule whose key equals `key` exactly.
    pub fn get(&self, key: &[SymbolId]) -> Option<usize> {
        self.nodes[self.lookup(key)?].rule
    }

    /// The rule with the longest key that is a prefix of `term[start..]`.
    pub fn find_longest(&self, term: &[SymbolId], start: usize) -> Option<usize> {
        let mut node = 0;
        let mut found = None;
        for sym in &term[start..] {
            node = match self.nodes[node].children.get(sym) {
                Some(&child) => child,
                None => break,
            };
            if let Some(rule) = self.nodes[node].rule {
                found = Some(rule);
            }
        }
        found
    }

    /// Rules keyed by `key` followed by exactly one more symbol.
    pub fn extensions(&self, key: &[SymbolId]) -> Vec<(SymbolId, usize)> {
        let node = match self.lookup(key) {
            Some(node) => node,
            None => return Vec::new(),
        };
        self.nodes[node]
            .children
            .iter()
            .filter_map(|(sym, child)| self.nodes[*child].rule.map(|rule| (*sym, rule)))
            .collect()
    }

    /// Every rule whose key is a prefix of `term[start..]`, shortest first.
    pub fn find_all_prefixes(&self, term: &[SymbolId], start: usize) -> Vec<usize> {
        let mut node = 0;
        let mut found = Vec::new();
        for sym in &term[start..] {
            node = match self.nodes[node].children.get(sym) {
                Some(&child) => child,
                None => break,
            };
            if let Some(rule) = self.nodes[node].rule {
                found.push(rule);
            }
        }
        found
    }
}
