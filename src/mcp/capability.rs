// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Capability Map
//!
//! Maps backend ids to the method names and glob patterns they declare.
//! Built once at startup and read-only afterwards.

use regex::Regex;
use std::collections::BTreeSet;

use crate::config::BackendConfig;

/// Translate a capability glob into an anchored regex.
///
/// `*` matches any run of characters (including `/`), `?` matches exactly
/// one character, everything else is literal. Both wildcards match
/// newlines.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?s)^");
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '*' | '?' => {
                source.push_str(&regex::escape(&literal));
                literal.clear();
                source.push_str(if ch == '*' { ".*" } else { "." });
            }
            _ => literal.push(ch),
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    Regex::new(&source)
}

#[derive(Debug, Clone)]
struct Capability {
    name: String,
    matcher: Regex,
}

#[derive(Debug, Clone)]
struct Entry {
    backend_id: String,
    capabilities: Vec<Capability>,
}

/// Backend id → declared capabilities, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct CapabilityMap {
    entries: Vec<Entry>,
}

impl CapabilityMap {
    /// Build the map from `(backend id, capabilities)` pairs.
    pub fn new<I, S>(backends: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let mut entries = Vec::new();
        for (backend_id, names) in backends {
            let capabilities = names
                .into_iter()
                .map(|name| {
                    Ok(Capability {
                        matcher: glob_to_regex(&name)?,
                        name,
                    })
                })
                .collect::<Result<Vec<_>, regex::Error>>()?;
            entries.push(Entry {
                backend_id: backend_id.into(),
                capabilities,
            });
        }
        Ok(Self { entries })
    }

    pub fn from_backends(backends: &[BackendConfig]) -> Result<Self, regex::Error> {
        Self::new(
            backends
                .iter()
                .map(|b| (b.id.clone(), b.capabilities.clone())),
        )
    }

    /// Resolve a method to the backend that serves it.
    ///
    /// An exact match on any backend wins over every pattern match. Patterns
    /// are then tried backend by backend in configuration order.
    pub fn resolve(&self, method: &str) -> Option<&str> {
        let exact = self
            .entries
            .iter()
            .find(|e| e.capabilities.iter().any(|c| c.name == method));
        if let Some(entry) = exact {
            return Some(&entry.backend_id);
        }

        self.entries
            .iter()
            .find(|e| e.capabilities.iter().any(|c| c.matcher.is_match(method)))
            .map(|e| e.backend_id.as_str())
    }

    /// Sorted, deduplicated union of every declared capability.
    pub fn all_capabilities(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|e| e.capabilities.iter().map(|c| c.name.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
