//! Name-based classification of pipeline jobs.
//!
//! Job names follow the pipeline's naming conventions (`align-de-webcrawl`,
//! `reduce-tmx-fr`, `warc2text-archive`). The rules below are tried in order
//! and the first match wins. A name that matches nothing is simply
//! unclassified; classification never fails.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

// ============================================================================
// Static Regexes
// ============================================================================

static PATTERN_LANGUAGE_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(shard|merge-shard|clean-shard|dedupe|split|translate|tokenise|align|fix|score|clean|)-([a-z]{2})-([a-z]+[a-z0-9\-]*)$").unwrap()
});

static PATTERN_REDUCE_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(reduce-tmx|reduce-tmx-deferred|reduce-classified|reduce-filtered)-([a-z]{2})$")
        .unwrap()
});

static PATTERN_COLLECTION_STEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(warc2text|pdf2warc)-([a-z]+[a-z0-9\-]*)$").unwrap());

/// Derived, purely cosmetic fields of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub step: Option<String>,
    pub language: Option<String>,
    pub collection: Option<String>,
}

impl Classification {
    pub fn is_classified(&self) -> bool {
        self.step.is_some() || self.language.is_some() || self.collection.is_some()
    }
}

/// A naming rule: the pattern and how to read its captures.
struct PatternDef {
    #[allow(dead_code)]
    name: &'static str,
    pattern: &'static Lazy<Regex>,
    extract: fn(&Captures) -> Classification,
}

fn group(captures: &Captures, idx: usize) -> Option<String> {
    captures.get(idx).map(|m| m.as_str().to_string())
}

static RULES: [PatternDef; 3] = [
    PatternDef {
        name: "language_step",
        pattern: &PATTERN_LANGUAGE_STEP,
        extract: |c| Classification {
            step: group(c, 1),
            language: group(c, 2),
            collection: group(c, 3),
        },
    },
    PatternDef {
        name: "reduce_step",
        pattern: &PATTERN_REDUCE_STEP,
        extract: |c| Classification {
            step: group(c, 1),
            language: group(c, 2),
            collection: None,
        },
    },
    PatternDef {
        name: "collection_step",
        pattern: &PATTERN_COLLECTION_STEP,
        extract: |c| Classification {
            step: group(c, 1),
            language: None,
            collection: group(c, 2),
        },
    },
];

/// Classify a raw job name.
pub fn classify(name: &str) -> Classification {
    for rule in RULES.iter() {
        if let Some(captures) = rule.pattern.captures(name) {
            return (rule.extract)(&captures);
        }
    }
    Classification::default()
}
