//! Change records for review and commit messages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One learned selector applied within a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub primary: String,
    pub fallback: String,
    /// Literals rewritten in the file
    pub occurrences: usize,
}

/// Replacements made in a single spec file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub file: PathBuf,
    pub replacements: Vec<Replacement>,
}

impl ChangeRecord {
    pub fn occurrences(&self) -> usize {
        self.replacements.iter().map(|r| r.occurrences).sum()
    }
}

/// Every file the rewriter modified, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub records: Vec<ChangeRecord>,
}

impl ChangeSet {
    pub fn push(&mut self, record: ChangeRecord) {
        if !record.replacements.is_empty() {
            self.records.push(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.records.len()
    }

    /// Distinct (file, primary) replacements
    pub fn replacement_count(&self) -> usize {
        self.records.iter().map(|r| r.replacements.len()).sum()
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.records.iter().map(|r| &r.file)
    }

    /// `file: primary → fallback` for every replacement
    pub fn lines(&self) -> Vec<String> {
        self.records
            .iter()
            .flat_map(|record| {
                record.replacements.iter().map(move |r| {
                    let suffix = if r.occurrences > 1 {
                        format!(" ({} occurrences)", r.occurrences)
                    } else {
                        String::new()
                    };
                    format!(
                        "{}: {} → {}{}",
                        record.file.display(),
                        r.primary,
                        r.fallback,
                        suffix
                    )
                })
            })
            .collect()
    }

    pub fn commit_subject(&self) -> String {
        format!(
            "test(e2e): heal {} selector(s) in {} file(s)",
            self.replacement_count(),
            self.file_count()
        )
    }

    pub fn commit_body(&self) -> String {
        let mut body = String::from(
            "Replace stale primary selectors with fallbacks that resolved during E2E runs.\n\n",
        );
        for line in self.lines() {
            body.push_str("- ");
            body.push_str(&line);
            body.push('\n');
        }
        body
    }

    pub fn commit_message(&self) -> String {
        format!("{}\n\n{}", self.commit_subject(), self.commit_body())
    }
}
