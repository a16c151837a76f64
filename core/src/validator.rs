//! Cross-tree validator (SPEC_FULL §6): compares an output tree against its
//! source tree line-by-line and reports the structured counters/issue
//! taxonomy the job runner attaches to a completed job.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::transform;

const MAX_ISSUES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingFile,
    LineCount,
    KeyChanged,
    Untranslated,
    Placeholder,
    Escape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationCounters {
    pub success: usize,
    pub untranslated: usize,
    pub missing_placeholders: usize,
    pub escape_issues: usize,
    pub line_mismatch: usize,
    pub missing_files: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub counters: ValidationCounters,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn push_issue(&mut self, issue: ValidationIssue) {
        if self.issues.len() < MAX_ISSUES {
            self.issues.push(issue);
        }
    }
}

/// Compare every `.php` file under `source_dir` against its counterpart
/// under `output_dir`. `relative_files` is the job's enumerated file list
/// (relative paths), so the validator doesn't need to re-walk the tree.
pub fn validate_tree(
    source_dir: &Path,
    output_dir: &Path,
    relative_files: &[PathBuf],
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for relative in relative_files {
        let source_path = source_dir.join(relative);
        let output_path = output_dir.join(relative);
        let path_label = relative.display().to_string();

        let Ok(source_content) = fs::read_to_string(&source_path) else {
            continue;
        };

        let Ok(output_content) = fs::read_to_string(&output_path) else {
            report.counters.missing_files += 1;
            report.push_issue(ValidationIssue {
                kind: IssueKind::MissingFile,
                path: path_label,
                line: None,
                detail: "output file not found".to_string(),
            });
            continue;
        };

        let source_lines: Vec<&str> = source_content.lines().collect();
        let output_lines: Vec<&str> = output_content.lines().collect();

        if source_lines.len() != output_lines.len() {
            report.counters.line_mismatch += 1;
            report.push_issue(ValidationIssue {
                kind: IssueKind::LineCount,
                path: path_label.clone(),
                line: None,
                detail: format!(
                    "source has {} lines, output has {}",
                    source_lines.len(),
                    output_lines.len()
                ),
            });
            continue;
        }

        for (index, (source_line, output_line)) in
            source_lines.iter().zip(output_lines.iter()).enumerate()
        {
            validate_line(&mut report, &path_label, index + 1, source_line, output_line);
        }
    }

    report
}

fn validate_line(
    report: &mut ValidationReport,
    path_label: &str,
    line_number: usize,
    source_line: &str,
    output_line: &str,
) {
    let Some(source_match) = transform::classify(source_line) else {
        // Opaque line: must round-trip byte-for-byte.
        return;
    };

    let Some(output_match) = transform::classify(output_line) else {
        report.counters.escape_issues += 1;
        report.push_issue(ValidationIssue {
            kind: IssueKind::Escape,
            path: path_label.to_string(),
            line: Some(line_number),
            detail: "output line no longer parses as a translatable assignment".to_string(),
        });
        return;
    };

    // Exact-match prefix comparison, intentionally not whitespace-normalized
    // (SPEC_FULL §9 open question: do not "fix" this).
    if source_match.prefix != output_match.prefix {
        report.push_issue(ValidationIssue {
            kind: IssueKind::KeyChanged,
            path: path_label.to_string(),
            line: Some(line_number),
            detail: format!(
                "prefix changed: {:?} -> {:?}",
                source_match.prefix, output_match.prefix
            ),
        });
        return;
    }

    let source_natural = transform::prepare(&source_match.raw_literal, source_match.quote_kind);
    let output_natural = transform::prepare(&output_match.raw_literal, output_match.quote_kind);

    if placeholder_set(&source_natural) != placeholder_set(&output_natural) {
        report.counters.missing_placeholders += 1;
        report.push_issue(ValidationIssue {
            kind: IssueKind::Placeholder,
            path: path_label.to_string(),
            line: Some(line_number),
            detail: "placeholder set changed between source and output".to_string(),
        });
        return;
    }

    if source_natural.trim().to_lowercase() == output_natural.trim().to_lowercase()
        && has_letters(&source_natural)
    {
        report.counters.untranslated += 1;
        report.push_issue(ValidationIssue {
            kind: IssueKind::Untranslated,
            path: path_label.to_string(),
            line: Some(line_number),
            detail: "output literal identical to source".to_string(),
        });
        return;
    }

    report.counters.success += 1;
}

fn placeholder_set(text: &str) -> BTreeSet<String> {
    let (_, map) = transform::protect(text);
    map.values().map(|v| v.to_string()).collect()
}

fn has_letters(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        PathBuf::from(relative)
    }

    #[test]
    fn reports_missing_output_file() {
        let source_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let relative = write(source_dir.path(), "lang.php", "<?php\n");

        let report = validate_tree(source_dir.path(), output_dir.path(), &[relative]);
        assert_eq!(report.counters.missing_files, 1);
        assert_eq!(report.issues[0].kind, IssueKind::MissingFile);
    }

    #[test]
    fn reports_line_count_mismatch() {
        let source_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let relative = write(source_dir.path(), "lang.php", "<?php\nline2\n");
        write(output_dir.path(), "lang.php", "<?php\n");

        let report = validate_tree(source_dir.path(), output_dir.path(), &[relative]);
        assert_eq!(report.counters.line_mismatch, 1);
    }

    #[test]
    fn reports_untranslated_literal() {
        let source_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let content = "$msg_arr['ok'] = 'Save changes';\n";
        let relative = write(source_dir.path(), "lang.php", content);
        write(output_dir.path(), "lang.php", content);

        let report = validate_tree(source_dir.path(), output_dir.path(), &[relative]);
        assert_eq!(report.counters.untranslated, 1);
    }

    #[test]
    fn reports_placeholder_drift() {
        let source_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let relative = write(
            source_dir.path(),
            "lang.php",
            "$msg_arr['m'] = \"Hi {user}\";\n",
        );
        write(
            output_dir.path(),
            "lang.php",
            "$msg_arr['m'] = \"Oi usuario\";\n",
        );

        let report = validate_tree(source_dir.path(), output_dir.path(), &[relative]);
        assert_eq!(report.counters.missing_placeholders, 1);
    }

    #[test]
    fn counts_success_for_a_well_formed_translation() {
        let source_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let relative = write(
            source_dir.path(),
            "lang.php",
            "$msg_arr['ok'] = 'Save changes';\n",
        );
        write(
            output_dir.path(),
            "lang.php",
            "$msg_arr['ok'] = 'Salvar alterações';\n",
        );

        let report = validate_tree(source_dir.path(), output_dir.path(), &[relative]);
        assert_eq!(report.counters.success, 1);
        assert!(report.issues.is_empty());
    }
}
