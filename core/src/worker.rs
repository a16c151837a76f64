//! File Worker (SPEC_FULL §4.E): the three-pass collect/translate/emit
//! pipeline for a single file. Grounded on the teacher's `jobs.rs`
//! segment-collection and cancellation-aware batch-wait shapes, restructured
//! into genuine `BATCH_SIZE`-chunked batches and per-file isolation; atomic
//! emission grounded on `backup.rs`'s `backup_and_swap`.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backup::backup_and_swap;
use crate::chain::ProviderChain;
use crate::transform::{self, LineMatch, PlaceholderMap, QuoteKind};

/// One translatable line pulled out during the collect pass.
struct PendingEntry {
    slot: usize,
    protected_text: String,
    placeholder_map: PlaceholderMap,
    prefix: String,
    suffix: String,
    quote_kind: QuoteKind,
}

#[derive(Debug, Default, Clone)]
pub struct FileWorkerOutcome {
    pub total_strings: usize,
    pub translated_strings: usize,
    pub skipped_resume: bool,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

/// Resume policy (SPEC_FULL §4.E(i), §9): an existing output with at least
/// as many lines as the input is treated as done; fewer lines means the
/// work was interrupted and is restarted from scratch.
fn should_skip_for_resume(input_line_count: usize, output_path: &Path) -> bool {
    let Ok(existing) = fs::read_to_string(output_path) else {
        return false;
    };
    existing.lines().count() >= input_line_count
}

/// Translate exactly one input file to one output file.
///
/// `on_batch` is invoked once per processed batch with the number of
/// translatable strings just resolved, so the Job Runner can update its
/// per-job counters and publish a progress event.
pub async fn translate_file(
    input_path: &Path,
    output_path: &Path,
    chain: &ProviderChain,
    batch_size: usize,
    inter_call_delay: Duration,
    cancel: &Arc<AtomicBool>,
    mut on_batch: impl FnMut(usize),
) -> FileWorkerOutcome {
    let content = match fs::read_to_string(input_path) {
        Ok(content) => content,
        Err(err) => {
            return FileWorkerOutcome {
                errors: vec![format!("failed to read {}: {err}", input_path.display())],
                ..Default::default()
            };
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let had_trailing_newline = content.ends_with('\n');

    if output_path.exists() && should_skip_for_resume(lines.len(), output_path) {
        return FileWorkerOutcome {
            total_strings: 0,
            translated_strings: 0,
            skipped_resume: true,
            cancelled: false,
            errors: Vec::new(),
        };
    }

    // Pass 1: collect. Every slot is either filled verbatim (opaque lines)
    // or reserved for a translatable entry.
    let mut slots: Vec<Option<String>> = vec![None; lines.len()];
    let mut pending = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        match transform::classify(line) {
            Some(LineMatch {
                raw_literal,
                quote_kind,
                prefix,
                suffix,
            }) => {
                let natural = transform::prepare(&raw_literal, quote_kind);
                let (protected_text, placeholder_map) = transform::protect(&natural);
                pending.push(PendingEntry {
                    slot: index,
                    protected_text,
                    placeholder_map,
                    prefix,
                    suffix,
                    quote_kind,
                });
            }
            None => {
                slots[index] = Some(format!("{line}\n"));
            }
        }
    }

    let total_strings = pending.len();
    let mut translated_strings = 0usize;
    let mut errors = Vec::new();

    // Pass 2: translate, BATCH_SIZE chunks at a time.
    for chunk in pending.chunks(batch_size.max(1)) {
        if cancel.load(Ordering::Relaxed) {
            return FileWorkerOutcome {
                total_strings,
                translated_strings,
                skipped_resume: false,
                cancelled: true,
                errors,
            };
        }

        let texts: Vec<String> = chunk.iter().map(|entry| entry.protected_text.clone()).collect();
        let translations = chain.translate_batch(&texts).await;

        for (entry, translated) in chunk.iter().zip(translations) {
            match transform::reinject(
                &translated,
                &entry.placeholder_map,
                &entry.prefix,
                &entry.suffix,
                entry.quote_kind,
            ) {
                Ok(line) => {
                    slots[entry.slot] = Some(line);
                    translated_strings += 1;
                }
                Err(err) => {
                    errors.push(format!(
                        "{}: line {}: {err}",
                        input_path.display(),
                        entry.slot + 1
                    ));
                }
            }
        }

        on_batch(chunk.len());
        tokio::time::sleep(inter_call_delay).await;
    }

    // Any entry that failed to reinject reverts to its original literal.
    for (index, line) in lines.iter().enumerate() {
        if slots[index].is_none() {
            slots[index] = Some(format!("{line}\n"));
        }
    }

    // Pass 3: emit. Only reached once translation is fully done, so a
    // cancel mid-batch never leaves a truncated file on disk.
    let mut buffer = String::with_capacity(content.len());
    for slot in slots.into_iter().flatten() {
        buffer.push_str(&slot);
    }
    if !had_trailing_newline && buffer.ends_with('\n') {
        buffer.pop();
    }

    if let Err(err) = backup_and_swap(output_path, buffer.as_bytes()) {
        errors.push(format!("failed to write {}: {err}", output_path.display()));
    }

    FileWorkerOutcome {
        total_strings,
        translated_strings,
        skipped_resume: false,
        cancelled: false,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NullCacheStore, TwoLevelCache};
    use crate::providers::{Provider, ProviderStatsSnapshot, ProviderStatus};
    use tempfile::tempdir;

    struct UppercaseProvider;

    #[async_trait::async_trait]
    impl Provider for UppercaseProvider {
        fn name(&self) -> &'static str {
            "uppercase"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn status(&self) -> ProviderStatus {
            ProviderStatus::Available
        }
        fn precheck_rate(&self) -> bool {
            true
        }
        async fn translate(&self, text: &str) -> Option<String> {
            Some(text.to_uppercase())
        }
        fn stats_snapshot(&self) -> ProviderStatsSnapshot {
            ProviderStatsSnapshot::default()
        }
    }

    fn test_chain() -> ProviderChain {
        let cache = Arc::new(TwoLevelCache::new(Box::new(NullCacheStore), 10));
        ProviderChain::new(vec![Box::new(UppercaseProvider)], cache)
    }

    #[tokio::test]
    async fn translates_single_literal_and_preserves_other_lines() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("lang.php");
        let output = dir.path().join("out.php");
        fs::write(&input, "<?php\n$msg_arr['ok'] = 'save changes';\n?>\n").unwrap();

        let chain = test_chain();
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = translate_file(
            &input,
            &output,
            &chain,
            100,
            Duration::from_millis(0),
            &cancel,
            |_| {},
        )
        .await;

        assert_eq!(outcome.total_strings, 1);
        assert_eq!(outcome.translated_strings, 1);
        let result = fs::read_to_string(&output).unwrap();
        assert_eq!(
            result,
            "<?php\n$msg_arr['ok'] = 'SAVE CHANGES';\n?>\n"
        );
    }

    #[tokio::test]
    async fn resume_skips_file_with_complete_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("lang.php");
        let output = dir.path().join("out.php");
        let content = "<?php\n$msg_arr['a'] = 'hi';\n?>\n";
        fs::write(&input, content).unwrap();
        fs::write(&output, content).unwrap();

        let chain = test_chain();
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = translate_file(
            &input,
            &output,
            &chain,
            100,
            Duration::from_millis(0),
            &cancel,
            |_| {},
        )
        .await;

        assert!(outcome.skipped_resume);
        assert_eq!(outcome.translated_strings, 0);
    }

    #[tokio::test]
    async fn restarts_file_with_short_partial_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("lang.php");
        let output = dir.path().join("out.php");
        fs::write(&input, "<?php\n$msg_arr['a'] = 'hi';\n$msg_arr['b'] = 'bye';\n?>\n").unwrap();
        fs::write(&output, "<?php\n").unwrap();

        let chain = test_chain();
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = translate_file(
            &input,
            &output,
            &chain,
            100,
            Duration::from_millis(0),
            &cancel,
            |_| {},
        )
        .await;

        assert!(!outcome.skipped_resume);
        assert_eq!(outcome.translated_strings, 2);
    }

    #[tokio::test]
    async fn cancellation_mid_batch_leaves_no_output_file() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("lang.php");
        let output = dir.path().join("out.php");
        let mut content = String::from("<?php\n");
        for i in 0..5 {
            content.push_str(&format!("$msg_arr['k{i}'] = 'text {i}';\n"));
        }
        fs::write(&input, &content).unwrap();

        let chain = test_chain();
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = translate_file(
            &input,
            &output,
            &chain,
            2,
            Duration::from_millis(0),
            &cancel,
            |_| {},
        )
        .await;

        assert!(outcome.cancelled);
        assert!(!output.exists());
    }
}
