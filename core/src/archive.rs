//! Packaging (SPEC_FULL §4.F "Package", §6 artifacts): builds the primary
//! `output.zip` and the secondary `voipnow.tar.gz` structural wrapper from
//! a completed output tree.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

const VERSION_SCAN_BYTES: usize = 8 * 1024;
const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Deterministic pre-order walk of `.php` files, relative paths only,
/// sorted per directory level: mirrors the job runner's own enumeration so
/// the packaged tree always matches what was actually translated. Anything
/// else under `root` (e.g. a `backup_and_swap` leftover `*.php.bak.<ts>`
/// from a resume-restart) is not part of the output tree per §6 and is
/// skipped.
fn walk_files(root: &Path) -> Vec<PathBuf> {
    fn inner(dir: &Path, base: &Path, out: &mut Vec<PathBuf>) {
        let Ok(read_dir) = fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = read_dir.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                inner(&path, base, out);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("php") {
                if let Ok(relative) = path.strip_prefix(base) {
                    out.push(relative.to_path_buf());
                }
            }
        }
    }
    let mut out = Vec::new();
    inner(root, root, &mut out);
    out
}

/// Primary artifact (SPEC_FULL §6): `output.zip`, a deflate-compressed
/// archive of the output tree with relative paths as entry names.
pub fn write_primary_archive(output_dir: &Path, zip_path: &Path) -> ArchiveResult<()> {
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(zip_path)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::<()>::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for relative in walk_files(output_dir) {
        let name = relative.to_string_lossy().replace('\\', "/");
        let mut contents = Vec::new();
        File::open(output_dir.join(&relative))?.read_to_end(&mut contents)?;
        writer.start_file(&name, options)?;
        writer.write_all(&contents)?;
    }

    writer.finish()?;
    Ok(())
}

static VERSION_ASSIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\$version\s*=\s*"(\d+\.\d+(?:\.\d+)?)""#).expect("valid regex"));
static VERSION_DOC_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@version\s+(\d+\.\d+(?:\.\d+)?)").expect("valid regex"));
static VERSION_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Version:\s*(\d+\.\d+(?:\.\d+)?)").expect("valid regex"));

/// Largest byte index `<= max` that lands on a UTF-8 character boundary of
/// `s`. Used to cap a scan window without slicing into a multibyte
/// character, which would panic.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut index = max;
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Scan the first 8 KiB of `content` for the first of `$version = "X.Y[.Z]"`,
/// `@version X.Y[.Z]`, or `Version: X.Y[.Z]`, in that priority order.
fn detect_version_in(content: &str) -> Option<String> {
    let end = floor_char_boundary(content, VERSION_SCAN_BYTES);
    let window = &content[..end];
    for pattern in [&*VERSION_ASSIGN, &*VERSION_DOC_TAG, &*VERSION_FIELD] {
        if let Some(caps) = pattern.captures(window) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Scan every source file in enumeration order for the first detected
/// version string; `1.0.0` if none found.
fn detect_version(source_dir: &Path, relative_files: &[PathBuf]) -> String {
    for relative in relative_files {
        if let Ok(content) = fs::read_to_string(source_dir.join(relative)) {
            if let Some(version) = detect_version_in(&content) {
                return version;
            }
        }
    }
    DEFAULT_VERSION.to_string()
}

fn build_meta(version: &str) -> String {
    format!(
        "ISO: pt_br\nLanguage: Portuguese\nCharset: UTF-8\nVersion: {version}\n"
    )
}

/// Secondary artifact (SPEC_FULL §6): `voipnow.tar.gz`, a gzipped tar with
/// `language/meta` plus `language/pt_br/<tree>` wrapping the output.
pub fn write_secondary_archive(
    source_dir: &Path,
    output_dir: &Path,
    tar_gz_path: &Path,
) -> ArchiveResult<()> {
    if let Some(parent) = tar_gz_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let relative_files = walk_files(output_dir);
    let version = detect_version(source_dir, &relative_files);
    let meta = build_meta(&version);

    let file = File::create(tar_gz_path)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut meta_header = tar::Header::new_gnu();
    meta_header.set_size(meta.len() as u64);
    meta_header.set_mode(0o644);
    meta_header.set_cksum();
    builder.append_data(&mut meta_header, "language/meta", meta.as_bytes())?;

    for relative in &relative_files {
        let entry_name = format!(
            "language/pt_br/{}",
            relative.to_string_lossy().replace('\\', "/")
        );
        let mut file = File::open(output_dir.join(relative))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(file.metadata()?.len());
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry_name, &mut file)?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tempfile::tempdir;

    #[test]
    fn detects_php_version_assignment() {
        let content = r#"<?php $version = "2.5.1"; ?>"#;
        assert_eq!(detect_version_in(content), Some("2.5.1".to_string()));
    }

    #[test]
    fn detects_doc_tag_version() {
        let content = "/** @version 3.1 */";
        assert_eq!(detect_version_in(content), Some("3.1".to_string()));
    }

    #[test]
    fn detects_version_field() {
        let content = "// Version: 4.0.2";
        assert_eq!(detect_version_in(content), Some("4.0.2".to_string()));
    }

    #[test]
    fn defaults_when_no_version_found() {
        assert_eq!(detect_version_in("<?php echo 'hi'; ?>"), None);
    }

    #[test]
    fn does_not_panic_when_a_multibyte_char_straddles_the_scan_window() {
        // Pad with ASCII up to one byte short of the window, then a
        // two-byte UTF-8 character, so the 8 KiB boundary lands inside it
        // rather than on a char boundary.
        let mut content = "x".repeat(VERSION_SCAN_BYTES - 1);
        content.push('\u{00e9}');
        content.push_str(" more text after the window");
        assert_eq!(detect_version_in(&content), None);
    }

    #[test]
    fn ignores_non_php_files_when_packaging() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("out");
        fs::create_dir_all(&output_dir).unwrap();
        fs::write(output_dir.join("a.php"), "<?php\n").unwrap();
        fs::write(output_dir.join("a.php.bak.20260101000000"), "<?php\nstale\n").unwrap();

        let files = walk_files(&output_dir);
        assert_eq!(files, vec![PathBuf::from("a.php")]);
    }

    #[test]
    fn writes_primary_zip_with_all_files() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("out");
        fs::create_dir_all(output_dir.join("sub")).unwrap();
        fs::write(output_dir.join("a.php"), "<?php\n").unwrap();
        fs::write(output_dir.join("sub/b.php"), "<?php\n").unwrap();

        let zip_path = dir.path().join("output.zip");
        write_primary_archive(&output_dir, &zip_path).unwrap();

        let file = File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 2);
        let mut entry = archive.by_name("a.php").unwrap();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "<?php\n");
    }

    #[test]
    fn writes_secondary_tarball_with_meta_and_tree() {
        let dir = tempdir().unwrap();
        let source_dir = dir.path().join("src");
        let output_dir = dir.path().join("out");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&output_dir).unwrap();
        fs::write(source_dir.join("a.php"), "<?php $version = \"1.2.3\";\n").unwrap();
        fs::write(output_dir.join("a.php"), "<?php\n$msg_arr['ok'] = 'Salvar';\n").unwrap();

        let tar_path = dir.path().join("voipnow.tar.gz");
        write_secondary_archive(&source_dir, &output_dir, &tar_path).unwrap();

        let file = File::open(&tar_path).unwrap();
        let decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        let mut seen_meta = false;
        let mut seen_tree_file = false;
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            if path == "language/meta" {
                seen_meta = true;
                let mut contents = String::new();
                entry.read_to_string(&mut contents).unwrap();
                assert!(contents.contains("Version: 1.2.3"));
                assert!(contents.contains("ISO: pt_br"));
            } else if path == "language/pt_br/a.php" {
                seen_tree_file = true;
            }
        }
        assert!(seen_meta);
        assert!(seen_tree_file);
    }
}
