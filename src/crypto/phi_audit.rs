// Static scan of every source file for tracing calls that interpolate
// clinical free text. Identifiers, digests and counts may be logged; note
// bodies, summaries, diagnoses and prescriptions may not.

use std::fs;
use std::path::Path;

/// Names that only ever hold decrypted or model-generated clinical text.
const PHI_PATTERNS: &[&str] = &[
    "note_text",
    "note_body",
    "summary_text",
    "diagnosis_text",
    "prescription_text",
    "response_text",
    "osce_note",
    "analysis.text",
    "opened.as_str",
    "%plaintext",
    "?plaintext",
    "{plaintext",
    "%prompt",
    "?prompt",
    "{prompt",
    "%stored_value",
    "?stored_value",
];

const ALLOWLIST: &[&str] = &["phi_audit.rs"];

type Violation = (String, usize, String, &'static str);

#[test]
fn no_clinical_text_in_tracing_calls() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    assert!(src_dir.exists(), "Source directory not found: {}", src_dir.display());

    let mut violations = Vec::new();
    scan_directory(&src_dir, &src_dir, &mut violations);

    if !violations.is_empty() {
        let report = violations
            .iter()
            .map(|(file, line_num, call, pattern)| {
                format!("  {file}:{line_num}: found '{pattern}' in: {call}")
            })
            .collect::<Vec<_>>()
            .join("\n");
        panic!(
            "PHI audit failed: {} tracing call(s) reference clinical text:\n{report}\n\n\
             Log digests or record ids instead.",
            violations.len()
        );
    }
}

#[test]
fn scanner_flags_interpolated_note() {
    let mut violations = Vec::new();
    scan_source(
        "synthetic.rs",
        "tracing::info!(body = %note_text, \"loaded note\");",
        &mut violations,
    );
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].3, "note_text");
}

#[test]
fn scanner_follows_multi_line_calls() {
    let source = "tracing::debug!(\n    model = %model,\n    text = %summary_text,\n    \"summarized\"\n);\nlet x = 1;";
    let mut violations = Vec::new();
    scan_source("synthetic.rs", source, &mut violations);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].1, 1);
}

#[test]
fn scanner_passes_digest_logging() {
    let mut violations = Vec::new();
    scan_source(
        "synthetic.rs",
        "tracing::info!(digest = %sealed.digest, model = %model, \"diagnosis stored\");",
        &mut violations,
    );
    assert!(violations.is_empty());
}

fn scan_directory(root: &Path, dir: &Path, violations: &mut Vec<Violation>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_directory(root, &path, violations);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            let filename = path.file_name().unwrap_or_default().to_string_lossy();
            if ALLOWLIST.iter().any(|a| filename.contains(a)) {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(&path).display().to_string();
            scan_source(&relative, &content, violations);
        }
    }
}

fn is_tracing_start(line: &str) -> bool {
    ["info!", "warn!", "error!", "debug!", "trace!"]
        .iter()
        .any(|m| line.starts_with(&format!("tracing::{m}")))
}

fn paren_depth(text: &str) -> i32 {
    text.chars().fold(0, |depth, ch| match ch {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}

fn scan_source(file: &str, content: &str, violations: &mut Vec<Violation>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if !is_tracing_start(trimmed) {
            i += 1;
            continue;
        }

        let mut call = String::from(trimmed);
        let mut depth = paren_depth(trimmed);
        let mut j = i + 1;
        while depth > 0 && j < lines.len() {
            let next = lines[j].trim();
            call.push(' ');
            call.push_str(next);
            depth += paren_depth(next);
            j += 1;
        }

        for pattern in PHI_PATTERNS {
            if call.contains(pattern) {
                violations.push((file.to_string(), i + 1, call.clone(), pattern));
            }
        }
        i = j;
    }
}
