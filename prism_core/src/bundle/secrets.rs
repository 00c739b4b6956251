//! Secret detection: files that are never read, and content scrubbing for
//! the files that are.

use regex::{Captures, Regex};
use std::sync::OnceLock;

const SENSITIVE_FILENAMES: &[&str] = &[
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    ".netrc",
    "_netrc",
    ".pgpass",
    "credentials",
    "credentials.json",
    ".git-credentials",
    ".npmrc",
    ".pypirc",
    ".htpasswd",
    "secrets.json",
    "secrets.yml",
    "secrets.yaml",
    "service-account.json",
];

const SENSITIVE_EXTENSIONS: &[&str] = &[
    "pem", "key", "p12", "pfx", "jks", "keystore", "ppk", "kdbx", "gpg", "asc",
];

const SENSITIVE_DIRS: &[&str] = &[
    ".ssh", ".gnupg", ".aws", ".azure", ".gcloud", ".kube", ".docker",
];

/// True when the file must be blocked by name alone, before it is opened.
pub fn is_secret_file(path: &str) -> bool {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(name) = segments.pop() else {
        return false;
    };
    let lower = name.to_ascii_lowercase();

    if lower == ".env" || lower.starts_with(".env.") {
        return true;
    }
    if SENSITIVE_FILENAMES.contains(&lower.as_str()) {
        return true;
    }
    if let Some((_, ext)) = lower.rsplit_once('.') {
        if SENSITIVE_EXTENSIONS.contains(&ext) {
            return true;
        }
    }
    segments
        .iter()
        .any(|dir| SENSITIVE_DIRS.contains(&dir.to_ascii_lowercase().as_str()))
}

struct StructuralPattern {
    kind: &'static str,
    regex: Regex,
}

/// Ordered so that more specific prefixes win (`sk-ant-` before `sk-`).
fn structural_patterns() -> &'static [StructuralPattern] {
    static PATTERNS: OnceLock<Vec<StructuralPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                "private_key",
                r"(?s)-----BEGIN [A-Z0-9 ]*PRIVATE KEY-----.*?-----END [A-Z0-9 ]*PRIVATE KEY-----",
            ),
            ("anthropic", r"\bsk-ant-[A-Za-z0-9_-]{20,}"),
            ("openai", r"\bsk-(?:proj-)?[A-Za-z0-9_-]{20,}"),
            ("aws", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
            ("github", r"\b(?:gh[pousr]_[A-Za-z0-9]{36,}|github_pat_[A-Za-z0-9_]{22,})"),
            ("slack", r"\bxox[baprs]-[A-Za-z0-9-]{10,}"),
            ("google", r"\bAIza[0-9A-Za-z_-]{35}"),
            ("stripe", r"\b(?:sk|rk|pk)_(?:live|test)_[0-9A-Za-z]{16,}"),
            ("bearer", r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{16,}"),
        ]
        .into_iter()
        .map(|(kind, pattern)| StructuralPattern {
            kind,
            regex: Regex::new(pattern).unwrap(),
        })
        .collect()
    })
}

/// `KEY = value` or `KEY: value` where the key names a credential. The value
/// group skips anything already starting with `[` (a previous marker).
fn assignment_pattern() -> &'static Regex {
    static ASSIGNMENT_RE: OnceLock<Regex> = OnceLock::new();
    ASSIGNMENT_RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\b([A-Za-z0-9_.-]*(?:api[_-]?key|apikey|access[_-]?key|secret|passw(?:or)?d|pwd|token|credential|private[_-]?key|auth[_-]?key|client[_-]?secret|anthropic|openai|deepseek|gemini)[A-Za-z0-9_.-]*)(["']?\s*[:=]\s*)(["']?)([^\s"',;\[][^\s"',;]*)"#,
        )
        .unwrap()
    })
}

/// Replaces secret-shaped substrings and returns the scrubbed text with the
/// number of replacements made.
pub fn redact(content: &str) -> (String, usize) {
    let mut count = 0usize;
    let mut text = content.to_string();

    for pattern in structural_patterns() {
        let marker = format!("[REDACTED:{}]", pattern.kind);
        let replaced = pattern.regex.replace_all(&text, |_: &Captures| {
            count += 1;
            marker.clone()
        });
        text = replaced.into_owned();
    }

    let replaced = assignment_pattern().replace_all(&text, |caps: &Captures| {
        count += 1;
        format!("{}{}{}[REDACTED]", &caps[1], &caps[2], &caps[3])
    });

    (replaced.into_owned(), count)
}
