//! Exclusion rules: simple globs and a compiled `.gitignore` subset.

use regex::Regex;
use std::fs;
use std::path::Path;

/// Noise excluded no matter which base rule set is active.
pub const ALWAYS_EXCLUDE: &[&str] = &[
    ".git/", ".hg/", ".svn/", "*.exe", "*.dll", "*.so", "*.dylib", "*.o", "*.a", "*.obj",
    "*.class", "*.pyc", "*.pyo", "*.wasm", "*.zip", "*.tar", "*.gz", "*.tgz", "*.bz2", "*.xz",
    "*.7z", "*.rar", "*.jar", "*.png", "*.jpg", "*.jpeg", "*.gif", "*.bmp", "*.ico", "*.webp",
    "*.tiff", "*.mp3", "*.mp4", "*.mov", "*.avi", "*.mkv", "*.wav", "*.flac", "*.ogg", "*.pdf",
    "*.woff", "*.woff2", "*.ttf", "*.otf", ".DS_Store", "Thumbs.db", "desktop.ini", "*.swp",
    "*.swo", "*~",
];

/// Broad defaults used only when the root has no `.gitignore`.
pub const FALLBACK_EXCLUDE: &[&str] = &[
    "node_modules/", "bower_components/", "target/", "build/", "dist/", "out/", "vendor/",
    "__pycache__/", ".venv/", "venv/", ".tox/", ".mypy_cache/", ".pytest_cache/", ".ruff_cache/",
    ".eggs/", ".gradle/", ".m2/", ".idea/", ".vscode/", ".vs/", ".next/", ".nuxt/", ".svelte-kit/",
    ".parcel-cache/", ".cache/", "coverage/", ".nyc_output/", ".terraform/", ".dart_tool/",
    ".stack-work/", "_build/", "deps/", "bin/", "obj/", "*.log", "package-lock.json",
    "yarn.lock", "pnpm-lock.yaml",
];

/// Matches `path` (forward-slash, relative) against one simple glob:
/// `*.ext` is a suffix match, `name/` or `name/*` a directory segment match,
/// anything else basename equality.
pub fn matches_simple_glob(path: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    let dir = pattern
        .strip_suffix("/*")
        .or_else(|| pattern.strip_suffix('/'));
    if let Some(dir) = dir {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return false;
        }
        return format!("/{}", path).contains(&format!("/{}/", dir));
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        return !suffix.is_empty() && path.ends_with(suffix);
    }

    basename(path) == pattern
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Default)]
pub struct GitignoreRules {
    rules: Vec<Regex>,
    negations: usize,
    malformed: usize,
}

impl GitignoreRules {
    pub fn parse(content: &str) -> Self {
        let mut parsed = Self::default();
        for line in content.lines() {
            let line = line.trim_end();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('!') {
                parsed.negations += 1;
                continue;
            }
            match compile_line(line) {
                Some(regex) => parsed.rules.push(regex),
                None => {
                    tracing::debug!(line, "skipping malformed gitignore line");
                    parsed.malformed += 1;
                }
            }
        }
        parsed
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| rule.is_match(path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn negations(&self) -> usize {
        self.negations
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

fn compile_line(line: &str) -> Option<Regex> {
    let mut pattern = line.strip_prefix('\\').unwrap_or(line);

    let dir_only = pattern.ends_with('/');
    pattern = pattern.trim_end_matches('/');
    if pattern.is_empty() {
        return None;
    }

    let leading_slash = pattern.starts_with('/');
    pattern = pattern.trim_start_matches('/');
    if pattern.is_empty() {
        return None;
    }
    // git anchors any pattern with a separator before its last character
    let anchored = leading_slash || pattern.contains('/');

    let mut out = String::from(if anchored { "^" } else { "^(?:.*/)?" });
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                if at_segment_start && chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let (class, next) = translate_class(&chars, i)?;
                out.push_str(&class);
                i = next;
                continue;
            }
            '\\' => {
                let escaped = chars.get(i + 1)?;
                out.push_str(&regex::escape(&escaped.to_string()));
                i += 2;
                continue;
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    out.push_str(if dir_only { "/.*$" } else { "(?:/.*)?$" });
    Regex::new(&out).ok()
}

/// Copies a `[...]` class starting at `start`; `None` when unterminated.
fn translate_class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let mut class = String::from("[");
    if matches!(chars.get(i), Some('!') | Some('^')) {
        class.push('^');
        i += 1;
    }
    // a `]` right after the opening bracket is literal
    if chars.get(i) == Some(&']') {
        class.push_str("\\]");
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            ']' => {
                class.push(']');
                return Some((class, i + 1));
            }
            '\\' | '[' => {
                class.push('\\');
                class.push(chars[i]);
            }
            c => class.push(c),
        }
        i += 1;
    }
    None
}

#[derive(Debug)]
pub enum ExcludeBase {
    Gitignore(GitignoreRules),
    Fallback,
}

#[derive(Debug)]
pub struct ExcludeRuleSet {
    base: ExcludeBase,
    extra: Vec<String>,
}

impl ExcludeRuleSet {
    pub fn new(base: ExcludeBase, extra: Vec<String>) -> Self {
        let extra = extra
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { base, extra }
    }

    /// Uses `<root>/.gitignore` when it exists and is readable, otherwise the
    /// fallback list.
    pub fn for_root(root: &Path, extra: Vec<String>) -> Self {
        let gitignore = root.join(".gitignore");
        let base = if gitignore.is_file() {
            match fs::read(&gitignore) {
                Ok(bytes) => {
                    ExcludeBase::Gitignore(GitignoreRules::parse(&String::from_utf8_lossy(&bytes)))
                }
                Err(err) => {
                    tracing::warn!(path = %gitignore.display(), error = %err, "cannot read .gitignore, using fallback rules");
                    ExcludeBase::Fallback
                }
            }
        } else {
            ExcludeBase::Fallback
        };
        Self::new(base, extra)
    }

    pub fn uses_gitignore(&self) -> bool {
        matches!(self.base, ExcludeBase::Gitignore(_))
    }

    pub fn negations(&self) -> usize {
        match &self.base {
            ExcludeBase::Gitignore(rules) => rules.negations(),
            ExcludeBase::Fallback => 0,
        }
    }

    pub fn malformed(&self) -> usize {
        match &self.base {
            ExcludeBase::Gitignore(rules) => rules.malformed(),
            ExcludeBase::Fallback => 0,
        }
    }

    pub fn strategy(&self) -> String {
        let extra = if self.extra.is_empty() {
            String::new()
        } else {
            format!(" + {} custom", self.extra.len())
        };
        match &self.base {
            ExcludeBase::Gitignore(rules) => {
                format!(".gitignore ({} rules) + always-on{}", rules.len(), extra)
            }
            ExcludeBase::Fallback => format!("default excludes + always-on{}", extra),
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        if ALWAYS_EXCLUDE.iter().any(|p| matches_simple_glob(path, p)) {
            return true;
        }
        let base = match &self.base {
            ExcludeBase::Gitignore(rules) => rules.is_match(path),
            ExcludeBase::Fallback => FALLBACK_EXCLUDE.iter().any(|p| matches_simple_glob(path, p)),
        };
        base || self.extra.iter().any(|p| matches_simple_glob(path, p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn simple_glob_forms() {
        assert!(matches_simple_glob("a/b/report.log", "*.log"));
        assert!(!matches_simple_glob("a/b/report.txt", "*.log"));
        assert!(matches_simple_glob("node_modules/x.js", "node_modules/"));
        assert!(matches_simple_glob("web/node_modules/pkg/x.js", "node_modules/*"));
        assert!(!matches_simple_glob("my_node_modules/x.js", "node_modules/"));
        assert!(!matches_simple_glob("node_modules", "node_modules/"));
        assert!(matches_simple_glob("docs/Makefile", "Makefile"));
        assert!(!matches_simple_glob("docs/Makefile.am", "Makefile"));
    }

    fn rules(content: &str) -> GitignoreRules {
        GitignoreRules::parse(content)
    }

    #[test]
    fn unanchored_name_matches_at_any_depth() {
        let r = rules("*.tmp\nlogs\n");
        assert!(r.is_match("a.tmp"));
        assert!(r.is_match("deep/dir/a.tmp"));
        assert!(r.is_match("logs/today.txt"));
        assert!(r.is_match("srv/logs/today.txt"));
        assert!(!r.is_match("catalogs/x.txt"));
    }

    #[test]
    fn leading_slash_and_middle_slash_anchor_to_root() {
        let r = rules("/config.local\ndocs/generated\n");
        assert!(r.is_match("config.local"));
        assert!(!r.is_match("sub/config.local"));
        assert!(r.is_match("docs/generated/index.html"));
        assert!(!r.is_match("site/docs/generated/index.html"));
    }

    #[test]
    fn trailing_slash_is_directory_only() {
        let r = rules("build/\n");
        assert!(r.is_match("build/out.txt"));
        assert!(r.is_match("crates/x/build/out.txt"));
        assert!(!r.is_match("build"));
        assert!(!r.is_match("rebuild/out.txt"));
    }

    #[test]
    fn double_star_forms() {
        let r = rules("**/cache\nassets/**\na/**/z.txt\n");
        assert!(r.is_match("cache/x"));
        assert!(r.is_match("p/q/cache/x"));
        assert!(r.is_match("assets/img/logo.svg"));
        assert!(!r.is_match("assets"));
        assert!(r.is_match("a/z.txt"));
        assert!(r.is_match("a/b/c/z.txt"));
        assert!(!r.is_match("b/a/z.txt"));
    }

    #[test]
    fn wildcards_do_not_cross_separators() {
        let r = rules("src/*.gen\nfile?.txt\n");
        assert!(r.is_match("src/a.gen"));
        assert!(!r.is_match("src/nested/a.gen"));
        assert!(r.is_match("file1.txt"));
        assert!(!r.is_match("file10.txt"));
    }

    #[test]
    fn character_classes_pass_through() {
        let r = rules("*.py[co]\nlog[!s].txt\n");
        assert!(r.is_match("m.pyc"));
        assert!(r.is_match("m.pyo"));
        assert!(!r.is_match("m.py"));
        assert!(r.is_match("log1.txt"));
        assert!(!r.is_match("logs.txt"));
    }

    #[test]
    fn negation_lines_are_counted_and_ignored() {
        let r = rules("*.log\n!keep.log\n# comment\n\n");
        assert_eq!(r.negations(), 1);
        assert_eq!(r.len(), 1);
        assert!(r.is_match("keep.log"));
    }

    #[test]
    fn malformed_line_is_skipped_without_aborting() {
        let r = rules("bad[abc\n*.bak\n");
        assert_eq!(r.malformed(), 1);
        assert!(r.is_match("x.bak"));
        assert!(!r.is_match("bad[abc"));
    }

    #[test]
    fn gitignore_replaces_fallback_but_not_always_on() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();
        let set = ExcludeRuleSet::for_root(dir.path(), vec![]);

        assert!(set.uses_gitignore());
        assert!(set.is_excluded("build/out.txt"));
        assert!(set.is_excluded(".git/config"));
        assert!(set.is_excluded("img/logo.png"));
        // fallback-only entry is not active under gitignore
        assert!(!set.is_excluded("node_modules/x.js"));
    }

    #[test]
    fn fallback_applies_without_gitignore() {
        let dir = TempDir::new().unwrap();
        let set = ExcludeRuleSet::for_root(dir.path(), vec!["*.md".to_string(), " ".to_string()]);

        assert!(!set.uses_gitignore());
        assert!(set.is_excluded("node_modules/x.js"));
        assert!(set.is_excluded("target/debug/app"));
        assert!(set.is_excluded("README.md"));
        assert!(!set.is_excluded("app/main.c"));
        assert_eq!(set.strategy(), "default excludes + always-on + 1 custom");
    }
}
