//! Rewriting spec sources with learned selectors
//!
//! A primary is only replaced where it is the entire payload of a quoted
//! literal (`'…'`, `"…"` or `` `…` ``). Sources are scanned left to right one
//! literal at a time, so a quote nested inside another literal, a substring
//! of a longer literal, and anything inside a comment are left alone.

use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::HealConfig;
use crate::error::{HealError, HealResult};
use crate::learning::is_valid_learning;
use crate::report::{ChangeRecord, ChangeSet, Replacement};

/// Openers of every token the scanner steps over as a unit
const TOKEN_PATTERN: &str = r#"//|/\*|['"`]"#;

/// Replace `primary` with `fallback` wherever it forms a whole quoted literal.
///
/// Pure; returns the new content and whether anything changed.
pub fn replace_quoted_literal(content: &str, primary: &str, fallback: &str) -> (String, bool) {
    if !is_valid_learning(primary, fallback) {
        return (content.to_string(), false);
    }
    let mut map = BTreeMap::new();
    map.insert(primary.to_string(), fallback.to_string());

    match LiteralRewriter::new(&map) {
        Ok(Some(rewriter)) => {
            let (rewritten, replacements) = rewriter.rewrite(content);
            (rewritten, !replacements.is_empty())
        }
        _ => (content.to_string(), false),
    }
}

/// Escape `fallback` so it stays a single literal inside `delimiter`
fn escape_for_delimiter(fallback: &str, delimiter: char) -> Cow<'_, str> {
    let needs_template_escape = delimiter == '`' && fallback.contains("${");
    if !fallback.contains(delimiter) && !needs_template_escape {
        return Cow::Borrowed(fallback);
    }
    let mut escaped = fallback.replace(delimiter, &format!("\\{delimiter}"));
    if needs_template_escape {
        escaped = escaped.replace("${", "\\${");
    }
    Cow::Owned(escaped)
}

/// Byte offset of the quote closing the literal opened at `open`.
///
/// Backslash escapes are honoured. Single and double quoted literals end at
/// a newline, in which case the opener was a stray quote and `None` is
/// returned; template literals may span lines.
fn literal_end(content: &str, open: usize, delimiter: char) -> Option<usize> {
    let body = open + delimiter.len_utf8();
    let mut chars = content[body..].char_indices();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' if delimiter != '`' => return None,
            c if c == delimiter => return Some(body + offset),
            _ => {}
        }
    }
    None
}

/// Applies a whole learnings map in a single pass.
///
/// Every literal is visited once, so a target that is itself some other
/// primary is never rewritten twice within one run. Feed it chain-collapsed
/// learnings to make a second run a no-op.
pub struct LiteralRewriter<'a> {
    tokens: Regex,
    learnings: &'a BTreeMap<String, String>,
}

impl<'a> LiteralRewriter<'a> {
    /// `None` when there is nothing to apply
    pub fn new(learnings: &'a BTreeMap<String, String>) -> HealResult<Option<Self>> {
        if !learnings.iter().any(|(p, f)| is_valid_learning(p, f)) {
            return Ok(None);
        }
        let tokens = Regex::new(TOKEN_PATTERN)?;
        Ok(Some(Self { tokens, learnings }))
    }

    fn lookup(&self, payload: &str) -> Option<(&'a str, &'a str)> {
        self.learnings
            .get_key_value(payload)
            .filter(|(primary, fallback)| is_valid_learning(primary, fallback))
            .map(|(primary, fallback)| (primary.as_str(), fallback.as_str()))
    }

    /// Rewrite `content`, returning the new text and what was replaced
    pub fn rewrite(&self, content: &str) -> (String, Vec<Replacement>) {
        let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
        let mut rewritten = String::with_capacity(content.len());
        let mut copied = 0;
        let mut pos = 0;

        while let Some(token) = self.tokens.find_at(content, pos) {
            let start = token.start();
            let delimiter = match token.as_str() {
                "//" => {
                    pos = content[start..]
                        .find('\n')
                        .map_or(content.len(), |n| start + n + 1);
                    continue;
                }
                "/*" => {
                    pos = content[start + 2..]
                        .find("*/")
                        .map_or(content.len(), |n| start + 2 + n + 2);
                    continue;
                }
                "'" => '\'',
                "\"" => '"',
                _ => '`',
            };

            let Some(end) = literal_end(content, start, delimiter) else {
                pos = start + 1;
                continue;
            };
            if let Some((primary, fallback)) = self.lookup(&content[start + 1..end]) {
                rewritten.push_str(&content[copied..=start]);
                rewritten.push_str(&escape_for_delimiter(fallback, delimiter));
                copied = end;
                *tally.entry(primary).or_default() += 1;
            }
            pos = end + 1;
        }
        rewritten.push_str(&content[copied..]);

        let replacements = tally
            .into_iter()
            .map(|(primary, occurrences)| Replacement {
                primary: primary.to_string(),
                fallback: self.learnings[primary].clone(),
                occurrences,
            })
            .collect();
        (rewritten, replacements)
    }
}

/// A rewrite computed but not yet written
#[derive(Debug, Clone)]
pub struct PlannedRewrite {
    pub path: PathBuf,
    pub content: String,
    pub record: ChangeRecord,
}

/// Walk `config.spec_dir` for spec files, skipping dependency and hidden
/// directories. An unreadable root is fatal.
pub fn discover_spec_files(config: &HealConfig) -> HealResult<Vec<PathBuf>> {
    let dir = &config.spec_dir;
    std::fs::read_dir(dir).map_err(|e| HealError::SpecDirUnreadable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let files = walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !e
                    .file_name()
                    .to_str()
                    .map(|name| name == "node_modules" || name.starts_with('.'))
                    .unwrap_or(false)
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|name| config.is_spec_file(name))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();

    Ok(files)
}

/// Compute rewrites for `files` without touching the disk.
///
/// Files that cannot be read as UTF-8 are skipped with a warning; files with
/// no matching literal produce no plan.
pub fn plan_rewrites(files: &[PathBuf], rewriter: &LiteralRewriter<'_>) -> Vec<PlannedRewrite> {
    let mut plans = Vec::new();
    for path in files {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let (rewritten, replacements) = rewriter.rewrite(&content);
        if replacements.is_empty() || rewritten == content {
            continue;
        }
        debug!(
            "{}: {} selector(s) to replace",
            path.display(),
            replacements.len()
        );
        plans.push(PlannedRewrite {
            path: path.clone(),
            content: rewritten,
            record: ChangeRecord {
                file: path.clone(),
                replacements,
            },
        });
    }
    plans
}

/// Write every planned rewrite in full and collect the change set
pub fn apply_rewrites(plans: &[PlannedRewrite]) -> HealResult<ChangeSet> {
    let mut changes = ChangeSet::default();
    for plan in plans {
        replace_file(&plan.path, &plan.content)?;
        info!("Rewrote {}", plan.path.display());
        changes.push(plan.record.clone());
    }
    Ok(changes)
}

/// Swap in new content through a sibling temp file, keeping permissions,
/// so an interrupted run leaves either the old file or the new one.
fn replace_file(path: &Path, content: &str) -> HealResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| HealError::Io(e.error))?;
    Ok(())
}

/// The change set a list of plans would produce
pub fn change_set(plans: &[PlannedRewrite]) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for plan in plans {
        changes.push(plan.record.clone());
    }
    changes
}

/// Spec files relative to `root` where possible, for display
pub fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use test_case::test_case;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(p, f)| (p.to_string(), f.to_string()))
            .collect()
    }

    fn rewrite_content(content: &str, learnings: &BTreeMap<String, String>) -> (String, Vec<Replacement>) {
        match LiteralRewriter::new(learnings).unwrap() {
            Some(rewriter) => rewriter.rewrite(content),
            None => (content.to_string(), Vec::new()),
        }
    }

    #[test_case(r#"const x = "foo";"#, r#"const x = "bar";"#, true ; "double quoted")]
    #[test_case("const x = 'foo';", "const x = 'bar';", true ; "single quoted")]
    #[test_case("const x = `foo`;", "const x = `bar`;", true ; "template literal")]
    #[test_case(r#"const x = "foobar";"#, r#"const x = "foobar";"#, false ; "longer literal")]
    #[test_case(r#"const x = "a foo";"#, r#"const x = "a foo";"#, false ; "literal suffix")]
    #[test_case("// uses foo as id", "// uses foo as id", false ; "comment")]
    #[test_case("const foo = 1;", "const foo = 1;", false ; "identifier")]
    #[test_case(r#"x("foo')"#, r#"x("foo')"#, false ; "mismatched quotes")]
    #[test_case(
        r#"page.locator("button:has-text('foo')")"#,
        r#"page.locator("button:has-text('foo')")"#,
        false ; "nested in another quote style"
    )]
    #[test_case(r#"page.locator("text='foo'")"#, r#"page.locator("text='foo'")"#, false ; "nested text engine")]
    #[test_case(r#"x("isn't", 'foo')"#, r#"x("isn't", 'bar')"#, true ; "other quote inside literal")]
    #[test_case(r"x('it\'s', 'foo')", r"x('it\'s', 'bar')", true ; "escaped delimiter")]
    #[test_case("click('foo') // was 'foo'", "click('bar') // was 'foo'", true ; "quoted in line comment")]
    #[test_case("/* 'foo' */ click(\"foo\")", "/* 'foo' */ click(\"bar\")", true ; "quoted in block comment")]
    #[test_case("// don't\nclick('foo')", "// don't\nclick('bar')", true ; "apostrophe in comment")]
    #[test_case("x('oops);\ny('foo')", "x('oops);\ny('bar')", true ; "unterminated literal")]
    fn test_literal_boundaries(input: &str, expected: &str, changed: bool) {
        let (output, did_change) = replace_quoted_literal(input, "foo", "bar");
        assert_eq!(output, expected);
        assert_eq!(did_change, changed);
    }

    #[test]
    fn test_selector_metacharacters_are_literal() {
        let source = "await page.click('#old-btn'); await page.click('#old-btnX');";
        let (output, changed) =
            replace_quoted_literal(source, "#old-btn", "[data-testid=submit]");
        assert!(changed);
        assert_eq!(
            output,
            "await page.click('[data-testid=submit]'); await page.click('#old-btnX');"
        );

        let (output, changed) = replace_quoted_literal("page.locator('a.b')", "a+b", "c");
        assert!(!changed);
        assert_eq!(output, "page.locator('a.b')");
    }

    #[test]
    fn test_noop_learning_never_rewrites() {
        let (output, changed) = replace_quoted_literal("'#a'", "#a", "#a");
        assert!(!changed);
        assert_eq!(output, "'#a'");
        let (_, changed) = replace_quoted_literal("''", "", "#a");
        assert!(!changed);
    }

    #[test]
    fn test_fallback_containing_delimiter_is_escaped() {
        let (output, _) = replace_quoted_literal("click('#go')", "#go", "[name='go']");
        assert_eq!(output, r"click('[name=\'go\']')");

        let (output, _) = replace_quoted_literal(r##"click("#go")"##, "#go", "[name='go']");
        assert_eq!(output, r#"click("[name='go']")"#);

        let (output, _) = replace_quoted_literal("click(`#go`)", "#go", "[data-x=${id}]");
        assert_eq!(output, r"click(`[data-x=\${id}]`)");
    }

    #[test]
    fn test_rewrite_counts_occurrences() {
        let learnings = map(&[("#a", "#x"), ("#b", "#y")]);
        let content = r##"click('#a'); fill("#a"); hover(`#b`); "#c""##;
        let (output, replacements) = rewrite_content(content, &learnings);
        assert_eq!(output, r##"click('#x'); fill("#x"); hover(`#y`); "#c""##);
        assert_eq!(
            replacements,
            vec![
                Replacement { primary: "#a".into(), fallback: "#x".into(), occurrences: 2 },
                Replacement { primary: "#b".into(), fallback: "#y".into(), occurrences: 1 },
            ]
        );
    }

    #[test]
    fn test_overlapping_primaries_pick_whole_literal() {
        let learnings = map(&[("btn", "#one"), ("btn-primary", "#two")]);
        let (output, _) = rewrite_content("q('btn'); q('btn-primary');", &learnings);
        assert_eq!(output, "q('#one'); q('#two');");
    }

    #[test]
    fn test_second_pass_is_noop() {
        let learnings = map(&[("#old-btn", "[data-testid=submit]"), (".nav", "nav")]);
        let content = "await page.click('#old-btn');\nawait page.click(\".nav\");\n";
        let (once, first) = rewrite_content(content, &learnings);
        assert!(!first.is_empty());
        let (twice, second) = rewrite_content(&once, &learnings);
        assert!(second.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_single_pass_does_not_chain() {
        // Uncollapsed chains are applied one hop per literal
        let learnings = map(&[("#a", "#b"), ("#b", "#c")]);
        let (output, _) = rewrite_content("x('#a'); y('#b');", &learnings);
        assert_eq!(output, "x('#b'); y('#c');");
    }

    #[test]
    fn test_discover_and_apply() {
        let tmp = TempDir::new().unwrap();
        let spec_dir = tmp.path().join("tests");
        fs::create_dir_all(spec_dir.join("flows")).unwrap();
        fs::create_dir_all(spec_dir.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(spec_dir.join(".cache")).unwrap();

        fs::write(spec_dir.join("flows/login.spec.ts"), "page.click('#old');\n").unwrap();
        fs::write(spec_dir.join("cart.test.js"), "page.click('#other');\n").unwrap();
        fs::write(spec_dir.join("helpers.ts"), "page.click('#old');\n").unwrap();
        fs::write(spec_dir.join("node_modules/pkg/x.spec.ts"), "'#old'").unwrap();
        fs::write(spec_dir.join(".cache/y.spec.ts"), "'#old'").unwrap();

        let config = HealConfig {
            spec_dir: spec_dir.clone(),
            ..Default::default()
        };
        let files = discover_spec_files(&config).unwrap();
        assert_eq!(
            files,
            vec![spec_dir.join("cart.test.js"), spec_dir.join("flows/login.spec.ts")]
        );

        let learnings = map(&[("#old", "[data-testid=new]")]);
        let rewriter = LiteralRewriter::new(&learnings).unwrap().unwrap();
        let plans = plan_rewrites(&files, &rewriter);
        assert_eq!(plans.len(), 1);

        // Planning alone writes nothing
        let untouched = fs::read_to_string(spec_dir.join("flows/login.spec.ts")).unwrap();
        assert_eq!(untouched, "page.click('#old');\n");

        let changes = apply_rewrites(&plans).unwrap();
        assert_eq!(changes, change_set(&plans));
        assert_eq!(changes.file_count(), 1);
        assert_eq!(
            fs::read_to_string(spec_dir.join("flows/login.spec.ts")).unwrap(),
            "page.click('[data-testid=new]');\n"
        );
        assert_eq!(
            fs::read_to_string(spec_dir.join("helpers.ts")).unwrap(),
            "page.click('#old');\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_keeps_permissions_and_leaves_no_temp_files() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let spec = tmp.path().join("a.spec.ts");
        fs::write(&spec, "q('#old');\n").unwrap();
        fs::set_permissions(&spec, fs::Permissions::from_mode(0o644)).unwrap();

        let learnings = map(&[("#old", "#new")]);
        let rewriter = LiteralRewriter::new(&learnings).unwrap().unwrap();
        let plans = plan_rewrites(&[spec.clone()], &rewriter);
        apply_rewrites(&plans).unwrap();

        assert_eq!(fs::read_to_string(&spec).unwrap(), "q('#new');\n");
        assert_eq!(fs::metadata(&spec).unwrap().permissions().mode() & 0o777, 0o644);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_apply_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let spec = tmp.path().join("gone.spec.ts");
        fs::write(&spec, "q('#old');").unwrap();

        let learnings = map(&[("#old", "#new")]);
        let rewriter = LiteralRewriter::new(&learnings).unwrap().unwrap();
        let plans = plan_rewrites(&[spec.clone()], &rewriter);
        fs::remove_file(&spec).unwrap();

        assert!(matches!(apply_rewrites(&plans), Err(HealError::Io(_))));
        assert!(!spec.exists());
    }

    #[test]
    fn test_missing_spec_dir_is_fatal() {
        let config = HealConfig {
            spec_dir: PathBuf::from("/definitely/not/here"),
            ..Default::default()
        };
        assert!(matches!(
            discover_spec_files(&config),
            Err(HealError::SpecDirUnreadable { .. })
        ));
    }

    #[test]
    fn test_display_path() {
        assert_eq!(
            display_path(Path::new("/repo"), Path::new("/repo/tests/a.spec.ts")),
            Path::new("tests/a.spec.ts").display().to_string()
        );
    }
}
