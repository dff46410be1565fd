use std::collections::HashSet;
use std::fmt::Display;
use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;
use glob::Pattern;

const ANSI_BLUE: Style = Style::new().blue();

/// Same defaults as most JavaScript globbers: `*` stays inside one path
/// segment and dotfiles only match a literal leading dot.
pub(crate) const GLOB_OPTS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Anchors a glob pattern at `root`. Absolute patterns are left alone.
pub(crate) fn anchor(root: &Utf8Path, pattern: &str) -> String {
    if root.as_str().is_empty() || Utf8Path::new(pattern).is_absolute() {
        return pattern.to_string();
    }

    let root = Pattern::escape(root.as_str());
    let root = root.trim_end_matches('/');
    let pattern = pattern.trim_start_matches("./");

    format!("{root}/{pattern}")
}

/// Static part of a glob, the directory output paths are computed from.
///
/// - `src/js/**/*.js` -> `src/js`
/// - `src/*.css`      -> `src`
/// - `src/app.js`     -> `src`
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);

    let components: Vec<_> = path.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len().saturating_sub(1));

    components.iter().take(split).collect()
}

/// Splits patterns into positive globs and negated (`!`) matchers.
pub(crate) fn split_patterns(
    root: &Utf8Path,
    patterns: &[String],
) -> Result<(Vec<String>, Vec<Pattern>), glob::PatternError> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) => exclude.push(Pattern::new(&anchor(root, negated))?),
            None => include.push(anchor(root, pattern)),
        }
    }

    Ok((include, exclude))
}

/// Whether `path` is selected by `patterns`, honouring negations.
pub(crate) fn matches(include: &[Pattern], exclude: &[Pattern], path: &Utf8Path) -> bool {
    include
        .iter()
        .any(|p| p.matches_path_with(path.as_std_path(), GLOB_OPTS))
        && !exclude
            .iter()
            .any(|p| p.matches_path_with(path.as_std_path(), GLOB_OPTS))
}

/// Expands `patterns` under `root` into a list of files, in pattern order
/// and without duplicates.
///
/// Patterns apply in order: a negated pattern drops what the patterns before
/// it selected, a later positive pattern can bring files back.
pub(crate) fn expand(root: &Utf8Path, patterns: &[String]) -> Result<Vec<Utf8PathBuf>, crate::PipelineError> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            let negated = Pattern::new(&anchor(root, negated))?;
            paths.retain(|path: &Utf8PathBuf| {
                let keep = !negated.matches_path_with(path.as_std_path(), GLOB_OPTS);
                if !keep {
                    seen.remove(path);
                }
                keep
            });
            continue;
        }

        for entry in glob::glob_with(&anchor(root, pattern), GLOB_OPTS)? {
            let path = Utf8PathBuf::try_from(entry?)?;

            if path.is_file() && seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    Ok(paths)
}

/// Deletes everything matched by `patterns` under `root`.
///
/// A trailing `/**` removes the directory itself along with its content.
/// Missing paths are not an error. Nothing is removed when any target is
/// `root` itself or one of its ancestors.
pub fn delete(root: &Utf8Path, patterns: &[String]) -> io::Result<Vec<Utf8PathBuf>> {
    let mut targets = Vec::new();

    for pattern in patterns {
        if let Some(dir) = pattern.strip_suffix("/**") {
            targets.push(root.join(dir));
            continue;
        }

        let anchored = anchor(root, pattern);
        let entries = glob::glob_with(&anchored, GLOB_OPTS)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        for entry in entries {
            let path = entry.map_err(io::Error::from)?;
            let path = Utf8PathBuf::try_from(path)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            targets.push(path);
        }
    }

    let root = normalize(root);
    if let Some(target) = targets.iter().find(|target| root.starts_with(normalize(target))) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to delete {target}, it contains the project root {root}"),
        ));
    }

    let mut removed = Vec::new();
    for target in targets {
        if remove(&target)? {
            removed.push(target);
        }
    }

    Ok(removed)
}

/// Resolves `.` and `..` components without touching the filesystem.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut normal = Utf8PathBuf::new();

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !normal.pop() {
                    normal.push("..");
                }
            }
            other => normal.push(other),
        }
    }

    normal
}

pub(crate) fn remove(path: &Utf8Path) -> io::Result<bool> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("src/js/**/*.js"), "src/js");
        assert_eq!(glob_base("src/*.css"), "src");
        assert_eq!(glob_base("src/app.js"), "src");
        assert_eq!(glob_base("**/*.md"), "");
        assert_eq!(glob_base("app.js"), "");
    }

    #[test]
    fn test_anchor() {
        assert_eq!(anchor(Utf8Path::new("/p"), "src/*.js"), "/p/src/*.js");
        assert_eq!(anchor(Utf8Path::new("/p/"), "./src"), "/p/src");
        assert_eq!(anchor(Utf8Path::new("/p"), "/abs/*.js"), "/abs/*.js");
        assert_eq!(anchor(Utf8Path::new(""), "src"), "src");
        assert_eq!(anchor(Utf8Path::new("/a[1]"), "*.js"), "/a[[]1[]]/*.js");
    }

    #[test]
    fn expand_honours_negations_and_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::create_dir_all(root.join("src/skip")).unwrap();
        fs::write(root.join("src/a.js"), "a").unwrap();
        fs::write(root.join("src/skip/b.js"), "b").unwrap();
        fs::write(root.join("src/.hidden.js"), "h").unwrap();

        let files = expand(
            root,
            &["src/**/*.js".into(), "!src/skip/**".into(), "src/a.js".into()],
        )
        .unwrap();

        assert_eq!(files, vec![root.join("src/a.js")]);
    }

    #[test]
    fn later_patterns_reinclude() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::write(root.join("index.html"), "i").unwrap();
        fs::write(root.join(".htaccess"), "h").unwrap();
        fs::write(root.join(".env"), "e").unwrap();

        let files = expand(
            root,
            &["**/*".into(), "!**/.*".into(), ".htaccess".into()],
        )
        .unwrap();

        assert_eq!(files, vec![root.join("index.html"), root.join(".htaccess")]);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::create_dir_all(root.join("out/a/nested")).unwrap();
        fs::write(root.join("out/a/nested/x.txt"), "x").unwrap();
        fs::write(root.join("keep.txt"), "k").unwrap();
        fs::write(root.join("drop.log"), "d").unwrap();

        let removed = delete(
            root,
            &["out/a/**".into(), "missing/**".into(), "*.log".into()],
        )
        .unwrap();

        assert_eq!(removed, vec![root.join("out/a"), root.join("drop.log")]);
        assert!(!root.join("out/a").exists());
        assert!(root.join("out").exists());
        assert!(root.join("keep.txt").exists());
    }

    #[test]
    fn delete_refuses_the_root_and_above() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::create_dir_all(root.join("out")).unwrap();
        fs::write(root.join("out/x.txt"), "x").unwrap();
        fs::write(root.join("keep.txt"), "k").unwrap();

        for pattern in ["./**", "/**", "src/../**", "../**", "out/../../**"] {
            let error = delete(root, &["out/**".into(), pattern.into()]).unwrap_err();
            assert_eq!(error.kind(), io::ErrorKind::InvalidInput, "{pattern}");
        }

        assert!(root.join("out/x.txt").exists());
        assert!(root.join("keep.txt").exists());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Utf8Path::new("/p/./a/../b")), "/p/b");
        assert_eq!(normalize(Utf8Path::new("/p/.")), "/p");
        assert_eq!(normalize(Utf8Path::new("a/../..")), "..");
    }
}
