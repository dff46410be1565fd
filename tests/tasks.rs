use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};
use sluice::{
    Args, Change, ChangeWatcher, Config, Defaults, File, Plugin, Rebuild, SluiceError, Stage,
    TaskSpec,
};

fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .unwrap()
        .canonicalize_utf8()
        .unwrap();

    for (path, contents) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    (dir, root)
}

fn read(root: &Utf8Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

/// Upper-cases file contents.
struct Upper;

impl Stage for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    fn transform(&self, mut file: File) -> anyhow::Result<Option<File>> {
        file.contents = file.text()?.to_uppercase().into_bytes();
        Ok(Some(file))
    }
}

fn upper_plugin() -> anyhow::Result<Arc<dyn Plugin>> {
    Ok(Arc::new(|_: &Value| -> anyhow::Result<Box<dyn Stage>> { Ok(Box::new(Upper)) }))
}

#[test]
fn clean_targets_match_declared_destinations() {
    let (_dir, root) = project(&[]);

    let registry = Config::new()
        .root(&root)
        .task("a", TaskSpec::new("src/a/*").dest("out/a"))
        .task("b", TaskSpec::new("src/b/*").dest("out/b"))
        .finish()
        .unwrap();

    let targets: HashSet<_> = registry.clean_targets().into_iter().collect();
    assert_eq!(
        targets,
        HashSet::from(["out/a/**".into(), "out/b/**".into(), "_package/**".into()])
    );
}

#[test]
fn manifest_plugins_are_resolved_lazily() {
    let (_dir, root) = project(&[
        (
            "Cargo.toml",
            r#"
            [package]
            name = "site"

            [dependencies]
            upper = "1"

            [dev-dependencies]
            sluice-upper = "0.1"
            "#,
        ),
        ("src/index.txt", "hello"),
    ]);

    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();

    let registry = Config::new()
        .root(&root)
        .provide("sluice-upper", move || {
            *counter.lock().unwrap() += 1;
            upper_plugin()
        })
        .task(
            "pages",
            TaskSpec::new("src/*.txt")
                .dest("public")
                .pipes(|plugins, _| Ok(vec![Some(plugins.stage("upper", Value::Null)?)])),
        )
        .finish()
        .unwrap();

    assert_eq!(registry.plugins().identifier("upper"), Some("sluice-upper"));
    assert_eq!(*calls.lock().unwrap(), 0);

    registry.run("pages", &Args::new()).unwrap();
    registry.run("pages", &Args::new()).unwrap();

    assert_eq!(read(&root, "public/index.txt"), "HELLO");
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn build_runs_every_task_after_clean() {
    let (_dir, root) = project(&[
        ("assets/css/site.css", "body{}"),
        ("assets/css/print.css", "@media print{}"),
        ("assets/js/app.js", "let a"),
        ("assets/js/vendor/lib.js", "let lib"),
        ("public/stale.txt", "old"),
    ]);

    let registry = Config::new()
        .root(&root)
        .plugins(Vec::<(String, String)>::new())
        .defaults(Defaults {
            dest: Some("public".into()),
            ..Default::default()
        })
        .task(
            "css",
            TaskSpec::new("assets/css/*.css")
                .dest("public/css")
                .pipes(|plugins, _| {
                    Ok(vec![Some(
                        plugins.stage("concat", json!({ "file": "bundle.css", "separator": "" }))?,
                    )])
                }),
        )
        .task(
            "js",
            TaskSpec::new("assets/js/**/*.js")
                .glob("!assets/js/vendor/**")
                .pipes(|plugins, args| {
                    Ok(vec![
                        args.flag("banner")
                            .then(|| plugins.stage("header", json!("// banner\n")))
                            .transpose()?,
                        Some(plugins.stage("rename", json!({ "suffix": ".min" }))?),
                    ])
                }),
        )
        .finish()
        .unwrap();

    assert_eq!(registry.plan("build").unwrap(), ["clean", "build"]);

    registry
        .run("build", &Args::parse(["--banner"]))
        .unwrap();

    assert!(!root.join("public/stale.txt").exists());
    assert_eq!(read(&root, "public/css/bundle.css"), "@media print{}body{}");
    assert_eq!(read(&root, "public/app.min.js"), "// banner\nlet a");
    assert!(!root.join("public/vendor").exists());
}

#[test]
fn package_copies_deliverables() {
    let (_dir, root) = project(&[
        ("Cargo.toml", "[package]\nname = \"site\"\n"),
        ("sluicefile.rs", "fn main() {}"),
        ("README.md", "# site"),
        ("debug.log", "noise"),
        ("livereload.json", "{}"),
        (".htaccess", "Options -Indexes"),
        (".git/HEAD", "ref"),
        ("target/debug/site", "bin"),
        ("index.html", "<html>"),
        ("docs/guide.md", "# guide"),
        ("src/app.txt", "app"),
    ]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let registry = Config::new()
        .root(&root)
        .plugins(Vec::<(String, String)>::new())
        .task(
            "app",
            TaskSpec::new("src/*.txt").dest("public").pipes(move |_, args| {
                sink.lock().unwrap().push(args.flag("minify"));
                Ok(vec![])
            }),
        )
        .finish()
        .unwrap();

    registry.run("package", &Args::new()).unwrap();

    assert_eq!(*seen.lock().unwrap(), [true]);

    let package = root.join("_package");
    assert_eq!(read(&package, "index.html"), "<html>");
    assert_eq!(read(&package, "public/app.txt"), "app");
    assert_eq!(read(&package, ".htaccess"), "Options -Indexes");
    assert_eq!(read(&package, "docs/guide.md"), "# guide");

    for excluded in [
        "Cargo.toml",
        "sluicefile.rs",
        "README.md",
        "debug.log",
        "livereload.json",
        ".git",
        "target",
    ] {
        assert!(!package.join(excluded).exists(), "{excluded} was packaged");
    }
}

#[test]
fn failing_stage_ends_the_task_quietly() {
    let (_dir, root) = project(&[("src/a.txt", "a")]);

    struct Broken;

    impl Stage for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn transform(&self, _: File) -> anyhow::Result<Option<File>> {
            anyhow::bail!("unexpected token")
        }
    }

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();

    let registry = Config::new()
        .root(&root)
        .plugins(Vec::<(String, String)>::new())
        .task(
            "a",
            TaskSpec::new("src/*.txt")
                .dest("out")
                .pipes(|_, _| Ok(vec![Some(Box::new(Broken) as Box<dyn Stage>)]))
                .on_error(move |failure| sink.lock().unwrap().push(failure.message())),
        )
        .finish()
        .unwrap();

    registry.run("build", &Args::new()).unwrap();

    assert_eq!(*failures.lock().unwrap(), ["unexpected token"]);
    assert!(!root.join("out").exists());
}

#[test]
fn unknown_job_is_an_error() {
    let (_dir, root) = project(&[]);
    let registry = Config::new().root(&root).finish().unwrap();

    assert!(matches!(
        registry.run("deploy", &Args::new()),
        Err(SluiceError::UnknownTask(name)) if name == "deploy"
    ));
}

#[test]
fn watcher_rebuilds_single_file() {
    let (_dir, root) = project(&[("src/a.txt", "a"), ("src/b.txt", "b")]);

    let registry = Config::new()
        .root(&root)
        .provide("sluice-upper", upper_plugin)
        .plugins([("upper", "sluice-upper")])
        .task(
            "txt",
            TaskSpec::new("src/*.txt")
                .dest("out")
                .do_one(true)
                .pipes(|plugins, _| Ok(vec![Some(plugins.stage("upper", Value::Null)?)])),
        )
        .finish()
        .unwrap();

    let mut watcher = ChangeWatcher::new(&registry, Args::new()).unwrap();
    let rebuilt = watcher.handle(&[Change::write(root.join("src/b.txt"))]);

    match rebuilt.as_slice() {
        [Rebuild::Built { completion, .. }] => {
            assert_eq!(completion.files, [root.join("out/b.txt")]);
        }
        other => panic!("unexpected rebuild: {other:?}"),
    }

    assert_eq!(read(&root, "out/b.txt"), "B");
    assert!(!root.join("out/a.txt").exists());
}

#[test]
fn plain_dependency_does_not_replace_a_builtin() {
    let (_dir, root) = project(&[
        (
            "Cargo.toml",
            r#"
            [package]
            name = "site"

            [dependencies]
            header = "1"
            "#,
        ),
        ("src/a.txt", "body"),
    ]);

    let registry = Config::new()
        .root(&root)
        .task(
            "txt",
            TaskSpec::new("src/*.txt")
                .dest("out")
                .pipes(|plugins, _| Ok(vec![Some(plugins.stage("header", json!("top "))?)])),
        )
        .finish()
        .unwrap();

    assert_eq!(registry.plugins().identifier("header"), Some("sluice-header"));

    registry.run("txt", &Args::new()).unwrap();
    assert_eq!(read(&root, "out/a.txt"), "top body");
}

#[test]
fn clean_refuses_to_remove_the_project() {
    for dest in [".", "", "/", "src/.."] {
        let (_dir, root) = project(&[("src/a.txt", "a"), ("out/old.txt", "old")]);

        let registry = Config::new()
            .root(&root)
            .plugins(Vec::<(String, String)>::new())
            .task("a", TaskSpec::new("src/*.txt").dest(dest))
            .task("b", TaskSpec::new("src/*.txt").dest("out"))
            .finish()
            .unwrap();

        assert!(
            matches!(registry.run("clean", &Args::new()), Err(SluiceError::Clean(_))),
            "dest {dest:?} was cleaned"
        );
        assert_eq!(read(&root, "src/a.txt"), "a");
        assert_eq!(read(&root, "out/old.txt"), "old");
    }
}
