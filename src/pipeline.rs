//! A single source → stages → destination run.

use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::error::{PipelineError, StageFailure};
use crate::io::{expand, glob_base};
use crate::notifier::OnError;
use crate::plugin::{File, Stage};

/// Outcome of a finished pipeline.
#[derive(Debug, Default)]
pub struct Completion {
    /// Files written to the destination.
    pub files: Vec<Utf8PathBuf>,
    /// Set when a failure was routed to the error handler and the run was
    /// ended early. Nothing is written in that case.
    pub ended: Option<StageFailure>,
    pub elapsed: Duration,
}

impl Completion {
    pub fn is_clean(&self) -> bool {
        self.ended.is_none()
    }
}

/// Declarative description of one run. Paths and globs are relative to
/// [`Pipeline::root`] unless absolute.
pub struct Pipeline {
    pub root: Utf8PathBuf,
    /// Source globs, `!` negates.
    pub files: Vec<String>,
    /// Output layout is computed relative to this directory. Defaults to the
    /// static part of the first glob.
    pub base: Option<Utf8PathBuf>,
    pub dest: Option<Utf8PathBuf>,
    /// `None` entries are skipped.
    pub stages: Vec<Option<Box<dyn Stage>>>,
    pub on_error: Option<OnError>,
}

impl Pipeline {
    pub fn new<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root: Utf8PathBuf::new(),
            files: files.into_iter().map(Into::into).collect(),
            base: None,
            dest: None,
            stages: Vec::new(),
            on_error: None,
        }
    }

    pub fn root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn base(mut self, base: impl Into<Utf8PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn dest(mut self, dest: impl Into<Utf8PathBuf>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn stage(mut self, stage: Option<Box<dyn Stage>>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Option<Box<dyn Stage>>>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = Some(on_error);
        self
    }

    fn resolved_base(&self) -> Utf8PathBuf {
        let base = match &self.base {
            Some(base) => base.clone(),
            None => self
                .files
                .iter()
                .find(|f| !f.starts_with('!'))
                .map(|f| glob_base(f))
                .unwrap_or_default(),
        };

        match base.is_absolute() || self.root.as_str().is_empty() {
            true => base,
            false => self.root.join(base),
        }
    }

    /// Reads every matched file.
    fn source(&self) -> Result<Vec<File>, PipelineError> {
        let base = self.resolved_base();
        let paths = expand(&self.root, &self.files)?;

        paths
            .into_par_iter()
            .map(|path| {
                let contents = fs::read(&path)?;
                Ok(File::new(path, base.clone(), contents))
            })
            .collect()
    }

    /// Runs the pipeline to completion.
    ///
    /// With an error handler, a failing stage or destination write calls the
    /// handler and the run ends successfully with [`Completion::ended`] set.
    /// Without one the failure is returned. Source errors are always
    /// returned.
    pub fn run(self) -> Result<Completion, PipelineError> {
        let start = Instant::now();
        let mut files = self.source()?;

        tracing::debug!(files = files.len(), "source ready");

        for stage in self.stages.iter().flatten() {
            files = match stage.process(files) {
                Ok(files) => files,
                Err(error) => return self.fail(StageFailure::new(stage.name(), error), start),
            };
        }

        let written = match &self.dest {
            Some(dest) => {
                let dest = match dest.is_absolute() {
                    true => dest.clone(),
                    false => self.root.join(dest),
                };

                match write(&dest, &files) {
                    Ok(written) => written,
                    Err(error) => return self.fail(StageFailure::new("dest", error), start),
                }
            }
            None => files.into_iter().map(|file| file.path).collect(),
        };

        Ok(Completion {
            files: written,
            ended: None,
            elapsed: start.elapsed(),
        })
    }

    fn fail(&self, failure: StageFailure, start: Instant) -> Result<Completion, PipelineError> {
        match &self.on_error {
            Some(handler) => {
                handler(&failure);

                Ok(Completion {
                    files: Vec::new(),
                    ended: Some(failure),
                    elapsed: start.elapsed(),
                })
            }
            None => Err(PipelineError::Stage(failure)),
        }
    }
}

fn write(dest: &Utf8Path, files: &[File]) -> std::io::Result<Vec<Utf8PathBuf>> {
    files
        .par_iter()
        .map(|file| {
            let path = dest.join(file.relative());

            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }

            fs::write(&path, &file.contents)?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Appends its name to every file.
    struct Tag(&'static str);

    impl Stage for Tag {
        fn name(&self) -> &str {
            self.0
        }

        fn transform(&self, mut file: File) -> anyhow::Result<Option<File>> {
            file.contents.extend_from_slice(self.0.as_bytes());
            Ok(Some(file))
        }
    }

    struct Explode;

    impl Stage for Explode {
        fn name(&self) -> &str {
            "explode"
        }

        fn transform(&self, file: File) -> anyhow::Result<Option<File>> {
            anyhow::bail!("cannot handle {}", file.relative())
        }
    }

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/a.txt"), "a").unwrap();
        fs::write(root.join("src/nested/b.txt"), "b").unwrap();

        (dir, root)
    }

    #[test]
    fn stages_apply_in_order_skipping_none() {
        let (_dir, root) = project();

        let done = Pipeline::new(["src/**/*.txt"])
            .root(&root)
            .dest("out")
            .stages([
                Some(Box::new(Tag("A")) as Box<dyn Stage>),
                None,
                Some(Box::new(Tag("B"))),
            ])
            .run()
            .unwrap();

        assert!(done.is_clean());
        assert_eq!(done.files.len(), 2);
        assert_eq!(fs::read_to_string(root.join("out/a.txt")).unwrap(), "aAB");
        assert_eq!(fs::read_to_string(root.join("out/nested/b.txt")).unwrap(), "bAB");
    }

    #[test]
    fn explicit_base_is_preserved() {
        let (_dir, root) = project();

        Pipeline::new(["src/nested/*.txt"])
            .root(&root)
            .base("src")
            .dest("out")
            .run()
            .unwrap();

        assert!(root.join("out/nested/b.txt").is_file());
    }

    #[test]
    fn without_dest_nothing_is_written() {
        let (_dir, root) = project();

        let done = Pipeline::new(["src/*.txt"]).root(&root).run().unwrap();

        assert_eq!(done.files, vec![root.join("src/a.txt")]);
        assert!(!root.join("out").exists());
    }

    #[test]
    fn handler_ends_the_stream() {
        let (_dir, root) = project();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let done = Pipeline::new(["src/**/*.txt"])
            .root(&root)
            .dest("out")
            .stage(Some(Box::new(Explode)))
            .stage(Some(Box::new(Tag("never"))))
            .on_error(Arc::new(move |failure: &StageFailure| {
                sink.lock().unwrap().push(failure.title().to_string());
            }))
            .run()
            .unwrap();

        assert_eq!(done.ended.as_ref().map(StageFailure::title), Some("explode"));
        assert!(done.files.is_empty());
        assert!(!root.join("out").exists());
        assert_eq!(*seen.lock().unwrap(), vec!["explode".to_string()]);
    }

    #[test]
    fn failure_without_handler_propagates() {
        let (_dir, root) = project();

        let result = Pipeline::new(["src/*.txt"])
            .root(&root)
            .stage(Some(Box::new(Explode)))
            .run();

        match result {
            Err(PipelineError::Stage(failure)) => assert_eq!(failure.title(), "explode"),
            other => panic!("unexpected: {:?}", other.map(|c| c.files)),
        }
    }

    #[test]
    fn invalid_glob_is_an_error() {
        let (_dir, root) = project();

        let result = Pipeline::new(["src/[.txt"])
            .root(&root)
            .on_error(Arc::new(|_: &StageFailure| {}))
            .run();

        assert!(matches!(result, Err(PipelineError::Pattern(_))));
    }
}
