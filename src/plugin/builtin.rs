//! Plugins shipped with the crate, registered under the `sluice-` prefix.
//!
//! | identifier       | short name | options                                 |
//! |------------------|------------|-----------------------------------------|
//! | `sluice-rename`  | `rename`   | `ext`, `prefix`, `suffix`, `dirname`    |
//! | `sluice-replace` | `replace`  | `from`, `to`                            |
//! | `sluice-concat`  | `concat`   | `file`, `separator`                     |
//! | `sluice-header`  | `header`   | `text`                                  |
//! | `sluice-scss`    | `scss`     | `compressed` (feature `grass`)          |

use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::Deserialize;
use serde_json::Value;

use super::{File, Plugin, PluginRegistry, Stage, options};

pub(crate) fn register(registry: &mut PluginRegistry) {
    registry.provide("sluice-rename", || Ok(Arc::new(RenamePlugin) as Arc<dyn Plugin>));
    registry.provide("sluice-replace", || Ok(Arc::new(ReplacePlugin) as Arc<dyn Plugin>));
    registry.provide("sluice-concat", || Ok(Arc::new(ConcatPlugin) as Arc<dyn Plugin>));
    registry.provide("sluice-header", || Ok(Arc::new(HeaderPlugin) as Arc<dyn Plugin>));
    #[cfg(feature = "grass")]
    registry.provide("sluice-scss", || Ok(Arc::new(ScssPlugin) as Arc<dyn Plugin>));
}

// ******************************
// *           Rename           *
// ******************************

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Rename {
    /// New extension, without the leading dot.
    pub ext: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// Directory relative to the base, replacing the original one.
    pub dirname: Option<Utf8PathBuf>,
}

struct RenamePlugin;

impl Plugin for RenamePlugin {
    fn stage(&self, value: &Value) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(options::<Rename>(value)?))
    }
}

impl Stage for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn transform(&self, mut file: File) -> anyhow::Result<Option<File>> {
        let relative = file.relative().to_path_buf();
        let stem = relative.file_stem().unwrap_or_default();

        let mut name = String::new();
        name.push_str(self.prefix.as_deref().unwrap_or_default());
        name.push_str(stem);
        name.push_str(self.suffix.as_deref().unwrap_or_default());

        match (self.ext.as_deref(), relative.extension()) {
            (Some(""), _) => {}
            (Some(ext), _) | (None, Some(ext)) => {
                name.push('.');
                name.push_str(ext);
            }
            (None, None) => {}
        }

        let dir = match &self.dirname {
            Some(dirname) => dirname.clone(),
            None => relative.parent().map(Into::into).unwrap_or_default(),
        };

        file.path = file.base.join(dir).join(name);
        Ok(Some(file))
    }
}

// ******************************
// *          Replace           *
// ******************************

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Replace {
    pub from: String,
    pub to: String,
}

impl Replace {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

struct ReplacePlugin;

impl Plugin for ReplacePlugin {
    fn stage(&self, value: &Value) -> anyhow::Result<Box<dyn Stage>> {
        let replace = options::<Replace>(value)?;
        anyhow::ensure!(!replace.from.is_empty(), "`from` must not be empty");
        Ok(Box::new(replace))
    }
}

impl Stage for Replace {
    fn name(&self) -> &str {
        "replace"
    }

    fn transform(&self, mut file: File) -> anyhow::Result<Option<File>> {
        let text = file.text()?.replace(&self.from, &self.to);
        file.contents = text.into_bytes();
        Ok(Some(file))
    }
}

// ******************************
// *           Concat           *
// ******************************

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Concat {
    /// Output path relative to the base.
    pub file: Utf8PathBuf,
    pub separator: String,
}

impl Default for Concat {
    fn default() -> Self {
        Self {
            file: "bundle".into(),
            separator: "\n".into(),
        }
    }
}

struct ConcatPlugin;

impl Plugin for ConcatPlugin {
    fn stage(&self, value: &Value) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(options::<Concat>(value)?))
    }
}

impl Stage for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn transform(&self, file: File) -> anyhow::Result<Option<File>> {
        self.process(vec![file]).map(|mut files| files.pop())
    }

    fn process(&self, mut files: Vec<File>) -> anyhow::Result<Vec<File>> {
        let Some(first) = files.first() else {
            return Ok(vec![]);
        };

        let base = first.base.clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut contents = Vec::new();
        for (i, file) in files.iter().enumerate() {
            if i > 0 {
                contents.extend_from_slice(self.separator.as_bytes());
            }
            contents.extend_from_slice(&file.contents);
        }

        Ok(vec![File::new(base.join(&self.file), base, contents)])
    }
}

// ******************************
// *           Header           *
// ******************************

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Header {
    pub text: String,
}

struct HeaderPlugin;

impl Plugin for HeaderPlugin {
    fn stage(&self, value: &Value) -> anyhow::Result<Box<dyn Stage>> {
        match value {
            Value::String(text) => Ok(Box::new(Header { text: text.clone() })),
            value => Ok(Box::new(options::<Header>(value)?)),
        }
    }
}

impl Stage for Header {
    fn name(&self) -> &str {
        "header"
    }

    fn transform(&self, mut file: File) -> anyhow::Result<Option<File>> {
        let mut contents = self.text.clone().into_bytes();
        contents.append(&mut file.contents);
        file.contents = contents;
        Ok(Some(file))
    }
}

// ******************************
// *            SCSS            *
// ******************************

#[cfg(feature = "grass")]
pub use scss::Scss;

#[cfg(feature = "grass")]
struct ScssPlugin;

#[cfg(feature = "grass")]
impl Plugin for ScssPlugin {
    fn stage(&self, value: &Value) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(options::<Scss>(value)?))
    }
}

#[cfg(feature = "grass")]
mod scss {
    use serde::Deserialize;

    use crate::plugin::{File, Stage};

    /// Compiles SCSS to CSS with `grass`. Partials (`_name.scss`) are dropped
    /// from the stream, they are only reachable through `@use`/`@import`.
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct Scss {
        pub compressed: bool,
    }

    impl Stage for Scss {
        fn name(&self) -> &str {
            "scss"
        }

        fn transform(&self, mut file: File) -> anyhow::Result<Option<File>> {
            if file.path.file_name().is_some_and(|name| name.starts_with('_')) {
                return Ok(None);
            }

            let style = match self.compressed {
                true => grass::OutputStyle::Compressed,
                false => grass::OutputStyle::Expanded,
            };

            let mut opts = grass::Options::default().style(style);
            if let Some(dir) = file.path.parent() {
                opts = opts.load_path(dir);
            }

            let css = grass::from_string(file.text()?.to_string(), &opts)
                .map_err(|e| anyhow::anyhow!("{}: {e}", file.path))?;

            file.contents = css.into_bytes();
            file.path.set_extension("css");
            Ok(Some(file))
        }
    }
}
