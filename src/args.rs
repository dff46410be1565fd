use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat mapping of command line flags handed to every pipe builder.
///
/// Parsing follows the usual conventions of JavaScript build tools:
///
/// - `--key value` and `--key=value` store `value`;
/// - `--flag` stores `true`, `--no-flag` stores `false`;
/// - `-abc` stores `true` for `a`, `b` and `c`;
/// - everything else is collected under `_`.
///
/// Values that look like booleans or numbers are stored as such.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(BTreeMap<String, Value>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
        let mut args = Args::new();
        let mut rest = Vec::new();
        let mut i = 0;

        while i < items.len() {
            let item = &items[i];
            i += 1;

            if item == "--" {
                rest.extend(items[i..].iter().map(|s| Value::String(s.clone())));
                break;
            }

            if let Some(flag) = item.strip_prefix("--") {
                if let Some((key, value)) = flag.split_once('=') {
                    args.insert(key, coerce(value));
                } else if let Some(key) = flag.strip_prefix("no-") {
                    args.insert(key, Value::Bool(false));
                } else if let Some(next) = items.get(i).filter(|next| !next.starts_with('-')) {
                    args.insert(flag, coerce(next));
                    i += 1;
                } else {
                    args.insert(flag, Value::Bool(true));
                }
            } else if let Some(flags) = item.strip_prefix('-').filter(|f| !f.is_empty()) {
                for c in flags.chars() {
                    args.insert(c.to_string(), Value::Bool(true));
                }
            } else {
                rest.push(coerce(item));
            }
        }

        if !rest.is_empty() {
            args.insert("_", Value::Array(rest));
        }

        args
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Truthiness of a flag; absent, `false`, `0`, `""` and `null` are false.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_) | Value::Object(_)) => true,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns a copy of `self` with every entry of `other` laid on top.
    pub fn overlay(&self, other: &Args) -> Args {
        let mut merged = self.clone();
        merged
            .0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Args {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn coerce(value: &str) -> Value {
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => value
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| value.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse() {
        let args = Args::parse([
            "--minify",
            "--env",
            "production",
            "--level=3",
            "--no-maps",
            "-qv",
            "extra",
            "--ratio",
            "0.5",
        ]);

        assert_eq!(args.get("minify"), Some(&json!(true)));
        assert_eq!(args.str("env"), Some("production"));
        assert_eq!(args.get("level"), Some(&json!(3)));
        assert_eq!(args.get("maps"), Some(&json!(false)));
        assert!(args.flag("q") && args.flag("v"));
        assert_eq!(args.get("_"), Some(&json!(["extra"])));
        assert_eq!(args.get("ratio"), Some(&json!(0.5)));
    }

    #[test]
    fn flag_followed_by_flag_is_boolean() {
        let args = Args::parse(["--watch", "--port", "8080"]);
        assert_eq!(args.get("watch"), Some(&json!(true)));
        assert_eq!(args.get("port"), Some(&json!(8080)));
    }

    #[test]
    fn double_dash_ends_flags() {
        let args = Args::parse(["--a", "--", "--b"]);
        assert!(args.flag("a"));
        assert!(!args.flag("b"));
        assert_eq!(args.get("_"), Some(&json!(["--b"])));
    }

    #[test]
    fn test_flag_truthiness() {
        let args: Args = [
            ("zero", json!(0)),
            ("empty", json!("")),
            ("null", json!(null)),
            ("one", json!(1)),
            ("text", json!("x")),
        ]
        .into_iter()
        .collect();

        assert!(!args.flag("zero"));
        assert!(!args.flag("empty"));
        assert!(!args.flag("null"));
        assert!(!args.flag("missing"));
        assert!(args.flag("one"));
        assert!(args.flag("text"));
    }

    #[test]
    fn overlay_prefers_other() {
        let package: Args = [("minify", json!(true)), ("maps", json!(false))]
            .into_iter()
            .collect();
        let cli = Args::parse(["--no-minify", "--env", "dev"]);

        let merged = package.overlay(&cli);

        assert_eq!(merged.get("minify"), Some(&json!(false)));
        assert_eq!(merged.get("maps"), Some(&json!(false)));
        assert_eq!(merged.str("env"), Some("dev"));
    }
}
