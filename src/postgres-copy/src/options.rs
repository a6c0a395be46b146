// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Format options for `COPY`, e.g. `FORMAT`, `DELIMITER`, `NULL` or `HEADER`.
//!
//! Options are passed through to the server: nothing here knows which options
//! exist or which values they accept. Only the option names are checked,
//! since they are written into the command unquoted.

use std::fmt;

use postgres_protocol::escape::escape_literal;

use crate::CopyError;

/// A scalar option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Text(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(true) => f.write_str("TRUE"),
            OptionValue::Bool(false) => f.write_str("FALSE"),
            OptionValue::Text(s) => f.write_str(escape_literal(s).trim_start()),
            OptionValue::Int(i) => write!(f, "{i}"),
            // Non-finite values are not valid for any COPY option; let the
            // server reject them as text.
            OptionValue::Float(v) if !v.is_finite() => {
                f.write_str(escape_literal(&v.to_string()).trim_start())
            }
            OptionValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> OptionValue {
        OptionValue::Bool(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> OptionValue {
        OptionValue::Text(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> OptionValue {
        OptionValue::Text(v)
    }
}

impl From<char> for OptionValue {
    fn from(v: char) -> OptionValue {
        OptionValue::Text(v.to_string())
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> OptionValue {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> OptionValue {
        OptionValue::Int(v.into())
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> OptionValue {
        OptionValue::Float(v)
    }
}

/// An insertion-ordered set of options.
///
/// ```
/// use mz_postgres_copy::CopyOptions;
///
/// let options = CopyOptions::new().set("format", "csv").set("header", true);
/// assert_eq!(options.render().unwrap(), " (FORMAT 'csv', HEADER TRUE)");
/// assert_eq!(CopyOptions::new().render().unwrap(), "");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyOptions {
    entries: Vec<(String, OptionValue)>,
}

impl CopyOptions {
    pub fn new() -> CopyOptions {
        CopyOptions::default()
    }

    /// Sets `key` to `value`. An existing key keeps its position.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> CopyOptions {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the options clause of a `COPY` command, including its leading
    /// space, or the empty string when there are no options.
    pub fn render(&self) -> Result<String, CopyError> {
        if self.entries.is_empty() {
            return Ok(String::new());
        }
        let mut rendered = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            rendered.push(render_option(key, value)?);
        }
        Ok(format!(" ({})", rendered.join(", ")))
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for CopyOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = CopyOptions::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}

/// Renders a single `KEY VALUE` pair.
pub fn render_option(key: &str, value: &OptionValue) -> Result<String, CopyError> {
    if !is_option_name(key) {
        return Err(CopyError::InvalidOption(key.to_string()));
    }
    Ok(format!("{} {}", key.to_ascii_uppercase(), value))
}

fn is_option_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn render_scalars() {
        assert_eq!(
            render_option("header", &true.into()).unwrap(),
            "HEADER TRUE"
        );
        assert_eq!(render_option("null", &".".into()).unwrap(), "NULL '.'");
        assert_eq!(
            render_option("freeze", &false.into()).unwrap(),
            "FREEZE FALSE"
        );
        assert_eq!(
            render_option("delimiter", &'\t'.into()).unwrap(),
            "DELIMITER '\t'"
        );
        assert_eq!(render_option("quote", &"'".into()).unwrap(), "QUOTE ''''");
        assert_eq!(
            render_option("escape", &"\\".into()).unwrap(),
            r"ESCAPE E'\\'"
        );
        assert_eq!(
            render_option("reject_limit", &10i64.into()).unwrap(),
            "REJECT_LIMIT 10"
        );
    }

    #[test]
    fn render_clause() {
        let options = CopyOptions::new()
            .set("format", "csv")
            .set("null", ".")
            .set("header", true);
        assert_eq!(
            options.render().unwrap(),
            " (FORMAT 'csv', NULL '.', HEADER TRUE)"
        );
    }

    #[test]
    fn set_replaces_in_place() {
        let options = CopyOptions::new()
            .set("format", "text")
            .set("header", false)
            .set("format", "csv");
        assert_eq!(options.get("format"), Some(&OptionValue::Text("csv".into())));
        assert_eq!(
            options.render().unwrap(),
            " (FORMAT 'csv', HEADER FALSE)"
        );
    }

    #[test]
    fn invalid_keys_are_rejected() {
        for key in ["", "1format", "format)", "null '' ; DROP TABLE x", "head er"] {
            let options = CopyOptions::new().set(key, true);
            assert!(
                matches!(options.render(), Err(CopyError::InvalidOption(k)) if k == key),
                "{key:?}"
            );
        }
    }

    fn option_value() -> impl Strategy<Value = OptionValue> {
        prop_oneof![
            any::<bool>().prop_map(OptionValue::Bool),
            any::<i64>().prop_map(OptionValue::Int),
            any::<String>().prop_map(OptionValue::Text),
            (-1e6f64..1e6).prop_map(OptionValue::Float),
        ]
    }

    proptest! {
        #[test]
        fn render_is_idempotent_and_ordered(
            entries in proptest::collection::vec(("[a-z_][a-z0-9_]{0,8}", option_value()), 0..8)
        ) {
            let options: CopyOptions = entries.into_iter().collect();
            let first = options.render().unwrap();
            let second = options.render().unwrap();
            prop_assert_eq!(&first, &second);

            let pairs: Vec<String> = options
                .iter()
                .map(|(k, v)| render_option(k, v).unwrap())
                .collect();
            let expected = if pairs.is_empty() {
                String::new()
            } else {
                format!(" ({})", pairs.join(", "))
            };
            prop_assert_eq!(first, expected);
        }
    }
}
