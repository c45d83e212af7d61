//! TypeScript enum generation from PostgreSQL enum types.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use dbman_core::schema::EnumType;

/// Writes one `<Name>.enum.ts` file per enum type.
pub struct EnumGenerator {
    /// Output directory for generated files.
    output_dir: PathBuf,
}

impl EnumGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Generate enum files and return the paths written.
    ///
    /// Types sharing a name across schemas are merged into one file.
    pub fn generate(&self, types: &[EnumType]) -> Result<Vec<PathBuf>, Error> {
        std::fs::create_dir_all(&self.output_dir)?;

        let mut merged: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        for ty in types {
            let name = to_pascal_case(&ty.name);
            if name.is_empty() {
                return Err(Error::InvalidName(ty.name.clone()));
            }
            merged
                .entry(name)
                .or_default()
                .extend(ty.values.iter().map(String::as_str));
        }

        let mut written = Vec::with_capacity(merged.len());
        for (name, values) in merged {
            let path = self.output_dir.join(format!("{}.enum.ts", name));
            std::fs::write(&path, render_enum(&name, values)?)?;
            debug!("Wrote {}", path.display());
            written.push(path);
        }

        Ok(written)
    }
}

/// Render a TypeScript string enum.
fn render_enum<'a>(name: &str, values: impl IntoIterator<Item = &'a str>) -> Result<String, Error> {
    let mut output = format!("export enum {} {{\n", name);
    let mut keys = BTreeSet::new();

    for value in values {
        let key = enum_key(value);
        if key.is_empty() {
            return Err(Error::InvalidValue {
                ty: name.to_string(),
                value: value.to_string(),
            });
        }
        if !keys.insert(key.clone()) {
            return Err(Error::DuplicateKey {
                ty: name.to_string(),
                key,
            });
        }
        output.push_str(&format!("    {} = \"{}\",\n", key, escape(value)));
    }

    output.push_str("}\n");
    Ok(output)
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

/// `in progress` becomes `IN_PROGRESS`; punctuation is dropped.
fn enum_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_uppercase)
        .collect()
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Code generation error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Enum type name {0:?} produces an empty identifier")]
    InvalidName(String),

    #[error("Value {value:?} of enum {ty} produces an empty key")]
    InvalidValue { ty: String, value: String },

    #[error("Enum {ty} has two values mapping to key {key}")]
    DuplicateKey { ty: String, key: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn enum_type(schema: &str, name: &str, values: &[&str]) -> EnumType {
        let mut ty = EnumType::new(schema, name);
        ty.values = values.iter().map(|v| v.to_string()).collect();
        ty
    }

    #[test]
    fn test_to_pascal_case() {
        assert_eq!(to_pascal_case("order_status"), "OrderStatus");
        assert_eq!(to_pascal_case("mood"), "Mood");
        assert_eq!(to_pascal_case("__weird__name"), "WeirdName");
    }

    #[test]
    fn test_enum_key() {
        assert_eq!(enum_key("active"), "ACTIVE");
        assert_eq!(enum_key("in progress"), "IN_PROGRESS");
        assert_eq!(enum_key("on-hold!"), "ONHOLD");
        assert_eq!(enum_key("  spaced   out "), "SPACED_OUT");
    }

    #[test]
    fn test_render_enum_sorted_values() {
        let rendered = render_enum("Mood", ["happy", "sad", "ok"].into_iter().collect::<BTreeSet<_>>())
            .unwrap();
        assert_eq!(
            rendered,
            "export enum Mood {\n    HAPPY = \"happy\",\n    OK = \"ok\",\n    SAD = \"sad\",\n}\n"
        );
    }

    #[test]
    fn test_render_enum_rejects_colliding_keys() {
        let err = render_enum("Mood", ["in progress", "in-progress ", "in_progress"]).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn test_generate_writes_one_file_per_type() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("enums");
        let generator = EnumGenerator::new(&out);

        let written = generator
            .generate(&[
                enum_type("public", "order_status", &["shipped", "pending"]),
                enum_type("public", "mood", &["sad"]),
            ])
            .unwrap();

        assert_eq!(
            written,
            vec![out.join("Mood.enum.ts"), out.join("OrderStatus.enum.ts")]
        );
        let content = std::fs::read_to_string(out.join("OrderStatus.enum.ts")).unwrap();
        assert_eq!(
            content,
            "export enum OrderStatus {\n    PENDING = \"pending\",\n    SHIPPED = \"shipped\",\n}\n"
        );
    }

    #[test]
    fn test_generate_merges_schemas() {
        let dir = TempDir::new().unwrap();
        let generator = EnumGenerator::new(dir.path());

        let written = generator
            .generate(&[
                enum_type("public", "mood", &["happy"]),
                enum_type("audit", "mood", &["sad", "happy"]),
            ])
            .unwrap();

        assert_eq!(written.len(), 1);
        let content = std::fs::read_to_string(&written[0]).unwrap();
        assert_eq!(
            content,
            "export enum Mood {\n    HAPPY = \"happy\",\n    SAD = \"sad\",\n}\n"
        );
    }

    #[test]
    fn test_generate_empty_input() {
        let dir = TempDir::new().unwrap();
        let generator = EnumGenerator::new(dir.path().join("none"));
        assert!(generator.generate(&[]).unwrap().is_empty());
        assert!(generator.output_dir().is_dir());
    }
}
