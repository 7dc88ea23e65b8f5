use std::collections::HashMap;
use std::path::Path;

use ini::Ini;

use crate::error::BlueprintError;

/// Section names that never describe a task, credential, proxy or database.
pub const RESERVED_SECTIONS: [&str; 2] = ["BUILD", "DEFAULT"];

/// One raw blueprint section: a named map of option name to string value.
/// Option names are normalized to uppercase at load time.
#[derive(Debug, Clone)]
pub struct RawSection {
    pub name: String,
    pub options: HashMap<String, String>,
}

impl RawSection {
    pub fn get(&self, option: &str) -> Option<&str> {
        self.options.get(option).map(String::as_str)
    }

    pub fn set(&mut self, option: &str, value: impl Into<String>) {
        self.options.insert(option.to_string(), value.into());
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_SECTIONS.contains(&self.name.as_str())
    }
}

/// The raw unit read from the blueprint file: every section in declaration
/// order, before any validation has run.
#[derive(Debug, Clone)]
pub struct RawBlueprint {
    sections: Vec<RawSection>,
    index: HashMap<String, usize>,
}

impl RawBlueprint {
    pub fn from_path(path: &Path) -> Result<Self, BlueprintError> {
        let text = std::fs::read_to_string(path).map_err(|source| BlueprintError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str_named(&text, path)
    }

    pub fn from_str_named(text: &str, path: &Path) -> Result<Self, BlueprintError> {
        let ini = Ini::load_from_str(text).map_err(|e| BlueprintError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut sections: Vec<RawSection> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (name, properties) in ini.iter() {
            // Keyless properties before the first section header carry no
            // meaning in a blueprint.
            let Some(name) = name else { continue };

            let options: HashMap<String, String> = properties
                .iter()
                .map(|(k, v)| (k.to_uppercase(), v.to_string()))
                .collect();

            match index.get(name) {
                Some(&i) => sections[i].options.extend(options),
                None => {
                    index.insert(name.to_string(), sections.len());
                    sections.push(RawSection {
                        name: name.to_string(),
                        options,
                    });
                }
            }
        }

        Ok(Self { sections, index })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn section(&self, name: &str) -> Option<&RawSection> {
        self.index.get(name).map(|&i| &self.sections[i])
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut RawSection> {
        let i = *self.index.get(name)?;
        Some(&mut self.sections[i])
    }

    /// Sections in declaration order.
    pub fn sections(&self) -> impl Iterator<Item = &RawSection> {
        self.sections.iter()
    }

    /// Names of sections in declaration order.
    pub fn section_names(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(text: &str) -> RawBlueprint {
        RawBlueprint::from_str_named(text, Path::new("test.blueprint")).unwrap()
    }

    #[test]
    fn reads_sections_in_order_with_uppercase_options() {
        let raw = parse(
            "[taskB]\nTYPE = LOCAL_TASK\ncommand = printf ok\n\n[taskA]\nTYPE = LOCAL_TASK\n",
        );

        assert_eq!(raw.section_names(), vec!["taskB", "taskA"]);
        let b = raw.section("taskB").unwrap();
        assert_eq!(b.get("COMMAND"), Some("printf ok"));
        assert_eq!(b.get("TYPE"), Some("LOCAL_TASK"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RawBlueprint::from_path(Path::new("/definitely/not/here.bp")).unwrap_err();
        assert!(matches!(err, BlueprintError::Io { .. }));
    }

    #[test]
    fn reserved_sections_are_flagged() {
        let raw = parse("[BUILD]\nTASKS = [a]\n\n[a]\nTYPE = LOCAL_TASK\n");
        assert!(raw.section("BUILD").unwrap().is_reserved());
        assert!(!raw.section("a").unwrap().is_reserved());
    }
}
