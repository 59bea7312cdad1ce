use indexmap::IndexMap;

/// Short model names mapped to the identifiers the generation service expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelAliases {
    aliases: IndexMap<String, String>,
}

impl ModelAliases {
    pub fn new(aliases: IndexMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn get(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    /// Canonical identifier for `name`, or `name` itself when it has no alias.
    pub fn resolve(&self, name: &str) -> String {
        self.get(name.trim())
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string())
    }
}
