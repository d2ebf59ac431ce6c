use std::fmt;

use crate::types::DataType;

/// A column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// The column identifier. Lookups ignore case.
    pub name: String,
    /// The source (or table alias) the column belongs to, if any.
    pub source: Option<String>,
    /// The declared value kind.
    pub ty: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: DataType) -> Column {
        Column {
            name: name.into(),
            source: None,
            ty,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Column {
        self.source = Some(source.into());
        self
    }

    /// Checks whether the column answers to `name`, optionally qualified by
    /// `source`.
    pub fn matches(&self, name: &str, source: Option<&str>) -> bool {
        if !self.name.eq_ignore_ascii_case(name) {
            return false;
        }
        match (source, &self.source) {
            (None, _) => true,
            (Some(wanted), Some(own)) => wanted.eq_ignore_ascii_case(own),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{source}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Returns the index of the first column matching `name`.
pub fn find_column(columns: &[Column], name: &str, source: Option<&str>) -> Option<usize> {
    columns.iter().position(|column| column.matches(name, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_honors_qualifier() {
        let columns = [
            Column::new("Id", DataType::Integer).with_source("users"),
            Column::new("name", DataType::String),
        ];
        assert_eq!(find_column(&columns, "id", None), Some(0));
        assert_eq!(find_column(&columns, "ID", Some("USERS")), Some(0));
        assert_eq!(find_column(&columns, "id", Some("orders")), None);
        assert_eq!(find_column(&columns, "name", Some("users")), None);
    }
}
