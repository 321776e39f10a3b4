use itertools::Itertools;

use std::error;
use std::fmt;
use std::fmt::Display;

/// Position inside a parsed template, used to point at the failing placeholder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub offset: usize,
    pub line: u32,
    pub column: usize,
}

impl Position {
    pub fn new(offset: usize, line: u32, column: usize) -> Self {
        Position {
            offset,
            line,
            column,
        }
    }
    pub fn unknown() -> Position {
        Position {
            offset: 0,
            line: 0,
            column: 0,
        }
    }
    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::unknown()
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line == 0 {
            write!(f, "(unknown position)")
        } else if self.line > 1 {
            write!(f, "line {}, position {}", self.line, self.column)
        } else {
            write!(f, "position {}", self.column)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum ErrorType {
    /// Placeholder has no bound value at final resolution.
    MissingTemplateKey,
    /// Attribute, index or mapping-key access failed on a present value.
    TemplateResolutionError,
    TemplateParseError,
    MaterializationError,
    /// Naive timestamp or otherwise invalid run/manifest record.
    ManifestValidationError,
    ArgumentError,
    ConversionError,
    SerializationError,
    PathNotFound,
    StorageReadError,
    StorageWriteError,
    QueryError,
    ConfigurationError,
    NotSupported,
    General,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Error {
    pub error_type: ErrorType,
    pub message: String,
    pub position: Position,
    pub asset: Option<String>,
    pub path: Option<String>,
}

impl Error {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Error {
            error_type,
            message,
            position: Position::unknown(),
            asset: None,
            path: None,
        }
    }

    pub fn from_error<E: Display>(error_type: ErrorType, error: E) -> Self {
        Error::new(error_type, error.to_string())
    }

    pub fn from_result<T, E: Display>(error_type: ErrorType, result: Result<T, E>) -> Result<T, Self> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(Error::from_error(error_type, e)),
        }
    }

    pub fn with_position(mut self, position: &Position) -> Self {
        self.position = position.clone();
        self
    }
    pub fn with_asset(mut self, asset_name: &str) -> Self {
        self.asset = Some(asset_name.to_owned());
        self
    }
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_owned());
        self
    }

    /// Missing placeholder key at final resolution.
    /// The message lists every key available to the formatter.
    pub fn missing_template_key<S: AsRef<str>>(key: &str, available: &[S]) -> Self {
        Error::new(
            ErrorType::MissingTemplateKey,
            format!(
                "Missing format key '{}'. Available keys: {}",
                key,
                available.iter().map(|k| k.as_ref()).join(", ")
            ),
        )
    }
    pub fn is_missing_template_key(&self) -> bool {
        self.error_type == ErrorType::MissingTemplateKey
    }
    pub fn template_resolution_error(placeholder: &str, message: &str) -> Self {
        Error::new(
            ErrorType::TemplateResolutionError,
            format!("Can't resolve '{{{}}}': {}", placeholder, message),
        )
    }
    pub fn template_parse_error(template: &str, err: &str, position: &Position) -> Self {
        Error {
            error_type: ErrorType::TemplateParseError,
            message: format!("Can't parse template '{}': {}", template, err),
            position: position.clone(),
            asset: None,
            path: None,
        }
    }
    pub fn materialization_error(message: String) -> Self {
        Error::new(ErrorType::MaterializationError, message)
    }
    pub fn manifest_validation_error(message: String) -> Self {
        Error::new(ErrorType::ManifestValidationError, message)
    }
    pub fn is_manifest_validation_error(&self) -> bool {
        self.error_type == ErrorType::ManifestValidationError
    }
    pub fn argument_error(message: String) -> Self {
        Error::new(ErrorType::ArgumentError, message)
    }
    pub fn conversion_error<W: Display, T: Display>(what: W, to: T) -> Self {
        Error::new(
            ErrorType::ConversionError,
            format!("Can't convert '{}' to {}", what, to),
        )
    }
    pub fn serialization_error<E: Display>(what: &str, error: E) -> Self {
        Error::new(
            ErrorType::SerializationError,
            format!("Can't serialize {}: {}", what, error),
        )
    }
    pub fn path_not_found(path: &str) -> Self {
        Error::new(ErrorType::PathNotFound, format!("Path not found: '{}'", path)).with_path(path)
    }
    pub fn is_path_not_found(&self) -> bool {
        self.error_type == ErrorType::PathNotFound
    }
    pub fn storage_read_error(path: &str, storage_name: &str, message: &(impl Display + ?Sized)) -> Self {
        Error::new(
            ErrorType::StorageReadError,
            format!("Storage {} failed to read '{}': {}", storage_name, path, message),
        )
        .with_path(path)
    }
    pub fn storage_write_error(path: &str, storage_name: &str, message: &(impl Display + ?Sized)) -> Self {
        Error::new(
            ErrorType::StorageWriteError,
            format!("Storage {} failed to write '{}': {}", storage_name, path, message),
        )
        .with_path(path)
    }
    pub fn query_error(message: String) -> Self {
        Error::new(ErrorType::QueryError, message)
    }
    pub fn configuration_error(message: String) -> Self {
        Error::new(ErrorType::ConfigurationError, message)
    }
    pub fn not_supported(message: String) -> Self {
        Error::new(ErrorType::NotSupported, message)
    }
    pub fn general_error(message: String) -> Self {
        Error::new(ErrorType::General, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.position.is_unknown() {
            write!(f, "{}", self.message)?;
        } else {
            write!(f, "{} at {}", self.message, self.position)?;
        }
        if let Some(asset) = &self.asset {
            write!(f, " (asset {})", asset)?;
        }
        Ok(())
    }
}

impl error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization_error("JSON", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_lists_available_keys() {
        let e = Error::missing_template_key("endpoint", &["customer", "region"]);
        assert!(e.is_missing_template_key());
        assert_eq!(
            e.to_string(),
            "Missing format key 'endpoint'. Available keys: customer, region"
        );
    }

    #[test]
    fn display_with_position_and_asset() {
        let e = Error::template_parse_error("{a", "unclosed placeholder", &Position::new(0, 1, 1))
            .with_asset("orders");
        assert_eq!(
            e.to_string(),
            "Can't parse template '{a': unclosed placeholder at position 1 (asset orders)"
        );
    }
}
