//! Parameter descriptors and argument binding.
//!
//! A [ParameterList] is built once when an asset is declared and reused by every
//! derivation. Binding never removes a previously bound name; later binds only
//! add or override entries.

use itertools::Itertools;

use crate::error::Error;
use crate::value::{FromValue, Value};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DefaultValue {
    Value(Value),
    #[default]
    NoDefault,
}

impl DefaultValue {
    pub fn is_no_default(&self) -> bool {
        matches!(self, DefaultValue::NoDefault)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: DefaultValue,
    pub position: usize,
}

impl Parameter {
    pub fn required(name: &str) -> Self {
        Parameter {
            name: name.to_owned(),
            default: DefaultValue::NoDefault,
            position: 0,
        }
    }

    pub fn with_default(name: &str, value: impl Into<Value>) -> Self {
        Parameter {
            name: name.to_owned(),
            default: DefaultValue::Value(value.into()),
            position: 0,
        }
    }

    /// Parameter defaulting to [Value::None].
    pub fn optional(name: &str) -> Self {
        Self::with_default(name, Value::None)
    }

    pub fn has_default(&self) -> bool {
        !self.default.is_no_default()
    }
}

/// Parameters of a materializer in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterList {
    parameters: Vec<Parameter>,
}

impl ParameterList {
    pub fn new(parameters: Vec<Parameter>) -> Self {
        let parameters = parameters
            .into_iter()
            .enumerate()
            .map(|(position, mut p)| {
                p.position = position;
                p
            })
            .collect();
        ParameterList { parameters }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Bind call arguments on top of already bound arguments.
    ///
    /// Keyword values bind (or rebind) the named parameter. Positional values
    /// fill, in declaration order, the parameters that are neither already bound
    /// nor named by a keyword in the same call.
    pub fn bind(&self, bound: &BoundArguments, call: &CallArguments) -> Result<BoundArguments, Error> {
        let mut result = bound.clone();

        let duplicates = call.keyword.iter().map(|(k, _)| k).duplicates().collect::<Vec<_>>();
        if let Some(name) = duplicates.first() {
            return Err(Error::argument_error(format!(
                "Got multiple values for argument '{}'",
                name
            )));
        }
        for (name, value) in &call.keyword {
            if self.get(name).is_none() {
                return Err(Error::argument_error(format!(
                    "Unexpected keyword argument '{}'; parameters are: {}",
                    name,
                    self.names().join(", ")
                )));
            }
            result.insert(name, value.clone());
        }

        let mut free = self
            .parameters
            .iter()
            .filter(|p| !bound.contains(&p.name) && !call.keyword.iter().any(|(k, _)| k == &p.name));
        for (i, value) in call.positional.iter().enumerate() {
            match free.next() {
                Some(parameter) => result.insert(&parameter.name, value.clone()),
                None => {
                    return Err(Error::argument_error(format!(
                        "Too many positional arguments: {} given, {} parameter(s) left unbound",
                        call.positional.len(),
                        i
                    )))
                }
            }
        }

        result.sort_by_position(self);
        Ok(result)
    }

    /// Bind defaults of parameters that are still unbound.
    pub fn apply_defaults(&self, bound: &mut BoundArguments) {
        for parameter in &self.parameters {
            if let DefaultValue::Value(value) = &parameter.default {
                if !bound.contains(&parameter.name) {
                    bound.insert(&parameter.name, value.clone());
                }
            }
        }
        bound.sort_by_position(self);
    }

    /// Fail if a parameter without a default is unbound.
    pub fn check_complete(&self, bound: &BoundArguments) -> Result<(), Error> {
        let missing = self
            .parameters
            .iter()
            .filter(|p| !p.has_default() && !bound.contains(&p.name))
            .map(|p| format!("'{}'", p.name))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::argument_error(format!(
                "Missing required argument(s): {}",
                missing.join(", ")
            )))
        }
    }

    /// True when every parameter is bound.
    pub fn is_fully_bound(&self, bound: &BoundArguments) -> bool {
        self.parameters.iter().all(|p| bound.contains(&p.name))
    }
}

/// Arguments of one call, before binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArguments {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keyword.push((name.to_owned(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// Build [CallArguments]: `args!["widgets", customer = "acme"]`.
#[macro_export]
macro_rules! args {
    (@acc $acc:expr;) => { $acc };
    (@acc $acc:expr; $name:ident = $value:expr $(, $($rest:tt)*)?) => {
        $crate::args!(@acc $acc.kwarg(stringify!($name), $value); $($($rest)*)?)
    };
    (@acc $acc:expr; $value:expr $(, $($rest:tt)*)?) => {
        $crate::args!(@acc $acc.arg($value); $($($rest)*)?)
    };
    ($($rest:tt)*) => {
        $crate::args!(@acc $crate::arguments::CallArguments::new(); $($rest)*)
    };
}

/// Parameter name to value, in parameter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArguments {
    entries: Vec<(String, Value)>,
}

impl BoundArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name.to_owned(), value));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    fn sort_by_position(&mut self, parameters: &ParameterList) {
        self.entries.sort_by_key(|(n, _)| {
            parameters
                .get(n)
                .map(|p| p.position)
                .unwrap_or(usize::MAX)
        });
    }

    /// Typed access used by materializers.
    pub fn extract<T: FromValue>(&self, name: &str) -> Result<T, Error> {
        match self.get(name) {
            Some(value) => T::from_value(value).map_err(|e| {
                Error::new(e.error_type, format!("Argument '{}': {}", name, e.message))
            }),
            None => Err(Error::argument_error(format!("Argument '{}' is not bound", name))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(n, v)| (n.clone(), v.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;

    fn parameters() -> ParameterList {
        ParameterList::new(vec![
            Parameter::required("customer"),
            Parameter::required("endpoint"),
            Parameter::with_default("limit", 100),
        ])
    }

    #[test]
    fn bind_positional_and_keyword() -> Result<(), Error> {
        let p = parameters();
        let bound = p.bind(&BoundArguments::new(), &args!["acme", limit = 5])?;
        assert_eq!(bound.names(), vec!["customer", "limit"]);
        let bound = p.bind(&bound, &args!["orders"])?;
        assert_eq!(bound.names(), vec!["customer", "endpoint", "limit"]);
        assert_eq!(bound.get("endpoint"), Some(&Value::from("orders")));
        Ok(())
    }

    #[test]
    fn rebinding_overrides_and_keeps() -> Result<(), Error> {
        let p = parameters();
        let first = p.bind(&BoundArguments::new(), &args![customer = "acme", endpoint = "orders"])?;
        let second = p.bind(&first, &args![customer = "globex"])?;
        assert_eq!(second.get("customer"), Some(&Value::from("globex")));
        assert_eq!(second.get("endpoint"), Some(&Value::from("orders")));
        assert_eq!(first.get("customer"), Some(&Value::from("acme")));
        Ok(())
    }

    #[test]
    fn bind_errors() {
        let p = parameters();
        let e = p.bind(&BoundArguments::new(), &args![region = "x"]).unwrap_err();
        assert_eq!(e.error_type, ErrorType::ArgumentError);
        let e = p.bind(&BoundArguments::new(), &args![1, 2, 3, 4]).unwrap_err();
        assert_eq!(e.error_type, ErrorType::ArgumentError);
        let e = p
            .bind(&BoundArguments::new(), &CallArguments::new().kwarg("customer", "a").kwarg("customer", "b"))
            .unwrap_err();
        assert!(e.message.contains("multiple values"));
    }

    #[test]
    fn defaults_and_completeness() -> Result<(), Error> {
        let p = parameters();
        let mut bound = p.bind(&BoundArguments::new(), &args![customer = "acme"])?;
        p.apply_defaults(&mut bound);
        assert_eq!(bound.extract::<i64>("limit")?, 100);
        let e = p.check_complete(&bound).unwrap_err();
        assert!(e.message.contains("'endpoint'"));
        assert!(!p.is_fully_bound(&bound));
        Ok(())
    }

    #[test]
    fn extract_reports_argument_name() {
        let mut bound = BoundArguments::new();
        bound.insert("limit", Value::from("lots"));
        let e = bound.extract::<i64>("limit").unwrap_err();
        assert_eq!(e.error_type, ErrorType::ConversionError);
        assert!(e.message.starts_with("Argument 'limit'"));
    }
}
