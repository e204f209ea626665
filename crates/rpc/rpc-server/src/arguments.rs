// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use rpc_common::{Kwargs, Value};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// The positional and keyword arguments a request carried, as handed to an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    args: Vec<Value>,
    kwargs: Kwargs,
}

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("missing argument '{name}' (position {index})")]
    Missing { index: usize, name: String },
    #[error("invalid argument '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Arguments {
    pub fn new(args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self { args, kwargs }
    }

    pub fn positional(&self) -> &[Value] {
        &self.args
    }

    pub fn keyword(&self) -> &Kwargs {
        &self.kwargs
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// The raw value of a parameter, looked up by keyword first and then by position.
    pub fn raw(&self, index: usize, name: &str) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(index))
    }

    /// Decode a required parameter.
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, ArgumentError> {
        self.opt(index, name)?.ok_or_else(|| ArgumentError::Missing {
            index,
            name: name.to_string(),
        })
    }

    /// Decode an optional parameter. An explicit `null` counts as absent.
    pub fn opt<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<Option<T>, ArgumentError> {
        match self.raw(index, name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| ArgumentError::Invalid {
                    name: name.to_string(),
                    source,
                }),
        }
    }

    pub fn get_or<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
        default: T,
    ) -> Result<T, ArgumentError> {
        Ok(self.opt(index, name)?.unwrap_or(default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(positional: Value, keyword: Value) -> Arguments {
        Arguments::new(
            positional.as_array().cloned().unwrap(),
            keyword.as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn keyword_wins_over_position() {
        let a = args(json!(["600036", 10]), json!({"amount": 200}));
        assert_eq!(a.get::<String>(0, "security").unwrap(), "600036");
        assert_eq!(a.get::<u32>(1, "amount").unwrap(), 200);
    }

    #[test]
    fn missing_and_invalid_are_distinguished() {
        let a = args(json!([]), json!({"price": "cheap"}));
        assert!(matches!(
            a.get::<f64>(0, "amount"),
            Err(ArgumentError::Missing { index: 0, .. })
        ));
        assert!(matches!(
            a.get::<f64>(1, "price"),
            Err(ArgumentError::Invalid { .. })
        ));
    }

    #[test]
    fn null_is_absent() {
        let a = args(json!([null]), json!({}));
        assert_eq!(a.opt::<i64>(0, "x").unwrap(), None);
        assert_eq!(a.get_or(0, "x", 7i64).unwrap(), 7);
    }
}
