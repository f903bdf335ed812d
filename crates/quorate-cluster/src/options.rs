// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Operation options.
//!
//! Callers pass options as a free-form JSON object. Each operation accepts a
//! fixed subset of keys; anything else is rejected rather than ignored.

use std::fmt;

use quorate_core::{Error, InstanceAddress, Operation, Result};
use serde_json::Value;

/// A recognized option key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// `force`: proceed in states that otherwise deny the operation.
    Force,
    /// `rejoinInstances`: members to rejoin after a reboot.
    RejoinInstances,
    /// `removeInstances`: members to drop from the metadata after a reboot.
    RemoveInstances,
    /// `clearReadOnly`: clear super-read-only on the seed.
    ClearReadOnly,
    /// `mycnfPath`: option file for instance configuration.
    MycnfPath,
}

impl OptionKey {
    const ALL: [Self; 5] = [
        Self::Force,
        Self::RejoinInstances,
        Self::RemoveInstances,
        Self::ClearReadOnly,
        Self::MycnfPath,
    ];

    /// Returns the key as spelled by callers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Force => "force",
            Self::RejoinInstances => "rejoinInstances",
            Self::RemoveInstances => "removeInstances",
            Self::ClearReadOnly => "clearReadOnly",
            Self::MycnfPath => "mycnfPath",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the option keys `operation` accepts.
pub fn accepted_keys(operation: Operation) -> &'static [OptionKey] {
    match operation {
        Operation::RemoveInstance | Operation::Dissolve | Operation::DropMetadataSchema => {
            &[OptionKey::Force]
        }
        Operation::RebootClusterFromCompleteOutage => {
            &[OptionKey::RejoinInstances, OptionKey::RemoveInstances, OptionKey::ClearReadOnly]
        }
        Operation::ConfigureInstance => &[OptionKey::MycnfPath],
        _ => &[],
    }
}

/// Validated options of one operation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOptions {
    force: Option<bool>,
    rejoin_instances: Option<Vec<InstanceAddress>>,
    remove_instances: Option<Vec<InstanceAddress>>,
    clear_read_only: Option<bool>,
    mycnf_path: Option<String>,
}

impl OperationOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options for `operation` from a JSON value.
    ///
    /// `null` is treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for a non-object value, an unknown
    /// key, a key the operation does not accept, or a wrongly typed value.
    pub fn parse(operation: Operation, value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(Error::invalid_option(
                    "",
                    format!("options must be an object, got {}", json_kind(other)),
                ))
            }
        };

        let mut options = Self::default();
        for (name, value) in map {
            let key = OptionKey::parse(name)
                .ok_or_else(|| Error::invalid_option(name.as_str(), "unknown option"))?;
            match key {
                OptionKey::Force => options.force = Some(bool_value(key, value)?),
                OptionKey::ClearReadOnly => options.clear_read_only = Some(bool_value(key, value)?),
                OptionKey::RejoinInstances => {
                    options.rejoin_instances = Some(address_list(key, value)?)
                }
                OptionKey::RemoveInstances => {
                    options.remove_instances = Some(address_list(key, value)?)
                }
                OptionKey::MycnfPath => match value {
                    Value::String(path) => options.mycnf_path = Some(path.clone()),
                    other => {
                        return Err(Error::invalid_option(
                            key.name(),
                            format!("expected a string, got {}", json_kind(other)),
                        ))
                    }
                },
            }
        }

        options.ensure_accepted(operation)?;
        Ok(options)
    }

    /// Parses options for `operation` from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the string is not valid JSON or the
    /// options are rejected by [`OperationOptions::parse`].
    pub fn parse_str(operation: Operation, json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::invalid_option("", format!("malformed JSON: {}", e)))?;
        Self::parse(operation, &value)
    }

    /// Sets `force`.
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    /// Sets `rejoinInstances`.
    #[must_use]
    pub fn rejoin_instances(mut self, addresses: impl IntoIterator<Item = InstanceAddress>) -> Self {
        self.rejoin_instances = Some(addresses.into_iter().collect());
        self
    }

    /// Sets `removeInstances`.
    #[must_use]
    pub fn remove_instances(mut self, addresses: impl IntoIterator<Item = InstanceAddress>) -> Self {
        self.remove_instances = Some(addresses.into_iter().collect());
        self
    }

    /// Sets `clearReadOnly`.
    #[must_use]
    pub fn clear_read_only(mut self, clear: bool) -> Self {
        self.clear_read_only = Some(clear);
        self
    }

    /// Sets `mycnfPath`.
    #[must_use]
    pub fn mycnf_path(mut self, path: impl Into<String>) -> Self {
        self.mycnf_path = Some(path.into());
        self
    }

    /// Rejects options that `operation` does not accept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] naming the first unaccepted key.
    pub fn ensure_accepted(&self, operation: Operation) -> Result<()> {
        let accepted = accepted_keys(operation);
        match self.keys().into_iter().find(|k| !accepted.contains(k)) {
            Some(key) => Err(Error::invalid_option(
                key.name(),
                format!("not accepted by {}", operation),
            )),
            None => Ok(()),
        }
    }

    /// Keys that were set.
    pub fn keys(&self) -> Vec<OptionKey> {
        let mut keys = Vec::new();
        if self.force.is_some() {
            keys.push(OptionKey::Force);
        }
        if self.rejoin_instances.is_some() {
            keys.push(OptionKey::RejoinInstances);
        }
        if self.remove_instances.is_some() {
            keys.push(OptionKey::RemoveInstances);
        }
        if self.clear_read_only.is_some() {
            keys.push(OptionKey::ClearReadOnly);
        }
        if self.mycnf_path.is_some() {
            keys.push(OptionKey::MycnfPath);
        }
        keys
    }

    /// Value of `force` (false when unset).
    pub fn is_forced(&self) -> bool {
        self.force.unwrap_or(false)
    }

    /// Value of `clearReadOnly` (false when unset).
    pub fn clears_read_only(&self) -> bool {
        self.clear_read_only.unwrap_or(false)
    }

    /// Members listed in `rejoinInstances`.
    pub fn rejoin_list(&self) -> &[InstanceAddress] {
        self.rejoin_instances.as_deref().unwrap_or_default()
    }

    /// Members listed in `removeInstances`.
    pub fn remove_list(&self) -> &[InstanceAddress] {
        self.remove_instances.as_deref().unwrap_or_default()
    }

    /// Value of `mycnfPath`.
    pub fn mycnf(&self) -> Option<&str> {
        self.mycnf_path.as_deref()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn bool_value(key: OptionKey, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        Error::invalid_option(key.name(), format!("expected a boolean, got {}", json_kind(value)))
    })
}

fn address_list(key: OptionKey, value: &Value) -> Result<Vec<InstanceAddress>> {
    let items = value.as_array().ok_or_else(|| {
        Error::invalid_option(key.name(), format!("expected an array, got {}", json_kind(value)))
    })?;

    let mut addresses: Vec<InstanceAddress> = Vec::with_capacity(items.len());
    for item in items {
        let text = item.as_str().ok_or_else(|| {
            Error::invalid_option(
                key.name(),
                format!("expected host:port strings, got {}", json_kind(item)),
            )
        })?;
        let address: InstanceAddress = text
            .parse()
            .map_err(|e: Error| Error::invalid_option(key.name(), e.to_string()))?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_reboot_options() {
        let options = OperationOptions::parse(
            Operation::RebootClusterFromCompleteOutage,
            &json!({
                "rejoinInstances": ["db2:3306"],
                "removeInstances": ["db3:3306"],
                "clearReadOnly": true
            }),
        )
        .unwrap();
        assert_eq!(options.rejoin_list(), &["db2:3306".parse::<InstanceAddress>().unwrap()]);
        assert_eq!(options.remove_list(), &["db3:3306".parse::<InstanceAddress>().unwrap()]);
        assert!(options.clears_read_only());
        assert!(!options.is_forced());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = OperationOptions::parse(
            Operation::RebootClusterFromCompleteOutage,
            &json!({"invalidOpt": "foobar"}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOption { ref key, .. } if key == "invalidOpt"));
    }

    #[test]
    fn test_unaccepted_key_rejected() {
        let err =
            OperationOptions::parse(Operation::AddInstance, &json!({"force": true})).unwrap_err();
        assert!(matches!(err, Error::InvalidOption { ref key, .. } if key == "force"));

        let err = OperationOptions::new()
            .clear_read_only(true)
            .ensure_accepted(Operation::Dissolve)
            .unwrap_err();
        assert!(err.to_string().contains("clearReadOnly"));
        assert!(err.to_string().contains("dissolve"));
    }

    #[test]
    fn test_wrong_types_rejected() {
        let err = OperationOptions::parse(Operation::Dissolve, &json!({"force": "yes"}))
            .unwrap_err();
        assert!(err.to_string().contains("expected a boolean"));

        let err = OperationOptions::parse(
            Operation::RebootClusterFromCompleteOutage,
            &json!({"rejoinInstances": "db2:3306"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected an array"));

        let err = OperationOptions::parse(
            Operation::RebootClusterFromCompleteOutage,
            &json!({"rejoinInstances": ["not-an-address"]}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOption { .. }));

        assert!(OperationOptions::parse(Operation::Status, &json!([1])).is_err());
    }

    #[test]
    fn test_null_is_empty() {
        let options = OperationOptions::parse(Operation::Status, &Value::Null).unwrap();
        assert!(options.keys().is_empty());
    }

    #[test]
    fn test_parse_str() {
        let options =
            OperationOptions::parse_str(Operation::ConfigureInstance, r#"{"mycnfPath": "/etc/my.cnf"}"#)
                .unwrap();
        assert_eq!(options.mycnf(), Some("/etc/my.cnf"));
        assert!(OperationOptions::parse_str(Operation::ConfigureInstance, "{").is_err());
    }
}
