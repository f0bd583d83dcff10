//! Explicit per-module parameter registry.
//!
//! Replaces ad-hoc attribute reflection with a declared map of
//! `name -> ParameterSpec`. Assignments of the wrong kind are rejected with
//! a warning; assigning an equal value is a no-op and must not trigger
//! re-propagation.

use std::collections::BTreeMap;

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntList(Vec<i64>),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Bool(_) => ParamKind::Bool,
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::Str(_) => ParamKind::Str,
            ParamValue::IntList(_) => ParamKind::IntList,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            ParamValue::IntList(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    Str,
    IntList,
}

#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub kind: ParamKind,
    pub default: Option<ParamValue>,
    pub required: bool,
    pub value: Option<ParamValue>,
}

/// Result of a single parameter assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Changed,
    Unchanged,
    Rejected,
}

#[derive(Debug, Default)]
pub struct ParamRegistry {
    module_name: String,
    specs: BTreeMap<String, ParameterSpec>,
}

impl ParamRegistry {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            specs: BTreeMap::new(),
        }
    }

    pub fn declare(&mut self, name: &str, kind: ParamKind, default: Option<ParamValue>, required: bool) {
        if let Some(d) = &default {
            debug_assert_eq!(d.kind(), kind);
        }
        self.specs.insert(
            name.to_string(),
            ParameterSpec {
                kind,
                value: default.clone(),
                default,
                required,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.specs.get(name).and_then(|s| s.value.clone())
    }

    /// Assign one parameter. Unknown keys and kind mismatches are rejected
    /// with a warning; equal values are kept without counting as a change.
    pub fn set(&mut self, name: &str, value: ParamValue) -> SetOutcome {
        let Some(spec) = self.specs.get_mut(name) else {
            warn!("[{}] cannot configure unknown parameter {:?}", self.module_name, name);
            return SetOutcome::Rejected;
        };
        if value.kind() != spec.kind {
            warn!(
                "[{}] parameter {:?} expects {:?} but got {:?}",
                self.module_name,
                name,
                spec.kind,
                value.kind()
            );
            return SetOutcome::Rejected;
        }
        if spec.value.as_ref() == Some(&value) {
            debug!("[{}] kept {} unchanged", self.module_name, name);
            return SetOutcome::Unchanged;
        }
        debug!("[{}] updated {} to {:?}", self.module_name, name, value);
        spec.value = Some(value);
        SetOutcome::Changed
    }

    /// Names of required parameters that still have no value.
    pub fn unset_required(&self) -> Vec<String> {
        self.specs
            .iter()
            .filter(|(_, s)| s.required && s.value.is_none())
            .map(|(n, _)| n.clone())
            .collect()
    }
}
