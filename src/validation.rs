//! Per-field validity tracking and the input validators used by the forms.

use crate::error::{WizardError, WizardResult};
use crate::model::FieldStatus;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Untouched fields never block a form; only fields recorded invalid do.
pub const UNKNOWN_IS_PASSABLE: bool = true;

/// Value a dropdown reports while nothing has been picked yet.
pub const PLACEHOLDER_OPTION: &str = "noopt";

pub type Validator = fn(&str) -> WizardResult<()>;

/// Holds the latest validity of every registered input of one form.
#[derive(Debug, Clone, Default)]
pub struct FieldValidityLedger {
    text: BTreeMap<String, FieldStatus>,
    selections: BTreeMap<String, Option<String>>,
    form_valid: bool,
    revision: u64,
}

impl FieldValidityLedger {
    pub fn new() -> Self {
        let mut ledger = Self::default();
        ledger.rederive();
        ledger
    }

    /// Register a text field. Whether an empty value is acceptable is up to the
    /// form's validator; the ledger only sees the verdict.
    pub fn register_text(&mut self, name: &str) {
        self.text.insert(name.to_string(), FieldStatus::Unknown);
        self.rederive();
    }

    /// Register a required selection-style field with its current value.
    pub fn register_selection(&mut self, name: &str, value: Option<&str>) {
        self.selections
            .insert(name.to_string(), value.map(str::to_string));
        self.rederive();
    }

    /// Store the latest validity for a text field. Unregistered names are ignored.
    pub fn record(&mut self, name: &str, is_valid: bool) -> bool {
        match self.text.get_mut(name) {
            Some(status) => {
                *status = if is_valid {
                    FieldStatus::Valid
                } else {
                    FieldStatus::Invalid
                };
            }
            None => {
                tracing::debug!(field = name, "ignoring validity for unregistered field");
            }
        }
        self.rederive()
    }

    /// Store the current value of a selection field. Unregistered names are ignored.
    pub fn select(&mut self, name: &str, value: &str) -> bool {
        if let Some(slot) = self.selections.get_mut(name) {
            *slot = Some(value.to_string());
        }
        self.rederive()
    }

    pub fn status(&self, name: &str) -> Option<FieldStatus> {
        self.text.get(name).copied()
    }

    pub fn is_selection(&self, name: &str) -> bool {
        self.selections.contains_key(name)
    }

    pub fn is_form_valid(&self) -> bool {
        self.form_valid
    }

    /// Incremented on every re-derivation of the aggregate.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn rederive(&mut self) -> bool {
        let text_ok = self.text.values().all(|s| status_passes(*s));
        let selections_ok = self
            .selections
            .values()
            .all(|v| !is_placeholder(v.as_deref()));
        self.form_valid = text_ok && selections_ok;
        self.revision += 1;
        self.form_valid
    }
}

fn status_passes(status: FieldStatus) -> bool {
    match status {
        FieldStatus::Valid => true,
        FieldStatus::Unknown => UNKNOWN_IS_PASSABLE,
        FieldStatus::Invalid => false,
    }
}

pub fn is_placeholder(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v.is_empty() || v == PLACEHOLDER_OPTION,
    }
}

pub fn ipv4_address(value: &str) -> WizardResult<()> {
    value
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| WizardError::Validation(format!("{value:?} is not an IPv4 address")))
}

/// Six hex octets separated consistently by `:` or `-`.
pub fn mac_address(value: &str) -> WizardResult<()> {
    let invalid = || WizardError::Validation(format!("{value:?} is not a MAC address"));
    let sep = if value.contains(':') { ':' } else { '-' };
    let octets: Vec<&str> = value.split(sep).collect();
    if octets.len() != 6 {
        return Err(invalid());
    }
    let ok = octets
        .iter()
        .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

pub fn non_empty(value: &str) -> WizardResult<()> {
    if value.trim().is_empty() {
        Err(WizardError::Validation("value is required".into()))
    } else {
        Ok(())
    }
}
