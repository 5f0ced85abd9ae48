//! Edit form for a single server's details.
//!
//! The form works on its own draft copy of the entity; the caller's record is
//! only replaced when `done` hands back a valid draft.

use crate::error::{WizardError, WizardResult};
use crate::model::Entity;
use crate::validation::{self, FieldValidityLedger, Validator, PLACEHOLDER_OPTION};

struct TextInput {
    name: &'static str,
    required: bool,
    validate: Option<Validator>,
}

const TEXT_INPUTS: [TextInput; 5] = [
    TextInput {
        name: "ip-addr",
        required: true,
        validate: Some(validation::ipv4_address),
    },
    TextInput {
        name: "mac-addr",
        required: false,
        validate: Some(validation::mac_address),
    },
    TextInput {
        name: "ilo-ip",
        required: false,
        validate: Some(validation::ipv4_address),
    },
    TextInput {
        name: "ilo-user",
        required: false,
        validate: None,
    },
    TextInput {
        name: "ilo-password",
        required: false,
        validate: None,
    },
];

pub const SERVER_GROUP: &str = "server-group";
pub const NIC_MAPPING: &str = "nic-mapping";

pub struct ServerDetailsForm {
    draft: Entity,
    ledger: FieldValidityLedger,
    server_groups: Vec<String>,
    nic_mappings: Vec<String>,
}

impl ServerDetailsForm {
    pub fn new(source: &Entity, server_groups: Vec<String>, nic_mappings: Vec<String>) -> Self {
        let draft = source.clone();
        let mut ledger = FieldValidityLedger::new();
        for input in &TEXT_INPUTS {
            ledger.register_text(input.name);
        }
        ledger.register_selection(SERVER_GROUP, draft.attribute_str(SERVER_GROUP));
        ledger.register_selection(NIC_MAPPING, draft.attribute_str(NIC_MAPPING));
        Self {
            draft,
            ledger,
            server_groups,
            nic_mappings,
        }
    }

    /// Apply a text edit. Returns the aggregate form validity afterwards.
    ///
    /// Invalid values are recorded against the field but never written to the draft.
    pub fn input(&mut self, name: &str, value: &str) -> bool {
        let Some(input) = TEXT_INPUTS.iter().find(|i| i.name == name) else {
            return self.ledger.record(name, false);
        };
        let verdict = if value.is_empty() {
            if input.required {
                validation::non_empty(value)
            } else {
                Ok(())
            }
        } else {
            input.validate.map_or(Ok(()), |check| check(value))
        };
        if let Err(e) = &verdict {
            tracing::debug!(field = name, error = %e, "rejected server detail input");
        }
        let is_valid = verdict.is_ok();
        if is_valid {
            self.draft
                .attributes
                .insert(name.to_string(), value.to_string().into());
        }
        self.ledger.record(name, is_valid)
    }

    /// Pick a dropdown option. Unknown options are rejected; the placeholder clears the choice.
    pub fn select(&mut self, name: &str, value: &str) -> WizardResult<bool> {
        let options = match name {
            SERVER_GROUP => &self.server_groups,
            NIC_MAPPING => &self.nic_mappings,
            other => {
                return Err(WizardError::Validation(format!(
                    "{other} is not a selection field"
                )))
            }
        };
        if value != PLACEHOLDER_OPTION && !options.iter().any(|o| o == value) {
            return Err(WizardError::Validation(format!(
                "{value:?} is not a known {name}"
            )));
        }
        if value == PLACEHOLDER_OPTION {
            self.draft.attributes.remove(name);
        } else {
            self.draft
                .attributes
                .insert(name.to_string(), value.to_string().into());
        }
        Ok(self.ledger.select(name, value))
    }

    /// Options became available after the operator added a group or mapping.
    pub fn refresh_options(&mut self, server_groups: Vec<String>, nic_mappings: Vec<String>) {
        self.server_groups = server_groups;
        self.nic_mappings = nic_mappings;
    }

    pub fn is_valid(&self) -> bool {
        self.ledger.is_form_valid()
    }

    pub fn ledger(&self) -> &FieldValidityLedger {
        &self.ledger
    }

    pub fn draft(&self) -> &Entity {
        &self.draft
    }

    /// Commit: hand back the edited copy, or refuse while the form is invalid.
    pub fn done(self) -> WizardResult<Entity> {
        if !self.is_valid() {
            return Err(WizardError::Validation(format!(
                "server {} has invalid or missing details",
                self.draft.id
            )));
        }
        Ok(self.draft)
    }

    pub fn cancel(self) {}
}

pub fn mask_password(pass: Option<&str>) -> String {
    match pass {
        Some(p) if !p.is_empty() => "*".repeat(p.chars().count()),
        _ => String::new(),
    }
}

/// Read-only detail lines for a server, with the IPMI password masked.
pub fn detail_lines(entity: &Entity) -> Vec<(&'static str, String)> {
    let attr = |key: &str| entity.attribute_str(key).unwrap_or("").to_string();
    vec![
        ("ID", entity.id.clone()),
        ("Name", entity.name.clone().unwrap_or_default()),
        ("Role", attr("role")),
        ("IP Address", attr("ip-addr")),
        ("Server Group", attr(SERVER_GROUP)),
        ("NIC Mapping", attr(NIC_MAPPING)),
        ("MAC Address", attr("mac-addr")),
        ("IPMI IP Address", attr("ilo-ip")),
        ("IPMI Username", attr("ilo-user")),
        (
            "IPMI Password",
            mask_password(entity.attribute_str("ilo-password")),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compute_node() -> Entity {
        Entity::new("compute1")
            .with_attribute("ip-addr", "192.168.10.5")
            .with_attribute(SERVER_GROUP, "RACK1")
            .with_attribute("role", "COMPUTE-ROLE")
    }

    fn form() -> ServerDetailsForm {
        ServerDetailsForm::new(
            &compute_node(),
            vec!["RACK1".into(), "RACK2".into()],
            vec!["MY-2PORT".into()],
        )
    }

    #[test]
    fn missing_nic_mapping_blocks_done() {
        let f = form();
        assert!(!f.is_valid());
        assert!(f.done().is_err());
    }

    #[test]
    fn edits_stay_in_draft_until_done() {
        let source = compute_node();
        let mut f = form();
        assert!(!f.input("ip-addr", "192.168.10.77"));
        assert!(f.select(NIC_MAPPING, "MY-2PORT").unwrap());
        assert_eq!(source.attribute_str("ip-addr"), Some("192.168.10.5"));

        let committed = f.done().unwrap();
        assert_eq!(committed.attribute_str("ip-addr"), Some("192.168.10.77"));
        assert_eq!(committed.attribute_str(NIC_MAPPING), Some("MY-2PORT"));
        assert_eq!(committed.attribute_str("role"), Some("COMPUTE-ROLE"));
    }

    #[test]
    fn invalid_input_is_not_written() {
        let mut f = form();
        f.select(NIC_MAPPING, "MY-2PORT").unwrap();
        assert!(!f.input("mac-addr", "zz:zz"));
        assert_eq!(f.draft().attribute_str("mac-addr"), None);
        assert!(f.input("mac-addr", "8c:dc:d4:b5:c9:a2"));
        assert!(!f.input("ip-addr", ""));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut f = form();
        assert!(f.select(SERVER_GROUP, "RACK9").is_err());
        assert!(!f.select(SERVER_GROUP, PLACEHOLDER_OPTION).unwrap());
        assert_eq!(f.draft().attribute_str(SERVER_GROUP), None);
    }

    #[test]
    fn password_is_masked() {
        let e = compute_node().with_attribute("ilo-password", "secret");
        let lines = detail_lines(&e);
        let (_, masked) = lines.iter().find(|(k, _)| *k == "IPMI Password").unwrap();
        assert_eq!(masked, "******");
        assert_eq!(mask_password(None), "");
    }
}
