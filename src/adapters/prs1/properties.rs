//! `PROP.TXT` device identity file.
//!
//! Plain `key=value` lines; `#` and `;` start comments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceFamily, DeviceInfo};

/// File name of the properties file on the card
pub const PROPERTIES_FILE: &str = "PROP.TXT";

/// Model number to marketed product name
pub const MODEL_NAMES: &[(&str, &str)] = &[
    ("400P", "REMstar Plus (System One 60 Series)"),
    ("450P", "REMstar Pro (System One 60 Series)"),
    ("460P", "REMstar Auto (System One 60 Series)"),
    ("550P", "REMstar Pro (System One 60 Series)"),
    ("560P", "REMstar Auto (System One 60 Series)"),
    ("750P", "BiPAP Pro (System One 60 Series)"),
    ("760P", "BiPAP Auto (System One 60 Series)"),
];

/// Look up the product name for a model number.
pub fn product_name(model_number: &str) -> Option<&'static str> {
    MODEL_NAMES
        .iter()
        .find(|(model, _)| *model == model_number)
        .map(|(_, name)| *name)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub serial_number: Option<String>,
    pub model_number: Option<String>,
    pub family: Option<u8>,
    pub family_version: Option<u8>,
    pub data_format_version: Option<u8>,
    /// Keys we do not interpret
    pub extra: BTreeMap<String, String>,
}

impl DeviceProperties {
    pub fn parse(text: &str) -> Self {
        let mut props = DeviceProperties::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::debug!(line, "ignoring properties line without '='");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "SerialNumber" => props.serial_number = Some(value.to_string()),
                "ModelNumber" => props.model_number = Some(value.to_string()),
                "Family" => props.family = value.parse().ok(),
                "FamilyVersion" => props.family_version = value.parse().ok(),
                "DataFormatVersion" => props.data_format_version = value.parse().ok(),
                _ => {
                    props.extra.insert(key.to_string(), value.to_string());
                }
            }
        }
        props
    }

    pub fn to_device_info(&self) -> DeviceInfo {
        let model_number = self.model_number.clone().unwrap_or_default();
        let product_name = product_name(&model_number)
            .map(str::to_string)
            .unwrap_or_else(|| format!("System One {model_number}").trim().to_string());
        DeviceInfo {
            family: DeviceFamily::Prs1,
            model_number,
            product_name,
            serial_number: self.serial_number.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROP_TXT: &str = "\
# generated by the device
SerialNumber=P1234567890
ModelNumber=560P
Family=0
FamilyVersion=4
DataFormatVersion=2
; trailing comment
ProductType=0x35
garbage line
";

    #[test]
    fn test_parse_properties() {
        let props = DeviceProperties::parse(PROP_TXT);
        assert_eq!(props.serial_number.as_deref(), Some("P1234567890"));
        assert_eq!(props.model_number.as_deref(), Some("560P"));
        assert_eq!(props.family, Some(0));
        assert_eq!(props.family_version, Some(4));
        assert_eq!(props.data_format_version, Some(2));
        assert_eq!(props.extra.get("ProductType").map(String::as_str), Some("0x35"));
        assert_eq!(props.extra.len(), 1);
    }

    #[test]
    fn test_device_info_resolves_product_name() {
        let info = DeviceProperties::parse(PROP_TXT).to_device_info();
        assert_eq!(info.family, DeviceFamily::Prs1);
        assert_eq!(info.product_name, "REMstar Auto (System One 60 Series)");
        assert_eq!(info.serial_number, "P1234567890");
    }

    #[test]
    fn test_unknown_model() {
        assert_eq!(product_name("999X"), None);
        let info = DeviceProperties::parse("ModelNumber=999X").to_device_info();
        assert_eq!(info.product_name, "System One 999X");
    }
}
