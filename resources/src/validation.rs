//! Field-scoped validation errors and the metadata checks shared by every
//! object kind.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::objects::{Labels, Metadata};

pub const DNS1123_LABEL_MAX_LENGTH: usize = 63;
pub const DNS1123_SUBDOMAIN_MAX_LENGTH: usize = 253;
pub const QUALIFIED_NAME_MAX_LENGTH: usize = 63;
pub const LABEL_VALUE_MAX_LENGTH: usize = 63;

const DNS1123_LABEL_ERR_MSG: &str = "a DNS-1123 label must consist of lower case alphanumeric \
                                     characters or '-', and must start and end with an \
                                     alphanumeric character";
const DNS1123_SUBDOMAIN_ERR_MSG: &str = "a DNS-1123 subdomain must consist of lower case \
                                         alphanumeric characters, '-' or '.', and must start and \
                                         end with an alphanumeric character";
const QUALIFIED_NAME_ERR_MSG: &str = "name part must consist of alphanumeric characters, '-', \
                                      '_' or '.', and must start and end with an alphanumeric \
                                      character";

/// Validates an object name, returning the reasons it is not acceptable.
pub type ValidateNameFn = fn(&str) -> Vec<String>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorType {
    #[strum(serialize = "Required value")]
    Required,
    #[strum(serialize = "Invalid value")]
    Invalid,
    #[strum(serialize = "Unsupported value")]
    NotSupported,
    #[strum(serialize = "Forbidden")]
    Forbidden,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub error_type: ErrorType,
    /// Path of the offending field, e.g. `metadata.name`.
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_value: Option<String>,
    pub detail: String,
}

impl FieldError {
    pub fn required(field: &str, detail: &str) -> Self {
        FieldError {
            error_type: ErrorType::Required,
            field: field.to_owned(),
            bad_value: None,
            detail: detail.to_owned(),
        }
    }

    pub fn invalid(field: &str, value: &str, detail: &str) -> Self {
        FieldError {
            error_type: ErrorType::Invalid,
            field: field.to_owned(),
            bad_value: Some(value.to_owned()),
            detail: detail.to_owned(),
        }
    }

    pub fn not_supported(field: &str, value: &str, valid: &[&str]) -> Self {
        FieldError {
            error_type: ErrorType::NotSupported,
            field: field.to_owned(),
            bad_value: Some(value.to_owned()),
            detail: format!("supported values: {}", valid.join(", ")),
        }
    }

    pub fn forbidden(field: &str, detail: &str) -> Self {
        FieldError {
            error_type: ErrorType::Forbidden,
            field: field.to_owned(),
            bad_value: None,
            detail: detail.to_owned(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.error_type)?;
        if let Some(value) = &self.bad_value {
            write!(f, ": {:?}", value)?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Ordered list of field errors. Empty means valid.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ErrorList(pub Vec<FieldError>);

impl ErrorList {
    pub fn new() -> Self {
        ErrorList(Vec::new())
    }

    pub fn push(&mut self, err: FieldError) {
        self.0.push(err);
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let errs = self
            .0
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "[{}]", errs)
    }
}

impl From<Vec<FieldError>> for ErrorList {
    fn from(errs: Vec<FieldError>) -> Self {
        ErrorList(errs)
    }
}

fn is_lower_alnum(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

fn is_dns1123_label_format(value: &str) -> bool {
    match (value.chars().next(), value.chars().last()) {
        (Some(first), Some(last)) => {
            is_lower_alnum(first)
                && is_lower_alnum(last)
                && value.chars().all(|c| is_lower_alnum(c) || c == '-')
        },
        _ => false,
    }
}

/// Lowercase alphanumerics and '-', starting and ending with an alphanumeric,
/// at most 63 characters.
pub fn is_dns1123_label(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_LABEL_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_LABEL_MAX_LENGTH
        ));
    }
    if !is_dns1123_label_format(value) {
        errs.push(DNS1123_LABEL_ERR_MSG.to_string());
    }
    errs
}

/// One or more DNS-1123 labels separated by '.', at most 253 characters.
pub fn is_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_SUBDOMAIN_MAX_LENGTH
        ));
    }
    if !value.split('.').all(is_dns1123_label_format) {
        errs.push(DNS1123_SUBDOMAIN_ERR_MSG.to_string());
    }
    errs
}

fn is_qualified_name_part(value: &str) -> bool {
    let alnum = |c: char| c.is_ascii_alphanumeric();
    match (value.chars().next(), value.chars().last()) {
        (Some(first), Some(last)) => {
            alnum(first)
                && alnum(last)
                && value
                    .chars()
                    .all(|c| alnum(c) || c == '-' || c == '_' || c == '.')
        },
        _ => false,
    }
}

/// `[prefix/]name` where prefix is a DNS-1123 subdomain and name is at most
/// 63 alphanumerics, '-', '_' or '.'.
pub fn is_qualified_name(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    let name = match value.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() {
                errs.push("prefix part must be non-empty".to_string());
            } else {
                errs.extend(
                    is_dns1123_subdomain(prefix)
                        .into_iter()
                        .map(|msg| format!("prefix part {}", msg)),
                );
            }
            name
        },
        None => value,
    };
    if name.is_empty() {
        errs.push("name part must be non-empty".to_string());
    } else {
        if name.len() > QUALIFIED_NAME_MAX_LENGTH {
            errs.push(format!(
                "name part must be no more than {} characters",
                QUALIFIED_NAME_MAX_LENGTH
            ));
        }
        if !is_qualified_name_part(name) {
            errs.push(QUALIFIED_NAME_ERR_MSG.to_string());
        }
    }
    errs
}

pub fn is_valid_label_value(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > LABEL_VALUE_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {} characters",
            LABEL_VALUE_MAX_LENGTH
        ));
    }
    if !value.is_empty() && !is_qualified_name_part(value) {
        errs.push(
            "a valid label must be an empty string or consist of alphanumeric characters, '-', \
             '_' or '.', and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

/// Minimal legality rule for object names.
pub fn name_is_dns_label(name: &str) -> Vec<String> {
    is_dns1123_label(name)
}

pub fn validate_labels(labels: &Labels, field: &str) -> ErrorList {
    let mut errs = ErrorList::new();
    for (key, value) in labels {
        for msg in is_qualified_name(key) {
            errs.push(FieldError::invalid(field, key, &msg));
        }
        for msg in is_valid_label_value(value) {
            errs.push(FieldError::invalid(field, value, &msg));
        }
    }
    errs
}

/// Validates name, namespace and labels of a new object.
/// Every problem found is reported.
pub fn validate_object_meta(
    meta: &Metadata,
    requires_namespace: bool,
    name_fn: ValidateNameFn,
) -> ErrorList {
    let mut errs = ErrorList::new();

    if meta.name.is_empty() {
        errs.push(FieldError::required("metadata.name", "name is required"));
    } else {
        for msg in name_fn(&meta.name) {
            errs.push(FieldError::invalid("metadata.name", &meta.name, &msg));
        }
    }

    if requires_namespace {
        if meta.namespace.is_empty() {
            errs.push(FieldError::required("metadata.namespace", ""));
        } else {
            for msg in is_dns1123_label(&meta.namespace) {
                errs.push(FieldError::invalid(
                    "metadata.namespace",
                    &meta.namespace,
                    &msg,
                ));
            }
        }
    } else if !meta.namespace.is_empty() {
        errs.push(FieldError::forbidden(
            "metadata.namespace",
            "not allowed on this type",
        ));
    }

    errs.extend(validate_labels(&meta.labels, "metadata.labels"));
    errs
}

/// Reports changes to fields that cannot be updated.
pub fn validate_object_meta_update(new: &Metadata, old: &Metadata) -> ErrorList {
    let mut errs = ErrorList::new();
    if new.name != old.name {
        errs.push(FieldError::invalid(
            "metadata.name",
            &new.name,
            "field is immutable",
        ));
    }
    if new.namespace != old.namespace {
        errs.push(FieldError::invalid(
            "metadata.namespace",
            &new.namespace,
            "field is immutable",
        ));
    }
    if new.uid.is_some() && new.uid != old.uid {
        let uid = new.uid.map(|u| u.to_string()).unwrap_or_default();
        errs.push(FieldError::invalid("metadata.uid", &uid, "field is immutable"));
    }
    if new.creation_timestamp.is_some() && new.creation_timestamp != old.creation_timestamp {
        let ts = new
            .creation_timestamp
            .map(|t| t.to_string())
            .unwrap_or_default();
        errs.push(FieldError::invalid(
            "metadata.creationTimestamp",
            &ts,
            "field is immutable",
        ));
    }
    errs
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn dns_labels() {
        assert!(is_dns1123_label("web-0").is_empty());
        assert!(is_dns1123_label("a").is_empty());
        assert_eq!(is_dns1123_label("-web").len(), 1);
        assert_eq!(is_dns1123_label("web-").len(), 1);
        assert_eq!(is_dns1123_label("Web").len(), 1);
        assert_eq!(is_dns1123_label("web_0").len(), 1);
        assert_eq!(is_dns1123_label("").len(), 1);
        assert_eq!(is_dns1123_label(&"a".repeat(64)).len(), 1);
    }

    #[test]
    fn qualified_names() {
        assert!(is_qualified_name("app").is_empty());
        assert!(is_qualified_name("example.com/App_Name").is_empty());
        assert!(!is_qualified_name("/app").is_empty());
        assert!(!is_qualified_name("example.com/").is_empty());
        assert!(!is_qualified_name("Example.com/app").is_empty());
        assert!(!is_qualified_name("-app").is_empty());
    }

    #[test]
    fn label_values() {
        assert!(is_valid_label_value("").is_empty());
        assert!(is_valid_label_value("v1.2_beta").is_empty());
        assert!(!is_valid_label_value("v1 beta").is_empty());
    }

    #[test]
    fn object_meta_accumulates_errors() {
        let mut meta = Metadata::new("Dev", "-bad");
        meta.labels = Labels::new().insert("-key", "ok");
        let errs = validate_object_meta(&meta, true, name_is_dns_label);
        let fields: Vec<_> = errs.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["metadata.name", "metadata.namespace", "metadata.labels"]
        );
    }

    #[test]
    fn object_meta_requires_name_and_namespace() {
        let errs = validate_object_meta(&Metadata::default(), true, name_is_dns_label);
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| e.error_type == ErrorType::Required));
    }

    #[test]
    fn cluster_scoped_forbids_namespace() {
        let errs = validate_object_meta(&Metadata::new("dev", "node-1"), false, name_is_dns_label);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.0[0].error_type, ErrorType::Forbidden);
    }

    #[test]
    fn immutable_metadata() {
        let mut old = Metadata::new("dev", "shop");
        old.uid = Some(Uuid::new_v4());
        let mut new = old.clone();
        assert!(validate_object_meta_update(&new, &old).is_empty());

        new.namespace = "prod".to_string();
        new.uid = Some(Uuid::new_v4());
        let errs = validate_object_meta_update(&new, &old);
        assert_eq!(errs.len(), 2);
        assert_eq!(errs.0[0].field, "metadata.namespace");
        assert_eq!(errs.0[1].field, "metadata.uid");
    }

    #[test]
    fn field_error_display() {
        let err = FieldError::invalid("metadata.name", "x", "too short");
        assert_eq!(err.to_string(), "metadata.name: Invalid value: \"x\": too short");
        let err = FieldError::required("metadata.namespace", "");
        assert_eq!(err.to_string(), "metadata.namespace: Required value");
    }
}
