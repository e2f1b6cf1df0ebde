//! Boundary validation for inbound verification payloads

use serde_json::Value;

use crate::config::Config;
use crate::error::{Result, VerifierError};
use crate::types::{VerificationLevel, VerificationRequest};

const REQUIRED_FIELDS: [&str; 5] = [
    "merkle_root",
    "nullifier_hash",
    "proof",
    "verification_level",
    "action",
];

/// Checks applied on top of field presence
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    pub enforce_hash_format: bool,
    pub allowed_actions: Vec<String>,
}

impl ValidationRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enforce_hash_format: config.enforce_hash_format,
            allowed_actions: config.allowed_actions.clone(),
        }
    }
}

/// `0x` followed by exactly 64 hex characters
pub fn is_valid_hash(hash: &str) -> bool {
    match hash.strip_prefix("0x") {
        Some(digits) => digits.len() == 64 && digits.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Turn a raw JSON body into a [`VerificationRequest`].
///
/// Every absent, empty or non-string field is reported in one
/// `MissingField` error so the client can fix them all at once.
pub fn validate_payload(payload: &Value, rules: &ValidationRules) -> Result<VerificationRequest> {
    let object = payload
        .as_object()
        .ok_or_else(|| VerifierError::InvalidPayload("expected a JSON object".to_string()))?;

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| non_empty_str(object.get(*field)).is_none())
        .collect();

    if !missing.is_empty() {
        return Err(VerifierError::MissingField(missing));
    }

    // Presence was checked above
    let field = |name: &str| non_empty_str(object.get(name)).unwrap_or_default().to_string();

    let merkle_root = field("merkle_root");
    let nullifier_hash = field("nullifier_hash");
    let proof = field("proof");
    let action = field("action");

    let verification_level = field("verification_level")
        .parse::<VerificationLevel>()
        .map_err(|reason| VerifierError::InvalidField {
            field: "verification_level",
            reason,
        })?;

    if rules.enforce_hash_format {
        for (name, value) in [("merkle_root", &merkle_root), ("nullifier_hash", &nullifier_hash)] {
            if !is_valid_hash(value) {
                return Err(VerifierError::InvalidField {
                    field: name,
                    reason: "expected 0x followed by 64 hex characters".to_string(),
                });
            }
        }
    }

    if !rules.allowed_actions.is_empty() && !rules.allowed_actions.contains(&action) {
        return Err(VerifierError::InvalidField {
            field: "action",
            reason: format!("action {} is not accepted by this relay", action),
        });
    }

    Ok(VerificationRequest {
        merkle_root,
        nullifier_hash,
        proof,
        verification_level,
        action,
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    const ROOT: &str = "0x2a7c09e8af01f39a87d89e9f0a9ba66fbf6fb304cc643051dd4ea24c4e9f7e8d";
    const NULLIFIER: &str = "0x1359a81e3a42dc1c34786cbefbcc672a3d730510dba7a3be9941b207b0cf52fa";

    fn valid_payload() -> Value {
        json!({
            "merkle_root": ROOT,
            "nullifier_hash": NULLIFIER,
            "proof": "0x0123abcd",
            "verification_level": "orb",
            "action": "verify-human",
        })
    }

    fn strict() -> ValidationRules {
        ValidationRules {
            enforce_hash_format: true,
            allowed_actions: vec![],
        }
    }

    #[test]
    fn test_valid_payload() {
        let request = assert_ok!(validate_payload(&valid_payload(), &strict()));
        assert_eq!(request.nullifier_hash, NULLIFIER);
        assert_eq!(request.verification_level, VerificationLevel::Orb);
        assert_eq!(request.action, "verify-human");
    }

    #[test]
    fn test_each_missing_field_is_reported() {
        for field in REQUIRED_FIELDS {
            let mut payload = valid_payload();
            payload.as_object_mut().unwrap().remove(field);

            match validate_payload(&payload, &strict()) {
                Err(VerifierError::MissingField(fields)) => assert_eq!(fields, vec![field]),
                other => panic!("expected MissingField for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_empty_and_non_string_fields_count_as_missing() {
        let mut payload = valid_payload();
        payload["proof"] = json!("");
        payload["action"] = json!("   ");
        payload["merkle_root"] = json!(42);
        payload["nullifier_hash"] = Value::Null;

        match validate_payload(&payload, &strict()) {
            Err(VerifierError::MissingField(fields)) => {
                assert_eq!(fields, vec!["merkle_root", "nullifier_hash", "proof", "action"])
            }
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_body() {
        let err = assert_err!(validate_payload(&json!(["merkle_root"]), &strict()));
        assert!(matches!(err, VerifierError::InvalidPayload(_)));
    }

    #[test]
    fn test_unknown_verification_level() {
        let mut payload = valid_payload();
        payload["verification_level"] = json!("phone");

        let err = assert_err!(validate_payload(&payload, &strict()));
        assert!(matches!(
            err,
            VerifierError::InvalidField { field: "verification_level", .. }
        ));
    }

    #[test]
    fn test_hash_shape() {
        assert!(is_valid_hash(ROOT));
        assert!(is_valid_hash(&ROOT.to_uppercase().replacen("0X", "0x", 1)));
        assert!(!is_valid_hash(&ROOT[2..]));
        assert!(!is_valid_hash(&ROOT[..65]));
        assert!(!is_valid_hash(&format!("{}0", ROOT)));
        assert!(!is_valid_hash(&format!("0x{}", "g".repeat(64))));
    }

    #[test]
    fn test_hash_shape_enforcement_is_optional() {
        let mut payload = valid_payload();
        payload["nullifier_hash"] = json!("not-a-hash");

        let err = assert_err!(validate_payload(&payload, &strict()));
        assert!(matches!(err, VerifierError::InvalidField { field: "nullifier_hash", .. }));

        let relaxed = ValidationRules::default();
        assert_ok!(validate_payload(&payload, &relaxed));
    }

    #[test]
    fn test_allowed_actions() {
        let rules = ValidationRules {
            enforce_hash_format: true,
            allowed_actions: vec!["login".to_string()],
        };

        let err = assert_err!(validate_payload(&valid_payload(), &rules));
        assert!(matches!(err, VerifierError::InvalidField { field: "action", .. }));

        let mut payload = valid_payload();
        payload["action"] = json!("login");
        assert_ok!(validate_payload(&payload, &rules));
    }
}
