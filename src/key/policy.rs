//! Key policy documents
//!
//! Policies are stored and returned verbatim. Only their shape is checked here;
//! evaluating them is left to whoever owns authorization above this service.

use crate::error::{Error, Result};
use crate::key::arn::ResourceScope;
use serde_json::Value;

/// The only policy name a key carries
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Largest accepted policy document, in bytes
pub const MAX_POLICY_SIZE: usize = 32 * 1024;

/// Checks that `document` is a well-formed key policy
///
/// A policy is a JSON object with a non-empty `Statement` array, and every
/// statement names an `Effect` of `Allow` or `Deny`.
pub fn validate_policy(document: &str) -> Result<()> {
    if document.len() > MAX_POLICY_SIZE {
        return Err(Error::MalformedPolicy(format!(
            "policy is {} bytes, the limit is {}",
            document.len(),
            MAX_POLICY_SIZE
        )));
    }

    let value: Value = serde_json::from_str(document)
        .map_err(|e| Error::MalformedPolicy(format!("policy is not valid JSON: {}", e)))?;

    let statements = value
        .as_object()
        .ok_or_else(|| Error::MalformedPolicy("policy must be a JSON object".into()))?
        .get("Statement")
        .and_then(Value::as_array)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::MalformedPolicy("policy needs a non-empty Statement list".into()))?;

    for (i, statement) in statements.iter().enumerate() {
        match statement.get("Effect").and_then(Value::as_str) {
            Some("Allow") | Some("Deny") => {}
            _ => {
                return Err(Error::MalformedPolicy(format!(
                    "statement {} must have an Effect of Allow or Deny",
                    i
                )))
            }
        }
    }
    Ok(())
}

/// Builds the policy a key gets when its creator supplies none
pub fn default_policy(scope: &ResourceScope) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Id": "key-default-1",
        "Statement": [{
            "Sid": "Enable IAM User Permissions",
            "Effect": "Allow",
            "Principal": { "AWS": scope.root_principal().as_str() },
            "Action": "kms:*",
            "Resource": "*"
        }]
    })
    .to_string()
}
