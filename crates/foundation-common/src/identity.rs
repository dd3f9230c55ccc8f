//! Decoding of the user identity carried on action annotations

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::crd::{USER_GROUP_ANNOTATION, USER_IDENTITY_ANNOTATION};

/// The user and groups an action should be executed as
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserIdentity {
    /// Impersonated user name
    pub user: String,
    /// Impersonated groups, already rewritten
    pub groups: Vec<String>,
}

impl UserIdentity {
    /// Read the identity from object annotations
    ///
    /// Returns None when the user annotation is absent, undecodable, or empty.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        let user = annotations
            .get(USER_IDENTITY_ANNOTATION)
            .and_then(|v| decode(v))
            .filter(|u| !u.is_empty())?;
        let groups = annotations
            .get(USER_GROUP_ANNOTATION)
            .and_then(|v| decode(v))
            .map(|g| rewrite_groups(&g))
            .unwrap_or_default();
        Some(Self { user, groups })
    }
}

fn decode(value: &str) -> Option<String> {
    let bytes = STANDARD.decode(value.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Rewrite a comma-separated group list
///
/// `icp:{team}:{role}` becomes `mcm::{team}`, `system:*` passes through,
/// and anything else is dropped.
pub fn rewrite_groups(groups: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for group in groups.split(',').map(str::trim).filter(|g| !g.is_empty()) {
        let rewritten = if let Some(rest) = group.strip_prefix("icp:") {
            match rest.split(':').next() {
                Some(team) if !team.is_empty() => format!("mcm::{team}"),
                _ => continue,
            }
        } else if group.starts_with("system:") {
            group.to_string()
        } else {
            continue;
        };
        if !out.contains(&rewritten) {
            out.push(rewritten);
        }
    }
    out
}
