//! Declared topic -> required-permission table gating `subscribe`.

use crate::types::Principal;

/// Topics a session may subscribe to, each requiring a permission the
/// wildcard `race.*` also satisfies via `race-data`.
const TOPIC_PERMISSIONS: &[(&str, &str)] = &[
    ("race.positions", "race-data"),
    ("race.gaps", "race-data"),
    ("race.weather", "race-data"),
    ("race.tactical-events", "race-data"),
    ("race.splits", "race-data"),
    ("race.status", "race-data"),
    ("team.tactics", "team-data"),
    ("rider.performance", "rider-data"),
    ("notifications.alerts", "realtime-access"),
    ("system.status", "realtime-access"),
];

/// `true` if `topic` is one of the known, literal wire-protocol topics.
pub fn is_known_topic(topic: &str) -> bool {
    TOPIC_PERMISSIONS.iter().any(|(t, _)| *t == topic)
}

fn required_permission(topic: &str) -> Option<&'static str> {
    TOPIC_PERMISSIONS.iter().find(|(t, _)| *t == topic).map(|(_, perm)| *perm)
}

/// `true` if `principal` may subscribe to `topic`: admins bypass the
/// table entirely, everyone else needs the topic's declared permission,
/// or `race-data` for any `race.*` topic (the wildcard grant).
pub fn authorize(principal: &Principal, topic: &str) -> bool {
    if principal.is_admin() {
        return true;
    }
    if topic.starts_with("race.") && principal.has("race-data") {
        return true;
    }
    match required_permission(topic) {
        Some(perm) => principal.has(perm),
        None => false,
    }
}

/// Splits requested topics into (valid-and-authorized, invalid-or-unauthorized).
pub fn partition_topics(principal: &Principal, requested: &[String]) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for topic in requested {
        if is_known_topic(topic) && authorize(principal, topic) {
            valid.push(topic.clone());
        } else {
            invalid.push(topic.clone());
        }
    }
    (valid, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn principal_with(perms: &[&str]) -> Principal {
        Principal {
            id: "p1".into(),
            permissions: perms.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        }
    }

    #[test]
    fn race_data_permission_authorizes_any_race_topic() {
        let p = principal_with(&["race-data"]);
        assert!(authorize(&p, "race.positions"));
        assert!(authorize(&p, "race.tactical-events"));
        assert!(!authorize(&p, "team.tactics"));
    }

    #[test]
    fn admin_bypasses_the_table() {
        let p = principal_with(&["admin"]);
        assert!(authorize(&p, "team.tactics"));
        assert!(authorize(&p, "rider.performance"));
    }

    #[test]
    fn unknown_topic_is_rejected_even_for_admin() {
        let p = principal_with(&["admin"]);
        let (valid, invalid) = partition_topics(&p, &["race.positions".into(), "bogus.topic".into()]);
        assert_eq!(valid, vec!["race.positions".to_string()]);
        assert_eq!(invalid, vec!["bogus.topic".to_string()]);
    }

    #[test]
    fn missing_permission_is_rejected() {
        let p = principal_with(&["realtime-access"]);
        let (valid, invalid) = partition_topics(&p, &["team.tactics".into()]);
        assert!(valid.is_empty());
        assert_eq!(invalid, vec!["team.tactics".to_string()]);
    }
}
