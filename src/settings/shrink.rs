//! Commit gate for resource resizes
//!
//! A resource may grow but never shrink below a size any endpoint already
//! committed. The check runs after a successful prepare, against the
//! configurations the endpoints reported during discovery.

use crate::client::decider::{CommitDecision, Discovered, NomadDecider};
use crate::common::format_bytes;
use crate::settings::change::ConfigChange;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceShrinkDecider;

impl NomadDecider<ConfigChange> for ResourceShrinkDecider {
    fn should_do_commit(
        &self,
        change: &ConfigChange,
        endpoints: &[String],
        prepared: &BTreeSet<String>,
        discovered: &Discovered<ConfigChange>,
    ) -> CommitDecision {
        if !self.is_prepare_successful(endpoints, prepared) {
            return CommitDecision::Veto(format!(
                "{} of {} endpoints prepared",
                prepared.len(),
                endpoints.len()
            ));
        }

        let ConfigChange::ResizeResource { name, bytes } = change else {
            return CommitDecision::Commit;
        };
        for (endpoint, response) in discovered {
            let existing = response
                .current_config
                .as_ref()
                .and_then(|config| config.resource(name));
            if let Some(existing) = existing {
                if *bytes < existing {
                    return CommitDecision::Veto(format!(
                        "resource {} would shrink from {} to {} on {}",
                        name,
                        format_bytes(existing),
                        format_bytes(*bytes),
                        endpoint
                    ));
                }
            }
        }
        CommitDecision::Commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DiscoverResponse, NomadMode};
    use crate::settings::ClusterConfig;

    fn discovered(offheap: Option<u64>) -> Discovered<ConfigChange> {
        let mut config = ClusterConfig {
            cluster_name: "tc".into(),
            activated: true,
            ..Default::default()
        };
        if let Some(bytes) = offheap {
            config.resources.insert("offheap".into(), bytes);
        }
        let response = DiscoverResponse {
            mode: NomadMode::Accepting,
            mutative_message_count: 2,
            last_mutation_host: None,
            last_mutation_user: None,
            last_mutation_timestamp: None,
            current_version: 1,
            highest_version: 1,
            latest_change: None,
            change_history: Vec::new(),
            current_config: Some(config),
        };
        [("a".to_string(), response)].into_iter().collect()
    }

    fn resize(bytes: u64) -> ConfigChange {
        ConfigChange::ResizeResource {
            name: "offheap".into(),
            bytes,
        }
    }

    #[test]
    fn test_shrink_is_vetoed() {
        let endpoints = vec!["a".to_string()];
        let prepared: BTreeSet<String> = endpoints.iter().cloned().collect();
        let decider = ResourceShrinkDecider;

        match decider.should_do_commit(&resize(100), &endpoints, &prepared, &discovered(Some(200))) {
            CommitDecision::Veto(reason) => assert!(reason.contains("would shrink")),
            other => panic!("expected veto, got {:?}", other),
        }
        assert_eq!(
            decider.should_do_commit(&resize(300), &endpoints, &prepared, &discovered(Some(200))),
            CommitDecision::Commit
        );
        assert_eq!(
            decider.should_do_commit(&resize(100), &endpoints, &prepared, &discovered(None)),
            CommitDecision::Commit
        );
    }

    #[test]
    fn test_incomplete_prepare_is_vetoed() {
        let endpoints = vec!["a".to_string(), "b".to_string()];
        let prepared: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        assert!(matches!(
            ResourceShrinkDecider.should_do_commit(&resize(300), &endpoints, &prepared, &discovered(None)),
            CommitDecision::Veto(_)
        ));
    }
}
