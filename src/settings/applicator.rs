//! Validation and application of [`ConfigChange`]s on one server

use crate::common::{Error, Result};
use crate::protocol::{ChangeApplicator, PotentialApplication};
use crate::settings::change::{ClusterConfig, ConfigChange};

#[derive(Debug, Default, Clone, Copy)]
pub struct SettingsApplicator;

impl SettingsApplicator {
    pub fn new() -> Self {
        Self
    }

    /// New configuration, or the reason the change does not apply
    fn next(
        &self,
        existing: Option<&ClusterConfig>,
        change: &ConfigChange,
    ) -> std::result::Result<ClusterConfig, String> {
        let mut config = existing.cloned().unwrap_or_default();

        if let ConfigChange::Activate { cluster_name } = change {
            if config.activated {
                return Err(format!("cluster {} is already activated", config.cluster_name));
            }
            if cluster_name.trim().is_empty() {
                return Err("cluster name must not be empty".into());
            }
            config.cluster_name = cluster_name.clone();
            config.activated = true;
            return Ok(config);
        }

        if !config.activated {
            return Err("cluster is not activated".into());
        }
        match change {
            ConfigChange::Activate { .. } => {}
            ConfigChange::SetSetting { name, value } => {
                check_name(name)?;
                config.settings.insert(name.clone(), value.clone());
            }
            ConfigChange::UnsetSetting { name } => {
                if config.settings.remove(name).is_none() {
                    return Err(format!("setting {} is not set", name));
                }
            }
            ConfigChange::ResizeResource { name, bytes } => {
                check_name(name)?;
                if *bytes == 0 {
                    return Err(format!("resource {} must have a positive size", name));
                }
                config.resources.insert(name.clone(), *bytes);
            }
        }
        Ok(config)
    }
}

fn check_name(name: &str) -> std::result::Result<(), String> {
    if name.trim().is_empty() {
        Err("name must not be empty".into())
    } else {
        Ok(())
    }
}

impl ChangeApplicator<ConfigChange> for SettingsApplicator {
    fn try_apply(&self, existing: Option<&ClusterConfig>, change: &ConfigChange) -> PotentialApplication {
        match self.next(existing, change) {
            Ok(_) => PotentialApplication::Allowed,
            Err(reason) => PotentialApplication::reject(reason),
        }
    }

    fn apply(&self, existing: Option<&ClusterConfig>, change: &ConfigChange) -> Result<ClusterConfig> {
        self.next(existing, change).map_err(Error::Apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activated() -> ClusterConfig {
        SettingsApplicator
            .apply(
                None,
                &ConfigChange::Activate {
                    cluster_name: "tc".into(),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_activation_only_once() {
        let config = activated();
        assert!(config.activated);
        assert_eq!(config.cluster_name, "tc");

        let again = SettingsApplicator.try_apply(
            Some(&config),
            &ConfigChange::Activate {
                cluster_name: "other".into(),
            },
        );
        assert_eq!(
            again,
            PotentialApplication::Rejected("cluster tc is already activated".into())
        );
    }

    #[test]
    fn test_settings_require_activation() {
        let change = ConfigChange::SetSetting {
            name: "lease-time".into(),
            value: "20s".into(),
        };
        assert!(!SettingsApplicator.try_apply(None, &change).is_allowed());
        assert!(matches!(
            SettingsApplicator.apply(None, &change),
            Err(Error::Apply(_))
        ));

        let config = SettingsApplicator.apply(Some(&activated()), &change).unwrap();
        assert_eq!(config.setting("lease-time"), Some("20s"));
    }

    #[test]
    fn test_unset_unknown_setting_is_rejected() {
        let change = ConfigChange::UnsetSetting {
            name: "lease-time".into(),
        };
        assert!(!SettingsApplicator
            .try_apply(Some(&activated()), &change)
            .is_allowed());
    }

    #[test]
    fn test_resize_validation() {
        let config = activated();
        let zero = ConfigChange::ResizeResource {
            name: "offheap".into(),
            bytes: 0,
        };
        assert!(!SettingsApplicator.try_apply(Some(&config), &zero).is_allowed());

        let blank = ConfigChange::ResizeResource {
            name: " ".into(),
            bytes: 10,
        };
        assert!(!SettingsApplicator.try_apply(Some(&config), &blank).is_allowed());

        let ok = ConfigChange::ResizeResource {
            name: "offheap".into(),
            bytes: 1 << 30,
        };
        let config = SettingsApplicator.apply(Some(&config), &ok).unwrap();
        assert_eq!(config.resource("offheap"), Some(1 << 30));
    }
}
