use std::fmt;

use crate::config::PatcherConfig;
use crate::errors::Result;
use crate::models::VersionId;
use crate::services::app_data::AppData;
use crate::services::control::PatchControl;
use crate::services::integrity::{check_version_integrity, IntegrityOptions};
use crate::services::local_metadata::InstalledState;
use crate::services::remote_metadata::RemoteMetaData;
use crate::services::repair::ContentRepairer;
use crate::services::status::GeneralStatusReporter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Already at the latest version.
    Empty,
    /// Wipe and install the full package of `version`.
    Content { version: VersionId },
    /// Apply every diff package in `from + 1..=to`.
    Diff { from: VersionId, to: VersionId },
    /// Restore the broken files of `version` in place.
    Repair { version: VersionId },
    /// Repair `from`, then apply the diffs up to `to`.
    RepairAndDiff { from: VersionId, to: VersionId },
}

impl UpdateStrategy {
    /// Strategy to run when this one cannot be carried out.
    pub fn fallback(&self) -> Option<UpdateStrategy> {
        match *self {
            UpdateStrategy::RepairAndDiff { to, .. } => Some(UpdateStrategy::Content { version: to }),
            UpdateStrategy::Repair { version } => Some(UpdateStrategy::Content { version }),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStrategy::Empty => write!(f, "empty"),
            UpdateStrategy::Content { version } => write!(f, "content {}", version),
            UpdateStrategy::Diff { from, to } => write!(f, "diff {} -> {}", from, to),
            UpdateStrategy::Repair { version } => write!(f, "repair {}", version),
            UpdateStrategy::RepairAndDiff { from, to } => {
                write!(f, "repair {} and diff -> {}", from, to)
            }
        }
    }
}

/// True when downloading every diff costs strictly fewer bytes than the content package.
pub fn choose_by_cost(diff_sizes: &[u64], content_size: u64) -> bool {
    let diff_cost = diff_sizes
        .iter()
        .fold(0u64, |total, size| total.saturating_add(*size));
    diff_cost < content_size
}

pub struct UpdateStrategyResolver<'a> {
    remote: &'a dyn RemoteMetaData,
    key_secret: Option<String>,
    check_integrity: bool,
    integrity: IntegrityOptions,
}

impl<'a> UpdateStrategyResolver<'a> {
    pub fn new(remote: &'a dyn RemoteMetaData, config: &PatcherConfig) -> Self {
        Self {
            remote,
            key_secret: config.key_secret.clone(),
            check_integrity: config.check_integrity,
            integrity: IntegrityOptions {
                check_sizes: config.check_file_sizes,
                check_hashes: config.check_file_hashes,
            },
        }
    }

    pub async fn resolve(
        &self,
        app_data: &AppData,
        control: &PatchControl,
        reporter: Option<&GeneralStatusReporter>,
    ) -> Result<UpdateStrategy> {
        let latest = self.remote.get_latest_version_id().await?;
        let installed = match app_data.metadata.installed_state() {
            InstalledState::NotInstalled => {
                tracing::info!("nothing installed, using content strategy for {}", latest);
                return Ok(UpdateStrategy::Content { version: latest });
            }
            InstalledState::Inconsistent => {
                tracing::warn!("installed files span several versions, reinstalling {}", latest);
                return Ok(UpdateStrategy::Content { version: latest });
            }
            InstalledState::Installed(version) => version,
        };

        if installed == latest {
            tracing::info!("version {} is already installed", installed);
            return Ok(UpdateStrategy::Empty);
        }
        if installed > latest {
            tracing::warn!(
                "installed version {} is newer than published {}, reinstalling",
                installed,
                latest
            );
            return Ok(UpdateStrategy::Content { version: latest });
        }

        if self.check_integrity {
            let summary = self.remote.get_content_summary(installed).await?;
            let integrity = check_version_integrity(
                installed,
                &summary,
                app_data,
                self.integrity,
                control,
                reporter,
            )?;
            if !integrity.is_ok() {
                for failure in integrity.failures(5) {
                    tracing::warn!("broken file {}: {:?}", failure.path, failure.status);
                }
                let resource = self
                    .remote
                    .get_content_package_resource(installed, self.key_secret.as_deref())
                    .await?;
                if ContentRepairer::is_supported(&summary, &resource)
                    && self.diffs_are_cheaper(installed, latest, control).await?
                {
                    tracing::info!("repairing {} before diffs up to {}", installed, latest);
                    return Ok(UpdateStrategy::RepairAndDiff {
                        from: installed,
                        to: latest,
                    });
                }
                return Ok(UpdateStrategy::Content { version: latest });
            }
        }

        if self.diffs_are_cheaper(installed, latest, control).await? {
            Ok(UpdateStrategy::Diff {
                from: installed,
                to: latest,
            })
        } else {
            tracing::info!("content strategy for {}: diffs are not cheaper", latest);
            Ok(UpdateStrategy::Content { version: latest })
        }
    }

    async fn diffs_are_cheaper(
        &self,
        installed: VersionId,
        latest: VersionId,
        control: &PatchControl,
    ) -> Result<bool> {
        let content_size = self.remote.get_content_summary(latest).await?.size;
        let mut diff_sizes = Vec::with_capacity((latest - installed) as usize);
        for version in installed + 1..=latest {
            control.check()?;
            diff_sizes.push(self.remote.get_diff_summary(version).await?.size);
        }
        let cheaper = choose_by_cost(&diff_sizes, content_size);
        tracing::debug!(
            "diffs {} -> {} cost {} bytes, content {} bytes",
            installed,
            latest,
            diff_sizes.iter().fold(0u64, |total, size| total.saturating_add(*size)),
            content_size
        );
        Ok(cheaper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentFile, ContentSummary, DiffSummary, RemoteResource};
    use crate::services::remote_metadata::fake::StaticRemote;
    use uuid::Uuid;

    fn app_data() -> AppData {
        let root = std::env::temp_dir().join(format!("otoshi-patcher-strategy-{}", Uuid::new_v4()));
        AppData::open(&root).expect("open app data")
    }

    fn content(size: u64, files: &[&str]) -> (ContentSummary, RemoteResource) {
        let summary = ContentSummary {
            size,
            files: files
                .iter()
                .map(|path| ContentFile {
                    path: path.to_string(),
                    hash: None,
                    size: None,
                })
                .collect(),
            ..Default::default()
        };
        (summary, RemoteResource::default())
    }

    fn diff(size: u64) -> (DiffSummary, RemoteResource) {
        let summary = DiffSummary {
            size,
            ..Default::default()
        };
        (summary, RemoteResource::default())
    }

    fn remote(latest: VersionId, content_size: u64, diffs: &[(VersionId, u64)]) -> StaticRemote {
        let mut remote = StaticRemote {
            latest,
            ..Default::default()
        };
        for version in 1..=latest {
            remote.contents.insert(version, content(content_size, &["app.bin"]));
        }
        for (version, size) in diffs {
            remote.diffs.insert(*version, diff(*size));
        }
        remote
    }

    fn install(data: &mut AppData, name: &str, version: VersionId) {
        let path = data.local.file_path(name).expect("path");
        std::fs::write(&path, b"installed").expect("write file");
        data.metadata.add_or_update_file(name, version).expect("register");
    }

    async fn resolve(remote: &StaticRemote, data: &AppData) -> UpdateStrategy {
        UpdateStrategyResolver::new(remote, &PatcherConfig::default())
            .resolve(data, &PatchControl::new(), None)
            .await
            .expect("resolve")
    }

    #[test]
    fn cost_boundary_is_strict() {
        assert!(!choose_by_cost(&[100, 100], 150));
        assert!(choose_by_cost(&[50, 50], 150));
        assert!(!choose_by_cost(&[75, 75], 150));
        assert!(!choose_by_cost(&[u64::MAX, 1], u64::MAX));
    }

    #[tokio::test]
    async fn picks_diff_when_cheaper() {
        let mut data = app_data();
        install(&mut data, "app.bin", 1);
        let remote = remote(3, 150, &[(2, 50), (3, 50)]);
        assert_eq!(resolve(&remote, &data).await, UpdateStrategy::Diff { from: 1, to: 3 });
    }

    #[tokio::test]
    async fn picks_content_when_diffs_cost_more() {
        let mut data = app_data();
        install(&mut data, "app.bin", 1);
        let remote = remote(3, 150, &[(2, 100), (3, 100)]);
        assert_eq!(resolve(&remote, &data).await, UpdateStrategy::Content { version: 3 });
    }

    #[tokio::test]
    async fn latest_installed_needs_nothing() {
        let mut data = app_data();
        install(&mut data, "app.bin", 3);
        let remote = remote(3, 150, &[]);
        assert_eq!(resolve(&remote, &data).await, UpdateStrategy::Empty);
    }

    #[tokio::test]
    async fn fresh_newer_and_mixed_installs_reinstall() {
        let remote = remote(3, 150, &[(2, 1), (3, 1)]);

        let data = app_data();
        assert_eq!(resolve(&remote, &data).await, UpdateStrategy::Content { version: 3 });

        let mut newer = app_data();
        install(&mut newer, "app.bin", 5);
        assert_eq!(resolve(&remote, &newer).await, UpdateStrategy::Content { version: 3 });

        let mut mixed = app_data();
        install(&mut mixed, "app.bin", 1);
        install(&mut mixed, "other.bin", 2);
        assert_eq!(resolve(&remote, &mixed).await, UpdateStrategy::Content { version: 3 });
    }

    #[tokio::test]
    async fn broken_install_falls_back_to_content() {
        let mut data = app_data();
        install(&mut data, "app.bin", 1);
        let mut remote = remote(3, 150, &[(2, 1), (3, 1)]);
        remote.contents.insert(1, content(150, &["app.bin", "missing.bin"]));
        assert_eq!(resolve(&remote, &data).await, UpdateStrategy::Content { version: 3 });

        let relaxed = PatcherConfig {
            check_integrity: false,
            ..PatcherConfig::default()
        };
        let strategy = UpdateStrategyResolver::new(&remote, &relaxed)
            .resolve(&data, &PatchControl::new(), None)
            .await
            .expect("resolve");
        assert_eq!(strategy, UpdateStrategy::Diff { from: 1, to: 3 });
    }

    #[tokio::test]
    async fn broken_pack1_install_is_repaired_before_diffs() {
        let mut data = app_data();
        install(&mut data, "app.bin", 1);
        let mut remote = remote(3, 150, &[(2, 1), (3, 1)]);
        let (mut summary, mut resource) = content(150, &["app.bin", "missing.bin"]);
        summary.compression_method = Some("pack1".to_string());
        resource.meta_urls = vec!["http://cdn.invalid/content-1.meta".to_string()];
        remote.contents.insert(1, (summary, resource));
        assert_eq!(
            resolve(&remote, &data).await,
            UpdateStrategy::RepairAndDiff { from: 1, to: 3 }
        );

        remote.diffs.insert(3, diff(500));
        assert_eq!(resolve(&remote, &data).await, UpdateStrategy::Content { version: 3 });
    }

    #[test]
    fn repair_strategies_fall_back_to_content() {
        assert_eq!(
            UpdateStrategy::RepairAndDiff { from: 1, to: 3 }.fallback(),
            Some(UpdateStrategy::Content { version: 3 })
        );
        assert_eq!(
            UpdateStrategy::Repair { version: 2 }.fallback(),
            Some(UpdateStrategy::Content { version: 2 })
        );
        assert_eq!(UpdateStrategy::Diff { from: 1, to: 2 }.fallback(), None);
        assert_eq!(UpdateStrategy::RepairAndDiff { from: 1, to: 3 }.to_string(), "repair 1 and diff -> 3");
    }
}
