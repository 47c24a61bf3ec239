use crate::catalog::{build_catalog, CatalogEntry};
use crate::config::BrokerConfig;
use crate::identity::{decode_package_reference, release_name_for, IdStrategy};
use crate::registry::{InstanceRegistry, PutOutcome, ServiceInstance};
use crate::state::{operation_state, OperationState};
use crate::BrokerError;
use chartbroker_release::{
    select_manager, InstallRequest, ReleaseError, ReleaseManager, UpgradeRequest, Values,
    DEFAULT_TIMEOUT,
};
use chartbroker_repo::{HttpFetcher, RepoHome, ResolveOptions, Resolver};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: Values,
    /// Platform context. `namespace` is required.
    #[serde(default)]
    pub context: Values,
    #[serde(default)]
    pub accepts_incomplete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    pub dashboard_url: String,
    #[serde(rename = "async")]
    pub is_async: bool,
    /// The same instance was already provisioned; nothing was installed.
    pub exists: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeprovisionRequest {
    pub instance_id: String,
    #[serde(default)]
    pub accepts_incomplete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeprovisionResponse {
    #[serde(rename = "async")]
    pub is_async: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub instance_id: String,
    pub service_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub parameters: Values,
    #[serde(default)]
    pub accepts_incomplete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    #[serde(rename = "async")]
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastOperationResponse {
    pub state: OperationState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindResponse {
    pub credentials: Values,
}

/// Broker-wide behaviour switches.
#[derive(Debug, Clone, Default)]
pub struct BrokerSettings {
    pub async_mode: bool,
    pub id_strategy: IdStrategy,
    pub resolve: ResolveOptions,
}

impl From<&BrokerConfig> for BrokerSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            async_mode: config.async_mode,
            id_strategy: config.id_strategy,
            resolve: config.resolve_options(),
        }
    }
}

/// Service broker over a chart repository home and a release manager.
///
/// Every call is an independent unit of work. The only shared mutable state
/// is the injected [`InstanceRegistry`].
pub struct Broker {
    resolver: Resolver,
    releases: Arc<dyn ReleaseManager>,
    registry: Arc<InstanceRegistry>,
    settings: BrokerSettings,
}

impl Broker {
    pub fn new(
        resolver: Resolver,
        releases: Arc<dyn ReleaseManager>,
        registry: Arc<InstanceRegistry>,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            resolver,
            releases,
            registry,
            settings,
        }
    }

    /// Broker with an HTTP fetcher, the configured release manager and an
    /// empty registry.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let home = RepoHome::new(config.home.clone());
        home.initialize()?;
        let releases: Arc<dyn ReleaseManager> = Arc::from(select_manager(&config.release_manager));
        info!(
            "broker home {} with {} release manager",
            config.home.display(),
            releases.name()
        );
        Ok(Self::new(
            Resolver::new(home, Box::new(HttpFetcher::new())),
            releases,
            Arc::new(InstanceRegistry::new()),
            BrokerSettings::from(config),
        ))
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn get_catalog(&self) -> Result<Vec<CatalogEntry>, BrokerError> {
        build_catalog(self.resolver.home(), self.settings.id_strategy)
    }

    /// Accepts every broker API version.
    pub fn validate_api_version(&self, version: &str) -> Result<(), BrokerError> {
        debug!("broker API version {version:?}");
        Ok(())
    }

    pub fn provision(&self, req: &ProvisionRequest) -> Result<ProvisionResponse, BrokerError> {
        let reference = self.package_for_service(&req.service_id)?;
        let namespace = req
            .context
            .get("namespace")
            .and_then(serde_json::Value::as_str)
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| BrokerError::MissingNamespace(req.instance_id.clone()))?
            .to_owned();
        let release_name = release_name_for(&req.instance_id)?;

        let instance = ServiceInstance {
            instance_id: req.instance_id.clone(),
            service_id: req.service_id.clone(),
            plan_id: req.plan_id.clone(),
            parameters: req.parameters.clone(),
            release_name: release_name.clone(),
            namespace: namespace.clone(),
            provisioning: true,
        };
        match self.registry.put(instance.clone()) {
            PutOutcome::Inserted => {}
            PutOutcome::Existing(existing) if !existing.matches(&instance) => {
                return Err(BrokerError::Conflict(req.instance_id.clone()));
            }
            PutOutcome::Existing(existing) if existing.provisioning => {
                if !self.is_async(req.accepts_incomplete) {
                    return Err(BrokerError::InProgress(req.instance_id.clone()));
                }
                info!("instance {} is still being provisioned", req.instance_id);
                return Ok(ProvisionResponse {
                    is_async: true,
                    ..ProvisionResponse::default()
                });
            }
            PutOutcome::Existing(_) => {
                info!("instance {} already provisioned", req.instance_id);
                return Ok(ProvisionResponse {
                    exists: true,
                    ..ProvisionResponse::default()
                });
            }
        }

        let installed = self.resolve(&reference).and_then(|chart_path| {
            self.releases
                .install(&InstallRequest {
                    chart_path,
                    namespace,
                    release_name,
                    values: req.parameters.clone(),
                    timeout: DEFAULT_TIMEOUT,
                })
                .map_err(BrokerError::from)
        });
        match installed {
            Ok(release) => {
                self.registry.complete(&req.instance_id);
                info!(
                    "provisioned {} as release {} ({} {}) in {}",
                    req.instance_id,
                    release.name,
                    release.chart.name,
                    release.chart.version,
                    release.namespace
                );
                Ok(ProvisionResponse {
                    dashboard_url: String::new(),
                    is_async: self.is_async(req.accepts_incomplete),
                    exists: false,
                })
            }
            Err(e) => {
                warn!("provision of {} failed: {e}", req.instance_id);
                self.registry.release_reservation(&req.instance_id);
                Err(e)
            }
        }
    }

    pub fn deprovision(
        &self,
        req: &DeprovisionRequest,
    ) -> Result<DeprovisionResponse, BrokerError> {
        let Some(instance) = self.registry.get(&req.instance_id) else {
            info!("instance {} is not provisioned, nothing to delete", req.instance_id);
            return Ok(DeprovisionResponse::default());
        };
        if instance.provisioning {
            return Err(BrokerError::InProgress(req.instance_id.clone()));
        }

        match self
            .releases
            .delete(&instance.release_name, true, DEFAULT_TIMEOUT)
        {
            Ok(release) => info!("deleted release {} for {}", release.name, req.instance_id),
            Err(ReleaseError::NotFound(_)) => {
                warn!("release {} already gone", instance.release_name);
            }
            Err(e) => return Err(e.into()),
        }
        self.registry.delete(&req.instance_id);
        Ok(DeprovisionResponse {
            is_async: self.is_async(req.accepts_incomplete),
        })
    }

    pub fn update(&self, req: &UpdateRequest) -> Result<UpdateResponse, BrokerError> {
        let previous = self.provisioned(&req.instance_id)?;
        let reference = self.package_for_service(&req.service_id)?;
        let chart_path = self.resolve(&reference)?;
        let release_name = previous.release_name.clone();

        match self.releases.history(&release_name, 1) {
            Ok(_) => {}
            Err(ReleaseError::NotFound(_)) => {
                return Err(BrokerError::NotFound(format!("release {release_name}")));
            }
            Err(e) => warn!("history of {release_name} unavailable: {e}"),
        }

        let release = self
            .releases
            .upgrade(&UpgradeRequest {
                release_name,
                chart_path,
                values: req.parameters.clone(),
                timeout: DEFAULT_TIMEOUT,
            })
            .map_err(|e| BrokerError::Upstream(format!("upgrade failed: {e}")))?;
        info!(
            "upgraded release {} to revision {}",
            release.name, release.revision
        );

        self.registry.replace(ServiceInstance {
            service_id: req.service_id.clone(),
            plan_id: req.plan_id.clone().unwrap_or(previous.plan_id),
            parameters: req.parameters.clone(),
            ..previous
        });
        Ok(UpdateResponse {
            is_async: self.is_async(req.accepts_incomplete),
        })
    }

    pub fn last_operation(&self, instance_id: &str) -> Result<LastOperationResponse, BrokerError> {
        let instance = self
            .registry
            .get(instance_id)
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id}")))?;
        if instance.provisioning {
            return Ok(LastOperationResponse {
                state: OperationState::InProgress,
            });
        }
        let release = self.releases.status(&instance.release_name)?;
        debug!("release {} is {}", release.name, release.status);
        Ok(LastOperationResponse {
            state: operation_state(release.status),
        })
    }

    pub fn bind(&self, instance_id: &str) -> Result<BindResponse, BrokerError> {
        let instance = self.provisioned(instance_id)?;
        Ok(BindResponse {
            credentials: instance.parameters,
        })
    }

    pub fn unbind(&self, instance_id: &str) -> Result<(), BrokerError> {
        debug!("unbind {instance_id}");
        Ok(())
    }

    fn is_async(&self, accepts_incomplete: bool) -> bool {
        accepts_incomplete && self.settings.async_mode
    }

    /// Registry record of an instance whose provision has completed.
    fn provisioned(&self, instance_id: &str) -> Result<ServiceInstance, BrokerError> {
        let instance = self
            .registry
            .get(instance_id)
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id}")))?;
        if instance.provisioning {
            return Err(BrokerError::InProgress(instance_id.to_owned()));
        }
        Ok(instance)
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, BrokerError> {
        Ok(self.resolver.resolve(reference, &self.settings.resolve)?)
    }

    /// Package reference behind a service id offered in the catalog.
    fn package_for_service(&self, service_id: &str) -> Result<String, BrokerError> {
        if self.settings.id_strategy == IdStrategy::Name {
            decode_package_reference(service_id)?;
        }
        let entry = self
            .get_catalog()?
            .into_iter()
            .find(|e| e.id == service_id)
            .ok_or_else(|| BrokerError::NotFound(format!("service {service_id}")))?;
        decode_package_reference(&entry.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartbroker_release::{MemoryReleaseManager, Release, StatusCode};
    use chartbroker_repo::{ChartVersion, IndexFile, RepositoriesFile, Repository};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Barrier;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        releases: Arc<MemoryReleaseManager>,
        broker: Broker,
    }

    /// Home whose catalog offers `team/app`, cached as a local chart directory.
    fn seeded_home(root: &Path) -> RepoHome {
        let home = RepoHome::new(root);
        home.initialize().unwrap();
        let mut repos = RepositoriesFile::new();
        repos.add(Repository::new("team", "https://charts.example.com/team"));
        repos.save(&home.repositories_file()).unwrap();
        let mut index = IndexFile::new();
        index.add(ChartVersion {
            name: "app".to_owned(),
            version: "1.0.0".to_owned(),
            digest: "d".repeat(64),
            urls: vec!["app-1.0.0.tgz".to_owned()],
            ..ChartVersion::default()
        });
        index.save(&home.cache_index("team")).unwrap();
        std::fs::create_dir_all(home.repository_dir().join("team/app")).unwrap();
        home
    }

    fn broker_over(
        root: &Path,
        releases: Arc<dyn ReleaseManager>,
        settings: BrokerSettings,
    ) -> Broker {
        Broker::new(
            Resolver::new(seeded_home(root), Box::new(HttpFetcher::new())),
            releases,
            Arc::new(InstanceRegistry::new()),
            settings,
        )
    }

    fn fixture(settings: BrokerSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let releases = Arc::new(MemoryReleaseManager::new());
        let broker = broker_over(dir.path(), releases.clone(), settings);
        Fixture {
            _dir: dir,
            releases,
            broker,
        }
    }

    /// Holds every install between two barriers so a test can act while the
    /// install is in flight.
    struct GatedReleases {
        inner: MemoryReleaseManager,
        entered: Barrier,
        proceed: Barrier,
    }

    impl GatedReleases {
        fn new() -> Self {
            Self {
                inner: MemoryReleaseManager::new(),
                entered: Barrier::new(2),
                proceed: Barrier::new(2),
            }
        }
    }

    impl ReleaseManager for GatedReleases {
        fn name(&self) -> &str {
            "gated"
        }

        fn install(&self, req: &InstallRequest) -> Result<Release, ReleaseError> {
            self.entered.wait();
            self.proceed.wait();
            self.inner.install(req)
        }

        fn delete(
            &self,
            name: &str,
            purge: bool,
            timeout: Duration,
        ) -> Result<Release, ReleaseError> {
            self.inner.delete(name, purge, timeout)
        }

        fn upgrade(&self, req: &UpgradeRequest) -> Result<Release, ReleaseError> {
            self.inner.upgrade(req)
        }

        fn status(&self, name: &str) -> Result<Release, ReleaseError> {
            self.inner.status(name)
        }

        fn history(&self, name: &str, max: usize) -> Result<Vec<Release>, ReleaseError> {
            self.inner.history(name, max)
        }
    }

    fn values(v: serde_json::Value) -> Values {
        match v {
            serde_json::Value::Object(map) => map,
            _ => Values::new(),
        }
    }

    fn provision_req(id: &str, size: &str) -> ProvisionRequest {
        ProvisionRequest {
            instance_id: id.to_owned(),
            service_id: "team.app".to_owned(),
            plan_id: "team.app".to_owned(),
            parameters: values(json!({ "size": size })),
            context: values(json!({ "namespace": "ns1" })),
            accepts_incomplete: true,
        }
    }

    #[test]
    fn provision_installs_and_records() {
        let f = fixture(BrokerSettings::default());
        let resp = f.broker.provision(&provision_req("i1", "small")).unwrap();
        assert!(!resp.exists);
        assert!(!resp.is_async);
        assert_eq!(resp.dashboard_url, "");
        assert_eq!(f.releases.count("install"), 1);
        let rec = f.broker.registry().get("i1").unwrap();
        assert_eq!(rec.namespace, "ns1");
        assert_eq!(rec.release_name, "i1");
    }

    #[test]
    fn provision_is_async_only_when_both_agree() {
        let f = fixture(BrokerSettings {
            async_mode: true,
            ..BrokerSettings::default()
        });
        assert!(f.broker.provision(&provision_req("i1", "small")).unwrap().is_async);
        let mut req = provision_req("i2", "small");
        req.accepts_incomplete = false;
        assert!(!f.broker.provision(&req).unwrap().is_async);
    }

    #[test]
    fn identical_provision_is_idempotent() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        let again = f.broker.provision(&provision_req("i1", "small")).unwrap();
        assert!(again.exists);
        assert_eq!(f.releases.count("install"), 1);
    }

    #[test]
    fn different_provision_conflicts() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        let err = f.broker.provision(&provision_req("i1", "large")).unwrap_err();
        assert!(matches!(err, BrokerError::Conflict(_)));
        assert_eq!(
            f.broker.registry().get("i1").unwrap().parameters["size"],
            "small"
        );
        assert_eq!(f.releases.count("install"), 1);
    }

    #[test]
    fn provision_requires_namespace() {
        let f = fixture(BrokerSettings::default());
        let mut req = provision_req("i1", "small");
        req.context = values(json!({ "namespace": 7 }));
        assert!(matches!(
            f.broker.provision(&req),
            Err(BrokerError::MissingNamespace(_))
        ));
        req.context = Values::new();
        assert!(matches!(
            f.broker.provision(&req),
            Err(BrokerError::MissingNamespace(_))
        ));
        assert!(f.broker.registry().is_empty());
    }

    #[test]
    fn provision_rejects_malformed_service_id() {
        let f = fixture(BrokerSettings::default());
        let mut req = provision_req("i1", "small");
        req.service_id = "app".to_owned();
        assert!(matches!(
            f.broker.provision(&req),
            Err(BrokerError::InvalidFormat(_))
        ));
    }

    #[test]
    fn provision_rejects_service_ids_outside_the_catalog() {
        let f = fixture(BrokerSettings::default());
        for service_id in [".etc.passwd", "team.missing", "other.app"] {
            let mut req = provision_req("i1", "small");
            req.service_id = service_id.to_owned();
            assert!(
                matches!(f.broker.provision(&req), Err(BrokerError::NotFound(_))),
                "{service_id} was accepted"
            );
        }
        assert!(f.broker.registry().is_empty());
        assert_eq!(f.releases.count("install"), 0);
    }

    #[test]
    fn repeat_during_failing_install_never_reports_exists() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedReleases::new());
        gated.inner.fail_next("cluster unreachable").unwrap();
        let broker = Arc::new(broker_over(dir.path(), gated.clone(), BrokerSettings::default()));

        let first = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.provision(&provision_req("i1", "small")))
        };
        gated.entered.wait();

        assert!(matches!(
            broker.provision(&provision_req("i1", "small")),
            Err(BrokerError::InProgress(_))
        ));
        assert!(matches!(
            broker.deprovision(&DeprovisionRequest {
                instance_id: "i1".to_owned(),
                accepts_incomplete: false,
            }),
            Err(BrokerError::InProgress(_))
        ));
        assert!(matches!(broker.bind("i1"), Err(BrokerError::InProgress(_))));
        assert_eq!(
            broker.last_operation("i1").unwrap().state,
            OperationState::InProgress
        );

        gated.proceed.wait();
        assert!(matches!(first.join().unwrap(), Err(BrokerError::Upstream(_))));
        assert!(broker.registry().get("i1").is_none());
        assert_eq!(gated.inner.count("delete"), 0);
    }

    #[test]
    fn async_repeat_during_install_is_accepted_not_existing() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedReleases::new());
        let broker = Arc::new(broker_over(
            dir.path(),
            gated.clone(),
            BrokerSettings {
                async_mode: true,
                ..BrokerSettings::default()
            },
        ));

        let first = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.provision(&provision_req("i1", "small")))
        };
        gated.entered.wait();

        let repeat = broker.provision(&provision_req("i1", "small")).unwrap();
        assert!(repeat.is_async);
        assert!(!repeat.exists);
        assert!(matches!(
            broker.provision(&provision_req("i1", "large")),
            Err(BrokerError::Conflict(_))
        ));

        gated.proceed.wait();
        first.join().unwrap().unwrap();
        assert!(!broker.registry().get("i1").unwrap().provisioning);
        assert!(broker.provision(&provision_req("i1", "small")).unwrap().exists);
        assert_eq!(gated.inner.count("install"), 1);
    }

    #[test]
    fn failed_install_releases_reservation() {
        let f = fixture(BrokerSettings::default());
        f.releases.fail_next("cluster unreachable").unwrap();
        let err = f.broker.provision(&provision_req("i1", "small")).unwrap_err();
        assert!(matches!(err, BrokerError::Upstream(_)));
        assert!(f.broker.registry().get("i1").is_none());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        assert!(f.broker.registry().get("i1").is_some());
    }

    #[test]
    fn deprovision_unknown_instance_succeeds() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        let resp = f
            .broker
            .deprovision(&DeprovisionRequest {
                instance_id: "nope".to_owned(),
                accepts_incomplete: true,
            })
            .unwrap();
        assert!(!resp.is_async);
        assert_eq!(f.broker.registry().len(), 1);
        assert_eq!(f.releases.count("delete"), 0);
    }

    #[test]
    fn deprovision_purges_and_forgets() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        f.broker
            .deprovision(&DeprovisionRequest {
                instance_id: "i1".to_owned(),
                accepts_incomplete: false,
            })
            .unwrap();
        assert!(f.broker.registry().is_empty());
        assert!(f.releases.status("i1").is_err());
    }

    #[test]
    fn deprovision_tolerates_missing_release() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        f.releases.delete("i1", true, DEFAULT_TIMEOUT).unwrap();
        f.broker
            .deprovision(&DeprovisionRequest {
                instance_id: "i1".to_owned(),
                accepts_incomplete: false,
            })
            .unwrap();
        assert!(f.broker.registry().is_empty());
    }

    #[test]
    fn deprovision_failure_keeps_record() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        f.releases.fail_next("timed out").unwrap();
        let err = f
            .broker
            .deprovision(&DeprovisionRequest {
                instance_id: "i1".to_owned(),
                accepts_incomplete: false,
            })
            .unwrap_err();
        assert!(matches!(err, BrokerError::Upstream(_)));
        assert!(f.broker.registry().get("i1").is_some());
    }

    #[test]
    fn update_upgrades_and_replaces_record() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        f.broker
            .update(&UpdateRequest {
                instance_id: "i1".to_owned(),
                service_id: "team.app".to_owned(),
                plan_id: None,
                parameters: values(json!({ "size": "large" })),
                accepts_incomplete: false,
            })
            .unwrap();
        assert_eq!(f.releases.count("upgrade"), 1);
        assert_eq!(f.releases.status("i1").unwrap().revision, 2);
        let rec = f.broker.registry().get("i1").unwrap();
        assert_eq!(rec.parameters["size"], "large");
        assert_eq!(rec.plan_id, "team.app");
    }

    #[test]
    fn update_of_missing_release_is_not_found() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        f.releases.delete("i1", true, DEFAULT_TIMEOUT).unwrap();
        let err = f
            .broker
            .update(&UpdateRequest {
                instance_id: "i1".to_owned(),
                service_id: "team.app".to_owned(),
                ..UpdateRequest::default()
            })
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
        assert_eq!(f.releases.count("upgrade"), 0);
    }

    #[test]
    fn update_of_unknown_instance_leaves_similar_release_alone() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        let err = f
            .broker
            .update(&UpdateRequest {
                instance_id: "I1".to_owned(),
                service_id: "team.app".to_owned(),
                parameters: values(json!({ "size": "huge" })),
                ..UpdateRequest::default()
            })
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
        assert_eq!(f.releases.count("upgrade"), 0);
        assert_eq!(f.releases.status("i1").unwrap().revision, 1);
        assert_eq!(
            f.broker.registry().get("i1").unwrap().parameters["size"],
            "small"
        );
    }

    #[test]
    fn update_failure_is_wrapped() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        f.releases.fail_next("bad values").unwrap();
        let err = f
            .broker
            .update(&UpdateRequest {
                instance_id: "i1".to_owned(),
                service_id: "team.app".to_owned(),
                ..UpdateRequest::default()
            })
            .unwrap_err();
        assert!(err.to_string().starts_with("upgrade failed: "));
        assert_eq!(
            f.broker.registry().get("i1").unwrap().parameters["size"],
            "small"
        );
    }

    #[test]
    fn last_operation_maps_release_status() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        assert_eq!(
            f.broker.last_operation("i1").unwrap().state,
            OperationState::Succeeded
        );
        f.releases.set_status("i1", StatusCode::PendingUpgrade).unwrap();
        assert_eq!(
            f.broker.last_operation("i1").unwrap().state,
            OperationState::InProgress
        );
        f.releases.set_status("i1", StatusCode::Failed).unwrap();
        assert_eq!(
            f.broker.last_operation("i1").unwrap().state,
            OperationState::Failed
        );
        assert!(matches!(
            f.broker.last_operation("nope"),
            Err(BrokerError::NotFound(_))
        ));
    }

    #[test]
    fn bind_returns_parameters() {
        let f = fixture(BrokerSettings::default());
        f.broker.provision(&provision_req("i1", "small")).unwrap();
        let bound = f.broker.bind("i1").unwrap();
        assert_eq!(bound.credentials["size"], "small");
        assert!(matches!(f.broker.bind("nope"), Err(BrokerError::NotFound(_))));
        f.broker.unbind("i1").unwrap();
        f.broker.validate_api_version("2.14").unwrap();
    }
}
