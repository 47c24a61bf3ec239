use crate::{
    ChartRef, InstallRequest, Release, ReleaseError, ReleaseManager, StatusCode, UpgradeRequest,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    /// Revisions per release name, oldest first.
    releases: HashMap<String, Vec<Release>>,
    calls: Vec<String>,
    fail_next: Option<String>,
}

/// Release manager that keeps every release in memory.
///
/// Installs and upgrades land in `Deployed` unless a different settle status
/// is configured, which lets callers observe pending states.
pub struct MemoryReleaseManager {
    state: Mutex<State>,
    settle_status: StatusCode,
}

impl Default for MemoryReleaseManager {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            settle_status: StatusCode::Deployed,
        }
    }
}

impl MemoryReleaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status new installs and upgrades report until changed with [`set_status`](Self::set_status).
    #[must_use]
    pub fn with_settle_status(mut self, status: StatusCode) -> Self {
        self.settle_status = status;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, ReleaseError> {
        self.state
            .lock()
            .map_err(|e| ReleaseError::Upstream(format!("mutex poisoned: {e}")))
    }

    /// Force the latest revision of `name` into `status`.
    pub fn set_status(&self, name: &str, status: StatusCode) -> Result<(), ReleaseError> {
        let mut state = self.lock()?;
        let latest = state
            .releases
            .get_mut(name)
            .and_then(|revs| revs.last_mut())
            .ok_or_else(|| ReleaseError::NotFound(name.to_owned()))?;
        latest.status = status;
        Ok(())
    }

    /// Make the next install, upgrade or delete fail with `message`.
    pub fn fail_next(&self, message: &str) -> Result<(), ReleaseError> {
        self.lock()?.fail_next = Some(message.to_owned());
        Ok(())
    }

    /// Operations received so far, as `op:release` strings.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.calls().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    fn record(state: &mut State, op: &str, name: &str) -> Result<(), ReleaseError> {
        state.calls.push(format!("{op}:{name}"));
        match state.fail_next.take() {
            Some(message) => Err(ReleaseError::Upstream(message)),
            None => Ok(()),
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl ReleaseManager for MemoryReleaseManager {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn install(&self, req: &InstallRequest) -> Result<Release, ReleaseError> {
        let mut state = self.lock()?;
        Self::record(&mut state, "install", &req.release_name)?;

        if !req.chart_path.exists() {
            return Err(ReleaseError::Chart(format!(
                "{} does not exist",
                req.chart_path.display()
            )));
        }
        let live = state
            .releases
            .get(&req.release_name)
            .and_then(|revs| revs.last())
            .is_some_and(|r| r.status != StatusCode::Deleted);
        if live {
            return Err(ReleaseError::AlreadyExists(req.release_name.clone()));
        }

        let release = Release {
            name: req.release_name.clone(),
            namespace: req.namespace.clone(),
            chart: ChartRef::from_path(&req.chart_path),
            status: self.settle_status,
            revision: 1,
            values: req.values.clone(),
            updated: now(),
        };
        state
            .releases
            .insert(req.release_name.clone(), vec![release.clone()]);
        tracing::debug!("memory: installed {}", release.name);
        Ok(release)
    }

    fn delete(&self, name: &str, purge: bool, _timeout: Duration) -> Result<Release, ReleaseError> {
        let mut state = self.lock()?;
        Self::record(&mut state, "delete", name)?;

        let revs = state
            .releases
            .get_mut(name)
            .ok_or_else(|| ReleaseError::NotFound(name.to_owned()))?;
        let mut release = revs
            .last()
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound(name.to_owned()))?;
        release.status = StatusCode::Deleted;
        release.updated = now();

        if purge {
            state.releases.remove(name);
        } else if let Some(last) = revs.last_mut() {
            *last = release.clone();
        }
        tracing::debug!("memory: deleted {name} (purge={purge})");
        Ok(release)
    }

    fn upgrade(&self, req: &UpgradeRequest) -> Result<Release, ReleaseError> {
        let mut state = self.lock()?;
        Self::record(&mut state, "upgrade", &req.release_name)?;

        if !req.chart_path.exists() {
            return Err(ReleaseError::Chart(format!(
                "{} does not exist",
                req.chart_path.display()
            )));
        }
        let revs = state
            .releases
            .get_mut(&req.release_name)
            .filter(|revs| !revs.is_empty())
            .ok_or_else(|| ReleaseError::NotFound(req.release_name.clone()))?;
        let (namespace, revision) = match revs.last_mut() {
            Some(prev) => {
                prev.status = StatusCode::Superseded;
                (prev.namespace.clone(), prev.revision + 1)
            }
            None => return Err(ReleaseError::NotFound(req.release_name.clone())),
        };

        let release = Release {
            name: req.release_name.clone(),
            namespace,
            chart: ChartRef::from_path(&req.chart_path),
            status: self.settle_status,
            revision,
            values: req.values.clone(),
            updated: now(),
        };
        revs.push(release.clone());
        tracing::debug!("memory: upgraded {} to revision {revision}", release.name);
        Ok(release)
    }

    fn status(&self, name: &str) -> Result<Release, ReleaseError> {
        let state = self.lock()?;
        state
            .releases
            .get(name)
            .and_then(|revs| revs.last())
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound(name.to_owned()))
    }

    fn history(&self, name: &str, max: usize) -> Result<Vec<Release>, ReleaseError> {
        let state = self.lock()?;
        let revs = state
            .releases
            .get(name)
            .filter(|revs| !revs.is_empty())
            .ok_or_else(|| ReleaseError::NotFound(name.to_owned()))?;
        Ok(revs.iter().rev().take(max).cloned().collect())
    }
}
