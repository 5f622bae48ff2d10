//! Static service topology.
//!
//! The [`ServiceGraph`] holds the deployable services and their startup
//! dependency order. The dependency relation must form a DAG; cycles and
//! references to undeclared services are configuration errors caught at
//! construction, before any external call is made.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::probe::Probe;
use crate::types::ServiceName;

/// Which layer of the stack a service belongs to.
///
/// Strategies are computed from tiers instead of hard-coded service names:
/// infrastructure starts first, the app tier is what rolling updates
/// restart, and the proxy tier starts last (after the config switch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    /// Stateful infrastructure (database, cache). Not restarted by updates.
    Infra,
    /// Application services rebuilt and restarted by updates.
    #[default]
    App,
    /// Reverse proxy tier, started after the active config variant is
    /// applied.
    Proxy,
}

impl ServiceTier {
    /// Get the tier name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Infra => "infra",
            Self::App => "app",
            Self::Proxy => "proxy",
        }
    }
}

/// Container restart policy for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Always restart.
    #[default]
    Always,
    /// Restart only after a non-zero exit.
    OnFailure,
    /// Never restart automatically.
    Never,
}

/// One deployable unit of the stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique service name, as known to the container provider.
    pub name: ServiceName,

    /// Integer startup rank; lower starts earlier. Ties are broken by
    /// declaration order.
    #[serde(default)]
    pub start_order: u32,

    /// Stack layer this service belongs to.
    #[serde(default)]
    pub tier: ServiceTier,

    /// Services that must be healthy before this one starts.
    #[serde(default)]
    pub depends_on: Vec<ServiceName>,

    /// Container restart policy.
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Readiness probe, if the service defines one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Probe>,
}

impl ServiceSpec {
    /// Create a service spec with defaults for everything but the name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: ServiceName::new(name),
            start_order: 0,
            tier: ServiceTier::default(),
            depends_on: Vec::new(),
            restart_policy: RestartPolicy::default(),
            probe: None,
        }
    }
}

/// Static description of the deployable services and their dependency
/// order.
///
/// Immutable once constructed; construction fails on cycles, duplicate
/// names, unknown dependencies and invalid probes.
#[derive(Debug, Clone)]
pub struct ServiceGraph {
    services: Vec<ServiceSpec>,
    index: HashMap<ServiceName, usize>,
    // Indices into `services`, in topological order.
    order: Vec<usize>,
}

impl ServiceGraph {
    /// Build and validate a graph from service specs.
    pub fn new(services: Vec<ServiceSpec>) -> OrchestratorResult<Self> {
        if services.is_empty() {
            return Err(OrchestratorError::config("no services declared"));
        }

        let mut index = HashMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            if index.insert(service.name.clone(), i).is_some() {
                return Err(OrchestratorError::config(format!(
                    "duplicate service name: {}",
                    service.name
                )));
            }
        }

        for service in &services {
            for dep in &service.depends_on {
                if !index.contains_key(dep) {
                    return Err(OrchestratorError::UnknownService(format!(
                        "{} (dependency of {})",
                        dep, service.name
                    )));
                }
            }
            if let Some(probe) = &service.probe {
                probe.validate(&service.name)?;
            }
        }

        let order = topological_sort(&services, &index)?;

        Ok(Self {
            services,
            index,
            order,
        })
    }

    /// Look up a service by name.
    #[must_use]
    pub fn get(&self, name: &ServiceName) -> Option<&ServiceSpec> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    /// All services, in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    /// Services sorted so that every service appears after all entries in
    /// its `depends_on`. Rank ties are broken by `start_order`, then by
    /// declaration order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&ServiceSpec> {
        self.order.iter().map(|&i| &self.services[i]).collect()
    }

    /// Services that directly or transitively depend on `name`.
    ///
    /// Used to determine what must be restarted when one service changes.
    pub fn dependents_of(&self, name: &ServiceName) -> OrchestratorResult<BTreeSet<ServiceName>> {
        if !self.index.contains_key(name) {
            return Err(OrchestratorError::UnknownService(name.to_string()));
        }

        let mut dependents = BTreeSet::new();
        let mut queue = VecDeque::from([name.clone()]);

        while let Some(current) = queue.pop_front() {
            for service in &self.services {
                if service.depends_on.contains(&current) && dependents.insert(service.name.clone())
                {
                    queue.push_back(service.name.clone());
                }
            }
        }

        Ok(dependents)
    }

    /// Services of one tier, in topological order.
    #[must_use]
    pub fn tier(&self, tier: ServiceTier) -> Vec<&ServiceSpec> {
        self.topological_order()
            .into_iter()
            .filter(|s| s.tier == tier)
            .collect()
    }

    /// Names of all services of one tier, in topological order.
    #[must_use]
    pub fn tier_names(&self, tier: ServiceTier) -> Vec<ServiceName> {
        self.tier(tier).into_iter().map(|s| s.name.clone()).collect()
    }

    /// Names of the services of one tier that define a probe, in
    /// topological order.
    #[must_use]
    pub fn probed_tier_names(&self, tier: ServiceTier) -> Vec<ServiceName> {
        self.tier(tier)
            .into_iter()
            .filter(|s| s.probe.is_some())
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Kahn's algorithm over the dependency relation, with a deterministic
/// ready-set ordering: `start_order` first, declaration order second.
fn topological_sort(
    services: &[ServiceSpec],
    index: &HashMap<ServiceName, usize>,
) -> OrchestratorResult<Vec<usize>> {
    let mut in_degree = vec![0usize; services.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); services.len()];

    for (i, service) in services.iter().enumerate() {
        for dep in &service.depends_on {
            let di = index[dep];
            dependents[di].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..services.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(services.len());

    while !ready.is_empty() {
        ready.sort_by_key(|&i| (services[i].start_order, i));
        let next = ready.remove(0);
        order.push(next);

        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != services.len() {
        let stuck: Vec<String> = (0..services.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| services[i].name.to_string())
            .collect();
        return Err(OrchestratorError::CyclicDependency { services: stuck });
    }

    Ok(order)
}
