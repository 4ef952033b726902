//! Service registry (C6): named services with dependency-ordered lifecycle.
//!
//! Grounded on `original_source/.../service_registry.h` (`ServiceState`,
//! `IService`, `ServiceRegistry`, `BaseService`), adapted from C++'s
//! `std::shared_ptr<IService>` + single mutex to an `async_trait` object
//! behind `Arc<RwLock<...>>`, in the teacher's `Arc<RwLock<HashMap<...>>>`
//! state-holding style (`adapters/factory.rs`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service '{0}' is not registered")]
    NotFound(String),
    #[error("dependency cycle detected involving '{0}'")]
    CyclicDependency(String),
    #[error("service '{0}' failed to {1}")]
    LifecycleFailed(String, &'static str),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Contract every managed service implements (mirrors `IService`).
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn initialize(&self) -> bool;
    async fn start(&self) -> bool;
    async fn stop(&self) -> bool;
    async fn shutdown(&self) -> bool;

    async fn is_healthy(&self) -> bool {
        true
    }
    async fn health_status(&self) -> String {
        "ok".to_string()
    }
}

type EventCallback = Box<dyn Fn(&str, ServiceState, ServiceState) + Send + Sync>;

struct Entry {
    service: Arc<dyn Service>,
    state: ServiceState,
    dependencies: Vec<String>,
    config: HashMap<String, String>,
}

/// Process-wide DI container and lifecycle coordinator.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Entry>>,
    global_config: RwLock<HashMap<String, String>>,
    event_callback: RwLock<Option<EventCallback>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            global_config: RwLock::new(HashMap::new()),
            event_callback: RwLock::new(None),
        }
    }

    pub async fn set_service_event_callback(&self, cb: EventCallback) {
        *self.event_callback.write().await = Some(cb);
    }

    pub async fn register_service(&self, service: Arc<dyn Service>) {
        self.register_service_with_config(service, HashMap::new()).await;
    }

    /// Registers a service, merging the current global configuration
    /// (spec.md §4.6) into `overrides` — keys in `overrides` win.
    pub async fn register_service_with_config(
        &self,
        service: Arc<dyn Service>,
        overrides: HashMap<String, String>,
    ) {
        let name = service.name().to_string();
        let dependencies = service.dependencies();
        let mut config = self.global_config.read().await.clone();
        config.extend(overrides);
        self.services.write().await.insert(
            name,
            Entry {
                service,
                state: ServiceState::Uninitialized,
                dependencies,
                config,
            },
        );
    }

    /// The effective configuration for a registered service: the global
    /// map merged at registration time, plus any per-service overrides.
    pub async fn service_config(&self, name: &str) -> Option<HashMap<String, String>> {
        self.services.read().await.get(name).map(|e| e.config.clone())
    }

    pub async fn unregister_service(&self, name: &str) {
        self.services.write().await.remove(name);
    }

    pub async fn is_service_registered(&self, name: &str) -> bool {
        self.services.read().await.contains_key(name)
    }

    pub async fn get_service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.read().await.get(name).map(|e| e.service.clone())
    }

    pub async fn registered_services(&self) -> Vec<String> {
        self.services.read().await.keys().cloned().collect()
    }

    pub async fn service_dependencies(&self, name: &str) -> Vec<String> {
        self.services
            .read()
            .await
            .get(name)
            .map(|e| e.dependencies.clone())
            .unwrap_or_default()
    }

    /// Reverse adjacency: who depends on `name`.
    pub async fn service_dependents(&self, name: &str) -> Vec<String> {
        let services = self.services.read().await;
        let mut dependents = Vec::new();
        for (candidate, entry) in services.iter() {
            if entry.dependencies.iter().any(|d| d == name) {
                dependents.push(candidate.clone());
            }
        }
        dependents.sort();
        dependents
    }

    /// DFS cycle check over the declared dependency graph.
    pub async fn resolve_dependencies(&self) -> RegistryResult<()> {
        let services = self.services.read().await;
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();

        fn visit(
            name: &str,
            services: &HashMap<String, Entry>,
            visited: &mut HashSet<String>,
            stack: &mut HashSet<String>,
        ) -> RegistryResult<()> {
            if stack.contains(name) {
                return Err(RegistryError::CyclicDependency(name.to_string()));
            }
            if visited.contains(name) {
                return Ok(());
            }
            stack.insert(name.to_string());
            if let Some(entry) = services.get(name) {
                for dep in &entry.dependencies {
                    visit(dep, services, visited, stack)?;
                }
            }
            stack.remove(name);
            visited.insert(name.to_string());
            Ok(())
        }

        for name in services.keys() {
            visit(name, &services, &mut visited, &mut stack)?;
        }
        Ok(())
    }

    /// Kahn's algorithm over the dependency DAG.
    pub async fn startup_order(&self) -> RegistryResult<Vec<String>> {
        self.resolve_dependencies().await?;
        let services = self.services.read().await;

        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut dependents_of: HashMap<String, Vec<String>> = HashMap::new();
        for name in services.keys() {
            in_degree.entry(name.clone()).or_insert(0);
        }
        for (name, entry) in services.iter() {
            in_degree.insert(name.clone(), entry.dependencies.len());
            for dep in &entry.dependencies {
                dependents_of.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        let mut ready: Vec<String> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| n.clone())
            .collect();
        ready.sort();

        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from(ready);
        while let Some(name) = queue.pop_front() {
            order.push(name.clone());
            if let Some(dependents) = dependents_of.get(&name) {
                let mut newly_ready = Vec::new();
                for dependent in dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(dependent.clone());
                        }
                    }
                }
                newly_ready.sort();
                for n in newly_ready {
                    queue.push_back(n);
                }
            }
        }

        if order.len() != services.len() {
            return Err(RegistryError::CyclicDependency("startup order".to_string()));
        }
        Ok(order)
    }

    async fn set_state(&self, name: &str, new_state: ServiceState) {
        let old_state = {
            let mut services = self.services.write().await;
            let Some(entry) = services.get_mut(name) else {
                return;
            };
            let old = entry.state;
            entry.state = new_state;
            old
        };
        if let Some(cb) = self.event_callback.read().await.as_ref() {
            cb(name, old_state, new_state);
        }
    }

    /// Runs initialize -> start across every service in dependency order,
    /// aborting on first failure.
    pub async fn initialize_all(&self) -> RegistryResult<()> {
        for name in self.startup_order().await? {
            let service = self.get_service(&name).await.ok_or_else(|| RegistryError::NotFound(name.clone()))?;
            self.set_state(&name, ServiceState::Initializing).await;
            if !service.initialize().await {
                self.set_state(&name, ServiceState::Error).await;
                error!(service = %name, "service failed to initialize");
                return Err(RegistryError::LifecycleFailed(name, "initialize"));
            }
            self.set_state(&name, ServiceState::Initialized).await;
        }
        Ok(())
    }

    pub async fn start_all(&self) -> RegistryResult<()> {
        for name in self.startup_order().await? {
            let service = self.get_service(&name).await.ok_or_else(|| RegistryError::NotFound(name.clone()))?;
            self.set_state(&name, ServiceState::Starting).await;
            if !service.start().await {
                self.set_state(&name, ServiceState::Error).await;
                error!(service = %name, "service failed to start");
                return Err(RegistryError::LifecycleFailed(name, "start"));
            }
            self.set_state(&name, ServiceState::Running).await;
            info!(service = %name, "service running");
        }
        Ok(())
    }

    /// Best-effort: continues past individual failures, in reverse
    /// startup order.
    pub async fn stop_all(&self) {
        let mut order = self.startup_order().await.unwrap_or_default();
        order.reverse();
        for name in order {
            if let Some(service) = self.get_service(&name).await {
                self.set_state(&name, ServiceState::Stopping).await;
                if !service.stop().await {
                    error!(service = %name, "service failed to stop cleanly");
                }
                self.set_state(&name, ServiceState::Stopped).await;
            }
        }
    }

    pub async fn shutdown_all(&self) {
        let mut order = self.startup_order().await.unwrap_or_default();
        order.reverse();
        for name in order {
            if let Some(service) = self.get_service(&name).await {
                if !service.shutdown().await {
                    error!(service = %name, "service failed to shut down cleanly");
                }
                self.set_state(&name, ServiceState::Stopped).await;
            }
        }
    }

    pub async fn service_states(&self) -> HashMap<String, ServiceState> {
        self.services.read().await.iter().map(|(k, v)| (k.clone(), v.state)).collect()
    }

    pub async fn are_all_services_healthy(&self) -> bool {
        let names: Vec<String> = self.services.read().await.keys().cloned().collect();
        for name in names {
            if let Some(service) = self.get_service(&name).await {
                if !service.is_healthy().await {
                    return false;
                }
            }
        }
        true
    }

    pub async fn set_global_configuration(&self, config: HashMap<String, String>) {
        *self.global_config.write().await = config;
    }
}
