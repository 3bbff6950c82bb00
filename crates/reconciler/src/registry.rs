//! Aggregated routing registry.
//!
//! Several Applications may serve paths on the same ingress host. The mesh
//! wants a single `VirtualService` per host, so routes are collected here
//! across Applications and rendered per host on demand.

use std::collections::BTreeMap;

use appsync_core::{Application, Kind, Labels, Object, ObjectKey, ObjectMeta};
use itertools::Itertools;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Label put on every routing object the registry renders.
pub const MANAGED_BY_LABEL: &str = "appsync.io/managed-by";

const SERVICE_PORT: u16 = 80;

/// A path on a host routed to an Application's service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Route {
    path: String,
    destination: String,
}

/// Routes keyed by host, then by owning Application.
#[derive(Debug)]
pub struct RoutingRegistry {
    namespace: String,
    hosts: RwLock<BTreeMap<String, BTreeMap<ObjectKey, Vec<Route>>>>,
}

impl RoutingRegistry {
    /// Create a registry rendering routing objects into `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            hosts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Namespace routing objects are rendered into.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Replace the routes registered for `app` with its current ingresses.
    ///
    /// Returns the updated routing objects for hosts `app` was registered on
    /// before but no longer serves. A host left with no routes renders with
    /// an empty route list.
    ///
    /// # Errors
    ///
    /// Returns `Error::Prepare` if an ingress is not an absolute URL with a
    /// host. The registry is left unchanged in that case.
    pub async fn add(&self, app: &Application) -> Result<Vec<Object>> {
        let routes = parse_routes(app)?;
        let key = app.key();

        let mut hosts = self.hosts.write().await;
        let previous: Vec<String> = hosts
            .iter_mut()
            .filter_map(|(host, apps)| apps.remove(&key).map(|_| host.clone()))
            .collect();
        for (host, route) in routes {
            hosts
                .entry(host)
                .or_default()
                .entry(key.clone())
                .or_default()
                .push(route);
        }

        let empty = BTreeMap::new();
        let vacated: Vec<Object> = previous
            .iter()
            .filter(|host| !hosts.get(*host).is_some_and(|apps| apps.contains_key(&key)))
            .map(|host| self.render(host, hosts.get(host).unwrap_or(&empty)))
            .collect();
        hosts.retain(|_, apps| !apps.is_empty());

        debug!(
            namespace = app.namespace(),
            application = app.name(),
            hosts = hosts.len(),
            vacated = vacated.len(),
            "Registered application routes"
        );
        Ok(vacated)
    }

    /// Routing objects for every host `app` is registered on.
    pub async fn virtual_services(&self, app: &Application) -> Vec<Object> {
        let key = app.key();
        let hosts = self.hosts.read().await;
        hosts
            .iter()
            .filter(|(_, apps)| apps.contains_key(&key))
            .map(|(host, apps)| self.render(host, apps))
            .collect()
    }

    /// Drop an Application and return the updated routing objects for the
    /// hosts it was registered on.
    pub async fn remove(&self, name: &str, namespace: &str) -> Vec<Object> {
        let key = ObjectKey::new(namespace, name);
        let mut hosts = self.hosts.write().await;

        let affected: Vec<String> = hosts
            .iter_mut()
            .filter_map(|(host, apps)| apps.remove(&key).map(|_| host.clone()))
            .collect();

        let empty = BTreeMap::new();
        let rendered = affected
            .iter()
            .map(|host| self.render(host, hosts.get(host).unwrap_or(&empty)))
            .collect();

        hosts.retain(|_, apps| !apps.is_empty());
        rendered
    }

    fn render(&self, host: &str, apps: &BTreeMap<ObjectKey, Vec<Route>>) -> Object {
        // Longest prefix first so that specific paths win over "/".
        let http: Vec<_> = apps
            .values()
            .flatten()
            .sorted_by(|a, b| b.path.len().cmp(&a.path.len()).then_with(|| a.cmp(b)))
            .map(|route| {
                json!({
                    "match": [{ "uri": { "prefix": route.path } }],
                    "route": [{
                        "destination": {
                            "host": route.destination,
                            "port": { "number": SERVICE_PORT },
                        },
                    }],
                })
            })
            .collect();

        let mut metadata = ObjectMeta::new(&self.namespace, host.replace('.', "-"));
        metadata.labels = Labels::from([(MANAGED_BY_LABEL.to_string(), "appsync".to_string())]);

        Object::new(
            Kind::VirtualService,
            metadata,
            json!({ "hosts": [host], "http": http }),
        )
    }
}

fn parse_routes(app: &Application) -> Result<Vec<(String, Route)>> {
    let destination = format!("{}.{}.svc.cluster.local", app.name(), app.namespace());
    app.spec
        .ingresses
        .iter()
        .map(|ingress| {
            let url = Url::parse(ingress)
                .map_err(|e| Error::prepare(format!("invalid ingress {ingress:?}: {e}")))?;
            let host = url
                .host_str()
                .ok_or_else(|| Error::prepare(format!("ingress {ingress:?} has no host")))?;
            let path = match url.path().trim_end_matches('/') {
                "" => "/".to_string(),
                trimmed => trimmed.to_string(),
            };
            Ok((
                host.to_string(),
                Route {
                    path,
                    destination: destination.clone(),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use appsync_core::ApplicationSpec;

    fn app(name: &str, ingresses: &[&str]) -> Application {
        Application::new(
            "team",
            name,
            ApplicationSpec {
                image: "img".to_string(),
                ingresses: ingresses.iter().map(ToString::to_string).collect(),
                ..ApplicationSpec::default()
            },
        )
    }

    fn paths(object: &Object) -> Vec<String> {
        object.spec["http"]
            .as_array()
            .map(|routes| {
                routes
                    .iter()
                    .filter_map(|r| r["match"][0]["uri"]["prefix"].as_str())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_routes_aggregate_per_host() {
        let registry = RoutingRegistry::new("istio-system");
        let web = app("web", &["https://www.example.com/"]);
        let api = app("api", &["https://www.example.com/api/"]);

        assert!(registry.add(&web).await.is_ok());
        assert!(registry.add(&api).await.is_ok());

        let services = registry.virtual_services(&api).await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].metadata.name, "www-example-com");
        assert_eq!(services[0].metadata.namespace, "istio-system");
        assert_eq!(paths(&services[0]), vec!["/api".to_string(), "/".to_string()]);
    }

    #[tokio::test]
    async fn test_add_replaces_previous_routes() {
        let registry = RoutingRegistry::new("istio-system");
        assert!(registry.add(&app("web", &["https://a.example.com"])).await.is_ok());
        assert!(registry.add(&app("web", &["https://b.example.com"])).await.is_ok());

        let services = registry.virtual_services(&app("web", &[])).await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].metadata.name, "b-example-com");
    }

    #[tokio::test]
    async fn test_add_returns_routing_for_vacated_hosts() {
        let registry = RoutingRegistry::new("istio-system");
        let both = app("a", &["https://a.example.com", "https://old.example.com"]);
        let vacated = registry.add(&both).await.unwrap();
        assert!(vacated.is_empty());

        let narrowed = app("a", &["https://a.example.com"]);
        let vacated = registry.add(&narrowed).await.unwrap();
        assert_eq!(vacated.len(), 1);
        assert_eq!(vacated[0].metadata.name, "old-example-com");
        assert!(paths(&vacated[0]).is_empty());

        let services = registry.virtual_services(&narrowed).await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].metadata.name, "a-example-com");
    }

    #[tokio::test]
    async fn test_vacated_shared_host_keeps_other_routes() {
        let registry = RoutingRegistry::new("istio-system");
        registry.add(&app("web", &["https://www.example.com"])).await.unwrap();
        registry
            .add(&app("api", &["https://www.example.com/api"]))
            .await
            .unwrap();

        let vacated = registry.add(&app("api", &[])).await.unwrap();
        assert_eq!(vacated.len(), 1);
        assert_eq!(paths(&vacated[0]), vec!["/".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_returns_affected_hosts() {
        let registry = RoutingRegistry::new("istio-system");
        assert!(registry.add(&app("web", &["https://www.example.com"])).await.is_ok());
        assert!(registry.add(&app("api", &["https://www.example.com/api"])).await.is_ok());

        let updated = registry.remove("api", "team").await;
        assert_eq!(updated.len(), 1);
        assert_eq!(paths(&updated[0]), vec!["/".to_string()]);

        let untouched = registry.remove("missing", "team").await;
        assert!(untouched.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_ingress_is_rejected() {
        let registry = RoutingRegistry::new("istio-system");
        let result = registry.add(&app("web", &["not a url"])).await;
        assert!(matches!(result, Err(Error::Prepare { .. })));
    }
}
