//! Desired-state generation.
//!
//! A generator maps an Application and the resolved [`ResourceOptions`] to
//! the ordered list of objects that should exist for it. Every generated
//! object is labeled with `app=<name>` and carries the Application's owner
//! reference so that the garbage collector can attribute it later.

use appsync_core::{Application, Kind, Labels, Object, ObjectMeta, Replicas, Strategy};
use serde_json::{Value, json};
use url::Url;

use crate::error::{Error, Result};
use crate::types::{ResourceOperation, ResourceOptions};

/// Label tying dependent objects to their Application by name.
pub const APP_LABEL: &str = "app";
/// Label naming the owning team.
pub const TEAM_LABEL: &str = "team";
/// Annotation carrying the Google project a cloud resource lives in.
pub const PROJECT_ID_ANNOTATION: &str = "cnrm.cloud.google.com/project-id";

/// Maps an Application to the objects it needs.
///
/// Implementations must be pure: the same input yields the same output, and
/// nothing is read from or written to the cluster.
pub trait DesiredStateGenerator: Send + Sync {
    /// Produce the ordered operation list for `app`.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be turned into objects.
    fn generate(&self, app: &Application, options: &ResourceOptions)
    -> Result<Vec<ResourceOperation>>;
}

/// The stock generator: service account, workload, service, autoscaling,
/// disruption budget, ingress, network policy and cloud resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardGenerator;

impl StandardGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DesiredStateGenerator for StandardGenerator {
    fn generate(
        &self,
        app: &Application,
        options: &ResourceOptions,
    ) -> Result<Vec<ResourceOperation>> {
        let replicas = app
            .spec
            .replicas
            .ok_or_else(|| Error::generate("replicas must be defaulted before generation"))?;
        let port = app.spec.port.unwrap_or(8080);

        let mut operations = vec![
            ResourceOperation::create_if_not_exists(service_account(app)),
            ResourceOperation::create_or_update(deployment(app, options, port)),
            ResourceOperation::create_or_update(service(app, port)),
            ResourceOperation::create_or_update(autoscaler(app, replicas)),
        ];

        if replicas.min > 1 {
            operations.push(ResourceOperation::create_or_recreate(disruption_budget(app)));
        }

        if !app.spec.ingresses.is_empty() {
            operations.push(ResourceOperation::create_or_update(ingress(app)?));
        }

        if options.access_policy {
            operations.push(ResourceOperation::create_or_update(network_policy(app)));
        }

        if let Some(cloud) = app.spec.cloud.as_ref().filter(|c| !c.is_empty()) {
            let project = options.google_team_project_id.as_deref().ok_or_else(|| {
                Error::generate("cloud resources requested without a team project")
            })?;
            for bucket in &cloud.buckets {
                operations.push(ResourceOperation::create_if_not_exists(storage_bucket(
                    app, bucket, project,
                )));
                operations.push(ResourceOperation::create_if_not_exists(bucket_access(
                    app, bucket, project,
                )));
            }
            for instance in &cloud.sql_instances {
                operations.push(ResourceOperation::create_or_update(sql_instance(
                    app, instance, project,
                )));
            }
        }

        Ok(operations)
    }
}

/// Metadata shared by every object generated for `app`.
#[must_use]
pub fn dependent_meta(app: &Application, name: impl Into<String>) -> ObjectMeta {
    let mut meta = ObjectMeta::new(app.namespace(), name);
    meta.labels = selector_labels(app);
    meta.labels
        .insert(TEAM_LABEL.to_string(), app.namespace().to_string());
    meta.owner_references = vec![app.owner_reference()];
    meta
}

fn selector_labels(app: &Application) -> Labels {
    Labels::from([(APP_LABEL.to_string(), app.name().to_string())])
}

fn service_account(app: &Application) -> Object {
    Object::new(Kind::ServiceAccount, dependent_meta(app, app.name()), json!({}))
}

fn deployment(app: &Application, options: &ResourceOptions, port: u16) -> Object {
    let strategy = match app.spec.strategy.unwrap_or_default() {
        Strategy::RollingUpdate => "RollingUpdate",
        Strategy::Recreate => "Recreate",
    };

    let mut pod_labels = selector_labels(app);
    let mut pod_annotations = Labels::new();
    if options.istio {
        pod_labels.insert("sidecar.istio.io/inject".to_string(), "true".to_string());
    }
    if options.linkerd {
        pod_annotations.insert("linkerd.io/inject".to_string(), "enabled".to_string());
    }

    let mut meta = dependent_meta(app, app.name());
    let correlation_id = app.correlation_id();
    if !correlation_id.is_empty() {
        meta.annotations.insert(
            appsync_core::application::CORRELATION_ID_ANNOTATION.to_string(),
            correlation_id.to_string(),
        );
    }

    Object::new(
        Kind::Deployment,
        meta,
        json!({
            "replicas": options.num_replicas,
            "selector": { "matchLabels": selector_labels(app) },
            "strategy": { "type": strategy },
            "template": {
                "metadata": { "labels": pod_labels, "annotations": pod_annotations },
                "spec": {
                    "serviceAccountName": app.name(),
                    "containers": [{
                        "name": app.name(),
                        "image": app.spec.image,
                        "ports": [{ "containerPort": port, "name": "http" }],
                        "env": [{ "name": "CLUSTER_NAME", "value": options.cluster_name }],
                    }],
                },
            },
        }),
    )
}

fn service(app: &Application, port: u16) -> Object {
    Object::new(
        Kind::Service,
        dependent_meta(app, app.name()),
        json!({
            "type": "ClusterIP",
            "selector": selector_labels(app),
            "ports": [{ "name": "http", "port": 80, "targetPort": port, "protocol": "TCP" }],
        }),
    )
}

fn autoscaler(app: &Application, replicas: Replicas) -> Object {
    Object::new(
        Kind::HorizontalPodAutoscaler,
        dependent_meta(app, app.name()),
        json!({
            "minReplicas": replicas.min,
            "maxReplicas": replicas.max,
            "scaleTargetRef": {
                "apiVersion": Kind::Deployment.api_version(),
                "kind": "Deployment",
                "name": app.name(),
            },
        }),
    )
}

fn disruption_budget(app: &Application) -> Object {
    Object::new(
        Kind::PodDisruptionBudget,
        dependent_meta(app, app.name()),
        json!({
            "maxUnavailable": 1,
            "selector": { "matchLabels": selector_labels(app) },
        }),
    )
}

fn ingress(app: &Application) -> Result<Object> {
    let rules = app
        .spec
        .ingresses
        .iter()
        .map(|raw| {
            let url = Url::parse(raw)
                .map_err(|e| Error::generate(format!("invalid ingress {raw:?}: {e}")))?;
            let host = url
                .host_str()
                .ok_or_else(|| Error::generate(format!("ingress {raw:?} has no host")))?;
            Ok(json!({
                "host": host,
                "http": { "paths": [{
                    "path": url.path(),
                    "pathType": "ImplementationSpecific",
                    "backend": { "service": { "name": app.name(), "port": { "number": 80 } } },
                }]},
            }))
        })
        .collect::<Result<Vec<Value>>>()?;

    Ok(Object::new(
        Kind::Ingress,
        dependent_meta(app, app.name()),
        json!({ "rules": rules }),
    ))
}

fn network_policy(app: &Application) -> Object {
    Object::new(
        Kind::NetworkPolicy,
        dependent_meta(app, app.name()),
        json!({
            "podSelector": { "matchLabels": selector_labels(app) },
            "policyTypes": ["Ingress"],
            "ingress": [{ "from": [{ "podSelector": {} }] }],
        }),
    )
}

fn cloud_meta(app: &Application, name: &str, project: &str) -> ObjectMeta {
    let mut meta = dependent_meta(app, name);
    meta.annotations
        .insert(PROJECT_ID_ANNOTATION.to_string(), project.to_string());
    meta
}

fn storage_bucket(app: &Application, bucket: &str, project: &str) -> Object {
    Object::new(
        Kind::StorageBucket,
        cloud_meta(app, bucket, project),
        json!({ "location": "europe-north1", "uniformBucketLevelAccess": true }),
    )
}

fn bucket_access(app: &Application, bucket: &str, project: &str) -> Object {
    Object::new(
        Kind::IamPolicyMember,
        cloud_meta(app, &format!("{}-{bucket}", app.name()), project),
        json!({
            "member": format!("serviceAccount:{}@{project}.iam.gserviceaccount.com", app.name()),
            "role": "roles/storage.objectAdmin",
            "resourceRef": { "kind": "StorageBucket", "name": bucket },
        }),
    )
}

fn sql_instance(app: &Application, instance: &str, project: &str) -> Object {
    Object::new(
        Kind::SqlInstance,
        cloud_meta(app, instance, project),
        json!({
            "databaseVersion": "POSTGRES_14",
            "region": "europe-north1",
            "settings": { "tier": "db-f1-micro" },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operation;
    use appsync_core::{ApplicationSpec, CloudResources};

    fn app() -> Application {
        let mut app = Application::new(
            "team",
            "web",
            ApplicationSpec {
                image: "registry/web:1".to_string(),
                ..ApplicationSpec::default()
            },
        );
        app.metadata.uid = "app-uid".to_string();
        let _ = app.apply_defaults();
        app
    }

    fn options() -> ResourceOptions {
        ResourceOptions {
            num_replicas: 2,
            cluster_name: "dev".to_string(),
            ..ResourceOptions::default()
        }
    }

    fn kinds(operations: &[ResourceOperation]) -> Vec<(Kind, Operation)> {
        operations
            .iter()
            .map(|op| (op.object.kind, op.operation))
            .collect()
    }

    #[test]
    fn test_minimal_application() {
        let operations = StandardGenerator.generate(&app(), &options()).unwrap_or_default();
        assert_eq!(
            kinds(&operations),
            vec![
                (Kind::ServiceAccount, Operation::CreateIfNotExists),
                (Kind::Deployment, Operation::CreateOrUpdate),
                (Kind::Service, Operation::CreateOrUpdate),
                (Kind::HorizontalPodAutoscaler, Operation::CreateOrUpdate),
                (Kind::PodDisruptionBudget, Operation::CreateOrRecreate),
            ]
        );
    }

    #[test]
    fn test_every_object_is_owned_and_labeled() {
        let operations = StandardGenerator.generate(&app(), &options()).unwrap_or_default();
        assert!(!operations.is_empty());
        for op in &operations {
            assert!(op.object.metadata.is_owned_by("app-uid"));
            assert_eq!(op.object.metadata.labels.get(APP_LABEL).map(String::as_str), Some("web"));
            assert_eq!(op.object.metadata.namespace, "team");
        }
    }

    #[test]
    fn test_single_replica_has_no_disruption_budget() {
        let mut app = app();
        app.spec.replicas = Some(Replicas { min: 1, max: 1 });
        let operations = StandardGenerator.generate(&app, &options()).unwrap_or_default();
        assert!(operations.iter().all(|op| op.object.kind != Kind::PodDisruptionBudget));
    }

    #[test]
    fn test_optional_objects() {
        let mut app = app();
        app.spec.ingresses = vec!["https://web.example.com/".to_string()];
        let options = ResourceOptions {
            access_policy: true,
            ..options()
        };

        let operations = StandardGenerator.generate(&app, &options).unwrap_or_default();
        let kinds: Vec<Kind> = operations.iter().map(|op| op.object.kind).collect();
        assert!(kinds.contains(&Kind::Ingress));
        assert!(kinds.contains(&Kind::NetworkPolicy));
    }

    #[test]
    fn test_replicas_and_mesh_annotations() {
        let options = ResourceOptions {
            num_replicas: 7,
            linkerd: true,
            ..options()
        };
        let operations = StandardGenerator.generate(&app(), &options).unwrap_or_default();
        let deployment = operations.iter().find(|op| op.object.kind == Kind::Deployment);

        assert_eq!(deployment.and_then(|d| d.object.desired_replicas()), Some(7));
        assert!(deployment.is_some_and(|d| {
            d.object.spec["template"]["metadata"]["annotations"]["linkerd.io/inject"] == "enabled"
        }));
    }

    #[test]
    fn test_cloud_resources_need_team_project() {
        let mut app = app();
        app.spec.cloud = Some(CloudResources {
            buckets: vec!["web-data".to_string()],
            sql_instances: vec!["web-db".to_string()],
        });

        let missing = StandardGenerator.generate(&app, &options());
        assert!(matches!(missing, Err(Error::Generate { .. })));

        let options = ResourceOptions {
            google_team_project_id: Some("team-dev-1234".to_string()),
            ..options()
        };
        let operations = StandardGenerator.generate(&app, &options).unwrap_or_default();
        let bucket = operations.iter().find(|op| op.object.kind == Kind::StorageBucket);
        assert!(bucket.is_some_and(|b| b.operation == Operation::CreateIfNotExists
            && b.object.metadata.annotations.get(PROJECT_ID_ANNOTATION).map(String::as_str)
                == Some("team-dev-1234")));
        assert!(operations.iter().any(|op| op.object.kind == Kind::SqlInstance
            && op.operation == Operation::CreateOrUpdate));
        assert!(operations.iter().any(|op| op.object.kind == Kind::IamPolicyMember));
    }
}
