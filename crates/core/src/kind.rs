//! Closed enumeration of the object kinds the engine reads and writes.

use serde::{Deserialize, Serialize};

/// Kind of a dependent cluster object.
///
/// Every kind the generator can produce is listed here, so the garbage
/// collector can enumerate them without reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Namespace,
    ServiceAccount,
    Deployment,
    Service,
    Ingress,
    HorizontalPodAutoscaler,
    NetworkPolicy,
    PodDisruptionBudget,
    StorageBucket,
    SqlInstance,
    IamPolicyMember,
    VirtualService,
}

const GENERIC: [Kind; 7] = [
    Kind::ServiceAccount,
    Kind::Deployment,
    Kind::Service,
    Kind::Ingress,
    Kind::HorizontalPodAutoscaler,
    Kind::NetworkPolicy,
    Kind::PodDisruptionBudget,
];

const CLOUD: [Kind; 3] = [Kind::StorageBucket, Kind::SqlInstance, Kind::IamPolicyMember];

impl Kind {
    /// Kinds owned by an Application in every cluster.
    #[must_use]
    pub const fn generic() -> &'static [Self] {
        &GENERIC
    }

    /// Cloud resource kinds, only present when a cloud project is configured.
    #[must_use]
    pub const fn cloud() -> &'static [Self] {
        &CLOUD
    }

    /// API version string for the kind.
    #[must_use]
    pub const fn api_version(self) -> &'static str {
        match self {
            Self::Namespace | Self::ServiceAccount | Self::Service => "v1",
            Self::Deployment => "apps/v1",
            Self::Ingress | Self::NetworkPolicy => "networking.k8s.io/v1",
            Self::HorizontalPodAutoscaler => "autoscaling/v2",
            Self::PodDisruptionBudget => "policy/v1",
            Self::StorageBucket => "storage.cnrm.cloud.google.com/v1beta1",
            Self::SqlInstance => "sql.cnrm.cloud.google.com/v1beta1",
            Self::IamPolicyMember => "iam.cnrm.cloud.google.com/v1beta1",
            Self::VirtualService => "networking.istio.io/v1beta1",
        }
    }

    /// Whether objects of this kind live outside any namespace.
    #[must_use]
    pub const fn is_cluster_scoped(self) -> bool {
        matches!(self, Self::Namespace)
    }

    /// Spec fields assigned by the cluster that may not change on update.
    ///
    /// These are copied from the live object into the desired one before
    /// an update is sent.
    #[must_use]
    pub const fn immutable_spec_fields(self) -> &'static [&'static str] {
        match self {
            Self::Service => &["clusterIP"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Namespace => "Namespace",
            Self::ServiceAccount => "ServiceAccount",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::PodDisruptionBudget => "PodDisruptionBudget",
            Self::StorageBucket => "StorageBucket",
            Self::SqlInstance => "SqlInstance",
            Self::IamPolicyMember => "IamPolicyMember",
            Self::VirtualService => "VirtualService",
        };
        f.write_str(name)
    }
}
