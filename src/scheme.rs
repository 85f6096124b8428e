//! Registry of workload kinds the checker understands.
//!
//! A [`ResourceScheme`] is built once and handed to every component that
//! needs to map a kind or a command-line resource type to its API group and
//! pod template location. Nothing is registered process-wide.

/// One registered workload kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedKind {
    /// Kind name, e.g. `Deployment`.
    pub kind: &'static str,
    /// API group, empty for the core group.
    pub group: &'static str,
    /// API version within the group.
    pub version: &'static str,
    /// Plural resource name used in API paths.
    pub plural: &'static str,
    /// Short names accepted on the command line.
    pub short_names: &'static [&'static str],
    /// JSON pointer to the object holding `metadata` and `spec` of the pod
    /// template. Empty for `Pod` itself.
    pub template_pointer: &'static str,
}

impl SupportedKind {
    /// `apiVersion` string for this kind (`v1`, `apps/v1`, ...).
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_owned()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Whether `name` (case-insensitive) refers to this kind.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        name == self.kind.to_ascii_lowercase()
            || name == self.plural
            || self.short_names.iter().any(|s| *s == name)
    }
}

/// Kind name of the Namespace resource.
pub const NAMESPACE_KIND: &str = "Namespace";

const CORE_V1: [SupportedKind; 3] = [
    SupportedKind {
        kind: "Pod",
        group: "",
        version: "v1",
        plural: "pods",
        short_names: &["po", "pod"],
        template_pointer: "",
    },
    SupportedKind {
        kind: "ReplicationController",
        group: "",
        version: "v1",
        plural: "replicationcontrollers",
        short_names: &["rc"],
        template_pointer: "/spec/template",
    },
    SupportedKind {
        kind: "PodTemplate",
        group: "",
        version: "v1",
        plural: "podtemplates",
        short_names: &[],
        template_pointer: "/template",
    },
];

const APPS_V1: [SupportedKind; 4] = [
    SupportedKind {
        kind: "Deployment",
        group: "apps",
        version: "v1",
        plural: "deployments",
        short_names: &["deploy"],
        template_pointer: "/spec/template",
    },
    SupportedKind {
        kind: "ReplicaSet",
        group: "apps",
        version: "v1",
        plural: "replicasets",
        short_names: &["rs"],
        template_pointer: "/spec/template",
    },
    SupportedKind {
        kind: "StatefulSet",
        group: "apps",
        version: "v1",
        plural: "statefulsets",
        short_names: &["sts"],
        template_pointer: "/spec/template",
    },
    SupportedKind {
        kind: "DaemonSet",
        group: "apps",
        version: "v1",
        plural: "daemonsets",
        short_names: &["ds"],
        template_pointer: "/spec/template",
    },
];

const BATCH_V1: [SupportedKind; 2] = [
    SupportedKind {
        kind: "Job",
        group: "batch",
        version: "v1",
        plural: "jobs",
        short_names: &[],
        template_pointer: "/spec/template",
    },
    SupportedKind {
        kind: "CronJob",
        group: "batch",
        version: "v1",
        plural: "cronjobs",
        short_names: &["cj"],
        template_pointer: "/spec/jobTemplate/spec/template",
    },
];

/// Explicit set of registered kinds.
#[derive(Debug, Clone, Default)]
pub struct ResourceScheme {
    kinds: Vec<SupportedKind>,
}

impl ResourceScheme {
    /// An empty scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme with the `core/v1`, `apps/v1` and `batch/v1` workload kinds.
    pub fn workloads() -> Self {
        Self::new()
            .with_group(&CORE_V1)
            .with_group(&APPS_V1)
            .with_group(&BATCH_V1)
    }

    /// Register a group of kinds.
    pub fn with_group(mut self, kinds: &[SupportedKind]) -> Self {
        self.kinds.extend_from_slice(kinds);
        self
    }

    /// Look up a kind by `apiVersion` and `kind` as found in a manifest.
    pub fn by_api_version_kind(&self, api_version: &str, kind: &str) -> Option<&SupportedKind> {
        self.kinds
            .iter()
            .find(|k| k.kind == kind && k.api_version() == api_version)
    }

    /// Whether `api_version` belongs to a registered group version.
    ///
    /// Every kind of a registered group version decodes, including kinds
    /// that carry no pods.
    pub fn recognizes(&self, api_version: &str) -> bool {
        self.kinds.iter().any(|k| k.api_version() == api_version)
    }

    /// Look up a kind by name only.
    pub fn by_kind(&self, kind: &str) -> Option<&SupportedKind> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Resolve a command-line resource type (`deploy`, `pods`, `Job`, ...).
    pub fn resolve(&self, resource_type: &str) -> Option<&SupportedKind> {
        self.kinds.iter().find(|k| k.matches(resource_type))
    }

    /// All registered kinds.
    pub fn kinds(&self) -> &[SupportedKind] {
        &self.kinds
    }
}
