//! Pod Security Standards controls.
//!
//! Each [`Check`] covers one control of the baseline or restricted profile.
//! Evaluating at `restricted` runs the baseline controls too, and
//! `privileged` runs nothing.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::{
    ContainerPort, PodSecurityContext, PodSpec, SELinuxOptions, SeccompProfile, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{ForbiddenReason, PolicyEvaluator, PolicyVerdict, RuleSetError};
use crate::types::{LevelVersion, PolicyVersion, SecurityLevel};

/// Signature of a single control.
pub type CheckFn = fn(&ObjectMeta, &PodSpec) -> Option<ForbiddenReason>;

/// One control of the Pod Security Standards.
#[derive(Debug, Clone, Copy)]
pub struct Check {
    /// Stable identifier.
    pub id: &'static str,
    /// Lowest level the control is enforced at.
    pub level: SecurityLevel,
    /// First policy minor version the control applies to.
    pub since_minor: u32,
    /// The control itself.
    pub run: CheckFn,
}

impl Check {
    fn applies_at(&self, version: PolicyVersion) -> bool {
        match version {
            PolicyVersion::Latest => true,
            PolicyVersion::Pinned { minor, .. } => minor >= self.since_minor,
        }
    }
}

/// Validated set of controls.
#[derive(Debug, Clone)]
pub struct PodSecurityChecks {
    checks: Vec<Check>,
}

impl PodSecurityChecks {
    /// Build a rule set from `checks`.
    ///
    /// # Errors
    ///
    /// Fails when the set is empty, ids repeat, or a check is registered for
    /// `privileged` or `unknown`.
    pub fn new(checks: Vec<Check>) -> Result<Self, RuleSetError> {
        if checks.is_empty() {
            return Err(RuleSetError::Empty);
        }
        let mut seen = HashSet::new();
        for check in &checks {
            if !seen.insert(check.id) {
                return Err(RuleSetError::DuplicateId(check.id.to_owned()));
            }
            if !matches!(
                check.level,
                SecurityLevel::Baseline | SecurityLevel::Restricted
            ) {
                return Err(RuleSetError::InvalidLevel {
                    id: check.id.to_owned(),
                    level: check.level.to_string(),
                });
            }
        }
        Ok(Self { checks })
    }

    /// The standard baseline and restricted controls.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in list; the signature matches [`Self::new`].
    pub fn with_defaults() -> Result<Self, RuleSetError> {
        Self::new(default_checks())
    }

    /// Registered controls.
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }
}

impl PolicyEvaluator for PodSecurityChecks {
    fn evaluate_pod(
        &self,
        level: LevelVersion,
        metadata: &ObjectMeta,
        spec: &PodSpec,
    ) -> PolicyVerdict {
        if matches!(
            level.level,
            SecurityLevel::Privileged | SecurityLevel::Unknown
        ) {
            return PolicyVerdict::allow();
        }
        let forbidden = self
            .checks
            .iter()
            .filter(|c| c.level >= level.level && c.applies_at(level.version))
            .filter_map(|c| (c.run)(metadata, spec))
            .collect();
        PolicyVerdict { forbidden }
    }
}

/// Built-in controls in evaluation order.
pub fn default_checks() -> Vec<Check> {
    vec![
        Check {
            id: "hostNamespaces",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: host_namespaces,
        },
        Check {
            id: "windowsHostProcess",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: windows_host_process,
        },
        Check {
            id: "privileged",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: privileged_containers,
        },
        Check {
            id: "capabilities_baseline",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: baseline_capabilities,
        },
        Check {
            id: "hostPathVolumes",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: host_path_volumes,
        },
        Check {
            id: "hostPorts",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: host_ports,
        },
        Check {
            id: "appArmorProfile",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: app_armor_profile,
        },
        Check {
            id: "seLinuxOptions",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: se_linux_options,
        },
        Check {
            id: "procMount",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: proc_mount,
        },
        Check {
            id: "seccompProfile_baseline",
            level: SecurityLevel::Baseline,
            since_minor: 19,
            run: baseline_seccomp,
        },
        Check {
            id: "sysctls",
            level: SecurityLevel::Baseline,
            since_minor: 0,
            run: sysctls,
        },
        Check {
            id: "restrictedVolumes",
            level: SecurityLevel::Restricted,
            since_minor: 0,
            run: restricted_volumes,
        },
        Check {
            id: "allowPrivilegeEscalation",
            level: SecurityLevel::Restricted,
            since_minor: 8,
            run: allow_privilege_escalation,
        },
        Check {
            id: "runAsNonRoot",
            level: SecurityLevel::Restricted,
            since_minor: 0,
            run: run_as_non_root,
        },
        Check {
            id: "runAsUser",
            level: SecurityLevel::Restricted,
            since_minor: 23,
            run: run_as_user,
        },
        Check {
            id: "seccompProfile_restricted",
            level: SecurityLevel::Restricted,
            since_minor: 19,
            run: restricted_seccomp,
        },
        Check {
            id: "capabilities_restricted",
            level: SecurityLevel::Restricted,
            since_minor: 22,
            run: restricted_capabilities,
        },
    ]
}

// ---------------------------------------------------------------------------
// Container iteration
// ---------------------------------------------------------------------------

/// Fields shared by regular, init and ephemeral containers.
struct ContainerRef<'a> {
    name: &'a str,
    security_context: Option<&'a SecurityContext>,
    ports: &'a [ContainerPort],
}

fn containers(spec: &PodSpec) -> Vec<ContainerRef<'_>> {
    let regular = spec
        .init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|c| ContainerRef {
            name: &c.name,
            security_context: c.security_context.as_ref(),
            ports: c.ports.as_deref().unwrap_or_default(),
        });
    let ephemeral = spec
        .ephemeral_containers
        .iter()
        .flatten()
        .map(|c| ContainerRef {
            name: &c.name,
            security_context: c.security_context.as_ref(),
            ports: c.ports.as_deref().unwrap_or_default(),
        });
    regular.chain(ephemeral).collect()
}

fn pod_context(spec: &PodSpec) -> Option<&PodSecurityContext> {
    spec.security_context.as_ref()
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("{n:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn plural(names: &[&str], singular: &str, many: &str) -> String {
    if names.len() == 1 {
        format!("{singular} {}", quoted(names))
    } else {
        format!("{many} {}", quoted(names))
    }
}

fn forbidden(reason: &str, detail: String) -> Option<ForbiddenReason> {
    Some(ForbiddenReason {
        reason: reason.to_owned(),
        detail,
    })
}

// ---------------------------------------------------------------------------
// Baseline controls
// ---------------------------------------------------------------------------

fn host_namespaces(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut set = Vec::new();
    if spec.host_network == Some(true) {
        set.push("hostNetwork=true");
    }
    if spec.host_pid == Some(true) {
        set.push("hostPID=true");
    }
    if spec.host_ipc == Some(true) {
        set.push("hostIPC=true");
    }
    if set.is_empty() {
        return None;
    }
    forbidden("host namespaces", set.join(", "))
}

fn windows_host_process(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let pod = pod_context(spec)
        .and_then(|sc| sc.windows_options.as_ref())
        .and_then(|w| w.host_process)
        == Some(true);
    let bad: Vec<&str> = containers(spec)
        .into_iter()
        .filter(|c| {
            c.security_context
                .and_then(|sc| sc.windows_options.as_ref())
                .and_then(|w| w.host_process)
                == Some(true)
        })
        .map(|c| c.name)
        .collect();
    let subject = match (pod, bad.is_empty()) {
        (false, true) => return None,
        (true, true) => "pod".to_owned(),
        (true, false) => format!("pod and {}", plural(&bad, "container", "containers")),
        (false, false) => plural(&bad, "container", "containers"),
    };
    forbidden(
        "hostProcess",
        format!("{subject} must not set securityContext.windowsOptions.hostProcess=true"),
    )
}

fn privileged_containers(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let bad: Vec<&str> = containers(spec)
        .into_iter()
        .filter(|c| c.security_context.and_then(|sc| sc.privileged) == Some(true))
        .map(|c| c.name)
        .collect();
    if bad.is_empty() {
        return None;
    }
    forbidden(
        "privileged",
        format!(
            "{} must not set securityContext.privileged=true",
            plural(&bad, "container", "containers")
        ),
    )
}

const BASELINE_CAPABILITIES: &[&str] = &[
    "AUDIT_WRITE",
    "CHOWN",
    "DAC_OVERRIDE",
    "FOWNER",
    "FSETID",
    "KILL",
    "MKNOD",
    "NET_BIND_SERVICE",
    "SETFCAP",
    "SETGID",
    "SETPCAP",
    "SETUID",
    "SYS_CHROOT",
];

fn added_capabilities<'a>(c: &ContainerRef<'a>) -> &'a [String] {
    c.security_context
        .and_then(|sc| sc.capabilities.as_ref())
        .and_then(|caps| caps.add.as_deref())
        .unwrap_or_default()
}

fn baseline_capabilities(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut names = Vec::new();
    let mut caps: Vec<&str> = Vec::new();
    for c in containers(spec) {
        let extra: Vec<&str> = added_capabilities(&c)
            .iter()
            .map(String::as_str)
            .filter(|cap| !BASELINE_CAPABILITIES.contains(cap))
            .collect();
        if !extra.is_empty() {
            names.push(c.name);
            for cap in extra {
                if !caps.contains(&cap) {
                    caps.push(cap);
                }
            }
        }
    }
    if names.is_empty() {
        return None;
    }
    forbidden(
        "non-default capabilities",
        format!(
            "{} must not include {} in securityContext.capabilities.add",
            plural(&names, "container", "containers"),
            quoted(&caps)
        ),
    )
}

fn host_path_volumes(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let bad: Vec<&str> = spec
        .volumes
        .iter()
        .flatten()
        .filter(|v| v.host_path.is_some())
        .map(|v| v.name.as_str())
        .collect();
    if bad.is_empty() {
        return None;
    }
    forbidden("hostPath volumes", plural(&bad, "volume", "volumes"))
}

fn host_ports(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut names = Vec::new();
    let mut ports = Vec::new();
    for c in containers(spec) {
        let used: Vec<i32> = c
            .ports
            .iter()
            .filter_map(|p| p.host_port)
            .filter(|p| *p != 0)
            .collect();
        if !used.is_empty() {
            names.push(c.name);
            ports.extend(used);
        }
    }
    if names.is_empty() {
        return None;
    }
    let ports = ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    forbidden(
        "hostPort",
        format!(
            "{} uses hostPort {ports}",
            plural(&names, "container", "containers")
        ),
    )
}

const APP_ARMOR_ANNOTATION_PREFIX: &str = "container.apparmor.security.beta.kubernetes.io/";

fn app_armor_profile(meta: &ObjectMeta, _spec: &PodSpec) -> Option<ForbiddenReason> {
    let bad: Vec<String> = meta
        .annotations
        .iter()
        .flatten()
        .filter(|(k, _)| k.starts_with(APP_ARMOR_ANNOTATION_PREFIX))
        .filter(|(_, v)| v.as_str() != "runtime/default" && !v.starts_with("localhost/"))
        .map(|(k, v)| format!("{k:?}={v:?}"))
        .collect();
    if bad.is_empty() {
        return None;
    }
    forbidden(
        "forbidden AppArmor profile",
        format!("annotations {}", bad.join(", ")),
    )
}

const SELINUX_TYPES: &[&str] = &["", "container_t", "container_init_t", "container_kvm_t"];

fn se_linux_violations(opts: &SELinuxOptions) -> Vec<&'static str> {
    let mut found = Vec::new();
    if let Some(t) = &opts.type_ {
        if !SELINUX_TYPES.contains(&t.as_str()) {
            found.push("type");
        }
    }
    if opts.user.as_deref().is_some_and(|u| !u.is_empty()) {
        found.push("user");
    }
    if opts.role.as_deref().is_some_and(|r| !r.is_empty()) {
        found.push("role");
    }
    found
}

fn se_linux_options(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut details = Vec::new();
    if let Some(opts) = pod_context(spec).and_then(|sc| sc.se_linux_options.as_ref()) {
        let fields = se_linux_violations(opts);
        if !fields.is_empty() {
            details.push(format!("pod set forbidden securityContext.seLinuxOptions: {}", fields.join(", ")));
        }
    }
    for c in containers(spec) {
        if let Some(opts) = c.security_context.and_then(|sc| sc.se_linux_options.as_ref()) {
            let fields = se_linux_violations(opts);
            if !fields.is_empty() {
                details.push(format!(
                    "container {:?} set forbidden securityContext.seLinuxOptions: {}",
                    c.name,
                    fields.join(", ")
                ));
            }
        }
    }
    if details.is_empty() {
        return None;
    }
    forbidden("seLinuxOptions", details.join("; "))
}

fn proc_mount(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let bad: Vec<&str> = containers(spec)
        .into_iter()
        .filter(|c| {
            c.security_context
                .and_then(|sc| sc.proc_mount.as_deref())
                .is_some_and(|m| m != "Default")
        })
        .map(|c| c.name)
        .collect();
    if bad.is_empty() {
        return None;
    }
    forbidden(
        "procMount",
        format!(
            "{} must not set securityContext.procMount",
            plural(&bad, "container", "containers")
        ),
    )
}

fn is_unconfined(profile: Option<&SeccompProfile>) -> bool {
    profile.is_some_and(|p| p.type_ == "Unconfined")
}

fn baseline_seccomp(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut details = Vec::new();
    if is_unconfined(pod_context(spec).and_then(|sc| sc.seccomp_profile.as_ref())) {
        details.push("pod must not set securityContext.seccompProfile.type to \"Unconfined\"".to_owned());
    }
    let bad: Vec<&str> = containers(spec)
        .into_iter()
        .filter(|c| is_unconfined(c.security_context.and_then(|sc| sc.seccomp_profile.as_ref())))
        .map(|c| c.name)
        .collect();
    if !bad.is_empty() {
        details.push(format!(
            "{} must not set securityContext.seccompProfile.type to \"Unconfined\"",
            plural(&bad, "container", "containers")
        ));
    }
    if details.is_empty() {
        return None;
    }
    forbidden("seccompProfile", details.join("; "))
}

const SAFE_SYSCTLS: &[&str] = &[
    "kernel.shm_rmid_forced",
    "net.ipv4.ip_local_port_range",
    "net.ipv4.ip_unprivileged_port_start",
    "net.ipv4.tcp_syncookies",
    "net.ipv4.ping_group_range",
    "net.ipv4.ip_local_reserved_ports",
    "net.ipv4.tcp_keepalive_time",
    "net.ipv4.tcp_fin_timeout",
    "net.ipv4.tcp_keepalive_intvl",
    "net.ipv4.tcp_keepalive_probes",
];

fn sysctls(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let bad: Vec<&str> = pod_context(spec)
        .and_then(|sc| sc.sysctls.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| !SAFE_SYSCTLS.contains(name))
        .collect();
    if bad.is_empty() {
        return None;
    }
    forbidden("forbidden sysctls", bad.join(", "))
}

// ---------------------------------------------------------------------------
// Restricted controls
// ---------------------------------------------------------------------------

const RESTRICTED_VOLUME_SOURCES: &[&str] = &[
    "configMap",
    "csi",
    "downwardAPI",
    "emptyDir",
    "ephemeral",
    "persistentVolumeClaim",
    "projected",
    "secret",
];

fn restricted_volumes(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut names = Vec::new();
    let mut sources: Vec<String> = Vec::new();
    for volume in spec.volumes.iter().flatten() {
        let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(volume) else {
            continue;
        };
        let disallowed: Vec<&String> = fields
            .keys()
            .filter(|k| k.as_str() != "name" && !RESTRICTED_VOLUME_SOURCES.contains(&k.as_str()))
            .collect();
        if !disallowed.is_empty() {
            names.push(volume.name.as_str());
            for source in disallowed {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }
    }
    if names.is_empty() {
        return None;
    }
    forbidden(
        "restricted volume types",
        format!("{} uses restricted volume type {}", plural(&names, "volume", "volumes"), sources.join(", ")),
    )
}

fn allow_privilege_escalation(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let bad: Vec<&str> = containers(spec)
        .into_iter()
        .filter(|c| c.security_context.and_then(|sc| sc.allow_privilege_escalation) != Some(false))
        .map(|c| c.name)
        .collect();
    if bad.is_empty() {
        return None;
    }
    forbidden(
        "allowPrivilegeEscalation != false",
        format!(
            "{} must set securityContext.allowPrivilegeEscalation=false",
            plural(&bad, "container", "containers")
        ),
    )
}

fn run_as_non_root(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let pod_setting = pod_context(spec).and_then(|sc| sc.run_as_non_root);
    let mut details = Vec::new();
    if pod_setting == Some(false) {
        details.push("pod must not set securityContext.runAsNonRoot=false".to_owned());
    }
    let mut explicit_false = Vec::new();
    let mut implicit = Vec::new();
    for c in containers(spec) {
        match c.security_context.and_then(|sc| sc.run_as_non_root) {
            Some(false) => explicit_false.push(c.name),
            None if pod_setting != Some(true) => implicit.push(c.name),
            _ => {}
        }
    }
    if !explicit_false.is_empty() {
        details.push(format!(
            "{} must not set securityContext.runAsNonRoot=false",
            plural(&explicit_false, "container", "containers")
        ));
    }
    if !implicit.is_empty() && pod_setting != Some(false) {
        details.push(format!(
            "pod or {} must set securityContext.runAsNonRoot=true",
            plural(&implicit, "container", "containers")
        ));
    }
    if details.is_empty() {
        return None;
    }
    forbidden("runAsNonRoot != true", details.join("; "))
}

fn run_as_user(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut details = Vec::new();
    if pod_context(spec).and_then(|sc| sc.run_as_user) == Some(0) {
        details.push("pod must not set runAsUser=0".to_owned());
    }
    let bad: Vec<&str> = containers(spec)
        .into_iter()
        .filter(|c| c.security_context.and_then(|sc| sc.run_as_user) == Some(0))
        .map(|c| c.name)
        .collect();
    if !bad.is_empty() {
        details.push(format!("{} must not set runAsUser=0", plural(&bad, "container", "containers")));
    }
    if details.is_empty() {
        return None;
    }
    forbidden("runAsUser=0", details.join("; "))
}

fn is_confined(profile: &SeccompProfile) -> bool {
    profile.type_ == "RuntimeDefault" || profile.type_ == "Localhost"
}

fn restricted_seccomp(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let pod_profile = pod_context(spec).and_then(|sc| sc.seccomp_profile.as_ref());
    let pod_ok = pod_profile.is_some_and(is_confined);
    let mut details = Vec::new();
    if pod_profile.is_some_and(|p| !is_confined(p)) {
        details.push(format!(
            "pod must not set securityContext.seccompProfile.type to {:?}",
            pod_profile.map(|p| p.type_.as_str()).unwrap_or_default()
        ));
    }
    let mut invalid = Vec::new();
    let mut unset = Vec::new();
    for c in containers(spec) {
        match c.security_context.and_then(|sc| sc.seccomp_profile.as_ref()) {
            Some(p) if !is_confined(p) => invalid.push(c.name),
            None if !pod_ok => unset.push(c.name),
            _ => {}
        }
    }
    if !invalid.is_empty() {
        details.push(format!(
            "{} must not set securityContext.seccompProfile.type to a value other than \"RuntimeDefault\" or \"Localhost\"",
            plural(&invalid, "container", "containers")
        ));
    }
    if !unset.is_empty() && pod_profile.is_none() {
        details.push(format!(
            "pod or {} must set securityContext.seccompProfile.type to \"RuntimeDefault\" or \"Localhost\"",
            plural(&unset, "container", "containers")
        ));
    }
    if details.is_empty() {
        return None;
    }
    forbidden("seccompProfile", details.join("; "))
}

fn restricted_capabilities(_meta: &ObjectMeta, spec: &PodSpec) -> Option<ForbiddenReason> {
    let mut not_dropped = Vec::new();
    let mut added = Vec::new();
    for c in containers(spec) {
        let caps = c.security_context.and_then(|sc| sc.capabilities.as_ref());
        let drops_all = caps
            .and_then(|caps| caps.drop.as_deref())
            .unwrap_or_default()
            .iter()
            .any(|cap| cap == "ALL");
        if !drops_all {
            not_dropped.push(c.name);
        }
        if added_capabilities(&c)
            .iter()
            .any(|cap| cap != "NET_BIND_SERVICE")
        {
            added.push(c.name);
        }
    }
    let mut details = Vec::new();
    if !not_dropped.is_empty() {
        details.push(format!(
            "{} must set securityContext.capabilities.drop=[\"ALL\"]",
            plural(&not_dropped, "container", "containers")
        ));
    }
    if !added.is_empty() {
        details.push(format!(
            "{} must not include capabilities other than \"NET_BIND_SERVICE\" in securityContext.capabilities.add",
            plural(&added, "container", "containers")
        ));
    }
    if details.is_empty() {
        return None;
    }
    forbidden("unrestricted capabilities", details.join("; "))
}
