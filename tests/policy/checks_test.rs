//! Tests for the built-in Pod Security controls.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;

use psachecker::policy::checks::PodSecurityChecks;
use psachecker::policy::{PolicyEvaluator, PolicyVerdict};
use psachecker::types::{LevelVersion, PolicyVersion, SecurityLevel};

use crate::support::{baseline_spec, host_network_spec, latest, pod_spec, restricted_spec};

fn checks() -> PodSecurityChecks {
    PodSecurityChecks::with_defaults().expect("defaults are valid")
}

fn verdict(level: LevelVersion, spec: serde_json::Value) -> PolicyVerdict {
    checks().evaluate_pod(level, &ObjectMeta::default(), &pod_spec(spec))
}

fn reasons(verdict: &PolicyVerdict) -> Vec<&str> {
    verdict.forbidden.iter().map(|f| f.reason.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

#[test]
fn restricted_spec_passes_everything() {
    for level in SecurityLevel::ALL {
        assert!(verdict(latest(level), restricted_spec()).allowed(), "{level}");
    }
}

#[test]
fn plain_container_is_baseline_only() {
    assert!(verdict(latest(SecurityLevel::Baseline), baseline_spec()).allowed());
    let restricted = verdict(latest(SecurityLevel::Restricted), baseline_spec());
    assert_eq!(
        reasons(&restricted),
        vec![
            "allowPrivilegeEscalation != false",
            "runAsNonRoot != true",
            "seccompProfile",
            "unrestricted capabilities",
        ]
    );
}

#[test]
fn privileged_allows_anything() {
    assert!(verdict(latest(SecurityLevel::Privileged), host_network_spec()).allowed());
}

#[test]
fn host_network_is_a_baseline_violation() {
    let baseline = verdict(latest(SecurityLevel::Baseline), host_network_spec());
    assert_eq!(reasons(&baseline), vec!["host namespaces"]);
    assert_eq!(baseline.summary(), "host namespaces (hostNetwork=true)");
}

// ---------------------------------------------------------------------------
// Individual controls
// ---------------------------------------------------------------------------

#[test]
fn windows_host_process_is_a_baseline_violation() {
    let mut spec = restricted_spec();
    spec["securityContext"]["windowsOptions"] = json!({"hostProcess": true});
    assert!(!verdict(latest(SecurityLevel::Restricted), spec.clone()).allowed());
    let baseline = verdict(latest(SecurityLevel::Baseline), spec.clone());
    assert_eq!(
        baseline.summary(),
        "hostProcess (pod must not set securityContext.windowsOptions.hostProcess=true)"
    );
    assert!(verdict(latest(SecurityLevel::Privileged), spec).allowed());
}

#[test]
fn windows_host_process_container_is_named() {
    let spec = json!({
        "containers": [
            {"name": "ok", "image": "x"},
            {
                "name": "node-agent",
                "image": "x",
                "securityContext": {"windowsOptions": {"hostProcess": true}}
            }
        ]
    });
    let baseline = verdict(latest(SecurityLevel::Baseline), spec);
    assert_eq!(
        baseline.summary(),
        "hostProcess (container \"node-agent\" must not set securityContext.windowsOptions.hostProcess=true)"
    );
}

#[test]
fn privileged_container_is_named() {
    let spec = json!({
        "containers": [
            {"name": "ok", "image": "x"},
            {"name": "root", "image": "x", "securityContext": {"privileged": true}}
        ]
    });
    let baseline = verdict(latest(SecurityLevel::Baseline), spec);
    assert_eq!(
        baseline.summary(),
        "privileged (container \"root\" must not set securityContext.privileged=true)"
    );
}

#[test]
fn extra_capabilities_fail_baseline() {
    let spec = json!({
        "containers": [{
            "name": "net",
            "image": "x",
            "securityContext": {"capabilities": {"add": ["NET_ADMIN", "CHOWN"]}}
        }]
    });
    let baseline = verdict(latest(SecurityLevel::Baseline), spec);
    assert_eq!(reasons(&baseline), vec!["non-default capabilities"]);
    assert!(baseline.summary().contains("\"NET_ADMIN\""));
    assert!(!baseline.summary().contains("CHOWN"));
}

#[test]
fn host_path_and_host_port_fail_baseline() {
    let spec = json!({
        "containers": [{
            "name": "app",
            "image": "x",
            "ports": [{"containerPort": 80, "hostPort": 8080}]
        }],
        "volumes": [{"name": "logs", "hostPath": {"path": "/var/log"}}]
    });
    let baseline = verdict(latest(SecurityLevel::Baseline), spec);
    assert_eq!(reasons(&baseline), vec!["hostPath volumes", "hostPort"]);
}

#[test]
fn unsafe_sysctl_fails_baseline() {
    let spec = json!({
        "securityContext": {"sysctls": [
            {"name": "net.ipv4.tcp_syncookies", "value": "1"},
            {"name": "kernel.msgmax", "value": "65536"}
        ]},
        "containers": [{"name": "app", "image": "x"}]
    });
    let baseline = verdict(latest(SecurityLevel::Baseline), spec);
    assert_eq!(baseline.summary(), "forbidden sysctls (kernel.msgmax)");
}

#[test]
fn unconfined_seccomp_fails_baseline() {
    let spec = json!({
        "securityContext": {"seccompProfile": {"type": "Unconfined"}},
        "containers": [{"name": "app", "image": "x"}]
    });
    let baseline = verdict(latest(SecurityLevel::Baseline), spec);
    assert_eq!(reasons(&baseline), vec!["seccompProfile"]);
}

#[test]
fn apparmor_annotation_is_checked() {
    let metadata = ObjectMeta {
        annotations: Some(
            [(
                "container.apparmor.security.beta.kubernetes.io/app".to_owned(),
                "unconfined".to_owned(),
            )]
            .into_iter()
            .collect(),
        ),
        ..ObjectMeta::default()
    };
    let verdict = checks().evaluate_pod(
        latest(SecurityLevel::Baseline),
        &metadata,
        &pod_spec(baseline_spec()),
    );
    assert_eq!(reasons(&verdict), vec!["forbidden AppArmor profile"]);
}

#[test]
fn restricted_volume_types() {
    let mut spec = restricted_spec();
    spec["volumes"] = json!([
        {"name": "cache", "emptyDir": {}},
        {"name": "data", "nfs": {"server": "nas", "path": "/data"}}
    ]);
    let restricted = verdict(latest(SecurityLevel::Restricted), spec.clone());
    assert_eq!(reasons(&restricted), vec!["restricted volume types"]);
    assert!(restricted.summary().contains("\"data\""));
    assert!(restricted.summary().contains("nfs"));
    assert!(verdict(latest(SecurityLevel::Baseline), spec).allowed());
}

#[test]
fn run_as_root_fails_restricted() {
    let mut spec = restricted_spec();
    spec["securityContext"]["runAsUser"] = json!(0);
    let restricted = verdict(latest(SecurityLevel::Restricted), spec);
    assert_eq!(reasons(&restricted), vec!["runAsUser=0"]);
}

#[test]
fn net_bind_service_is_the_only_addable_capability() {
    let mut spec = restricted_spec();
    spec["containers"][0]["securityContext"]["capabilities"]["add"] = json!(["NET_BIND_SERVICE"]);
    assert!(verdict(latest(SecurityLevel::Restricted), spec.clone()).allowed());
    spec["containers"][0]["securityContext"]["capabilities"]["add"] = json!(["SYS_TIME"]);
    let restricted = verdict(latest(SecurityLevel::Restricted), spec);
    assert!(reasons(&restricted).contains(&"unrestricted capabilities"));
}

#[test]
fn init_and_ephemeral_containers_are_checked() {
    let mut spec = restricted_spec();
    spec["initContainers"] = json!([
        {"name": "setup", "image": "x", "securityContext": {"privileged": true}}
    ]);
    let baseline = verdict(latest(SecurityLevel::Baseline), spec);
    assert!(baseline.summary().contains("\"setup\""));
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

#[test]
fn old_policy_versions_skip_newer_controls() {
    let old = LevelVersion::new(
        SecurityLevel::Restricted,
        PolicyVersion::Pinned {
            major: 1,
            minor: 21,
        },
    );
    let restricted = verdict(old, baseline_spec());
    let found = reasons(&restricted);
    assert!(!found.contains(&"unrestricted capabilities"));
    assert!(found.contains(&"runAsNonRoot != true"));
}
