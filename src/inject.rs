//! Pod transformation
//!
//! Produces a copy of an admitted pod with the monitoring agent attached:
//! - `agent-root`, `agent-config` and `agent-podinfo` volumes
//! - an `install-agent` init container that unpacks the agent into `agent-root`
//! - per application container, the preload mounts plus `LD_PRELOAD` and
//!   `CONTAINER_NAME` environment entries
//!
//! Every element is appended only when no element with the same identity
//! exists, so injecting an already injected pod returns it unchanged.
//! Append order is fixed; equal inputs produce byte-identical pods.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, DownwardAPIVolumeFile, DownwardAPIVolumeSource, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ObjectFieldSelector, Pod, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};

use crate::policy::{Flavor, InjectionDecision};
use crate::INJECTED_ANNOTATION;

/// Scratch volume the installer unpacks the agent into
pub const AGENT_ROOT_VOLUME: &str = "agent-root";
/// Secret volume carrying the installer script and tenant configuration
pub const AGENT_CONFIG_VOLUME: &str = "agent-config";
/// Downward API volume exposing pod metadata to the agent
pub const AGENT_PODINFO_VOLUME: &str = "agent-podinfo";
/// Name of the installer init container
pub const INSTALL_CONTAINER_NAME: &str = "install-agent";
/// Secret backing [`AGENT_CONFIG_VOLUME`]
pub const CONFIG_SECRET_NAME: &str = "agent-webhook-config";

/// Agent runtime directory inside every container
pub const AGENT_RUNTIME_DIR: &str = "/opt/agent";
/// Pod metadata directory read by the agent
pub const AGENT_PODINFO_DIR: &str = "/opt/agent/conf/pod";
/// Preload library loaded into every process
pub const PRELOAD_LIBRARY: &str = "/opt/agent/lib64/libagentproc.so";
/// System-wide preload list mounted over the container's own
pub const PRELOAD_FILE_PATH: &str = "/etc/ld.so.preload";
/// File inside `agent-root` mounted at [`PRELOAD_FILE_PATH`]
pub const PRELOAD_FILE_SUBPATH: &str = "ld.so.preload";
/// Mount point of the config secret inside the installer
pub const CONFIG_MOUNT_PATH: &str = "/mnt/config";
/// Installer entrypoint script shipped in the config secret
pub const INSTALLER_SCRIPT: &str = "/mnt/config/init.sh";

/// Env var carrying the selected flavor to the installer
pub const FLAVOR_ENV: &str = "FLAVOR";
/// Env var naming the node the pod is scheduled on
pub const NODENAME_ENV: &str = "NODENAME";
/// Env var carrying the host IP
pub const NODEIP_ENV: &str = "NODEIP";
/// Preload env var set on application containers
pub const LD_PRELOAD_ENV: &str = "LD_PRELOAD";
/// Env var carrying the container's own name to the agent
pub const CONTAINER_NAME_ENV: &str = "CONTAINER_NAME";

/// Apply a policy decision to a pod
///
/// [`InjectionDecision::Skip`] returns an identical copy.
pub fn apply_decision(pod: &Pod, decision: &InjectionDecision, installer_image: &str) -> Pod {
    match decision {
        InjectionDecision::Skip => pod.clone(),
        InjectionDecision::Inject(flavor) => inject_agent(pod, flavor, installer_image),
    }
}

/// Return a copy of `pod` with the agent attached
///
/// The input is never modified.
pub fn inject_agent(pod: &Pod, flavor: &Flavor, installer_image: &str) -> Pod {
    let mut injected = pod.clone();

    injected
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(INJECTED_ANNOTATION.to_string(), "true".to_string());

    let spec = injected.spec.get_or_insert_with(PodSpec::default);

    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    for volume in agent_volumes() {
        if !volumes.iter().any(|v| v.name == volume.name) {
            volumes.push(volume);
        }
    }

    let init_containers = spec.init_containers.get_or_insert_with(Vec::new);
    if !init_containers
        .iter()
        .any(|c| c.name == INSTALL_CONTAINER_NAME)
    {
        init_containers.push(installer_container(flavor, installer_image));
    }

    for container in &mut spec.containers {
        instrument_container(container);
    }

    injected
}

/// The three agent volumes, in append order
fn agent_volumes() -> [Volume; 3] {
    let pod_field = |path: &str, field: &str| DownwardAPIVolumeFile {
        path: path.to_string(),
        field_ref: Some(field_selector(field)),
        ..Default::default()
    };

    [
        Volume {
            name: AGENT_ROOT_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: AGENT_CONFIG_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(CONFIG_SECRET_NAME.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: AGENT_PODINFO_VOLUME.to_string(),
            downward_api: Some(DownwardAPIVolumeSource {
                items: Some(vec![
                    pod_field("name", "metadata.name"),
                    pod_field("namespace", "metadata.namespace"),
                    pod_field("uid", "metadata.uid"),
                    pod_field("labels", "metadata.labels"),
                    pod_field("annotations", "metadata.annotations"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

fn installer_container(flavor: &Flavor, installer_image: &str) -> Container {
    Container {
        name: INSTALL_CONTAINER_NAME.to_string(),
        image: Some(installer_image.to_string()),
        args: Some(vec!["bash".to_string(), INSTALLER_SCRIPT.to_string()]),
        env: Some(vec![
            plain_env(FLAVOR_ENV, flavor.as_str()),
            field_env(NODENAME_ENV, "spec.nodeName"),
            field_env(NODEIP_ENV, "status.hostIP"),
        ]),
        volume_mounts: Some(vec![
            mount(AGENT_ROOT_VOLUME, AGENT_RUNTIME_DIR, None),
            mount(AGENT_CONFIG_VOLUME, CONFIG_MOUNT_PATH, None),
        ]),
        ..Default::default()
    }
}

/// Attach preload mounts and env entries to one application container
fn instrument_container(container: &mut Container) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    for wanted in [
        mount(AGENT_ROOT_VOLUME, PRELOAD_FILE_PATH, Some(PRELOAD_FILE_SUBPATH)),
        mount(AGENT_ROOT_VOLUME, AGENT_RUNTIME_DIR, None),
        mount(AGENT_PODINFO_VOLUME, AGENT_PODINFO_DIR, None),
    ] {
        // Two mounts share `agent-root`; the mount path is what identifies them.
        if !mounts.iter().any(|m| m.mount_path == wanted.mount_path) {
            mounts.push(wanted);
        }
    }

    let own_name = container.name.clone();
    let env = container.env.get_or_insert_with(Vec::new);
    for wanted in [
        plain_env(LD_PRELOAD_ENV, PRELOAD_LIBRARY),
        plain_env(CONTAINER_NAME_ENV, &own_name),
    ] {
        if !env.iter().any(|e| e.name == wanted.name) {
            env.push(wanted);
        }
    }
}

fn mount(volume: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        sub_path: sub_path.map(str::to_string),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(field_selector(field_path)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_selector(field_path: &str) -> ObjectFieldSelector {
    ObjectFieldSelector {
        field_path: field_path.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const IMAGE: &str = "docker.io/agent/installer:latest";

    pub(crate) fn make_pod(containers: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|name| Container {
                        name: name.to_string(),
                        image: Some("nginx".to_string()),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn spec(pod: &Pod) -> &PodSpec {
        pod.spec.as_ref().expect("pod should have a spec")
    }

    fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
        container
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    // =========================================================================
    // Unit Tests
    // =========================================================================

    #[test]
    fn test_volumes_appended_in_order() {
        let pod = inject_agent(&make_pod(&["app"]), &Flavor::default(), IMAGE);
        let names: Vec<_> = spec(&pod)
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| v.name.as_str())
            .collect();

        assert_eq!(
            names,
            vec![AGENT_ROOT_VOLUME, AGENT_CONFIG_VOLUME, AGENT_PODINFO_VOLUME]
        );
    }

    #[test]
    fn test_volume_sources() {
        let pod = inject_agent(&make_pod(&["app"]), &Flavor::default(), IMAGE);
        let volumes = spec(&pod).volumes.as_ref().unwrap();

        assert!(volumes[0].empty_dir.is_some());
        assert_eq!(
            volumes[1].secret.as_ref().unwrap().secret_name.as_deref(),
            Some(CONFIG_SECRET_NAME)
        );

        let items = volumes[2]
            .downward_api
            .as_ref()
            .unwrap()
            .items
            .as_ref()
            .unwrap();
        let paths: Vec<_> = items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "namespace", "uid", "labels", "annotations"]);
        assert_eq!(
            items[2].field_ref.as_ref().unwrap().field_path,
            "metadata.uid"
        );
    }

    #[test]
    fn test_installer_container() {
        let flavor = Flavor::from_annotation(Some("musl"));
        let pod = inject_agent(&make_pod(&["app"]), &flavor, IMAGE);
        let init = &spec(&pod).init_containers.as_ref().unwrap()[0];

        assert_eq!(init.name, INSTALL_CONTAINER_NAME);
        assert_eq!(init.image.as_deref(), Some(IMAGE));
        assert_eq!(
            init.args.as_ref().unwrap(),
            &vec!["bash".to_string(), INSTALLER_SCRIPT.to_string()]
        );
        assert_eq!(env_value(init, FLAVOR_ENV), Some("musl"));

        let env = init.env.as_ref().unwrap();
        let node_ref = env[1].value_from.as_ref().unwrap().field_ref.as_ref().unwrap();
        assert_eq!(env[1].name, NODENAME_ENV);
        assert_eq!(node_ref.field_path, "spec.nodeName");
        let ip_ref = env[2].value_from.as_ref().unwrap().field_ref.as_ref().unwrap();
        assert_eq!(env[2].name, NODEIP_ENV);
        assert_eq!(ip_ref.field_path, "status.hostIP");

        let mounts: Vec<_> = init
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| (m.name.as_str(), m.mount_path.as_str()))
            .collect();
        assert_eq!(
            mounts,
            vec![
                (AGENT_ROOT_VOLUME, AGENT_RUNTIME_DIR),
                (AGENT_CONFIG_VOLUME, CONFIG_MOUNT_PATH)
            ]
        );
    }

    #[test]
    fn test_application_container_mounts_and_env() {
        let pod = inject_agent(&make_pod(&["app"]), &Flavor::default(), IMAGE);
        let app = &spec(&pod).containers[0];

        let mounts = app.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[0].name, AGENT_ROOT_VOLUME);
        assert_eq!(mounts[0].mount_path, PRELOAD_FILE_PATH);
        assert_eq!(mounts[0].sub_path.as_deref(), Some(PRELOAD_FILE_SUBPATH));
        assert_eq!(mounts[1].mount_path, AGENT_RUNTIME_DIR);
        assert_eq!(mounts[2].name, AGENT_PODINFO_VOLUME);
        assert_eq!(mounts[2].mount_path, AGENT_PODINFO_DIR);

        let env = app.env.as_ref().unwrap();
        assert_eq!(env[0].name, LD_PRELOAD_ENV);
        assert_eq!(env[0].value.as_deref(), Some(PRELOAD_LIBRARY));
        assert_eq!(env_value(app, CONTAINER_NAME_ENV), Some("app"));
    }

    #[test]
    fn test_existing_elements_untouched() {
        let mut pod = make_pod(&["app"]);
        {
            let spec = pod.spec.as_mut().unwrap();
            spec.volumes = Some(vec![Volume {
                name: AGENT_ROOT_VOLUME.to_string(),
                host_path: Some(Default::default()),
                ..Default::default()
            }]);
            spec.containers[0].env = Some(vec![plain_env(LD_PRELOAD_ENV, "/custom.so")]);
        }

        let injected = inject_agent(&pod, &Flavor::default(), IMAGE);
        let volumes = spec(&injected).volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 3);
        assert!(volumes[0].host_path.is_some(), "user volume kept as is");
        assert!(volumes[0].empty_dir.is_none());

        let app = &spec(&injected).containers[0];
        assert_eq!(env_value(app, LD_PRELOAD_ENV), Some("/custom.so"));
        assert_eq!(app.env.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_input_not_modified() {
        let pod = make_pod(&["app"]);
        let before = pod.clone();
        let _ = inject_agent(&pod, &Flavor::default(), IMAGE);
        assert_eq!(pod, before);
    }

    #[test]
    fn test_pod_without_spec_gets_volumes_and_installer() {
        let pod = Pod::default();
        let injected = inject_agent(&pod, &Flavor::default(), IMAGE);
        assert_eq!(spec(&injected).volumes.as_ref().unwrap().len(), 3);
        assert_eq!(spec(&injected).init_containers.as_ref().unwrap().len(), 1);
        assert!(spec(&injected).containers.is_empty());
    }

    #[test]
    fn test_skip_decision_is_identity() {
        let pod = make_pod(&["app"]);
        assert_eq!(apply_decision(&pod, &InjectionDecision::Skip, IMAGE), pod);
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: an untouched pod in an opted-in namespace gets the whole agent
    #[test]
    fn story_empty_pod_gets_agent() {
        let pod = make_pod(&["app"]);
        let injected = inject_agent(&pod, &Flavor::default(), IMAGE);

        assert_eq!(
            injected
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(INJECTED_ANNOTATION))
                .map(String::as_str),
            Some("true")
        );
        let init = &spec(&injected).init_containers.as_ref().unwrap()[0];
        assert_eq!(env_value(init, FLAVOR_ENV), Some("default"));
    }

    /// Story: sidecar-style pods get every container instrumented
    #[test]
    fn story_multi_container_pod() {
        let injected = inject_agent(&make_pod(&["api", "worker"]), &Flavor::default(), IMAGE);

        for (container, expected) in spec(&injected).containers.iter().zip(["api", "worker"]) {
            assert_eq!(env_value(container, CONTAINER_NAME_ENV), Some(expected));
            assert_eq!(env_value(container, LD_PRELOAD_ENV), Some(PRELOAD_LIBRARY));
            assert_eq!(container.volume_mounts.as_ref().unwrap().len(), 3);
        }
    }

    /// Story: a re-admitted pod is not injected twice
    #[test]
    fn story_reinjection_is_noop() {
        let once = inject_agent(&make_pod(&["app"]), &Flavor::default(), IMAGE);
        let twice = inject_agent(&once, &Flavor::default(), IMAGE);
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }
}
