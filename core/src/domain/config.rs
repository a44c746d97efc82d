// SPDX-License-Identifier: Apache-2.0

//! Topology configuration file model (`blockade.yaml`): parsing, `${VAR}`
//! substitution, `count` expansion, and dependency-order sorting.

use std::collections::{HashMap, HashSet, VecDeque};
use std::env;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::container::{ContainerConfig, LinkTarget};
use crate::domain::errors::BlockadeError;

/// Default network impairment parameters applied when a fault subcommand
/// is invoked with no explicit parameters.
pub const DEFAULT_FLAKY: &str = "30%";
pub const DEFAULT_SLOW: &str = "75ms 100ms distribution normal";
pub const DEFAULT_DUPLICATE: &str = "5%";

/// Which Docker network backs a topology's containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDriver {
    /// The Docker default bridge, with per-container `links:`.
    Default,
    /// A dedicated user-defined network, named `<topology-id>_net`, created
    /// on `up` and removed on `destroy`.
    Udn,
}

impl Default for NetworkDriver {
    fn default() -> Self {
        NetworkDriver::Default
    }
}

/// Top-level `network:` section of the topology config: which driver backs
/// the topology, and default impairment parameters used whenever a fault is
/// requested with no explicit params.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub driver: NetworkDriver,
    #[serde(default)]
    pub flaky: Option<String>,
    #[serde(default)]
    pub slow: Option<String>,
    #[serde(default)]
    pub duplicate: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig { driver: NetworkDriver::default(), flaky: None, slow: None, duplicate: None }
    }
}

impl NetworkConfig {
    pub fn flaky_params(&self) -> &str {
        self.flaky.as_deref().unwrap_or(DEFAULT_FLAKY)
    }

    pub fn slow_params(&self) -> &str {
        self.slow.as_deref().unwrap_or(DEFAULT_SLOW)
    }

    pub fn duplicate_params(&self) -> &str {
        self.duplicate.as_deref().unwrap_or(DEFAULT_DUPLICATE)
    }
}

/// Raw, pre-expansion container declaration as it appears in the YAML
/// config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawContainerConfig {
    pub image: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub links: serde_yaml::Value,
    #[serde(default)]
    pub volumes: serde_yaml::Value,
    #[serde(default)]
    pub publish_ports: serde_yaml::Value,
    #[serde(default)]
    pub expose_ports: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub start_delay: u64,
    #[serde(default)]
    pub neutral: bool,
    #[serde(default)]
    pub holy: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub dns: Vec<String>,
}

/// The parsed, ready-to-use topology configuration.
#[derive(Debug, Clone, Default)]
pub struct BlockadeConfig {
    pub containers: Vec<ContainerConfig>,
    pub network: NetworkConfig,
}

/// Raw top-level shape of `blockade.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawBlockadeConfig {
    #[serde(default)]
    pub containers: HashMap<String, RawContainerConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl BlockadeConfig {
    pub fn empty() -> Self {
        BlockadeConfig { containers: Vec::new(), network: NetworkConfig::default() }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, BlockadeError> {
        let expanded = populate_env(yaml)?;
        let raw: RawBlockadeConfig = serde_yaml::from_str(&expanded)
            .map_err(|e| BlockadeError::ConfigError(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, BlockadeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BlockadeError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    fn from_raw(raw: RawBlockadeConfig) -> Result<Self, BlockadeError> {
        let mut containers = Vec::new();
        for (base_name, raw_container) in raw.containers {
            let names = expand_count(&base_name, raw_container.count);
            for name in names {
                containers.push(ContainerConfig {
                    name,
                    image: raw_container.image.clone(),
                    command: raw_container.command.clone(),
                    hostname: raw_container.hostname.clone(),
                    container_name: raw_container.container_name.clone(),
                    links: dictify_links(&raw_container.links)?,
                    volumes: dictify_volumes(&raw_container.volumes)?,
                    publish_ports: dictify_identity(&raw_container.publish_ports)?,
                    expose_ports: {
                        let publish_ports = dictify_identity(&raw_container.publish_ports)?;
                        union_expose_ports(&raw_container.expose_ports, &publish_ports)
                    },
                    environment: raw_container.environment.clone(),
                    start_delay: raw_container.start_delay,
                    neutral: raw_container.neutral,
                    holy: raw_container.holy,
                    privileged: raw_container.privileged,
                    cap_add: raw_container.cap_add.clone(),
                    dns: raw_container.dns.clone(),
                });
            }
        }

        let config = BlockadeConfig { containers, network: raw.network };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BlockadeError> {
        let mut names = HashSet::new();
        let mut runtime_names = HashSet::new();
        for c in &self.containers {
            if !names.insert(c.name.clone()) {
                return Err(BlockadeError::ContainerConflict(c.name.clone()));
            }
            if !runtime_names.insert(c.runtime_name().to_string()) {
                return Err(BlockadeError::ConfigError(format!(
                    "duplicate container-runtime name '{}'",
                    c.runtime_name()
                )));
            }
            if c.neutral && c.holy {
                return Err(BlockadeError::ConfigError(format!(
                    "container '{}' cannot be both neutral and holy",
                    c.name
                )));
            }
        }
        let known: HashSet<String> = self.containers.iter().map(|c| c.name.clone()).collect();
        for c in &self.containers {
            for link in &c.links {
                if !known.contains(&link.name) {
                    return Err(BlockadeError::ConfigError(format!(
                        "container '{}' links to unknown container '{}'",
                        c.name, link.name
                    )));
                }
            }
        }
        // dependency_sorted() already errs on cycles, but run it here too so
        // a cyclic config is rejected the moment it's loaded.
        dependency_sorted(&self.containers)?;
        Ok(())
    }

    pub fn container(&self, name: &str) -> Option<&ContainerConfig> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// All published (container-side) ports must also be exposed: union the
/// declared `expose:` list with every container port named in
/// `publish_ports` (whose values are the container-side port, keyed by host
/// port — see [`dictify_identity`]), deduplicated, matching `config.py`'s
/// `self.expose_ports = list(set(int(port) for port in (expose_ports or [])
/// + list(self.publish_ports.values())))`.
fn union_expose_ports(declared: &[String], publish_ports: &HashMap<String, String>) -> Vec<String> {
    let mut set: HashSet<String> = declared.iter().cloned().collect();
    set.extend(publish_ports.values().cloned());
    let mut ports: Vec<String> = set.into_iter().collect();
    ports.sort();
    ports
}

/// `name_1`, `name_2`, ... `name_N` when `count` is given; otherwise just
/// `name` unchanged.
fn expand_count(base_name: &str, count: Option<u32>) -> Vec<String> {
    match count {
        None | Some(0) | Some(1) => vec![base_name.to_string()],
        Some(n) => (1..=n).map(|i| format!("{}_{}", base_name, i)).collect(),
    }
}

/// Normalize a `links:` value into target/alias pairs. Accepts a list of
/// bare names (`["a", "b"]`, alias defaults to the target's own name), a
/// list of `"name:alias"` pairs, or a map (`{a: alias_a, b: alias_b}`).
fn dictify_links(value: &serde_yaml::Value) -> Result<Vec<LinkTarget>, BlockadeError> {
    match value {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .map(|v| {
                let s = v
                    .as_str()
                    .ok_or_else(|| BlockadeError::ConfigError("expected a string list".into()))?;
                Ok(match s.split_once(':') {
                    Some((name, alias)) => LinkTarget { name: name.to_string(), alias: alias.to_string() },
                    None => LinkTarget { name: s.to_string(), alias: s.to_string() },
                })
            })
            .collect(),
        serde_yaml::Value::Mapping(map) => map
            .iter()
            .map(|(k, v)| {
                let name = k
                    .as_str()
                    .ok_or_else(|| BlockadeError::ConfigError("expected string keys".into()))?
                    .to_string();
                let alias = v
                    .as_str()
                    .ok_or_else(|| BlockadeError::ConfigError("expected a string alias".into()))?
                    .to_string();
                Ok(LinkTarget { name, alias })
            })
            .collect(),
        _ => Err(BlockadeError::ConfigError(
            "expected a list or mapping".into(),
        )),
    }
}

/// Coerce a YAML scalar (string or number) to a string, the way the
/// original's `_dictify` stringifies every key/value with `str(...)`.
fn scalar_to_string(value: &serde_yaml::Value) -> Result<String, BlockadeError> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(BlockadeError::ConfigError("expected a scalar value".into())),
    }
}

/// Normalize a YAML value into a `HashMap<String, String>` the way the
/// original's `_dictify` does for `ports`: a list entry maps to itself
/// (`[8080]` -> `{8080: 8080}`, i.e. host port == container port), a
/// mapping entry keeps its explicit `host: container` pairing (falling
/// back to the key when the value is empty).
fn dictify_identity(value: &serde_yaml::Value) -> Result<HashMap<String, String>, BlockadeError> {
    match value {
        serde_yaml::Value::Null => Ok(HashMap::new()),
        serde_yaml::Value::Mapping(map) => {
            let mut out = HashMap::new();
            for (k, v) in map {
                let key = scalar_to_string(k)?;
                let val = if v.is_null() { key.clone() } else { scalar_to_string(v)? };
                out.insert(key, val);
            }
            Ok(out)
        }
        serde_yaml::Value::Sequence(seq) => {
            let mut out = HashMap::new();
            for entry in seq {
                let s = scalar_to_string(entry)?;
                out.insert(s.clone(), s);
            }
            Ok(out)
        }
        _ => Err(BlockadeError::ConfigError("expected a list or mapping".into())),
    }
}

/// Normalize a `volumes:` value the way the original's `_dictify` does: a
/// list entry's host and container path are both that entry, resolved to
/// an absolute path (relative to the process's current directory); a
/// mapping entry's value is likewise resolved to an absolute path,
/// defaulting to the key when empty.
fn dictify_volumes(value: &serde_yaml::Value) -> Result<HashMap<String, String>, BlockadeError> {
    let raw = dictify_identity(value)?;
    let cwd = env::current_dir()
        .map_err(|e| BlockadeError::ConfigError(format!("cannot resolve current directory: {e}")))?;
    let mut out = HashMap::with_capacity(raw.len());
    for (k, v) in raw {
        out.insert(k, abspath(&cwd, &v));
    }
    Ok(out)
}

fn abspath(cwd: &Path, path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_string_lossy().to_string()
    } else {
        cwd.join(p).to_string_lossy().to_string()
    }
}

/// Replace `${VAR}` references with environment variable values, plus the
/// two builtins `PWD`/`CWD` (both resolve to the process's current
/// directory). Unknown variables are left as an empty string, matching the
/// historical behavior this supplants.
pub fn populate_env(text: &str) -> Result<String, BlockadeError> {
    let re = Regex::new(r"\$\{([a-zA-Z][-_a-zA-Z0-9]*)\}").expect("static regex is valid");
    let cwd = env::current_dir()
        .map_err(|e| BlockadeError::ConfigError(format!("cannot resolve current directory: {e}")))?;
    let cwd = cwd.to_string_lossy().to_string();

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in re.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        let caps = re.captures(m.as_str()).expect("matched by same regex");
        let var = &caps[1];
        let replacement = match var {
            "PWD" | "CWD" => cwd.clone(),
            other => env::var(other).unwrap_or_default(),
        };
        out.push_str(&replacement);
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Kahn's-algorithm topological sort of containers by `links`, so
/// dependencies are always started before their dependents.
pub fn dependency_sorted(containers: &[ContainerConfig]) -> Result<Vec<ContainerConfig>, BlockadeError> {
    let by_name: HashMap<&str, &ContainerConfig> =
        containers.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut in_degree: HashMap<&str, usize> =
        containers.iter().map(|c| (c.name.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for c in containers {
        for link in &c.links {
            if !by_name.contains_key(link.name.as_str()) {
                return Err(BlockadeError::ConfigError(format!(
                    "container '{}' links to unknown container '{}'",
                    c.name, link.name
                )));
            }
            *in_degree.get_mut(c.name.as_str()).unwrap() += 1;
            dependents.entry(link.name.as_str()).or_default().push(c.name.as_str());
        }
    }

    // Deterministic order: process in declared order among zero-in-degree nodes.
    let mut initial: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();
    initial.sort_by_key(|name| containers.iter().position(|c| c.name == *name).unwrap());
    let mut queue: VecDeque<&str> = initial.into();

    let mut sorted = Vec::with_capacity(containers.len());
    while let Some(name) = queue.pop_front() {
        sorted.push((*by_name.get(name).unwrap()).clone());
        if let Some(deps) = dependents.get(name) {
            let mut newly_free = Vec::new();
            for dep in deps {
                let deg = in_degree.get_mut(dep).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_free.push(*dep);
                }
            }
            newly_free.sort_by_key(|name| containers.iter().position(|c| c.name == *name).unwrap());
            for dep in newly_free {
                queue.push_back(dep);
            }
        }
    }

    if sorted.len() != containers.len() {
        return Err(BlockadeError::ConfigError(
            "cycle detected in container links".into(),
        ));
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, links: &[&str]) -> ContainerConfig {
        ContainerConfig {
            name: name.to_string(),
            image: "busybox".to_string(),
            command: None,
            hostname: None,
            container_name: None,
            links: links
                .iter()
                .map(|s| LinkTarget { name: s.to_string(), alias: s.to_string() })
                .collect(),
            volumes: HashMap::new(),
            publish_ports: HashMap::new(),
            expose_ports: Vec::new(),
            environment: HashMap::new(),
            start_delay: 0,
            neutral: false,
            holy: false,
            privileged: false,
            cap_add: Vec::new(),
            dns: Vec::new(),
        }
    }

    #[test]
    fn dependency_sort_orders_links_before_dependents() {
        let containers = vec![
            container("c1", &["c2"]),
            container("c2", &["c3"]),
            container("c3", &[]),
        ];
        let sorted = dependency_sorted(&containers).unwrap();
        let pos = |n: &str| sorted.iter().position(|c| c.name == n).unwrap();
        assert!(pos("c3") < pos("c2"));
        assert!(pos("c2") < pos("c1"));
    }

    #[test]
    fn dependency_sort_rejects_cycle() {
        let containers = vec![container("a", &["b"]), container("b", &["a"])];
        assert!(dependency_sorted(&containers).is_err());
    }

    #[test]
    fn populate_env_substitutes_pwd() {
        let expanded = populate_env("path=${PWD}/data").unwrap();
        assert!(!expanded.contains("${PWD}"));
        assert!(expanded.ends_with("/data"));
    }

    #[test]
    fn from_yaml_expands_count() {
        let yaml = r#"
containers:
  worker:
    image: busybox
    count: 3
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.containers.len(), 3);
        assert!(config.container("worker_1").is_some());
        assert!(config.container("worker_3").is_some());
    }

    #[test]
    fn links_map_form_carries_alias() {
        let yaml = r#"
containers:
  db:
    image: busybox
  web:
    image: busybox
    links:
      db: database
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        let web = config.container("web").unwrap();
        assert_eq!(web.links, vec![LinkTarget { name: "db".to_string(), alias: "database".to_string() }]);
    }

    #[test]
    fn links_list_form_defaults_alias_to_name() {
        let yaml = r#"
containers:
  db:
    image: busybox
  web:
    image: busybox
    links: [db]
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        let web = config.container("web").unwrap();
        assert_eq!(web.links, vec![LinkTarget { name: "db".to_string(), alias: "db".to_string() }]);
    }

    #[test]
    fn duplicate_container_runtime_names_are_rejected() {
        let yaml = r#"
containers:
  a:
    image: busybox
    container_name: shared
  b:
    image: busybox
    container_name: shared
"#;
        assert!(BlockadeConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn publish_ports_list_form_is_identity_mapped() {
        let yaml = r#"
containers:
  web:
    image: busybox
    publish_ports: [8080, 8443]
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        let web = config.container("web").unwrap();
        assert_eq!(web.publish_ports.get("8080"), Some(&"8080".to_string()));
        assert_eq!(web.publish_ports.get("8443"), Some(&"8443".to_string()));
    }

    #[test]
    fn publish_ports_map_form_keeps_explicit_pairing() {
        let yaml = r#"
containers:
  web:
    image: busybox
    publish_ports:
      8080: 80
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        let web = config.container("web").unwrap();
        assert_eq!(web.publish_ports.get("8080"), Some(&"80".to_string()));
    }

    #[test]
    fn expose_ports_includes_published_container_ports() {
        let yaml = r#"
containers:
  web:
    image: busybox
    expose_ports: ["9000"]
    publish_ports:
      8080: 80
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        let web = config.container("web").unwrap();
        assert!(web.expose_ports.contains(&"9000".to_string()));
        assert!(web.expose_ports.contains(&"80".to_string()));
        assert!(!web.expose_ports.contains(&"8080".to_string()));
    }

    #[test]
    fn volumes_list_form_resolves_to_absolute_identity_mount() {
        let yaml = r#"
containers:
  web:
    image: busybox
    volumes: [./data]
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        let web = config.container("web").unwrap();
        let (host, container) = web.volumes.iter().next().unwrap();
        assert_eq!(host, container);
        assert!(Path::new(host).is_absolute());
    }

    #[test]
    fn network_section_overrides_defaults() {
        let yaml = r#"
network:
  driver: udn
  flaky: 50%
containers:
  a:
    image: busybox
"#;
        let config = BlockadeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.network.driver, NetworkDriver::Udn);
        assert_eq!(config.network.flaky_params(), "50%");
        assert_eq!(config.network.slow_params(), DEFAULT_SLOW);
    }
}
