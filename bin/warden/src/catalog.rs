use anyhow::{Context, anyhow};
use indexmap::IndexMap;
use serde::Deserialize;
use warden_client::entities::service::{
  EnvFieldConfig, ServiceCategory, ServiceDescriptor,
};

use crate::config::warden_config;

/// Canonical core boot order, used to tie-break the
/// topological sort. Addons always rank before core.
const CORE_BOOT_ORDER: [&str; 6] = [
  "noona-redis",
  "noona-mongo",
  "noona-vault",
  "noona-moon",
  "noona-portal",
  "noona-raven",
];

/// The normalized service catalog, loaded once at startup.
pub struct Catalog {
  services: IndexMap<String, ServiceDescriptor>,
}

#[derive(Deserialize)]
struct CatalogFile {
  #[serde(default)]
  services: Vec<ServiceDescriptor>,
}

impl Catalog {
  pub fn load() -> anyhow::Result<Catalog> {
    let descriptors = match &warden_config().catalog_path {
      Some(path) => {
        let contents = std::fs::read_to_string(path)
          .with_context(|| {
            format!("failed to read catalog file at {path:?}")
          })?;
        let file: CatalogFile = toml::from_str(&contents)
          .context("failed to parse catalog file")?;
        file.services
      }
      None => default_catalog(),
    };
    Catalog::new(descriptors)
  }

  pub fn new(
    descriptors: Vec<ServiceDescriptor>,
  ) -> anyhow::Result<Catalog> {
    let mut services = IndexMap::new();
    for descriptor in descriptors {
      if descriptor.name.trim().is_empty() {
        return Err(anyhow!(
          "catalog contains a service without a name"
        ));
      }
      let name = descriptor.name.clone();
      if services.insert(name.clone(), descriptor).is_some() {
        return Err(anyhow!("duplicate service in catalog: {name}"));
      }
    }
    let catalog = Catalog { services };
    // Fail load on unresolved dependencies or cycles.
    for name in catalog.services.keys() {
      catalog.closure(std::slice::from_ref(name))?;
    }
    Ok(catalog)
  }

  pub fn get(
    &self,
    name: &str,
  ) -> anyhow::Result<&ServiceDescriptor> {
    self
      .services
      .get(name)
      .with_context(|| format!("unknown service: {name}"))
  }

  pub fn list(
    &self,
  ) -> impl Iterator<Item = &ServiceDescriptor> {
    self.services.values()
  }

  /// Stable topological sort of the transitive dependency
  /// closure of `names`, dependencies first. Ties break on
  /// the super boot order, then catalog order.
  pub fn closure(
    &self,
    names: &[String],
  ) -> anyhow::Result<Vec<String>> {
    let mut roots = Vec::new();
    for name in names {
      let descriptor = self.get(name)?;
      if !roots
        .iter()
        .any(|root: &&ServiceDescriptor| root.name == *name)
      {
        roots.push(descriptor);
      }
    }
    self.sort_by_boot_order(&mut roots);

    let mut order = Vec::new();
    let mut visiting = Vec::new();
    let mut visited = Vec::new();
    for root in roots {
      self.visit(root, &mut visiting, &mut visited, &mut order)?;
    }
    Ok(order)
  }

  fn visit(
    &self,
    descriptor: &ServiceDescriptor,
    visiting: &mut Vec<String>,
    visited: &mut Vec<String>,
    order: &mut Vec<String>,
  ) -> anyhow::Result<()> {
    if visited.contains(&descriptor.name) {
      return Ok(());
    }
    if visiting.contains(&descriptor.name) {
      return Err(anyhow!(
        "dependency cycle detected: {} -> {}",
        visiting.join(" -> "),
        descriptor.name
      ));
    }
    visiting.push(descriptor.name.clone());
    let mut dependencies = Vec::new();
    for dependency in &descriptor.dependencies {
      let dependency = self.get(dependency).with_context(|| {
        format!(
          "service {} has an unresolved dependency",
          descriptor.name
        )
      })?;
      dependencies.push(dependency);
    }
    self.sort_by_boot_order(&mut dependencies);
    for dependency in dependencies {
      self.visit(dependency, visiting, visited, order)?;
    }
    visiting.pop();
    visited.push(descriptor.name.clone());
    order.push(descriptor.name.clone());
    Ok(())
  }

  fn sort_by_boot_order(
    &self,
    descriptors: &mut [&ServiceDescriptor],
  ) {
    descriptors
      .sort_by_key(|descriptor| self.boot_rank(descriptor));
  }

  fn boot_rank(
    &self,
    descriptor: &ServiceDescriptor,
  ) -> (u8, usize, usize) {
    let category = match descriptor.category {
      ServiceCategory::Addon => 0,
      ServiceCategory::Core => 1,
    };
    let canonical = CORE_BOOT_ORDER
      .iter()
      .position(|name| *name == descriptor.name)
      .unwrap_or(CORE_BOOT_ORDER.len());
    let insertion = self
      .services
      .get_index_of(&descriptor.name)
      .unwrap_or(usize::MAX);
    (category, canonical, insertion)
  }

  /// Whether `name` is a dependency of some selected target
  /// (rather than a target itself).
  pub fn required(
    &self,
    name: &str,
    targets: &[String],
  ) -> anyhow::Result<bool> {
    if targets.iter().any(|target| target == name) {
      return Ok(false);
    }
    Ok(self.closure(targets)?.iter().any(|member| member == name))
  }
}

fn env_field(
  key: &str,
  label: &str,
  description: &str,
  default: &str,
  required: bool,
) -> EnvFieldConfig {
  EnvFieldConfig {
    key: key.to_string(),
    label: label.to_string(),
    description: description.to_string(),
    default: default.to_string(),
    required,
    read_only: false,
    warning: None,
  }
}

/// The built in Noona service catalog. Replaced wholesale
/// when `catalog_path` is configured.
pub fn default_catalog() -> Vec<ServiceDescriptor> {
  vec![
    ServiceDescriptor {
      name: String::from("noona-redis"),
      display_name: String::from("Redis Cache"),
      image: String::from("redis:7-alpine"),
      ..Default::default()
    },
    ServiceDescriptor {
      name: String::from("noona-mongo"),
      display_name: String::from("MongoDB"),
      image: String::from("mongo:7"),
      ..Default::default()
    },
    ServiceDescriptor {
      name: String::from("noona-vault"),
      display_name: String::from("Vault Data Layer"),
      image: String::from("captainpax/noona-vault:latest"),
      port: Some(3005),
      health_url: Some(String::from(
        "http://noona-vault:3005/health",
      )),
      env: vec![
        String::from("REDIS_HOST=noona-redis"),
        String::from(
          "MONGO_URI=mongodb://noona-mongo:27017/noona",
        ),
        String::from("VAULT_PORT=3005"),
      ],
      env_config: vec![env_field(
        "MONGO_URI",
        "Mongo URI",
        "Connection string for the MongoDB instance",
        "mongodb://noona-mongo:27017/noona",
        true,
      )],
      dependencies: vec![
        String::from("noona-redis"),
        String::from("noona-mongo"),
      ],
      ..Default::default()
    },
    ServiceDescriptor {
      name: String::from("noona-sage"),
      display_name: String::from("Sage API"),
      image: String::from("captainpax/noona-sage:latest"),
      port: Some(3004),
      health_url: Some(String::from(
        "http://noona-sage:3004/health",
      )),
      env: vec![String::from("VAULT_URL=http://noona-vault:3005")],
      dependencies: vec![String::from("noona-vault")],
      ..Default::default()
    },
    ServiceDescriptor {
      name: String::from("noona-moon"),
      display_name: String::from("Moon Web UI"),
      image: String::from("captainpax/noona-moon:latest"),
      port: Some(3000),
      health_url: Some(String::from("http://noona-moon:3000/")),
      env: vec![String::from("SAGE_URL=http://noona-sage:3004")],
      dependencies: vec![String::from("noona-sage")],
      ..Default::default()
    },
    ServiceDescriptor {
      name: String::from("noona-warden"),
      display_name: String::from("Warden Orchestrator"),
      image: String::from("captainpax/noona-warden:latest"),
      port: Some(4001),
      ..Default::default()
    },
    ServiceDescriptor {
      name: String::from("noona-portal"),
      display_name: String::from("Community Portal"),
      image: String::from("captainpax/noona-portal:latest"),
      port: Some(3002),
      health_url: Some(String::from(
        "http://noona-portal:3002/health",
      )),
      env: vec![String::from("VAULT_URL=http://noona-vault:3005")],
      env_config: vec![env_field(
        "DISCORD_TOKEN",
        "Discord Token",
        "Bot token used to connect the community portal",
        "",
        true,
      )],
      dependencies: vec![String::from("noona-vault")],
      ..Default::default()
    },
    ServiceDescriptor {
      name: String::from("noona-raven"),
      display_name: String::from("Raven Downloader"),
      image: String::from("captainpax/noona-raven:latest"),
      port: Some(3003),
      health_url: Some(String::from(
        "http://noona-raven:3003/health",
      )),
      env: vec![String::from("VAULT_URL=http://noona-vault:3005")],
      env_config: vec![env_field(
        "KAVITA_DATA_MOUNT",
        "Kavita Data Mount",
        "Container side path of the Kavita library mount",
        "/kavita-data",
        false,
      )],
      dependencies: vec![String::from("noona-vault")],
      kavita_mount_detection: true,
      ..Default::default()
    },
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  fn service(name: &str, deps: &[&str]) -> ServiceDescriptor {
    ServiceDescriptor {
      name: name.to_string(),
      image: format!("{name}:latest"),
      dependencies: deps.iter().map(|d| d.to_string()).collect(),
      ..Default::default()
    }
  }

  #[test]
  fn closure_orders_dependencies_first() {
    let catalog = Catalog::new(vec![
      service("noona-redis", &[]),
      service("noona-mongo", &[]),
      service("noona-vault", &["noona-redis", "noona-mongo"]),
      service("noona-sage", &["noona-vault"]),
    ])
    .unwrap();
    let order = catalog
      .closure(&[String::from("noona-sage")])
      .unwrap();
    assert_eq!(
      order,
      [
        "noona-redis",
        "noona-mongo",
        "noona-vault",
        "noona-sage"
      ]
    );
    for (i, name) in order.iter().enumerate() {
      for dep in &catalog.get(name).unwrap().dependencies {
        let dep_index =
          order.iter().position(|o| o == dep).unwrap();
        assert!(dep_index < i);
      }
    }
  }

  #[test]
  fn closure_is_stable_across_duplicate_requests() {
    let catalog = Catalog::new(vec![
      service("noona-redis", &[]),
      service("noona-vault", &["noona-redis"]),
    ])
    .unwrap();
    let order = catalog
      .closure(&[
        String::from("noona-vault"),
        String::from("noona-vault"),
        String::from("noona-redis"),
      ])
      .unwrap();
    assert_eq!(order, ["noona-redis", "noona-vault"]);
  }

  #[test]
  fn cycle_fails_catalog_load() {
    let result = Catalog::new(vec![
      service("a", &["b"]),
      service("b", &["a"]),
    ]);
    let err = format!("{:#}", result.err().unwrap());
    assert!(err.contains("dependency cycle"));
  }

  #[test]
  fn unknown_dependency_fails_catalog_load() {
    let result =
      Catalog::new(vec![service("a", &["missing"])]);
    assert!(result.is_err());
  }

  #[test]
  fn unknown_target_errors() {
    let catalog =
      Catalog::new(vec![service("noona-redis", &[])]).unwrap();
    assert!(
      catalog.closure(&[String::from("nope")]).is_err()
    );
  }

  #[test]
  fn required_detects_pulled_in_dependencies() {
    let catalog = Catalog::new(vec![
      service("noona-redis", &[]),
      service("noona-vault", &["noona-redis"]),
    ])
    .unwrap();
    let targets = vec![String::from("noona-vault")];
    assert!(catalog.required("noona-redis", &targets).unwrap());
    assert!(!catalog.required("noona-vault", &targets).unwrap());
  }

  #[test]
  fn default_catalog_is_a_dag() {
    Catalog::new(default_catalog()).unwrap();
  }
}
