use anyhow::Context;
use bollard::query_parameters::{
  InspectContainerOptions, ListContainersOptions,
};
use strum::Display;

use super::DockerClient;

/// Slimmed container listing used for exists checks,
/// catalog `installed` flags and mount discovery.
#[derive(Debug, Clone)]
pub struct ContainerListItem {
  pub name: String,
  pub image: Option<String>,
  pub state: ContainerState,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum ContainerState {
  #[default]
  Unknown,
  Created,
  Running,
  Paused,
  Restarting,
  Exited,
  Removing,
  Dead,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerMount {
  pub source: Option<String>,
  pub destination: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InspectedContainer {
  pub name: String,
  pub mounts: Vec<ContainerMount>,
}

impl DockerClient {
  pub async fn list_containers(
    &self,
  ) -> anyhow::Result<Vec<ContainerListItem>> {
    let containers = self
      .docker
      .list_containers(Some(ListContainersOptions {
        all: true,
        ..Default::default()
      }))
      .await
      .context("failed to list containers")?;
    let containers = containers
      .into_iter()
      .flat_map(|container| {
        let name = container
          .names
          .context("no names on container")?
          .pop()
          .context("no names on container (empty vec)")?
          .replace('/', "");
        anyhow::Ok(ContainerListItem {
          name,
          image: container.image,
          state: container
            .state
            .map(convert_summary_container_state)
            .unwrap_or_default(),
        })
      })
      .collect();
    Ok(containers)
  }

  /// The container by this name, in any state.
  pub async fn get_container(
    &self,
    name: &str,
  ) -> anyhow::Result<Option<ContainerListItem>> {
    let containers = self.list_containers().await?;
    Ok(
      containers
        .into_iter()
        .find(|container| container.name == name),
    )
  }

  pub async fn inspect_container(
    &self,
    name: &str,
  ) -> anyhow::Result<InspectedContainer> {
    let container = self
      .docker
      .inspect_container(
        name,
        Option::<InspectContainerOptions>::None,
      )
      .await
      .with_context(|| {
        format!("failed to inspect container {name}")
      })?;
    Ok(InspectedContainer {
      name: container
        .name
        .map(|name| name.replace('/', ""))
        .unwrap_or_else(|| name.to_string()),
      mounts: container
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|mount| ContainerMount {
          source: mount.source,
          destination: mount.destination,
        })
        .collect(),
    })
  }
}

fn convert_summary_container_state(
  state: bollard::secret::ContainerSummaryStateEnum,
) -> ContainerState {
  use bollard::secret::ContainerSummaryStateEnum as Summary;
  match state {
    Summary::EMPTY => ContainerState::Unknown,
    Summary::CREATED => ContainerState::Created,
    Summary::RUNNING => ContainerState::Running,
    Summary::PAUSED => ContainerState::Paused,
    Summary::RESTARTING => ContainerState::Restarting,
    Summary::EXITED => ContainerState::Exited,
    Summary::REMOVING => ContainerState::Removing,
    Summary::DEAD => ContainerState::Dead,
  }
}
