use crate::docker::{
  DockerClient, candidate_endpoints, connect_endpoint,
  docker_client, normalize_endpoint,
};

/// Find the host path a running Kavita keeps its `/data`
/// on. The already resolved runtime is checked first, then
/// every other known endpoint.
pub async fn detect_kavita_mount()
-> anyhow::Result<Option<String>> {
  let docker = docker_client();
  if let Some(source) = scan_client(docker).await {
    return Ok(Some(source));
  }
  for candidate in candidate_endpoints() {
    let endpoint = match normalize_endpoint(&candidate) {
      Ok(endpoint) => endpoint,
      Err(_) => continue,
    };
    if endpoint == *docker.endpoint() {
      continue;
    }
    let client = match connect_endpoint(&endpoint).await {
      Ok(client) => client,
      Err(e) => {
        debug!(
          "skipping endpoint {candidate} for kavita detection | {e:#}"
        );
        continue;
      }
    };
    if let Some(source) = scan_client(&client).await {
      return Ok(Some(source));
    }
  }
  Ok(None)
}

/// Containers whose image matches `*kavita*`, inspected
/// for a mount with destination `/data`.
async fn scan_client(docker: &DockerClient) -> Option<String> {
  let containers = match docker.list_containers().await {
    Ok(containers) => containers,
    Err(e) => {
      debug!("kavita scan could not list containers | {e:#}");
      return None;
    }
  };
  for container in containers {
    let matches = container
      .image
      .as_deref()
      .map(|image| image.to_lowercase().contains("kavita"))
      .unwrap_or(false);
    if !matches {
      continue;
    }
    let inspected =
      match docker.inspect_container(&container.name).await {
        Ok(inspected) => inspected,
        Err(e) => {
          debug!(
            "failed to inspect {} | {e:#}",
            container.name
          );
          continue;
        }
      };
    let source = inspected.mounts.iter().find_map(|mount| {
      (mount.destination.as_deref() == Some("/data"))
        .then(|| mount.source.clone())
        .flatten()
    });
    if let Some(source) = source {
      info!(
        "found kavita data mount {source} on {}",
        inspected.name
      );
      return Some(source);
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use crate::docker::{ContainerMount, InspectedContainer};

  // The mount picking logic, exercised without a runtime.
  fn data_mount_source(
    container: &InspectedContainer,
  ) -> Option<String> {
    container.mounts.iter().find_map(|mount| {
      (mount.destination.as_deref() == Some("/data"))
        .then(|| mount.source.clone())
        .flatten()
    })
  }

  #[test]
  fn picks_the_data_destination_mount() {
    let container = InspectedContainer {
      name: String::from("kavita"),
      mounts: vec![
        ContainerMount {
          source: Some(String::from("/host/config")),
          destination: Some(String::from("/kavita/config")),
        },
        ContainerMount {
          source: Some(String::from("/host/k")),
          destination: Some(String::from("/data")),
        },
      ],
    };
    assert_eq!(
      data_mount_source(&container),
      Some(String::from("/host/k"))
    );
  }

  #[test]
  fn no_data_mount_yields_none() {
    let container = InspectedContainer {
      name: String::from("kavita"),
      mounts: vec![ContainerMount {
        source: Some(String::from("/host/config")),
        destination: Some(String::from("/config")),
      }],
    };
    assert_eq!(data_mount_source(&container), None);
  }
}
