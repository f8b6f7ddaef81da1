//! Runner network management

use std::collections::HashMap;

use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use tracing::{debug, info};

use crate::error::Result;
use crate::{DockerRuntime, RuntimeError, MANAGED_BY_LABEL};

impl DockerRuntime {
    /// Idempotently creates the dedicated bridge network for worker
    /// containers, labeled with the controller id.
    pub async fn ensure_network(&self, name: &str) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await?;

        // the name filter is a substring match, so check for an exact hit
        if existing.iter().any(|n| n.name.as_deref() == Some(name)) {
            debug!(network = name, "runner network already exists");
            return Ok(());
        }

        info!(network = name, "creating runner network");

        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            labels: HashMap::from([(MANAGED_BY_LABEL.to_string(), self.controller_id.clone())]),
            ..Default::default()
        };

        match self.docker.create_network(options).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                debug!(network = name, "runner network created concurrently");
                Ok(())
            }
            Err(e) => Err(RuntimeError::from(e)),
        }
    }
}
