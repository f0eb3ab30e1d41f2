//! Primary discovery
//!
//! A client only ever learns the primary by asking the directory. After a
//! failure the directory may still be pointing at the dead node because its
//! eviction timeout has not run out yet, so a repeated answer earns one
//! cooldown and one more question before the client gives up.

use tracing::{info, warn};

use super::config::ClientConfig;
use super::errors::{ClientError, ClientResult};
use crate::directory::{DirectoryClient, DirectoryError, Endpoint};
use crate::observability::Event;

/// Ask the directory for the primary.
pub async fn discover(directory: &DirectoryClient, config: &ClientConfig) -> ClientResult<Endpoint> {
    match directory
        .lookup_primary(config.discovery_timeout, config.discovery_attempts)
        .await
    {
        Ok(endpoint) => {
            info!(event = %Event::PrimaryDiscovered, primary = %endpoint, "primary discovered");
            Ok(endpoint)
        }
        Err(DirectoryError::Timeout { attempts }) => {
            warn!(
                event = %Event::DirectoryUnreachable,
                directory = %directory.directory(),
                attempts,
                "directory did not answer"
            );
            Err(ClientError::DirectoryUnreachable {
                directory: directory.directory(),
                attempts,
            })
        }
        Err(DirectoryError::NoServerAvailable(reason)) => Err(ClientError::NoServerAvailable(reason)),
        Err(e) => Err(ClientError::Directory(e)),
    }
}

/// Rediscover after `previous` failed.
///
/// If the directory still names `previous`, wait `config.cooldown` and ask
/// once more; a second identical answer is [`ClientError::PrimaryUnavailable`].
pub async fn rediscover(
    directory: &DirectoryClient,
    config: &ClientConfig,
    previous: &Endpoint,
) -> ClientResult<Endpoint> {
    let endpoint = discover(directory, config).await?;
    if !same_server(&endpoint, previous) {
        return Ok(endpoint);
    }

    warn!(
        primary = %endpoint,
        cooldown_ms = config.cooldown.as_millis() as u64,
        "directory still names the failed primary, waiting"
    );
    tokio::time::sleep(config.cooldown).await;

    let endpoint = discover(directory, config).await?;
    if same_server(&endpoint, previous) {
        return Err(ClientError::PrimaryUnavailable(endpoint.to_string()));
    }
    Ok(endpoint)
}

/// Endpoints name the same server when the client gateway matches.
fn same_server(a: &Endpoint, b: &Endpoint) -> bool {
    a.client_addr() == b.client_addr()
}
