//! Builds and caches one [`DownloadService`] per enabled client.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{
    ClientError, DelugeClient, DownloadClientApi, DownloadService, QBittorrentClient,
    TransmissionClient, UsenetClient,
};
use crate::config::{AppConfig, DownloadClientConfig, DownloadClientKind};
use crate::dry_run::DryRun;
use crate::hardlinks::HardlinkInspector;
use crate::http::HttpSettings;
use crate::notifications::Notifier;
use crate::strikes::StrikeStore;

/// Instantiates the protocol adapter for `config`.
///
/// # Errors
///
/// Invalid host URL or HTTP client construction failure.
pub fn build_client_api(
    config: &DownloadClientConfig,
    settings: &HttpSettings,
) -> Result<Arc<dyn DownloadClientApi>, ClientError> {
    Ok(match config.kind {
        DownloadClientKind::Qbittorrent => Arc::new(QBittorrentClient::new(config, settings)?),
        DownloadClientKind::Deluge => Arc::new(DelugeClient::new(config, settings)?),
        DownloadClientKind::Transmission => Arc::new(TransmissionClient::new(config, settings)?),
        DownloadClientKind::Usenet => Arc::new(UsenetClient),
    })
}

#[derive(Debug, Default)]
struct RegistryState {
    configs: Vec<DownloadClientConfig>,
    settings: HttpSettings,
    services: Vec<Arc<DownloadService>>,
    built: bool,
}

/// Enabled download clients, rebuilt whenever their configuration changes.
///
/// Adapters keep their sessions between runs; a rebuild starts fresh ones.
#[derive(Debug)]
pub struct ClientRegistry {
    strikes: Arc<StrikeStore>,
    hardlinks: Arc<HardlinkInspector>,
    dry_run: DryRun,
    notifier: Option<Notifier>,
    state: RwLock<RegistryState>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(
        strikes: Arc<StrikeStore>,
        hardlinks: Arc<HardlinkInspector>,
        dry_run: DryRun,
        notifier: Option<Notifier>,
    ) -> Self {
        Self {
            strikes,
            hardlinks,
            dry_run,
            notifier,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Rebuilds the services if the client list or HTTP settings changed.
    /// Clients that cannot be constructed are logged and left out.
    pub async fn sync(&self, config: &AppConfig) {
        let configs: Vec<DownloadClientConfig> = config.enabled_clients().cloned().collect();
        let settings = config.general.http_settings();

        let mut state = self.state.write().await;
        if state.built && state.configs == configs && state.settings == settings {
            return;
        }

        let mut services = Vec::with_capacity(configs.len());
        for client in &configs {
            match build_client_api(client, &settings) {
                Ok(api) => services.push(Arc::new(self.service(client, api))),
                Err(error) => warn!(
                    client = client.display_name(),
                    error = %error,
                    "download client unavailable; continuing without it"
                ),
            }
        }

        info!(clients = services.len(), "download clients loaded");
        *state = RegistryState {
            configs,
            settings,
            services,
            built: true,
        };
    }

    fn service(&self, config: &DownloadClientConfig, api: Arc<dyn DownloadClientApi>) -> DownloadService {
        let service = DownloadService::new(
            config,
            api,
            self.strikes.clone(),
            self.hardlinks.clone(),
            self.dry_run.clone(),
        );
        match &self.notifier {
            Some(notifier) => service.with_notifier(notifier.clone()),
            None => service,
        }
    }

    pub async fn services(&self) -> Vec<Arc<DownloadService>> {
        self.state.read().await.services.clone()
    }

    /// Logs every service in. Failures exclude the client from this run only.
    pub async fn logged_in(&self) -> LoginOutcome {
        login_all(self.services().await).await
    }
}

/// Result of logging in every enabled client for one run.
#[derive(Debug, Default, Clone)]
pub struct LoginOutcome {
    pub ready: Vec<Arc<DownloadService>>,
    /// Enabled clients that could not be logged in. While any are missing,
    /// a download absent from `ready` may still exist somewhere.
    pub unavailable: usize,
}

/// Logs each service in, keeping those that succeeded.
pub async fn login_all(services: Vec<Arc<DownloadService>>) -> LoginOutcome {
    let mut outcome = LoginOutcome {
        ready: Vec::with_capacity(services.len()),
        unavailable: 0,
    };
    for service in services {
        let Err(error) = service.login().await else {
            outcome.ready.push(service);
            continue;
        };
        outcome.unavailable += 1;
        if error.is_fatal() {
            warn!(
                client = service.name(),
                error = %error,
                "download client unusable, skipping for this run"
            );
        } else {
            warn!(
                client = service.name(),
                error = %error,
                "download client login failed, skipping for this run"
            );
        }
    }
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::parse_config;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(
            Arc::new(StrikeStore::new(Duration::from_secs(3600))),
            Arc::new(HardlinkInspector::new()),
            DryRun::new(true),
            None,
        )
    }

    const CONFIG: &str = r#"
[[download_clients]]
id = "qbit"
kind = "qbittorrent"
host = "http://localhost:8080"

[[download_clients]]
id = "off"
kind = "deluge"
host = "http://localhost:8112"
enabled = false

[[download_clients]]
id = "nzb"
kind = "usenet"
"#;

    #[tokio::test]
    async fn test_sync_builds_enabled_clients_only() {
        let registry = registry();
        registry.sync(&parse_config(CONFIG).unwrap()).await;

        let ids: Vec<String> = registry
            .services()
            .await
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(ids, vec!["qbit".to_string(), "nzb".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_keeps_services_when_unchanged() {
        let registry = registry();
        let config = parse_config(CONFIG).unwrap();
        registry.sync(&config).await;
        let before = registry.services().await;
        registry.sync(&config).await;
        let after = registry.services().await;

        assert!(Arc::ptr_eq(&before[0], &after[0]));
    }

    #[tokio::test]
    async fn test_usenet_client_always_logs_in() {
        let registry = registry();
        registry.sync(&parse_config(CONFIG).unwrap()).await;
        let services: Vec<_> = registry
            .services()
            .await
            .into_iter()
            .filter(|s| s.kind() == DownloadClientKind::Usenet)
            .collect();

        let outcome = login_all(services).await;
        assert_eq!(outcome.ready.len(), 1);
        assert_eq!(outcome.unavailable, 0);
    }
}
