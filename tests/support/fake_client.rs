//! In-memory `DownloadClientApi` recording every call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cleanarr_core::clients::{
    ClientError, DownloadClientApi, DownloadFile, DownloadItem, DownloadService, ItemState,
};
use cleanarr_core::config::{DownloadClientConfig, DownloadClientKind};
use cleanarr_core::dry_run::DryRun;
use cleanarr_core::hardlinks::HardlinkInspector;
use cleanarr_core::strikes::StrikeStore;

/// Shared, ordered record of calls (`"delete:abc"`, `"login"`, ...).
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct FakeClient {
    kind: DownloadClientKind,
    tags: bool,
    fail_login: bool,
    fail_lookup: bool,
    items: Mutex<HashMap<String, DownloadItem>>,
    log: CallLog,
}

impl FakeClient {
    pub fn new(kind: DownloadClientKind) -> Self {
        Self {
            kind,
            tags: false,
            fail_login: false,
            fail_lookup: false,
            items: Mutex::new(HashMap::new()),
            log: CallLog::default(),
        }
    }

    pub fn qbittorrent() -> Self {
        Self::new(DownloadClientKind::Qbittorrent).with_tags()
    }

    pub fn with_item(self, item: DownloadItem) -> Self {
        self.items.lock().unwrap().insert(item.hash.clone(), item);
        self
    }

    pub fn with_tags(mut self) -> Self {
        self.tags = true;
        self
    }

    pub fn failing_login(mut self) -> Self {
        self.fail_login = true;
        self
    }

    /// Every lookup fails as if the client became unreachable.
    pub fn failing_lookup(mut self) -> Self {
        self.fail_lookup = true;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Replaces a stored item, e.g. to simulate progress between runs.
    pub fn update(&self, item: DownloadItem) {
        self.items.lock().unwrap().insert(item.hash.clone(), item);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Calls that would change client state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| {
                !(call == "login"
                    || call == "list_seeding"
                    || call.starts_with("find:")
                    || call.starts_with("load_files:"))
            })
            .collect()
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl DownloadClientApi for FakeClient {
    fn kind(&self) -> DownloadClientKind {
        self.kind
    }

    async fn login(&self) -> Result<(), ClientError> {
        self.record("login");
        if self.fail_login {
            return Err(ClientError::auth("fake", "bad credentials"));
        }
        Ok(())
    }

    async fn find_item(&self, hash: &str) -> Result<Option<DownloadItem>, ClientError> {
        self.record(format!("find:{hash}"));
        if self.fail_lookup {
            return Err(ClientError::fatal("fake", "daemon unreachable"));
        }
        Ok(self.items.lock().unwrap().get(hash).cloned())
    }

    async fn list_seeding_items(&self) -> Result<Vec<DownloadItem>, ClientError> {
        self.record("list_seeding");
        let mut items: Vec<DownloadItem> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| item.state == ItemState::Seeding)
            .cloned()
            .map(|item| DownloadItem {
                files: Vec::new(),
                ..item
            })
            .collect();
        items.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(items)
    }

    async fn load_files(&self, item: &DownloadItem) -> Result<Vec<DownloadFile>, ClientError> {
        self.record(format!("load_files:{}", item.hash));
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(&item.hash)
            .map(|stored| stored.files.clone())
            .unwrap_or_default())
    }

    async fn set_unwanted_files(
        &self,
        item: &DownloadItem,
        indexes: &[usize],
    ) -> Result<(), ClientError> {
        let list: Vec<String> = indexes.iter().map(ToString::to_string).collect();
        self.record(format!("set_unwanted:{}:{}", item.hash, list.join(",")));
        Ok(())
    }

    async fn delete_item(&self, hash: &str) -> Result<(), ClientError> {
        self.record(format!("delete:{hash}"));
        self.items.lock().unwrap().remove(hash);
        Ok(())
    }

    async fn create_category(&self, name: &str) -> Result<(), ClientError> {
        self.record(format!("create_category:{name}"));
        Ok(())
    }

    async fn set_category(&self, item: &DownloadItem, category: &str) -> Result<(), ClientError> {
        self.record(format!("set_category:{}:{category}", item.hash));
        Ok(())
    }

    fn supports_tags(&self) -> bool {
        self.tags
    }

    async fn add_tag(&self, item: &DownloadItem, tag: &str) -> Result<(), ClientError> {
        self.record(format!("add_tag:{}:{tag}", item.hash));
        Ok(())
    }
}

pub fn client_config(id: &str, kind: DownloadClientKind) -> DownloadClientConfig {
    DownloadClientConfig {
        id: id.to_string(),
        name: String::new(),
        enabled: true,
        kind,
        host: Some("http://localhost:1".to_string()),
        username: None,
        password: None,
        url_base: None,
    }
}

/// Shared state for one test.
pub struct Harness {
    pub strikes: Arc<StrikeStore>,
    pub hardlinks: Arc<HardlinkInspector>,
    pub dry_run: DryRun,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            strikes: Arc::new(StrikeStore::new(Duration::from_secs(3 * 3600))),
            hardlinks: Arc::new(HardlinkInspector::new()),
            dry_run: DryRun::new(false),
        }
    }

    pub fn service(&self, id: &str, fake: Arc<FakeClient>) -> Arc<DownloadService> {
        let kind = fake.kind();
        Arc::new(DownloadService::new(
            &client_config(id, kind),
            fake,
            self.strikes.clone(),
            self.hardlinks.clone(),
            self.dry_run.clone(),
        ))
    }
}

pub fn file(index: usize, name: &str, priority: i64) -> DownloadFile {
    DownloadFile {
        index,
        name: name.to_string(),
        size: 1_000,
        priority,
    }
}

/// A healthy download: progressing, one wanted file.
pub fn downloading(hash: &str) -> DownloadItem {
    DownloadItem {
        hash: hash.to_string(),
        name: format!("Item {hash}"),
        state: ItemState::Downloading,
        size: 1_000_000,
        download_speed: 500_000,
        eta: 60,
        downloaded: 100,
        files: vec![file(0, "Show.S01E01.mkv", 1)],
        ..DownloadItem::default()
    }
}

/// Downloading with no speed and no ETA.
pub fn stalled(hash: &str, downloaded: u64) -> DownloadItem {
    DownloadItem {
        download_speed: 0,
        eta: 0,
        downloaded,
        ..downloading(hash)
    }
}

pub fn seeding(hash: &str, category: &str, ratio: f64, hours: u64) -> DownloadItem {
    DownloadItem {
        hash: hash.to_string(),
        name: format!("Item {hash}"),
        state: ItemState::Seeding,
        ratio,
        seeding_time: Duration::from_secs(hours * 3600),
        category: Some(category.to_string()),
        save_path: PathBuf::from("/downloads"),
        files: vec![file(0, "Movie.mkv", 1)],
        ..DownloadItem::default()
    }
}
