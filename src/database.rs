use crate::access::BPlusTree;
use crate::concurrency::VersionManager;
use crate::config::DbConfig;
use crate::data::DataManager;
use crate::error::Result;
use crate::storage::Address;
use crate::transaction::TransactionManager;
use log::info;
use std::sync::Arc;

/// High-level database interface that wires the managers together
pub struct Database {
    config: DbConfig,
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    vm: VersionManager,
}

impl Database {
    /// Create a new, empty file set at `config.path`
    pub fn create(config: &DbConfig) -> Result<Self> {
        let tm = Arc::new(TransactionManager::create(&config.path)?);
        let dm = Arc::new(DataManager::create(
            &config.path,
            config.memory,
            Arc::clone(&tm),
        )?);
        info!("created database at {:?}", config.path);
        Ok(Self::assemble(config, tm, dm))
    }

    /// Open an existing file set, recovering it if the last session crashed
    pub fn open(config: &DbConfig) -> Result<Self> {
        let tm = Arc::new(TransactionManager::open(&config.path)?);
        let dm = Arc::new(DataManager::open(
            &config.path,
            config.memory,
            Arc::clone(&tm),
        )?);
        info!(
            "opened database at {:?} ({} transactions on record)",
            config.path,
            tm.xid_count()
        );
        Ok(Self::assemble(config, tm, dm))
    }

    fn assemble(config: &DbConfig, tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let vm = VersionManager::new(Arc::clone(&tm), Arc::clone(&dm));
        Self {
            config: config.clone(),
            tm,
            dm,
            vm,
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn tm(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    pub fn dm(&self) -> &Arc<DataManager> {
        &self.dm
    }

    pub fn vm(&self) -> &VersionManager {
        &self.vm
    }

    /// Create an empty index and return its boot address
    pub fn create_index(&self) -> Result<Address> {
        BPlusTree::create(&self.dm)
    }

    /// Open the index whose boot record is at `boot`
    pub fn load_index(&self, boot: Address) -> Result<BPlusTree> {
        BPlusTree::load(boot, Arc::clone(&self.dm))
    }

    /// Release all cached state and mark the file set cleanly closed
    pub fn close(self) -> Result<()> {
        self.vm.close()?;
        self.dm.close()?;
        info!("closed database at {:?}", self.config.path);
        Ok(())
    }
}
