pub mod builders;
pub mod fake_executor;

use std::sync::{Arc, Once};

use stagehand::config::ConfigFile;
use stagehand::fs::mock::MockFileSystem;
use stagehand::layout::PipelineLayout;
use stagehand::sched::{RunOptions, Scheduler, StageGraph};
use stagehand::store::Store;
use tracing_subscriber::{EnvFilter, fmt};

use crate::fake_executor::FakeExecutor;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Everything a scheduler test needs, wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<Store>,
    pub fs: MockFileSystem,
    pub executor: FakeExecutor,
    pub layout: Arc<PipelineLayout>,
    pub config: ConfigFile,
}

impl Harness {
    /// In-memory store with every configured unit registered.
    pub fn new(config: ConfigFile) -> Self {
        Self::with_store(config, Store::open_in_memory().expect("in-memory store"))
    }

    pub fn with_store(config: ConfigFile, store: Store) -> Self {
        let fs = MockFileSystem::new();
        let layout = Arc::new(PipelineLayout::from_config(&config).expect("layout"));
        layout.prepare(&store, &fs).expect("prepare");
        Self {
            store: Arc::new(store),
            executor: FakeExecutor::new(fs.clone()),
            fs,
            layout,
            config,
        }
    }

    pub fn scheduler(&self, options: RunOptions) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.store),
            self.layout.clone(),
            Arc::new(self.executor.clone()),
            Arc::new(self.fs.clone()),
            StageGraph::from_config(&self.config),
            options,
        )
        .expect("scheduler")
    }
}
