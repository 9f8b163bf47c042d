use async_trait::async_trait;
use remotefetch_core::domain::configuration::{ComponentConfig, FetchConfiguration};
use remotefetch_core::domain::report::{
    ArtifactAction, ArtifactOutcome, FailureKind, FetchRunReport, PipelineStage, RunStatus,
};
use remotefetch_core::domain::task::TaskState;
use remotefetch_engine::component::{ActionListener, ConfigDeployer, DeployAction};
use remotefetch_engine::components::{FileConfigDeployer, register_builtin};
use remotefetch_engine::error::DeployError;
use remotefetch_engine::scheduler::{FetchTaskExecutor, TriggerOutcome};
use remotefetch_engine::service::{
    CapabilityRegistry, ChannelReportSink, PipelineService, StandardPipelineService,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct BrokenListener;

impl ActionListener for BrokenListener {
    fn on_stage_started(&self, _: Uuid, _: PipelineStage) -> anyhow::Result<()> {
        anyhow::bail!("audit store offline")
    }

    fn on_artifact_result(&self, _: Uuid, _: &ArtifactOutcome) -> anyhow::Result<()> {
        anyhow::bail!("audit store offline")
    }

    fn on_run_completed(&self, _: Uuid, _: &FetchRunReport) -> anyhow::Result<()> {
        anyhow::bail!("audit store offline")
    }
}

/// File deployer that hangs on `slow.xml` while `stalled` is set
struct StallingDeployer {
    inner: FileConfigDeployer,
    stalled: Arc<AtomicBool>,
}

impl StallingDeployer {
    async fn stall(&self, artifact_id: &str) {
        if artifact_id == "slow.xml" && self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

#[async_trait]
impl ConfigDeployer for StallingDeployer {
    async fn deploy(&self, artifact_id: &str, content: &[u8]) -> Result<DeployAction, DeployError> {
        self.stall(artifact_id).await;
        self.inner.deploy(artifact_id, content).await
    }

    async fn remove(&self, artifact_id: &str) -> Result<(), DeployError> {
        self.stall(artifact_id).await;
        self.inner.remove(artifact_id).await
    }
}

struct Engine {
    _root: TempDir,
    source: PathBuf,
    target: PathBuf,
    executor: FetchTaskExecutor,
    reports: UnboundedReceiver<FetchRunReport>,
    stalled: Arc<AtomicBool>,
}

impl Engine {
    fn start() -> Self {
        Self::with_run_timeout(Duration::from_secs(30))
    }

    fn with_run_timeout(run_timeout: Duration) -> Self {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("source");
        let target = root.path().join("target");
        fs::create_dir_all(&source).unwrap();

        let mut registry = CapabilityRegistry::new();
        register_builtin(&mut registry).unwrap();
        registry
            .register_action_listener("broken", "Broken audit listener", |_| {
                Ok(Box::new(BrokenListener))
            })
            .unwrap();
        let stalled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stalled);
        registry
            .register_config_deployer("stalling-file", "Stalling file deployer", move |ctx| {
                Ok(Box::new(StallingDeployer {
                    inner: FileConfigDeployer::from_context(ctx)?,
                    stalled: Arc::clone(&flag),
                }))
            })
            .unwrap();
        let registry = Arc::new(registry);

        let pipeline: Arc<dyn PipelineService> = Arc::new(StandardPipelineService::new(
            Arc::clone(&registry),
            root.path().join("work"),
            Some(run_timeout),
        ));
        let (sink, reports) = ChannelReportSink::new();
        let executor = FetchTaskExecutor::new(
            registry,
            pipeline,
            Arc::new(sink),
            2,
            Duration::from_millis(50),
        );

        Self {
            _root: root,
            source,
            target,
            executor,
            reports,
            stalled,
        }
    }

    fn configuration(&self, format: &str) -> FetchConfiguration {
        FetchConfiguration::new(
            "identity-providers",
            "carbon.super",
            ComponentConfig::new("directory")
                .with_parameter("uri", format!("file://{}", self.source.display())),
            ComponentConfig::new("file")
                .with_parameter("target", self.target.display().to_string())
                .with_parameter("format", format),
        )
        .with_listener("log")
        .with_interval(Duration::from_secs(3600))
    }

    fn write_source(&self, id: &str, content: &str) {
        write(&self.source, id, content);
    }

    async fn run_once(&mut self, configuration: &FetchConfiguration) -> FetchRunReport {
        assert!(matches!(
            self.executor.trigger_now(configuration),
            TriggerOutcome::Started { .. }
        ));
        let report = tokio::time::timeout(Duration::from_secs(10), self.reports.recv())
            .await
            .expect("run did not finish in time")
            .expect("report channel closed");
        self.executor.wait_for_idle().await;
        report
    }
}

fn write(base: &Path, id: &str, content: &str) {
    let path = base.join(id);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn action(report: &FetchRunReport, id: &str) -> Option<ArtifactAction> {
    report.outcome(id).map(|outcome| outcome.action)
}

#[tokio::test]
async fn test_end_to_end_add_modify_remove() {
    let mut engine = Engine::start();
    let config = engine.configuration("raw");
    engine.executor.register_or_update(config.clone());

    engine.write_source("idp/y.xml", "<idp>y1</idp>");
    engine.write_source("z.xml", "<z/>");

    let first = engine.run_once(&config).await;
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(action(&first, "idp/y.xml"), Some(ArtifactAction::Created));
    assert_eq!(action(&first, "z.xml"), Some(ArtifactAction::Created));

    engine.write_source("x.xml", "<x/>");
    engine.write_source("idp/y.xml", "<idp>y2</idp>");
    fs::remove_file(engine.source.join("z.xml")).unwrap();

    let second = engine.run_once(&config).await;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.stage, PipelineStage::Completed);
    assert_eq!(second.run_number, 2);
    assert_eq!(second.outcomes.len(), 3);
    assert_eq!(action(&second, "x.xml"), Some(ArtifactAction::Created));
    assert_eq!(action(&second, "idp/y.xml"), Some(ArtifactAction::Updated));
    assert_eq!(action(&second, "z.xml"), Some(ArtifactAction::Deleted));

    assert_eq!(
        fs::read_to_string(engine.target.join("idp/y.xml")).unwrap(),
        "<idp>y2</idp>"
    );
    assert!(engine.target.join("x.xml").exists());
    assert!(!engine.target.join("z.xml").exists());

    let status = engine.executor.status(config.id).unwrap();
    assert_eq!(status.state, TaskState::Idle);
    assert_eq!(status.run_count, 2);
    assert_eq!(status.last_report.unwrap().run_number, 2);

    // Nothing changed upstream
    let third = engine.run_once(&config).await;
    assert_eq!(third.status, RunStatus::Success);
    assert!(third.outcomes.is_empty());
}

#[tokio::test]
async fn test_invalid_artifact_is_isolated() {
    let mut engine = Engine::start();
    let config = engine.configuration("json");

    engine.write_source("a.json", r#"{"name": "a"}"#);
    engine.write_source("b.json", "{ broken");

    let report = engine.run_once(&config).await;

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(action(&report, "a.json"), Some(ArtifactAction::Created));
    assert_eq!(action(&report, "b.json"), Some(ArtifactAction::Failed));
    assert!(engine.target.join("a.json").exists());
    assert!(!engine.target.join("b.json").exists());

    // Upstream unchanged: only the rejected artifact is offered again
    let retry = engine.run_once(&config).await;
    assert_eq!(retry.status, RunStatus::Failed);
    assert_eq!(retry.outcomes.len(), 1);
    assert_eq!(action(&retry, "b.json"), Some(ArtifactAction::Failed));

    engine.write_source("b.json", r#"{"name": "b"}"#);
    let fixed = engine.run_once(&config).await;
    assert_eq!(fixed.status, RunStatus::Success);
    assert_eq!(action(&fixed, "b.json"), Some(ArtifactAction::Created));
}

#[tokio::test]
async fn test_listener_failure_does_not_change_status() {
    let mut engine = Engine::start();
    let config = engine.configuration("raw").with_listener("broken");
    engine.write_source("a.xml", "<a/>");

    let report = engine.run_once(&config).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(action(&report, "a.xml"), Some(ArtifactAction::Created));
}

#[tokio::test]
async fn test_out_of_band_edit_is_not_overwritten() {
    let mut engine = Engine::start();
    let config = engine.configuration("raw");
    engine.write_source("a.xml", "<a>1</a>");
    engine.write_source("b.xml", "<b>1</b>");
    engine.run_once(&config).await;

    write(&engine.target, "a.xml", "<a>hand edited</a>");
    engine.write_source("a.xml", "<a>2</a>");
    engine.write_source("b.xml", "<b>2</b>");

    let report = engine.run_once(&config).await;

    assert_eq!(report.status, RunStatus::PartialFailure);
    let conflict = report.outcome("a.xml").unwrap();
    assert_eq!(conflict.action, ArtifactAction::Failed);
    assert!(conflict.error.as_deref().unwrap().contains("conflict"));
    assert_eq!(action(&report, "b.xml"), Some(ArtifactAction::Updated));
    assert_eq!(
        fs::read_to_string(engine.target.join("a.xml")).unwrap(),
        "<a>hand edited</a>"
    );
}

#[tokio::test]
async fn test_missing_source_is_transient() {
    let mut engine = Engine::start();
    let mut config = engine.configuration("raw");
    config.repository_manager = ComponentConfig::new("directory")
        .with_parameter("uri", engine.source.join("gone").display().to_string());

    let report = engine.run_once(&config).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.stage, PipelineStage::Acquire);
    assert!(!report.requires_attention());

    let status = engine.executor.status(config.id).unwrap();
    assert!(status.enabled);
    assert!(status.next_run_at.is_some());
}

#[tokio::test]
async fn test_resolved_conflict_is_redeployed() {
    let mut engine = Engine::start();
    let config = engine.configuration("raw");
    engine.write_source("a.xml", "<a>1</a>");
    engine.run_once(&config).await;

    write(&engine.target, "a.xml", "<a>hand edited</a>");
    engine.write_source("a.xml", "<a>2</a>");
    let conflict = engine.run_once(&config).await;
    assert_eq!(action(&conflict, "a.xml"), Some(ArtifactAction::Failed));

    // The operator discards the manual edit; upstream stays at version 2
    fs::remove_file(engine.target.join("a.xml")).unwrap();

    let resolved = engine.run_once(&config).await;
    assert_eq!(resolved.status, RunStatus::Success);
    assert_eq!(action(&resolved, "a.xml"), Some(ArtifactAction::Created));
    assert_eq!(
        fs::read_to_string(engine.target.join("a.xml")).unwrap(),
        "<a>2</a>"
    );

    let settled = engine.run_once(&config).await;
    assert!(settled.outcomes.is_empty());
}

#[tokio::test]
async fn test_artifacts_left_by_timeout_are_deployed_next_run() {
    let mut engine = Engine::with_run_timeout(Duration::from_secs(1));
    let mut config = engine.configuration("raw");
    config.config_deployer = ComponentConfig::new("stalling-file")
        .with_parameter("target", engine.target.display().to_string());
    engine.write_source("a.xml", "<a/>");
    engine.write_source("slow.xml", "<slow/>");
    engine.write_source("z.xml", "<z/>");

    engine.stalled.store(true, Ordering::SeqCst);
    let timed_out = engine.run_once(&config).await;
    assert_eq!(timed_out.status, RunStatus::Failed);
    assert_eq!(
        timed_out.failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Timeout)
    );
    assert_eq!(action(&timed_out, "a.xml"), Some(ArtifactAction::Created));
    assert_eq!(action(&timed_out, "slow.xml"), Some(ArtifactAction::Failed));
    assert_eq!(action(&timed_out, "z.xml"), Some(ArtifactAction::Skipped));
    assert!(!engine.target.join("z.xml").exists());

    // Upstream unchanged; the deployer recovers
    engine.stalled.store(false, Ordering::SeqCst);
    let next = engine.run_once(&config).await;
    assert_eq!(next.status, RunStatus::Success);
    assert_eq!(next.outcomes.len(), 2);
    assert_eq!(action(&next, "slow.xml"), Some(ArtifactAction::Created));
    assert_eq!(action(&next, "z.xml"), Some(ArtifactAction::Created));
    assert!(engine.target.join("slow.xml").exists());
    assert!(engine.target.join("z.xml").exists());
}
