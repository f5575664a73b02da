#![allow(dead_code)]

use async_trait::async_trait;
use fieldsync_lib::application::ports::MutationRequest;
use fieldsync_lib::{
    AppConfig, AppError, EngineCollaborators, ManualClock, MutationAck, MutationError,
    MutationHandler, MutationType, OfflineEngine, ReachabilityProbe, StoreHandle,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const T0: i64 = 1_700_000_000_000;

/// Probe whose answer the test flips.
pub struct ToggleProbe {
    reachable: AtomicBool,
}

impl ToggleProbe {
    pub fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
        })
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for ToggleProbe {
    async fn probe(&self) -> Result<(), AppError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Network("probe unreachable".into()))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMutation {
    pub idempotency_key: String,
    pub mutation_type: MutationType,
    pub attachments: usize,
}

/// Remote document service stand-in.
#[derive(Default)]
pub struct RecordingRemote {
    applied: Mutex<Vec<AppliedMutation>>,
    reject: AtomicBool,
}

impl RecordingRemote {
    pub fn rejecting() -> Arc<Self> {
        let remote = Self::default();
        remote.reject.store(true, Ordering::SeqCst);
        Arc::new(remote)
    }

    pub fn applied(&self) -> Vec<AppliedMutation> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl MutationHandler for RecordingRemote {
    async fn apply(&self, request: &MutationRequest) -> Result<MutationAck, MutationError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(MutationError::Permanent("schema validation failed".into()));
        }
        self.applied.lock().unwrap().push(AppliedMutation {
            idempotency_key: request.idempotency_key.clone(),
            mutation_type: request.item.mutation_type.clone(),
            attachments: request.attachments.len(),
        });
        Ok(MutationAck {
            remote_id: Some(format!("audit-{}", request.idempotency_key)),
        })
    }
}

pub struct TestEngine {
    pub engine: OfflineEngine,
    pub clock: Arc<ManualClock>,
    pub probe: Arc<ToggleProbe>,
    pub remote: Arc<RecordingRemote>,
}

pub async fn engine_with(
    config: AppConfig,
    handle: StoreHandle,
    remote: Arc<RecordingRemote>,
) -> TestEngine {
    let clock = Arc::new(ManualClock::new(T0));
    let probe = ToggleProbe::new(false);
    let collaborators = EngineCollaborators {
        probe: Some(probe.clone()),
        handlers: vec![
            (MutationType::CreateRecord, remote.clone() as Arc<dyn MutationHandler>),
            (MutationType::UploadAttachment, remote.clone() as Arc<dyn MutationHandler>),
        ],
        clock: clock.clone(),
        ..EngineCollaborators::default()
    };
    let engine = OfflineEngine::with_store_handle(config, Arc::new(handle), collaborators)
        .await
        .expect("engine");
    TestEngine {
        engine,
        clock,
        probe,
        remote,
    }
}

pub async fn memory_engine() -> TestEngine {
    engine_with(
        AppConfig::default(),
        StoreHandle::from_memory(),
        Arc::new(RecordingRemote::default()),
    )
    .await
}

/// Polls `check` until it holds or the deadline passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
