//! Orchestrator: sequences the agents for every stimulus
//!
//! Patient stimuli run Risk and Capacity concurrently, wait on a join barrier,
//! then run Flow and finally Escalation. Unit stimuli only refresh capacity.
//! Every agent execution is its own task: when a barrier times out the
//! pipeline stops dispatching, but tasks already running still finish and
//! store their results.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::agents::{
    AgentContext, AgentKind, AgentOutput, AgentRuntime, CapacityAgent, EscalationAgent, FlowAgent,
    RiskAgent, StageRunner,
};
use crate::bus::{topics, Event, EventBus, SubscriptionId};
use crate::config::{AppConfig, HospitalConfig, OrchestratorConfig};
use crate::domain::{Stimulus, Subject};
use crate::error::{BusError, CareError, Result};
use crate::reasoning::{DecisionEngine, McdaEngine};
use crate::store::{RetryPolicy, StateStore};

use super::ingest::{apply_stimulus, seed_census};
use super::pipeline::{PipelineKey, PipelineReport, PipelineStage, PipelineStatus, PipelineTracker};

/// The four stage runners the orchestrator dispatches
#[derive(Clone)]
pub struct AgentSet {
    pub risk: Arc<dyn StageRunner>,
    pub capacity: Arc<dyn StageRunner>,
    pub flow: Arc<dyn StageRunner>,
    pub escalation: Arc<dyn StageRunner>,
}

impl AgentSet {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mcda = McdaEngine::new(config.mcda.weights()?);
        Ok(Self {
            risk: Arc::new(RiskAgent::new(&config.decision)),
            capacity: Arc::new(CapacityAgent::new(config.hospital.clone())),
            flow: Arc::new(FlowAgent::new(config.hospital.clone(), mcda.clone())),
            escalation: Arc::new(EscalationAgent::new(
                config.hospital.clone(),
                DecisionEngine::new(mcda, config.decision.clone()),
            )),
        })
    }
}

/// Result of handing a stimulus to the orchestrator
#[derive(Debug, Clone)]
pub enum StimulusOutcome {
    Ran(PipelineReport),
    /// Same (stimulus, subject) already claimed; nothing was dispatched
    Coalesced(PipelineKey),
}

struct PipelineEntry {
    tracker: PipelineTracker,
    report: Option<PipelineReport>,
}

type StageResult = std::result::Result<AgentOutput, crate::error::AgentError>;

pub struct Orchestrator {
    config: OrchestratorConfig,
    hospital: HospitalConfig,
    store: Arc<dyn StateStore>,
    runtime: AgentRuntime,
    agents: AgentSet,
    pipelines: DashMap<PipelineKey, PipelineEntry>,
    finished: Mutex<VecDeque<PipelineKey>>,
    in_flight: AtomicUsize,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, bus: Arc<EventBus>, store: Arc<dyn StateStore>) -> Result<Self> {
        let agents = AgentSet::from_config(config)?;
        Ok(Self::with_agents(config, bus, store, agents))
    }

    pub fn with_agents(
        config: &AppConfig,
        bus: Arc<EventBus>,
        store: Arc<dyn StateStore>,
        agents: AgentSet,
    ) -> Self {
        let retry: RetryPolicy = config.store.retry_policy();
        Self {
            config: config.orchestrator.clone(),
            hospital: config.hospital.clone(),
            runtime: AgentRuntime::new(bus, store.clone(), retry),
            store,
            agents,
            pipelines: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Seed unit censuses from config where none is stored yet
    pub async fn start(&self) -> Result<usize> {
        seed_census(self.store.as_ref(), &self.hospital, &self.runtime.retry, Utc::now()).await
    }

    /// Subscribe to every stimulus topic. Each event becomes a spawned
    /// pipeline, so bus handlers return immediately.
    pub async fn attach(
        self: &Arc<Self>,
        bus: &EventBus,
    ) -> std::result::Result<Vec<SubscriptionId>, BusError> {
        let mut ids = Vec::with_capacity(topics::STIMULI.len());
        for topic in topics::STIMULI {
            let orchestrator = Arc::clone(self);
            let id = bus
                .subscribe("orchestrator", topic, move |event: Event| {
                    let orchestrator = Arc::clone(&orchestrator);
                    async move {
                        orchestrator.spawn_event(event);
                        Ok::<(), CareError>(())
                    }
                })
                .await?;
            ids.push(id);
        }
        info!("Orchestrator attached to {} stimulus topics", ids.len());
        Ok(ids)
    }

    fn spawn_event(self: Arc<Self>, event: Event) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let event_type = event.event_type.clone();
            if let Err(e) = self.process(event).await {
                warn!("Stimulus {} not processed: {}", event_type, e);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Run the pipeline for one stimulus event to completion
    pub async fn handle_event(&self, event: Event) -> Result<StimulusOutcome> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = self.process(event).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn process(&self, event: Event) -> Result<StimulusOutcome> {
        let stimulus = Stimulus::from_event(&event)?;
        let key = PipelineKey::new(event.event_id.to_string(), stimulus.subject());

        match self.pipelines.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    "Coalesced {} for {} (stage {})",
                    event.event_type,
                    key,
                    existing.get().tracker.stage()
                );
                return Ok(StimulusOutcome::Coalesced(key));
            }
            Entry::Vacant(slot) => {
                slot.insert(PipelineEntry {
                    tracker: PipelineTracker::new(key.clone()),
                    report: None,
                });
            }
        }
        info!("Stimulus {} for {}", event.event_type, key);

        let applied = apply_stimulus(
            self.store.as_ref(),
            &self.runtime.retry,
            &stimulus,
            event.timestamp,
        )
        .await;
        let settled = match applied {
            Err(e) => {
                warn!("Rejected {}: {}", key, e);
                Some(PipelineStatus::Rejected {
                    reason: e.to_string(),
                })
            }
            Ok(false) => {
                debug!("{}: stimulus changed nothing, no agents dispatched", key);
                Some(PipelineStatus::Unchanged)
            }
            Ok(true) => None,
        };

        let (status, decision) = match (settled, &stimulus.subject()) {
            (Some(settled), _) => (settled, None),
            (None, Subject::Patient(patient_id)) => {
                let ctx = AgentContext::for_patient(
                    key.stimulus_id.clone(),
                    patient_id.clone(),
                    event.timestamp,
                    self.store.clone(),
                );
                self.run_patient(&key, &ctx).await
            }
            (None, Subject::Unit(unit_id)) => {
                let ctx = AgentContext::for_unit(
                    key.stimulus_id.clone(),
                    unit_id.clone(),
                    event.timestamp,
                    self.store.clone(),
                );
                let capacity = [self.agents.capacity.clone()];
                let status = match self.run_stage(&key, &capacity, &ctx).await {
                    Ok(_) => PipelineStatus::Complete,
                    Err(status) => status,
                };
                (status, None)
            }
        };

        let report = self.finish(&key, status, decision).await;
        Ok(StimulusOutcome::Ran(report))
    }

    async fn run_patient(
        &self,
        key: &PipelineKey,
        ctx: &AgentContext,
    ) -> (PipelineStatus, Option<crate::domain::EscalationDecision>) {
        let upstream = [self.agents.risk.clone(), self.agents.capacity.clone()];
        if let Err(status) = self.run_stage(key, &upstream, ctx).await {
            return (status, None);
        }
        if let Err(status) = self.run_stage(key, &[self.agents.flow.clone()], ctx).await {
            return (status, None);
        }
        match self.run_stage(key, &[self.agents.escalation.clone()], ctx).await {
            Ok(outputs) => {
                let decision = outputs.into_iter().find_map(|o| match o {
                    AgentOutput::Escalation(d) => Some(d),
                    _ => None,
                });
                (PipelineStatus::Complete, decision)
            }
            Err(status) => (status, None),
        }
    }

    /// Dispatch `runners` concurrently and wait for all of them, bounded by
    /// the join timeout.
    async fn run_stage(
        &self,
        key: &PipelineKey,
        runners: &[Arc<dyn StageRunner>],
        ctx: &AgentContext,
    ) -> std::result::Result<Vec<AgentOutput>, PipelineStatus> {
        let deadline = Instant::now() + self.config.join_timeout();
        let (tx, mut rx) = mpsc::channel::<(AgentKind, StageResult)>(runners.len().max(1));
        let mut waiting: BTreeSet<AgentKind> = BTreeSet::new();

        for runner in runners {
            let kind = runner.kind();
            waiting.insert(kind);
            self.with_tracker(key, |t| t.dispatched(kind));
            debug!("{}: dispatched {}", key, kind);

            let runner = Arc::clone(runner);
            let ctx = ctx.clone();
            let runtime = self.runtime.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = runner.run(&ctx, &runtime).await;
                // Receiver is gone once the barrier gave up; the result is stored anyway.
                let _ = tx.send((kind, result)).await;
            });
        }
        drop(tx);

        let mut outputs = Vec::with_capacity(runners.len());
        while !waiting.is_empty() {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((kind, Ok(output)))) => {
                    waiting.remove(&kind);
                    self.with_tracker(key, |t| t.finished(kind, true));
                    outputs.push(output);
                }
                Ok(Some((kind, Err(e)))) => {
                    self.with_tracker(key, |t| t.finished(kind, false));
                    warn!("{}: {} failed: {}", key, kind, e);
                    return Err(PipelineStatus::Failed {
                        agent: kind,
                        reason: e.to_string(),
                    });
                }
                Ok(None) => {
                    let agent = waiting.iter().next().copied().unwrap_or(AgentKind::Risk);
                    error!("{}: {} task ended without a result", key, agent);
                    return Err(PipelineStatus::Failed {
                        agent,
                        reason: "agent task ended without a result".to_string(),
                    });
                }
                Err(_) => {
                    let waiting_on: Vec<AgentKind> = waiting.into_iter().collect();
                    warn!(
                        "{}: join barrier timed out after {:?} waiting on {:?}",
                        key,
                        self.config.join_timeout(),
                        waiting_on
                    );
                    return Err(PipelineStatus::TimedOut { waiting_on });
                }
            }
        }
        Ok(outputs)
    }

    fn with_tracker(&self, key: &PipelineKey, f: impl FnOnce(&mut PipelineTracker)) {
        if let Some(mut entry) = self.pipelines.get_mut(key) {
            f(&mut entry.tracker);
        }
    }

    async fn finish(
        &self,
        key: &PipelineKey,
        status: PipelineStatus,
        decision: Option<crate::domain::EscalationDecision>,
    ) -> PipelineReport {
        let report = match self.pipelines.get_mut(key) {
            Some(mut entry) => {
                let report = entry.tracker.finish(status, decision);
                entry.report = Some(report.clone());
                report
            }
            None => PipelineTracker::new(key.clone()).finish(status, decision),
        };

        match &report.status {
            PipelineStatus::Complete => info!(
                "{}: complete in {}ms{}",
                key,
                report.elapsed_ms,
                report
                    .decision
                    .as_ref()
                    .map(|d| format!(" -> {}", d.action))
                    .unwrap_or_default()
            ),
            PipelineStatus::Unchanged => debug!("{}: unchanged", key),
            other => warn!("{}: ended {:?}", key, other),
        }

        let mut finished = self.finished.lock().await;
        finished.push_back(key.clone());
        while finished.len() > self.config.max_tracked_pipelines {
            if let Some(old) = finished.pop_front() {
                self.pipelines.remove(&old);
            }
        }
        report
    }

    // ==================== Queries ====================

    pub fn pipeline_status(&self, key: &PipelineKey) -> Option<PipelineStage> {
        self.pipelines.get(key).map(|e| e.tracker.stage())
    }

    pub fn report(&self, key: &PipelineKey) -> Option<PipelineReport> {
        self.pipelines.get(key).and_then(|e| e.report.clone())
    }

    /// Stimuli accepted but not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no stimulus is in flight. False on timeout.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        let poll = Duration::from_millis(self.config.drain_poll_ms.max(1));
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(poll).await;
        }
        true
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Agent;
    use crate::domain::patient::fixtures::{at, normal_vitals};
    use crate::domain::{
        CapacityAssessment, CareAction, PatientArrival, RiskAssessment, Trajectory,
    };
    use crate::error::AgentError;
    use crate::reasoning::decision::fixtures;
    use crate::store::{InMemoryStateStore, StateKey, StateValue};
    use async_trait::async_trait;

    /// Waits, then writes a fixed risk assessment stamped with the stimulus.
    /// The nth call waits `delays[n]`, the last delay repeating.
    struct SlowRisk {
        delays: Vec<Duration>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for SlowRisk {
        type Observation = RiskAssessment;
        type Decision = RiskAssessment;

        fn kind(&self) -> AgentKind {
            AgentKind::Risk
        }

        async fn observe(
            &self,
            ctx: &AgentContext,
        ) -> std::result::Result<RiskAssessment, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays[call.min(self.delays.len() - 1)];
            sleep(delay).await;
            let patient = ctx.require_patient(AgentKind::Risk)?;
            let mut risk = fixtures::risk(patient, 20.0, Trajectory::Stable, 0.9);
            risk.stimulus_id = ctx.stimulus_id.clone();
            risk.produced_at = ctx.now;
            Ok(risk)
        }

        fn decide(&self, risk: RiskAssessment) -> std::result::Result<RiskAssessment, AgentError> {
            Ok(risk)
        }

        fn records(&self, d: &RiskAssessment) -> Vec<(StateKey, StateValue)> {
            vec![(StateKey::Risk(d.patient_id.clone()), StateValue::Risk(d.clone()))]
        }
    }

    struct SlowCapacity {
        delay: Duration,
    }

    #[async_trait]
    impl Agent for SlowCapacity {
        type Observation = ();
        type Decision = Vec<CapacityAssessment>;

        fn kind(&self) -> AgentKind {
            AgentKind::Capacity
        }

        async fn observe(&self, _ctx: &AgentContext) -> std::result::Result<(), AgentError> {
            sleep(self.delay).await;
            Ok(())
        }

        fn decide(&self, _: ()) -> std::result::Result<Vec<CapacityAssessment>, AgentError> {
            Ok(vec![fixtures::capacity("Ward", 40.0, 0.85)])
        }

        fn records(&self, d: &Vec<CapacityAssessment>) -> Vec<(StateKey, StateValue)> {
            d.iter()
                .map(|c| (StateKey::Capacity(c.unit_id.clone()), StateValue::Capacity(c.clone())))
                .collect()
        }
    }

    fn timed_agents(
        config: &AppConfig,
        risk_ms: u64,
        capacity_ms: u64,
        calls: Arc<AtomicUsize>,
    ) -> AgentSet {
        staggered_agents(config, &[risk_ms], capacity_ms, calls)
    }

    fn staggered_agents(
        config: &AppConfig,
        risk_ms: &[u64],
        capacity_ms: u64,
        calls: Arc<AtomicUsize>,
    ) -> AgentSet {
        let real = AgentSet::from_config(config).unwrap();
        AgentSet {
            risk: Arc::new(SlowRisk {
                delays: risk_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
                calls,
            }),
            capacity: Arc::new(SlowCapacity {
                delay: Duration::from_millis(capacity_ms),
            }),
            ..real
        }
    }

    fn arrival_event(patient: &str) -> Event {
        Event::with_record(
            topics::PATIENT_ARRIVAL,
            "test",
            Some(patient.to_string()),
            &PatientArrival {
                location: Some("ED".into()),
                history_tags: vec![],
                vitals: Some(normal_vitals(0)),
            },
        )
        .unwrap()
        .at(at(0))
    }

    async fn orchestrator(agents: AgentSet) -> Arc<Orchestrator> {
        let config = AppConfig::default();
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
        let bus = Arc::new(EventBus::new(&config.bus));
        let orch = Orchestrator::with_agents(&config, bus, store, agents);
        orch.start().await.unwrap();
        Arc::new(orch)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_waits_for_slower_upstream() {
        let config = AppConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let orch = orchestrator(timed_agents(&config, 1000, 2000, calls)).await;

        let outcome = orch.handle_event(arrival_event("p-1")).await.unwrap();
        let StimulusOutcome::Ran(report) = outcome else {
            panic!("expected a pipeline run");
        };
        assert_eq!(report.status, PipelineStatus::Complete);

        let risk = report.stage(AgentKind::Risk).unwrap();
        let capacity = report.stage(AgentKind::Capacity).unwrap();
        let flow = report.stage(AgentKind::Flow).unwrap();
        assert_eq!(risk.finished_ms, Some(1000));
        assert_eq!(capacity.finished_ms, Some(2000));
        assert_eq!(flow.dispatched_ms, 2000);

        let decision = report.decision.unwrap();
        assert_eq!(decision.action, CareAction::Observe);
        assert_eq!(decision.confidence, 0.85);
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_timeout_reports_and_still_stores() {
        let config = AppConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let orch = orchestrator(timed_agents(&config, 1000, 8000, calls)).await;

        let outcome = orch.handle_event(arrival_event("p-1")).await.unwrap();
        let StimulusOutcome::Ran(report) = outcome else {
            panic!("expected a pipeline run");
        };
        assert_eq!(
            report.status,
            PipelineStatus::TimedOut {
                waiting_on: vec![AgentKind::Capacity]
            }
        );
        assert!(report.decision.is_none());
        assert!(report.stage(AgentKind::Flow).is_none());
        assert_eq!(orch.pipeline_status(&report.key), Some(PipelineStage::TimedOut));

        // The capacity task keeps running after the barrier gave up
        sleep(Duration::from_secs(5)).await;
        let ward = orch.store().get(&StateKey::Capacity("Ward".into())).await;
        assert!(ward.is_some());
        assert!(orch.store().get(&StateKey::Decision("p-1".into())).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_stimulus_is_coalesced() {
        let config = AppConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let orch = orchestrator(timed_agents(&config, 500, 100, calls.clone())).await;
        let event = arrival_event("p-1");

        let first = {
            let orch = Arc::clone(&orch);
            let event = event.clone();
            tokio::spawn(async move { orch.handle_event(event).await })
        };
        sleep(Duration::from_millis(100)).await;

        let second = orch.handle_event(event.clone()).await.unwrap();
        assert!(matches!(second, StimulusOutcome::Coalesced(_)));

        let first = first.await.unwrap().unwrap();
        assert!(matches!(
            first,
            StimulusOutcome::Ran(ref r) if r.status == PipelineStatus::Complete
        ));

        // Completed pipelines stay claimed too
        assert!(matches!(
            orch.handle_event(event).await.unwrap(),
            StimulusOutcome::Coalesced(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_stimulus_dispatches_nothing() {
        let orch = orchestrator(AgentSet::from_config(&AppConfig::default()).unwrap()).await;
        let vitals = Event::with_record(
            topics::VITALS_UPDATE,
            "test",
            Some("ghost".into()),
            &normal_vitals(1),
        )
        .unwrap();

        let StimulusOutcome::Ran(report) = orch.handle_event(vitals).await.unwrap() else {
            panic!("expected a pipeline run");
        };
        assert!(matches!(report.status, PipelineStatus::Rejected { .. }));
        assert!(report.stages.is_empty());
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unit_stimulus_refreshes_capacity_only() {
        let orch = orchestrator(AgentSet::from_config(&AppConfig::default()).unwrap()).await;
        let shift = Event::new(
            topics::STAFF_SHIFT,
            "test",
            None,
            serde_json::json!({"unit_id": "ICU", "action": "start", "count": 2}),
        );

        let StimulusOutcome::Ran(report) = orch.handle_event(shift).await.unwrap() else {
            panic!("expected a pipeline run");
        };
        assert_eq!(report.status, PipelineStatus::Complete);
        let agents: Vec<_> = report.stages.iter().map(|s| s.agent).collect();
        assert_eq!(agents, vec![AgentKind::Capacity]);
        assert!(orch.store().get(&StateKey::Capacity("ICU".into())).await.is_some());
        assert!(orch.store().get(&StateKey::Capacity("ED".into())).await.is_none());
    }

    #[tokio::test]
    async fn test_pruning_keeps_newest_pipelines() {
        let mut config = AppConfig::default();
        config.orchestrator.max_tracked_pipelines = 1;
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::default());
        let bus = Arc::new(EventBus::new(&config.bus));
        let orch = Orchestrator::new(&config, bus, store).unwrap();
        orch.start().await.unwrap();

        let mut keys = Vec::new();
        for count in 1..=2 {
            let shift = Event::new(
                topics::STAFF_SHIFT,
                "test",
                None,
                serde_json::json!({"unit_id": "ED", "action": "start", "count": count}),
            );
            if let StimulusOutcome::Ran(report) = orch.handle_event(shift).await.unwrap() {
                keys.push(report.key);
            }
        }
        assert_eq!(orch.pipeline_status(&keys[0]), None);
        assert_eq!(orch.pipeline_status(&keys[1]), Some(PipelineStage::Complete));
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_overlapping_pipeline_does_not_decide() {
        let config = AppConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let orch = orchestrator(staggered_agents(&config, &[500, 50], 100, calls)).await;

        let older = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.handle_event(arrival_event("p-1")).await })
        };
        sleep(Duration::from_millis(10)).await;

        let newer = arrival_event("p-1").at(at(1));
        let newer_id = newer.event_id.to_string();
        let StimulusOutcome::Ran(newer) = orch.handle_event(newer).await.unwrap() else {
            panic!("expected a pipeline run");
        };
        assert_eq!(newer.status, PipelineStatus::Complete);
        assert_eq!(newer.decision.unwrap().stimulus_id, newer_id);

        let StimulusOutcome::Ran(older) = older.await.unwrap().unwrap() else {
            panic!("expected a pipeline run");
        };
        match &older.status {
            PipelineStatus::Failed { agent, reason } => {
                assert_eq!(*agent, AgentKind::Flow);
                assert!(reason.contains("belongs to stimulus"), "reason: {reason}");
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert!(older.decision.is_none());

        // The late risk result did not replace the newer one
        let risk_key = StateKey::Risk("p-1".into());
        let stored = orch.store().get(&risk_key).await.unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.value.as_risk(&risk_key).unwrap().stimulus_id, newer_id);
        let decision_key = StateKey::Decision("p-1".into());
        let decision = orch.store().get(&decision_key).await.unwrap();
        assert_eq!(decision.version(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_vitals_leave_pipeline_unchanged() {
        let orch = orchestrator(AgentSet::from_config(&AppConfig::default()).unwrap()).await;
        let StimulusOutcome::Ran(first) = orch.handle_event(arrival_event("p-1")).await.unwrap()
        else {
            panic!("expected a pipeline run");
        };
        assert_eq!(first.status, PipelineStatus::Complete);

        // Same sample again under a fresh event id
        let repeat = Event::with_record(
            topics::VITALS_UPDATE,
            "monitor",
            Some("p-1".into()),
            &normal_vitals(0),
        )
        .unwrap()
        .at(at(0));
        let StimulusOutcome::Ran(report) = orch.handle_event(repeat).await.unwrap() else {
            panic!("expected a pipeline run");
        };
        assert_eq!(report.status, PipelineStatus::Unchanged);
        assert!(report.stages.is_empty());
        assert!(report.decision.is_none());
        assert_eq!(orch.pipeline_status(&report.key), Some(PipelineStage::Complete));

        let decision_key = StateKey::Decision("p-1".into());
        assert_eq!(orch.store().get(&decision_key).await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_shift_overflow_is_rejected() {
        let orch = orchestrator(AgentSet::from_config(&AppConfig::default()).unwrap()).await;
        let shift = Event::new(
            topics::STAFF_SHIFT,
            "test",
            None,
            serde_json::json!({"unit_id": "ICU", "action": "start", "count": u32::MAX}),
        );

        let StimulusOutcome::Ran(report) = orch.handle_event(shift).await.unwrap() else {
            panic!("expected a pipeline run");
        };
        match &report.status {
            PipelineStatus::Rejected { reason } => {
                assert!(reason.contains("overflows"), "{reason}")
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert!(report.stages.is_empty());
        assert!(orch.store().get(&StateKey::Capacity("ICU".into())).await.is_none());
    }
}
