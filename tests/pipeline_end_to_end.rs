//! Stimulus to decision through the real agents

use careflow::agents::AgentKind;
use careflow::bus::{topics, Event, EventBus};
use careflow::config::AppConfig;
use careflow::coordinator::{Orchestrator, PipelineStatus, StimulusOutcome};
use careflow::domain::{
    CareAction, EscalationDecision, PatientArrival, Trajectory, UrgencyLevel, VitalsSample,
};
use careflow::store::{InMemoryStateStore, StateKey, StateKind, StateStore};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + ChronoDuration::minutes(minute)
}

fn normal(minute: i64) -> VitalsSample {
    VitalsSample {
        timestamp: at(minute),
        heart_rate: 75.0,
        bp_systolic: 120.0,
        bp_diastolic: 80.0,
        spo2: 98.0,
        respiratory_rate: 16.0,
        temperature: 37.0,
        consciousness: 15,
    }
}

fn collapse(minute: i64) -> VitalsSample {
    VitalsSample {
        timestamp: at(minute),
        heart_rate: 160.0,
        bp_systolic: 75.0,
        bp_diastolic: 40.0,
        spo2: 80.0,
        respiratory_rate: 38.0,
        temperature: 40.5,
        consciousness: 8,
    }
}

fn arrival(patient: &str, vitals: Option<VitalsSample>, tags: &[&str]) -> Event {
    Event::with_record(
        topics::PATIENT_ARRIVAL,
        "triage",
        Some(patient.to_string()),
        &PatientArrival {
            location: Some("ED".into()),
            history_tags: tags.iter().map(|t| t.to_string()).collect(),
            vitals,
        },
    )
    .unwrap()
    .at(at(0))
}

fn vitals(patient: &str, sample: VitalsSample) -> Event {
    let timestamp = sample.timestamp;
    Event::with_record(topics::VITALS_UPDATE, "monitor", Some(patient.to_string()), &sample)
        .unwrap()
        .at(timestamp)
}

async fn setup() -> (Arc<EventBus>, Arc<dyn StateStore>, Arc<Orchestrator>) {
    let config = AppConfig::default();
    let bus = Arc::new(EventBus::new(&config.bus));
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new(config.store.history_limit));
    let orchestrator = Arc::new(Orchestrator::new(&config, bus.clone(), store.clone()).unwrap());
    orchestrator.start().await.unwrap();
    (bus, store, orchestrator)
}

fn report(outcome: StimulusOutcome) -> careflow::coordinator::PipelineReport {
    match outcome {
        StimulusOutcome::Ran(report) => report,
        StimulusOutcome::Coalesced(key) => panic!("{key} was coalesced"),
    }
}

#[tokio::test]
async fn deteriorating_patient_is_escalated() {
    let (_bus, store, orchestrator) = setup().await;

    let first = report(
        orchestrator
            .handle_event(arrival("p-1", Some(normal(0)), &["CHF", "COPD"]))
            .await
            .unwrap(),
    );
    assert_eq!(first.status, PipelineStatus::Complete);
    assert_ne!(first.decision.unwrap().action, CareAction::Escalate);

    let second = report(orchestrator.handle_event(vitals("p-1", collapse(15))).await.unwrap());
    assert_eq!(second.status, PipelineStatus::Complete);
    for agent in [AgentKind::Risk, AgentKind::Capacity, AgentKind::Flow, AgentKind::Escalation] {
        assert!(second.stage(agent).unwrap().succeeded, "{agent} did not succeed");
    }

    let decision = second.decision.unwrap();
    assert_eq!(decision.action, CareAction::Escalate);
    assert_eq!(decision.urgency, UrgencyLevel::Immediate);
    assert_eq!(decision.uncertainty.safe_to_wait, 0.0);
    assert_eq!(decision.timestamp, at(15));

    let risk_key = StateKey::Risk("p-1".into());
    let risk = store.get(&risk_key).await.unwrap();
    assert_eq!(risk.version(), 2);
    let risk = risk.value.as_risk(&risk_key).unwrap().clone();
    assert_eq!(risk.trajectory, Trajectory::Critical);
    assert!(risk.escalation_required);

    let decision_key = StateKey::Decision("p-1".into());
    let stored = store.get(&decision_key).await.unwrap();
    assert_eq!(stored.version(), 2);
    assert_eq!(stored.value.as_decision(&decision_key).unwrap(), &decision);
}

#[tokio::test]
async fn patient_without_vitals_fails_at_risk() {
    let (_bus, store, orchestrator) = setup().await;

    let outcome = report(orchestrator.handle_event(arrival("p-2", None, &[])).await.unwrap());
    match &outcome.status {
        PipelineStatus::Failed { agent, reason } => {
            assert_eq!(*agent, AgentKind::Risk);
            assert!(reason.contains("p-2"), "reason: {reason}");
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(outcome.decision.is_none());
    assert!(outcome.stage(AgentKind::Flow).is_none());
    assert!(store.get(&StateKey::Patient("p-2".into())).await.is_some());
    assert!(store.get(&StateKey::Decision("p-2".into())).await.is_none());
}

#[tokio::test]
async fn stimuli_published_on_the_bus_reach_a_decision() {
    let (bus, store, orchestrator) = setup().await;
    orchestrator.attach(&bus).await.unwrap();

    for patient in ["p-10", "p-11"] {
        let delivery = bus.publish(arrival(patient, Some(normal(0)), &[])).await;
        assert_eq!(delivery.subscribers, 1);
        assert!(delivery.all_delivered());
    }
    assert!(orchestrator.wait_idle(Duration::from_secs(10)).await);
    assert_eq!(orchestrator.in_flight(), 0);

    let decisions = store.keys(StateKind::Decision).await;
    assert_eq!(
        decisions,
        vec![StateKey::Decision("p-10".into()), StateKey::Decision("p-11".into())]
    );

    let published = bus.history(Some(topics::DECISION_MADE), 10).await;
    assert_eq!(published.len(), 2);
    for event in published {
        let decision: EscalationDecision = event.payload_as().unwrap();
        assert_eq!(event.patient_id.as_deref(), Some(decision.patient_id.as_str()));
        assert_eq!(event.source, "escalation_decision");
    }

    // Every agent output topic saw traffic for both pipelines
    assert_eq!(bus.history(Some(topics::RISK_CALCULATED), 10).await.len(), 2);
    assert!(bus.history(Some("capacity_intelligence.*"), 100).await.len() >= 2);
}
