//! Client ↔ agent simulé, en HTTP réel

use mtconnect_client::{
    list_device_names_at, ClientError, ClientEvent, ClientState, DecodeOutcome, MtConnectClient, StreamOptions,
};
use mtconnect_devkit::{error_document, timestamp_at, AgentEndpoint, ComponentSpec, ProbeBuilder, StreamsBuilder, TestHarness};
use std::time::Duration;

const DEVICE: &str = "VMC-3Axis";

fn probe_document() -> String {
    ProbeBuilder::new(1)
        .device(
            ComponentSpec::device("d1", DEVICE)
                .data_item("avail", "EVENT", "AVAILABILITY")
                .child(
                    ComponentSpec::component("Controller", "ctrl", Some("controller"))
                        .data_item("exec", "EVENT", "EXECUTION")
                        .data_item("mode", "EVENT", "CONTROLLER_MODE"),
                ),
        )
        .build()
}

async fn probed_client(harness: &TestHarness) -> MtConnectClient {
    harness.agent.push_probe(probe_document());
    let mut client = MtConnectClient::new(&harness.agent.device_url(DEVICE)).unwrap();
    client.probe().await.unwrap();
    client
}

fn value_of(client: &MtConnectClient, id: &str) -> Option<String> {
    client
        .topology()
        .and_then(|t| t.data_item(id))
        .and_then(|i| i.current_sample())
        .map(|s| s.value.clone())
}

#[tokio::test]
async fn test_probe_then_current_then_sample() {
    let harness = TestHarness::start().await.unwrap();
    let mut client = probed_client(&harness).await;
    assert_eq!(client.state(), ClientState::Idle);
    assert_eq!(client.topology().unwrap().len(), 3);

    harness.agent.push_current(
        StreamsBuilder::new(1, DEVICE)
            .sequences(41, 42)
            .observation("Availability", "avail", &timestamp_at(0), 40, "AVAILABLE")
            .observation("Execution", "exec", &timestamp_at(1), 41, "ACTIVE")
            .build(),
    );
    harness.agent.push_sample(
        StreamsBuilder::new(1, DEVICE)
            .sequences(43, 44)
            .observation("Execution", "exec", &timestamp_at(2), 42, "FEED_HOLD")
            .observation("ControllerMode", "mode", &timestamp_at(3), 43, "MANUAL")
            .build(),
    );

    let options = StreamOptions { record_count: 50, ..StreamOptions::default() };
    client.poll_once(&options).await.unwrap();
    client.poll_once(&options).await.unwrap();

    let requests = harness.agent.requests();
    assert_eq!(
        requests.iter().map(|r| r.endpoint).collect::<Vec<_>>(),
        vec![AgentEndpoint::Probe, AgentEndpoint::Current, AgentEndpoint::Sample]
    );
    assert!(requests.iter().all(|r| r.device.as_deref() == Some(DEVICE)));
    assert_eq!(requests[2].query_u64("from"), Some(42));
    assert_eq!(requests[2].query_u64("count"), Some(50));

    assert_eq!(value_of(&client, "exec").as_deref(), Some("FEED_HOLD"));
    assert_eq!(value_of(&client, "mode").as_deref(), Some("MANUAL"));
    assert_eq!(client.position().next_sequence, 44);
}

#[tokio::test]
async fn test_agent_restart_resynchronizes_in_same_cycle() {
    let harness = TestHarness::start().await.unwrap();
    let mut client = probed_client(&harness).await;
    let options = StreamOptions::default();

    harness.agent.push_current(StreamsBuilder::new(1, DEVICE).sequences(99, 100).build());
    harness.agent.push_sample(
        StreamsBuilder::new(7, DEVICE)
            .sequences(5, 6)
            .observation("Execution", "exec", &timestamp_at(1), 5, "STALE")
            .build(),
    );
    harness.agent.push_current(
        StreamsBuilder::new(7, DEVICE)
            .sequences(6, 7)
            .observation("Execution", "exec", &timestamp_at(2), 6, "READY")
            .build(),
    );

    client.poll_once(&options).await.unwrap();
    let outcome = client.poll_once(&options).await.unwrap();

    assert!(matches!(outcome, DecodeOutcome::Applied(_)));
    assert_eq!(
        harness.agent.endpoints(),
        vec![AgentEndpoint::Probe, AgentEndpoint::Current, AgentEndpoint::Sample, AgentEndpoint::Current]
    );
    assert_eq!(value_of(&client, "exec").as_deref(), Some("READY"));
    assert_eq!(client.position().instance_id, Some(7));
    assert_eq!(client.stats().snapshot().restarts, 1);
}

#[tokio::test]
async fn test_out_of_range_error_document_falls_back_to_current() {
    let harness = TestHarness::start().await.unwrap();
    let mut client = probed_client(&harness).await;
    let options = StreamOptions::default();

    harness.agent.push_current(StreamsBuilder::new(1, DEVICE).sequences(9, 10).build());
    harness.agent.push_response(
        AgentEndpoint::Sample,
        400,
        error_document(1, "OUT_OF_RANGE", "'from' must be greater than 5000"),
    );

    client.poll_once(&options).await.unwrap();
    let outcome = client.poll_once(&options).await.unwrap();
    client.poll_once(&options).await.unwrap();

    assert_eq!(outcome, DecodeOutcome::AgentError { codes: vec!["OUT_OF_RANGE".to_string()] });
    assert_eq!(
        harness.agent.endpoints(),
        vec![AgentEndpoint::Probe, AgentEndpoint::Current, AgentEndpoint::Sample, AgentEndpoint::Current]
    );
}

#[tokio::test]
async fn test_server_error_keeps_sequence() {
    let harness = TestHarness::start().await.unwrap();
    let mut client = probed_client(&harness).await;
    let options = StreamOptions::default();

    harness.agent.push_current(StreamsBuilder::new(1, DEVICE).sequences(19, 20).build());
    harness.agent.push_response(AgentEndpoint::Sample, 500, "");
    harness.agent.push_sample(StreamsBuilder::new(1, DEVICE).sequences(19, 20).build());

    client.poll_once(&options).await.unwrap();
    assert!(matches!(client.poll_once(&options).await, Err(ClientError::Transport(_))));
    client.poll_once(&options).await.unwrap();

    let samples = harness.agent.requests_for(AgentEndpoint::Sample);
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|r| r.query_u64("from") == Some(20)));
}

#[tokio::test]
async fn test_streaming_session_delivers_events() {
    let harness = TestHarness::start().await.unwrap();
    let mut client = probed_client(&harness).await;
    let mut events = client.observers().event_channel();

    harness.agent.push_current(
        StreamsBuilder::new(1, DEVICE)
            .sequences(10, 11)
            .observation("Execution", "exec", &timestamp_at(0), 10, "ACTIVE")
            .build(),
    );
    harness.agent.push_sample(
        StreamsBuilder::new(1, DEVICE)
            .sequences(11, 12)
            .observation("Execution", "exec", &timestamp_at(1), 11, "STOPPED")
            .build(),
    );

    let session = client
        .start_streaming(StreamOptions {
            interval: Duration::from_millis(20),
            ..StreamOptions::default()
        })
        .unwrap();

    assert!(harness.wait_for_requests(AgentEndpoint::Sample, 3, 5000).await);
    let client = session.stop().await.unwrap();
    assert_eq!(client.state(), ClientState::Stopped);

    let mut values = Vec::new();
    while let Ok(event) = events.receiver.try_recv() {
        if let ClientEvent::ItemChanged(item) = event {
            values.push(item.current_sample().unwrap().value.clone());
        }
    }
    // la dernière réponse sample est rejouée : doublons exacts non re-notifiés
    assert_eq!(values, vec!["ACTIVE", "STOPPED"]);

    let samples = harness.agent.requests_for(AgentEndpoint::Sample);
    assert_eq!(samples[0].query_u64("from"), Some(11));
    assert!(samples[1..].iter().all(|r| r.query_u64("from") == Some(12)));
}

#[tokio::test]
async fn test_list_device_names_from_agent_root() {
    let harness = TestHarness::start().await.unwrap();
    harness.agent.push_probe(
        ProbeBuilder::new(1)
            .device(ComponentSpec::device("d1", "VMC-3Axis"))
            .device(ComponentSpec::device("d2", "Lathe-2"))
            .build(),
    );

    let names = list_device_names_at(&harness.agent.base_url()).await.unwrap();
    assert_eq!(names, vec!["VMC-3Axis", "Lathe-2"]);
    assert_eq!(harness.agent.requests()[0].device, None);
}
