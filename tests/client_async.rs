//! Async paths of the high-level client.

use std::sync::Arc;
use std::time::Duration;

use mrc_client::{
    ClientConfig, ErrorKind, MrcClient, RunMode, ScriptRequest, SimulatedServer, StatusKind,
    StopValue, StopValueKind,
};

fn connect(server: &Arc<SimulatedServer>) -> MrcClient {
    MrcClient::connect(&ClientConfig::default(), server.clone()).unwrap()
}

#[tokio::test]
async fn test_polled_run_yields_result() {
    let server = Arc::new(SimulatedServer::new().with_script_duration(Duration::from_millis(50)));
    let client = connect(&server);

    let output = client
        .run_script_polled(
            ScriptRequest::InlineText("let r = sqrt(16)\nprint r\nstop r".into()),
            Duration::from_millis(5),
        )
        .await
        .unwrap();

    assert!(output.completed);
    assert_eq!(output.text, "4.0\n");
    assert_eq!(
        client.script_stop_value(StopValueKind::Numeric).unwrap(),
        StopValue::Numeric(4.0)
    );
    client.close().unwrap();
}

#[tokio::test]
async fn test_dropping_polled_run_stops_polling() {
    let server = Arc::new(SimulatedServer::new().with_script_duration(Duration::from_millis(300)));
    let client = connect(&server);

    let polled = client.run_script_polled(
        ScriptRequest::InlineText("print 1".into()),
        Duration::from_millis(10),
    );
    let timed_out = tokio::time::timeout(Duration::from_millis(50), polled).await;
    assert!(timed_out.is_err());

    // The script keeps running on the server after the caller gave up
    assert!(client.is_running().unwrap());
    assert_eq!(client.request_control().unwrap_err().kind(), ErrorKind::ClientBusy);

    client.wait_idle(None).unwrap();
    client.request_control().unwrap();
    client.close().unwrap();
}

#[tokio::test]
async fn test_events_channel_sees_script_end() {
    let server = Arc::new(SimulatedServer::new());
    let client = connect(&server);
    let mut events = client.events();

    client
        .run_script(
            ScriptRequest::InlineText("status scan_offset\nprint 2".into()),
            RunMode::Detached,
        )
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
        kinds.push(event.kind);
        if event.kind == StatusKind::ScriptEnd {
            break;
        }
    }
    assert_eq!(kinds, vec![StatusKind::ScanOffset, StatusKind::ScriptEnd]);

    client.wait_idle(None).unwrap();
    assert_eq!(client.session().result().unwrap().output, "2\n");
    client.close().unwrap();
}

#[tokio::test]
async fn test_polled_script_error() {
    let server = Arc::new(SimulatedServer::new());
    let client = connect(&server);
    server.install_script("broken.scr", "print missing_variable");

    let err = client
        .run_script_polled(
            ScriptRequest::FileReference("broken.scr".into()),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ScriptExecution);
    client.close().unwrap();
}
