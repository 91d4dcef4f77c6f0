use pretty_assertions::assert_eq;
use serialcmd_core::protocol::{
    Connection, ConnectionConfig, ProtocolError, ResponseVocabulary, SerialDevice,
    TimeoutProperty, Transport,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_READ: Option<Duration> = Some(Duration::from_millis(100));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Open,
    Close,
    ClearInput,
    Write(Vec<u8>),
    Read,
}

/// Scripted device state shared with the test body
#[derive(Default)]
struct Script {
    responses: VecDeque<Vec<u8>>,
    events: Vec<Event>,
    open: bool,
    timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    timeouts_seen: Vec<Option<Duration>>,
    read_delay: Duration,
    opens_allowed: Option<usize>,
    fail_writes: bool,
}

impl Script {
    fn writes(&self) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, event: &Event) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }
}

/// Mock serial port for testing
struct MockSerial(Arc<Mutex<Script>>);

impl SerialDevice for MockSerial {
    fn open(&mut self) -> Result<(), ProtocolError> {
        let mut s = self.0.lock().unwrap();
        if let Some(allowed) = s.opens_allowed {
            if s.count(&Event::Open) >= allowed {
                return Err(ProtocolError::Open {
                    port: "mock".to_string(),
                    reason: "device unplugged".to_string(),
                });
            }
        }
        s.events.push(Event::Open);
        s.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        let mut s = self.0.lock().unwrap();
        s.events.push(Event::Close);
        s.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.0.lock().unwrap().open
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.0.lock().unwrap().events.push(Event::ClearInput);
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut s = self.0.lock().unwrap();
        if !s.open {
            return Err(ProtocolError::NotOpen);
        }
        if s.fail_writes {
            return Err(ProtocolError::Serial("write timed out".to_string()));
        }
        s.events.push(Event::Write(data.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn read_until(&mut self, _delimiter: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let delay = self.0.lock().unwrap().read_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut s = self.0.lock().unwrap();
        let timeout = s.timeout;
        s.timeouts_seen.push(timeout);
        s.events.push(Event::Read);
        Ok(s.responses.pop_front().unwrap_or_default())
    }

    fn timeout(&self, property: TimeoutProperty) -> Option<Duration> {
        let s = self.0.lock().unwrap();
        match property {
            TimeoutProperty::Read => s.timeout,
            TimeoutProperty::Write => s.write_timeout,
        }
    }

    fn set_timeout(
        &mut self,
        property: TimeoutProperty,
        value: Option<Duration>,
    ) -> Result<(), ProtocolError> {
        let mut s = self.0.lock().unwrap();
        match property {
            TimeoutProperty::Read => s.timeout = value,
            TimeoutProperty::Write => s.write_timeout = value,
        }
        Ok(())
    }
}

fn script(responses: &[&[u8]]) -> Arc<Mutex<Script>> {
    Arc::new(Mutex::new(Script {
        responses: responses.iter().map(|r| r.to_vec()).collect(),
        timeout: DEFAULT_READ,
        ..Script::default()
    }))
}

fn config() -> ConnectionConfig {
    ConnectionConfig {
        retry_wait_ms: 1,
        ..ConnectionConfig::new("mock", "OK")
    }
}

async fn connect_with(
    state: &Arc<Mutex<Script>>,
    config: ConnectionConfig,
    reset_input_before_write: bool,
) -> Connection {
    let device = MockSerial(Arc::clone(state));
    let transport = Transport::spawn("mock", Box::new(device), reset_input_before_write)
        .await
        .unwrap();
    Connection::with_transport(transport, config).unwrap()
}

async fn connect(state: &Arc<Mutex<Script>>) -> Connection {
    connect_with(state, config(), false).await
}

#[tokio::test]
async fn test_ack_is_stripped_from_both_ends() {
    let state = script(&[b"OKOK"]);
    let conn = connect(&state).await;

    assert_eq!(conn.send("PING", 0, None).await.unwrap(), "");
    assert_eq!(state.lock().unwrap().writes(), vec![b"PING".to_vec()]);
}

#[tokio::test]
async fn test_payload_is_trimmed() {
    let state = script(&[b"  temp=21.5\r\nOK"]);
    let conn = connect(&state).await;
    assert_eq!(conn.send("TEMP?", 0, None).await.unwrap(), "temp=21.5");
}

#[tokio::test]
async fn test_error_keyword_without_ack_fails_immediately() {
    let state = script(&[b"ERROR: bad cmd"]);
    let conn = connect(&state).await;

    match conn.send("BOGUS", 3, None).await {
        Err(ProtocolError::ErrorResponse { port, response }) => {
            assert_eq!(port, "mock");
            assert_eq!(response, "ERROR: bad cmd");
        }
        other => panic!("expected error response, got {:?}", other),
    }

    let s = state.lock().unwrap();
    assert_eq!(s.writes().len(), 1);
    assert_eq!(s.count(&Event::Close), 0);
}

#[tokio::test]
async fn test_alarm_takes_precedence_over_error() {
    let state = script(&[b"error: alarm latched OK"]);
    let conn = connect(&state).await;

    match conn.send("STATUS", 2, None).await {
        Err(ProtocolError::AlarmResponse { response, .. }) => {
            assert_eq!(response, "error: alarm latched");
        }
        other => panic!("expected alarm response, got {:?}", other),
    }
    assert_eq!(state.lock().unwrap().writes().len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_reset_link_between_attempts() {
    let state = script(&[]);
    let conn = connect(&state).await;

    match conn.send("PING", 2, None).await {
        Err(ProtocolError::NoResponse { port, command }) => {
            assert_eq!(port, "mock");
            assert_eq!(command, "PING");
        }
        other => panic!("expected no response, got {:?}", other),
    }

    let s = state.lock().unwrap();
    let ping = Event::Write(b"PING".to_vec());
    assert_eq!(
        s.events,
        vec![
            Event::Open,
            ping.clone(),
            Event::Read,
            Event::Close,
            Event::Open,
            ping.clone(),
            Event::Read,
            Event::Close,
            Event::Open,
            ping,
            Event::Read,
        ]
    );
}

#[tokio::test]
async fn test_no_retries_means_single_attempt() {
    let state = script(&[]);
    let conn = connect(&state).await;

    assert!(matches!(
        conn.send("PING", 0, None).await,
        Err(ProtocolError::NoResponse { .. })
    ));
    let s = state.lock().unwrap();
    assert_eq!(s.writes().len(), 1);
    assert_eq!(s.count(&Event::Close), 0);
}

#[tokio::test]
async fn test_partial_response_is_retried() {
    let state = script(&[b"12", b"1234 OK"]);
    let conn = connect(&state).await;

    assert_eq!(conn.send("COUNT?", 1, None).await.unwrap(), "1234");
    let s = state.lock().unwrap();
    assert_eq!(s.writes().len(), 2);
    assert_eq!(s.count(&Event::Close), 1);
}

#[tokio::test]
async fn test_write_count_stays_within_retry_budget() {
    for retries in 0..4u32 {
        for answer_on in 0..=retries {
            let mut responses: Vec<&[u8]> = vec![&b""[..]; answer_on as usize];
            responses.push(b"done OK");
            let state = script(&responses);
            let conn = connect(&state).await;

            assert_eq!(conn.send("GO", retries, None).await.unwrap(), "done");
            assert_eq!(
                state.lock().unwrap().writes().len(),
                answer_on as usize + 1
            );
        }
    }
}

#[tokio::test]
async fn test_reopen_failure_aborts_retries() {
    let state = script(&[]);
    state.lock().unwrap().opens_allowed = Some(1);
    let conn = connect(&state).await;

    assert!(matches!(
        conn.send("PING", 5, None).await,
        Err(ProtocolError::Open { .. })
    ));
    assert_eq!(state.lock().unwrap().writes().len(), 1);
}

#[tokio::test]
async fn test_configured_retries_drive_send_default() {
    let state = script(&[b"", b"", b"late OK"]);
    let conn = connect_with(
        &state,
        ConnectionConfig {
            retries: 2,
            ..config()
        },
        false,
    )
    .await;
    assert_eq!(conn.retries(), 2);

    assert_eq!(conn.send_default("PING").await.unwrap(), "late");
    let s = state.lock().unwrap();
    assert_eq!(s.writes().len(), 3);
    assert_eq!(s.count(&Event::Close), 2);
    assert_eq!(s.timeouts_seen, vec![DEFAULT_READ; 3]);
}

#[tokio::test]
async fn test_send_default_without_configured_retries_tries_once() {
    let state = script(&[]);
    let conn = connect(&state).await;

    assert!(matches!(
        conn.send_default("PING").await,
        Err(ProtocolError::NoResponse { .. })
    ));
    assert_eq!(state.lock().unwrap().writes().len(), 1);
}

#[tokio::test]
async fn test_timeout_override_applies_and_restores() {
    let state = script(&[b"a OK", b"ERROR x", b"ALARM y"]);
    let conn = connect(&state).await;
    let long = Some(Duration::from_secs(3));

    assert_eq!(conn.send("A", 0, long).await.unwrap(), "a");
    assert_eq!(conn.read_timeout(), DEFAULT_READ);

    assert!(matches!(
        conn.send("B", 0, long).await,
        Err(ProtocolError::ErrorResponse { .. })
    ));
    assert_eq!(conn.read_timeout(), DEFAULT_READ);

    assert!(matches!(
        conn.send("C", 0, long).await,
        Err(ProtocolError::AlarmResponse { .. })
    ));
    assert_eq!(conn.read_timeout(), DEFAULT_READ);

    assert!(matches!(
        conn.send("D", 1, long).await,
        Err(ProtocolError::NoResponse { .. })
    ));
    assert_eq!(conn.read_timeout(), DEFAULT_READ);

    let s = state.lock().unwrap();
    assert_eq!(s.timeouts_seen, vec![long; 5]);
    assert_eq!(s.timeout, DEFAULT_READ);
}

#[tokio::test]
async fn test_no_override_keeps_default_timeout() {
    let state = script(&[b"OK", b"OK"]);
    let conn = connect(&state).await;

    conn.send("A", 0, None).await.unwrap();
    conn.send("B", 0, DEFAULT_READ).await.unwrap();
    assert_eq!(
        state.lock().unwrap().timeouts_seen,
        vec![DEFAULT_READ, DEFAULT_READ]
    );
}

#[tokio::test]
async fn test_cancelled_send_still_restores_timeout() {
    let state = script(&[b"slow OK", b"fast OK"]);
    state.lock().unwrap().read_delay = Duration::from_millis(300);
    let conn = connect(&state).await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        conn.send("SLOW", 0, Some(Duration::from_secs(9))),
    )
    .await;
    assert!(cancelled.is_err());

    state.lock().unwrap().read_delay = Duration::ZERO;
    // The abandoned read still runs on the wire and consumes its answer
    assert_eq!(conn.send("FAST", 0, None).await.unwrap(), "fast");
    assert_eq!(conn.read_timeout(), DEFAULT_READ);

    let s = state.lock().unwrap();
    assert_eq!(
        s.timeouts_seen,
        vec![Some(Duration::from_secs(9)), DEFAULT_READ]
    );
}

#[tokio::test]
async fn test_send_after_cancel_overrides_from_restored_timeout() {
    let nine = Some(Duration::from_secs(9));
    let two = Some(Duration::from_secs(2));

    for next in [two, nine] {
        let state = script(&[b"slow OK", b"next OK"]);
        state.lock().unwrap().read_delay = Duration::from_millis(300);
        let conn = connect(&state).await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), conn.send("SLOW", 0, nine)).await;
        assert!(cancelled.is_err());
        state.lock().unwrap().read_delay = Duration::ZERO;

        assert_eq!(conn.send("NEXT", 0, next).await.unwrap(), "next");
        assert_eq!(conn.read_timeout(), DEFAULT_READ);

        let s = state.lock().unwrap();
        assert_eq!(s.timeouts_seen, vec![nine, next]);
        assert_eq!(s.timeout, DEFAULT_READ);
    }
}

#[tokio::test]
async fn test_override_restored_when_reopen_fails() {
    let state = script(&[]);
    state.lock().unwrap().opens_allowed = Some(1);
    let conn = connect(&state).await;

    assert!(matches!(
        conn.send("PING", 3, Some(Duration::from_secs(5))).await,
        Err(ProtocolError::Open { .. })
    ));
    assert_eq!(conn.read_timeout(), DEFAULT_READ);
    assert_eq!(state.lock().unwrap().timeout, DEFAULT_READ);
}

#[tokio::test]
async fn test_override_restored_when_write_fails() {
    let state = script(&[b"never OK"]);
    state.lock().unwrap().fail_writes = true;
    let conn = connect(&state).await;

    assert!(matches!(
        conn.send("PING", 2, Some(Duration::from_secs(5))).await,
        Err(ProtocolError::Serial(_))
    ));
    assert_eq!(conn.read_timeout(), DEFAULT_READ);
    let s = state.lock().unwrap();
    assert_eq!(s.timeout, DEFAULT_READ);
    assert!(s.timeouts_seen.is_empty());
}

#[tokio::test]
async fn test_concurrent_sends_never_interleave() {
    let responses: Vec<&[u8]> = vec![&b"OK"[..]; 8];
    let state = script(&responses);
    state.lock().unwrap().read_delay = Duration::from_millis(5);
    let conn = Arc::new(connect(&state).await);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let conn = Arc::clone(&conn);
        tasks.push(tokio::spawn(async move {
            conn.send(&format!("CMD{i}"), 0, None).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let s = state.lock().unwrap();
    let exchanges: Vec<&Event> = s.events.iter().skip(1).collect();
    assert_eq!(exchanges.len(), 16);
    for pair in exchanges.chunks(2) {
        assert!(matches!(pair[0], Event::Write(_)));
        assert_eq!(pair[1], &Event::Read);
    }
    let mut written = s.writes();
    written.sort();
    written.dedup();
    assert_eq!(written.len(), 8);
}

#[tokio::test]
async fn test_separate_connections_do_not_share_lock() {
    let slow = script(&[b"slow OK"]);
    slow.lock().unwrap().read_delay = Duration::from_millis(300);
    let fast = script(&[b"fast OK"]);

    let slow_conn = connect(&slow).await;
    let fast_conn = connect(&fast).await;

    let (slow_result, fast_result) = tokio::join!(
        slow_conn.send("S", 0, None),
        tokio::time::timeout(Duration::from_millis(150), fast_conn.send("F", 0, None)),
    );
    assert_eq!(slow_result.unwrap(), "slow");
    assert_eq!(fast_result.expect("fast link blocked").unwrap(), "fast");
}

#[tokio::test]
async fn test_reset_input_before_write() {
    let state = script(&[b"OK"]);
    let conn = connect_with(&state, config(), true).await;

    conn.send("X", 0, None).await.unwrap();
    assert_eq!(
        state.lock().unwrap().events,
        vec![
            Event::Open,
            Event::ClearInput,
            Event::Write(b"X".to_vec()),
            Event::Read
        ]
    );
}

#[tokio::test]
async fn test_send_without_response_only_writes() {
    let state = script(&[]);
    let conn = connect(&state).await;

    conn.send_without_response(&[0x01u8, 0x02, 0x03][..])
        .await
        .unwrap();
    assert_eq!(
        state.lock().unwrap().events,
        vec![Event::Open, Event::Write(vec![0x01, 0x02, 0x03])]
    );
}

#[tokio::test]
async fn test_async_response_vocabulary() {
    let state = script(&[b"ERR 17", b"ASYNC ERR 3 OK"]);
    let config = ConnectionConfig {
        vocabulary: ResponseVocabulary::async_response(),
        ..config()
    };
    let conn = connect_with(&state, config, false).await;

    assert!(matches!(
        conn.send("MOVE", 0, None).await,
        Err(ProtocolError::ErrorResponse { response, .. }) if response == "ERR 17"
    ));

    match conn.send("MOVE", 0, None).await {
        Err(ProtocolError::ErrorResponse { response, .. }) => {
            assert!(conn.is_async_notice(&response));
        }
        other => panic!("expected error response, got {:?}", other),
    }
    assert!(!conn.is_async_notice("ERR 17"));
}

#[tokio::test]
async fn test_keywords_are_case_insensitive() {
    let state = script(&[b"Fault: overtemp"]);
    let config = ConnectionConfig {
        vocabulary: ResponseVocabulary {
            error_keyword: "FAULT".to_string(),
            ..ResponseVocabulary::standard()
        },
        ..config()
    };
    let conn = connect_with(&state, config, false).await;
    assert_eq!(conn.vocabulary().error_keyword, "fault");

    assert!(matches!(
        conn.send("HEAT", 0, None).await,
        Err(ProtocolError::ErrorResponse { .. })
    ));
}

#[tokio::test]
async fn test_close_and_open() {
    let state = script(&[]);
    let conn = connect(&state).await;

    conn.close().await.unwrap();
    assert!(!conn.is_open().await.unwrap());
    assert!(matches!(
        conn.send("PING", 0, None).await,
        Err(ProtocolError::NotOpen)
    ));
    conn.open().await.unwrap();
    assert!(conn.is_open().await.unwrap());
}

#[test]
fn test_protocol_error_display() {
    let err = ProtocolError::ErrorResponse {
        port: "/dev/ttyUSB0".to_string(),
        response: "ERROR 5".to_string(),
    };
    assert_eq!(err.to_string(), "Error response from /dev/ttyUSB0: ERROR 5");
}
