//! Tests for the AtmoWEB client against a local stub controller.
//!
//! The stub answers on 127.0.0.1 with canned, deliberately sloppy bodies in
//! the style of real controller firmware. Tests against a real incubator are
//! ignored by default and run with:
//! `ATMOLOG_DEVICE=192.168.100.100 cargo test -p atmolog-core -- --ignored`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use atmolog_core::atmolog_types::{SetOutcome, ValueRange, channels};
use atmolog_core::{AtmoWebClient, DeviceInterface, RetryConfig, SampleChannels, sample_reading};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

type Requests = Arc<Mutex<Vec<String>>>;

/// Start a stub controller. `respond` maps the request query string to a body;
/// `None` leaves the request hanging.
async fn stub(respond: fn(&str) -> Option<String>) -> (u16, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let target = head.split_whitespace().nth(1).unwrap_or("/");
                let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
                seen.lock().unwrap().push(query.to_string());

                let Some(body) = respond(query) else {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (port, requests)
}

fn firmware(query: &str) -> String {
    match query {
        "TempSet=" => r#""TempSet":37.0,"TempSet_Range":{min: 0.0, max: 70.0,},"#.to_string(),
        "TempSet=36.5" => r#""TempSet":36.5,"#.to_string(),
        "HumSet=" => r#""HumSet":"50.0","HumSet_RangeMin":10,"HumSet_RangeMax":95"#.to_string(),
        "O2Set=" | "O2Read=" | "O2Set=5" => {
            let key = query.trim_end_matches(|c: char| c == '=' || c.is_ascii_digit());
            format!("\"{}\":N/A", key)
        }
        "CurOp=" => "{\u{201E}CurOp\u{201C}:\u{201E}Manual\u{201C}}".to_string(),
        "Temp1Read=" => r#"{"Temp1Read": 36.92}"#.to_string(),
        _ => "<html>not found</html>".to_string(),
    }
}

async fn client() -> (AtmoWebClient, Requests) {
    let (port, requests) = stub(|query| Some(firmware(query))).await;
    let client = AtmoWebClient::new("127.0.0.1", port, Duration::from_secs(2))
        .unwrap()
        .with_read_retry(RetryConfig::none());
    (client, requests)
}

#[tokio::test]
async fn test_get_maps_values_and_markers() {
    let (device, requests) = client().await;
    let names = vec![
        channels::TEMP_READ.to_string(),
        channels::O2_READ.to_string(),
        channels::HUM_SET.to_string(),
        "Bogus".to_string(),
    ];

    let values = device.get(&names).await.unwrap();
    assert_eq!(values[channels::TEMP_READ], Some(36.92));
    assert_eq!(values[channels::O2_READ], None);
    assert_eq!(values[channels::HUM_SET], Some(50.0));
    assert_eq!(values["Bogus"], None);
    assert_eq!(requests.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_valid_range_nested_and_flat() {
    let (device, _) = client().await;
    assert_eq!(
        device.valid_range(channels::TEMP_SET).await.unwrap(),
        Some(ValueRange::new(0.0, 70.0))
    );
    assert_eq!(
        device.valid_range(channels::HUM_SET).await.unwrap(),
        Some(ValueRange::new(10.0, 95.0))
    );
    assert_eq!(device.valid_range("Bogus").await.unwrap(), None);
}

#[tokio::test]
async fn test_set_reports_echo_and_unavailable() {
    let (device, requests) = client().await;

    let applied = device.set(channels::TEMP_SET, 36.5).await.unwrap();
    assert_eq!(
        applied,
        SetOutcome::Applied {
            requested: 36.5,
            actual: Some(36.5)
        }
    );

    let rejected = device.set(channels::O2_SET, 5.0).await.unwrap();
    assert_eq!(rejected, SetOutcome::Unavailable { requested: 5.0 });

    let seen = requests.lock().unwrap().clone();
    assert_eq!(seen, vec!["TempSet=36.5", "O2Set=5"]);
}

#[tokio::test]
async fn test_mode_with_typographic_quotes() {
    let (device, _) = client().await;
    assert_eq!(device.mode().await.unwrap(), "Manual");
}

#[tokio::test]
async fn test_stalled_channel_does_not_drop_the_reading() {
    let (port, _) = stub(|query| match query {
        "HumRead=" => None,
        _ => Some(firmware(query)),
    })
    .await;
    let device = AtmoWebClient::new("127.0.0.1", port, Duration::from_millis(500))
        .unwrap()
        .with_read_retry(RetryConfig::none());
    let selection = SampleChannels {
        readings: vec![
            channels::TEMP_READ.to_string(),
            channels::HUM_READ.to_string(),
            channels::CO2_READ.to_string(),
        ],
        setpoints: vec![channels::TEMP_SET.to_string()],
    };

    let now = time::OffsetDateTime::from_unix_timestamp(1_757_577_600).unwrap();
    let reading = sample_reading(&device, &selection, now).await;

    assert_eq!(reading.mode, "Manual");
    assert_eq!(reading.readings.get(channels::TEMP_READ), Some(&Some(36.92)));
    assert_eq!(reading.readings.get(channels::HUM_READ), Some(&None));
    assert_eq!(reading.readings.get(channels::CO2_READ), Some(&None));
    assert_eq!(reading.setpoints.get(channels::TEMP_SET), Some(&Some(37.0)));
    assert!(reading.error.is_none());
}

#[tokio::test]
async fn test_unreachable_is_transient() {
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let device = AtmoWebClient::new("127.0.0.1", port, Duration::from_secs(1))
        .unwrap()
        .with_read_retry(RetryConfig::none());

    let err = device
        .get(&[channels::TEMP_READ.to_string()])
        .await
        .unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err}");
}

#[tokio::test]
#[ignore = "requires an AtmoWEB controller on the network"]
async fn test_real_controller_read() {
    let address = std::env::var("ATMOLOG_DEVICE").unwrap_or_else(|_| "192.168.100.100".into());
    let device = AtmoWebClient::new(&address, 80, Duration::from_secs(5)).unwrap();

    let mode = device.mode().await.unwrap();
    println!("mode: {}", mode);
    let values = device
        .get(&channels::DEFAULT_READINGS.map(String::from))
        .await
        .unwrap();
    println!("readings: {:?}", values);
    assert_eq!(values.len(), channels::DEFAULT_READINGS.len());
}
