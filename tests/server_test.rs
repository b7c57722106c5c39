//! Integration tests for the subscriber endpoint

#[cfg(feature = "server")]
mod server_tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use futures_util::StreamExt;
    use pulse_relay::server::{run, ServerConfig};
    use pulse_relay::{
        create_shared_stats, Pipeline, PipelineConfig, Publisher, PublisherConfig,
        SharedPublisher, SharedRelayStats, TelemetryEvent,
    };
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start() -> (
        SocketAddr,
        tokio::sync::oneshot::Sender<()>,
        SharedPublisher,
        SharedRelayStats,
    ) {
        let stats = create_shared_stats();
        let publisher = Arc::new(Publisher::new(PublisherConfig::default(), stats.clone()));
        let (addr, shutdown_tx) = run(
            ServerConfig::local_ephemeral(),
            publisher.clone(),
            stats.clone(),
        )
        .await
        .expect("Failed to start server");
        (addr, shutdown_tx, publisher, stats)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("Failed to connect WebSocket");
        ws
    }

    /// The server registers a client just after the upgrade completes.
    async fn wait_for_subscribers(publisher: &Publisher, count: usize) {
        for _ in 0..200 {
            if publisher.subscriber_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} subscribers, have {}",
            count,
            publisher.subscriber_count()
        );
    }

    /// Read `count` telemetry events from a client.
    async fn read_events(ws: &mut Client, count: usize) -> Vec<TelemetryEvent> {
        let mut events = Vec::new();
        while events.len() < count {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("Timed out waiting for telemetry")
                .expect("Stream ended early")
                .expect("WebSocket error");
            if let Message::Text(text) = msg {
                let event: TelemetryEvent =
                    serde_json::from_str(text.as_str()).expect("Bad telemetry JSON");
                events.push(event);
            }
        }
        events
    }

    fn split(events: &[TelemetryEvent]) -> (Vec<i32>, Vec<u32>) {
        let mut pulses = Vec::new();
        let mut bpm = Vec::new();
        for event in events {
            match event {
                TelemetryEvent::Pulse(v) => pulses.push(*v),
                TelemetryEvent::Bpm(v) => bpm.push(*v),
            }
        }
        (pulses, bpm)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx, _publisher, _stats) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_status_reports_last_bpm() {
        let (addr, shutdown_tx, publisher, stats) = start().await;

        stats.record_sample();
        stats.record_window(72);
        publisher.publish_bpm(72);

        let body: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(body["last_bpm"], 72);
        assert_eq!(body["subscribers"], 0);
        assert_eq!(body["stats"]["samples_accepted"], 1);
        assert_eq!(body["stats"]["windows_completed"], 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_websocket_streams_pipeline_output() {
        let (addr, shutdown_tx, publisher, stats) = start().await;
        let mut ws = connect(addr).await;
        wait_for_subscribers(&publisher, 1).await;

        let t0 = Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap();
        let mut pipeline = Pipeline::with_stats(PipelineConfig::default(), t0, stats.clone());
        for (i, line) in ["800", "900", "abc", "920", "700", "860", "400"]
            .iter()
            .enumerate()
        {
            let now = t0 + ChronoDuration::milliseconds(100 * i as i64);
            if let Some(step) = pipeline.process_line(line, now) {
                for event in step.events() {
                    publisher.publish(event);
                }
            }
        }
        let reading = pipeline
            .tick(t0 + ChronoDuration::seconds(5))
            .expect("window should close");
        publisher.publish_bpm(reading.bpm);

        let events = read_events(&mut ws, 7).await;
        let (pulses, bpm) = split(&events);
        assert_eq!(pulses, vec![800, 900, 920, 700, 860, 400]);
        assert_eq!(bpm, vec![24]);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_every_client_sees_the_same_stream() {
        let (addr, shutdown_tx, publisher, _stats) = start().await;
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        let c = connect(addr).await;
        wait_for_subscribers(&publisher, 3).await;

        for v in 0..10 {
            publisher.publish_raw(v);
        }

        // One client leaves mid-stream.
        drop(c);
        for v in 10..20 {
            publisher.publish_raw(v);
        }
        publisher.publish_bpm(60);

        let expected: Vec<i32> = (0..20).collect();
        for ws in [&mut a, &mut b] {
            let (pulses, bpm) = split(&read_events(ws, 21).await);
            assert_eq!(pulses, expected);
            assert_eq!(bpm, vec![60]);
        }

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_disconnect_all_closes_clients() {
        let (addr, shutdown_tx, publisher, _stats) = start().await;
        let mut ws = connect(addr).await;
        wait_for_subscribers(&publisher, 1).await;

        publisher.disconnect_all();

        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .expect("Client was not disconnected");
        assert!(ended);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx, _publisher, _stats) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/status", addr))
            .header("Origin", "http://localhost:3000")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .expect("Failed to send request");

        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );

        let _ = shutdown_tx.send(());
    }
}
