//! Integration tests against the reference collector

#[cfg(feature = "server")]
mod server_tests {
    use exampulse_telemetry::config::{CollectorEndpoint, ReconnectPolicy};
    use exampulse_telemetry::core::FeaturePacket;
    use exampulse_telemetry::delivery::{
        DeliveryChannel, DeliveryRoute, EventType, HttpFallback, OutboundMessage,
        StreamingTransport, TcpStreamTransport,
    };
    use exampulse_telemetry::server::{run, CollectorHandle, ServerConfig};
    use exampulse_telemetry::transparency::create_shared_stats;
    use exampulse_telemetry::{SessionContext, TelemetryConfig, TrackingSession};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn message() -> OutboundMessage {
        OutboundMessage::new(
            &SessionContext::new("student-1", "exam-1"),
            EventType::Features,
            FeaturePacket::behavior(chrono::Utc::now(), Default::default()),
        )
    }

    fn endpoint(collector: &CollectorHandle) -> CollectorEndpoint {
        CollectorEndpoint {
            base_url: format!("http://{}", collector.http_addr),
            stream_addr: collector.stream_addr.map(|a| a.to_string()),
            ..Default::default()
        }
    }

    async fn connected_transport(
        collector: &CollectorHandle,
        cancel: &CancellationToken,
    ) -> TcpStreamTransport {
        let addr = collector.stream_addr.expect("stream listener enabled").to_string();
        let transport = TcpStreamTransport::new(addr, ReconnectPolicy::default());
        transport.spawn_supervisor(cancel.clone());

        for _ in 0..200 {
            if transport.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(transport.is_connected(), "stream never connected");
        transport
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let collector = run(ServerConfig::new(0, None)).await.expect("Failed to start collector");

        let response = reqwest::Client::new()
            .get(format!("http://{}/health", collector.http_addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_fallback_post_is_stored_and_listed() {
        let collector = run(ServerConfig::new(0, None)).await.expect("Failed to start collector");
        let fallback = HttpFallback::new(&endpoint(&collector)).unwrap();

        assert!(fallback.test_connection().await.unwrap());

        let delivery = DeliveryChannel::new(
            None,
            Arc::new(fallback),
            Duration::from_secs(3),
            create_shared_stats(),
        );
        let ack = delivery.deliver(message()).await.expect("fallback delivery");
        assert_eq!(ack.route, DeliveryRoute::Fallback);
        assert_eq!(ack.status, "success");

        let client = reqwest::Client::new();
        let all: serde_json::Value = client
            .get(format!("http://{}/api/events/all", collector.http_addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all["total_packets"], 1);
        assert_eq!(all["packets"][0]["user_id"], "student-1");

        client
            .post(format!("http://{}/api/events/clear", collector.http_addr))
            .send()
            .await
            .unwrap();
        assert_eq!(collector.state.total().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected() {
        let collector = run(ServerConfig::new(0, None)).await.expect("Failed to start collector");

        let response = reqwest::Client::new()
            .post(format!("http://{}/api/events", collector.http_addr))
            .json(&serde_json::json!({ "user_id": "student-1" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_EVENT");
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let collector = run(ServerConfig::new(0, None)).await.expect("Failed to start collector");

        let response = reqwest::Client::new()
            .request(
                reqwest::Method::OPTIONS,
                format!("http://{}/api/events", collector.http_addr),
            )
            .header("Origin", "http://localhost:5174")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:5174"
        );
    }

    #[tokio::test]
    async fn test_streamed_packet_is_acked() {
        let collector = run(ServerConfig::new(0, Some(0))).await.expect("Failed to start collector");
        let cancel = CancellationToken::new();
        let transport = connected_transport(&collector, &cancel).await;
        let fallback = HttpFallback::new(&endpoint(&collector)).unwrap();

        let stats = create_shared_stats();
        let delivery = DeliveryChannel::new(
            Some(Arc::new(transport.clone())),
            Arc::new(fallback),
            Duration::from_secs(3),
            stats.clone(),
        );

        let ack = delivery.deliver(message()).await.expect("stream delivery");
        assert_eq!(ack.route, DeliveryRoute::Stream);
        assert!(ack.correlation_id.is_some());
        assert_eq!(transport.pending_acks(), 0);
        assert_eq!(collector.state.total().await, 1);
        assert_eq!(stats.stats().acked_via_stream, 1);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unacked_stream_falls_back_once() {
        let collector = run(ServerConfig::new(0, Some(0)).without_stream_acks())
            .await
            .expect("Failed to start collector");
        let cancel = CancellationToken::new();
        let transport = connected_transport(&collector, &cancel).await;
        let fallback = HttpFallback::new(&endpoint(&collector)).unwrap();

        let delivery = DeliveryChannel::new(
            Some(Arc::new(transport.clone())),
            Arc::new(fallback),
            Duration::from_millis(200),
            create_shared_stats(),
        );

        let ack = delivery.deliver(message()).await.expect("fallback delivery");
        assert_eq!(ack.route, DeliveryRoute::Fallback);
        assert_eq!(transport.pending_acks(), 0);

        // Once over the stream, once through the fallback, same correlation id
        let packets = collector.state.packets().await;
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].correlation_id, packets[1].correlation_id);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_tracking_session_streams_to_collector() {
        let collector = run(ServerConfig::new(0, Some(0))).await.expect("Failed to start collector");
        let cancel = CancellationToken::new();
        let transport = connected_transport(&collector, &cancel).await;

        let config = TelemetryConfig {
            emission_period: Duration::from_millis(200),
            collector: endpoint(&collector),
            ..Default::default()
        };
        let stats = create_shared_stats();
        let delivery = DeliveryChannel::new(
            Some(Arc::new(transport)),
            Arc::new(HttpFallback::new(&config.collector).unwrap()),
            config.ack_timeout,
            stats.clone(),
        );

        let mut session = TrackingSession::new(config, delivery, stats.clone());
        let sink = session.start("student-1", "exam-1").unwrap();
        sink.key_pressed("h");
        sink.key_pressed("i");

        tokio::time::sleep(Duration::from_millis(500)).await;
        session.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let packets = collector.state.packets().await;
        assert!(packets.iter().any(|p| p.event_type == EventType::Typing));
        assert!(packets.iter().any(|p| p.event_type == EventType::Features));
        assert!(packets.iter().all(|p| p.exam_id == "exam-1"));
        assert!(stats.stats().acked_via_stream >= 2);

        cancel.cancel();
    }
}
