//! End-to-end tests of the local observer server
//!
//! Events go in through the server's producer handle, are decoded by the
//! real L3/L4 parser and come back out of flow and agent-event queries.


use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use flow_observer::configuration::{Backpressure, ObserverOptions};
use flow_observer::errors::{DeliveryError, HookError};
use flow_observer::events::{AgentEvent, MonitorEvent};
use flow_observer::flow::{AgentEventType, IpCacheNotification, Notification};
use flow_observer::hooks::Control;
use flow_observer::parser::PayloadParser;
use flow_observer::query::{
    FlowFilter, GetAgentEventsRequest, GetAgentEventsResponse, GetFlowsRequest, GetFlowsResponse,
};
use flow_observer::{LocalObserverServer, ObserverError, ServerState};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;

fn flow_seconds(responses: &[GetFlowsResponse]) -> Vec<i64> {
    responses
        .iter()
        .filter_map(|response| response.flow())
        .map(|flow| flow.time.timestamp())
        .collect()
}

mod server_status {
    use super::*;

    #[tokio::test]
    async fn should_expose_parser_and_stopped_signal() {
        init_logging();
        let server = new_server(ObserverOptions::builder());

        assert!(server.payload_parser().decode(&l3l4_payload()).is_ok());
        assert!(!server.stopped().is_stopped());
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn should_report_empty_history_of_capacity_one() {
        init_logging();
        let server = new_server(ObserverOptions::builder().max_flows(1));

        let status = server.server_status();

        assert_eq!(status.seen_flows, 0);
        assert_eq!(status.num_flows, 0);
        assert_eq!(status.max_flows, 1);
    }

    #[tokio::test]
    async fn should_count_seen_events_beyond_capacity() {
        init_logging();
        let server = new_server(ObserverOptions::builder().max_flows(1));

        ingest_all(&server, (0..3).map(flow_event)).await;
        let status = server.server_status();

        assert_eq!(status.seen_flows, 3);
        assert_eq!(status.num_flows, 1);
        assert_eq!(status.max_flows, 1);
        assert_eq!(server.state(), ServerState::Stopped);
    }
}

mod get_flows {
    use super::*;

    #[tokio::test]
    async fn should_return_requested_number_of_oldest_flows() {
        init_logging();
        let server = new_server(ObserverOptions::builder().max_flows(31));
        ingest_all(&server, (0..20).map(flow_event)).await;

        let mut sink = FakeSink::new();
        let request = GetFlowsRequest {
            number: 10,
            ..Default::default()
        };
        tokio_test::assert_ok!(server.get_flows(&request, &mut sink).await);

        assert_eq!(flow_seconds(&sink.received), (0..10).collect::<Vec<_>>());
        assert_eq!(sink.received[3].node_name, "node #003");
    }

    #[tokio::test]
    async fn should_restrict_to_time_window() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        ingest_all(&server, (0..20).map(flow_event)).await;

        let mut sink = FakeSink::new();
        let request = GetFlowsRequest {
            since: Some(at(5)),
            until: Some(at(8)),
            ..Default::default()
        };
        server.get_flows(&request, &mut sink).await.unwrap();

        assert_eq!(flow_seconds(&sink.received), vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn should_reject_follow_with_until() {
        init_logging();
        let server = new_server(ObserverOptions::builder());

        let mut sink = FakeSink::new();
        let request = GetFlowsRequest {
            follow: true,
            until: Some(at(1)),
            ..Default::default()
        };
        let result = server.get_flows(&request, &mut sink).await;

        assert_matches!(result, Err(ObserverError::InvalidRequest { .. }));
        assert!(sink.received.is_empty());
    }

    #[tokio::test]
    async fn should_follow_past_and_new_flows_until_sink_ends_stream() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        let handle = server.start().unwrap();
        let events = server.events();

        for second in 0..50 {
            events.send(flow_event(second)).await.unwrap();
        }

        let query = {
            let server = server.clone();
            tokio::spawn(async move {
                let mut sink = FakeSink::new().on_send(|_, count| {
                    if count == 95 {
                        Err(DeliveryError::EndOfStream)
                    } else {
                        Ok(())
                    }
                });
                let request = GetFlowsRequest {
                    follow: true,
                    since: Some(at(5)),
                    ..Default::default()
                };
                let result = server.get_flows(&request, &mut sink).await;
                (result, sink.received)
            })
        };

        for second in 50..100 {
            events.send(flow_event(second)).await.unwrap();
        }

        let (result, received) = tokio::time::timeout(Duration::from_secs(10), query)
            .await
            .expect("follow query did not finish")
            .unwrap();

        assert!(result.unwrap_err().is_end_of_stream());
        assert_eq!(flow_seconds(&received), (5..100).collect::<Vec<_>>());

        server.close_events();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn should_end_follow_query_when_cancelled() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        let _handle = server.start().unwrap();

        let sink = FakeSink::<GetFlowsResponse>::new();
        let token = sink.token();
        let query = {
            let server = server.clone();
            tokio::spawn(async move {
                let mut sink = sink;
                let request = GetFlowsRequest {
                    follow: true,
                    ..Default::default()
                };
                server.get_flows(&request, &mut sink).await
            })
        };

        server.events().send(flow_event(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), query)
            .await
            .expect("cancelled query did not finish")
            .unwrap();
        assert_matches!(result, Err(ObserverError::Cancelled));
    }

    #[tokio::test]
    async fn should_apply_whitelist_and_blacklist() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        let events = (0..12).map(|second| {
            let host = (second % 3) as u8 + 1;
            MonitorEvent::perf(
                at(second),
                "node",
                PayloadBuilder::new()
                    .source([10, 0, 0, host], 40000)
                    .destination([10, 0, 1, 1], if second % 2 == 0 { 80 } else { 443 })
                    .build(),
                0,
            )
        });
        ingest_all(&server, events).await;

        let mut sink = FakeSink::new();
        let request = GetFlowsRequest {
            whitelist: vec![
                FlowFilter::new().with_source_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                FlowFilter::new().with_source_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            ],
            blacklist: vec![FlowFilter::new().with_destination_port(443)],
            ..Default::default()
        };
        server.get_flows(&request, &mut sink).await.unwrap();

        // Hosts 1 and 2 on port 80: seconds 0, 4, 6, 10.
        assert_eq!(flow_seconds(&sink.received), vec![0, 4, 6, 10]);
    }

    #[tokio::test]
    async fn should_deliver_drop_verdict_from_drop_notification() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        let payload = PayloadBuilder::new().dropped(153).build();
        let event = MonitorEvent::perf(at(1), "node", payload, 0);
        ingest_all(&server, [event]).await;

        let mut sink = FakeSink::new();
        server
            .get_flows(&GetFlowsRequest::default(), &mut sink)
            .await
            .unwrap();

        let flow = sink.received[0].flow().unwrap();
        assert_eq!(flow.drop_reason, 153);
        assert_eq!(flow.destination_port(), Some(80));
    }
}

mod get_agent_events {
    use super::*;

    fn agent_event(i: i64) -> MonitorEvent {
        let event = if i == 0 {
            AgentEvent::agent_started(Utc.timestamp_opt(42, 1).unwrap())
        } else if i % 2 == 1 {
            AgentEvent::ipcache_upserted(&IpCacheNotification {
                cidr: "10.0.0.0/8".to_string(),
                identity: 42,
                ..Default::default()
            })
        } else {
            AgentEvent::service_deleted(42)
        };
        MonitorEvent::agent(at(i), "node", event.unwrap())
    }

    fn check(i: usize, response: &GetAgentEventsResponse) {
        let notification = &response.agent_event;
        if i == 0 {
            assert_eq!(notification.event_type, AgentEventType::AgentStarted);
            let start = notification.agent_start().unwrap();
            assert_eq!(start.time.timestamp(), 42);
            assert_eq!(start.time.timestamp_subsec_nanos(), 1);
        } else if i % 2 == 1 {
            assert_eq!(notification.event_type, AgentEventType::IpcacheUpserted);
            assert_eq!(notification.ipcache_update().unwrap().cidr, "10.0.0.0/8");
        } else {
            assert_eq!(notification.event_type, AgentEventType::ServiceDeleted);
            assert_matches!(
                &notification.notification,
                Notification::ServiceDelete(delete) if delete.id == 42
            );
        }
    }

    #[tokio::test]
    async fn should_return_every_agent_event_in_order() {
        init_logging();
        let server = new_server(ObserverOptions::builder().max_flows(127));
        ingest_all(&server, (0..100).map(agent_event)).await;

        let mut sink = FakeSink::new();
        let request = GetAgentEventsRequest {
            number: 100,
            ..Default::default()
        };
        tokio_test::assert_ok!(server.get_agent_events(&request, &mut sink).await);

        assert_eq!(sink.received.len(), 100);
        for (i, response) in sink.received.iter().enumerate() {
            check(i, response);
        }
    }

    #[tokio::test]
    async fn should_skip_flows_when_reading_agent_events() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        let events = (0..10).map(|i| if i < 5 { flow_event(i) } else { agent_event(i) });
        ingest_all(&server, events).await;

        let mut sink = FakeSink::new();
        server
            .get_agent_events(&GetAgentEventsRequest::default(), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.received.len(), 5);
        assert_eq!(sink.received[0].time.timestamp(), 5);
    }
}

mod hooks {
    use super::*;

    struct FakeDaemon {
        name: &'static str,
    }

    #[tokio::test]
    async fn should_give_init_hook_access_to_daemon() {
        init_logging();
        let initialized = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&initialized);
        let server = new_server(
            ObserverOptions::builder()
                .daemon(Arc::new(FakeDaemon { name: "agent" }))
                .on_server_init(move |server: &LocalObserverServer| {
                    let daemon = server
                        .options()
                        .daemon_as::<FakeDaemon>()
                        .ok_or_else(|| HookError::msg("daemon missing"))?;
                    assert_eq!(daemon.name, "agent");
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }),
        );

        let handle = server.start().unwrap();

        assert!(initialized.load(Ordering::SeqCst));
        server.close_events();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn should_stop_monitor_event_chain_at_first_stop() {
        init_logging();
        let second_hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&second_hook_calls);
        let server = new_server(
            ObserverOptions::builder()
                .on_monitor_event(|_, event: &MonitorEvent| {
                    Ok(if event.timestamp.timestamp() % 2 == 0 {
                        Control::Stop
                    } else {
                        Control::Continue
                    })
                })
                .on_monitor_event(move |_, event: &MonitorEvent| {
                    if event.timestamp.timestamp() % 2 == 0 {
                        return Err(HookError::msg("stopped event reached second hook"));
                    }
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Control::Continue)
                }),
        );

        ingest_all(&server, (0..10).map(flow_event)).await;
        let status = server.server_status();

        assert_eq!(status.seen_flows, 10);
        assert_eq!(status.num_flows, 5);
        assert_eq!(second_hook_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn should_skip_flows_rejected_by_delivery_hook() {
        init_logging();
        let counter = Arc::new(AtomicUsize::new(0));
        let server = new_server(ObserverOptions::builder().on_flow_delivery(move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(if n % 2 == 0 {
                Control::Skip
            } else {
                Control::Continue
            })
        }));
        ingest_all(&server, (0..100).map(flow_event)).await;

        let mut sink = FakeSink::new();
        server
            .get_flows(&GetFlowsRequest::default(), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.received.len(), 50);
    }

    #[derive(Debug, PartialEq)]
    struct Requester(&'static str);

    #[tokio::test]
    async fn should_pass_get_flows_context_to_delivery_hooks() {
        init_logging();
        let server = new_server(
            ObserverOptions::builder()
                .on_get_flows(|ctx, _| Ok(ctx.with_value(Requester("cli"))))
                .on_flow_delivery(|ctx, _| match ctx.value::<Requester>() {
                    Some(Requester("cli")) => Ok(Control::Continue),
                    _ => Err(HookError::msg("requester missing from context")),
                }),
        );
        ingest_all(&server, (0..100).map(flow_event)).await;

        let mut sink = FakeSink::new();
        server
            .get_flows(&GetFlowsRequest::default(), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.received.len(), 100);
    }

    #[tokio::test]
    async fn should_fail_query_when_get_flows_hook_fails() {
        init_logging();
        let server = new_server(
            ObserverOptions::builder().on_get_flows(|_, _| Err(HookError::msg("denied"))),
        );

        let mut sink = FakeSink::new();
        let result = server.get_flows(&GetFlowsRequest::default(), &mut sink).await;

        let error = tokio_test::assert_err!(result);
        assert_matches!(error, ObserverError::HookFailed { .. });
    }
}

mod backpressure {
    use super::*;

    #[tokio::test]
    async fn should_reject_when_queue_is_full() {
        init_logging();
        let server = new_server(
            ObserverOptions::builder()
                .monitor_buffer_size(1)
                .backpressure(Backpressure::Reject),
        );
        let events = server.events();

        tokio_test::assert_ok!(events.send(flow_event(1)).await);
        assert_matches!(events.send(flow_event(2)).await, Err(ObserverError::QueueFull));
    }

    #[tokio::test]
    async fn should_refuse_events_after_close() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        let handle = server.start().unwrap();

        server.close_events();
        handle.await.unwrap();

        assert_matches!(
            server.events().send(flow_event(1)).await,
            Err(ObserverError::QueueClosed)
        );
        assert!(server.stopped().is_stopped());
    }

    #[tokio::test]
    async fn should_keep_serving_queries_after_stop() {
        init_logging();
        let server = new_server(ObserverOptions::builder());
        ingest_all(&server, (0..4).map(flow_event)).await;

        let mut sink = FakeSink::new();
        server
            .get_flows(&GetFlowsRequest::default(), &mut sink)
            .await
            .unwrap();

        assert_eq!(flow_seconds(&sink.received), vec![0, 1, 2, 3]);
    }
}
