#[cfg(test)]
mod tests {
    use crate::blockchain::{Dispatcher, InFlightTracker, STALE_REQUEST_AGE};
    use crate::cache::ManualClock;
    use crate::tests::support::{MockTransport, START_MILLIS};
    use futures::future::join_all;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn echo_transport(latency: Duration) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.respond("getblockhash", |params| Ok(params[0].clone()));
        transport.set_latency(latency);
        transport
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_never_exceeded() {
        let transport = echo_transport(Duration::from_millis(20));
        let dispatcher = Dispatcher::new(transport.clone(), 3);

        let calls = (0..20).map(|height| dispatcher.enqueue("getblockhash", vec![json!(height)]));
        let results = join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()), "All jobs should complete");
        assert_eq!(transport.total_calls(), 20);
        assert!(
            transport.peak_concurrency() <= 3,
            "Peak concurrency {} exceeded the bound",
            transport.peak_concurrency()
        );
        assert_eq!(dispatcher.active(), 0);
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn test_bound_of_one_runs_in_submission_order() {
        let transport = echo_transport(Duration::from_millis(5));
        let dispatcher = Dispatcher::new(transport.clone(), 50);
        dispatcher.set_max_concurrent(1);

        let (a, b, c) = futures::join!(
            dispatcher.enqueue("getblockhash", vec![json!(1)]),
            dispatcher.enqueue("getblockhash", vec![json!(2)]),
            dispatcher.enqueue("getblockhash", vec![json!(3)]),
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (json!(1), json!(2), json!(3)));

        let completed: Vec<Value> = transport
            .completion_log()
            .into_iter()
            .map(|(_, params)| params[0].clone())
            .collect();
        assert_eq!(completed, vec![json!(1), json!(2), json!(3)], "Jobs should finish one at a time in order");
        assert_eq!(transport.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_set_max_concurrent_floor() {
        let dispatcher = Dispatcher::new(echo_transport(Duration::ZERO), 4);
        assert_eq!(dispatcher.max_concurrent(), 4);

        dispatcher.set_max_concurrent(0);
        assert_eq!(dispatcher.max_concurrent(), 1, "Bounds below one are raised to one");
    }

    #[tokio::test]
    async fn test_failures_are_delivered_to_the_caller() {
        let transport = Arc::new(MockTransport::new());
        transport.fail("getblock", "Block not found");
        let dispatcher = Dispatcher::new(transport, 2);

        let result = dispatcher.enqueue("getblock", vec![json!("00")]).await;
        assert!(result.is_err(), "Transport errors should reach the caller");
        assert_eq!(dispatcher.active(), 0, "A failed job should release its slot");
    }

    #[tokio::test]
    async fn test_rate_limited_dispatcher_still_completes() {
        let transport = echo_transport(Duration::ZERO);
        let dispatcher = Dispatcher::with_rate_limit(transport.clone(), 5, Some(1_000));

        let results = join_all((0..5).map(|h| dispatcher.enqueue("getblockhash", vec![json!(h)]))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.total_calls(), 5);
    }

    #[tokio::test]
    async fn test_rate_limited_jobs_start_in_submission_order() {
        let transport = echo_transport(Duration::from_millis(1));
        let dispatcher = Dispatcher::with_rate_limit(transport.clone(), 10, Some(5));

        // Five go out as a burst, the rest wait for permits
        let results = join_all((0..8).map(|h| dispatcher.enqueue("getblockhash", vec![json!(h)]))).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let started: Vec<Value> = transport
            .call_log()
            .into_iter()
            .map(|(_, params)| params[0].clone())
            .collect();
        let submitted: Vec<Value> = (0..8).map(|h| json!(h)).collect();
        assert_eq!(started, submitted, "Permits should be handed out in submission order");
    }

    #[test]
    fn test_stale_in_flight_entries_are_swept() {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let tracker = InFlightTracker::new(clock.clone());

        let old = tracker.register("getblockcount");
        clock.advance(10_000);
        tracker.register("getblock");
        assert_eq!(tracker.count(), 2);

        clock.advance(STALE_REQUEST_AGE.as_millis() as i64 - 10_000);
        assert_eq!(tracker.sweep_stale(STALE_REQUEST_AGE), 1, "Only the oldest entry is stale");
        assert_eq!(tracker.count(), 1);

        tracker.finish(old);
        assert_eq!(tracker.count(), 1, "Finishing a swept entry is harmless");
        assert_eq!(tracker.snapshot()[0].method, "getblock");
    }
}
