#[cfg(test)]
mod tests {
    use crate::blockchain::RpcError;
    use crate::cache::CacheDurations;
    use crate::config::{Settings, Theme};
    use crate::db::Partition;
    use crate::tests::support::{harness, harness_with_store, FailingStore, MockTransport};
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_block_count(transport: &MockTransport) -> Arc<AtomicU64> {
        let tip = Arc::new(AtomicU64::new(100));
        let source = tip.clone();
        transport.respond("getblockcount", move |_| Ok(json!(source.load(Ordering::SeqCst))));
        tip
    }

    #[tokio::test]
    async fn test_immutable_result_is_fetched_once() {
        let h = harness();
        h.transport.respond_value("getblockhash", json!("00ab"));

        let first = h.client.call("getblockhash", vec![json!(100)]).await.unwrap();
        h.clock.advance(10 * 365 * 24 * 60 * 60 * 1000);
        let second = h.client.call("getblockhash", vec![json!(100)]).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.transport.calls("getblockhash"), 1, "Immutable results never expire");
        assert_eq!(h.client.stats().hits, 1);
        assert_eq!(h.client.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expiry_follows_configured_duration() {
        let h = harness();
        let tip = counting_block_count(&h.transport);
        let ttl = CacheDurations::default().block_count as i64;

        assert_eq!(h.client.call("getblockcount", vec![]).await.unwrap(), json!(100));
        tip.store(101, Ordering::SeqCst);

        h.clock.advance(ttl - 1);
        assert_eq!(
            h.client.call("getblockcount", vec![]).await.unwrap(),
            json!(100),
            "Still valid one ms before expiry"
        );

        h.clock.advance(2);
        assert_eq!(
            h.client.call("getblockcount", vec![]).await.unwrap(),
            json!(101),
            "Refetched once expired"
        );
        assert_eq!(h.transport.calls("getblockcount"), 2);
    }

    #[tokio::test]
    async fn test_failed_calls_are_not_cached() {
        let h = harness();
        h.transport.fail("getblock", "Block not found");

        assert!(h.client.call("getblock", vec![json!("aa"), json!(1)]).await.is_err());
        assert!(h.client.call("getblock", vec![json!("aa"), json!(1)]).await.is_err());
        assert_eq!(h.transport.calls("getblock"), 2, "Errors must not be served from cache");
    }

    #[tokio::test]
    async fn test_uncached_methods_always_hit_the_network() {
        let h = harness();
        h.transport.respond_value("sendrawtransaction", json!("beef"));

        for _ in 0..2 {
            let txid = h.service.send_raw_transaction("0100", false).await.unwrap();
            assert_eq!(txid, json!("beef"));
        }

        assert_eq!(h.transport.calls("sendrawtransaction"), 2);
        assert_eq!(h.client.stats().hits, 0);
        assert_eq!(h.client.stats().misses, 0, "Uncached calls do not count as misses");
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_network() {
        let h = harness_with_store(Arc::new(FailingStore));
        h.transport.respond_value("getblockhash", json!("00ab"));

        for _ in 0..2 {
            let hash = h.client.call("getblockhash", vec![json!(5)]).await.unwrap();
            assert_eq!(hash, json!("00ab"));
        }
        assert_eq!(h.transport.calls("getblockhash"), 2, "Every call reaches the network");
        assert!(h.client.load::<String>(Partition::Results, "anything").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_request() {
        let h = harness();
        h.transport.respond_value("getblockhash", json!("00ab"));
        h.transport.set_latency(Duration::from_millis(30));

        let calls = (0..5).map(|_| h.client.call("getblockhash", vec![json!(7)]));
        let results = join_all(calls).await;

        assert!(results.iter().all(|r| r.as_ref().ok() == Some(&json!("00ab"))));
        assert_eq!(h.transport.calls("getblockhash"), 1, "Concurrent misses should coalesce");
        assert_eq!(h.client.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_call_as_reports_decode_errors() {
        let h = harness();
        h.transport.respond_value("getblockcount", json!("not a number"));

        let result = h.client.call_as::<u64>("getblockcount", vec![]).await;
        assert!(matches!(result, Err(RpcError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_clear_all_caches_keeps_settings() {
        let h = harness();
        h.transport.respond_value("getblockhash", json!("00ab"));
        let settings = Settings {
            theme: Theme::Light,
            ..Settings::default()
        };
        h.client.save_settings(&settings).await;

        h.client.call("getblockhash", vec![json!(1)]).await.unwrap();
        h.client.call("getblockhash", vec![json!(1)]).await.unwrap();
        assert_eq!(h.client.stats().hits, 1);

        assert!(h.client.clear_all_caches().await);
        assert_eq!(h.client.stats().hits, 0, "Counters reset");
        assert_eq!(h.client.stats().misses, 0);

        h.client.call("getblockhash", vec![json!(1)]).await.unwrap();
        assert_eq!(h.transport.calls("getblockhash"), 2, "Results were cleared");
        assert_eq!(h.client.load_settings().await, Some(settings), "Settings survive a clear");
    }

    #[tokio::test]
    async fn test_update_settings_applies_durations_and_bound() {
        let h = harness();
        let durations = CacheDurations {
            block_count: 5,
            ..CacheDurations::default()
        };

        h.client.update_settings(&Settings {
            rpc_url: "http://node.local:8819".to_string(),
            max_concurrent_requests: 4,
            cache_durations: durations,
            theme: Theme::Dark,
        });
        assert_eq!(h.client.durations(), durations);
        assert_eq!(h.client.dispatcher().max_concurrent(), 4);
        assert_eq!(h.client.dispatcher().endpoint(), "http://node.local:8819");

        let applied = h.client.update_settings(&Settings {
            rpc_url: " ".to_string(),
            max_concurrent_requests: 0,
            cache_durations: durations,
            theme: Theme::Dark,
        });
        assert_eq!(h.client.dispatcher().max_concurrent(), 4, "Zero is ignored");
        assert_eq!(h.client.dispatcher().endpoint(), "http://node.local:8819", "Blank URL is ignored");
        assert_eq!(
            applied,
            Settings {
                rpc_url: "http://node.local:8819".to_string(),
                max_concurrent_requests: 4,
                cache_durations: durations,
                theme: Theme::Dark,
            },
            "Returned settings are the ones in force"
        );
    }

    #[test]
    fn test_partial_settings_merge_over_defaults() {
        let settings: Settings = serde_json::from_value(json!({
            "rpcUrl": "http://other:1",
            "cacheDurations": { "utxo": 10 }
        }))
        .unwrap();

        assert_eq!(settings.rpc_url, "http://other:1");
        assert_eq!(settings.max_concurrent_requests, Settings::default().max_concurrent_requests);
        assert_eq!(settings.cache_durations.utxo, 10);
        assert_eq!(settings.cache_durations.mempool, CacheDurations::default().mempool);
        assert_eq!(settings.theme, Theme::Dark);
    }
}
