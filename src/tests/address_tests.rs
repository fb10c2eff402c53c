#[cfg(test)]
mod tests {
    use crate::blockchain::RpcError;
    use crate::cache::{AddressQuery, CacheDurations};
    use crate::db::Partition;
    use crate::models::{AggregateAddressRecord, ZERO_BALANCE};
    use crate::service::address::{MAX_RANGES, MAX_SCAN_BLOCKS, PAGE_SIZE};
    use crate::service::{format_asset_amount, format_satoshis, merge_recent_first, plan_block_ranges, ranges_for_page, BlockRange};
    use crate::tests::support::{address, harness, txid, Harness, MockTransport};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    fn ids(range: std::ops::Range<u64>) -> Vec<String> {
        range.map(txid).collect()
    }

    /// Address index over a shared, mutable history of (height, txid)
    fn serve_history(transport: &MockTransport, history: Arc<Mutex<Vec<(u64, String)>>>) {
        transport.respond("getaddresstxids", move |params| {
            let start = params[0]["start"].as_u64().unwrap_or(0);
            let end = params[0]["end"].as_u64().unwrap_or(u64::MAX);
            let mut found: Vec<(u64, String)> = history
                .lock()
                .unwrap()
                .iter()
                .filter(|(height, _)| (start..=end).contains(height))
                .cloned()
                .collect();
            found.sort();
            Ok(json!(found.into_iter().map(|(_, id)| id).collect::<Vec<_>>()))
        });
    }

    fn serve_tip(transport: &MockTransport, height: u64) -> Arc<AtomicU64> {
        let tip = Arc::new(AtomicU64::new(height));
        let source = tip.clone();
        transport.respond("getblockcount", move |_| Ok(json!(source.load(Ordering::SeqCst))));
        tip
    }

    fn serve_empty_balances(transport: &MockTransport) {
        transport.respond_value("getaddressbalance", json!({ "balance": 0, "received": 0 }));
        transport.respond_value("getaddressutxos", json!([]));
        transport.respond_value("listassetbalancesbyaddress", json!({}));
    }

    async fn aggregate(h: &Harness, addr: &str) -> AggregateAddressRecord {
        h.client
            .load::<AggregateAddressRecord>(Partition::AddressFull, addr)
            .await
            .expect("Aggregate record should exist")
            .value
    }

    #[test]
    fn test_plan_block_ranges_doubles_windows() {
        let ranges = plan_block_ranges(1000);

        assert_eq!(ranges[0], BlockRange { start: 991, end: 1000 });
        assert_eq!(ranges[1], BlockRange { start: 971, end: 990 });
        assert_eq!(ranges[2], BlockRange { start: 931, end: 970 });
        assert_eq!(ranges.last(), Some(&BlockRange { start: 0, end: 370 }));
        assert_eq!(ranges.len(), 7);

        for pair in ranges.windows(2) {
            assert_eq!(pair[1].end + 1, pair[0].start, "Windows should be contiguous");
        }
    }

    #[test]
    fn test_plan_block_ranges_limits() {
        let ranges = plan_block_ranges(5_000_000);
        assert_eq!(ranges.len(), MAX_RANGES);
        let covered: u64 = ranges.iter().map(|r| r.end - r.start + 1).sum();
        assert!(covered <= MAX_SCAN_BLOCKS);

        assert_eq!(
            plan_block_ranges(15),
            vec![BlockRange { start: 6, end: 15 }, BlockRange { start: 0, end: 5 }]
        );
        assert!(plan_block_ranges(0).is_empty(), "Nothing to scan at genesis");
    }

    #[test]
    fn test_ranges_for_page_moves_down_the_plan() {
        let plan = plan_block_ranges(1000);

        assert_eq!(ranges_for_page(&plan, 1), &plan[..]);
        assert_eq!(ranges_for_page(&plan, 2), &plan[3..]);
        assert_eq!(ranges_for_page(&plan, 3), &plan[6..], "Far pages keep at least the oldest window");
        assert!(ranges_for_page(&[], 4).is_empty());
    }

    #[test]
    fn test_merge_keeps_existing_and_adds_new() {
        let existing = vec![txid(5), txid(4), txid(3)];

        let newer = merge_recent_first(&existing, &[txid(7), txid(6), txid(5)], true);
        assert_eq!(newer, vec![txid(7), txid(6), txid(5), txid(4), txid(3)]);

        let older = merge_recent_first(&existing, &[txid(2), txid(1)], false);
        assert_eq!(older, vec![txid(5), txid(4), txid(3), txid(2), txid(1)]);

        let anchored = merge_recent_first(&existing, &[txid(4), txid(9), txid(3)], false);
        assert_eq!(anchored, vec![txid(5), txid(4), txid(9), txid(3)], "New ids follow their anchor");

        let duplicates = merge_recent_first(&existing, &[txid(8), txid(8), txid(5), txid(5)], true);
        assert_eq!(duplicates, vec![txid(8), txid(5), txid(4), txid(3)]);
    }

    #[test]
    fn test_amount_formatting() {
        assert_eq!(format_satoshis(150_000_000), "1.50000000");
        assert_eq!(format_satoshis(0), ZERO_BALANCE);
        assert_eq!(format_asset_amount(5.0, 2), "5.00");
        assert_eq!(format_asset_amount(7.0, 0), "7");
    }

    #[tokio::test]
    async fn test_brand_new_address_is_empty() {
        let h = harness();
        let addr = address('N');
        serve_tip(&h.transport, 1000);
        serve_history(&h.transport, Arc::new(Mutex::new(Vec::new())));
        serve_empty_balances(&h.transport);

        let details = h.service.get_address_details(&addr, 1).await;

        assert_eq!(details.balance, ZERO_BALANCE);
        assert!(details.asset_balances.is_empty());
        assert!(details.page_txids.is_empty());
        assert_eq!(details.current_page, 1);
        assert!(!details.has_more, "An empty history has no more pages");
        assert_eq!(h.transport.calls("getaddresstxids"), plan_block_ranges(1000).len());
    }

    #[tokio::test]
    async fn test_details_degrade_on_error() {
        let h = harness();
        h.transport.fail("getblockcount", "node offline");

        let details = h.service.get_address_details(&address('D'), 2).await;

        assert_eq!(details.balance, ZERO_BALANCE);
        assert!(details.page_txids.is_empty());
        assert_eq!(details.current_page, 2);
        assert!(!details.has_more);
    }

    #[tokio::test]
    async fn test_node_outage_is_not_cached() {
        let h = harness();
        let addr = address('R');
        serve_tip(&h.transport, 100);
        serve_empty_balances(&h.transport);
        h.transport.fail("getaddresstxids", "address index unavailable");

        let first = h.service.get_address_details(&addr, 1).await;
        assert!(first.page_txids.is_empty(), "Outage degrades to an empty page");

        serve_history(&h.transport, Arc::new(Mutex::new(vec![(40, txid(40)), (95, txid(95))])));
        h.clock.advance(5 * 60 * 1000);

        let second = h.service.get_address_details(&addr, 1).await;
        assert_eq!(second.page_txids, vec![txid(95), txid(40)], "Recovered node should be asked again");

        let page = h.service.get_address_txids(&AddressQuery::from(addr.as_str()), 1).await.unwrap();
        assert_eq!(page.page_txids, vec![txid(95), txid(40)]);
    }

    #[tokio::test]
    async fn test_partial_scan_keeps_found_txids() {
        let h = harness();
        let addr = address('Q');
        let query = AddressQuery::from(addr.as_str());
        serve_tip(&h.transport, 100);
        h.transport.respond("getaddresstxids", |params| match params[0]["start"].as_u64() {
            Some(0) => Err(RpcError::Remote {
                code: -1,
                message: "timeout".to_string(),
            }),
            Some(91) => Ok(json!([txid(95)])),
            _ => Ok(json!([])),
        });

        let first = h.service.get_address_txids(&query, 1).await.unwrap();
        assert_eq!(first.page_txids, vec![txid(95)]);

        let record = aggregate(&h, &addr).await;
        assert_eq!(record.all_txids, vec![txid(95)], "Answered windows still feed the aggregate");
        assert!(record.txids_at.is_none(), "A partial scan does not mark the history fresh");

        let scans = h.transport.calls("getaddresstxids");
        h.service.get_address_txids(&query, 1).await.unwrap();
        assert_eq!(
            h.transport.calls("getaddresstxids"),
            scans + 1,
            "Only the failed window is asked again"
        );
    }

    #[tokio::test]
    async fn test_details_are_cached() {
        let h = harness();
        let addr = address('C');
        serve_tip(&h.transport, 100);
        serve_history(&h.transport, Arc::new(Mutex::new(vec![(90, txid(1))])));
        h.transport
            .respond_value("getaddressbalance", json!({ "balance": 150_000_000, "received": 150_000_000 }));
        h.transport.respond_value("getaddressutxos", json!([]));
        h.transport.respond_value("listassetbalancesbyaddress", json!({ "GOLD": 5.0 }));
        h.transport
            .respond_value("getassetdata", json!({ "name": "GOLD", "amount": 1000.0, "units": 2 }));

        let first = h.service.get_address_details(&addr, 1).await;
        assert_eq!(first.balance, "1.50000000");
        assert_eq!(first.page_txids, vec![txid(1)]);
        assert_eq!(first.asset_balances.len(), 1);
        assert_eq!(first.asset_balances[0].name, "GOLD");
        assert_eq!(first.asset_balances[0].amount, "5.00");

        let calls = h.transport.total_calls();
        let second = h.service.get_address_details(&addr, 1).await;
        assert_eq!(second, first);
        assert_eq!(h.transport.total_calls(), calls, "Second view should be served from cache");

        let record = aggregate(&h, &addr).await;
        assert_eq!(record.balance.as_deref(), Some("1.50000000"));
        assert_eq!(record.all_txids, vec![txid(1)]);
    }

    #[tokio::test]
    async fn test_pages_are_sliced_from_aggregate() {
        let h = harness();
        let addr = address('P');
        let all = ids(0..25);
        let mut record = AggregateAddressRecord::new(&addr);
        record.all_txids = all.clone();
        record.complete = true;
        record.txids_at = Some(h.client.now());
        h.client.save(Partition::AddressFull, &addr, &record).await;

        let query = AddressQuery::from(addr.as_str());
        let mut pages = Vec::new();
        for page in 1..=3 {
            let result = h.service.get_address_txids(&query, page).await.unwrap();
            assert_eq!(result.has_more, page < 3, "has_more on page {}", page);
            pages.extend(result.page_txids);
        }

        assert_eq!(pages, all, "Pages should tile the full list in order");
        assert_eq!(h.transport.total_calls(), 0, "No network calls for a fresh aggregate");
    }

    #[tokio::test]
    async fn test_history_accumulates_across_scans() {
        let h = harness();
        let addr = address('H');
        let query = AddressQuery::from(addr.as_str());
        let tip = serve_tip(&h.transport, 100);
        let history = Arc::new(Mutex::new(vec![(10, txid(10)), (50, txid(50)), (95, txid(95))]));
        serve_history(&h.transport, history.clone());
        let ttl = CacheDurations::default().address_data as i64;

        let first = h.service.get_address_txids(&query, 1).await.unwrap();
        assert_eq!(first.page_txids, vec![txid(95), txid(50), txid(10)]);
        assert!(!first.has_more, "The plan reached genesis");

        // A new transaction arrives and the cached views expire
        history.lock().unwrap().push((150, txid(150)));
        tip.store(200, Ordering::SeqCst);
        h.clock.advance(ttl + 1);

        let second = h.service.get_address_txids(&query, 1).await.unwrap();
        assert_eq!(second.page_txids[0], txid(150));

        h.clock.advance(ttl + 1);
        let far = h.service.get_address_txids(&query, 3).await.unwrap();
        assert_eq!(far.page_txids, vec![txid(50), txid(10)], "Page 3 only scans the oldest window");

        let record = aggregate(&h, &addr).await;
        assert_eq!(record.all_txids, vec![txid(150), txid(95), txid(50), txid(10)]);
    }

    #[tokio::test]
    async fn test_has_more_when_older_blocks_remain() {
        let h = harness();
        let addr = address('M');
        serve_tip(&h.transport, 1_000_000);
        let history: Vec<(u64, String)> = (0..12).map(|n| (999_995 - n, txid(n))).collect();
        serve_history(&h.transport, Arc::new(Mutex::new(history)));

        let result = h.service.get_address_txids(&AddressQuery::from(addr.as_str()), 1).await.unwrap();
        assert_eq!(result.page_txids.len(), PAGE_SIZE);
        assert_eq!(result.page_txids[0], txid(0), "Most recent first");
        assert!(result.has_more);
    }

    #[tokio::test]
    async fn test_optimize_address_cache_fills_aggregate_and_pages() {
        let h = harness();
        let addr = address('W');
        serve_tip(&h.transport, 500);
        let history: Vec<(u64, String)> = (0..25).map(|n| (n * 10, txid(n))).collect();
        serve_history(&h.transport, Arc::new(Mutex::new(history)));
        h.transport
            .respond_value("getaddressbalance", json!({ "balance": 42, "received": 42 }));
        h.transport.respond_value("getaddressutxos", json!([]));
        h.transport.respond_value("listassetbalancesbyaddress", json!({}));

        assert!(h.service.optimize_address_cache(&addr).await);

        let record = aggregate(&h, &addr).await;
        assert!(record.complete, "Lookback reached genesis");
        assert_eq!(record.all_txids.len(), 25);
        assert_eq!(record.all_txids[0], txid(24));
        assert_eq!(record.balance.as_deref(), Some("0.00000042"));

        let scans = h.transport.calls("getaddresstxids");
        let page = h.service.get_address_txids(&AddressQuery::from(addr.as_str()), 3).await.unwrap();
        assert_eq!(page.page_txids, vec![txid(4), txid(3), txid(2), txid(1), txid(0)]);
        assert!(!page.has_more);
        assert_eq!(h.transport.calls("getaddresstxids"), scans, "Warmed pages need no scan");
    }

    #[tokio::test]
    async fn test_warmup_runs_once_per_address() {
        let h = harness();
        h.transport.fail("getblockcount", "offline");
        let addr = address('O');

        let handle = h.service.spawn_address_warmup(&addr).expect("First warm-up should start");
        assert!(!handle.await.unwrap(), "Warm-up reports failure");
        assert!(h.service.spawn_address_warmup(&addr).is_none());
    }

    #[tokio::test]
    async fn test_assets_fall_back_to_utxos() {
        let h = harness();
        let addr = address('U');
        h.transport.fail("listassetbalancesbyaddress", "index disabled");
        h.transport.respond_value(
            "getaddressutxos",
            json!([
                { "address": addr, "assetName": "GOLD", "txid": txid(1), "outputIndex": 0, "script": "", "satoshis": 250_000_000 },
                { "address": addr, "assetName": "EVR", "txid": txid(2), "outputIndex": 1, "script": "", "satoshis": 900 }
            ]),
        );
        h.transport
            .respond_value("getassetdata", json!({ "name": "GOLD", "amount": 10.0, "units": 3 }));

        let assets = h.service.get_assets_for_address(&addr).await;
        assert_eq!(assets.len(), 1, "The base coin is not an asset");
        assert_eq!(assets[0].name, "GOLD");
        assert_eq!(assets[0].amount, "2.500");

        let value: Value = serde_json::to_value(&assets).unwrap();
        assert_eq!(value[0]["amount"], json!("2.500"));
    }
}
