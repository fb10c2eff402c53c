#[cfg(test)]
mod tests {
    use crate::cache::policy::{is_valid, CHAIN_STATS_DURATION, UNCLASSIFIED_DURATION};
    use crate::cache::{policy_for, CacheClass, CacheDurations, CachePolicy};
    use std::time::Duration;

    #[test]
    fn test_method_classification() {
        assert_eq!(policy_for("getblockcount"), CachePolicy::ChainTip);
        assert_eq!(policy_for("getrawmempool"), CachePolicy::Mempool);
        assert_eq!(policy_for("getaddressbalance"), CachePolicy::Utxo);
        assert_eq!(policy_for("getspentinfo"), CachePolicy::Utxo);
        assert_eq!(policy_for("getaddresstxids"), CachePolicy::TxHistory);
        assert_eq!(policy_for("getassetdata"), CachePolicy::AssetData);
        assert_eq!(policy_for("getblockhash"), CachePolicy::Immutable);
        assert_eq!(policy_for("getrawtransaction"), CachePolicy::Immutable);
        assert_eq!(policy_for("getblockchaininfo"), CachePolicy::ChainStats);
        assert_eq!(policy_for("sendrawtransaction"), CachePolicy::Uncached);
        assert_eq!(policy_for("somethingnew"), CachePolicy::Unclassified);
    }

    #[test]
    fn test_policy_classes() {
        assert_eq!(CachePolicy::Immutable.class(), CacheClass::Indefinite);
        assert_eq!(CachePolicy::Uncached.class(), CacheClass::Volatile);
        assert_eq!(CachePolicy::AssetData.class(), CacheClass::Day);
        assert!(!CachePolicy::Uncached.is_cacheable());
        assert!(CachePolicy::Unclassified.is_cacheable());
    }

    #[test]
    fn test_durations_follow_configuration() {
        let durations = CacheDurations {
            utxo: 1_000,
            block_count: 2_000,
            ..CacheDurations::default()
        };

        assert_eq!(durations.duration_for(CachePolicy::Utxo), Some(Duration::from_millis(1_000)));
        assert_eq!(durations.duration_for(CachePolicy::ChainTip), Some(Duration::from_millis(2_000)));
        assert_eq!(durations.duration_for(CachePolicy::Immutable), None);
        assert_eq!(durations.duration_for(CachePolicy::ChainStats), Some(CHAIN_STATS_DURATION));
        assert_eq!(durations.duration_for(CachePolicy::Unclassified), Some(UNCLASSIFIED_DURATION));
    }

    #[test]
    fn test_expiry_boundary() {
        let stored_at = 1_000_000;
        let max_age = Some(Duration::from_millis(30_000));

        assert!(is_valid(max_age, stored_at, stored_at + 29_999), "One ms before expiry is valid");
        assert!(!is_valid(max_age, stored_at, stored_at + 30_000), "Age equal to the duration is stale");
        assert!(!is_valid(max_age, stored_at, stored_at + 30_001), "One ms after expiry is stale");
    }

    #[test]
    fn test_indefinite_never_expires() {
        let ten_years = 10 * 365 * 24 * 60 * 60 * 1000_i64;
        assert!(is_valid(None, 0, ten_years));
    }
}
