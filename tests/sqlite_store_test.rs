//! Engine over the SQLite store.
//!
//! Tests cover:
//! - File-backed store opened from an INI config
//! - Compute, cached lookup and tier separation in the two value tables
//! - Wholesale recompute after prices change
//! - Clearing by stock and by user
//! - Group values and stored nulls surviving a round trip through SQL

#![cfg(feature = "sqlite")]

mod common;

use approx::assert_relative_eq;
use common::*;
use indicator_engine::adapters::file_config_adapter::FileConfigAdapter;
use indicator_engine::adapters::sqlite_adapter::SqliteStore;
use indicator_engine::domain::engine::{ComputeOptions, IndicatorEngine, ValuesOptions};
use indicator_engine::domain::error::ErrorKind;
use indicator_engine::ports::store_port::ValueRepository;
use std::sync::Arc;

fn seeded(indicators: &[Indicator], rows: &[PriceRow]) -> Arc<SqliteStore> {
    let store = SqliteStore::in_memory().unwrap();
    store.initialize_schema().unwrap();
    store.insert_stock(STOCK, "600519", "Kweichow Moutai").unwrap();
    store.insert_prices(STOCK, rows).unwrap();
    for indicator in indicators {
        store.insert_indicator(indicator).unwrap();
    }
    Arc::new(store)
}

fn shared_key(indicator_id: IndicatorId) -> CacheKey {
    CacheKey {
        indicator_id,
        stock_id: STOCK,
        tier: CacheTier::Shared,
    }
}

fn private_key(indicator_id: IndicatorId, user: UserId) -> CacheKey {
    CacheKey {
        indicator_id,
        stock_id: STOCK,
        tier: CacheTier::Private(user),
    }
}

mod file_backed {
    use super::*;

    #[test]
    fn store_opened_from_config_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("engine.db");
        let ini = format!(
            "[store]\nbackend = sqlite\n\n[sqlite]\npath = {}\npool_size = 2\n",
            db_path.display()
        );
        let config = FileConfigAdapter::from_string(&ini).unwrap();

        {
            let store = SqliteStore::from_config(&config).unwrap();
            store.initialize_schema().unwrap();
            store.insert_stock(STOCK, "000001", "Ping An Bank").unwrap();
            store.insert_prices(STOCK, &price_series(6, 10.0)).unwrap();
            store
                .insert_indicator(&single_indicator(1, "close", Visibility::Public, OWNER))
                .unwrap();
            let engine = IndicatorEngine::new(Arc::new(store), ScriptedSandbox::echo_close());
            assert!(engine.compute_indicator(1, STOCK, OWNER, ComputeOptions::default()).success);
        }

        let reopened = SqliteStore::from_config(&config).unwrap();
        let values = reopened.read_values(&shared_key(1)).unwrap();
        assert_eq!(values.len(), 6);
        assert_eq!(values[&day(5)], scalar(15.0));
    }
}

mod compute_and_read {
    use super::*;

    #[test]
    fn tiers_use_separate_tables() {
        let store = seeded(
            &[
                single_indicator(1, "pub", Visibility::Public, OWNER),
                single_indicator(2, "priv", Visibility::Private, OWNER),
            ],
            &price_series(8, 10.0),
        );
        let engine = IndicatorEngine::new(store.clone(), ScriptedSandbox::echo_close());

        for id in [1, 2] {
            let result = engine.compute_indicator(id, STOCK, OWNER, ComputeOptions::default());
            assert!(result.success, "{result:?}");
            assert_eq!(result.cached_rows, Some(8));
        }

        assert_eq!(store.read_values(&shared_key(1)).unwrap().len(), 8);
        assert!(store.read_values(&private_key(1, OWNER)).unwrap().is_empty());
        assert!(store.read_values(&shared_key(2)).unwrap().is_empty());
        assert_eq!(store.read_values(&private_key(2, OWNER)).unwrap().len(), 8);

        let denied = engine.get_indicator_values(2, STOCK, STRANGER, ValuesOptions::default());
        assert_eq!(denied.failure.unwrap().error_kind, ErrorKind::AccessDenied);
    }

    #[test]
    fn warm_up_nulls_and_groups_survive_storage() {
        let store = seeded(
            &[
                single_indicator(1, "sma3", Visibility::Public, OWNER),
                group_indicator(2, "env", &["upper", "lower"], Visibility::Public, OWNER),
            ],
            &price_series(5, 10.0),
        );

        let sma = IndicatorEngine::new(store.clone(), ScriptedSandbox::sma(3));
        assert!(sma.compute_indicator(1, STOCK, OWNER, ComputeOptions::default()).success);
        let values = sma.get_indicator_values(1, STOCK, OWNER, ValuesOptions::default());
        assert_eq!(values.values[0].value, IndicatorValue::Scalar(None));
        assert_eq!(values.values[1].value, IndicatorValue::Scalar(None));
        assert_eq!(values.values[2].value, scalar(11.0));

        let env = IndicatorEngine::new(
            store,
            ScriptedSandbox::group(&[("upper", 1.05), ("lower", 0.95)]),
        );
        assert!(env.compute_indicator(2, STOCK, OWNER, ComputeOptions::default()).success);
        let values = env.get_indicator_values(2, STOCK, OWNER, ValuesOptions::default());
        match &values.values[4].value {
            IndicatorValue::Group(sub) => {
                assert_relative_eq!(sub["upper"].unwrap(), 14.7);
                assert_relative_eq!(sub["lower"].unwrap(), 13.3);
            }
            other => panic!("expected group value, got {other:?}"),
        }
    }

    #[test]
    fn redefined_shape_does_not_reuse_stale_values() {
        let store = seeded(
            &[single_indicator(1, "close", Visibility::Public, OWNER)],
            &price_series(4, 10.0),
        );
        let single = IndicatorEngine::new(store.clone(), ScriptedSandbox::echo_close());
        assert!(single.compute_indicator(1, STOCK, OWNER, ComputeOptions::default()).success);

        store
            .insert_indicator(&group_indicator(
                1,
                "env",
                &["upper", "lower"],
                Visibility::Public,
                OWNER,
            ))
            .unwrap();
        let group = IndicatorEngine::new(
            store,
            ScriptedSandbox::group(&[("upper", 1.05), ("lower", 0.95)]),
        );

        let stale = group.get_indicator_values(1, STOCK, OWNER, ValuesOptions::default());
        assert!(stale.failure.is_none());
        assert!(stale.values.is_empty());

        let refreshed = group.get_indicator_values(
            1,
            STOCK,
            OWNER,
            ValuesOptions {
                auto_compute: true,
                ..Default::default()
            },
        );
        assert!(refreshed.computed);
        assert_eq!(refreshed.values.len(), 4);
        assert!(
            refreshed
                .values
                .iter()
                .all(|v| matches!(v.value, IndicatorValue::Group(_)))
        );
    }

    #[test]
    fn auto_compute_fills_an_empty_cache() {
        let store = seeded(
            &[single_indicator(1, "close", Visibility::Public, OWNER)],
            &price_series(4, 10.0),
        );
        let engine = IndicatorEngine::new(store, ScriptedSandbox::echo_close());
        let options = ValuesOptions {
            auto_compute: true,
            ..Default::default()
        };

        let first = engine.get_indicator_values(1, STOCK, OWNER, options);
        assert!(first.computed);
        assert_eq!(first.values.len(), 4);
        let second = engine.get_indicator_values(1, STOCK, OWNER, options);
        assert!(!second.computed);
    }
}

mod recompute_and_clear {
    use super::*;

    #[test]
    fn recompute_drops_dates_no_longer_produced() {
        let store = seeded(
            &[single_indicator(1, "close", Visibility::Public, OWNER)],
            &price_series(10, 10.0),
        );
        let engine = IndicatorEngine::new(store.clone(), ScriptedSandbox::echo_close());
        assert!(engine.compute_indicator(1, STOCK, OWNER, ComputeOptions::default()).success);

        store.delete_prices(STOCK).unwrap();
        store.insert_prices(STOCK, &price_series(3, 20.0)).unwrap();
        assert!(engine.compute_indicator(1, STOCK, OWNER, ComputeOptions::default()).success);

        let values = store.read_values(&shared_key(1)).unwrap();
        assert_eq!(values.keys().copied().collect::<Vec<_>>(), vec![day(0), day(1), day(2)]);
        assert_eq!(values[&day(0)], scalar(20.0));
    }

    #[test]
    fn clear_by_user_leaves_other_rows() {
        let store = seeded(
            &[single_indicator(1, "close", Visibility::Unlisted, OWNER)],
            &price_series(5, 10.0),
        );
        let engine = IndicatorEngine::new(store.clone(), ScriptedSandbox::echo_close());
        assert!(engine.compute_indicator(1, STOCK, OWNER, ComputeOptions::default()).success);

        let stranger = engine.clear_indicator_cache(1, Some(STOCK), Some(STRANGER));
        assert!(stranger.failure.is_none());
        assert_eq!(stranger.private_deleted, 0);
        assert_eq!(store.read_values(&private_key(1, OWNER)).unwrap().len(), 5);

        let everyone = engine.clear_indicator_cache(1, None, None);
        assert_eq!(everyone.public_deleted, 0);
        assert_eq!(everyone.private_deleted, 5);
        assert!(store.read_values(&private_key(1, OWNER)).unwrap().is_empty());
    }
}
