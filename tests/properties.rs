// Property-style tests for the universal invariants in `spec.md` §8 that
// quantify over "for all legal sequences of operations" rather than one
// concrete scenario.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use tokio::runtime::Runtime;

use warden::cache::memory::InMemoryCache;
use warden::clock::SystemClock;
use warden::{CacheClient, Ttl};

fn rt() -> Runtime {
    Runtime::new().unwrap()
}

fn cache() -> InMemoryCache {
    InMemoryCache::new(Arc::new(SystemClock::new()))
}

proptest! {
    /// Increment monotonicity (invariant 6): under N concurrent
    /// `increment(k, 1)` starting from an absent key, the final stored
    /// value equals N and every return value is a distinct integer in
    /// `[1, N]`.
    #[test]
    fn increment_monotonicity(n in 1u32..30) {
        rt().block_on(async {
            let cache = Arc::new(cache());
            let mut handles = Vec::new();
            for _ in 0..n {
                let cache = cache.clone();
                handles.push(tokio::spawn(async move {
                    cache.increment("counter", 1, Ttl::Unspecified).await.unwrap()
                }));
            }
            let mut seen = HashSet::new();
            for h in handles {
                let v = h.await.unwrap();
                assert!(v >= 1 && v <= n as i64);
                assert!(seen.insert(v), "increment returned a duplicate value: {v}");
            }
            assert_eq!(seen.len(), n as usize);
            let final_value: i64 = cache.increment("counter", 0, Ttl::Unspecified).await.unwrap();
            assert_eq!(final_value, n as i64);
        });
    }

    /// Set-if-higher idempotence (invariant 7): `set_if_higher(k, v)`
    /// applied twice with the same `v` changes the stored value at most
    /// once.
    #[test]
    fn set_if_higher_idempotent(v in 1i64..1_000_000) {
        rt().block_on(async {
            let cache = cache();
            let first = cache.set_if_higher("h", v, Ttl::Unspecified).await.unwrap();
            assert_eq!(first, v);
            let second = cache.set_if_higher("h", v, Ttl::Unspecified).await.unwrap();
            assert_eq!(second, 0, "second identical set_if_higher must be a no-op");
        });
    }

    /// Remove-all count accuracy (invariant 3): `remove_all(keys)` returns
    /// exactly the number of members of `keys` that existed at the moment
    /// of removal, across an arbitrary subset actually populated beforehand.
    #[test]
    fn remove_all_counts_existing_members(
        present in prop::collection::hash_set("[a-z]{1,8}", 0..12),
        absent in prop::collection::hash_set("[A-Z]{1,8}", 0..12),
    ) {
        rt().block_on(async {
            let cache = cache();
            for key in &present {
                cache.set(key, &1i32, Ttl::Unspecified).await.unwrap();
            }
            let mut requested: Vec<String> = present.iter().cloned().collect();
            requested.extend(absent.iter().cloned());
            let removed = cache.remove_all(Some(&requested)).await.unwrap();
            assert_eq!(removed, present.len() as u64);
        });
    }
}

/// Add atomicity (invariant 2): for N concurrent `add(k, v_i)` on an
/// absent key, exactly one returns `true`.
#[test]
fn add_atomicity_exactly_one_winner() {
    let rt = rt();
    rt.block_on(async {
        let cache = Arc::new(cache());
        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.add("k", &i, Ttl::Unspecified).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    });
}
