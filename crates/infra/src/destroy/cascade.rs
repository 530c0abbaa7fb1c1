use tracing::{debug, info, warn};

use reaper_core::CascadePayload;

use crate::record_store::RecordStore;

use super::error::DestroyError;
use super::liveness::OwnerLivenessCheck;

/// What a cascade run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// Rows whose key column matched the payload's key set.
    pub matched: usize,
    /// Matched rows this run actually removed.
    pub destroyed: usize,
}

/// Deletes a known set of dependents once their owner is confirmed gone.
pub struct CascadeDestroyJob<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> CascadeDestroyJob<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Run the cascade.
    ///
    /// The liveness check runs immediately before any deletion and is the
    /// only protection against a rolled-back or re-created owner. Dependents
    /// go through the store's per-row destroy so their own deferred
    /// associations fire. Keys with no row are skipped.
    pub fn perform(&self, payload: &CascadePayload) -> Result<CascadeOutcome, DestroyError> {
        let liveness = OwnerLivenessCheck::new(self.store);
        if liveness.exists(payload.owner_type(), payload.owner_key())? {
            warn!(
                owner_type = %payload.owner_type(),
                owner_key = %payload.owner_key(),
                dependent_type = %payload.dependent_type(),
                "cascade refused: owner still present"
            );
            return Err(DestroyError::OwnerStillPresent {
                owner_type: payload.owner_type().clone(),
                owner_key: payload.owner_key().clone(),
            });
        }

        let rows = self.store.find_all_by_keys(
            payload.dependent_type(),
            payload.dependent_key_column(),
            payload.dependent_keys().as_set(),
        )?;

        let mut outcome = CascadeOutcome {
            matched: rows.len(),
            destroyed: 0,
        };
        for row in &rows {
            if self.store.destroy(row)? {
                outcome.destroyed += 1;
            } else {
                debug!(dependent_type = %payload.dependent_type(), "dependent vanished before destroy");
            }
        }

        info!(
            owner_type = %payload.owner_type(),
            owner_key = %payload.owner_key(),
            dependent_type = %payload.dependent_type(),
            requested = payload.dependent_keys().len(),
            matched = outcome.matched,
            destroyed = outcome.destroyed,
            "cascade destroyed dependents"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::{HookContext, InMemoryRecordStore, LifecycleObserver, Schema, StoreError};
    use proptest::prelude::*;
    use reaper_core::{DependentKeys, KeyValue, Record, RecordType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn store_with(book_ids: &[i64], tag_ids: &[i64]) -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new(Schema::new().table("book").table("tag"));
        for id in book_ids {
            store.create(Record::new("book").with("id", *id)).unwrap();
        }
        for id in tag_ids {
            store
                .create(Record::new("tag").with("id", *id).with("name", format!("tag-{id}")))
                .unwrap();
        }
        store
    }

    fn payload(owner: i64, keys: &[i64]) -> CascadePayload {
        CascadePayload::new(
            RecordType::new("book"),
            KeyValue::Int(owner),
            RecordType::new("tag"),
            "id",
            DependentKeys::new(keys.iter().copied().map(KeyValue::Int)).unwrap(),
        )
    }

    fn tag_count(store: &InMemoryRecordStore) -> usize {
        store.count(&RecordType::new("tag")).unwrap()
    }

    #[test]
    fn live_owner_blocks_the_cascade() {
        let store = store_with(&[1], &[10, 11]);
        let err = CascadeDestroyJob::new(&store)
            .perform(&payload(1, &[10, 11]))
            .unwrap_err();

        assert!(matches!(err, DestroyError::OwnerStillPresent { .. }));
        assert_eq!(tag_count(&store), 2);
    }

    #[test]
    fn absent_owner_destroys_listed_dependents_only() {
        let store = store_with(&[], &[10, 11, 12]);
        let outcome = CascadeDestroyJob::new(&store)
            .perform(&payload(1, &[10, 11]))
            .unwrap();

        assert_eq!(outcome, CascadeOutcome { matched: 2, destroyed: 2 });
        assert_eq!(tag_count(&store), 1);
        assert!(store
            .exists(&RecordType::new("tag"), "id", &KeyValue::Int(12))
            .unwrap());
    }

    #[test]
    fn redelivery_is_a_no_op() {
        let store = store_with(&[], &[10, 11]);
        let job = CascadeDestroyJob::new(&store);
        let p = payload(1, &[10, 11, 99]);

        assert_eq!(job.perform(&p).unwrap().destroyed, 2);
        assert_eq!(job.perform(&p).unwrap(), CascadeOutcome::default());
    }

    #[test]
    fn dependents_can_be_matched_on_a_non_key_column() {
        let store = store_with(&[], &[10, 11]);
        let p = CascadePayload::new(
            RecordType::new("book"),
            KeyValue::Int(1),
            RecordType::new("tag"),
            "name",
            DependentKeys::new([KeyValue::from("tag-11")]).unwrap(),
        );

        assert_eq!(CascadeDestroyJob::new(&store).perform(&p).unwrap().destroyed, 1);
        assert_eq!(tag_count(&store), 1);
    }

    /// Stands in for a dependent's own destroy trigger whose queue is down
    /// for the first `outages` calls.
    struct FlakyTrigger {
        outages: AtomicUsize,
        triggered: Mutex<Vec<KeyValue>>,
    }

    impl LifecycleObserver for FlakyTrigger {
        fn after_destroy(
            &self,
            _ctx: HookContext,
            _store: &dyn RecordStore,
            record: &Record,
        ) -> anyhow::Result<()> {
            let remaining = self.outages.load(Ordering::SeqCst);
            if remaining > 0 {
                self.outages.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("queue unavailable");
            }
            self.triggered.lock().unwrap().extend(record.key("id"));
            Ok(())
        }
    }

    #[test]
    fn retry_after_failed_dependent_trigger_destroys_and_triggers_again() {
        let trigger = Arc::new(FlakyTrigger {
            outages: AtomicUsize::new(1),
            triggered: Mutex::new(Vec::new()),
        });
        let store = InMemoryRecordStore::builder(Schema::new().table("book").table("tag"))
            .observer(trigger.clone())
            .build();
        for id in [10, 11] {
            store.create(Record::new("tag").with("id", id)).unwrap();
        }
        let job = CascadeDestroyJob::new(&store);
        let p = payload(1, &[10, 11]);

        let err = job.perform(&p).unwrap_err();
        assert!(matches!(err, DestroyError::Store(StoreError::Observer(_))));
        assert_eq!(tag_count(&store), 2);

        assert_eq!(job.perform(&p).unwrap(), CascadeOutcome { matched: 2, destroyed: 2 });
        assert_eq!(tag_count(&store), 0);
        assert_eq!(
            *trigger.triggered.lock().unwrap(),
            vec![KeyValue::Int(10), KeyValue::Int(11)]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        #[test]
        fn each_listed_dependent_is_destroyed_exactly_once(
            present in prop::collection::btree_set(0_i64..40, 0..20),
            requested in prop::collection::btree_set(0_i64..40, 1..20),
            deliveries in 1_usize..4,
        ) {
            let present: Vec<i64> = present.into_iter().collect();
            let requested: Vec<i64> = requested.into_iter().collect();
            let store = store_with(&[], &present);
            let job = CascadeDestroyJob::new(&store);
            let p = payload(1, &requested);

            let mut destroyed = 0;
            for _ in 0..deliveries {
                destroyed += job.perform(&p).unwrap().destroyed;
            }

            let expected = present.iter().filter(|id| requested.contains(id)).count();
            prop_assert_eq!(destroyed, expected);
            prop_assert_eq!(tag_count(&store), present.len() - expected);
        }
    }
}
