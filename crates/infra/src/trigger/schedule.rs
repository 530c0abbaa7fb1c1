use chrono::{DateTime, Duration, Utc};

use reaper_core::{DomainResult, GuardEvaluator, GuardName, KeyValue, Record, RecordType, SelfDestroyPayload};

/// A "destroy this record some time after it becomes eligible" declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRule {
    record_type: RecordType,
    after: Duration,
    when: Option<GuardName>,
    ensuring: Option<GuardName>,
}

impl ScheduleRule {
    /// Unconditional rule: every created record is destroyed `after` later.
    pub fn new(record_type: impl Into<RecordType>, after: Duration) -> Self {
        Self {
            record_type: record_type.into(),
            after,
            when: None,
            ensuring: None,
        }
    }

    /// Eligibility condition. Checked on create, and on update for a
    /// false → true transition.
    pub fn when(mut self, guard: impl Into<GuardName>) -> Self {
        self.when = Some(guard.into());
        self
    }

    /// Guard re-evaluated by the job at fire time.
    pub fn ensuring(mut self, guard: impl Into<GuardName>) -> Self {
        self.ensuring = Some(guard.into());
        self
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn after(&self) -> Duration {
        self.after
    }

    pub fn when_guard(&self) -> Option<&GuardName> {
        self.when.as_ref()
    }

    pub fn ensuring_guard(&self) -> Option<&GuardName> {
        self.ensuring.as_ref()
    }

    pub fn fires_on_create(&self, guards: &dyn GuardEvaluator, record: &Record) -> DomainResult<bool> {
        guards.evaluate(record, self.when.as_ref())
    }

    pub fn fires_on_update(
        &self,
        guards: &dyn GuardEvaluator,
        before: &Record,
        after: &Record,
    ) -> DomainResult<bool> {
        let Some(when) = self.when.as_ref() else {
            return Ok(false);
        };
        Ok(!guards.evaluate(before, Some(when))? && guards.evaluate(after, Some(when))?)
    }

    /// Fire time anchored at `now`.
    pub fn fire_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.after
    }

    pub fn payload(&self, record_key: KeyValue) -> SelfDestroyPayload {
        SelfDestroyPayload::new(self.record_type.clone(), record_key, self.ensuring.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::GuardRegistry;

    fn guards() -> GuardRegistry {
        GuardRegistry::builder()
            .register("book", "published?", |r| r.str_attr("status") == Some("published"))
            .build()
    }

    fn book(status: &str) -> Record {
        Record::new("book").with("id", 1).with("status", status)
    }

    fn rule() -> ScheduleRule {
        ScheduleRule::new("book", Duration::days(30))
            .when("published?")
            .ensuring("published?")
    }

    #[test]
    fn create_fires_only_when_eligible() {
        let guards = guards();
        assert!(rule().fires_on_create(&guards, &book("published")).unwrap());
        assert!(!rule().fires_on_create(&guards, &book("draft")).unwrap());
    }

    #[test]
    fn update_fires_on_transition_into_eligibility() {
        let guards = guards();
        let rule = rule();
        assert!(rule.fires_on_update(&guards, &book("draft"), &book("published")).unwrap());
        assert!(!rule.fires_on_update(&guards, &book("published"), &book("published")).unwrap());
        assert!(!rule.fires_on_update(&guards, &book("published"), &book("proposed")).unwrap());
        assert!(!rule.fires_on_update(&guards, &book("draft"), &book("written")).unwrap());
    }

    #[test]
    fn unconditional_rule_never_fires_on_update() {
        let guards = guards();
        let rule = ScheduleRule::new("book", Duration::days(10));
        assert!(rule.fires_on_create(&guards, &book("draft")).unwrap());
        assert!(!rule.fires_on_update(&guards, &book("draft"), &book("published")).unwrap());
    }

    #[test]
    fn payload_carries_the_ensuring_guard() {
        let now = Utc::now();
        let rule = rule();
        assert_eq!(rule.fire_at(now), now + Duration::days(30));

        let payload = rule.payload(KeyValue::Int(1));
        assert_eq!(payload.guard_name().map(GuardName::as_str), Some("published?"));
        assert_eq!(payload.record_key(), &KeyValue::Int(1));
    }
}
