/// A domain event that can be appended to the event store.
///
/// Events are immutable facts; `event_type` is the stable name used for
/// routing and deserialization (e.g. `"NodeAggregateWithNodeWasCreated"`).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }
}
