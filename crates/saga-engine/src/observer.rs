use crate::instance::SagaInstance;

/// Receives a snapshot after every state change of every saga instance.
///
/// Snapshots are delivered after the coordinator has released its hold on
/// the instance, so an observer may call back into the coordinator. Use this
/// to persist instances; the engine itself keeps everything in memory.
pub trait SagaObserver: Send + Sync {
    fn on_transition(&self, instance: &SagaInstance);
}
