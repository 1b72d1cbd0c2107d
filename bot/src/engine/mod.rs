pub mod backoff;
pub mod channel_title;
pub mod mcstatus;
pub mod presence;
pub mod probe;
pub mod reconcile;
pub mod renderer;
pub mod snapshot;
pub mod snapshot_cache;
pub mod subscribers;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;
