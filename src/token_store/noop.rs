use super::TokenStore;

/// Token store for execution contexts without persistent client storage
///
/// Writes are dropped and reads always miss, which makes server-rendered
/// passes look like a fresh anonymous visit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTokenStore;

impl TokenStore for NoopTokenStore {
    fn set(&self, key: &str, _value: &str, _max_age_seconds: u64) {
        log::trace!("Ignoring write of '{key}' outside the browser context");
    }

    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn delete(&self, _key: &str) {}
}
