//! In-memory SSH password cache, keyed by ship name.
//!
//! Lifetime is the owning process; entries are never serialised and never
//! logged. Hold one cache per cockpit instance rather than a module-level
//! singleton.

use std::collections::HashMap;
use std::sync::RwLock;

use secrecy::SecretString;

#[derive(Default)]
pub struct PasswordCache {
    inner: RwLock<HashMap<String, SecretString>>,
}

impl PasswordCache {
    pub fn new() -> PasswordCache {
        PasswordCache::default()
    }

    pub fn get(&self, ship_name: &str) -> Option<SecretString> {
        self.inner.read().expect("password cache poisoned").get(ship_name).cloned()
    }

    pub fn set(&self, ship_name: impl Into<String>, password: SecretString) {
        self.inner
            .write()
            .expect("password cache poisoned")
            .insert(ship_name.into(), password);
    }

    pub fn forget(&self, ship_name: &str) {
        self.inner.write().expect("password cache poisoned").remove(ship_name);
    }

    pub fn clear(&self) {
        self.inner.write().expect("password cache poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn lifecycle() {
        let cache = PasswordCache::new();
        assert!(cache.get("rps").is_none());

        cache.set("rps", SecretString::from("secret".to_string()));
        assert_eq!(cache.get("rps").unwrap().expose_secret(), "secret");

        cache.forget("rps");
        assert!(cache.get("rps").is_none());

        cache.set("a", SecretString::from("1".to_string()));
        cache.set("b", SecretString::from("2".to_string()));
        cache.clear();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn concurrent_readers_do_not_block_each_other() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(PasswordCache::new());
        cache.set("ship", SecretString::from("pw".to_string()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(cache.get("ship").is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
