use std::time::Duration;

/// Location of the coordination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEndpoint {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl Default for StoreEndpoint {
    fn default() -> StoreEndpoint {
        StoreEndpoint {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl StoreEndpoint {
    pub(crate) fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Timeouts governing every advisory lock the coordinator takes.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a primitive acquire polls a contended lock before giving up.
    pub acq_timeout: Duration,

    /// TTL assigned to every advisory lock and cohort gate. Critical
    /// sections must finish within this budget; a lock that outlives it is
    /// released by the store and may be reacquired by someone else.
    pub hold_timeout: Duration,

    /// Where the coordination store lives.
    pub endpoint: StoreEndpoint,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            acq_timeout: Duration::from_secs(15),
            hold_timeout: Duration::from_secs(20),
            endpoint: StoreEndpoint::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_endpoint_url() {
        assert_eq!(StoreEndpoint::default().url(), "redis://localhost:6379/0");
    }

    #[test]
    fn acquire_deadline_shorter_than_hold_budget() {
        // A participant that just barely wins a contended acquire still has
        // the full hold budget ahead of it.
        let config = Config::default();
        assert!(config.acq_timeout < config.hold_timeout);
    }
}
