use std::time::Duration;

use url::Url;

use crate::connection::ReconnectPolicy;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);
pub const DEFAULT_NOTICE_DURATION: Duration = Duration::from_secs(5);
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub reconnect: ReconnectPolicy,
    pub debounce_window: Duration,
    pub notice_duration: Duration,
    pub tick_period: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Url) -> Self {
        ClientConfig {
            endpoint,
            reconnect: ReconnectPolicy::default(),
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            notice_duration: DEFAULT_NOTICE_DURATION,
            tick_period: DEFAULT_TICK_PERIOD,
        }
    }
}
