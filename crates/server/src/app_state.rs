use std::time::Duration;

use server_api::ApiContext;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub(crate) struct KeepAlive {
    pub(crate) ping_interval: Duration,
    pub(crate) pong_timeout: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) keepalive: KeepAlive,
}

impl AppState {
    pub(crate) fn new(api: ApiContext) -> Self {
        Self {
            api,
            keepalive: KeepAlive::default(),
        }
    }
}
