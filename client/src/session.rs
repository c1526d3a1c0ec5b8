use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use log::info;
use url::Url;

use shared::{GameId, PlayerId};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Supplies the bearer token and the identity of the local player. Silent
/// renewal is the implementor's concern; callers re-query before every dial.
pub trait Identity: Send + Sync {
    fn player_id(&self) -> PlayerId;
    fn access_token(&self) -> BoxFuture<'_, Result<String, BoxError>>;
}

#[derive(Debug, Clone)]
pub struct StaticToken {
    player_id: PlayerId,
    token: String,
}

impl StaticToken {
    pub fn new(player_id: PlayerId, token: impl Into<String>) -> Self {
        StaticToken {
            player_id,
            token: token.into(),
        }
    }
}

impl Identity for StaticToken {
    fn player_id(&self) -> PlayerId {
        self.player_id.clone()
    }

    fn access_token(&self) -> BoxFuture<'_, Result<String, BoxError>> {
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// One-shot administrative client used to create a game session before the
/// real-time connection begins.
pub trait SessionService: Send + Sync {
    fn create_session(&self, host_name: &str) -> BoxFuture<'_, Result<GameId, BoxError>>;
}

/// Stand-in for deployments without an administrative endpoint: derives the
/// session id locally from the host name and the wall clock.
#[derive(Debug, Default)]
pub struct LocalSession;

impl SessionService for LocalSession {
    fn create_session(&self, host_name: &str) -> BoxFuture<'_, Result<GameId, BoxError>> {
        let slug: String = host_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        Box::pin(async move {
            let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
            let id = GameId::new(format!("{}-{:x}", slug, nanos));
            info!("Created local session {}", id);
            Ok(id)
        })
    }
}

/// Builds the dial URL: the configured endpoint with the bearer token (and
/// the session id when present) appended to the query string.
pub fn dial_url(endpoint: &Url, token: &str, session: Option<&GameId>) -> Url {
    let mut url = endpoint.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("token", token);
        if let Some(session) = session {
            pairs.append_pair("session", session.as_str());
        }
    }
    url
}
