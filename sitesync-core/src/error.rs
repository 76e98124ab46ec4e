use thiserror::Error;

use crate::{
    catalog::SessionError, dispatch::DispatchError, keys::KeyGenerationError,
};

/// Run-level failures. Anything that reaches this type aborts the sync pass;
/// page and record failures are logged and absorbed where they happen.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("error generating key pair: {0}")]
    KeyGeneration(#[from] KeyGenerationError),

    #[error("failed to establish catalog session: {0}")]
    Session(#[from] SessionError),

    #[error("failed to create dispatch sink: {0}")]
    Sink(#[from] DispatchError),

    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zeroize::Zeroizing;

    use super::*;
    use crate::{
        catalog::HttpCatalogClient,
        config::{BrokerSettings, CatalogSettings},
        dispatch::RedisCelerySink,
    };

    #[tokio::test]
    async fn unusable_broker_is_a_sink_error() {
        let settings = BrokerSettings {
            url: "amqp://guest@rabbit".into(),
            ..BrokerSettings::default()
        };

        let err = SyncError::from(RedisCelerySink::connect(&settings).await.unwrap_err());

        assert!(matches!(err, SyncError::Sink(DispatchError::Connection(_))));
        assert!(err.to_string().starts_with("failed to create dispatch sink"));
    }

    #[tokio::test]
    async fn rejected_login_is_a_session_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let settings = CatalogSettings {
            url: Url::parse(&server.uri()).unwrap(),
            username: "syncer".into(),
            password: Zeroizing::new("wrong".into()),
        };

        let err = SyncError::from(
            HttpCatalogClient::connect(&settings, Duration::from_secs(5))
                .await
                .unwrap_err(),
        );

        assert!(matches!(
            err,
            SyncError::Session(SessionError::Rejected { status: 401 })
        ));
    }
}
