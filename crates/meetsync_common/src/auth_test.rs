#[cfg(test)]
mod tests {
    use crate::auth::*;
    use crate::models::{CalendarProvider, ConnectedCalendar};
    use crate::store::{ConnectedCalendarStore, InMemoryCalendarStore};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token(expires_in: Duration) -> OAuthToken {
        OAuthToken {
            access_token: "old-access".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Utc::now() + expires_in,
            scope: Some("calendar".to_string()),
            token_type: Some("Bearer".to_string()),
        }
    }

    #[test]
    fn test_is_expiring_threshold() {
        let now = Utc::now();
        let t = OAuthToken {
            expires_at: now + Duration::minutes(4),
            ..token(Duration::zero())
        };
        assert!(is_expiring(&t, now, Duration::minutes(5)));
        assert!(!is_expiring(&t, now, Duration::minutes(1)));
    }

    #[tokio::test]
    async fn test_valid_token_is_reused_without_refresh() {
        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().times(0);
        let mut persister = MockTokenPersister::new();
        persister.expect_persist().times(0);

        let manager = TokenManager::new(
            token(Duration::hours(1)),
            Arc::new(refresher),
            Arc::new(persister),
            Duration::minutes(5),
        );
        assert_eq!(manager.access_token().await.unwrap(), "old-access");
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted_once() {
        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().times(1).returning(|old| {
            Ok(OAuthToken {
                access_token: "new-access".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
                ..old.clone()
            })
        });
        let mut persister = MockTokenPersister::new();
        persister
            .expect_persist()
            .withf(|t| t.access_token == "new-access")
            .times(1)
            .returning(|_| Ok(()));

        let manager = Arc::new(TokenManager::new(
            token(Duration::seconds(10)),
            Arc::new(refresher),
            Arc::new(persister),
            Duration::minutes(5),
        ));

        let (a, b) = tokio::join!(manager.access_token(), manager.access_token());
        assert_eq!(a.unwrap(), "new-access");
        assert_eq!(b.unwrap(), "new-access");
        assert_eq!(manager.current().await.access_token, "new-access");
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let mut refresher = MockTokenRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|_| Err(crate::MeetsyncError::TokenRefresh("revoked".into())));
        let mut persister = MockTokenPersister::new();
        persister.expect_persist().times(0);

        let manager = TokenManager::new(
            token(Duration::zero()),
            Arc::new(refresher),
            Arc::new(persister),
            Duration::minutes(5),
        );
        assert!(matches!(
            manager.access_token().await,
            Err(crate::MeetsyncError::TokenRefresh(_))
        ));
        assert_eq!(manager.current().await.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_oauth_refresher_posts_form_and_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = OAuthRefresher::new(
            reqwest::Client::new(),
            format!("{}/token", server.uri()),
            "client",
            "secret",
        );
        let refreshed = refresher.refresh(&token(Duration::zero())).await.unwrap();

        assert_eq!(refreshed.access_token, "fresh");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert!(refreshed.expires_at > Utc::now() + Duration::minutes(55));
    }

    #[tokio::test]
    async fn test_oauth_refresher_maps_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let refresher = OAuthRefresher::new(
            reqwest::Client::new(),
            format!("{}/token", server.uri()),
            "client",
            "secret",
        );
        let err = refresher.refresh(&token(Duration::zero())).await.unwrap_err();
        assert!(matches!(err, crate::MeetsyncError::TokenRefresh(m) if m.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_store_persister_writes_office_payload_with_email() {
        let store = Arc::new(InMemoryCalendarStore::with_records(vec![ConnectedCalendar::new(
            "0xabc",
            CalendarProvider::Office365,
            "alice@contoso.com",
            serde_json::json!({}),
        )]));
        let persister = ConnectedCalendarTokenPersister::new(
            store.clone(),
            "0xabc",
            "alice@contoso.com",
            CalendarProvider::Office365,
        );
        let t = token(Duration::hours(1));
        persister.persist(&t).await.unwrap();

        let stored = &store.get_connected_calendars("0xabc").await.unwrap()[0];
        assert_eq!(stored.payload["access_token"], "old-access");
        assert_eq!(stored.payload["email"], "alice@contoso.com");
        assert_eq!(
            stored.payload["expiry_date"],
            serde_json::json!(t.expires_at.timestamp_millis())
        );
    }
}
