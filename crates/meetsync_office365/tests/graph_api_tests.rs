
use chrono::{Duration, TimeZone, Utc};
use fixtures::*;
use meetsync_common::models::{EventStatus, ParticipationStatus};
use meetsync_common::{CalendarIntegration, ConnectedCalendarStore, MeetsyncError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn bodies_of(server: &MockServer, verb: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == verb)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_create_twice_posts_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/calendar/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_lookup(&server, vec![event_json(GRAPH_ID)]).await;
    Mock::given(method("POST"))
        .and(path("/me/calendar/events"))
        .and(header("prefer", "outlook.timezone=\"UTC\""))
        .and(body_partial_json(json!({
            "transactionId": MEETING_ID,
            "subject": "Design review",
            "start": { "dateTime": "2030-05-15T08:00:00", "timeZone": "UTC" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(event_json(GRAPH_ID)))
        .expect(1)
        .mount(&server)
        .await;

    let graph = adapter(&server);
    let first = graph
        .create_event(OWNER_ADDRESS, &meeting(), Utc::now(), "primary", true)
        .await
        .unwrap();
    let second = graph
        .create_event(OWNER_ADDRESS, &meeting(), Utc::now(), "primary", true)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.id, MEETING_ID);
    assert_eq!(first.provider_event_id, GRAPH_ID);
}

#[tokio::test]
async fn test_create_requests_teams_meeting_and_reminder() {
    let server = MockServer::start().await;
    mount_lookup(&server, vec![]).await;
    let mut created = event_json(GRAPH_ID);
    created["onlineMeeting"] = json!({ "joinUrl": "https://teams.microsoft.com/l/meetup-join/1" });
    Mock::given(method("POST"))
        .and(path("/me/calendar/events"))
        .and(body_partial_json(json!({
            "isOnlineMeeting": true,
            "onlineMeetingProvider": "teamsForBusiness",
            "isReminderOn": true,
            "reminderMinutesBeforeStart": 15
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(created))
        .expect(1)
        .mount(&server)
        .await;

    let result = adapter(&server)
        .create_event(OWNER_ADDRESS, &meeting(), Utc::now(), "primary", true)
        .await
        .unwrap();

    assert_eq!(
        result.additional_info.hangout_link.as_deref(),
        Some("https://teams.microsoft.com/l/meetup-join/1")
    );
    assert_eq!(
        result.additional_info.meeting_url.as_deref(),
        Some("https://teams.microsoft.com/l/meetup-join/1")
    );
}

#[tokio::test]
async fn test_create_on_secondary_calendar_uses_calendar_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/calendars/AAMkCal2/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/me/calendars/AAMkCal2/events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(event_json(GRAPH_ID)))
        .expect(1)
        .mount(&server)
        .await;

    let result = adapter(&server)
        .create_event(OWNER_ADDRESS, &meeting(), Utc::now(), "AAMkCal2", false)
        .await
        .unwrap();
    assert_eq!(result.calendar_id, "AAMkCal2");
}

#[tokio::test]
async fn test_delete_tolerates_missing_and_gone_events() {
    let server = MockServer::start().await;
    mount_lookup(&server, vec![event_json(GRAPH_ID)]).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/me/events/{}", GRAPH_ID)))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;

    adapter(&server).delete_event(MEETING_ID, "primary").await.unwrap();

    let empty = MockServer::start().await;
    mount_lookup(&empty, vec![]).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&empty)
        .await;
    adapter(&empty).delete_event(MEETING_ID, "primary").await.unwrap();
}

#[tokio::test]
async fn test_delete_propagates_server_errors() {
    let server = MockServer::start().await;
    mount_lookup(&server, vec![event_json(GRAPH_ID)]).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .delete_event(MEETING_ID, "primary")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_update_of_occurrence_patches_changed_fields_only() {
    let server = MockServer::start().await;
    let mut occurrence = event_json(GRAPH_ID);
    occurrence["seriesMasterId"] = json!("AAMkMaster");
    occurrence["type"] = json!("occurrence");
    occurrence["isOnlineMeeting"] = json!(true);
    mount_lookup(&server, vec![occurrence.clone()]).await;
    Mock::given(method("PATCH"))
        .and(path(format!("/me/events/{}", GRAPH_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(occurrence))
        .expect(1)
        .mount(&server)
        .await;

    let mut details = meeting();
    details.title = "Design review (moved)".to_string();
    details.recurrence = vec!["RRULE:FREQ=WEEKLY;COUNT=5".to_string()];
    adapter(&server)
        .update_event(OWNER_ADDRESS, &details, "primary")
        .await
        .unwrap();

    let patches = bodies_of(&server, "PATCH").await;
    assert_eq!(patches.len(), 1);
    let patch = &patches[0];
    assert_eq!(patch["subject"], "Design review (moved)");
    assert!(patch.get("recurrence").is_none());
    assert!(patch.get("start").is_none());
    assert!(patch.get("isOnlineMeeting").is_none());
}

#[tokio::test]
async fn test_update_of_single_event_sends_full_body_and_keeps_own_response() {
    let server = MockServer::start().await;
    let mut stored = event_json(GRAPH_ID);
    stored["attendees"] = json!([
        {
            "emailAddress": { "address": "guest@example.com" },
            "status": { "response": "accepted" }
        },
        {
            "emailAddress": { "address": "OWNER@contoso.com" },
            "status": { "response": "tentativelyAccepted" }
        }
    ]);
    mount_lookup(&server, vec![stored.clone()]).await;
    Mock::given(method("PATCH"))
        .and(path(format!("/me/events/{}", GRAPH_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored))
        .expect(1)
        .mount(&server)
        .await;

    adapter(&server)
        .update_event(OWNER_ADDRESS, &meeting(), "primary")
        .await
        .unwrap();

    let patch = &bodies_of(&server, "PATCH").await[0];
    assert_eq!(patch["subject"], "Design review");
    assert!(patch.get("start").is_some());
    let attendees = patch["attendees"].as_array().unwrap();
    let own = attendees
        .iter()
        .find(|a| a["emailAddress"]["address"] == ACCOUNT)
        .unwrap();
    assert_eq!(own["status"]["response"], "tentativelyAccepted");
}

#[tokio::test]
async fn test_update_of_unknown_meeting_is_not_found() {
    let server = MockServer::start().await;
    mount_lookup(&server, vec![]).await;

    let err = adapter(&server)
        .update_event(OWNER_ADDRESS, &meeting(), "primary")
        .await
        .unwrap_err();
    assert!(matches!(err, MeetsyncError::NotFound(_)));
}

#[tokio::test]
async fn test_rsvp_for_guest_matches_case_insensitively_and_keeps_casing() {
    let server = MockServer::start().await;
    mount_lookup(&server, vec![event_json(GRAPH_ID)]).await;
    Mock::given(method("PATCH"))
        .and(path(format!("/me/events/{}", GRAPH_ID)))
        .and(body_partial_json(json!({
            "attendees": [{
                "emailAddress": { "address": "Guest@Example.COM" },
                "status": { "response": "accepted" }
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(event_json(GRAPH_ID)))
        .expect(1)
        .mount(&server)
        .await;

    adapter(&server)
        .update_event_rsvp(
            MEETING_ID,
            "guest@example.com",
            ParticipationStatus::Accepted,
            "primary",
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rsvp_of_signed_in_invitee_uses_respond_action() {
    let server = MockServer::start().await;
    let mut invite = event_json("AAMkInvite");
    invite["responseStatus"] = json!({ "response": "notResponded" });
    Mock::given(method("GET"))
        .and(path("/me/events/AAMkInvite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(invite))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/me/events/AAMkInvite/tentativelyAccept"))
        .and(body_partial_json(json!({ "sendResponse": true })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    adapter(&server)
        .update_event_rsvp_for_external_event(
            "AAMkInvite",
            "Owner@Contoso.com",
            ParticipationStatus::Tentative,
            "primary",
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_list_events_follows_next_link_to_delta_link() {
    let server = MockServer::start().await;
    let page_two = format!("{}/delta/page-2", server.uri());
    let delta_link = format!("{}/delta/final", server.uri());
    Mock::given(method("GET"))
        .and(path("/me/calendar/calendarView/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [event_json(GRAPH_ID)],
            "@odata.nextLink": page_two
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/delta/page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "AAMkRemoved", "@removed": { "reason": "deleted" } }],
            "@odata.deltaLink": delta_link
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = adapter(&server).list_events("primary", None).await.unwrap();

    assert_eq!(page.events.len(), 2);
    assert_eq!(page.events[0].id, MEETING_ID);
    assert_eq!(page.events[1].status, EventStatus::Cancelled);
    assert_eq!(page.next_sync_token.as_deref(), Some(delta_link.as_str()));
}

#[tokio::test]
async fn test_list_events_restarts_when_delta_link_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/delta/stale"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;
    let fresh = format!("{}/delta/fresh", server.uri());
    Mock::given(method("GET"))
        .and(path("/me/calendar/calendarView/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [event_json(GRAPH_ID)],
            "@odata.deltaLink": fresh
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stale = format!("{}/delta/stale", server.uri());
    let page = adapter(&server)
        .list_events("primary", Some(&stale))
        .await
        .unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.next_sync_token.as_deref(), Some(fresh.as_str()));
}

#[tokio::test]
async fn test_availability_batches_and_falls_back_to_get_schedule() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/$batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responses": [
                {
                    "id": "0",
                    "status": 200,
                    "body": { "value": [
                        event_json(GRAPH_ID),
                        {
                            "id": "AAMkFree",
                            "showAs": "free",
                            "start": { "dateTime": "2030-05-15T12:00:00", "timeZone": "UTC" },
                            "end": { "dateTime": "2030-05-15T13:00:00", "timeZone": "UTC" }
                        }
                    ] }
                },
                { "id": "1", "status": 403, "body": { "error": { "code": "ErrorAccessDenied" } } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/me/calendar/getSchedule"))
        .and(body_partial_json(json!({ "schedules": [ACCOUNT] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "scheduleId": ACCOUNT,
                "scheduleItems": [
                    {
                        "status": "busy",
                        "start": { "dateTime": "2030-05-15T06:00:00.0000000", "timeZone": "UTC" },
                        "end": { "dateTime": "2030-05-15T07:00:00.0000000", "timeZone": "UTC" }
                    },
                    {
                        "status": "free",
                        "start": { "dateTime": "2030-05-15T14:00:00.0000000", "timeZone": "UTC" },
                        "end": { "dateTime": "2030-05-15T15:00:00.0000000", "timeZone": "UTC" }
                    }
                ]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2030, 5, 15, 0, 0, 0).unwrap();
    let busy = adapter(&server)
        .get_availability(
            &["primary".to_string(), "AAMkCal2".to_string()],
            start,
            start + Duration::days(1),
        )
        .await
        .unwrap();

    assert_eq!(busy.len(), 2);
    assert_eq!(busy[0].start, Utc.with_ymd_and_hms(2030, 5, 15, 6, 0, 0).unwrap());
    assert_eq!(busy[0].calendar_id.as_deref(), Some("AAMkCal2"));
    assert_eq!(busy[1].start, Utc.with_ymd_and_hms(2030, 5, 15, 8, 0, 0).unwrap());
    assert_eq!(busy[1].event_id.as_deref(), Some(GRAPH_ID));
}

#[tokio::test]
async fn test_availability_skips_calendar_failing_batch_and_schedule() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/$batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responses": [
                { "id": "0", "status": 200, "body": { "value": [event_json(GRAPH_ID)] } },
                { "id": "1", "status": 503, "body": { "error": { "code": "ServiceUnavailable" } } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/me/calendar/getSchedule"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2030, 5, 15, 0, 0, 0).unwrap();
    let busy = adapter(&server)
        .get_availability(
            &["primary".to_string(), "AAMkCal2".to_string()],
            start,
            start + Duration::days(1),
        )
        .await
        .unwrap();

    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].event_id.as_deref(), Some(GRAPH_ID));
}

#[tokio::test]
async fn test_get_event_by_id_retries_sanitized_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/events/AAMk_12-3"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/events/AAMk123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(event_json("AAMk123")))
        .expect(1)
        .mount(&server)
        .await;

    let event = adapter(&server)
        .get_event_by_id("AAMk_12-3", "primary")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.provider_event_id, "AAMk123");
    assert_eq!(event.id, MEETING_ID);
}

#[tokio::test]
async fn test_extended_properties_are_patched_with_marker() {
    let server = MockServer::start().await;
    mount_lookup(&server, vec![event_json(GRAPH_ID)]).await;
    Mock::given(method("PATCH"))
        .and(path(format!("/me/events/{}", GRAPH_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(event_json(GRAPH_ID)))
        .expect(1)
        .mount(&server)
        .await;

    let mut extra = BTreeMap::new();
    extra.insert("crmId".to_string(), "42".to_string());
    adapter(&server)
        .update_event_extended_properties(MEETING_ID, "primary", &extra)
        .await
        .unwrap();

    let patch = &bodies_of(&server, "PATCH").await[0];
    let ids: Vec<&str> = patch["singleValueExtendedProperties"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().any(|id| id.ends_with("Name crmId")));
    assert!(ids.iter().any(|id| id.ends_with("Name updatedBy")));
}

#[tokio::test]
async fn test_expiring_token_is_refreshed_with_scope_and_persisted_with_email() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(wiremock::matchers::body_string_contains("scope=offline_access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "rotated",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/calendars"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let (graph, store) = adapter_with_token(&server, token(Duration::seconds(10)));
    graph.list_calendars().await.unwrap();

    let record = &store.get_connected_calendars(OWNER_ADDRESS).await.unwrap()[0];
    assert_eq!(record.payload["access_token"], "fresh");
    assert_eq!(record.payload["refresh_token"], "rotated");
    assert_eq!(record.payload["email"], ACCOUNT);
}

#[tokio::test]
async fn test_resolve_email_falls_back_to_user_principal_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(query_param("$select", "mail,userPrincipalName"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mail": null,
            "userPrincipalName": "owner@contoso.onmicrosoft.com"
        })))
        .mount(&server)
        .await;

    let email = adapter(&server).resolve_email().await.unwrap();
    assert_eq!(email, "owner@contoso.onmicrosoft.com");
}

#[tokio::test]
async fn test_list_calendars_names_default_calendar_after_mailbox() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mail": null,
            "userPrincipalName": "Owner@Contoso.com"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/calendars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "id": "AAMkDefault", "name": "Calendar", "isDefaultCalendar": true },
                { "id": "AAMkTeam", "name": "Team", "isDefaultCalendar": false }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let calendars = adapter(&server).list_calendars().await.unwrap();

    assert_eq!(calendars[0].name, "Owner@Contoso.com");
    assert!(calendars[0].is_primary);
    assert_eq!(calendars[1].name, "Team");
}

#[tokio::test]
async fn test_list_calendars_fails_when_graph_rejects_the_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/calendars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let err = adapter(&server).list_calendars().await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_list_calendars_pages_and_marks_default() {
    let server = MockServer::start().await;
    let next = format!("{}/calendars/page-2", server.uri());
    Mock::given(method("GET"))
        .and(path("/me/calendars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "AAMkDefault", "name": "Calendar", "canEdit": true, "isDefaultCalendar": true, "hexColor": "#0078d4" }],
            "@odata.nextLink": next
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "AAMkHolidays", "name": "Holidays", "canEdit": false, "isDefaultCalendar": false, "hexColor": "" }]
        })))
        .mount(&server)
        .await;

    let calendars = adapter(&server).list_calendars().await.unwrap();

    assert_eq!(calendars.len(), 2);
    assert!(calendars[0].is_primary && calendars[0].sync);
    assert_eq!(calendars[0].color.as_deref(), Some("#0078d4"));
    assert!(calendars[1].read_only);
    assert!(calendars[1].color.is_none());
}

#[tokio::test]
async fn test_refresh_webhook_deletes_then_creates() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/subscriptions/sub-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .and(body_partial_json(json!({
            "changeType": "created,updated,deleted",
            "notificationUrl": "https://hooks.example.com/graph",
            "resource": "/me/events"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "sub-2",
            "resource": "/me/events",
            "expirationDateTime": "2030-05-18T10:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let channel = adapter(&server)
        .refresh_webhook("sub-1", "/me/events", "https://hooks.example.com/graph", None)
        .await
        .unwrap();

    assert_eq!(channel.channel_id, "sub-2");
    assert_eq!(channel.calendar_id, "primary");
    assert_eq!(
        channel.expiration,
        Some(Utc.with_ymd_and_hms(2030, 5, 18, 10, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_refresh_webhook_creates_even_when_delete_fails() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/subscriptions/sub-1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "sub-2",
            "resource": "/me/events",
            "expirationDateTime": "2030-05-18T10:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let channel = adapter(&server)
        .refresh_webhook("sub-1", "/me/events", "https://hooks.example.com/graph", None)
        .await
        .unwrap();
    assert_eq!(channel.channel_id, "sub-2");
}
