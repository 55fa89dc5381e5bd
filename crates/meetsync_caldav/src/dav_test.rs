#[cfg(test)]
mod tests {
    use crate::dav::*;
    use chrono::{TimeZone, Utc};

    const SYNC_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:cal="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/calendars/jane/work/a1.ics</d:href>
    <d:propstat>
      <d:prop>
        <d:getetag>"etag-1"</d:getetag>
        <cal:calendar-data><![CDATA[BEGIN:VCALENDAR
VERSION:2.0
END:VCALENDAR
]]></cal:calendar-data>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
    <d:propstat>
      <d:prop><d:displayname/></d:prop>
      <d:status>HTTP/1.1 404 Not Found</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/calendars/jane/work/gone.ics</d:href>
    <d:status>HTTP/1.1 404 Not Found</d:status>
  </d:response>
  <d:sync-token>http://example.com/sync/42</d:sync-token>
</d:multistatus>"#;

    #[test]
    fn test_parse_sync_collection() {
        let listing = parse_multistatus(SYNC_RESPONSE).unwrap();
        assert_eq!(listing.sync_token.as_deref(), Some("http://example.com/sync/42"));
        assert_eq!(listing.responses.len(), 2);

        let changed = &listing.responses[0];
        assert_eq!(changed.href, "/calendars/jane/work/a1.ics");
        assert_eq!(changed.status, Some(200));
        assert_eq!(changed.etag.as_deref(), Some("\"etag-1\""));
        assert!(changed.calendar_data.as_deref().unwrap().starts_with("BEGIN:VCALENDAR"));
        assert!(changed.display_name.is_none());
        assert!(!changed.is_missing());

        assert!(listing.responses[1].is_missing());
    }

    #[test]
    fn test_truncated_sync_collection() {
        let body = r#"<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/calendars/jane/work/</d:href>
    <d:status>HTTP/1.1 507 Insufficient Storage</d:status>
  </d:response>
  <d:sync-token>t-2</d:sync-token>
</d:multistatus>"#;
        let listing = parse_multistatus(body).unwrap();
        assert!(listing.is_truncated());
        assert!(!listing.responses[0].is_missing());
        assert!(!parse_multistatus(SYNC_RESPONSE).unwrap().is_truncated());
    }

    #[test]
    fn test_parse_calendar_collections() {
        let body = r##"<multistatus xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav" xmlns:A="http://apple.com/ns/ical/">
  <response>
    <href>/1234/calendars/</href>
    <propstat><prop><resourcetype><collection/></resourcetype></prop><status>HTTP/1.1 200 OK</status></propstat>
  </response>
  <response>
    <href>/1234/calendars/home/</href>
    <propstat>
      <prop>
        <displayname>Home</displayname>
        <resourcetype><collection/><C:calendar/></resourcetype>
        <C:supported-calendar-component-set><C:comp name="VEVENT"/></C:supported-calendar-component-set>
        <A:calendar-color>#FF2968FF</A:calendar-color>
        <current-user-privilege-set><privilege><read/></privilege><privilege><write/></privilege></current-user-privilege-set>
      </prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
  </response>
  <response>
    <href>/1234/calendars/tasks/</href>
    <propstat>
      <prop>
        <resourcetype><collection/><C:calendar/></resourcetype>
        <C:supported-calendar-component-set><C:comp name="VTODO"/></C:supported-calendar-component-set>
      </prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
  </response>
</multistatus>"##;

        let listing = parse_multistatus(body).unwrap();
        let calendars: Vec<_> = listing.responses.iter().filter(|r| r.holds_events()).collect();
        assert_eq!(calendars.len(), 1);
        assert_eq!(calendars[0].display_name.as_deref(), Some("Home"));
        assert_eq!(calendars[0].color.as_deref(), Some("#FF2968"));
        assert_eq!(calendars[0].can_write, Some(true));
    }

    #[test]
    fn test_parse_principal_and_home() {
        let body = r#"<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/</d:href>
    <d:propstat>
      <d:prop>
        <d:current-user-principal><d:href>/1234/principal/</d:href></d:current-user-principal>
        <c:calendar-home-set><d:href>https://p42-caldav.icloud.com/1234/calendars/</d:href></c:calendar-home-set>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;
        let response = &parse_multistatus(body).unwrap().responses[0];
        assert_eq!(response.current_user_principal.as_deref(), Some("/1234/principal/"));
        assert_eq!(
            response.calendar_home.as_deref(),
            Some("https://p42-caldav.icloud.com/1234/calendars/")
        );
    }

    #[test]
    fn test_rejects_non_multistatus_documents() {
        assert!(parse_multistatus("<error xmlns=\"DAV:\"><valid-sync-token/></error>").is_err());
        assert!(parse_multistatus("not xml").is_err());
    }

    #[test]
    fn test_request_bodies() {
        let start = Utc.with_ymd_and_hms(2030, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();

        let query = calendar_query(start, end, true);
        assert!(query.contains(r#"<C:expand start="20300501T000000Z" end="20300601T000000Z"/>"#));
        assert!(query.contains(r#"<C:time-range start="20300501T000000Z" end="20300601T000000Z"/>"#));
        assert!(!calendar_query(start, end, false).contains("expand"));

        assert!(sync_collection(None).contains("<D:sync-token></D:sync-token>"));
        assert!(sync_collection(Some("a&b")).contains("<D:sync-token>a&amp;b</D:sync-token>"));

        let multiget = calendar_multiget(&["/cal/a.ics".to_string(), "/cal/b.ics".to_string()]);
        assert!(multiget.contains("<D:href>/cal/a.ics</D:href>"));
        assert!(multiget.contains("<D:href>/cal/b.ics</D:href>"));
    }
}
